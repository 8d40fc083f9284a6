use anyhow::Result;
use colored::Colorize;
use request_insights::{config::Config, server};
use tracing::info;

/// Execute the start command (blocks until shutdown)
pub async fn execute(cfg: Config) -> Result<()> {
    println!("{}", "Starting request insights...".green());
    info!(
        host = %cfg.server.host,
        port = cfg.server.port,
        database = %cfg.database.path,
        "Starting request insights"
    );

    server::start_server(cfg).await
}
