use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use request_insights::{config, init_tracing};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let command = args.get_command();

    // Tracing follows the config when it loads; config errors are reported by
    // the command itself
    let loaded = config::load_config_from(&args.config);
    match &loaded {
        Ok(cfg) => init_tracing(&cfg.server.log_level, &cfg.server.log_format),
        Err(_) => init_tracing("info", "pretty"),
    }

    match command {
        cli::Commands::Start => {
            commands::start::execute(loaded?).await?;
        }
        cli::Commands::Test => {
            commands::test::execute(&args.config)?;
        }
        cli::Commands::Config { action } => match action {
            cli::ConfigCommands::Show => commands::config::show(&args.config)?,
        },
        cli::Commands::Search(search_args) => {
            commands::search::execute(&loaded?, search_args).await?;
        }
        cli::Commands::Version => {
            println!("Request Insights v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
