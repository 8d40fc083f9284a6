use crate::cli::SearchArgs;
use anyhow::Result;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use request_insights::{
    config::Config,
    models::RequestLog,
    observability::{self, LogRepository},
    search::{SearchContext, SearchParams, SearchQueryEngine},
};
use std::sync::Arc;
use std::time::Duration;

/// Execute the search command against the configured database
pub async fn execute(cfg: &Config, args: SearchArgs) -> Result<()> {
    let params = params_from(&args);
    let filters = params.parse()?;
    let page = params.page()?;

    let pool = observability::connect(&cfg.database).await?;
    let repo = LogRepository::new(pool);
    let engine = SearchQueryEngine::new(
        Arc::new(repo),
        cfg.search.max_results,
        cfg.search.cancel_check_interval,
    );

    let ctx = SearchContext::with_timeout(Duration::from_millis(cfg.search.timeout_ms));
    let result = engine.search(&ctx, &args.user, &filters, &page).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if result.logs.is_empty() {
        println!("{}", "No matching logs".yellow());
        return Ok(());
    }

    println!("{}", render_table(&result.logs));
    println!("{} {}", result.logs.len().to_string().bold(), "logs".dimmed());
    if let Some(cursor) = &result.next_cursor {
        println!("{} --cursor '{}'", "More results:".dimmed(), cursor);
    }

    Ok(())
}

fn params_from(args: &SearchArgs) -> SearchParams {
    SearchParams {
        method: args.method.clone(),
        url: args.url.clone(),
        status: args.status.clone(),
        start_date: args.start_date.clone(),
        end_date: args.end_date.clone(),
        min_response_time: args.min_response_time.clone(),
        max_response_time: args.max_response_time.clone(),
        is_error: args.is_error.clone(),
        limit: args.limit.clone(),
        cursor: args.cursor.clone(),
    }
}

fn render_table(logs: &[RequestLog]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("CREATED").fg(Color::Cyan),
        Cell::new("REQUEST").fg(Color::Cyan),
        Cell::new("STATUS").fg(Color::Cyan),
        Cell::new("TIME (ms)").fg(Color::Cyan),
        Cell::new("SIZE (KB)").fg(Color::Cyan),
        Cell::new("INSIGHT").fg(Color::Cyan),
    ]);

    for log in logs {
        let status = if log.is_error {
            Cell::new(log.status).fg(Color::Red)
        } else {
            Cell::new(log.status).fg(Color::Green)
        };

        table.add_row(vec![
            Cell::new(log.created_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(&log.request_id),
            status,
            Cell::new(log.response_time_ms),
            Cell::new(format!("{:.2}", log.response_size_kb)),
            Cell::new(log.insight_id.as_deref().unwrap_or("-")),
        ]);
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_from_args() {
        let args = SearchArgs {
            user: "alice".to_string(),
            method: Some("post".to_string()),
            is_error: Some("true".to_string()),
            ..Default::default()
        };

        let filters = params_from(&args).parse().unwrap();
        assert_eq!(filters.method.as_deref(), Some("POST"));
        assert_eq!(filters.is_error, Some(true));
        assert!(filters.status.is_none());

        let paged = SearchArgs {
            limit: Some("10".to_string()),
            ..args
        };
        assert_eq!(params_from(&paged).page().unwrap().limit, Some(10));
    }
}
