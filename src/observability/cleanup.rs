//! Background retention cleanup
//!
//! Deletes request logs and insights older than their configured TTL once a
//! day, at the configured UTC hour.

use super::database::LogRepository;
use crate::config::RetentionConfig;
use crate::error::AppError;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc};
use std::time::Duration;
use tokio::time;

/// Rows removed by one cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub logs_deleted: u64,
    pub insights_deleted: u64,
}

/// Cleanup configuration
#[derive(Debug, Clone, Copy)]
pub struct CleanupConfig {
    pub logs_days: u64,
    pub insights_days: u64,
    /// Hour of day (UTC) to run cleanup (0-23)
    pub cleanup_hour: u32,
    /// How often to check whether it is cleanup time
    pub check_interval: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self::from(&RetentionConfig::default())
    }
}

impl From<&RetentionConfig> for CleanupConfig {
    fn from(cfg: &RetentionConfig) -> Self {
        Self {
            logs_days: cfg.logs_days,
            insights_days: cfg.insights_days,
            cleanup_hour: u32::from(cfg.cleanup_hour),
            check_interval: Duration::from_secs(3600),
        }
    }
}

pub fn spawn_cleanup_task(repo: LogRepository, config: CleanupConfig) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        cleanup_loop(repo, config).await;
    })
}

async fn cleanup_loop(repo: LogRepository, config: CleanupConfig) {
    let mut interval = time::interval(config.check_interval);
    let mut last_cleanup_day: Option<u32> = None;

    loop {
        interval.tick().await;

        let now = Utc::now();
        let current_day = now.ordinal();

        if now.hour() == config.cleanup_hour && Some(current_day) != last_cleanup_day {
            tracing::info!(cleanup_hour = config.cleanup_hour, "Starting scheduled cleanup");

            match run_cleanup(&repo, &config, now).await {
                Ok(_) => last_cleanup_day = Some(current_day),
                Err(e) => tracing::error!(error = %e, "Cleanup failed"),
            }
        }
    }
}

/// Run one cleanup pass relative to `now`
pub async fn run_cleanup(
    repo: &LogRepository,
    config: &CleanupConfig,
    now: DateTime<Utc>,
) -> Result<CleanupStats, AppError> {
    let logs_cutoff = now - days(config.logs_days);
    let insights_cutoff = now - days(config.insights_days);

    let stats = CleanupStats {
        logs_deleted: repo.delete_logs_before(logs_cutoff).await?,
        insights_deleted: repo.delete_insights_before(insights_cutoff).await?,
    };

    tracing::info!(
        logs_deleted = stats.logs_deleted,
        insights_deleted = stats.insights_deleted,
        "Cleanup completed"
    );

    Ok(stats)
}

fn days(n: u64) -> ChronoDuration {
    // capped at ~1000 years
    ChronoDuration::days(n.min(365_000) as i64)
}
