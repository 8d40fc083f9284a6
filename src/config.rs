use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// SQLite database path (default: "./data/insights.db")
    #[serde(default = "default_database_path")]
    pub path: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Which trigger seals aggregation windows. Only one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SealPolicy {
    /// Seal a key's window as soon as it holds `seal_threshold` logs
    Count,
    /// Seal every non-empty window each `seal_interval_seconds`
    Interval,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AggregationConfig {
    #[serde(default = "default_seal_policy")]
    pub seal_policy: SealPolicy,

    /// Logs per window under the count policy (default: 100)
    #[serde(default = "default_seal_threshold")]
    pub seal_threshold: u64,

    /// Window length under the interval policy (default: 300 = 5 minutes)
    #[serde(default = "default_seal_interval_seconds")]
    pub seal_interval_seconds: u64,

    /// Entries reported in mostCommonHeaders (default: 5)
    #[serde(default = "default_top_k_headers")]
    pub top_k_headers: usize,

    /// Distinct (name, value) pairs counted exactly; past this, counts are Space-Saving estimates (default: 50)
    #[serde(default = "default_max_tracked_headers")]
    pub max_tracked_headers: usize,

    /// Entries kept in recentOutputs (default: 5)
    #[serde(default = "default_recent_outputs_capacity")]
    pub recent_outputs_capacity: usize,

    /// Writer backlog that triggers a warning; the queue itself is unbounded (default: 10000)
    #[serde(default = "default_writer_queue_warn_depth")]
    pub writer_queue_warn_depth: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            seal_policy: default_seal_policy(),
            seal_threshold: default_seal_threshold(),
            seal_interval_seconds: default_seal_interval_seconds(),
            top_k_headers: default_top_k_headers(),
            max_tracked_headers: default_max_tracked_headers(),
            recent_outputs_capacity: default_recent_outputs_capacity(),
            writer_queue_warn_depth: default_writer_queue_warn_depth(),
        }
    }
}

/// Health score weights. See `insights::score` for the formula.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScoringConfig {
    #[serde(default = "default_error_weight")]
    pub error_weight: f64,

    #[serde(default = "default_latency_budget_ms")]
    pub latency_budget_ms: u64,

    #[serde(default = "default_latency_scale_ms")]
    pub latency_scale_ms: u64,

    #[serde(default = "default_tail_ceiling_ms")]
    pub tail_ceiling_ms: u64,

    #[serde(default = "default_tail_scale_ms")]
    pub tail_scale_ms: u64,

    #[serde(default = "default_tail_max_penalty")]
    pub tail_max_penalty: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            error_weight: default_error_weight(),
            latency_budget_ms: default_latency_budget_ms(),
            latency_scale_ms: default_latency_scale_ms(),
            tail_ceiling_ms: default_tail_ceiling_ms(),
            tail_scale_ms: default_tail_scale_ms(),
            tail_max_penalty: default_tail_max_penalty(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    /// Hard limit for a single search (default: 5000)
    #[serde(default = "default_search_timeout_ms")]
    pub timeout_ms: u64,

    /// Rows scanned between cancellation checks (default: 256)
    #[serde(default = "default_cancel_check_interval")]
    pub cancel_check_interval: usize,

    /// Results returned after ordering (default: 1000)
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_search_timeout_ms(),
            cancel_check_interval: default_cancel_check_interval(),
            max_results: default_max_results(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    /// Request log retention in days (default: 30)
    #[serde(default = "default_logs_days")]
    pub logs_days: u64,

    /// Insight retention in days (default: 90)
    #[serde(default = "default_insights_days")]
    pub insights_days: u64,

    /// Hour of day (UTC) to run cleanup (0-23, default: 3 for 3am)
    #[serde(default = "default_cleanup_hour")]
    pub cleanup_hour: u8,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            logs_days: default_logs_days(),
            insights_days: default_insights_days(),
            cleanup_hour: default_cleanup_hour(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_endpoint")]
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            endpoint: default_metrics_endpoint(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_database_path() -> String {
    "./data/insights.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_seal_policy() -> SealPolicy {
    SealPolicy::Count
}

fn default_seal_threshold() -> u64 {
    100
}

fn default_seal_interval_seconds() -> u64 {
    300
}

fn default_top_k_headers() -> usize {
    5
}

fn default_max_tracked_headers() -> usize {
    50
}

fn default_recent_outputs_capacity() -> usize {
    5
}

fn default_writer_queue_warn_depth() -> usize {
    10000
}

fn default_error_weight() -> f64 {
    1.0
}

fn default_latency_budget_ms() -> u64 {
    500
}

fn default_latency_scale_ms() -> u64 {
    20
}

fn default_tail_ceiling_ms() -> u64 {
    2000
}

fn default_tail_scale_ms() -> u64 {
    100
}

fn default_tail_max_penalty() -> f64 {
    20.0
}

fn default_search_timeout_ms() -> u64 {
    5000
}

fn default_cancel_check_interval() -> usize {
    256
}

fn default_max_results() -> usize {
    1000
}

fn default_logs_days() -> u64 {
    30
}

fn default_insights_days() -> u64 {
    90
}

fn default_cleanup_hour() -> u8 {
    3
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_endpoint() -> String {
    "/metrics".to_string()
}

/// Load `config.toml` from the working directory
pub fn load_config() -> anyhow::Result<Config> {
    load_config_from(Path::new("config.toml"))
}

/// Load a config file layered with `INSIGHTS__*` environment overrides.
/// A missing file is not an error; every section has defaults.
pub fn load_config_from(path: &Path) -> anyhow::Result<Config> {
    let config = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(config::Environment::with_prefix("INSIGHTS").separator("__"))
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

pub fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    match cfg.server.log_format.as_str() {
        "pretty" | "json" => {}
        other => anyhow::bail!("Invalid log_format '{}': expected 'pretty' or 'json'", other),
    }

    if cfg.database.max_connections == 0 {
        anyhow::bail!("database.max_connections must be >= 1");
    }

    let agg = &cfg.aggregation;
    if agg.seal_threshold == 0 {
        anyhow::bail!("aggregation.seal_threshold must be >= 1");
    }
    if agg.seal_interval_seconds == 0 {
        anyhow::bail!("aggregation.seal_interval_seconds must be >= 1");
    }
    if agg.top_k_headers == 0 {
        anyhow::bail!("aggregation.top_k_headers must be >= 1");
    }
    if agg.max_tracked_headers <= agg.top_k_headers {
        anyhow::bail!(
            "aggregation.max_tracked_headers ({}) must be > top_k_headers ({})",
            agg.max_tracked_headers,
            agg.top_k_headers
        );
    }
    if agg.recent_outputs_capacity == 0 {
        anyhow::bail!("aggregation.recent_outputs_capacity must be >= 1");
    }
    if agg.writer_queue_warn_depth == 0 {
        anyhow::bail!("aggregation.writer_queue_warn_depth must be >= 1");
    }

    let scoring = &cfg.scoring;
    if !scoring.error_weight.is_finite() || scoring.error_weight < 0.0 {
        anyhow::bail!("scoring.error_weight must be a non-negative number");
    }
    if !scoring.tail_max_penalty.is_finite() || scoring.tail_max_penalty < 0.0 {
        anyhow::bail!("scoring.tail_max_penalty must be a non-negative number");
    }
    if scoring.latency_scale_ms == 0 || scoring.tail_scale_ms == 0 {
        anyhow::bail!("scoring scale values must be >= 1");
    }
    if scoring.tail_ceiling_ms < scoring.latency_budget_ms {
        anyhow::bail!("scoring.tail_ceiling_ms must be >= latency_budget_ms");
    }

    if cfg.search.timeout_ms == 0 {
        anyhow::bail!("search.timeout_ms must be >= 1");
    }
    if cfg.search.cancel_check_interval == 0 {
        anyhow::bail!("search.cancel_check_interval must be >= 1");
    }
    if cfg.search.max_results == 0 {
        anyhow::bail!("search.max_results must be >= 1");
    }

    if cfg.retention.cleanup_hour > 23 {
        anyhow::bail!("retention.cleanup_hour must be between 0 and 23");
    }
    // an insight may only expire once the logs it links to can
    if cfg.retention.insights_days < cfg.retention.logs_days {
        anyhow::bail!(
            "retention.insights_days ({}) must be >= logs_days ({})",
            cfg.retention.insights_days,
            cfg.retention.logs_days
        );
    }

    Ok(())
}
