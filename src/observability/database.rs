//! SQLite storage for request logs, monitored requests and sealed insights
//!
//! - WAL journal so searches read while the writer inserts
//! - Schema managed by `sqlx::migrate!`
//! - Timestamps stored as Unix milliseconds, JSON columns as TEXT

use crate::config::DatabaseConfig;
use crate::error::AppError;
use crate::models::{Insight, MonitoredRequest, RequestLog, SealedWindow};
use crate::search::{LogScan, LogSource};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Open (creating if needed) the database file and bring the schema up to date
pub async fn connect(cfg: &DatabaseConfig) -> anyhow::Result<SqlitePool> {
    if let Some(parent) = Path::new(&cfg.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", cfg.path))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(30))
        .pragma("synchronous", "NORMAL")
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(cfg.max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(options)
        .await
        .context("Failed to connect to insights database")?;

    run_migrations(&pool).await?;

    Ok(pool)
}

pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to run database migrations")?;

    tracing::info!("Database migrations completed");
    Ok(())
}

/// A dashboard user as stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUser {
    pub id: String,
    pub email: String,
    pub is_verified: bool,
}

/// Typed access to the insights schema
#[derive(Clone)]
pub struct LogRepository {
    pool: SqlitePool,
}

impl LogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn insert_user(
        &self,
        id: &str,
        email: &str,
        api_key_hash: &str,
        is_verified: bool,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO users (id, email, api_key_hash, is_verified, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(email)
        .bind(api_key_hash)
        .bind(is_verified)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_request(&self, request: &MonitoredRequest) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO requests (id, user_id, name, method, url, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.id)
        .bind(&request.user_id)
        .bind(&request.name)
        .bind(&request.method)
        .bind(&request.url)
        .bind(request.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_log(&self, log: &RequestLog) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO request_logs (
                id, request_id, insight_id, status, response_time_ms, response_size_kb,
                is_error, response_body, headers, ip_address, user_agent, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )
        .bind(&log.id)
        .bind(&log.request_id)
        .bind(&log.insight_id)
        .bind(i64::from(log.status))
        .bind(to_i64(log.response_time_ms))
        .bind(log.response_size_kb)
        .bind(log.is_error)
        .bind(log.response_body.as_ref().map(|v| v.to_string()))
        .bind(log.headers.as_ref().map(|v| v.to_string()))
        .bind(&log.ip_address)
        .bind(&log.user_agent)
        .bind(log.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_insight(&self, insight: &Insight) -> Result<(), AppError> {
        let mut conn = self.pool.acquire().await?;
        insert_insight_on(&mut *conn, insight).await
    }

    /// Link logs to an insight. Logs that already carry an insight id are
    /// left alone; returns how many rows were stamped.
    pub async fn stamp_logs(&self, insight_id: &str, log_ids: &[String]) -> Result<u64, AppError> {
        let mut tx = self.pool.begin().await?;
        let stamped = stamp_logs_on(&mut *tx, insight_id, log_ids).await?;
        tx.commit().await?;
        Ok(stamped)
    }

    /// Insert a sealed insight and stamp its logs in one transaction
    pub async fn persist_window(&self, window: &SealedWindow) -> Result<u64, AppError> {
        let mut tx = self.pool.begin().await?;
        insert_insight_on(&mut *tx, &window.insight).await?;
        let stamped = stamp_logs_on(&mut *tx, &window.insight.id, &window.log_ids).await?;
        tx.commit().await?;
        Ok(stamped)
    }

    pub async fn requests_owned_by(&self, user_id: &str) -> Result<Vec<MonitoredRequest>, AppError> {
        let rows = sqlx::query(
            "SELECT id, user_id, name, method, url, created_at
             FROM requests
             WHERE user_id = ?
             ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(request_from_row).collect()
    }

    /// Logs for the given requests matching the scan's log-level filters,
    /// newest first. Filters, cursor and limit all run in SQL.
    pub async fn logs_for_requests(
        &self,
        request_ids: &[String],
        scan: &LogScan,
    ) -> Result<Vec<RequestLog>, AppError> {
        if request_ids.is_empty() || scan.limit == 0 {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; request_ids.len()].join(", ");
        let mut sql = format!(
            "SELECT id, request_id, insight_id, status, response_time_ms, response_size_kb,
                    is_error, response_body, headers, ip_address, user_agent, created_at
             FROM request_logs
             WHERE request_id IN ({})",
            placeholders
        );

        let filters = &scan.filters;
        let mut binds: Vec<i64> = Vec::new();
        if let Some(status) = filters.status {
            sql.push_str(" AND status = ?");
            binds.push(i64::from(status));
        }
        if let Some(is_error) = filters.is_error {
            sql.push_str(" AND is_error = ?");
            binds.push(i64::from(is_error));
        }
        if let Some(start) = filters.created.start {
            sql.push_str(" AND created_at >= ?");
            binds.push(ceil_millis(start));
        }
        if let Some(end) = filters.created.end {
            sql.push_str(" AND created_at <= ?");
            binds.push(end.timestamp_millis());
        }
        if let Some(min) = filters.min_response_time {
            sql.push_str(" AND response_time_ms >= ?");
            binds.push(to_i64(min));
        }
        if let Some(max) = filters.max_response_time {
            sql.push_str(" AND response_time_ms <= ?");
            binds.push(to_i64(max));
        }
        if scan.after.is_some() {
            sql.push_str(" AND (created_at < ? OR (created_at = ? AND id < ?))");
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ?");

        let mut query = sqlx::query(&sql);
        for id in request_ids {
            query = query.bind(id);
        }
        for value in binds {
            query = query.bind(value);
        }
        if let Some(after) = &scan.after {
            let millis = after.created_at.timestamp_millis();
            query = query.bind(millis).bind(millis).bind(&after.id);
        }
        query = query.bind(i64::try_from(scan.limit).unwrap_or(i64::MAX));

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(log_from_row).collect()
    }

    pub async fn log_by_id(&self, id: &str) -> Result<Option<RequestLog>, AppError> {
        let row = sqlx::query(
            "SELECT id, request_id, insight_id, status, response_time_ms, response_size_kb,
                    is_error, response_body, headers, ip_address, user_agent, created_at
             FROM request_logs
             WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(log_from_row).transpose()
    }

    /// Sealed insights for a request, newest first
    pub async fn insights_for_request(&self, request_id: &str) -> Result<Vec<Insight>, AppError> {
        let rows = sqlx::query(
            "SELECT id, request_id, avg_response_time, error_rate, slowest_response,
                    avg_payload_size_kb, status_code_distribution, most_common_headers,
                    recent_outputs, score, created_at, updated_at
             FROM insights
             WHERE request_id = ?
             ORDER BY created_at DESC",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(insight_from_row).collect()
    }

    /// Owning user id, `None` if the request does not exist
    pub async fn request_owner(&self, request_id: &str) -> Result<Option<String>, AppError> {
        let owner: Option<String> = sqlx::query_scalar("SELECT user_id FROM requests WHERE id = ?")
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(owner)
    }

    pub async fn find_user_by_token_hash(&self, hash: &str) -> Result<Option<StoredUser>, AppError> {
        let row = sqlx::query("SELECT id, email, is_verified FROM users WHERE api_key_hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| StoredUser {
            id: row.get("id"),
            email: row.get("email"),
            is_verified: row.get("is_verified"),
        }))
    }

    pub async fn delete_logs_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM request_logs WHERE created_at < ?")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Delete expired insights. An insight still linked from a stored log is
    /// kept until that log expires, so a log's insight id never changes.
    pub async fn delete_insights_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query(
            "DELETE FROM insights
             WHERE created_at < ?
               AND NOT EXISTS (SELECT 1 FROM request_logs WHERE request_logs.insight_id = insights.id)",
        )
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl LogSource for LogRepository {
    async fn requests_owned_by(&self, user_id: &str) -> Result<Vec<MonitoredRequest>, AppError> {
        LogRepository::requests_owned_by(self, user_id).await
    }

    async fn logs_for_requests(
        &self,
        request_ids: &[String],
        scan: &LogScan,
    ) -> Result<Vec<RequestLog>, AppError> {
        LogRepository::logs_for_requests(self, request_ids, scan).await
    }
}

async fn insert_insight_on(conn: &mut SqliteConnection, insight: &Insight) -> Result<(), AppError> {
    let distribution = serde_json::to_string(&insight.status_code_distribution)?;
    let headers = insight
        .most_common_headers
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let recent = insight
        .recent_outputs
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        "INSERT INTO insights (
            id, request_id, avg_response_time, error_rate, slowest_response,
            avg_payload_size_kb, status_code_distribution, most_common_headers,
            recent_outputs, score, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
    )
    .bind(&insight.id)
    .bind(&insight.request_id)
    .bind(to_i64(insight.avg_response_time))
    .bind(insight.error_rate)
    .bind(to_i64(insight.slowest_response))
    .bind(insight.avg_payload_size_kb)
    .bind(distribution)
    .bind(headers)
    .bind(recent)
    .bind(i64::from(insight.score))
    .bind(insight.created_at.timestamp_millis())
    .bind(insight.updated_at.timestamp_millis())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn stamp_logs_on(
    conn: &mut SqliteConnection,
    insight_id: &str,
    log_ids: &[String],
) -> Result<u64, AppError> {
    let mut stamped = 0;
    for log_id in log_ids {
        let result =
            sqlx::query("UPDATE request_logs SET insight_id = ? WHERE id = ? AND insight_id IS NULL")
                .bind(insight_id)
                .bind(log_id)
                .execute(&mut *conn)
                .await?;
        stamped += result.rows_affected();
    }
    Ok(stamped)
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Smallest stored millisecond that is not before `at`
fn ceil_millis(at: DateTime<Utc>) -> i64 {
    let millis = at.timestamp_millis();
    if at.timestamp_subsec_nanos() % 1_000_000 == 0 {
        millis
    } else {
        millis.saturating_add(1)
    }
}

fn timestamp(ms: i64) -> Result<DateTime<Utc>, AppError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| AppError::Internal(format!("Invalid stored timestamp {}", ms)))
}

fn json_column<T: DeserializeOwned>(raw: Option<String>) -> Result<Option<T>, AppError> {
    raw.map(|text| serde_json::from_str(&text)).transpose().map_err(AppError::from)
}

fn request_from_row(row: &SqliteRow) -> Result<MonitoredRequest, AppError> {
    Ok(MonitoredRequest {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        method: row.try_get("method")?,
        url: row.try_get("url")?,
        created_at: timestamp(row.try_get("created_at")?)?,
    })
}

fn log_from_row(row: &SqliteRow) -> Result<RequestLog, AppError> {
    let status: i64 = row.try_get("status")?;
    let response_time_ms: i64 = row.try_get("response_time_ms")?;

    Ok(RequestLog {
        id: row.try_get("id")?,
        request_id: row.try_get("request_id")?,
        insight_id: row.try_get("insight_id")?,
        status: u16::try_from(status)
            .map_err(|_| AppError::Internal(format!("Invalid stored status {}", status)))?,
        response_time_ms: u64::try_from(response_time_ms).unwrap_or(0),
        response_size_kb: row.try_get("response_size_kb")?,
        is_error: row.try_get("is_error")?,
        response_body: json_column(row.try_get("response_body")?)?,
        headers: json_column(row.try_get("headers")?)?,
        ip_address: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
        created_at: timestamp(row.try_get("created_at")?)?,
    })
}

fn insight_from_row(row: &SqliteRow) -> Result<Insight, AppError> {
    let avg: i64 = row.try_get("avg_response_time")?;
    let slowest: i64 = row.try_get("slowest_response")?;
    let score: i64 = row.try_get("score")?;
    let distribution: String = row.try_get("status_code_distribution")?;

    Ok(Insight {
        id: row.try_get("id")?,
        request_id: row.try_get("request_id")?,
        avg_response_time: u64::try_from(avg).unwrap_or(0),
        error_rate: row.try_get("error_rate")?,
        slowest_response: u64::try_from(slowest).unwrap_or(0),
        avg_payload_size_kb: row.try_get("avg_payload_size_kb")?,
        status_code_distribution: serde_json::from_str(&distribution)?,
        most_common_headers: json_column(row.try_get("most_common_headers")?)?,
        recent_outputs: json_column(row.try_get("recent_outputs")?)?,
        score: u8::try_from(score.clamp(0, 100)).unwrap_or(0),
        created_at: timestamp(row.try_get("created_at")?)?,
        updated_at: timestamp(row.try_get("updated_at")?)?,
    })
}
