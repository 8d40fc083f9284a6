//! Search filters: raw query parameters, their typed form, and the predicate
//! built from them.

use super::page::{PageRequest, SearchCursor};
use crate::error::AppError;
use crate::models::{MonitoredRequest, RequestLog};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;

/// Query string as received. Every field is optional; empty strings count as
/// absent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub method: Option<String>,
    pub url: Option<String>,
    pub status: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub min_response_time: Option<String>,
    pub max_response_time: Option<String>,
    pub is_error: Option<String>,
    /// Page size
    pub limit: Option<String>,
    /// `nextCursor` of the previous page
    pub cursor: Option<String>,
}

/// Inclusive `createdAt` bounds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| at >= start) && self.end.map_or(true, |end| at <= end)
    }
}

/// Validated, typed filters. All present filters are ANDed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilters {
    /// Upper-cased
    pub method: Option<String>,
    pub url: Option<String>,
    pub status: Option<u16>,
    pub is_error: Option<bool>,
    pub created: DateRange,
    pub min_response_time: Option<u64>,
    pub max_response_time: Option<u64>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl TryFrom<SearchParams> for SearchFilters {
    type Error = AppError;

    fn try_from(params: SearchParams) -> Result<Self, Self::Error> {
        params.parse()
    }
}

impl SearchParams {
    pub fn parse(&self) -> Result<SearchFilters, AppError> {
        let status = present(&self.status)
            .map(|raw| {
                raw.parse::<u16>().map_err(|_| {
                    AppError::Validation(format!("status must be an integer, got '{}'", raw))
                })
            })
            .transpose()?;

        let is_error = present(&self.is_error)
            .map(|raw| match raw.to_ascii_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(AppError::Validation(format!(
                    "isError must be true or false, got '{}'",
                    raw
                ))),
            })
            .transpose()?;

        let start = present(&self.start_date)
            .map(|raw| parse_date(raw, "startDate", DateBound::Start))
            .transpose()?;
        let end = present(&self.end_date)
            .map(|raw| parse_date(raw, "endDate", DateBound::End))
            .transpose()?;
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(AppError::Validation(
                    "startDate must not be after endDate".to_string(),
                ));
            }
        }

        let min_response_time = present(&self.min_response_time)
            .map(|raw| parse_millis(raw, "minResponseTime"))
            .transpose()?;
        let max_response_time = present(&self.max_response_time)
            .map(|raw| parse_millis(raw, "maxResponseTime"))
            .transpose()?;
        if let (Some(min), Some(max)) = (min_response_time, max_response_time) {
            if min > max {
                return Err(AppError::Validation(
                    "minResponseTime must not exceed maxResponseTime".to_string(),
                ));
            }
        }

        Ok(SearchFilters {
            method: present(&self.method).map(|m| m.to_ascii_uppercase()),
            url: present(&self.url).map(str::to_string),
            status,
            is_error,
            created: DateRange { start, end },
            min_response_time,
            max_response_time,
        })
    }
}

impl SearchParams {
    pub fn page(&self) -> Result<PageRequest, AppError> {
        let limit = present(&self.limit)
            .map(|raw| match raw.parse::<usize>() {
                Ok(limit) if limit > 0 => Ok(limit),
                _ => Err(AppError::Validation(format!(
                    "limit must be a positive integer, got '{}'",
                    raw
                ))),
            })
            .transpose()?;
        let after = present(&self.cursor).map(SearchCursor::parse).transpose()?;

        Ok(PageRequest { limit, after })
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Clone, Copy)]
enum DateBound {
    Start,
    End,
}

/// RFC 3339, or `YYYY-MM-DD` covering the whole UTC day
fn parse_date(raw: &str, field: &str, bound: DateBound) -> Result<DateTime<Utc>, AppError> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }

    let day = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        AppError::Validation(format!(
            "{} must be an RFC 3339 timestamp or YYYY-MM-DD date, got '{}'",
            field, raw
        ))
    })?;
    let midnight = day.and_time(NaiveTime::MIN).and_utc();

    Ok(match bound {
        DateBound::Start => midnight,
        DateBound::End => midnight + Duration::days(1) - Duration::milliseconds(1),
    })
}

fn parse_millis(raw: &str, field: &str) -> Result<u64, AppError> {
    raw.parse::<u64>().map_err(|_| {
        AppError::Validation(format!(
            "{} must be a non-negative integer, got '{}'",
            field, raw
        ))
    })
}

type Clause<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Conjunction of clauses built from [`SearchFilters`].
///
/// Request-level clauses (`method`, `url`) apply to the monitored request a
/// log belongs to; log-level clauses apply to each log.
pub struct LogPredicate {
    request_clauses: Vec<Clause<MonitoredRequest>>,
    log_clauses: Vec<Clause<RequestLog>>,
}

impl LogPredicate {
    pub fn build(filters: &SearchFilters) -> Self {
        let mut request_clauses: Vec<Clause<MonitoredRequest>> = Vec::new();
        let mut log_clauses: Vec<Clause<RequestLog>> = Vec::new();

        if let Some(method) = filters.method.clone() {
            request_clauses.push(Box::new(move |r| r.method.to_ascii_uppercase() == method));
        }
        if let Some(url) = filters.url.clone() {
            request_clauses.push(Box::new(move |r| r.url.contains(url.as_str())));
        }

        if let Some(status) = filters.status {
            log_clauses.push(Box::new(move |l| l.status == status));
        }
        if let Some(is_error) = filters.is_error {
            log_clauses.push(Box::new(move |l| l.is_error == is_error));
        }
        if filters.created != DateRange::default() {
            let range = filters.created;
            log_clauses.push(Box::new(move |l| range.contains(l.created_at)));
        }
        if let Some(min) = filters.min_response_time {
            log_clauses.push(Box::new(move |l| l.response_time_ms >= min));
        }
        if let Some(max) = filters.max_response_time {
            log_clauses.push(Box::new(move |l| l.response_time_ms <= max));
        }

        Self {
            request_clauses,
            log_clauses,
        }
    }

    pub fn matches_request(&self, request: &MonitoredRequest) -> bool {
        self.request_clauses.iter().all(|clause| clause(request))
    }

    pub fn matches_log(&self, log: &RequestLog) -> bool {
        self.log_clauses.iter().all(|clause| clause(log))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn params() -> SearchParams {
        SearchParams::default()
    }

    fn log_at(status: u16, time: u64, created: DateTime<Utc>) -> RequestLog {
        RequestLog {
            id: "log".to_string(),
            request_id: "req".to_string(),
            insight_id: None,
            status,
            response_time_ms: time,
            response_size_kb: 0.0,
            is_error: status >= 400,
            response_body: None,
            headers: None,
            ip_address: None,
            user_agent: None,
            created_at: created,
        }
    }

    fn request(method: &str, url: &str) -> MonitoredRequest {
        MonitoredRequest {
            id: "req".to_string(),
            user_id: "user".to_string(),
            name: "endpoint".to_string(),
            method: method.to_string(),
            url: url.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_params_parse_to_no_filters() {
        let p = SearchParams {
            method: Some("".to_string()),
            status: Some("  ".to_string()),
            ..params()
        };
        let filters = p.parse().unwrap();
        assert!(filters.is_empty());
        assert!(LogPredicate::build(&filters).matches_log(&log_at(599, 0, Utc::now())));
    }

    #[test]
    fn test_malformed_values_are_validation_errors() {
        let cases = [
            SearchParams { status: Some("abc".to_string()), ..params() },
            SearchParams { is_error: Some("yes".to_string()), ..params() },
            SearchParams { start_date: Some("yesterday".to_string()), ..params() },
            SearchParams { end_date: Some("2024-13-01".to_string()), ..params() },
            SearchParams { min_response_time: Some("-5".to_string()), ..params() },
            SearchParams { max_response_time: Some("1.5".to_string()), ..params() },
        ];

        for case in cases {
            assert!(matches!(case.parse(), Err(AppError::Validation(_))), "{:?}", case);
        }
    }

    #[test]
    fn test_inverted_ranges_are_rejected() {
        let dates = SearchParams {
            start_date: Some("2024-05-02".to_string()),
            end_date: Some("2024-05-01".to_string()),
            ..params()
        };
        assert!(matches!(dates.parse(), Err(AppError::Validation(_))));

        let times = SearchParams {
            min_response_time: Some("500".to_string()),
            max_response_time: Some("100".to_string()),
            ..params()
        };
        assert!(matches!(times.parse(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_date_only_bounds_cover_whole_day() {
        let p = SearchParams {
            start_date: Some("2024-05-01".to_string()),
            end_date: Some("2024-05-01".to_string()),
            ..params()
        };
        let filters = p.parse().unwrap();

        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(filters.created.start, Some(start));
        assert!(filters.created.contains(Utc.with_ymd_and_hms(2024, 5, 1, 23, 59, 59).unwrap()));
        assert!(!filters.created.contains(Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap()));
        assert!(!filters.created.contains(Utc.with_ymd_and_hms(2024, 4, 30, 23, 59, 59).unwrap()));
    }

    #[test]
    fn test_rfc3339_dates_are_exact() {
        let p = SearchParams {
            start_date: Some("2024-05-01T10:00:00+02:00".to_string()),
            ..params()
        };
        let filters = p.parse().unwrap();
        assert_eq!(
            filters.created.start,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_request_clauses() {
        let p = SearchParams {
            method: Some("get".to_string()),
            url: Some("/users".to_string()),
            ..params()
        };
        let predicate = LogPredicate::build(&p.parse().unwrap());

        assert!(predicate.matches_request(&request("GET", "https://api.example.com/users/1")));
        assert!(predicate.matches_request(&request("get", "https://api.example.com/users")));
        assert!(!predicate.matches_request(&request("POST", "https://api.example.com/users")));
        assert!(!predicate.matches_request(&request("GET", "https://api.example.com/orders")));
    }

    #[test]
    fn test_log_clauses_are_anded() {
        let p = SearchParams {
            status: Some("404".to_string()),
            is_error: Some("true".to_string()),
            min_response_time: Some("100".to_string()),
            max_response_time: Some("200".to_string()),
            ..params()
        };
        let predicate = LogPredicate::build(&p.parse().unwrap());
        let now = Utc::now();

        assert!(predicate.matches_log(&log_at(404, 150, now)));
        assert!(predicate.matches_log(&log_at(404, 100, now)));
        assert!(predicate.matches_log(&log_at(404, 200, now)));
        assert!(!predicate.matches_log(&log_at(404, 201, now)));
        assert!(!predicate.matches_log(&log_at(500, 150, now)));

        let mut overridden = log_at(404, 150, now);
        overridden.is_error = false;
        assert!(!predicate.matches_log(&overridden));
    }

    #[test]
    fn test_page_parameters() {
        let page = params().page().unwrap();
        assert_eq!(page, PageRequest::default());

        let p = SearchParams {
            limit: Some("25".to_string()),
            cursor: Some("1700000000000:log-9".to_string()),
            ..params()
        };
        let page = p.page().unwrap();
        assert_eq!(page.limit, Some(25));
        assert_eq!(page.after.unwrap().id, "log-9");

        for limit in ["0", "-1", "ten"] {
            let p = SearchParams {
                limit: Some(limit.to_string()),
                ..params()
            };
            assert!(matches!(p.page(), Err(AppError::Validation(_))), "{}", limit);
        }
    }
}
