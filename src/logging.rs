//! Safe logging helpers
//!
//! Header values observed on monitored calls end up in `mostCommonHeaders`
//! and in log lines, so credentials must be masked before either sees them.

use std::fmt;

/// Header names whose values are always masked
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "api-key",
    "x-auth-token",
];

/// Value prefixes that look like credentials regardless of header name
const SENSITIVE_PREFIXES: &[&str] = &[
    "sk-ant-",
    "sk-",
    "pk-",
    "sess-",
    "acct-",
    "Bearer ",
    "Basic ",
];

/// Masked representation of a secret
///
/// Shows the first 8 characters followed by `***`, or only `***` when the
/// value is too short to reveal anything safely.
#[derive(Clone, Debug)]
pub struct SensitiveValue<'a> {
    inner: &'a str,
}

impl<'a> SensitiveValue<'a> {
    /// # Example
    /// ```
    /// use request_insights::logging::SensitiveValue;
    ///
    /// let masked = SensitiveValue::new("Bearer abcdef123456");
    /// assert_eq!(masked.to_string(), "Bearer a***");
    /// ```
    pub fn new(value: &'a str) -> Self {
        Self { inner: value }
    }
}

impl<'a> fmt::Display for SensitiveValue<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.char_indices().nth(8) {
            Some((end, _)) => write!(f, "{}***", &self.inner[..end]),
            // 8 characters or fewer: mask everything
            None => write!(f, "***"),
        }
    }
}

/// Whether a header's value must never be stored in clear
pub fn is_sensitive_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SENSITIVE_HEADERS.contains(&lower.as_str())
}

/// Whether a value looks like a credential (`sk-…`, `Bearer …`)
pub fn is_sensitive_value(value: &str) -> bool {
    SENSITIVE_PREFIXES.iter().any(|prefix| value.starts_with(prefix))
}

/// Mask a header value when its name or shape marks it as a credential
///
/// ```
/// use request_insights::logging::sanitize_header_value;
///
/// assert_eq!(sanitize_header_value("authorization", "Bearer abcdef123456"), "Bearer a***");
/// assert_eq!(sanitize_header_value("content-type", "application/json"), "application/json");
/// ```
pub fn sanitize_header_value(name: &str, value: &str) -> String {
    if is_sensitive_header(name) || is_sensitive_value(value) {
        SensitiveValue::new(value).to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensitive_value_display() {
        let masked = SensitiveValue::new("sk-ant-api123-abcdef123456");
        assert_eq!(format!("{}", masked), "sk-ant-a***");
    }

    #[test]
    fn test_sensitive_value_short() {
        assert_eq!(SensitiveValue::new("sk-abc").to_string(), "***");
        assert_eq!(SensitiveValue::new("12345678").to_string(), "***");
    }

    #[test]
    fn test_sensitive_value_multibyte() {
        // must not split a UTF-8 code point
        let masked = SensitiveValue::new("ééééééééééé");
        assert_eq!(masked.to_string(), "éééééééé***");
    }

    #[test]
    fn test_is_sensitive_header() {
        assert!(is_sensitive_header("Authorization"));
        assert!(is_sensitive_header("cookie"));
        assert!(is_sensitive_header("X-API-Key"));

        assert!(!is_sensitive_header("content-type"));
        assert!(!is_sensitive_header("user-agent"));
    }

    #[test]
    fn test_sanitize_header_value() {
        assert_eq!(sanitize_header_value("cookie", "session=abcdef123456"), "session=***");
        assert_eq!(sanitize_header_value("x-forwarded-key", "sk-openai123"), "sk-opena***");
        assert_eq!(sanitize_header_value("accept", "*/*"), "*/*");
    }
}
