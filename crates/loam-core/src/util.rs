//! Small helpers shared by config, auth and the remote client.

/// Trim optional text, treating blank values as absent.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Whether `value` is an absolute `http`/`https` URL with a host, usable as
/// a remote or refresh endpoint.
pub fn is_endpoint_url(value: &str) -> bool {
    reqwest::Url::parse(value.trim()).is_ok_and(|url| {
        matches!(url.scheme(), "http" | "https")
            && url.host_str().is_some_and(|host| !host.is_empty())
    })
}

const ERROR_TEXT_LIMIT: usize = 180;

/// Trimmed prefix of a remote error body, short enough for a log line.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(ERROR_TEXT_LIMIT).collect()
}

/// Current Unix timestamp in milliseconds.
pub fn unix_millis_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_option_trims_or_drops() {
        assert_eq!(
            normalize_text_option(Some(" owner-1\n".to_string())),
            Some("owner-1".to_string())
        );
    }

    #[test]
    fn endpoint_url_needs_scheme_and_host() {
        assert!(is_endpoint_url("http://127.0.0.1:8080"));
        assert!(is_endpoint_url(" https://sync.example.com/api/ "));
        assert!(!is_endpoint_url("ftp://example.com"));
        assert!(!is_endpoint_url("example.com"));
        assert!(!is_endpoint_url("https://"));
        assert!(!is_endpoint_url("mailto:ops@example.com"));
    }

    #[test]
    fn compact_text_truncates_long_bodies() {
        let long = "x".repeat(500);
        assert_eq!(compact_text(&long).len(), ERROR_TEXT_LIMIT);
        assert_eq!(compact_text("  short  "), "short");
    }
}
