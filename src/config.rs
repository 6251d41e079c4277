//! Hub configuration.
//!
//! Runtime knobs come from environment variables with a `CROSSBAR_`
//! prefix; the backend roster comes from a JSON file. CLI flags in main
//! override the listen addresses.

use std::path::Path;
use std::time::Duration;

use tracing::warn;

use crate::backend::http::BackendSpec;
use crate::error::CrossbarError;

/// Configuration for the hub server.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Client-facing listen address
    pub listen_addr: String,
    /// Admin listen address (`/health`, `/ready`, `/stats`)
    pub admin_addr: String,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
    /// Timeout on a forwarded backend call
    pub request_timeout: Duration,
    /// Connection drain timeout during shutdown
    pub drain_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7410".to_string(),
            admin_addr: "127.0.0.1:7411".to_string(),
            max_body_size: 1024 * 1024, // 1MB
            request_timeout: Duration::from_secs(300),
            drain_timeout: Duration::from_secs(25),
        }
    }
}

impl HubConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `CROSSBAR_LISTEN` (default: "127.0.0.1:7410")
    /// - `CROSSBAR_ADMIN_LISTEN` (default: "127.0.0.1:7411")
    /// - `CROSSBAR_MAX_REQUEST_BODY_BYTES` (default: 1048576)
    /// - `CROSSBAR_REQUEST_TIMEOUT_SECS` (default: 300)
    /// - `CROSSBAR_DRAIN_TIMEOUT_SECS` (default: 25)
    #[must_use]
    pub fn from_env() -> Self {
        let default = Self::default();

        let listen_addr =
            std::env::var("CROSSBAR_LISTEN").unwrap_or_else(|_| default.listen_addr.clone());
        let admin_addr =
            std::env::var("CROSSBAR_ADMIN_LISTEN").unwrap_or_else(|_| default.admin_addr.clone());

        let max_body_size = std::env::var("CROSSBAR_MAX_REQUEST_BODY_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default.max_body_size);

        let request_timeout = parse_duration_env(
            "CROSSBAR_REQUEST_TIMEOUT_SECS",
            default.request_timeout,
        );
        let drain_timeout =
            parse_duration_env("CROSSBAR_DRAIN_TIMEOUT_SECS", default.drain_timeout);

        Self {
            listen_addr,
            admin_addr,
            max_body_size,
            request_timeout,
            drain_timeout,
        }
    }
}

/// Parse a duration environment variable, warning on invalid values.
fn parse_duration_env(var_name: &str, default: Duration) -> Duration {
    match std::env::var(var_name) {
        Ok(value) => match value.parse::<u64>() {
            Ok(secs) => Duration::from_secs(secs),
            Err(_) => {
                warn!(
                    var = var_name,
                    value = %value,
                    default_secs = default.as_secs(),
                    "invalid value for environment variable, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

/// Load the backend roster from a JSON file.
///
/// # Errors
///
/// Returns `ServiceUnavailable` if the file cannot be read or parsed; a
/// hub with no valid roster has nothing to aggregate.
pub fn load_roster(path: &Path) -> Result<Vec<BackendSpec>, CrossbarError> {
    let raw = std::fs::read(path).map_err(|e| CrossbarError::ServiceUnavailable {
        reason: format!("cannot read backend roster {}: {}", path.display(), e),
    })?;
    serde_json::from_slice(&raw).map_err(|e| CrossbarError::ServiceUnavailable {
        reason: format!("cannot parse backend roster {}: {}", path.display(), e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HubConfig::default();
        assert_eq!(config.listen_addr, "127.0.0.1:7410");
        assert_eq!(config.max_body_size, 1024 * 1024);
        assert_eq!(config.request_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_invalid_duration_falls_back() {
        // SAFETY: test-local variable name; no other test reads it.
        unsafe {
            std::env::set_var("CROSSBAR_TEST_BOGUS_SECS", "not-a-number");
        }
        let parsed = parse_duration_env("CROSSBAR_TEST_BOGUS_SECS", Duration::from_secs(42));
        assert_eq!(parsed, Duration::from_secs(42));
        unsafe {
            std::env::remove_var("CROSSBAR_TEST_BOGUS_SECS");
        }
    }

    #[test]
    fn test_roster_parse() {
        let dir = std::env::temp_dir();
        let path = dir.join("crossbar_test_roster.json");
        std::fs::write(
            &path,
            r#"[
                {"name": "files", "url": "http://localhost:9001"},
                {"name": "search", "url": "http://localhost:9002", "prefix": "web", "disabled": true}
            ]"#,
        )
        .unwrap();

        let roster = load_roster(&path).expect("parses");
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].name, "files");
        assert!(roster[1].disabled);
        assert_eq!(roster[1].prefix.as_deref(), Some("web"));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_roster_missing_file() {
        let result = load_roster(Path::new("/nonexistent/roster.json"));
        assert!(matches!(
            result,
            Err(CrossbarError::ServiceUnavailable { .. })
        ));
    }
}
