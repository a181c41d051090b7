use std::time::Duration;

use crate::sustainer::BackoffConfig;

const DEFAULT_LOG_FILTER: &str = "info,endpoint_session=debug";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub log_filter: String,
    pub backoff: BackoffConfig,
    /// `None` waits for the OS connect timeout.
    pub connect_timeout: Option<Duration>,
    pub token_url: Option<String>,
    pub token_bearer: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.into(),
            backoff: BackoffConfig::default(),
            connect_timeout: Some(Duration::from_secs(10)),
            token_url: None,
            token_bearer: None,
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup; unset or unparseable
    /// values fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let millis = |key: &str| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
        };

        let log_filter = lookup("RUST_LOG").unwrap_or(defaults.log_filter);
        let backoff = BackoffConfig {
            initial_delay: millis("ENDPOINT_SESSION_BACKOFF_INITIAL_MS")
                .unwrap_or(defaults.backoff.initial_delay),
            max_delay: millis("ENDPOINT_SESSION_BACKOFF_MAX_MS")
                .unwrap_or(defaults.backoff.max_delay),
            max_attempts: lookup("ENDPOINT_SESSION_BACKOFF_MAX_ATTEMPTS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.backoff.max_attempts),
        };
        // 0 disables the timeout.
        let connect_timeout = match millis("ENDPOINT_SESSION_CONNECT_TIMEOUT_MS") {
            Some(timeout) if timeout.is_zero() => None,
            Some(timeout) => Some(timeout),
            None => defaults.connect_timeout,
        };
        let token_url = lookup("ENDPOINT_SESSION_TOKEN_URL").filter(|v| !v.is_empty());
        let token_bearer = lookup("ENDPOINT_SESSION_TOKEN_BEARER").filter(|v| !v.is_empty());

        Self {
            log_filter,
            backoff,
            connect_timeout,
            token_url,
            token_bearer,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> SessionConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SessionConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        assert_eq!(config(&[]), SessionConfig::default());
    }

    #[test]
    fn reads_backoff_and_token_settings() {
        let cfg = config(&[
            ("RUST_LOG", "warn"),
            ("ENDPOINT_SESSION_BACKOFF_INITIAL_MS", "50"),
            ("ENDPOINT_SESSION_BACKOFF_MAX_MS", "5000"),
            ("ENDPOINT_SESSION_BACKOFF_MAX_ATTEMPTS", "7"),
            ("ENDPOINT_SESSION_CONNECT_TIMEOUT_MS", "1500"),
            ("ENDPOINT_SESSION_TOKEN_URL", "http://auth.local/token"),
        ]);
        assert_eq!(cfg.log_filter, "warn");
        assert_eq!(cfg.backoff.initial_delay, Duration::from_millis(50));
        assert_eq!(cfg.backoff.max_delay, Duration::from_secs(5));
        assert_eq!(cfg.backoff.max_attempts, 7);
        assert_eq!(cfg.connect_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(cfg.token_url.as_deref(), Some("http://auth.local/token"));
        assert_eq!(cfg.token_bearer, None);
    }

    #[test]
    fn invalid_values_fall_back_and_zero_timeout_disables() {
        let cfg = config(&[
            ("ENDPOINT_SESSION_BACKOFF_INITIAL_MS", "soon"),
            ("ENDPOINT_SESSION_CONNECT_TIMEOUT_MS", "0"),
            ("ENDPOINT_SESSION_TOKEN_URL", ""),
        ]);
        assert_eq!(cfg.backoff.initial_delay, BackoffConfig::default().initial_delay);
        assert_eq!(cfg.connect_timeout, None);
        assert_eq!(cfg.token_url, None);
    }
}
