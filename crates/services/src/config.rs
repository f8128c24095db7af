use std::env;
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;
use crate::notifications::CoordinatorConfig;

pub const DEFAULT_DB_URL: &str = "sqlite://lms-client.sqlite3";

/// Connection settings for the remote LMS API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_base_url: String,
    /// Push endpoint; `None` runs notifications in polling-only mode.
    pub ws_url: Option<String>,
    pub api_token: Option<String>,
    pub db_url: String,
    pub poll_interval: Duration,
}

impl ClientConfig {
    /// Read configuration from `LMS_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`ClientConfig::from_env`] with an injectable variable source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value is malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let api_base_url =
            non_empty("LMS_API_BASE_URL").ok_or(ConfigError::Missing("LMS_API_BASE_URL"))?;
        let ws_url = non_empty("LMS_WS_URL");
        let api_token = non_empty("LMS_API_TOKEN");
        let db_url = non_empty("LMS_DB_URL").unwrap_or_else(|| DEFAULT_DB_URL.into());
        let poll_interval = match non_empty("LMS_POLL_INTERVAL_SECS") {
            Some(raw) => parse_secs("LMS_POLL_INTERVAL_SECS", &raw)?,
            None => CoordinatorConfig::default().poll_interval,
        };

        let config = Self {
            api_base_url,
            ws_url,
            api_token,
            db_url,
            poll_interval,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check URL syntax and schemes.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a URL cannot be parsed or uses the wrong scheme.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api_base()?;
        self.push_endpoint()?;
        Ok(())
    }

    /// Parsed API base URL.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the URL cannot be parsed or is not http/https.
    pub fn api_base(&self) -> Result<Url, ConfigError> {
        check_url("LMS_API_BASE_URL", &self.api_base_url, &["http", "https"], "http/https")
    }

    /// Parsed push endpoint, if one is configured.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the URL cannot be parsed or is not ws/wss.
    pub fn push_endpoint(&self) -> Result<Option<Url>, ConfigError> {
        self.ws_url
            .as_deref()
            .map(|raw| check_url("LMS_WS_URL", raw, &["ws", "wss"], "ws/wss"))
            .transpose()
    }

    #[must_use]
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            poll_interval: self.poll_interval,
            ..CoordinatorConfig::default()
        }
    }
}

fn check_url(
    var: &'static str,
    raw: &str,
    schemes: &[&str],
    expected: &'static str,
) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|source| ConfigError::InvalidUrl { var, source })?;
    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::UnsupportedScheme {
            var,
            expected,
            scheme: url.scheme().to_owned(),
        });
    }
    Ok(url)
}

fn parse_secs(var: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::InvalidNumber {
            var,
            raw: raw.to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn reads_defaults() {
        let config =
            ClientConfig::from_lookup(lookup(&[("LMS_API_BASE_URL", "https://lms.test/api")]))
                .unwrap();
        assert_eq!(config.db_url, DEFAULT_DB_URL);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.ws_url, None);
        assert_eq!(config.api_token, None);
    }

    #[test]
    fn base_url_is_required() {
        let err = ClientConfig::from_lookup(lookup(&[("LMS_API_BASE_URL", "  ")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("LMS_API_BASE_URL")));
    }

    #[test]
    fn rejects_wrong_ws_scheme() {
        let err = ClientConfig::from_lookup(lookup(&[
            ("LMS_API_BASE_URL", "https://lms.test/api"),
            ("LMS_WS_URL", "https://lms.test/ws"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedScheme { var: "LMS_WS_URL", .. }));
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let err = ClientConfig::from_lookup(lookup(&[
            ("LMS_API_BASE_URL", "https://lms.test/api"),
            ("LMS_POLL_INTERVAL_SECS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { .. }));
    }

    #[test]
    fn poll_interval_flows_into_coordinator_config() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("LMS_API_BASE_URL", "http://localhost:8000/api"),
            ("LMS_WS_URL", "ws://localhost:8000/ws/notifications"),
            ("LMS_POLL_INTERVAL_SECS", "10"),
        ]))
        .unwrap();
        let coordinator = config.coordinator_config();
        assert_eq!(coordinator.poll_interval, Duration::from_secs(10));
        assert_eq!(coordinator.polling_threshold, 3);
    }
}
