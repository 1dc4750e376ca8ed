use std::time::Duration;

use url::Url;

/// Default NiFi REST endpoint for a local development instance.
pub const DEFAULT_API_URL: &str = "http://localhost:8080/nifi-api";

/// Default per-call timeout for NiFi REST requests.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default port the scaffold's HTTP ingress listens on.
pub const DEFAULT_TEST_PORT: u16 = 80;

/// Connection settings for a NiFi instance, loaded from environment
/// variables.
#[derive(Debug, Clone)]
pub struct NifiConfig {
    /// REST base URL, e.g. `http://host:8080/nifi-api`.
    pub api_url: Url,
    /// Timeout applied to every REST call.
    pub request_timeout: Duration,
    /// Port used by test scaffolds unless a test case overrides it.
    pub test_port: u16,
}

/// Errors produced while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} is not a valid URL: {source}")]
    InvalidUrl {
        var: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("{var} must be a valid {expected}, got {value:?}")]
    InvalidNumber {
        var: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("{0} has no host component")]
    MissingHost(Url),
}

impl NifiConfig {
    /// Settings for an explicit API URL with default timeouts.
    pub fn new(api_url: Url) -> Self {
        Self {
            api_url,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            test_port: DEFAULT_TEST_PORT,
        }
    }

    /// Load configuration from environment variables with defaults.
    /// A `.env` file in the working directory is honoured.
    ///
    /// | Env Var                     | Default                          |
    /// |-----------------------------|----------------------------------|
    /// | `NIFI_API_URL`              | `http://localhost:8080/nifi-api` |
    /// | `NIFI_REQUEST_TIMEOUT_SECS` | `30`                             |
    /// | `NIFI_TEST_PORT`            | `80`                             |
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let raw_url = std::env::var("NIFI_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.into());
        let api_url = Url::parse(&raw_url).map_err(|source| ConfigError::InvalidUrl {
            var: "NIFI_API_URL",
            source,
        })?;
        if api_url.host_str().is_none() {
            return Err(ConfigError::MissingHost(api_url));
        }

        let timeout_secs: u64 = parse_var(
            "NIFI_REQUEST_TIMEOUT_SECS",
            "u64",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;
        let test_port: u16 = parse_var("NIFI_TEST_PORT", "u16", DEFAULT_TEST_PORT)?;

        Ok(Self {
            api_url,
            request_timeout: Duration::from_secs(timeout_secs),
            test_port,
        })
    }

    /// The API URL without a trailing slash, ready for path joining.
    pub fn api_base(&self) -> String {
        self.api_url.as_str().trim_end_matches('/').to_string()
    }
}

fn parse_var<T: std::str::FromStr>(
    var: &'static str,
    expected: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
            var,
            expected,
            value,
        }),
        Err(_) => Ok(default),
    }
}
