use reqwest::Url;
use secrecy::SecretString;
use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

const BACKEND_URL_VAR: &str = "ADMISSIONS_BACKEND_URL";
const BACKEND_KEY_VAR: &str = "ADMISSIONS_BACKEND_ANON_KEY";
const POLL_INTERVAL_VAR: &str = "ADMISSIONS_STATUS_POLL_SECS";
const WEBHOOK_SECRET_VAR: &str = "ADMISSIONS_WEBHOOK_SECRET";

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub backend: BackendConfig,
    pub resolver: ResolverConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            backend: BackendConfig::from_env()?,
            resolver: ResolverConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Endpoint and public key of the hosted backend holding profiles, schools and applications.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub url: Url,
    pub anon_key: SecretString,
    /// Shared secret the backend's change webhook must present. Unset disables the check.
    pub webhook_secret: Option<SecretString>,
}

impl BackendConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let raw_url = required(BACKEND_URL_VAR)?;
        let url = Url::parse(&raw_url).map_err(|_| ConfigError::InvalidBackendUrl {
            value: raw_url.clone(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBackendUrl { value: raw_url });
        }

        let anon_key = SecretString::from(required(BACKEND_KEY_VAR)?);
        let webhook_secret = required(WEBHOOK_SECRET_VAR).ok().map(SecretString::from);
        Ok(Self {
            url,
            anon_key,
            webhook_secret,
        })
    }
}

/// Cadence of the verification status reconciliation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverConfig {
    pub poll_interval: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl ResolverConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let secs = match env::var(POLL_INTERVAL_VAR) {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::InvalidPollInterval)?,
            Err(_) => return Ok(Self::default()),
        };

        Ok(Self {
            poll_interval: Duration::from_secs(secs),
        })
    }
}

fn required(var: &'static str) -> Result<String, ConfigError> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(ConfigError::Missing { var }),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Missing { var: &'static str },
    InvalidBackendUrl { value: String },
    InvalidPollInterval,
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing { var } => write!(
                f,
                "{var} is required; set it to the admissions backend's endpoint or public API key"
            ),
            ConfigError::InvalidBackendUrl { value } => write!(
                f,
                "{BACKEND_URL_VAR} must be an absolute http(s) URL, got '{value}'"
            ),
            ConfigError::InvalidPollInterval => {
                write!(f, "{POLL_INTERVAL_VAR} must be a positive number of seconds")
            }
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        env::remove_var("APP_ENV");
        env::remove_var("APP_HOST");
        env::remove_var("APP_PORT");
        env::remove_var("APP_LOG_LEVEL");
        env::remove_var(BACKEND_URL_VAR);
        env::remove_var(BACKEND_KEY_VAR);
        env::remove_var(POLL_INTERVAL_VAR);
        env::remove_var(WEBHOOK_SECRET_VAR);
    }

    fn set_backend() {
        env::set_var(BACKEND_URL_VAR, "https://project.example.co");
        env::set_var(BACKEND_KEY_VAR, "public-anon-key");
    }

    #[test]
    fn load_uses_defaults_when_optional_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        set_backend();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.resolver.poll_interval, Duration::from_secs(5));
        assert_eq!(config.backend.url.host_str(), Some("project.example.co"));
        assert_eq!(config.backend.anon_key.expose_secret(), "public-anon-key");
        assert!(config.backend.webhook_secret.is_none());
    }

    #[test]
    fn webhook_secret_is_read_when_present() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        set_backend();
        env::set_var(WEBHOOK_SECRET_VAR, " hook-secret ");

        let config = AppConfig::load().expect("config loads");
        let secret = config.backend.webhook_secret.expect("secret configured");
        assert_eq!(secret.expose_secret(), "hook-secret");
    }

    #[test]
    fn missing_backend_url_fails_fast() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var(BACKEND_KEY_VAR, "public-anon-key");

        let err = AppConfig::load().expect_err("missing url rejected");
        assert!(matches!(err, ConfigError::Missing { var } if var == BACKEND_URL_VAR));
        assert!(err.to_string().contains(BACKEND_URL_VAR));
    }

    #[test]
    fn blank_backend_key_counts_as_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var(BACKEND_URL_VAR, "https://project.example.co");
        env::set_var(BACKEND_KEY_VAR, "   ");

        let err = AppConfig::load().expect_err("blank key rejected");
        assert!(matches!(err, ConfigError::Missing { var } if var == BACKEND_KEY_VAR));
    }

    #[test]
    fn rejects_non_http_backend_url() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        set_backend();
        env::set_var(BACKEND_URL_VAR, "ftp://project.example.co");

        let err = AppConfig::load().expect_err("ftp rejected");
        assert!(matches!(err, ConfigError::InvalidBackendUrl { .. }));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        set_backend();
        env::set_var(POLL_INTERVAL_VAR, "0");

        let err = AppConfig::load().expect_err("zero interval rejected");
        assert!(matches!(err, ConfigError::InvalidPollInterval));
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        set_backend();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
    }
}
