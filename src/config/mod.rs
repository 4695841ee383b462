use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub providers: ProvidersConfig,
    pub retry: RetryConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

/// Endpoints shared by the three analysis providers
#[derive(Debug, Clone)]
pub struct ProvidersConfig {
    pub api_key: String,
    pub company: EndpointConfig,
    pub competitive: EndpointConfig,
    pub market: EndpointConfig,
}

/// A single provider endpoint
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub url: String,
    pub timeout_ms: u64,
}

/// Retry/backoff policy for provider calls
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

/// Session store and snapshot persistence configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub max_snapshot_bytes: usize,
    pub autosave_debounce_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

pub const DEFAULT_COMPANY_TIMEOUT_MS: u64 = 420_000;
pub const DEFAULT_COMPETITIVE_TIMEOUT_MS: u64 = 180_000;
pub const DEFAULT_MARKET_TIMEOUT_MS: u64 = 600_000;

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let providers = ProvidersConfig {
            api_key: env::var("PROVIDER_API_KEY").map_err(|_| AppError::Config {
                message: "PROVIDER_API_KEY is required".to_string(),
            })?,
            company: EndpointConfig {
                url: required_url("COMPANY_PROVIDER_URL")?,
                timeout_ms: parsed_or("COMPANY_TIMEOUT_MS", DEFAULT_COMPANY_TIMEOUT_MS),
            },
            competitive: EndpointConfig {
                url: required_url("COMPETITIVE_PROVIDER_URL")?,
                timeout_ms: parsed_or("COMPETITIVE_TIMEOUT_MS", DEFAULT_COMPETITIVE_TIMEOUT_MS),
            },
            market: EndpointConfig {
                url: required_url("MARKET_PROVIDER_URL")?,
                timeout_ms: parsed_or("MARKET_TIMEOUT_MS", DEFAULT_MARKET_TIMEOUT_MS),
            },
        };

        let retry = RetryConfig {
            max_attempts: parsed_or("MAX_ATTEMPTS", 3),
            base_delay_ms: parsed_or("RETRY_BASE_DELAY_MS", 1000),
        };

        if retry.max_attempts == 0 {
            return Err(AppError::Config {
                message: "MAX_ATTEMPTS must be at least 1".to_string(),
            });
        }
        // A zero base collapses every backoff delay to the jitter, which is also zero.
        if retry.base_delay_ms == 0 {
            return Err(AppError::Config {
                message: "RETRY_BASE_DELAY_MS must be at least 1".to_string(),
            });
        }

        let store = StoreConfig {
            path: PathBuf::from(
                env::var("SNAPSHOT_DB_PATH").unwrap_or_else(|_| "./data/assessment.db".to_string()),
            ),
            max_snapshot_bytes: parsed_or("SNAPSHOT_MAX_BYTES", StoreConfig::default().max_snapshot_bytes),
            autosave_debounce_ms: parsed_or("AUTOSAVE_DEBOUNCE_MS", 500),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        Ok(Config {
            providers,
            retry,
            store,
            logging,
        })
    }
}

fn required_url(key: &str) -> Result<String, AppError> {
    let value = env::var(key).map_err(|_| AppError::Config {
        message: format!("{} is required", key),
    })?;
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(AppError::Config {
            message: format!("{} must be an http(s) URL", key),
        });
    }
    Ok(value)
}

fn parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl EndpointConfig {
    /// Create an endpoint with the given URL and timeout
    pub fn new(url: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            url: url.into(),
            timeout_ms,
        }
    }

    /// The hard deadline for one call
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/assessment.db"),
            max_snapshot_bytes: 4 * 1024 * 1024,
            autosave_debounce_ms: 500,
        }
    }
}
