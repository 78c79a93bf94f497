use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_WS_ADDR: &str = "0.0.0.0:9001";
const DEFAULT_DATABASE_PATH: &str = "huddle.db";

/// Per-connection outbound queue depth before the hub drops a slow client
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("heartbeat timeout ({timeout:?}) must exceed the heartbeat interval ({interval:?})")]
    HeartbeatWindow { interval: Duration, timeout: Duration },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_addr: String,
    pub ws_addr: String,
    pub database_path: String,
    pub db_pool_size: u32,
    /// Shared secret a socket `connect` must present, when set
    pub access_token: Option<String>,
    pub session: SessionConfig,
}

/// Timing and sizing for a single socket connection
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub outbound_queue: usize,
    pub auth_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
}

impl SessionConfig {
    /// A session needs a live peer to be detectable before it is dropped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_timeout <= self.heartbeat_interval {
            return Err(ConfigError::HeartbeatWindow {
                interval: self.heartbeat_interval,
                timeout: self.heartbeat_timeout,
            });
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
            auth_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(45),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: DEFAULT_HTTP_ADDR.to_string(),
            ws_addr: DEFAULT_WS_ADDR.to_string(),
            database_path: DEFAULT_DATABASE_PATH.to_string(),
            db_pool_size: 8,
            access_token: None,
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    /// Read `HUDDLE_*` variables from the environment, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let session_defaults = SessionConfig::default();

        let access_token = env::var("HUDDLE_ACCESS_TOKEN")
            .ok()
            .filter(|token| !token.is_empty());

        let session = SessionConfig {
            outbound_queue: positive_var("HUDDLE_OUTBOUND_QUEUE", session_defaults.outbound_queue)?,
            auth_timeout: secs_var("HUDDLE_AUTH_TIMEOUT_SECS", session_defaults.auth_timeout)?,
            heartbeat_interval: secs_var(
                "HUDDLE_HEARTBEAT_INTERVAL_SECS",
                session_defaults.heartbeat_interval,
            )?,
            heartbeat_timeout: secs_var(
                "HUDDLE_HEARTBEAT_TIMEOUT_SECS",
                session_defaults.heartbeat_timeout,
            )?,
        };
        session.validate()?;

        Ok(Self {
            http_addr: env::var("HUDDLE_HTTP_ADDR").unwrap_or(defaults.http_addr),
            ws_addr: env::var("HUDDLE_WS_ADDR").unwrap_or(defaults.ws_addr),
            database_path: env::var("HUDDLE_DATABASE_PATH").unwrap_or(defaults.database_path),
            db_pool_size: positive_var("HUDDLE_DB_POOL_SIZE", defaults.db_pool_size)?,
            access_token,
            session,
        })
    }
}

fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => parse_value(key, &value),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

/// Like `parse_var`, but zero is rejected.
fn positive_var<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default + ToString,
{
    let value = parse_var(key, default)?;
    ensure_positive(key, value)
}

fn ensure_positive<T: PartialOrd + Default + ToString>(
    key: &'static str,
    value: T,
) -> Result<T, ConfigError> {
    if value > T::default() {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        })
    }
}

fn secs_var(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    positive_var(key, default.as_secs()).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.ws_addr, DEFAULT_WS_ADDR);
        assert_eq!(config.session.outbound_queue, 256);
        assert!(config.session.heartbeat_timeout > config.session.heartbeat_interval);
        assert!(config.access_token.is_none());
    }

    #[test]
    fn test_parse_value_rejects_garbage() {
        let err = parse_value::<usize>("HUDDLE_OUTBOUND_QUEUE", "lots").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "HUDDLE_OUTBOUND_QUEUE", .. }));
        assert!(err.to_string().contains("lots"));
    }

    #[test]
    fn test_zero_is_rejected() {
        let err = ensure_positive("HUDDLE_HEARTBEAT_INTERVAL_SECS", 0u64).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { key: "HUDDLE_HEARTBEAT_INTERVAL_SECS", .. }
        ));
        assert!(ensure_positive("HUDDLE_OUTBOUND_QUEUE", 0usize).is_err());
        assert_eq!(ensure_positive("HUDDLE_DB_POOL_SIZE", 4u32).unwrap(), 4);
    }

    #[test]
    fn test_zero_heartbeat_interval_from_env_is_rejected() {
        // Only this test touches this variable
        env::set_var("HUDDLE_HEARTBEAT_INTERVAL_SECS", "0");
        let result = Config::from_env();
        env::remove_var("HUDDLE_HEARTBEAT_INTERVAL_SECS");
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { key: "HUDDLE_HEARTBEAT_INTERVAL_SECS", .. })
        ));
    }

    #[test]
    fn test_heartbeat_timeout_must_exceed_interval() {
        let session = SessionConfig {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(30),
            ..SessionConfig::default()
        };
        assert!(matches!(
            session.validate(),
            Err(ConfigError::HeartbeatWindow { .. })
        ));
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_parse_value_trims() {
        assert_eq!(parse_value::<u32>("HUDDLE_DB_POOL_SIZE", " 4 ").unwrap(), 4);
    }
}
