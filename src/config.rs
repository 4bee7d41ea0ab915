use crate::monitor::{DEFAULT_CRITICAL_LEVEL, DEFAULT_MONITOR_INTERVAL};
use crate::serial::{DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT_MS, SerialSettings};
use crate::telemetry::RetryPolicy;
use crate::telemetry::reader::{
    DEFAULT_MAX_JITTER, DEFAULT_MIN_READ_INTERVAL, DEFAULT_READ_ATTEMPTS,
};
use crate::ups::{ControllerOptions, DEFAULT_REFRESH_INTERVAL};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_LOG_LEVEL: tracing::Level = tracing::Level::INFO;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: AppSection,
    pub logging: LoggingSection,
    #[serde(default)]
    pub serial: Option<SerialSection>,
    #[serde(default)]
    pub cache: Option<CacheSection>,
    #[serde(default)]
    pub retry: Option<RetrySection>,
    #[serde(default)]
    pub monitor: Option<MonitorSection>,
    #[serde(default)]
    pub server: Option<ServerSection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSection {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SerialSection {
    /// Serial device path; discovered from the kernel log when empty
    pub device: Option<String>,
    pub baud_rate: Option<u32>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheSection {
    /// Seconds between background reads (default: 1.0)
    pub refresh_interval_secs: Option<f64>,
    /// Read synchronously on every access when false (default: true)
    pub use_caching: Option<bool>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrySection {
    pub attempts: Option<u32>,
    pub max_jitter_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MonitorSection {
    pub interval_secs: Option<u64>,
    /// Battery percentage below which the host is shut down (default: 10)
    pub critical_level: Option<u8>,
    pub dry_run: Option<bool>,
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSection {
    /// Port to listen on (default: 8080)
    pub port: Option<u16>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub fn load_default() -> Result<Config, ConfigError> {
    load_from_path(DEFAULT_CONFIG_PATH)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    config.refresh_interval()?;
    Ok(config)
}

impl Config {
    /// Configured log level, falling back to INFO when unrecognised.
    pub fn log_level(&self) -> tracing::Level {
        self.logging.level.parse().unwrap_or(DEFAULT_LOG_LEVEL)
    }

    /// Explicit serial device, or None to run discovery.
    pub fn serial_device(&self) -> Option<&str> {
        let device = self.serial.as_ref()?.device.as_deref()?.trim();
        if device.is_empty() { None } else { Some(device) }
    }

    pub fn serial_settings(&self, device: impl Into<String>) -> SerialSettings {
        let section = self.serial.as_ref();
        SerialSettings {
            device: device.into(),
            baud_rate: section
                .and_then(|s| s.baud_rate)
                .unwrap_or(DEFAULT_BAUD_RATE),
            timeout_ms: section
                .and_then(|s| s.timeout_ms)
                .unwrap_or(DEFAULT_READ_TIMEOUT_MS),
        }
    }

    /// Returns the cache refresh interval (default: 1 second)
    pub fn refresh_interval(&self) -> Result<Duration, ConfigError> {
        match self.cache.as_ref().and_then(|c| c.refresh_interval_secs) {
            None => Ok(DEFAULT_REFRESH_INTERVAL),
            Some(secs) => Duration::try_from_secs_f64(secs).map_err(|_| {
                ConfigError::Invalid(format!(
                    "cache.refresh_interval_secs must be a finite number >= 0, got {secs}"
                ))
            }),
        }
    }

    pub fn use_caching(&self) -> bool {
        self.cache
            .as_ref()
            .and_then(|c| c.use_caching)
            .unwrap_or(true)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let section = self.retry.as_ref();
        RetryPolicy {
            attempts: section
                .and_then(|r| r.attempts)
                .unwrap_or(DEFAULT_READ_ATTEMPTS),
            max_jitter: section
                .and_then(|r| r.max_jitter_ms)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_MAX_JITTER),
        }
    }

    pub fn controller_options(&self) -> Result<ControllerOptions, ConfigError> {
        Ok(ControllerOptions {
            use_caching: self.use_caching(),
            refresh_interval: self.refresh_interval()?,
            retry: self.retry_policy(),
            min_read_interval: DEFAULT_MIN_READ_INTERVAL,
        })
    }

    pub fn monitor_interval(&self) -> Duration {
        self.monitor
            .as_ref()
            .and_then(|m| m.interval_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_MONITOR_INTERVAL)
    }

    pub fn critical_level(&self) -> u8 {
        self.monitor
            .as_ref()
            .and_then(|m| m.critical_level)
            .unwrap_or(DEFAULT_CRITICAL_LEVEL)
    }

    pub fn dry_run(&self) -> bool {
        self.monitor
            .as_ref()
            .and_then(|m| m.dry_run)
            .unwrap_or(false)
    }

    pub fn status_log_path(&self) -> Option<&Path> {
        let path = self.monitor.as_ref()?.log_path.as_deref()?;
        if path.as_os_str().is_empty() {
            None
        } else {
            Some(path)
        }
    }

    /// Returns the server port (default: 8080)
    pub fn server_port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_SERVER_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    const MINIMAL: &str = r#"
[app]
name = "upspack-monitor"

[logging]
level = "debug"
"#;

    fn write_temp(label: &str, contents: &str) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let unique = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
        let path = std::env::temp_dir().join(format!("upspack-config-{label}-{unique}.toml"));
        fs::write(&path, contents)?;
        Ok(path)
    }

    #[test]
    fn default_config_loads() -> Result<(), Box<dyn std::error::Error>> {
        let config = load_default()?;

        assert_eq!(config.serial_device(), None);
        assert_eq!(config.refresh_interval()?, Duration::from_secs(1));
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert!(config.status_log_path().is_some());
        Ok(())
    }

    #[test]
    fn minimal_config_uses_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let path = write_temp("minimal", MINIMAL)?;
        let config = load_from_path(&path)?;
        let _ = fs::remove_file(&path);

        assert_eq!(config.log_level(), tracing::Level::DEBUG);
        assert!(config.use_caching());
        assert_eq!(config.critical_level(), DEFAULT_CRITICAL_LEVEL);
        assert_eq!(config.monitor_interval(), DEFAULT_MONITOR_INTERVAL);
        assert_eq!(config.server_port(), DEFAULT_SERVER_PORT);
        assert!(config.status_log_path().is_none());
        let settings = config.serial_settings("/dev/ttyUSB0");
        assert_eq!(settings, SerialSettings::new("/dev/ttyUSB0"));
        Ok(())
    }

    #[test]
    fn explicit_device_and_fractional_interval() -> Result<(), Box<dyn std::error::Error>> {
        let contents = format!(
            "{MINIMAL}\n[serial]\ndevice = \" /dev/ttyAMA0 \"\n\n[cache]\nrefresh_interval_secs = 0.5\nuse_caching = false\n"
        );
        let path = write_temp("explicit", &contents)?;
        let config = load_from_path(&path)?;
        let _ = fs::remove_file(&path);

        assert_eq!(config.serial_device(), Some("/dev/ttyAMA0"));
        let options = config.controller_options()?;
        assert_eq!(options.refresh_interval, Duration::from_millis(500));
        assert!(!options.use_caching);
        Ok(())
    }

    #[test]
    fn negative_interval_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let contents = format!("{MINIMAL}\n[cache]\nrefresh_interval_secs = -1.0\n");
        let path = write_temp("negative", &contents)?;

        let result = load_from_path(&path);
        let _ = fs::remove_file(&path);

        assert!(matches!(result, Err(ConfigError::Invalid(_))));
        Ok(())
    }

    #[test]
    fn unknown_log_level_falls_back_to_info() -> Result<(), Box<dyn std::error::Error>> {
        let path = write_temp("level", &MINIMAL.replace("debug", "chatty"))?;
        let config = load_from_path(&path)?;
        let _ = fs::remove_file(&path);

        assert_eq!(config.log_level(), tracing::Level::INFO);
        Ok(())
    }

    #[test]
    fn missing_config_file_returns_read_error() {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("upspack-config-missing-{unique}.toml"));

        let result = load_from_path(&path);

        assert!(matches!(result, Err(ConfigError::Read(_))));
    }

    #[test]
    fn invalid_toml_returns_parse_error() -> Result<(), Box<dyn std::error::Error>> {
        let path = write_temp("invalid", "not = [valid")?;

        let result = load_from_path(&path);
        let _ = fs::remove_file(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        Ok(())
    }
}
