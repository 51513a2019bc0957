//! Configuration file parser for ~/.config/feedsync/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// A value parsed but cannot be used.
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Where messages are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    /// `feedsync.db` in the config directory.
    #[default]
    File,
    /// Private in-memory database, discarded on exit.
    Memory,
}

/// How outgoing requests reach the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    /// Direct connections only; environment proxy variables are ignored.
    #[default]
    None,
    /// Honor `HTTP_PROXY`/`HTTPS_PROXY`/`ALL_PROXY` from the environment.
    System,
    Http,
    Socks5,
}

/// `[proxy]` table.
///
/// SEC-015: Custom Debug impl masks `password`.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub kind: ProxyKind,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl ProxyConfig {
    /// `scheme://host:port` for an explicit proxy, `None` for `none`/`system`.
    ///
    /// # Errors
    ///
    /// `ConfigError::Invalid` when an explicit proxy lacks a host or port.
    pub fn explicit_url(&self) -> Result<Option<String>, ConfigError> {
        let scheme = match self.kind {
            ProxyKind::None | ProxyKind::System => return Ok(None),
            ProxyKind::Http => "http",
            ProxyKind::Socks5 => "socks5h",
        };
        let host = self
            .host
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConfigError::Invalid("proxy.host is required".to_string()))?;
        let port = self
            .port
            .ok_or_else(|| ConfigError::Invalid("proxy.port is required".to_string()))?;
        Ok(Some(format!("{}://{}:{}", scheme, host, port)))
    }
}

/// Top-level engine configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Interval for feeds following the global policy. 0 = no automatic
    /// updates for those feeds.
    pub global_interval_minutes: u32,

    /// Whole-request timeout for a single fetch, in milliseconds.
    pub connection_timeout_ms: u64,

    /// Maximum number of feeds fetched concurrently.
    pub worker_pool_size: usize,

    /// How often the scheduler checks for due feeds.
    pub tick_seconds: u64,

    /// Run a manual update of every feed when the scheduler starts.
    pub update_on_startup: bool,

    pub database: DatabaseKind,

    pub proxy: ProxyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            global_interval_minutes: 30,
            connection_timeout_ms: 15_000,
            worker_pool_size: 6,
            tick_seconds: 60,
            update_on_startup: false,
            database: DatabaseKind::File,
            proxy: ProxyConfig::default(),
        }
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 7] = [
        "global_interval_minutes",
        "connection_timeout_ms",
        "worker_pool_size",
        "tick_seconds",
        "update_on_startup",
        "database",
        "proxy",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading to prevent memory exhaustion
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config = Self::from_toml(&content)?;
        tracing::info!(
            path = %path.display(),
            global_interval = config.global_interval_minutes,
            workers = config.worker_pool_size,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "worker_pool_size must be at least 1".to_string(),
            ));
        }
        if self.connection_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "connection_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.tick_seconds == 0 {
            return Err(ConfigError::Invalid(
                "tick_seconds must be greater than 0".to_string(),
            ));
        }
        self.proxy.explicit_url()?;
        Ok(())
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_seconds)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.global_interval_minutes, 30);
        assert_eq!(config.connection_timeout_ms, 15_000);
        assert_eq!(config.worker_pool_size, 6);
        assert_eq!(config.tick_seconds, 60);
        assert!(!config.update_on_startup);
        assert_eq!(config.database, DatabaseKind::File);
        assert_eq!(config.proxy.kind, ProxyKind::None);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/feedsync_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.global_interval_minutes, 30);
    }

    #[test]
    fn test_empty_file_returns_default() {
        let dir = std::env::temp_dir().join("feedsync_config_test_empty");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "   \n  ").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.worker_pool_size, 6);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let content = r#"
global_interval_minutes = 0
connection_timeout_ms = 2500
worker_pool_size = 2
tick_seconds = 15
update_on_startup = true
database = "memory"

[proxy]
kind = "socks5"
host = "127.0.0.1"
port = 1080
username = "me"
password = "hunter2"
"#;
        let config = Config::from_toml(content).unwrap();
        assert_eq!(config.global_interval_minutes, 0);
        assert_eq!(config.connection_timeout(), Duration::from_millis(2500));
        assert_eq!(config.worker_pool_size, 2);
        assert_eq!(config.tick_interval(), Duration::from_secs(15));
        assert!(config.update_on_startup);
        assert_eq!(config.database, DatabaseKind::Memory);
        assert_eq!(
            config.proxy.explicit_url().unwrap().as_deref(),
            Some("socks5h://127.0.0.1:1080")
        );
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let err = Config::from_toml("this is not [valid toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let config = Config::from_toml("tick_seconds = 5\ntotally_fake_key = 1\n").unwrap();
        assert_eq!(config.tick_seconds, 5);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = Config::from_toml("worker_pool_size = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_explicit_proxy_requires_host_and_port() {
        let err = Config::from_toml("[proxy]\nkind = \"http\"\nport = 8080\n").unwrap_err();
        assert!(err.to_string().contains("proxy.host"));

        let config = Config::from_toml("[proxy]\nkind = \"system\"\n").unwrap();
        assert_eq!(config.proxy.explicit_url().unwrap(), None);
    }

    // SEC-014: File size limit
    #[test]
    fn test_too_large_file_rejected() {
        let dir = std::env::temp_dir().join("feedsync_config_test_too_large");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "a".repeat(1_048_577)).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));

        std::fs::remove_dir_all(&dir).ok();
    }

    // SEC-015: Debug output masks the proxy password
    #[test]
    fn test_debug_masks_proxy_password() {
        let mut config = Config::default();
        config.proxy.password = Some("super-secret-12345".to_string());

        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super-secret-12345"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
