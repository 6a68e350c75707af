//! Server configuration: environment variables plus JSON config files.

use std::path::{Path, PathBuf};

use bs_core::config::{ConnectionsConfig, GlobalConfig};

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for running out of a
/// provisioned working directory. In production, override via
/// environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `5111`).
    pub port: u16,
    /// Database and runtime data directory (default: `data`).
    pub data_dir: PathBuf,
    /// JSON config directory (default: `config`).
    pub config_dir: PathBuf,
    /// Log file directory (default: `logs`).
    pub log_dir: PathBuf,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Graceful shutdown timeout in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default   |
    /// |------------------------|-----------|
    /// | `HOST`                 | `0.0.0.0` |
    /// | `PORT`                 | `5111`    |
    /// | `DATA_DIR`             | `data`    |
    /// | `CONFIG_DIR`           | `config`  |
    /// | `LOG_DIR`              | `logs`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`      |
    /// | `SHUTDOWN_TIMEOUT_SECS`| `30`      |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "5111".into())
            .parse()
            .expect("PORT must be a valid u16");

        let data_dir = PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| "data".into()));
        let config_dir =
            PathBuf::from(std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".into()));
        let log_dir = PathBuf::from(std::env::var("LOG_DIR").unwrap_or_else(|_| "logs".into()));

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        Self {
            host,
            port,
            data_dir,
            config_dir,
            log_dir,
            request_timeout_secs,
            shutdown_timeout_secs,
        }
    }

    /// Database URL: `DATABASE_URL` when set, otherwise a SQLite file
    /// inside the data directory.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| {
            format!(
                "sqlite://{}?mode=rwc",
                self.data_dir.join("botshepherd.db").display()
            )
        })
    }

    /// Create the runtime directories (`data`, `config`, `logs`) if
    /// they are missing.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::create_dir_all(&self.log_dir)?;
        Ok(())
    }
}

/// Errors reading or writing the JSON config files.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Read `connections.json`, writing a disabled example file first if
/// it does not exist yet.
pub fn load_or_init_connections(config_dir: &Path) -> Result<ConnectionsConfig, ConfigError> {
    let path = config_dir.join("connections.json");
    if !path.exists() {
        let example = serde_json::json!({
            "example": {
                "enabled": false,
                "client_endpoint": "ws://0.0.0.0:5111/bs/example",
                "target_endpoints": ["ws://127.0.0.1:2536/OneBotv11"]
            }
        });
        std::fs::write(&path, serde_json::to_string_pretty(&example).expect("static json"))?;
        tracing::info!(path = %path.display(), "Wrote example connections config");
    }

    let raw = std::fs::read_to_string(&path)?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Read `global.json`, writing the defaults first if it does not
/// exist yet.
pub fn load_or_init_global(config_dir: &Path) -> Result<GlobalConfig, ConfigError> {
    let path = config_dir.join("global.json");
    if !path.exists() {
        let defaults = GlobalConfig::default();
        std::fs::write(
            &path,
            serde_json::to_string_pretty(&defaults).expect("static json"),
        )?;
        tracing::info!(path = %path.display(), "Wrote default global config");
    }

    let raw = std::fs::read_to_string(&path)?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("bs-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn connections_file_is_bootstrapped() {
        let dir = temp_config_dir();

        let configs = load_or_init_connections(&dir).unwrap();
        assert!(dir.join("connections.json").exists());
        // The example lane ships disabled.
        assert!(!configs.get("example").unwrap().enabled);

        // Second load reads the same file back.
        let again = load_or_init_connections(&dir).unwrap();
        assert_eq!(again.len(), configs.len());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn global_file_is_bootstrapped_with_defaults() {
        let dir = temp_config_dir();

        let global = load_or_init_global(&dir).unwrap();
        assert_eq!(global.command_prefix, "bs");
        assert!(!global.security.auth_enabled);
        assert!(dir.join("global.json").exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn malformed_connections_file_is_a_parse_error() {
        let dir = temp_config_dir();
        std::fs::write(dir.join("connections.json"), "{not json").unwrap();

        let err = load_or_init_connections(&dir).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
