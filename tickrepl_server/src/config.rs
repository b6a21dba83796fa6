// Server configuration.
//
// Every field has a default, so a JSON config file only needs the keys it
// changes (`{"port": 7888}` is a complete config). The binary loads the file
// first and then applies CLI flags on top. A config is validated by
// `ServerLifecycle::start` and never changes while that server runs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT_FILE: &str = ".nrepl-port";
pub const DEFAULT_TICK_INTERVAL_SECONDS: f64 = 0.1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind. Localhost only by default; there is no
    /// authentication.
    pub host: String,
    /// 0 lets the OS pick a free port.
    pub port: u16,
    /// Where to advertise the bound port for editors. `None` disables it.
    pub port_file_path: Option<PathBuf>,
    /// How often the host drains the work queue.
    pub tick_interval_seconds: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: 0,
            port_file_path: Some(PathBuf::from(DEFAULT_PORT_FILE)),
            tick_interval_seconds: DEFAULT_TICK_INTERVAL_SECONDS,
        }
    }
}

impl ServerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() || self.host.contains('"') {
            return Err(ConfigError::InvalidHost(self.host.clone()));
        }
        if !self.tick_interval_seconds.is_finite() || self.tick_interval_seconds <= 0.0 {
            return Err(ConfigError::InvalidInterval(self.tick_interval_seconds));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.tick_interval_seconds)
            .unwrap_or(Duration::from_millis(100))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_gives_defaults() {
        let config = ServerConfig::from_json_str("{}").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 0);
        assert_eq!(config.port_file_path, Some(PathBuf::from(".nrepl-port")));
        assert_eq!(config.tick_interval().as_millis(), 100);
    }

    #[test]
    fn partial_json_overrides_only_given_keys() {
        let config =
            ServerConfig::from_json_str(r#"{"port": 7888, "port_file_path": null}"#).unwrap();
        assert_eq!(config.port, 7888);
        assert_eq!(config.port_file_path, None);
        assert_eq!(config.host, "127.0.0.1");
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            ServerConfig::from_json_str(r#"{"port": "high"}"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn validation_rejects_bad_host_and_interval() {
        let bad_host = ServerConfig {
            host: "local\"host".into(),
            ..ServerConfig::default()
        };
        assert!(matches!(bad_host.validate(), Err(ConfigError::InvalidHost(_))));

        for interval in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let config = ServerConfig {
                tick_interval_seconds: interval,
                ..ServerConfig::default()
            };
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidInterval(_))),
                "interval {interval} should be rejected"
            );
        }
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nrepl.json");
        std::fs::write(&path, r#"{"host": "localhost", "tick_interval_seconds": 0.02}"#).unwrap();
        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.tick_interval().as_millis(), 20);

        assert!(matches!(
            ServerConfig::load(&dir.path().join("missing.json")),
            Err(ConfigError::Read { .. })
        ));
    }
}
