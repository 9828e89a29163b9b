//! Access point configuration, kept as JSON in the access point home

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use station_ble::{RetryPolicy, Timeouts};

pub const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the home directory
pub const HOME_ENV: &str = "ACCESS_POINT_HOME";

const MAX_TRANSPORT_ATTEMPTS: u32 = 10;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not determine home directory, set ACCESS_POINT_HOME")]
    NoHome,

    #[error("unable to access {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },

    #[error("unable to parse {path}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Room the access point is placed in
    pub room_name: String,
    /// Advertised name of stations that may be adopted
    pub station_name: String,
    #[serde(with = "secs")]
    pub scan_duration: Duration,
    #[serde(with = "secs")]
    pub collect_interval: Duration,
    #[serde(with = "secs")]
    pub connect_timeout: Duration,
    #[serde(with = "secs")]
    pub io_timeout: Duration,
    /// Attempts per radio operation on fast failures
    pub transport_attempts: u32,
    /// Look for new stations on the next pass
    #[serde(skip)]
    pub scan_active: bool,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            room_name: "New AccessPoint".to_string(),
            station_name: "SensorStation".to_string(),
            scan_duration: Duration::from_secs(10),
            collect_interval: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            io_timeout: Duration::from_secs(5),
            transport_attempts: station_ble::retry::DEFAULT_ATTEMPTS,
            scan_active: false,
            debug: false,
        }
    }
}

impl Config {
    /// Load the configuration from `home`, writing defaults if there is none yet
    pub fn load(home: &Path) -> Result<Self, ConfigError> {
        let path = home.join(CONFIG_FILE);
        if !path.exists() {
            let config = Self::default();
            config.save(home)?;
            return Ok(config);
        }

        let data = fs::read_to_string(&path).map_err(|source| ConfigError::Io { path: path.clone(), source })?;
        let config: Self = serde_json::from_str(&data).map_err(|source| ConfigError::Parse { path, source })?;
        config.validate()?;
        Ok(config)
    }

    /// Whether `home` holds a configuration file yet
    pub fn exists(home: &Path) -> bool {
        home.join(CONFIG_FILE).exists()
    }

    pub fn save(&self, home: &Path) -> Result<(), ConfigError> {
        let path = home.join(CONFIG_FILE);
        let io_error = |source| ConfigError::Io { path: path.clone(), source };
        fs::create_dir_all(home).map_err(io_error)?;
        let data = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse { path: path.clone(), source })?;
        fs::write(&path, data).map_err(io_error)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.station_name.is_empty() {
            return Err(invalid("station_name", "must not be empty"));
        }
        for (field, value) in [
            ("scan_duration", self.scan_duration),
            ("collect_interval", self.collect_interval),
            ("connect_timeout", self.connect_timeout),
            ("io_timeout", self.io_timeout),
        ] {
            if value.is_zero() {
                return Err(invalid(field, "must be at least one second"));
            }
        }
        if !(1..=MAX_TRANSPORT_ATTEMPTS).contains(&self.transport_attempts) {
            return Err(invalid(
                "transport_attempts",
                format!("expected 1 to {MAX_TRANSPORT_ATTEMPTS}, got {}", self.transport_attempts),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.transport_attempts)
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: self.connect_timeout,
            io: self.io_timeout,
            ..Timeouts::default()
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field, reason: reason.into() }
}

/// Home directory: the given override, else `~/.access-point`
pub fn access_point_home(home: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    match home {
        Some(home) => Ok(home),
        None => dirs::home_dir()
            .map(|dir| dir.join(".access-point"))
            .ok_or(ConfigError::NoHome),
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!Config::exists(dir.path()));
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(Config::exists(dir.path()));
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), r#"{"room_name": "Greenhouse", "collect_interval": 60}"#).unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.room_name, "Greenhouse");
        assert_eq!(config.collect_interval, Duration::from_secs(60));
        assert_eq!(config.station_name, "SensorStation");
    }

    #[test]
    fn scan_flag_is_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config { scan_active: true, debug: true, ..Config::default() };
        config.save(dir.path()).unwrap();
        let loaded = Config::load(dir.path()).unwrap();
        assert!(!loaded.scan_active);
        assert!(loaded.debug);
    }

    #[test]
    fn rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), r#"{"transport_attempts": 0}"#).unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(ConfigError::Invalid { field: "transport_attempts", .. })
        ));

        let config = Config { collect_interval: Duration::ZERO, ..Config::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field: "collect_interval", .. })));
    }

    #[test]
    fn rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "room_name: yaml").unwrap();
        assert!(matches!(Config::load(dir.path()), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn home_override_wins() {
        let home = access_point_home(Some(PathBuf::from("/tmp/ap"))).unwrap();
        assert_eq!(home, PathBuf::from("/tmp/ap"));
    }
}
