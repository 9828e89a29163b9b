//! Local state of managed sensor stations
//!
//! Which stations are enabled, how reachable they are, the limits configured
//! for each sensor and the measurements waiting for upload.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use station_proto::{Alarm, SensorLimits};

mod json;

pub use json::{JsonStore, STORE_FILE};

/// Failed connection attempts until a station counts as lost
pub const MAX_FAILED_CONNECTION_ATTEMPTS: u32 = 3;

/// Sensor name used for the battery charge
pub const BATTERY_SENSOR: &str = "Battery Level";

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("unable to access station store {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },

    #[error("station store {path} is corrupt: {source}")]
    Json { path: PathBuf, source: serde_json::Error },

    #[error("unknown sensor station {0}")]
    UnknownStation(String),

    #[error("sensor {sensor} not known on station {address}, it appears with its first measurement")]
    UnknownSensor { address: String, sensor: String },
}

/// A stored reading, as handed to the uploader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Id for later deletion
    pub id: u64,
    pub station: String,
    pub sensor: String,
    pub unit: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub alarm: Alarm,
}

/// Reachability of a station
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationState {
    pub connection_alive: bool,
    pub dip_id: Option<u64>,
}

/// Persistence of station state, limits and measurements.
///
/// Stations are keyed by their BLE address; sensors by name.
pub trait StationStore {
    /// Enabled stations, fewest failed connection attempts first, then newest first
    fn known_addresses(&self) -> Result<Vec<String>, StoreError>;

    /// Stations marked for locking
    fn disabled_addresses(&self) -> Result<Vec<String>, StoreError>;

    /// Adds a station, or re-adds it from scratch if it exists
    fn enable(&mut self, address: &str, added: DateTime<Utc>) -> Result<(), StoreError>;

    fn disable(&mut self, address: &str) -> Result<(), StoreError>;

    /// Removes a station with all its sensors and measurements
    fn delete(&mut self, address: &str) -> Result<(), StoreError>;

    /// Limits of every sensor seen on the station
    fn get_limits(&self, address: &str) -> Result<BTreeMap<String, SensorLimits>, StoreError>;

    /// Replaces the limits of an existing sensor
    fn set_limits(
        &mut self,
        address: &str,
        sensor: &str,
        lower_limit: Option<f64>,
        upper_limit: Option<f64>,
        tripping_duration: Option<TimeDelta>,
    ) -> Result<(), StoreError>;

    /// Stores a reading.
    ///
    /// Creates the sensor on first use; its unit is fixed by that first
    /// reading. Advances the sensor's last-inside-limits time when the value
    /// is within its limits, and marks the connection alive.
    fn add_measurement(
        &mut self,
        address: &str,
        sensor: &str,
        unit: Option<&str>,
        timestamp: DateTime<Utc>,
        value: f64,
        alarm: Alarm,
    ) -> Result<(), StoreError>;

    /// Records the DIP switch id and marks the connection alive
    fn set_identifier(&mut self, address: &str, dip_id: u64) -> Result<(), StoreError>;

    /// Counts a failed connection.
    ///
    /// After [`MAX_FAILED_CONNECTION_ATTEMPTS`] the connection is flagged
    /// lost and counting stops until the station answers again.
    fn record_failed_connection(&mut self, address: &str) -> Result<(), StoreError>;

    fn station_states(&self) -> Result<BTreeMap<String, StationState>, StoreError>;

    /// Measurements of enabled stations, oldest first
    fn measurements(&self) -> Result<Vec<Measurement>, StoreError>;

    fn delete_measurements(&mut self, ids: &[u64]) -> Result<(), StoreError>;
}
