//! JSON document implementation of [`StationStore`]

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use station_proto::{Alarm, SensorLimits};
use tracing::debug;

use crate::{MAX_FAILED_CONNECTION_ATTEMPTS, Measurement, StationState, StationStore, StoreError};

/// File name inside the access point home directory
pub const STORE_FILE: &str = "stations.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredValue {
    id: u64,
    timestamp: DateTime<Utc>,
    value: f64,
    alarm: Alarm,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SensorRecord {
    unit: Option<String>,
    #[serde(default)]
    limits: SensorLimits,
    #[serde(default)]
    values: Vec<StoredValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StationRecord {
    added: DateTime<Utc>,
    #[serde(default)]
    disabled: bool,
    dip_id: Option<u64>,
    #[serde(default)]
    failed_connection_attempts: u32,
    #[serde(default = "alive")]
    connection_alive: bool,
    #[serde(default)]
    sensors: BTreeMap<String, SensorRecord>,
}

fn alive() -> bool {
    true
}

impl StationRecord {
    fn new(added: DateTime<Utc>) -> Self {
        Self {
            added,
            disabled: false,
            dip_id: None,
            failed_connection_attempts: 0,
            connection_alive: true,
            sensors: BTreeMap::new(),
        }
    }

    fn mark_alive(&mut self) {
        self.failed_connection_attempts = 0;
        self.connection_alive = true;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    next_measurement_id: u64,
    #[serde(default)]
    stations: BTreeMap<String, StationRecord>,
}

impl Document {
    fn read(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path).map_err(|source| StoreError::Io { path: path.to_path_buf(), source })?;
        serde_json::from_str(&data).map_err(|source| StoreError::Json { path: path.to_path_buf(), source })
    }

    fn station(&self, address: &str) -> Result<&StationRecord, StoreError> {
        self.stations
            .get(address)
            .ok_or_else(|| StoreError::UnknownStation(address.to_string()))
    }

    fn station_mut(&mut self, address: &str) -> Result<&mut StationRecord, StoreError> {
        self.stations
            .get_mut(address)
            .ok_or_else(|| StoreError::UnknownStation(address.to_string()))
    }

    fn addresses_where(&self, disabled: bool) -> Vec<(&String, &StationRecord)> {
        self.stations
            .iter()
            .filter(|(_, station)| station.disabled == disabled)
            .collect()
    }
}

/// Station store kept in one JSON file, rewritten after every change.
///
/// The file is shared with other processes (the CLI changes stations while
/// the access point runs), so every access starts from what is on disk.
#[derive(Debug, Clone, Default)]
pub struct JsonStore {
    path: Option<PathBuf>,
    doc: Document,
}

impl JsonStore {
    /// Load the store from `path`, or start empty if the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let doc = Document::read(&path)?;
        debug!(path = %path.display(), stations = doc.stations.len(), "opened station store");
        Ok(Self { path: Some(path), doc })
    }

    /// A store that is never written to disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The document as it is now, re-read from disk for file backed stores
    fn current(&self) -> Result<Cow<'_, Document>, StoreError> {
        match &self.path {
            Some(path) => Document::read(path).map(Cow::Owned),
            None => Ok(Cow::Borrowed(&self.doc)),
        }
    }

    /// Applies `change` to the current document and writes it back.
    /// Nothing is written when `change` fails.
    fn update<T>(&mut self, change: impl FnOnce(&mut Document) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut doc = self.current()?.into_owned();
        let value = change(&mut doc)?;
        self.doc = doc;
        self.save()?;
        Ok(value)
    }

    /// Write the document next to the target, then move it into place
    fn save(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io_error = |source| StoreError::Io { path: path.clone(), source };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(io_error)?;
        }
        let data = serde_json::to_string_pretty(&self.doc)
            .map_err(|source| StoreError::Json { path: path.clone(), source })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, data).map_err(io_error)?;
        fs::rename(&tmp, path).map_err(io_error)
    }
}

impl StationStore for JsonStore {
    fn known_addresses(&self) -> Result<Vec<String>, StoreError> {
        let doc = self.current()?;
        let mut enabled = doc.addresses_where(false);
        enabled.sort_by(|(_, a), (_, b)| {
            a.failed_connection_attempts
                .cmp(&b.failed_connection_attempts)
                .then(b.added.cmp(&a.added))
        });
        Ok(enabled.into_iter().map(|(address, _)| address.clone()).collect())
    }

    fn disabled_addresses(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .current()?
            .addresses_where(true)
            .into_iter()
            .map(|(address, _)| address.clone())
            .collect())
    }

    fn enable(&mut self, address: &str, added: DateTime<Utc>) -> Result<(), StoreError> {
        self.update(|doc| {
            doc.stations.insert(address.to_string(), StationRecord::new(added));
            Ok(())
        })
    }

    fn disable(&mut self, address: &str) -> Result<(), StoreError> {
        self.update(|doc| {
            doc.station_mut(address)?.disabled = true;
            Ok(())
        })
    }

    fn delete(&mut self, address: &str) -> Result<(), StoreError> {
        self.update(|doc| match doc.stations.remove(address) {
            Some(_) => Ok(()),
            None => Err(StoreError::UnknownStation(address.to_string())),
        })
    }

    fn get_limits(&self, address: &str) -> Result<BTreeMap<String, SensorLimits>, StoreError> {
        Ok(self
            .current()?
            .station(address)?
            .sensors
            .iter()
            .map(|(name, sensor)| (name.clone(), sensor.limits.clone()))
            .collect())
    }

    fn set_limits(
        &mut self,
        address: &str,
        sensor: &str,
        lower_limit: Option<f64>,
        upper_limit: Option<f64>,
        tripping_duration: Option<TimeDelta>,
    ) -> Result<(), StoreError> {
        self.update(|doc| {
            let record = doc
                .station_mut(address)?
                .sensors
                .get_mut(sensor)
                .ok_or_else(|| StoreError::UnknownSensor {
                    address: address.to_string(),
                    sensor: sensor.to_string(),
                })?;
            record.limits.lower_limit = lower_limit;
            record.limits.upper_limit = upper_limit;
            record.limits.tripping_duration = tripping_duration;
            Ok(())
        })
    }

    fn add_measurement(
        &mut self,
        address: &str,
        sensor: &str,
        unit: Option<&str>,
        timestamp: DateTime<Utc>,
        value: f64,
        alarm: Alarm,
    ) -> Result<(), StoreError> {
        self.update(|doc| {
            let id = doc.next_measurement_id;
            let station = doc.station_mut(address)?;
            let record = station.sensors.entry(sensor.to_string()).or_insert_with(|| SensorRecord {
                unit: unit.map(str::to_string),
                ..Default::default()
            });
            record.values.push(StoredValue { id, timestamp, value, alarm });
            if record.limits.contains(value) {
                record.limits.last_inside_limits = Some(timestamp);
            }
            station.mark_alive();
            doc.next_measurement_id += 1;
            Ok(())
        })
    }

    fn set_identifier(&mut self, address: &str, dip_id: u64) -> Result<(), StoreError> {
        self.update(|doc| {
            let station = doc.station_mut(address)?;
            station.dip_id = Some(dip_id);
            station.mark_alive();
            Ok(())
        })
    }

    fn record_failed_connection(&mut self, address: &str) -> Result<(), StoreError> {
        self.update(|doc| {
            let station = doc.station_mut(address)?;
            if station.connection_alive && station.failed_connection_attempts < MAX_FAILED_CONNECTION_ATTEMPTS {
                station.failed_connection_attempts += 1;
                station.connection_alive = station.failed_connection_attempts < MAX_FAILED_CONNECTION_ATTEMPTS;
            }
            Ok(())
        })
    }

    fn station_states(&self) -> Result<BTreeMap<String, StationState>, StoreError> {
        Ok(self
            .current()?
            .stations
            .iter()
            .map(|(address, station)| {
                let state = StationState {
                    connection_alive: station.connection_alive,
                    dip_id: station.dip_id,
                };
                (address.clone(), state)
            })
            .collect())
    }

    fn measurements(&self) -> Result<Vec<Measurement>, StoreError> {
        let doc = self.current()?;
        let mut all = Vec::new();
        for (address, station) in doc.addresses_where(false) {
            for (name, sensor) in &station.sensors {
                all.extend(sensor.values.iter().map(|v| Measurement {
                    id: v.id,
                    station: address.clone(),
                    sensor: name.clone(),
                    unit: sensor.unit.clone(),
                    timestamp: v.timestamp,
                    value: v.value,
                    alarm: v.alarm,
                }));
            }
        }
        all.sort_by_key(|m| m.id);
        Ok(all)
    }

    fn delete_measurements(&mut self, ids: &[u64]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.update(|doc| {
            for station in doc.stations.values_mut() {
                for sensor in station.sensors.values_mut() {
                    sensor.values.retain(|v| !ids.contains(&v.id));
                }
            }
            Ok(())
        })
    }
}
