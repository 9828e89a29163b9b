//! The six physical sensors of a station and how their readings are encoded

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::field::ScalarSpec;
use crate::gatt;

/// Physical quantity measured by one sensor service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SensorKind {
    #[serde(rename = "Earth Humidity")]
    EarthHumidity,
    #[serde(rename = "Air Humidity")]
    AirHumidity,
    #[serde(rename = "Air Pressure")]
    AirPressure,
    #[serde(rename = "Temperature")]
    Temperature,
    #[serde(rename = "Air Quality")]
    AirQuality,
    #[serde(rename = "Light Intensity")]
    LightIntensity,
}

impl SensorKind {
    pub const ALL: [SensorKind; 6] = [
        SensorKind::EarthHumidity,
        SensorKind::AirHumidity,
        SensorKind::AirPressure,
        SensorKind::Temperature,
        SensorKind::AirQuality,
        SensorKind::LightIntensity,
    ];

    /// Name used by the backend and the local store
    pub fn name(&self) -> &'static str {
        match self {
            SensorKind::EarthHumidity => "Earth Humidity",
            SensorKind::AirHumidity => "Air Humidity",
            SensorKind::AirPressure => "Air Pressure",
            SensorKind::Temperature => "Temperature",
            SensorKind::AirQuality => "Air Quality",
            SensorKind::LightIntensity => "Light Intensity",
        }
    }

    /// Service carrying the reading and the alarm characteristic
    pub fn service(&self) -> Uuid {
        match self {
            SensorKind::EarthHumidity => gatt::EARTH_HUMIDITY_SERVICE,
            SensorKind::AirHumidity => gatt::AIR_HUMIDITY_SERVICE,
            SensorKind::AirPressure => gatt::AIR_PRESSURE_SERVICE,
            SensorKind::Temperature => gatt::TEMPERATURE_SERVICE,
            SensorKind::AirQuality => gatt::AIR_QUALITY_SERVICE,
            SensorKind::LightIntensity => gatt::LIGHT_INTENSITY_SERVICE,
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SensorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SensorKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| format!("unknown sensor: {s}"))
    }
}

/// How a reading characteristic is decoded, and in which unit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorEntry {
    pub spec: ScalarSpec,
    pub unit: &'static str,
}

/// Reading characteristics keyed by short id.
///
/// Built once at startup and only ever read afterwards; share it behind an
/// `Arc` between sessions.
#[derive(Debug, Clone)]
pub struct SensorRegistry {
    entries: HashMap<&'static str, SensorEntry>,
}

impl SensorRegistry {
    /// The characteristics stations are known to expose
    pub fn standard() -> Self {
        // (short id, multiplier, decimal exp, binary exp, bytes, min, max, unit)
        let table: [(&'static str, i8, i32, i32, usize, Option<f64>, Option<f64>, &'static str); 5] = [
            ("2a6f", 1, -2, 0, 2, Some(0.0), Some(100.0), "%"),
            ("2a6d", 1, -1, 0, 4, None, None, "Pa"),
            ("2b0d", 1, 0, -1, 1, Some(-64.0), Some(63.0), "°C"),
            ("2b04", 1, 0, -1, 1, Some(0.0), Some(100.0), "%"),
            ("2aff", 1, 0, 0, 2, Some(0.0), Some(65534.0), "lm"),
        ];

        let entries = table
            .into_iter()
            .map(|(id, multiplier, dec, bin, bytes, min, max, unit)| {
                let spec = ScalarSpec::bounded(multiplier, dec, bin, bytes, min, max)
                    .expect("invalid built-in scalar spec");
                (id, SensorEntry { spec, unit })
            })
            .collect();

        Self { entries }
    }

    /// Looks up a characteristic by short id or full UUID string
    pub fn get(&self, characteristic: &str) -> Option<&SensorEntry> {
        self.entries.get(gatt::short_id(characteristic))
    }

    pub fn unit(&self, characteristic: &str) -> Option<&'static str> {
        self.get(characteristic).map(|entry| entry.unit)
    }

    pub fn contains(&self, characteristic: &str) -> bool {
        self.get(characteristic).is_some()
    }
}

impl Default for SensorRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
