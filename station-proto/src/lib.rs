//! Sensor station wire protocol - GATT field codec, sensor registry and alarm rules
//!
//! Everything in this crate is pure: no I/O, no async. The BLE client in
//! `station-ble` uses it to turn characteristic payloads into physical values
//! and back.

pub mod alarm;
pub mod battery;
pub mod field;
pub mod gatt;
pub mod sensor;

pub use alarm::{Alarm, SensorLimits, decide_alarm};
pub use battery::battery_level;
pub use field::{FieldSpec, FieldValue, ScalarSpec};
pub use gatt::short_id;
pub use sensor::{SensorEntry, SensorKind, SensorRegistry};

/// Errors raised while encoding or decoding a characteristic payload
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    /// Payload bytes do not form a valid value for the field
    #[error("cannot decode payload: {0}")]
    Decode(String),

    /// The value cannot be represented by the field
    #[error("cannot encode value: {0}")]
    Encode(String),

    /// Represented value lies outside the configured bounds
    #[error("value {value} outside allowed range [{}, {}]", bound(.min), bound(.max))]
    Range {
        value: f64,
        min: Option<f64>,
        max: Option<f64>,
    },

    /// The field specification itself is malformed
    #[error("invalid field specification: {0}")]
    InvalidSpec(String),
}

fn bound(b: &Option<f64>) -> String {
    match b {
        Some(v) => v.to_string(),
        None => "-".to_string(),
    }
}
