use station_proto::{CodecError, SensorKind};

use crate::link::LinkError;

/// Why a single characteristic access failed
#[derive(thiserror::Error, Debug)]
pub enum AccessError {
    /// Service or characteristic missing on the station; never retried
    #[error("{0}")]
    Structural(String),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(thiserror::Error, Debug)]
pub enum StationError {
    #[error("station is not connected")]
    NoConnection,

    #[error("unable to connect to station {address}: {source}")]
    Connect { address: String, source: LinkError },

    #[error("unable to read {what}: {source}")]
    Read { what: String, source: AccessError },

    #[error("unable to write {what}: {source}")]
    Write { what: String, source: AccessError },

    #[error("unit of sensor {0} is not known yet, read the sensor data first")]
    UnitUnknown(SensorKind),

    #[error("unable to scan for sensor stations: {0}")]
    Scan(#[source] LinkError),
}

impl StationError {
    /// Whether the failure came from the radio link rather than the station's content
    pub fn is_connection_failure(&self) -> bool {
        match self {
            StationError::NoConnection | StationError::Connect { .. } | StationError::Scan(_) => true,
            StationError::Read { source, .. } | StationError::Write { source, .. } => {
                matches!(source, AccessError::Link(_))
            }
            StationError::UnitUnknown(_) => false,
        }
    }
}
