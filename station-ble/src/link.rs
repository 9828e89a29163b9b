//! Transport seams between the station client and the radio
//!
//! [`GattLink`] is one live connection, [`Connector`] produces them and
//! [`Scanner`] lists advertising devices. The btleplug implementations live
//! in [`crate::btle`]; scripted ones for tests in `crate::mock`.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

/// Which retry bucket a transport failure falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Resolves quickly, worth another attempt
    Fast,
    /// Costly (timeouts, missing device), never retried
    Slow,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Fast => f.write_str("fast"),
            FailureKind::Slow => f.write_str("slow"),
        }
    }
}

/// A failure reported by the transport, tagged with its bucket
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} ({kind} failure)")]
pub struct LinkError {
    pub kind: FailureKind,
    pub message: String,
}

impl LinkError {
    pub fn fast(message: impl Into<String>) -> Self {
        Self { kind: FailureKind::Fast, message: message.into() }
    }

    pub fn slow(message: impl Into<String>) -> Self {
        Self { kind: FailureKind::Slow, message: message.into() }
    }

    pub fn is_fast(&self) -> bool {
        self.kind == FailureKind::Fast
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

/// Name and address of an advertising device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub name: String,
    pub address: String,
}

/// One connected peripheral.
///
/// Characteristics are addressed by service and characteristic id together,
/// since the same characteristic id appears under several services.
#[async_trait]
pub trait GattLink: Send + Sync {
    fn address(&self) -> &str;

    async fn is_connected(&self) -> bool;

    /// Services discovered when the link was established
    fn services(&self) -> Vec<GattService>;

    async fn read(&self, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>, LinkError>;

    async fn write(&self, service: Uuid, characteristic: Uuid, data: &[u8]) -> Result<(), LinkError>;

    async fn disconnect(&self) -> Result<(), LinkError>;
}

/// Opens links to stations by address
#[async_trait]
pub trait Connector: Send + Sync {
    type Link: GattLink + 'static;

    async fn connect(&self, address: &str) -> Result<Self::Link, LinkError>;
}

#[async_trait]
pub trait Scanner: Send + Sync {
    /// Listens for advertisements for `duration`.
    ///
    /// Hardware problems are errors, not an empty result.
    async fn passive_scan(&self, duration: Duration) -> Result<Vec<Advertisement>, LinkError>;
}
