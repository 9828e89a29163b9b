//! The radio, the store and the shared decoding tables in one place

use std::sync::Arc;
use std::time::Duration;

use station_ble::{Connector, RetryPolicy, Scanner, StationError};
use station_proto::SensorRegistry;
use station_store::{StationStore, StoreError};

use crate::config::Config;

/// Failure of one station interaction inside a procedure
#[derive(thiserror::Error, Debug)]
pub enum ProcedureError {
    #[error(transparent)]
    Station(#[from] StationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProcedureError {
    /// Whether the station could not be reached, as opposed to misbehaving
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, ProcedureError::Station(e) if e.is_connection_failure())
    }
}

/// Runs the station procedures. Stations are visited one at a time.
pub struct Gateway<R, S> {
    pub(crate) radio: R,
    pub(crate) store: S,
    pub(crate) registry: Arc<SensorRegistry>,
    pub(crate) retry: RetryPolicy,
    pub(crate) station_name: String,
    pub(crate) scan_duration: Duration,
}

impl<R, S> Gateway<R, S>
where
    R: Connector + Scanner,
    S: StationStore,
{
    pub fn new(radio: R, store: S, config: &Config) -> Self {
        Self {
            radio,
            store,
            registry: Arc::new(SensorRegistry::standard()),
            retry: config.retry_policy(),
            station_name: config.station_name.clone(),
            scan_duration: config.scan_duration,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }
}
