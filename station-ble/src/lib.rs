//! Station BLE client
//!
//! Talks to plant health sensor stations over GATT: reads the DIP id, the
//! lock flags, sensor readings and battery state, and writes alarms back.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use station_ble::{BtleConnector, RetryPolicy, Timeouts, with_station};
//! use station_proto::SensorRegistry;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connector = BtleConnector::new(Timeouts::default()).await?;
//!     let registry = Arc::new(SensorRegistry::standard());
//!
//!     let data = with_station(&connector, "AA:BB:CC:DD:EE:FF", registry, RetryPolicy::default(), async |station| {
//!         station.sensor_data().await
//!     })
//!     .await?;
//!     for (sensor, value) in &data {
//!         println!("{sensor}: {value}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod btle;
pub mod discovery;
pub mod error;
pub mod link;
pub mod retry;
pub mod station;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use btle::{BtleConnector, BtleLink, Timeouts};
pub use discovery::{filter_candidates, scan_for_new_stations};
pub use error::{AccessError, StationError};
pub use link::{Advertisement, Connector, FailureKind, GattLink, LinkError, Scanner};
pub use retry::RetryPolicy;
pub use station::{Station, with_station};
