//! Access point for plant health sensor stations
//!
//! Adopts stations found over BLE, collects their readings into the local
//! store, pushes alarms back and locks stations that were given up.

pub mod collect;
pub mod config;
pub mod find;
pub mod gateway;
pub mod lock;
pub mod logging;
pub mod scheduler;

pub use collect::alarms_for;
pub use config::{Config, ConfigError, access_point_home};
pub use find::FoundStation;
pub use gateway::{Gateway, ProcedureError};
pub use scheduler::{run, run_until};
