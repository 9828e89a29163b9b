//! Looking for stations that are not managed yet

use std::collections::HashSet;

use serde::Serialize;
use station_ble::{Connector, Scanner, scan_for_new_stations, with_station};
use station_store::StationStore;
use tracing::{info, warn};

use crate::gateway::{Gateway, ProcedureError};

/// A station that may be adopted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FoundStation {
    pub address: String,
    pub dip_id: u64,
}

impl<R, S> Gateway<R, S>
where
    R: Connector + Scanner,
    S: StationStore,
{
    /// Scans for unmanaged stations and reads their DIP switch ids.
    ///
    /// Candidates that cannot be read are left out; only a failed scan or
    /// store access fails the whole search.
    pub async fn find_stations(&mut self) -> Result<Vec<FoundStation>, ProcedureError> {
        info!(name = %self.station_name, "searching for new sensor stations");
        let known: HashSet<String> = self.store.known_addresses()?.into_iter().collect();
        let candidates = scan_for_new_stations(&self.radio, &known, &self.station_name, self.scan_duration).await?;

        let mut found = Vec::with_capacity(candidates.len());
        for address in candidates {
            let dip_id = with_station(&self.radio, &address, self.registry.clone(), self.retry, async |station| {
                station.dip_id().await
            })
            .await;
            match dip_id {
                Ok(dip_id) => found.push(FoundStation { address, dip_id }),
                Err(e) => warn!(%address, error = %e, "unable to identify sensor station"),
            }
        }

        // someone may have adopted a station while we were reading the others
        let known = self.store.known_addresses()?;
        found.retain(|station| !known.contains(&station.address));
        info!(stations = found.len(), "search finished");
        Ok(found)
    }
}
