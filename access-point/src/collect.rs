//! Collecting readings from managed stations

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use station_ble::{Connector, GattLink, Scanner, Station, with_station};
use station_proto::{Alarm, SensorKind, SensorLimits, decide_alarm};
use station_store::{BATTERY_SENSOR, StationStore};
use tracing::{error, info, warn};

use crate::gateway::{Gateway, ProcedureError};

/// Alarm for every reading; sensors without stored limits get none
pub fn alarms_for(
    values: &BTreeMap<SensorKind, f64>,
    limits: &BTreeMap<String, SensorLimits>,
    now: DateTime<Utc>,
) -> BTreeMap<SensorKind, Alarm> {
    values
        .iter()
        .map(|(kind, value)| {
            let alarm = limits
                .get(kind.name())
                .map_or(Alarm::None, |limits| decide_alarm(*value, limits, now));
            (*kind, alarm)
        })
        .collect()
}

impl<R, S> Gateway<R, S>
where
    R: Connector + Scanner,
    S: StationStore,
{
    /// Visits every enabled station once
    pub async fn collect_data(&mut self) {
        info!("collecting data from known sensor stations");
        let addresses = match self.store.known_addresses() {
            Ok(addresses) => addresses,
            Err(e) => {
                error!(error = %e, "unable to load known sensor stations");
                return;
            }
        };
        if addresses.is_empty() {
            info!("no sensor stations assigned");
            return;
        }

        for address in addresses {
            // stations may have been disabled while we were busy with the previous ones
            match self.store.known_addresses() {
                Ok(known) if known.contains(&address) => {}
                Ok(_) => continue,
                Err(e) => {
                    error!(error = %e, "unable to load known sensor stations");
                    return;
                }
            }

            if let Err(e) = self.collect_from_station(&address).await {
                error!(address, error = %e, "unable to collect data from sensor station");
                if e.is_connection_failure() {
                    if let Err(e) = self.store.record_failed_connection(&address) {
                        error!(address, error = %e, "unable to record failed connection");
                    }
                }
            }
        }
    }

    /// One session: unlock, identify, battery, then new data if any and alarms
    pub async fn collect_from_station(&mut self, address: &str) -> Result<(), ProcedureError> {
        info!(address, "connecting to sensor station");
        let Self { radio, store, registry, retry, .. } = self;

        with_station(&*radio, address, registry.clone(), *retry, async |station| {
            station.set_unlocked(true).await?;
            let dip_id = station.dip_id().await?;
            store.set_identifier(address, dip_id)?;
            record_battery(store, station, Utc::now()).await;

            if station.sensor_data_read().await? {
                info!(address, "no new sensor data available");
                return Ok(());
            }

            let values = station.sensor_data().await?;
            info!(address, sensors = values.len(), "read sensor data");
            let now = Utc::now();
            let alarms = alarms_for(&values, &store.get_limits(address)?, now);
            record_measurements(store, station, &values, &alarms, now);

            station.set_sensor_data_read(true).await?;
            station.set_alarms(&alarms).await?;
            Ok(())
        })
        .await
    }
}

fn record_measurements<S: StationStore, L: GattLink>(
    store: &mut S,
    station: &Station<L>,
    values: &BTreeMap<SensorKind, f64>,
    alarms: &BTreeMap<SensorKind, Alarm>,
    now: DateTime<Utc>,
) {
    let address = station.address();
    for (kind, value) in values {
        let unit = station.sensor_unit(*kind).ok();
        let alarm = alarms.get(kind).copied().unwrap_or_default();
        if let Err(e) = store.add_measurement(address, kind.name(), unit, now, *value, alarm) {
            error!(address, sensor = %kind, error = %e, "unable to store measurement");
        }
    }
}

async fn record_battery<S: StationStore, L: GattLink>(store: &mut S, station: &Station<L>, now: DateTime<Utc>) {
    let address = station.address();
    match station.battery_level().await {
        Ok(Some(level)) => {
            if let Err(e) = store.add_measurement(address, BATTERY_SENSOR, Some("%"), now, f64::from(level), Alarm::None) {
                error!(address, error = %e, "unable to store battery level");
            }
        }
        Ok(None) => info!(address, "sensor station did not provide a battery level"),
        Err(e) => warn!(address, error = %e, "unable to read battery level"),
    }
}
