//! The access point main loop

use std::future::Future;

use station_ble::{Connector, Scanner};
use station_store::StationStore;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info};

use crate::config::Config;
use crate::find::FoundStation;
use crate::gateway::Gateway;

impl<R, S> Gateway<R, S>
where
    R: Connector + Scanner,
    S: StationStore,
{
    /// One pass: search if asked to, then lock and collect
    pub async fn run_pass(&mut self, config: &mut Config) -> Vec<FoundStation> {
        let mut found = Vec::new();
        if config.scan_active {
            match self.find_stations().await {
                Ok(stations) => {
                    for station in &stations {
                        info!(address = %station.address, dip_id = station.dip_id, "sensor station available");
                    }
                    found = stations;
                }
                Err(e) => error!(error = %e, "search for sensor stations failed"),
            }
            config.scan_active = false;
        }
        self.lock_stations().await;
        self.collect_data().await;
        found
    }
}

/// Runs passes every `collect_interval` until `shutdown` resolves.
///
/// A pass in progress when `shutdown` resolves is finished first, so no
/// station session is cut off halfway.
pub async fn run_until<R, S>(gateway: &mut Gateway<R, S>, config: &mut Config, shutdown: impl Future<Output = ()>)
where
    R: Connector + Scanner,
    S: StationStore,
{
    let mut ticker = interval(config.collect_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    info!(room = %config.room_name, every = ?config.collect_interval, "access point running");
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        let pass = gateway.run_pass(config);
        tokio::pin!(pass);
        tokio::select! {
            biased;
            _ = &mut pass => {}
            _ = &mut shutdown => {
                info!("finishing the current pass before stopping");
                pass.await;
                break;
            }
        }
    }
    info!("access point stopped");
}

/// Runs until Ctrl-C
pub async fn run<R, S>(gateway: &mut Gateway<R, S>, config: &mut Config)
where
    R: Connector + Scanner,
    S: StationStore,
{
    run_until(gateway, config, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "unable to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        info!("received Ctrl-C, shutting down");
    })
    .await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use chrono::Utc;
    use station_ble::mock::{MockConnector, MockLink};
    use station_proto::gatt::{self, sig_uuid};
    use station_store::JsonStore;

    fn config() -> Config {
        Config { collect_interval: Duration::from_secs(1), ..Config::default() }
    }

    #[tokio::test]
    async fn pass_searches_once_when_asked() {
        let mut config = Config { scan_active: true, ..config() };
        let mut gateway = Gateway::new(MockConnector::new(), JsonStore::in_memory(), &config);
        gateway.radio.add(MockLink::station("aa:01"));
        gateway.radio.advertise("SensorStation", "aa:01");

        let found = gateway.run_pass(&mut config).await;
        assert_eq!(found.len(), 1);
        assert!(!config.scan_active);

        let found = gateway.run_pass(&mut config).await;
        assert!(found.is_empty());
        assert_eq!(gateway.radio.attempts("aa:01"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn collects_every_interval_until_shutdown() {
        let mut config = config();
        let mut store = JsonStore::in_memory();
        store.enable("aa:01", Utc::now()).unwrap();
        let mut gateway = Gateway::new(MockConnector::new(), store, &config);
        let link = gateway.radio.add(MockLink::station("aa:01"));

        run_until(&mut gateway, &mut config, tokio::time::sleep(Duration::from_millis(2500))).await;

        // ticks at 0s, 1s and 2s
        assert_eq!(gateway.radio.attempts("aa:01"), 3);
        assert_eq!(link.disconnects(), 3);
        // battery on every visit, sensor data once
        assert_eq!(gateway.store().measurements().unwrap().len(), 9);
    }

    #[tokio::test]
    async fn stops_immediately_on_shutdown() {
        let mut config = config();
        let mut gateway = Gateway::new(MockConnector::new(), JsonStore::in_memory(), &config);
        run_until(&mut gateway, &mut config, async {}).await;
        assert!(gateway.store().known_addresses().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_the_running_pass() {
        let mut config = config();
        let mut store = JsonStore::in_memory();
        store.enable("aa:01", Utc::now()).unwrap();
        let mut gateway = Gateway::new(MockConnector::new(), store, &config);
        let link = gateway.radio.add(MockLink::station("aa:01"));
        link.set_latency(Duration::from_millis(100));

        run_until(&mut gateway, &mut config, tokio::time::sleep(Duration::from_millis(250))).await;

        assert_eq!(gateway.radio.attempts("aa:01"), 1);
        assert_eq!(link.disconnects(), 1);
        assert_eq!(gateway.store().measurements().unwrap().len(), 7);
        assert_eq!(link.value(gatt::DATA_READ_SERVICE, sig_uuid(0x2ae2)), Some(vec![1]));
    }
}
