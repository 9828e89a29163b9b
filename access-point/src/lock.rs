//! Releasing stations the user disabled

use station_ble::{Connector, Scanner, with_station};
use station_store::StationStore;
use tracing::{error, info};

use crate::gateway::Gateway;

impl<R, S> Gateway<R, S>
where
    R: Connector + Scanner,
    S: StationStore,
{
    /// Forgets every disabled station and locks it again, so another
    /// access point may adopt it.
    ///
    /// The station is removed from the store even if it cannot be reached.
    pub async fn lock_stations(&mut self) {
        let addresses = match self.store.disabled_addresses() {
            Ok(addresses) => addresses,
            Err(e) => {
                error!(error = %e, "unable to load disabled sensor stations");
                return;
            }
        };

        for address in addresses {
            info!(%address, "locking sensor station");
            if let Err(e) = self.store.delete(&address) {
                error!(%address, error = %e, "unable to remove sensor station");
                continue;
            }
            let locked = with_station(&self.radio, &address, self.registry.clone(), self.retry, async |station| {
                station.set_unlocked(false).await
            })
            .await;
            if let Err(e) = locked {
                error!(%address, error = %e, "unable to lock sensor station");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use chrono::Utc;
    use station_ble::LinkError;
    use station_ble::mock::{MockConnector, MockLink};
    use station_proto::gatt::{self, sig_uuid};
    use station_store::JsonStore;

    fn gateway(addresses: &[&str]) -> (Gateway<MockConnector, JsonStore>, Vec<MockLink>) {
        let radio = MockConnector::new();
        let mut store = JsonStore::in_memory();
        let links = addresses
            .iter()
            .map(|address| {
                store.enable(address, Utc::now()).unwrap();
                radio.add(MockLink::station(address))
            })
            .collect();
        (Gateway::new(radio, store, &Config::default()), links)
    }

    #[tokio::test]
    async fn locks_and_forgets_disabled_stations() {
        let (mut gateway, links) = gateway(&["aa:01", "aa:02"]);
        gateway.store_mut().disable("aa:01").unwrap();
        gateway.lock_stations().await;

        assert_eq!(gateway.store().known_addresses().unwrap(), vec!["aa:02"]);
        assert!(gateway.store().disabled_addresses().unwrap().is_empty());
        assert_eq!(links[0].value(gatt::INFO_SERVICE, sig_uuid(0x2ae2)), Some(vec![0]));
        assert_eq!(links[0].disconnects(), 1);
        assert_eq!(links[1].value(gatt::INFO_SERVICE, sig_uuid(0x2ae2)), Some(vec![1]));
        assert_eq!(gateway.radio.attempts("aa:02"), 0);
    }

    #[tokio::test]
    async fn unreachable_station_is_still_forgotten() {
        let (mut gateway, _) = gateway(&["aa:01"]);
        gateway.store_mut().disable("aa:01").unwrap();
        gateway.radio.fail_next_connect("aa:01", LinkError::slow("timed out"));
        gateway.lock_stations().await;

        assert!(gateway.store().station_states().unwrap().is_empty());
        assert_eq!(gateway.radio.attempts("aa:01"), 1);
    }
}
