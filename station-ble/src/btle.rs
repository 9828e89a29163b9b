//! btleplug-backed links
//!
//! Connects to stations through the host's first Bluetooth adapter. All
//! radio operations run under a timeout; a timeout counts as a slow failure.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tracing::debug;
use uuid::Uuid;

use crate::link::{Advertisement, Connector, GattCharacteristic, GattLink, GattService, LinkError, Scanner};

/// Timeouts for radio operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub io: Duration,
    /// How long to listen for a station not seen by the adapter yet
    pub lookup: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            io: Duration::from_secs(5),
            lookup: Duration::from_secs(5),
        }
    }
}

/// Maps a btleplug failure onto the retry buckets.
///
/// Stack hiccups (lost connection, unexpected callbacks, D-Bus and runtime
/// errors) clear up within moments. Missing devices, permission problems
/// and timeouts do not.
pub fn classify(error: btleplug::Error) -> LinkError {
    use btleplug::Error;

    match error {
        Error::NotConnected | Error::UnexpectedCallback | Error::RuntimeError(_) | Error::Other(_) => {
            LinkError::fast(error.to_string())
        }
        _ => LinkError::slow(error.to_string()),
    }
}

/// Get the default Bluetooth adapter
pub async fn get_adapter() -> Result<Adapter, LinkError> {
    let manager = Manager::new().await.map_err(classify)?;
    let adapters = manager.adapters().await.map_err(classify)?;
    adapters
        .into_iter()
        .next()
        .ok_or_else(|| LinkError::slow("no Bluetooth adapter found"))
}

async fn timed<T, F>(limit: Duration, what: &str, op: F) -> Result<T, LinkError>
where
    F: Future<Output = Result<T, btleplug::Error>>,
{
    match tokio::time::timeout(limit, op).await {
        Ok(result) => result.map_err(classify),
        Err(_) => Err(LinkError::slow(format!("{what} timed out after {limit:?}"))),
    }
}

/// Passes `result` through, running `release` first when it failed
async fn released_on_error<T>(
    result: Result<T, LinkError>,
    release: impl AsyncFnOnce() -> Result<(), LinkError>,
) -> Result<T, LinkError> {
    if let Err(e) = &result {
        debug!(error = %e, "releasing half open connection");
        if let Err(e) = release().await {
            debug!(error = %e, "unable to release connection");
        }
    }
    result
}

/// Opens [`BtleLink`]s and runs passive scans on one adapter
pub struct BtleConnector {
    adapter: Adapter,
    timeouts: Timeouts,
}

impl BtleConnector {
    pub async fn new(timeouts: Timeouts) -> Result<Self, LinkError> {
        Ok(Self { adapter: get_adapter().await?, timeouts })
    }

    async fn find_peripheral(&self, address: &str) -> Result<Option<Peripheral>, LinkError> {
        let peripherals = self.adapter.peripherals().await.map_err(classify)?;
        Ok(peripherals
            .into_iter()
            .find(|p| p.address().to_string().eq_ignore_ascii_case(address)))
    }

    async fn listen(&self, duration: Duration) -> Result<(), LinkError> {
        self.adapter.start_scan(ScanFilter::default()).await.map_err(classify)?;
        tokio::time::sleep(duration).await;
        self.adapter.stop_scan().await.map_err(classify)
    }
}

#[async_trait]
impl Connector for BtleConnector {
    type Link = BtleLink;

    async fn connect(&self, address: &str) -> Result<BtleLink, LinkError> {
        let peripheral = match self.find_peripheral(address).await? {
            Some(p) => p,
            None => {
                debug!(address, "station not seen yet, listening");
                self.listen(self.timeouts.lookup).await?;
                self.find_peripheral(address)
                    .await?
                    .ok_or_else(|| LinkError::slow(format!("device {address} not found")))?
            }
        };

        let established = async {
            timed(self.timeouts.connect, "connect", peripheral.connect()).await?;
            timed(self.timeouts.io, "service discovery", peripheral.discover_services()).await
        }
        .await;
        // BlueZ may hold the connection even though we gave up on it
        released_on_error(established, async || {
            timed(self.timeouts.io, "disconnect", peripheral.disconnect()).await
        })
        .await?;

        Ok(BtleLink {
            address: address.to_string(),
            peripheral,
            io_timeout: self.timeouts.io,
        })
    }
}

#[async_trait]
impl Scanner for BtleConnector {
    async fn passive_scan(&self, duration: Duration) -> Result<Vec<Advertisement>, LinkError> {
        self.listen(duration).await?;

        let mut found = Vec::new();
        for peripheral in self.adapter.peripherals().await.map_err(classify)? {
            if let Some(props) = peripheral.properties().await.map_err(classify)? {
                found.push(Advertisement {
                    name: props.local_name.unwrap_or_default(),
                    address: peripheral.address().to_string(),
                });
            }
        }
        Ok(found)
    }
}

/// A connected btleplug peripheral
pub struct BtleLink {
    address: String,
    peripheral: Peripheral,
    io_timeout: Duration,
}

impl BtleLink {
    fn characteristic(&self, service: Uuid, characteristic: Uuid) -> Result<btleplug::api::Characteristic, LinkError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.service_uuid == service && c.uuid == characteristic)
            .ok_or_else(|| LinkError::slow(format!("characteristic {characteristic} not found on service {service}")))
    }
}

#[async_trait]
impl GattLink for BtleLink {
    fn address(&self) -> &str {
        &self.address
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    fn services(&self) -> Vec<GattService> {
        self.peripheral
            .services()
            .into_iter()
            .map(|service| GattService {
                uuid: service.uuid,
                characteristics: service
                    .characteristics
                    .into_iter()
                    .map(|c| GattCharacteristic { uuid: c.uuid })
                    .collect(),
            })
            .collect()
    }

    async fn read(&self, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>, LinkError> {
        let c = self.characteristic(service, characteristic)?;
        timed(self.io_timeout, "read", self.peripheral.read(&c)).await
    }

    async fn write(&self, service: Uuid, characteristic: Uuid, data: &[u8]) -> Result<(), LinkError> {
        let c = self.characteristic(service, characteristic)?;
        timed(self.io_timeout, "write", self.peripheral.write(&c, data, WriteType::WithResponse)).await
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        timed(self.io_timeout, "disconnect", self.peripheral.disconnect()).await
    }
}
