//! Scripted stations for tests without a radio
//!
//! A [`MockLink`] holds characteristic values in memory and can be told to
//! fail the next accesses of a characteristic. Clones share state, so a test
//! can keep a handle and inspect what a procedure wrote after the session
//! closed.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use station_proto::gatt::{self, sig_uuid};
use station_proto::SensorKind;
use uuid::Uuid;

use crate::link::{Advertisement, Connector, GattCharacteristic, GattLink, GattService, LinkError, Scanner};

type Key = (Uuid, Uuid);

#[derive(Debug, Default)]
struct LinkState {
    connected: bool,
    values: HashMap<Key, Vec<u8>>,
    faults: HashMap<Key, VecDeque<LinkError>>,
    reads: HashMap<Key, usize>,
    writes: HashMap<Key, usize>,
    disconnects: usize,
    latency: Duration,
}

#[derive(Debug, Clone)]
pub struct MockLink {
    address: String,
    services: Vec<GattService>,
    state: Arc<Mutex<LinkState>>,
}

impl MockLink {
    /// A connected link without any services
    pub fn new(address: &str) -> Self {
        let state = LinkState { connected: true, ..Default::default() };
        Self {
            address: address.to_string(),
            services: Vec::new(),
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Adds a characteristic, creating its service on first use
    pub fn with_characteristic(mut self, service: Uuid, characteristic: Uuid, value: &[u8]) -> Self {
        match self.services.iter_mut().find(|s| s.uuid == service) {
            Some(s) => s.characteristics.push(GattCharacteristic { uuid: characteristic }),
            None => self.services.push(GattService {
                uuid: service,
                characteristics: vec![GattCharacteristic { uuid: characteristic }],
            }),
        }
        self.state().values.insert((service, characteristic), value.to_vec());
        self
    }

    /// A station as shipped: DIP id 101, unlocked, new data available,
    /// battery at 70 % and sensor readings 1.0 to 6.0 in service order.
    pub fn station(address: &str) -> Self {
        let identifier = sig_uuid(0x2a9a);
        let flag = sig_uuid(0x2ae2);
        let mut link = Self::new(address)
            .with_characteristic(gatt::INFO_SERVICE, sig_uuid(0x2bed), &[0b0000_0010, 0x00, 0x00, 70])
            .with_characteristic(gatt::INFO_SERVICE, identifier, &[101])
            .with_characteristic(gatt::INFO_SERVICE, flag, &[1])
            .with_characteristic(gatt::DATA_READ_SERVICE, flag, &[0]);

        let readings: [(SensorKind, u16, Vec<u8>); 6] = [
            (SensorKind::EarthHumidity, 0x2a6f, 100u16.to_le_bytes().to_vec()),
            (SensorKind::AirHumidity, 0x2a6f, 200u16.to_le_bytes().to_vec()),
            (SensorKind::AirPressure, 0x2a6d, 30u32.to_le_bytes().to_vec()),
            (SensorKind::Temperature, 0x2b0d, vec![8]),
            (SensorKind::AirQuality, 0x2b04, vec![10]),
            (SensorKind::LightIntensity, 0x2aff, 6u16.to_le_bytes().to_vec()),
        ];
        for (kind, short, raw) in readings {
            link = link
                .with_characteristic(kind.service(), sig_uuid(short), &raw)
                .with_characteristic(kind.service(), identifier, &[1]);
        }
        link
    }

    /// Queues a failure for the next access of a characteristic
    pub fn fail_next(&self, service: Uuid, characteristic: Uuid, error: LinkError) {
        self.state()
            .faults
            .entry((service, characteristic))
            .or_default()
            .push_back(error);
    }

    pub fn value(&self, service: Uuid, characteristic: Uuid) -> Option<Vec<u8>> {
        self.state().values.get(&(service, characteristic)).cloned()
    }

    pub fn set_value(&self, service: Uuid, characteristic: Uuid, value: &[u8]) {
        self.state().values.insert((service, characteristic), value.to_vec());
    }

    pub fn reads(&self, service: Uuid, characteristic: Uuid) -> usize {
        self.state().reads.get(&(service, characteristic)).copied().unwrap_or(0)
    }

    pub fn writes(&self, service: Uuid, characteristic: Uuid) -> usize {
        self.state().writes.get(&(service, characteristic)).copied().unwrap_or(0)
    }

    pub fn disconnects(&self) -> usize {
        self.state().disconnects
    }

    pub fn set_connected(&self, connected: bool) {
        self.state().connected = connected;
    }

    /// Makes every read and write take `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    async fn respond(&self) {
        let latency = self.state().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn state(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn access(&self, key: Key) -> Result<(), LinkError> {
        let mut state = self.state();
        if !state.connected {
            return Err(LinkError::fast("not connected"));
        }
        if let Some(error) = state.faults.get_mut(&key).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        if !state.values.contains_key(&key) {
            return Err(LinkError::slow(format!("no characteristic {} on {}", key.1, key.0)));
        }
        Ok(())
    }
}

#[async_trait]
impl GattLink for MockLink {
    fn address(&self) -> &str {
        &self.address
    }

    async fn is_connected(&self) -> bool {
        self.state().connected
    }

    fn services(&self) -> Vec<GattService> {
        self.services.clone()
    }

    async fn read(&self, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>, LinkError> {
        let key = (service, characteristic);
        *self.state().reads.entry(key).or_default() += 1;
        self.respond().await;
        self.access(key)?;
        Ok(self.state().values.get(&key).cloned().unwrap_or_default())
    }

    async fn write(&self, service: Uuid, characteristic: Uuid, data: &[u8]) -> Result<(), LinkError> {
        let key = (service, characteristic);
        *self.state().writes.entry(key).or_default() += 1;
        self.respond().await;
        self.access(key)?;
        self.state().values.insert(key, data.to_vec());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        let mut state = self.state();
        state.connected = false;
        state.disconnects += 1;
        Ok(())
    }
}

/// Hands out registered [`MockLink`]s by address and reports scripted advertisements
#[derive(Debug, Default)]
pub struct MockConnector {
    stations: Mutex<HashMap<String, MockLink>>,
    faults: Mutex<HashMap<String, VecDeque<LinkError>>>,
    attempts: Mutex<HashMap<String, usize>>,
    advertisements: Mutex<Vec<Advertisement>>,
    scan_fault: Mutex<Option<LinkError>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a station and returns a handle sharing its state
    pub fn add(&self, link: MockLink) -> MockLink {
        lock(&self.stations).insert(link.address.clone(), link.clone());
        link
    }

    pub fn fail_next_connect(&self, address: &str, error: LinkError) {
        lock(&self.faults).entry(address.to_string()).or_default().push_back(error);
    }

    pub fn attempts(&self, address: &str) -> usize {
        lock(&self.attempts).get(address).copied().unwrap_or(0)
    }

    /// Makes the next scans report a device
    pub fn advertise(&self, name: &str, address: &str) {
        lock(&self.advertisements).push(Advertisement {
            name: name.to_string(),
            address: address.to_string(),
        });
    }

    pub fn fail_scans(&self, error: LinkError) {
        *lock(&self.scan_fault) = Some(error);
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Link = MockLink;

    async fn connect(&self, address: &str) -> Result<MockLink, LinkError> {
        *lock(&self.attempts).entry(address.to_string()).or_default() += 1;
        if let Some(error) = lock(&self.faults).get_mut(address).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        let link = lock(&self.stations)
            .get(address)
            .cloned()
            .ok_or_else(|| LinkError::slow(format!("device {address} not found")))?;
        link.set_connected(true);
        Ok(link)
    }
}

#[async_trait]
impl Scanner for MockConnector {
    async fn passive_scan(&self, _duration: Duration) -> Result<Vec<Advertisement>, LinkError> {
        if let Some(error) = lock(&self.scan_fault).clone() {
            return Err(error);
        }
        Ok(lock(&self.advertisements).clone())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
