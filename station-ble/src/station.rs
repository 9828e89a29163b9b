//! Connected session with one sensor station

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use station_proto::field::{self, FieldSpec, FieldValue};
use station_proto::gatt::{self, short_id_of};
use station_proto::{Alarm, SensorKind, SensorRegistry};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AccessError, StationError};
use crate::link::{Connector, GattLink, LinkError};
use crate::retry::RetryPolicy;

/// A station behind a live link.
///
/// Only obtainable from a connected link via [`Station::open`]; every
/// operation still checks the link before touching it, since the station
/// may drop the connection at any time.
pub struct Station<L: GattLink> {
    link: Arc<L>,
    registry: Arc<SensorRegistry>,
    retry: RetryPolicy,
    /// Reading characteristic per sensor, learned by a successful read
    learned: HashMap<SensorKind, Uuid>,
}

impl<L: GattLink> Station<L> {
    /// Takes over `link`. A link that is not connected is released again
    /// and refused.
    pub async fn open(link: L, registry: Arc<SensorRegistry>, retry: RetryPolicy) -> Result<Self, StationError> {
        if !link.is_connected().await {
            if let Err(e) = link.disconnect().await {
                debug!(address = link.address(), error = %e, "unable to release stale link");
            }
            return Err(StationError::NoConnection);
        }
        Ok(Self {
            link: Arc::new(link),
            registry,
            retry,
            learned: HashMap::new(),
        })
    }

    pub fn address(&self) -> &str {
        self.link.address()
    }

    /// Position of the DIP switches, big-endian
    pub async fn dip_id(&self) -> Result<u64, StationError> {
        let what = "DIP switch id";
        let raw = self.read_characteristic(gatt::INFO_SERVICE, gatt::IDENTIFIER, what).await?;
        field::be_unsigned(&raw).map_err(|e| read_error(what, e))
    }

    pub async fn unlocked(&self) -> Result<bool, StationError> {
        self.read_flag(gatt::INFO_SERVICE, "unlocked flag").await
    }

    pub async fn set_unlocked(&self, value: bool) -> Result<(), StationError> {
        self.write_flag(gatt::INFO_SERVICE, "unlocked flag", value).await
    }

    /// Whether the current readings were already collected
    pub async fn sensor_data_read(&self) -> Result<bool, StationError> {
        self.read_flag(gatt::DATA_READ_SERVICE, "data read flag").await
    }

    pub async fn set_sensor_data_read(&self, value: bool) -> Result<(), StationError> {
        self.write_flag(gatt::DATA_READ_SERVICE, "data read flag", value).await
    }

    /// Reads one sensor.
    ///
    /// The reading is the first characteristic of the sensor's service that
    /// is not the alarm characteristic.
    pub async fn read_sensor(&mut self, kind: SensorKind) -> Result<f64, StationError> {
        self.ensure_connected().await?;
        let what = format!("{kind} sensor on station {}", self.address());
        let characteristic = self
            .find_characteristic(kind.service(), |id| id != gatt::ALARM)
            .map_err(|e| read_error(&what, e))?;
        let short = short_id_of(&characteristic);
        let entry = self.registry.get(&short).copied().ok_or_else(|| {
            read_error(&what, AccessError::Structural(format!("no decoder for characteristic {short}")))
        })?;

        let raw = self
            .retry
            .run(&what, || self.link.read(kind.service(), characteristic))
            .await
            .map_err(|e| read_error(&what, e))?;
        let value = entry.spec.decode(&raw).map_err(|e| read_error(&what, e))?;

        self.learned.insert(kind, characteristic);
        Ok(value)
    }

    /// Reads every sensor, keeping each outcome
    pub async fn read_sensors(&mut self) -> Result<Vec<(SensorKind, Result<f64, StationError>)>, StationError> {
        self.ensure_connected().await?;
        let mut outcomes = Vec::with_capacity(SensorKind::ALL.len());
        for kind in SensorKind::ALL {
            let outcome = self.read_sensor(kind).await;
            outcomes.push((kind, outcome));
        }
        Ok(outcomes)
    }

    /// Readings of all sensors that could be read; the others are logged and skipped
    pub async fn sensor_data(&mut self) -> Result<BTreeMap<SensorKind, f64>, StationError> {
        let mut values = BTreeMap::new();
        for (kind, outcome) in self.read_sensors().await? {
            match outcome {
                Ok(value) => {
                    values.insert(kind, value);
                }
                Err(e) => warn!(address = %self.address(), sensor = %kind, error = %e, "skipping unreadable sensor"),
            }
        }
        Ok(values)
    }

    /// Battery charge in percent, if the station reports one
    pub async fn battery_level(&self) -> Result<Option<u8>, StationError> {
        let what = "battery status";
        let raw = self.read_characteristic(gatt::INFO_SERVICE, gatt::BATTERY_STATUS, what).await?;
        station_proto::battery_level(&raw).map_err(|e| read_error(what, e))
    }

    pub async fn set_alarm(&self, kind: SensorKind, alarm: Alarm) -> Result<(), StationError> {
        let what = format!("alarm of {kind} sensor");
        let data = FieldSpec::Index { num_bytes: 1 }
            .encode(&FieldValue::Index(u64::from(alarm.wire_code())))
            .map_err(|e| write_error(&what, e))?;
        self.write_characteristic(kind.service(), gatt::ALARM, &what, &data).await
    }

    /// Writes each alarm, keeping each outcome
    pub async fn write_alarms(
        &self,
        alarms: &BTreeMap<SensorKind, Alarm>,
    ) -> Result<Vec<(SensorKind, Result<(), StationError>)>, StationError> {
        self.ensure_connected().await?;
        let mut outcomes = Vec::with_capacity(alarms.len());
        for (kind, alarm) in alarms {
            outcomes.push((*kind, self.set_alarm(*kind, *alarm).await));
        }
        Ok(outcomes)
    }

    /// Writes all alarms; failed writes are logged and skipped
    pub async fn set_alarms(&self, alarms: &BTreeMap<SensorKind, Alarm>) -> Result<(), StationError> {
        for (kind, outcome) in self.write_alarms(alarms).await? {
            if let Err(e) = outcome {
                warn!(address = %self.address(), sensor = %kind, error = %e, "unable to set alarm");
            }
        }
        Ok(())
    }

    /// Unit of a sensor read earlier in this session
    pub fn sensor_unit(&self, kind: SensorKind) -> Result<&'static str, StationError> {
        self.learned
            .get(&kind)
            .and_then(|characteristic| self.registry.unit(&short_id_of(characteristic)))
            .ok_or(StationError::UnitUnknown(kind))
    }

    /// Ends the session
    pub async fn close(self) -> Result<(), LinkError> {
        self.link.disconnect().await
    }

    async fn ensure_connected(&self) -> Result<(), StationError> {
        if self.link.is_connected().await {
            Ok(())
        } else {
            Err(StationError::NoConnection)
        }
    }

    fn find_characteristic(&self, service: Uuid, matches: impl Fn(&str) -> bool) -> Result<Uuid, AccessError> {
        let services = self.link.services();
        let found = services
            .iter()
            .find(|s| s.uuid == service)
            .ok_or_else(|| AccessError::Structural(format!("service {service} not found on station {}", self.address())))?;
        found
            .characteristics
            .iter()
            .map(|c| c.uuid)
            .find(|uuid| matches(&short_id_of(uuid)))
            .ok_or_else(|| {
                AccessError::Structural(format!(
                    "characteristic not found on service {service} on station {}",
                    self.address()
                ))
            })
    }

    async fn read_characteristic(&self, service: Uuid, short: &str, what: &str) -> Result<Vec<u8>, StationError> {
        self.ensure_connected().await?;
        let characteristic = self
            .find_characteristic(service, |id| id == short)
            .map_err(|e| read_error(what, e))?;
        self.retry
            .run(what, || self.link.read(service, characteristic))
            .await
            .map_err(|e| read_error(what, e))
    }

    async fn write_characteristic(&self, service: Uuid, short: &str, what: &str, data: &[u8]) -> Result<(), StationError> {
        self.ensure_connected().await?;
        let characteristic = self
            .find_characteristic(service, |id| id == short)
            .map_err(|e| write_error(what, e))?;
        self.retry
            .run(what, || self.link.write(service, characteristic, data))
            .await
            .map_err(|e| write_error(what, e))
    }

    async fn read_flag(&self, service: Uuid, what: &str) -> Result<bool, StationError> {
        let raw = self.read_characteristic(service, gatt::FLAG, what).await?;
        field::decode_bool(&raw).map_err(|e| read_error(what, e))
    }

    async fn write_flag(&self, service: Uuid, what: &str, value: bool) -> Result<(), StationError> {
        self.write_characteristic(service, gatt::FLAG, what, &field::encode_bool(value)).await
    }
}

fn read_error(what: &str, source: impl Into<AccessError>) -> StationError {
    StationError::Read { what: what.to_string(), source: source.into() }
}

fn write_error(what: &str, source: impl Into<AccessError>) -> StationError {
    StationError::Write { what: what.to_string(), source: source.into() }
}

/// Disconnects a link whose session was dropped before it could close,
/// e.g. when the caller stopped polling it.
struct Release<L: GattLink + 'static> {
    link: Option<Arc<L>>,
}

impl<L: GattLink + 'static> Release<L> {
    fn disarm(mut self) {
        self.link = None;
    }
}

impl<L: GattLink + 'static> Drop for Release<L> {
    fn drop(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        let address = link.address().to_string();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!(address, "session abandoned, disconnecting in the background");
                runtime.spawn(async move {
                    if let Err(e) = link.disconnect().await {
                        warn!(address, error = %e, "unable to disconnect from sensor station");
                    }
                });
            }
            Err(_) => warn!(address, "session abandoned outside a runtime, link left open"),
        }
    }
}

/// Connects to `address`, runs `body` on the session and disconnects again.
///
/// Connecting goes through `retry` like any other transport operation. The
/// link is released on every exit path, including when the returned future
/// is dropped before it completes.
pub async fn with_station<C, T, E>(
    connector: &C,
    address: &str,
    registry: Arc<SensorRegistry>,
    retry: RetryPolicy,
    body: impl AsyncFnOnce(&mut Station<C::Link>) -> Result<T, E>,
) -> Result<T, E>
where
    C: Connector,
    E: From<StationError>,
{
    let link = retry
        .run("connect", || connector.connect(address))
        .await
        .map_err(|source| StationError::Connect { address: address.to_string(), source })?;
    debug!(address, "connected to sensor station");

    let mut station = Station::open(link, registry, retry).await?;
    let release = Release { link: Some(station.link.clone()) };
    let result = body(&mut station).await;
    if let Err(e) = station.close().await {
        warn!(address, error = %e, "unable to disconnect from sensor station");
    }
    release.disarm();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::mock::{MockConnector, MockLink};
    use station_proto::gatt::sig_uuid;

    const ADDRESS: &str = "aa:bb:cc:dd:ee:ff";

    async fn open(link: &MockLink) -> Station<MockLink> {
        Station::open(link.clone(), Arc::new(SensorRegistry::standard()), RetryPolicy::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn reads_dip_id() {
        let station = open(&MockLink::station(ADDRESS)).await;
        assert_eq!(station.dip_id().await.unwrap(), 101);
    }

    #[tokio::test]
    async fn dip_id_is_big_endian() {
        let link = MockLink::new(ADDRESS).with_characteristic(gatt::INFO_SERVICE, sig_uuid(0x2a9a), &[0x01, 0x02]);
        assert_eq!(open(&link).await.dip_id().await.unwrap(), 0x0102);
    }

    #[tokio::test]
    async fn unlocked_flag_round_trip() {
        let link = MockLink::station(ADDRESS);
        let station = open(&link).await;
        assert!(station.unlocked().await.unwrap());
        station.set_unlocked(false).await.unwrap();
        assert!(!station.unlocked().await.unwrap());
        assert_eq!(link.value(gatt::INFO_SERVICE, sig_uuid(0x2ae2)), Some(vec![0]));
    }

    #[tokio::test]
    async fn data_read_flag_lives_on_its_own_service() {
        let link = MockLink::station(ADDRESS);
        let station = open(&link).await;
        assert!(!station.sensor_data_read().await.unwrap());
        station.set_sensor_data_read(true).await.unwrap();
        assert!(station.sensor_data_read().await.unwrap());
        assert!(station.unlocked().await.unwrap());
    }

    #[tokio::test]
    async fn reads_all_sensors() {
        let mut station = open(&MockLink::station(ADDRESS)).await;
        let data = station.sensor_data().await.unwrap();
        assert_eq!(data.len(), 6);
        for (i, kind) in SensorKind::ALL.into_iter().enumerate() {
            let expected = (i + 1) as f64;
            assert!((data[&kind] - expected).abs() < 1e-9, "{kind}: {}", data[&kind]);
        }
    }

    #[tokio::test]
    async fn unreadable_sensor_is_skipped() {
        let link = MockLink::station(ADDRESS);
        link.set_value(SensorKind::Temperature.service(), sig_uuid(0x2b0d), &[0x7f, 0x7f]);
        link.fail_next(SensorKind::AirQuality.service(), sig_uuid(0x2b04), LinkError::slow("timeout"));
        let mut station = open(&link).await;

        let data = station.sensor_data().await.unwrap();
        assert_eq!(data.len(), 4);
        assert!(!data.contains_key(&SensorKind::Temperature));
        assert!(!data.contains_key(&SensorKind::AirQuality));
        assert!(matches!(
            station.sensor_unit(SensorKind::Temperature),
            Err(StationError::UnitUnknown(SensorKind::Temperature))
        ));
    }

    #[tokio::test]
    async fn units_are_learned_by_reading() {
        let mut station = open(&MockLink::station(ADDRESS)).await;
        assert!(station.sensor_unit(SensorKind::AirPressure).is_err());
        station.read_sensor(SensorKind::AirPressure).await.unwrap();
        assert_eq!(station.sensor_unit(SensorKind::AirPressure).unwrap(), "Pa");
        station.read_sensor(SensorKind::Temperature).await.unwrap();
        assert_eq!(station.sensor_unit(SensorKind::Temperature).unwrap(), "°C");
    }

    #[tokio::test]
    async fn reads_battery_level() {
        let station = open(&MockLink::station(ADDRESS)).await;
        assert_eq!(station.battery_level().await.unwrap(), Some(70));
    }

    #[tokio::test]
    async fn alarms_are_written_per_service() {
        let link = MockLink::station(ADDRESS);
        let station = open(&link).await;
        let alarms = BTreeMap::from([
            (SensorKind::Temperature, Alarm::High),
            (SensorKind::EarthHumidity, Alarm::None),
            (SensorKind::AirHumidity, Alarm::Low),
        ]);
        station.set_alarms(&alarms).await.unwrap();

        let alarm = sig_uuid(0x2a9a);
        assert_eq!(link.value(SensorKind::Temperature.service(), alarm), Some(vec![2]));
        assert_eq!(link.value(SensorKind::EarthHumidity.service(), alarm), Some(vec![0]));
        assert_eq!(link.value(SensorKind::AirHumidity.service(), alarm), Some(vec![1]));
        assert_eq!(link.value(SensorKind::LightIntensity.service(), alarm), Some(vec![1]));
        assert_eq!(link.value(gatt::INFO_SERVICE, alarm), Some(vec![101]));
    }

    #[tokio::test]
    async fn failed_alarm_write_is_swallowed() {
        let link = MockLink::station(ADDRESS);
        let alarm = sig_uuid(0x2a9a);
        link.fail_next(SensorKind::Temperature.service(), alarm, LinkError::slow("timeout"));
        let station = open(&link).await;
        let alarms = BTreeMap::from([(SensorKind::Temperature, Alarm::Low), (SensorKind::AirQuality, Alarm::High)]);

        let outcomes = station.write_alarms(&alarms).await.unwrap();
        assert!(outcomes.iter().any(|(kind, r)| *kind == SensorKind::Temperature && r.is_err()));
        assert_eq!(link.value(SensorKind::AirQuality.service(), alarm), Some(vec![2]));

        link.fail_next(SensorKind::Temperature.service(), alarm, LinkError::slow("timeout"));
        assert!(station.set_alarms(&alarms).await.is_ok());
    }

    #[tokio::test]
    async fn fast_failures_are_retried() {
        let link = MockLink::station(ADDRESS);
        let identifier = sig_uuid(0x2a9a);
        link.fail_next(gatt::INFO_SERVICE, identifier, LinkError::fast("busy"));
        link.fail_next(gatt::INFO_SERVICE, identifier, LinkError::fast("busy"));
        let station = open(&link).await;
        assert_eq!(station.dip_id().await.unwrap(), 101);
        assert_eq!(link.reads(gatt::INFO_SERVICE, identifier), 3);
    }

    #[tokio::test]
    async fn fast_failures_give_up_after_three_attempts() {
        let link = MockLink::station(ADDRESS);
        let flag = sig_uuid(0x2ae2);
        for _ in 0..3 {
            link.fail_next(gatt::INFO_SERVICE, flag, LinkError::fast("busy"));
        }
        let station = open(&link).await;
        let err = station.set_unlocked(true).await.unwrap_err();
        assert!(matches!(err, StationError::Write { source: AccessError::Link(_), .. }));
        assert_eq!(link.writes(gatt::INFO_SERVICE, flag), 3);
    }

    #[tokio::test]
    async fn slow_failure_is_not_retried() {
        let link = MockLink::station(ADDRESS);
        let identifier = sig_uuid(0x2a9a);
        link.fail_next(gatt::INFO_SERVICE, identifier, LinkError::slow("timeout"));
        let station = open(&link).await;
        assert!(matches!(station.dip_id().await, Err(StationError::Read { .. })));
        assert_eq!(link.reads(gatt::INFO_SERVICE, identifier), 1);
    }

    #[tokio::test]
    async fn missing_characteristic_is_structural() {
        let link = MockLink::new(ADDRESS).with_characteristic(gatt::INFO_SERVICE, sig_uuid(0x2a9a), &[1]);
        let station = open(&link).await;
        let err = station.battery_level().await.unwrap_err();
        assert!(matches!(err, StationError::Read { source: AccessError::Structural(_), .. }));
        let err = station.set_sensor_data_read(true).await.unwrap_err();
        assert!(matches!(err, StationError::Write { source: AccessError::Structural(_), .. }));
    }

    #[tokio::test]
    async fn operations_need_a_connection() {
        let link = MockLink::station(ADDRESS);
        let mut station = open(&link).await;
        link.set_connected(false);
        assert!(matches!(station.dip_id().await, Err(StationError::NoConnection)));
        assert!(matches!(station.sensor_data().await, Err(StationError::NoConnection)));
        assert!(matches!(
            station.set_alarms(&BTreeMap::new()).await,
            Err(StationError::NoConnection)
        ));

        let result = Station::open(link, Arc::new(SensorRegistry::standard()), RetryPolicy::default()).await;
        assert!(matches!(result, Err(StationError::NoConnection)));
    }

    #[tokio::test]
    async fn session_disconnects_on_error() {
        let connector = MockConnector::new();
        let link = connector.add(MockLink::station(ADDRESS));
        let registry = Arc::new(SensorRegistry::standard());

        let result: Result<(), StationError> =
            with_station(&connector, ADDRESS, registry.clone(), RetryPolicy::default(), async |station| {
                station.dip_id().await?;
                Err(StationError::UnitUnknown(SensorKind::Temperature))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(link.disconnects(), 1);

        let dip_id = with_station(&connector, ADDRESS, registry, RetryPolicy::default(), async |station| {
            station.dip_id().await
        })
        .await
        .unwrap();
        assert_eq!(dip_id, 101);
        assert_eq!(link.disconnects(), 2);
    }

    #[tokio::test]
    async fn session_retries_fast_connect_failures() {
        let connector = MockConnector::new();
        connector.add(MockLink::station(ADDRESS));
        connector.fail_next_connect(ADDRESS, LinkError::fast("busy"));
        let registry = Arc::new(SensorRegistry::standard());

        let dip_id = with_station(&connector, ADDRESS, registry.clone(), RetryPolicy::default(), async |station| {
            station.dip_id().await
        })
        .await
        .unwrap();
        assert_eq!(dip_id, 101);
        assert_eq!(connector.attempts(ADDRESS), 2);

        let result = with_station(&connector, "unknown", registry, RetryPolicy::default(), async |station| {
            station.dip_id().await
        })
        .await;
        assert!(matches!(result, Err(StationError::Connect { .. })));
        assert_eq!(connector.attempts("unknown"), 1);
    }

    #[tokio::test]
    async fn refused_link_is_released() {
        let link = MockLink::station(ADDRESS);
        link.set_connected(false);
        let result = Station::open(link.clone(), Arc::new(SensorRegistry::standard()), RetryPolicy::default()).await;
        assert!(matches!(result, Err(StationError::NoConnection)));
        assert_eq!(link.disconnects(), 1);
    }

    #[tokio::test]
    async fn cancelled_session_is_released() {
        let connector = MockConnector::new();
        let link = connector.add(MockLink::station(ADDRESS));
        let registry = Arc::new(SensorRegistry::standard());

        let session = with_station(&connector, ADDRESS, registry, RetryPolicy::default(), async |station| {
            station.dip_id().await?;
            std::future::pending::<()>().await;
            Ok::<_, StationError>(())
        });
        assert!(tokio::time::timeout(Duration::from_millis(20), session).await.is_err());
        assert_eq!(link.reads(gatt::INFO_SERVICE, sig_uuid(0x2a9a)), 1);

        // the release runs as its own task
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(link.disconnects(), 1);
        assert!(!link.is_connected().await);
    }
}
