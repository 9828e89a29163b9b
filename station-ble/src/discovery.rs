//! Finding stations that are not managed yet

use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::StationError;
use crate::link::{Advertisement, Scanner};

/// Addresses of advertisements named exactly `identifier` that are not known yet.
///
/// Order follows the scan; duplicates in the scan are kept.
pub fn filter_candidates(scan: &[Advertisement], identifier: &str, known: &HashSet<String>) -> Vec<String> {
    scan.iter()
        .filter(|adv| adv.name == identifier && !known.contains(&adv.address))
        .map(|adv| adv.address.clone())
        .collect()
}

/// Scans for `duration` and returns candidate stations.
///
/// A failing scan is an error, distinct from finding nothing.
pub async fn scan_for_new_stations<S: Scanner>(
    scanner: &S,
    known: &HashSet<String>,
    identifier: &str,
    duration: Duration,
) -> Result<Vec<String>, StationError> {
    let found = scanner.passive_scan(duration).await.map_err(StationError::Scan)?;
    debug!(devices = found.len(), "scan finished");
    let candidates = filter_candidates(&found, identifier, known);
    info!(candidates = candidates.len(), "found potential new sensor stations");
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkError;
    use crate::mock::MockConnector;

    fn adv(name: &str, address: &str) -> Advertisement {
        Advertisement { name: name.to_string(), address: address.to_string() }
    }

    #[test]
    fn keeps_unknown_stations_with_matching_name() {
        let scan = [adv("station", "a1"), adv("station", "a2"), adv("other", "a3")];
        let known = HashSet::from(["a3".to_string()]);
        assert_eq!(filter_candidates(&scan, "station", &known), vec!["a1", "a2"]);
    }

    #[test]
    fn drops_known_addresses_and_near_names() {
        let scan = [adv("station", "a1"), adv("Station", "a2"), adv("station2", "a3"), adv("station", "a4")];
        let known = HashSet::from(["a1".to_string()]);
        assert_eq!(filter_candidates(&scan, "station", &known), vec!["a4"]);
    }

    #[test]
    fn duplicates_are_not_removed() {
        let scan = [adv("station", "a1"), adv("station", "a1")];
        assert_eq!(filter_candidates(&scan, "station", &HashSet::new()), vec!["a1", "a1"]);
    }

    #[tokio::test]
    async fn scan_failure_is_an_error() {
        let scanner = MockConnector::new();
        scanner.fail_scans(LinkError::slow("adapter powered off"));
        let result = scan_for_new_stations(&scanner, &HashSet::new(), "station", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(StationError::Scan(_))));
    }

    #[tokio::test]
    async fn empty_scan_is_not_an_error() {
        let scanner = MockConnector::new();
        let result = scan_for_new_stations(&scanner, &HashSet::new(), "station", Duration::from_secs(1)).await;
        assert_eq!(result.unwrap(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn scan_filters_candidates() {
        let scanner = MockConnector::new();
        scanner.advertise("SensorStation", "a1");
        scanner.advertise("Phone", "a2");
        let result = scan_for_new_stations(&scanner, &HashSet::new(), "SensorStation", Duration::from_secs(1)).await;
        assert_eq!(result.unwrap(), vec!["a1"]);
    }
}
