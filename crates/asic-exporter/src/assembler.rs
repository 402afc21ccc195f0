//! Concurrent per-category fetches assembled into device snapshots

use asic_api::TelemetrySource;
use asic_core::{Categories, Category, DeviceSnapshot, LocationTable};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, warn};

pub struct Assembler {
    source: Arc<dyn TelemetrySource>,
    locations: Arc<LocationTable>,
    fetch_timeout: Duration,
}

impl Assembler {
    pub fn new(
        source: Arc<dyn TelemetrySource>,
        locations: Arc<LocationTable>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            source,
            locations,
            fetch_timeout,
        }
    }

    /// Fetch every category from every address and build one snapshot per
    /// address, ordered by address. Failed fetches leave their category
    /// empty; a device with no category at all is marked unavailable.
    pub async fn assemble(&self, addresses: &[IpAddr]) -> Vec<DeviceSnapshot> {
        let mut collected: BTreeMap<IpAddr, Categories> = addresses
            .iter()
            .map(|address| (*address, Categories::default()))
            .collect();

        let mut tasks = JoinSet::new();
        for &address in collected.keys() {
            for category in Category::ALL {
                let source = self.source.clone();
                let fetch_timeout = self.fetch_timeout;
                tasks.spawn(async move {
                    let result = timeout(fetch_timeout, source.fetch(address, category)).await;
                    (address, category, result)
                });
            }
        }

        while let Some(joined) = tasks.join_next().await {
            let (address, category, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    warn!(error = %e, "Fetch task failed");
                    continue;
                }
            };

            let value = match result {
                Ok(Ok(value)) => value,
                Ok(Err(e)) => {
                    debug!(ip = %address, category = %category, error = %e, "Fetch failed");
                    continue;
                }
                Err(_) => {
                    debug!(ip = %address, category = %category, "Fetch timed out");
                    continue;
                }
            };

            if let Some(categories) = collected.get_mut(&address) {
                if let Err(e) = categories.insert(category, value) {
                    debug!(ip = %address, category = %category, error = %e, "Response did not decode");
                }
            }
        }

        collected
            .into_iter()
            .map(|(address, categories)| {
                let location = self.locations.resolve_label(&address);
                let snapshot = DeviceSnapshot::new(address, location, categories);
                if !snapshot.available {
                    warn!(ip = %address, "Device returned no telemetry");
                }
                snapshot
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use asic_api::QueryError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::HashSet;

    /// In-memory telemetry source: serves canned responses for online
    /// devices and fails every fetch for the rest
    #[derive(Default)]
    pub(crate) struct FakeSource {
        online: Mutex<HashSet<IpAddr>>,
        failing: Mutex<HashSet<Category>>,
        stalled: Mutex<HashSet<Category>>,
        pub(crate) calls: Mutex<usize>,
    }

    impl FakeSource {
        pub(crate) fn with_online(addresses: &[IpAddr]) -> Self {
            let source = Self::default();
            source.online.lock().extend(addresses.iter().copied());
            source
        }

        pub(crate) fn set_online(&self, address: IpAddr, online: bool) {
            let mut set = self.online.lock();
            if online {
                set.insert(address);
            } else {
                set.remove(&address);
            }
        }

        pub(crate) fn fail_category(&self, category: Category) {
            self.failing.lock().insert(category);
        }

        fn stall_category(&self, category: Category) {
            self.stalled.lock().insert(category);
        }
    }

    pub(crate) fn canned_response(category: Category) -> Value {
        match category {
            Category::Info => json!({"STATUS": "S", "Msg": {"mac": "C4:11:04:01:02:03", "minersn": "HTM30S2024"}}),
            Category::DevDetails => json!({"DEVDETAILS": [{"Model": "M30S+VE40"}]}),
            Category::Devs => json!({"DEVS": [
                {"Slot": 0, "Status": "Alive", "Temperature": 70.0, "Chip Temp Min": 60.0,
                 "Chip Temp Max": 88.0, "Chip Temp Avg": 75.0, "Upfreq Complete": 1},
                {"Slot": 1, "Status": "Alive", "Temperature": 71.0, "Chip Temp Min": 61.0,
                 "Chip Temp Max": 89.0, "Chip Temp Avg": 76.0, "Upfreq Complete": 1},
                {"Slot": 2, "Status": "Alive", "Temperature": 72.0, "Chip Temp Min": 62.0,
                 "Chip Temp Max": 90.0, "Chip Temp Avg": 77.0, "Upfreq Complete": 1}
            ]}),
            Category::ErrorCode => json!({"Msg": {"error_code": []}}),
            Category::Summary => json!({"SUMMARY": [{
                "Elapsed": 3600, "Uptime": 7200, "HS RT": 100000000.0, "Temperature": 71.0,
                "Env Temp": 25.0, "Fan Speed In": 5910, "Fan Speed Out": 5880,
                "Power": 3300, "Power Limit": 3600, "Power Mode": "Normal"
            }]}),
            Category::Status => json!({"Msg": {"FirmwareVersion": "'20230512.22.REL'"}}),
            Category::Psu => json!({"Msg": {"vin": 22500, "temp0": 41.0, "fan_speed": 6048}}),
            Category::Pools => json!({"POOLS": [{
                "POOL": 1, "URL": "stratum+tcp://pool.example:3333", "Status": "Alive",
                "User": "farm.worker1", "Last Share Time": 1700000000, "Pool Rejected%": 0.25
            }]}),
        }
    }

    #[async_trait]
    impl TelemetrySource for FakeSource {
        async fn fetch(&self, address: IpAddr, category: Category) -> Result<Value, QueryError> {
            *self.calls.lock() += 1;
            let stalled = self.stalled.lock().contains(&category);
            if stalled {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            if !self.online.lock().contains(&address) {
                return Err(QueryError::Timeout(std::net::SocketAddr::new(address, 4028)));
            }
            if self.failing.lock().contains(&category) {
                return Err(QueryError::Rejected {
                    command: category.command().to_string(),
                    message: "invalid cmd".to_string(),
                });
            }
            Ok(canned_response(category))
        }
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 1, last])
    }

    fn assembler(source: Arc<FakeSource>, fetch_timeout: Duration) -> Assembler {
        let locations = Arc::new(LocationTable::parse("10.0.0.0/24, lab:10.0.1.0/24").unwrap());
        Assembler::new(source, locations, fetch_timeout)
    }

    #[tokio::test]
    async fn test_assemble_orders_and_deduplicates() {
        let source = Arc::new(FakeSource::with_online(&[ip(2), ip(1)]));
        let snapshots = assembler(source.clone(), Duration::from_secs(1))
            .assemble(&[ip(2), ip(1), ip(2)])
            .await;

        let addresses: Vec<_> = snapshots.iter().map(|s| s.address).collect();
        assert_eq!(addresses, vec![ip(1), ip(2)]);
        assert!(snapshots.iter().all(|s| s.available && s.location == "lab"));
        assert!(snapshots.iter().all(|s| s.missing_categories().is_empty()));
        assert_eq!(*source.calls.lock(), 2 * Category::ALL.len());
    }

    #[tokio::test]
    async fn test_failed_category_is_absent() {
        let source = Arc::new(FakeSource::with_online(&[ip(1)]));
        source.fail_category(Category::Psu);

        let snapshots = assembler(source, Duration::from_secs(1)).assemble(&[ip(1)]).await;
        assert_eq!(snapshots.len(), 1);
        assert!(snapshots[0].available);
        assert_eq!(snapshots[0].missing_categories(), vec![Category::Psu]);
    }

    #[tokio::test]
    async fn test_unreachable_device_is_included_unavailable() {
        let source = Arc::new(FakeSource::with_online(&[ip(1)]));
        let snapshots = assembler(source, Duration::from_secs(1))
            .assemble(&[ip(1), ip(9)])
            .await;

        assert_eq!(snapshots.len(), 2);
        assert!(snapshots[0].available);
        assert!(!snapshots[1].available);
        assert_eq!(snapshots[1].missing_categories().len(), Category::ALL.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_category_times_out_alone() {
        let source = Arc::new(FakeSource::with_online(&[ip(1)]));
        source.stall_category(Category::Pools);

        let snapshots = assembler(source, Duration::from_millis(200)).assemble(&[ip(1)]).await;
        assert!(snapshots[0].available);
        assert_eq!(snapshots[0].missing_categories(), vec![Category::Pools]);
    }

    #[tokio::test]
    async fn test_unresolved_location() {
        let source = Arc::new(FakeSource::with_online(&[]));
        let outside = IpAddr::from([192, 168, 1, 1]);
        let snapshots = assembler(source, Duration::from_secs(1)).assemble(&[outside]).await;
        assert_eq!(snapshots[0].location, asic_core::UNRESOLVED_LOCATION);
    }
}
