//! Snapshot to registry reconciliation
//!
//! Each cycle every snapshot is run through the extraction schema. Reachable
//! devices have their series written and stale label tuples dropped;
//! unreachable or vanished devices are retired according to each metric's
//! [`Retention`].

use asic_core::schema::{base_label_values, UNAVAILABLE};
use asic_core::{metric_schema, DeviceSnapshot, MetricSpec, Retention};
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::registry::MetricRegistry;

pub struct Reconciler {
    registry: Arc<MetricRegistry>,
    schema: Vec<MetricSpec>,
}

/// Counts from one reconciliation pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassStats {
    /// Reachable devices written
    pub updated: usize,
    /// Devices whose series changed on retirement
    pub retired: usize,
    /// Series removed from the registry
    pub removed: usize,
    /// Metrics that failed extraction
    pub skipped: usize,
}

impl Reconciler {
    pub fn new(registry: Arc<MetricRegistry>) -> Self {
        Self {
            registry,
            schema: metric_schema(),
        }
    }

    /// Bring the registry in line with this cycle's snapshots.
    ///
    /// Devices in `reachable` are written. Snapshots outside it, and devices
    /// that own series but produced no snapshot this cycle, are retired.
    pub fn reconcile(&self, snapshots: &[DeviceSnapshot], reachable: &HashSet<IpAddr>) -> PassStats {
        let previous = self.registry.owners();
        let mut stats = PassStats::default();
        let mut seen = HashSet::with_capacity(snapshots.len());

        for snapshot in snapshots {
            seen.insert(snapshot.address);
            if reachable.contains(&snapshot.address) {
                self.apply(snapshot, &mut stats);
            } else if self.retire(snapshot.address, Some(snapshot), &mut stats) {
                stats.retired += 1;
            }
        }

        for address in previous.difference(&seen) {
            if self.retire(*address, None, &mut stats) {
                stats.retired += 1;
            }
        }

        info!(
            devices = snapshots.len(),
            reachable = reachable.len(),
            updated = stats.updated,
            retired = stats.retired,
            removed_series = stats.removed,
            skipped_metrics = stats.skipped,
            series = self.registry.series_count(),
            "Reconciliation complete"
        );
        stats
    }

    fn ensure_registered(&self, spec: &MetricSpec) -> bool {
        if self.registry.is_registered(&spec.name) {
            return true;
        }
        match self.registry.register(&spec.name, &spec.help, &spec.labels) {
            Ok(_) => true,
            Err(e) => {
                error!(metric = %spec.name, error = %e, "Failed to register metric");
                false
            }
        }
    }

    /// Write every extractable metric of a reachable device
    fn apply(&self, snapshot: &DeviceSnapshot, stats: &mut PassStats) {
        let address = snapshot.address;
        let mut failures = 0;

        for spec in &self.schema {
            let rows = match spec.extract(snapshot) {
                Ok(rows) => rows,
                Err(e) => {
                    debug!(ip = %address, metric = %spec.name, error = %e, "Metric skipped");
                    failures += 1;
                    continue;
                }
            };

            if !self.ensure_registered(spec) {
                continue;
            }

            let mut produced = HashSet::with_capacity(rows.len());
            for row in rows {
                match self.registry.set(&spec.name, address, &row.label_values, row.value) {
                    Ok(()) => {
                        produced.insert(row.label_values);
                    }
                    Err(e) => {
                        warn!(ip = %address, metric = %spec.name, error = %e, "Failed to set series");
                    }
                }
            }

            // Identity keeps every tuple it has ever seen
            if spec.retention == Retention::Sticky {
                continue;
            }

            for stale in self.registry.owned_series(&spec.name, address) {
                if !produced.contains(&stale) {
                    stats.removed += self.remove(spec, &stale);
                }
            }
        }

        stats.updated += 1;
        stats.skipped += failures;
        if failures > 0 {
            warn!(
                ip = %address,
                location = %snapshot.location,
                skipped = failures,
                missing = ?snapshot.missing_categories(),
                "Some metrics could not be extracted"
            );
        }
    }

    /// Drop a device's per-cycle series; identity stays, availability drops to 0.
    ///
    /// Returns whether anything changed, so a device retired in an earlier
    /// cycle is not counted again.
    fn retire(
        &self,
        address: IpAddr,
        snapshot: Option<&DeviceSnapshot>,
        stats: &mut PassStats,
    ) -> bool {
        let mut changed = false;
        for spec in &self.schema {
            match spec.retention {
                Retention::Retire => {
                    for series in self.registry.owned_series(&spec.name, address) {
                        let removed = self.remove(spec, &series);
                        changed |= removed > 0;
                        stats.removed += removed;
                    }
                }
                Retention::Sticky => {}
                Retention::Availability => {
                    if !self.ensure_registered(spec) {
                        continue;
                    }
                    let mut tuples = self.registry.owned_series(&spec.name, address);
                    if let Some(snapshot) = snapshot {
                        let current = base_label_values(snapshot);
                        if !tuples.contains(&current) {
                            tuples.push(current);
                        }
                    }
                    for labels in tuples {
                        if self.registry.value(&spec.name, &labels) == Some(UNAVAILABLE) {
                            continue;
                        }
                        changed = true;
                        if let Err(e) = self.registry.set(&spec.name, address, &labels, UNAVAILABLE) {
                            warn!(ip = %address, metric = %spec.name, error = %e, "Failed to mark unavailable");
                        }
                    }
                }
            }
        }

        if changed {
            debug!(ip = %address, "Device retired");
        }
        changed
    }

    fn remove(&self, spec: &MetricSpec, labels: &[String]) -> usize {
        match self.registry.remove(&spec.name, labels) {
            Ok(true) => 1,
            Ok(false) => 0,
            Err(e) => {
                warn!(metric = %spec.name, error = %e, "Failed to remove series");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asic_core::{Categories, Category};
    use serde_json::json;
    use std::collections::BTreeMap;

    use crate::assembler::tests::canned_response;

    type Exposition = BTreeMap<(String, Vec<String>), f64>;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 1, last])
    }

    fn healthy(address: IpAddr) -> DeviceSnapshot {
        let mut categories = Categories::default();
        for category in Category::ALL {
            categories.insert(category, canned_response(category)).unwrap();
        }
        DeviceSnapshot::new(address, "lab", categories)
    }

    fn offline(address: IpAddr) -> DeviceSnapshot {
        DeviceSnapshot::new(address, "lab", Categories::default())
    }

    fn reachable_of(snapshots: &[DeviceSnapshot]) -> HashSet<IpAddr> {
        snapshots
            .iter()
            .filter(|s| s.available)
            .map(|s| s.address)
            .collect()
    }

    fn run(reconciler: &Reconciler, snapshots: &[DeviceSnapshot]) -> PassStats {
        reconciler.reconcile(snapshots, &reachable_of(snapshots))
    }

    /// Every series currently in the registry
    fn exposition(reconciler: &Reconciler) -> Exposition {
        let registry = &reconciler.registry;
        let mut series = BTreeMap::new();
        for spec in &reconciler.schema {
            for owner in registry.owners() {
                for labels in registry.owned_series(&spec.name, owner) {
                    let value = registry.value(&spec.name, &labels).unwrap();
                    series.insert((spec.name.clone(), labels), value);
                }
            }
        }
        series
    }

    fn owned_by(series: &Exposition, address: IpAddr) -> Exposition {
        let ip = address.to_string();
        series
            .iter()
            .filter(|((_, labels), _)| labels[0] == ip)
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    fn availability(reconciler: &Reconciler, address: IpAddr) -> Option<f64> {
        reconciler
            .registry
            .value("asic_miner_available", &[address.to_string(), "lab".to_string()])
    }

    #[test]
    fn test_static_schema_registers_without_conflict() {
        let registry = MetricRegistry::new();
        for spec in metric_schema() {
            assert!(registry.register(&spec.name, &spec.help, &spec.labels).unwrap());
        }
        for spec in metric_schema() {
            assert!(!registry.register(&spec.name, &spec.help, &spec.labels).unwrap());
        }
    }

    #[test]
    fn test_consecutive_cycles_are_idempotent() {
        let reconciler = Reconciler::new(Arc::new(MetricRegistry::new()));
        let snapshots = vec![healthy(ip(1)), healthy(ip(2))];

        run(&reconciler, &snapshots);
        let first = exposition(&reconciler);
        run(&reconciler, &snapshots);
        let second = exposition(&reconciler);

        assert!(!first.is_empty());
        assert_eq!(first, second);
        assert_eq!(reconciler.registry.series_count(), first.len());
    }

    #[test]
    fn test_offline_device_retires_exactly_its_per_cycle_series() {
        let reconciler = Reconciler::new(Arc::new(MetricRegistry::new()));

        run(&reconciler, &[healthy(ip(1)), healthy(ip(2))]);
        let before = exposition(&reconciler);
        assert_eq!(availability(&reconciler, ip(2)), Some(1.0));

        run(&reconciler, &[healthy(ip(1)), offline(ip(2))]);
        let after = exposition(&reconciler);

        let gone: BTreeMap<_, _> = before
            .iter()
            .filter(|(k, _)| !after.contains_key(*k))
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        let expected: BTreeMap<_, _> = owned_by(&before, ip(2))
            .into_iter()
            .filter(|((name, _), _)| name != "asic_miner_info" && name != "asic_miner_available")
            .collect();
        assert_eq!(gone, expected);
        assert!(!gone.is_empty());

        // Device 1 untouched
        assert_eq!(owned_by(&before, ip(1)), owned_by(&after, ip(1)));

        // Identity retained unchanged, availability forced to 0
        let identity_before: Vec<_> = owned_by(&before, ip(2))
            .into_iter()
            .filter(|((name, _), _)| name == "asic_miner_info")
            .collect();
        let identity_after: Vec<_> = owned_by(&after, ip(2))
            .into_iter()
            .filter(|((name, _), _)| name == "asic_miner_info")
            .collect();
        assert_eq!(identity_before.len(), 1);
        assert_eq!(identity_before, identity_after);
        assert_eq!(availability(&reconciler, ip(2)), Some(0.0));
    }

    #[test]
    fn test_vanished_device_is_retired() {
        let reconciler = Reconciler::new(Arc::new(MetricRegistry::new()));
        run(&reconciler, &[healthy(ip(1)), healthy(ip(2))]);

        // ip(2) no longer discovered at all
        run(&reconciler, &[healthy(ip(1))]);

        let after = exposition(&reconciler);
        let remaining: Vec<_> = owned_by(&after, ip(2))
            .into_keys()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(remaining, vec!["asic_miner_available", "asic_miner_info"]);
        assert_eq!(availability(&reconciler, ip(2)), Some(0.0));
    }

    #[test]
    fn test_long_gone_device_is_retired_once() {
        let reconciler = Reconciler::new(Arc::new(MetricRegistry::new()));
        run(&reconciler, &[healthy(ip(1)), healthy(ip(2))]);

        let first = run(&reconciler, &[healthy(ip(1))]);
        assert_eq!(first.retired, 1);
        assert!(first.removed > 0);

        let before = exposition(&reconciler);
        let second = run(&reconciler, &[healthy(ip(1))]);
        assert_eq!(second.retired, 0);
        assert_eq!(second.removed, 0);
        assert_eq!(second.updated, 1);
        assert_eq!(exposition(&reconciler), before);

        // Still offline but discovered: nothing new to retire either
        let third = run(&reconciler, &[healthy(ip(1)), offline(ip(2))]);
        assert_eq!(third.retired, 0);
    }

    #[test]
    fn test_device_returning_restores_series() {
        let reconciler = Reconciler::new(Arc::new(MetricRegistry::new()));
        run(&reconciler, &[healthy(ip(1))]);
        let online = exposition(&reconciler);

        run(&reconciler, &[offline(ip(1))]);
        run(&reconciler, &[healthy(ip(1))]);

        assert_eq!(exposition(&reconciler), online);
    }

    #[test]
    fn test_unavailable_on_first_sight_writes_zero() {
        let reconciler = Reconciler::new(Arc::new(MetricRegistry::new()));
        run(&reconciler, &[offline(ip(3))]);

        let series = exposition(&reconciler);
        assert_eq!(series.len(), 1);
        assert_eq!(availability(&reconciler, ip(3)), Some(0.0));
    }

    #[test]
    fn test_changed_status_replaces_old_tuple() {
        let reconciler = Reconciler::new(Arc::new(MetricRegistry::new()));
        run(&reconciler, &[healthy(ip(1))]);

        let mut snapshot = healthy(ip(1));
        snapshot
            .categories
            .insert(Category::ErrorCode, json!({"Msg": {"error_code": ["110"]}}))
            .unwrap();
        run(&reconciler, &[snapshot]);

        let status = reconciler.registry.owned_series("asic_miner_status", ip(1));
        assert_eq!(status.len(), 1);
        assert_eq!(status[0][3], "110");
    }

    #[test]
    fn test_changed_identity_adds_tuple() {
        let reconciler = Reconciler::new(Arc::new(MetricRegistry::new()));
        run(&reconciler, &[healthy(ip(1))]);

        let mut snapshot = healthy(ip(1));
        snapshot
            .categories
            .insert(Category::Status, json!({"Msg": {"FirmwareVersion": "20240101.01.REL"}}))
            .unwrap();
        run(&reconciler, &[snapshot]);

        let identity = reconciler.registry.owned_series("asic_miner_info", ip(1));
        assert_eq!(identity.len(), 2);
    }

    #[test]
    fn test_extraction_failure_leaves_series_untouched() {
        let reconciler = Reconciler::new(Arc::new(MetricRegistry::new()));
        run(&reconciler, &[healthy(ip(1))]);
        let power_labels = vec![ip(1).to_string(), "lab".to_string()];
        assert_eq!(
            reconciler
                .registry
                .value("asic_miner_fans_psu_fan_speed", &power_labels),
            Some(6048.0)
        );

        let mut snapshot = healthy(ip(1));
        snapshot.categories.psu = None;
        run(&reconciler, &[snapshot]);

        assert_eq!(
            reconciler
                .registry
                .value("asic_miner_fans_psu_fan_speed", &power_labels),
            Some(6048.0)
        );
        assert_eq!(
            reconciler
                .registry
                .value("asic_miner_status_power", &power_labels),
            Some(3300.0)
        );
    }
}
