//! Metric registry backing the `/metrics` endpoint
//!
//! Wraps a `prometheus::Registry` of `GaugeVec`s and tracks which label
//! tuples each device currently owns, so a device's series can be found and
//! retired without scanning the whole exposition.

use parking_lot::RwLock;
use prometheus::core::Collector;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Metric {name} already registered with labels {existing:?}, requested {requested:?}")]
    SchemaConflict {
        name: String,
        existing: Vec<String>,
        requested: Vec<String>,
    },
    #[error("Metric {0} is not registered")]
    UnknownMetric(String),
    #[error("Metric {name} expects {expected} label values, got {got}")]
    LabelCount {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("Exposition is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

struct Family {
    labels: Vec<String>,
    gauge: GaugeVec,
    /// Label tuples each device has written
    owners: HashMap<IpAddr, HashSet<Vec<String>>>,
}

impl Family {
    fn check_arity(&self, name: &str, label_values: &[String]) -> Result<(), RegistryError> {
        if label_values.len() != self.labels.len() {
            return Err(RegistryError::LabelCount {
                name: name.to_string(),
                expected: self.labels.len(),
                got: label_values.len(),
            });
        }
        Ok(())
    }

    fn has_series(&self, label_values: &[String]) -> bool {
        self.owners.values().any(|tuples| tuples.contains(label_values))
    }
}

/// Process-wide metric state shared by the reconciler and the HTTP server
pub struct MetricRegistry {
    registry: Registry,
    families: RwLock<HashMap<String, Family>>,
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            families: RwLock::new(HashMap::new()),
        }
    }

    /// Register a gauge family. Returns `false` if it already exists with the
    /// same label names; a different label set is a schema conflict.
    pub fn register(
        &self,
        name: &str,
        help: &str,
        label_names: &[&str],
    ) -> Result<bool, RegistryError> {
        let mut families = self.families.write();

        if let Some(existing) = families.get(name) {
            if existing.labels.iter().map(String::as_str).eq(label_names.iter().copied()) {
                return Ok(false);
            }
            return Err(RegistryError::SchemaConflict {
                name: name.to_string(),
                existing: existing.labels.clone(),
                requested: label_names.iter().map(|l| l.to_string()).collect(),
            });
        }

        let gauge = GaugeVec::new(Opts::new(name, help), label_names)?;
        self.registry.register(Box::new(gauge.clone()))?;
        families.insert(
            name.to_string(),
            Family {
                labels: label_names.iter().map(|l| l.to_string()).collect(),
                gauge,
                owners: HashMap::new(),
            },
        );

        debug!(metric = name, labels = ?label_names, "Registered metric");
        Ok(true)
    }

    /// Register an extra collector, used for the exporter's own metrics
    pub fn register_collector(&self, collector: Box<dyn Collector>) -> Result<(), RegistryError> {
        self.registry.register(collector)?;
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.families.read().contains_key(name)
    }

    /// Set the series at `label_values`, recording `owner` as its device
    pub fn set(
        &self,
        name: &str,
        owner: IpAddr,
        label_values: &[String],
        value: f64,
    ) -> Result<(), RegistryError> {
        let mut families = self.families.write();
        let family = families
            .get_mut(name)
            .ok_or_else(|| RegistryError::UnknownMetric(name.to_string()))?;
        family.check_arity(name, label_values)?;

        let values: Vec<&str> = label_values.iter().map(String::as_str).collect();
        family.gauge.get_metric_with_label_values(&values)?.set(value);
        family
            .owners
            .entry(owner)
            .or_default()
            .insert(label_values.to_vec());
        Ok(())
    }

    /// Remove one series. Returns whether it existed.
    pub fn remove(&self, name: &str, label_values: &[String]) -> Result<bool, RegistryError> {
        let mut families = self.families.write();
        let family = families
            .get_mut(name)
            .ok_or_else(|| RegistryError::UnknownMetric(name.to_string()))?;
        family.check_arity(name, label_values)?;

        if !family.has_series(label_values) {
            return Ok(false);
        }

        let values: Vec<&str> = label_values.iter().map(String::as_str).collect();
        family.gauge.remove_label_values(&values)?;
        family.owners.retain(|_, tuples| {
            tuples.remove(label_values);
            !tuples.is_empty()
        });
        Ok(true)
    }

    /// Label tuples `owner` currently holds under `name`
    pub fn owned_series(&self, name: &str, owner: IpAddr) -> Vec<Vec<String>> {
        self.families
            .read()
            .get(name)
            .and_then(|family| family.owners.get(&owner))
            .map(|tuples| tuples.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every device that owns at least one series
    pub fn owners(&self) -> HashSet<IpAddr> {
        self.families
            .read()
            .values()
            .flat_map(|family| family.owners.keys().copied())
            .collect()
    }

    /// Current value of a series, `None` if absent
    pub fn value(&self, name: &str, label_values: &[String]) -> Option<f64> {
        let families = self.families.read();
        let family = families.get(name)?;
        if label_values.len() != family.labels.len() || !family.has_series(label_values) {
            return None;
        }
        let values: Vec<&str> = label_values.iter().map(String::as_str).collect();
        family
            .gauge
            .get_metric_with_label_values(&values)
            .ok()
            .map(|gauge| gauge.get())
    }

    /// Total series across all registered families
    pub fn series_count(&self) -> usize {
        self.families
            .read()
            .values()
            .map(|family| {
                family
                    .owners
                    .values()
                    .flatten()
                    .collect::<HashSet<_>>()
                    .len()
            })
            .sum()
    }

    /// Encode everything in the Prometheus text format
    pub fn encode_text(&self) -> Result<String, RegistryError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
