//! Data-driven metric extraction schema
//!
//! Every exported metric is one [`MetricSpec`]: a normalized name, help text,
//! label names, a retention policy and an [`Extractor`] describing where the
//! value comes from. Extraction is per metric, so a missing field only costs
//! the metrics that need it.

use std::fmt;
use thiserror::Error;

use crate::board::{composite_status, upgrade_complete, BoardPosition};
use crate::metric::normalize_metric_name;
use crate::snapshot::DeviceSnapshot;
use crate::telemetry::{BoardDev, Category, PoolEntry, PsuMsg, SummaryEntry};

/// Labels every series carries, in this order
pub const BASE_LABELS: [&str; 2] = ["ip", "location"];

/// Value written to the availability metric for an unreachable device
pub const UNAVAILABLE: f64 = 0.0;

/// Value written to the availability metric for a reachable device
pub const AVAILABLE: f64 = 1.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    #[error("category {0} not available")]
    MissingCategory(Category),
    #[error("field '{field}' missing or malformed in {category}")]
    MissingField {
        category: Category,
        field: &'static str,
    },
    #[error("no {0} hashboard reported")]
    MissingBoard(BoardPosition),
    #[error("no hashboards reported")]
    NoBoards,
    #[error("invalid '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// What happens to a device's series once the device is unreachable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Removed from the registry
    Retire,
    /// Never removed; a changed label set adds a series instead of replacing one
    Sticky,
    /// Never removed; forced to [`UNAVAILABLE`]
    Availability,
}

/// One extracted value with its extra label values (after the base labels)
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: Vec<String>,
    pub value: f64,
}

impl Sample {
    pub fn plain(value: f64) -> Self {
        Self {
            labels: Vec::new(),
            value,
        }
    }
}

/// A fully labeled row ready for the registry
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Values for every label of the metric, base labels first
    pub label_values: Vec<String>,
    pub value: f64,
}

/// Where a metric's value comes from
pub enum Extractor {
    /// A field of the first summary entry
    Summary {
        field: &'static str,
        read: fn(&SummaryEntry) -> Option<f64>,
    },
    /// A field of the PSU message
    Psu {
        field: &'static str,
        read: fn(&PsuMsg) -> Option<f64>,
    },
    /// A field of one hashboard
    Board {
        position: BoardPosition,
        field: &'static str,
        read: fn(&BoardDev) -> Option<f64>,
    },
    /// A field of every configured pool, labeled by pool number
    Pool {
        field: &'static str,
        read: fn(&PoolEntry) -> Option<f64>,
    },
    /// Anything needing more than one field
    Derived(fn(&DeviceSnapshot) -> Result<Vec<Sample>, ExtractError>),
}

impl Extractor {
    fn samples(&self, snapshot: &DeviceSnapshot) -> Result<Vec<Sample>, ExtractError> {
        match *self {
            Extractor::Summary { field, read } => {
                let summary = snapshot
                    .summary()
                    .ok_or(ExtractError::MissingCategory(Category::Summary))?;
                let value = read(summary).ok_or(ExtractError::MissingField {
                    category: Category::Summary,
                    field,
                })?;
                Ok(vec![Sample::plain(value)])
            }
            Extractor::Psu { field, read } => {
                let psu = snapshot
                    .psu()
                    .ok_or(ExtractError::MissingCategory(Category::Psu))?;
                let value = read(psu).ok_or(ExtractError::MissingField {
                    category: Category::Psu,
                    field,
                })?;
                Ok(vec![Sample::plain(value)])
            }
            Extractor::Board {
                position,
                field,
                read,
            } => {
                let boards = snapshot
                    .boards()
                    .ok_or(ExtractError::MissingCategory(Category::Devs))?;
                let board = boards
                    .get(position.index())
                    .copied()
                    .ok_or(ExtractError::MissingBoard(position))?;
                let value = read(board).ok_or(ExtractError::MissingField {
                    category: Category::Devs,
                    field,
                })?;
                Ok(vec![Sample::plain(value)])
            }
            Extractor::Pool { field, read } => {
                let pools = snapshot
                    .pools()
                    .ok_or(ExtractError::MissingCategory(Category::Pools))?;
                let samples: Vec<Sample> = pools
                    .iter()
                    .enumerate()
                    .filter_map(|(index, pool)| {
                        read(pool).map(|value| Sample {
                            labels: vec![pool_label(index, pool)],
                            value,
                        })
                    })
                    .collect();
                if samples.is_empty() && !pools.is_empty() {
                    return Err(ExtractError::MissingField {
                        category: Category::Pools,
                        field,
                    });
                }
                Ok(samples)
            }
            Extractor::Derived(derive) => derive(snapshot),
        }
    }
}

/// Declaration of one exported metric
pub struct MetricSpec {
    /// Normalized metric name
    pub name: String,
    pub help: String,
    /// All label names, base labels first
    pub labels: Vec<&'static str>,
    pub retention: Retention,
    pub extractor: Extractor,
}

impl MetricSpec {
    pub fn new(
        raw_name: &str,
        help: impl Into<String>,
        extra_labels: &[&'static str],
        retention: Retention,
        extractor: Extractor,
    ) -> Self {
        let mut labels = BASE_LABELS.to_vec();
        labels.extend_from_slice(extra_labels);
        Self {
            name: normalize_metric_name(raw_name),
            help: help.into(),
            labels,
            retention,
            extractor,
        }
    }

    /// Extract this metric's rows from a snapshot
    pub fn extract(&self, snapshot: &DeviceSnapshot) -> Result<Vec<Row>, ExtractError> {
        let samples = self.extractor.samples(snapshot)?;
        let extra = self.labels.len() - BASE_LABELS.len();

        samples
            .into_iter()
            .map(|sample| {
                if sample.labels.len() != extra {
                    return Err(ExtractError::Invalid {
                        field: "labels",
                        reason: format!(
                            "{} expects {} extra label values, got {}",
                            self.name,
                            extra,
                            sample.labels.len()
                        ),
                    });
                }
                let mut label_values = base_label_values(snapshot);
                label_values.extend(sample.labels);
                Ok(Row {
                    label_values,
                    value: sample.value,
                })
            })
            .collect()
    }
}

impl fmt::Debug for MetricSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricSpec")
            .field("name", &self.name)
            .field("labels", &self.labels)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

/// Base label values (`ip`, `location`) for a device
pub fn base_label_values(snapshot: &DeviceSnapshot) -> Vec<String> {
    vec![snapshot.address.to_string(), snapshot.location.clone()]
}

fn pool_label(index: usize, pool: &PoolEntry) -> String {
    pool.pool
        .map(|n| n.to_string())
        .unwrap_or_else(|| (index + 1).to_string())
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Realtime hashrate in TH/s
fn terahash(summary: &SummaryEntry) -> Option<f64> {
    summary.hs_rt.map(|mhs| round2(mhs / 1_000_000.0))
}

/// The full extraction schema, built once at startup
pub fn metric_schema() -> Vec<MetricSpec> {
    use Retention::{Availability, Retire, Sticky};

    let mut schema = vec![
        MetricSpec::new(
            "miner_info",
            "Miner identity: MAC address, model, serial number and firmware version",
            &["mac", "model_name", "serial_number", "firmware_version"],
            Sticky,
            Extractor::Derived(identity),
        ),
        MetricSpec::new(
            "miner_available",
            "Whether the miner answered telemetry requests in the last cycle (1) or not (0)",
            &[],
            Availability,
            Extractor::Derived(availability),
        ),
        MetricSpec::new(
            "miner_status",
            "Miner status with power mode, active error codes and composite board status",
            &["power_mode", "error_code", "status"],
            Retire,
            Extractor::Derived(status),
        ),
        MetricSpec::new(
            "miner_status_upfreq",
            "Whether every hashboard finished frequency tuning",
            &[],
            Retire,
            Extractor::Derived(upfreq),
        ),
        MetricSpec::new(
            "miner_status_ths_rt",
            "Realtime hashrate in TH/s",
            &[],
            Retire,
            Extractor::Summary {
                field: "HS RT",
                read: terahash,
            },
        ),
        MetricSpec::new(
            "miner_status_power",
            "Power draw in watts",
            &[],
            Retire,
            Extractor::Summary {
                field: "Power",
                read: |s| s.power,
            },
        ),
        MetricSpec::new(
            "miner_status_power_limit",
            "Configured power limit in watts",
            &[],
            Retire,
            Extractor::Summary {
                field: "Power Limit",
                read: |s| s.power_limit,
            },
        ),
        MetricSpec::new(
            "miner_status_efficiency",
            "Power efficiency in watts per TH/s",
            &[],
            Retire,
            Extractor::Derived(efficiency),
        ),
        MetricSpec::new(
            "miner_status_input_voltage",
            "PSU input voltage in volts",
            &[],
            Retire,
            Extractor::Psu {
                field: "vin",
                read: |p| p.vin.map(|v| v / 100.0),
            },
        ),
        MetricSpec::new(
            "miner_status_uptime",
            "System uptime in seconds",
            &[],
            Retire,
            Extractor::Summary {
                field: "Uptime",
                read: |s| s.uptime,
            },
        ),
        MetricSpec::new(
            "miner_status_elapsed_time",
            "Time since the mining process started in seconds",
            &[],
            Retire,
            Extractor::Summary {
                field: "Elapsed",
                read: |s| s.elapsed,
            },
        ),
        MetricSpec::new(
            "miner_temperature_env_temperature",
            "Environment temperature in degrees Celsius",
            &[],
            Retire,
            Extractor::Summary {
                field: "Env Temp",
                read: |s| s.env_temp,
            },
        ),
        MetricSpec::new(
            "miner_temperature_avg_temperature",
            "Average hashboard temperature in degrees Celsius",
            &[],
            Retire,
            Extractor::Summary {
                field: "Temperature",
                read: |s| s.temperature,
            },
        ),
        MetricSpec::new(
            "miner_temperature_psu_temperature",
            "PSU temperature in degrees Celsius",
            &[],
            Retire,
            Extractor::Psu {
                field: "temp0",
                read: |p| p.temp0,
            },
        ),
    ];

    for position in BoardPosition::ALL {
        schema.extend(board_metrics(position));
    }

    schema.extend([
        MetricSpec::new(
            "miner_fans_fan_speed_in",
            "Intake fan speed in RPM",
            &[],
            Retire,
            Extractor::Summary {
                field: "Fan Speed In",
                read: |s| s.fan_speed_in,
            },
        ),
        MetricSpec::new(
            "miner_fans_fan_speed_out",
            "Exhaust fan speed in RPM",
            &[],
            Retire,
            Extractor::Summary {
                field: "Fan Speed Out",
                read: |s| s.fan_speed_out,
            },
        ),
        MetricSpec::new(
            "miner_fans_psu_fan_speed",
            "PSU fan speed in RPM",
            &[],
            Retire,
            Extractor::Psu {
                field: "fan_speed",
                read: |p| p.fan_speed,
            },
        ),
        MetricSpec::new(
            "pool_status",
            "Configured pool with its URL, status and worker user",
            &["pool", "url", "status", "user"],
            Retire,
            Extractor::Derived(pool_status),
        ),
        MetricSpec::new(
            "pool_status_last_share_time",
            "Unix time of the last share submitted to the pool",
            &["pool"],
            Retire,
            Extractor::Pool {
                field: "Last Share Time",
                read: |p| p.last_share_time,
            },
        ),
        MetricSpec::new(
            "pool_status_reject_rate",
            "Share reject rate reported by the pool in percent",
            &["pool"],
            Retire,
            Extractor::Pool {
                field: "Pool Rejected%",
                read: |p| p.rejected_percent,
            },
        ),
    ]);

    schema
}

fn board_metrics(position: BoardPosition) -> Vec<MetricSpec> {
    let name = |suffix: &str| format!("miner_temperature_{}_board_{}", position, suffix);

    vec![
        MetricSpec::new(
            &name("temperature"),
            format!("{} hashboard temperature in degrees Celsius", position),
            &[],
            Retention::Retire,
            Extractor::Board {
                position,
                field: "Temperature",
                read: |b| b.temperature,
            },
        ),
        MetricSpec::new(
            &name("chip_temperature"),
            format!("{} hashboard average chip temperature in degrees Celsius", position),
            &[],
            Retention::Retire,
            Extractor::Board {
                position,
                field: "Chip Temp Avg",
                read: |b| b.chip_temp_avg,
            },
        ),
        MetricSpec::new(
            &name("chip_temperature_min"),
            format!("{} hashboard minimum chip temperature in degrees Celsius", position),
            &[],
            Retention::Retire,
            Extractor::Board {
                position,
                field: "Chip Temp Min",
                read: |b| b.chip_temp_min,
            },
        ),
        MetricSpec::new(
            &name("chip_temperature_max"),
            format!("{} hashboard maximum chip temperature in degrees Celsius", position),
            &[],
            Retention::Retire,
            Extractor::Board {
                position,
                field: "Chip Temp Max",
                read: |b| b.chip_temp_max,
            },
        ),
    ]
}

fn identity(snapshot: &DeviceSnapshot) -> Result<Vec<Sample>, ExtractError> {
    let info = snapshot
        .info()
        .ok_or(ExtractError::MissingCategory(Category::Info))?;
    let mac = info.mac.as_deref().ok_or(ExtractError::MissingField {
        category: Category::Info,
        field: "mac",
    })?;
    let serial = info.minersn.as_deref().ok_or(ExtractError::MissingField {
        category: Category::Info,
        field: "minersn",
    })?;
    let model = snapshot.model().ok_or(ExtractError::MissingField {
        category: Category::DevDetails,
        field: "Model",
    })?;
    let firmware = snapshot
        .status()
        .and_then(|s| s.firmware())
        .ok_or(ExtractError::MissingField {
            category: Category::Status,
            field: "FirmwareVersion",
        })?;

    Ok(vec![Sample {
        labels: vec![
            mac.to_string(),
            model.to_string(),
            serial.to_string(),
            firmware.to_string(),
        ],
        value: 1.0,
    }])
}

fn availability(snapshot: &DeviceSnapshot) -> Result<Vec<Sample>, ExtractError> {
    let value = if snapshot.available {
        AVAILABLE
    } else {
        UNAVAILABLE
    };
    Ok(vec![Sample::plain(value)])
}

fn status(snapshot: &DeviceSnapshot) -> Result<Vec<Sample>, ExtractError> {
    let summary = snapshot
        .summary()
        .ok_or(ExtractError::MissingCategory(Category::Summary))?;
    let power_mode = summary
        .power_mode
        .as_deref()
        .ok_or(ExtractError::MissingField {
            category: Category::Summary,
            field: "Power Mode",
        })?;
    let error_codes = snapshot
        .error_codes()
        .ok_or(ExtractError::MissingCategory(Category::ErrorCode))?;
    let boards = snapshot
        .boards()
        .ok_or(ExtractError::MissingCategory(Category::Devs))?;
    let overall = composite_status(boards.iter().map(|b| b.status.as_deref()))
        .ok_or(ExtractError::NoBoards)?;

    Ok(vec![Sample {
        labels: vec![
            power_mode.to_string(),
            error_codes.join(" "),
            overall.to_string(),
        ],
        value: 1.0,
    }])
}

fn upfreq(snapshot: &DeviceSnapshot) -> Result<Vec<Sample>, ExtractError> {
    let boards = snapshot
        .boards()
        .ok_or(ExtractError::MissingCategory(Category::Devs))?;
    let complete = upgrade_complete(boards.iter().map(|b| b.upfreq_complete));
    Ok(vec![Sample::plain(if complete { 1.0 } else { 0.0 })])
}

fn efficiency(snapshot: &DeviceSnapshot) -> Result<Vec<Sample>, ExtractError> {
    let summary = snapshot
        .summary()
        .ok_or(ExtractError::MissingCategory(Category::Summary))?;
    let power = summary.power.ok_or(ExtractError::MissingField {
        category: Category::Summary,
        field: "Power",
    })?;
    let ths = terahash(summary).ok_or(ExtractError::MissingField {
        category: Category::Summary,
        field: "HS RT",
    })?;
    if ths <= 0.0 {
        return Err(ExtractError::Invalid {
            field: "HS RT",
            reason: "hashrate is zero".to_string(),
        });
    }
    Ok(vec![Sample::plain(power / ths)])
}

fn pool_status(snapshot: &DeviceSnapshot) -> Result<Vec<Sample>, ExtractError> {
    let pools = snapshot
        .pools()
        .ok_or(ExtractError::MissingCategory(Category::Pools))?;

    Ok(pools
        .iter()
        .enumerate()
        .map(|(index, pool)| Sample {
            labels: vec![
                pool_label(index, pool),
                pool.url.clone().unwrap_or_default(),
                pool.status.clone().unwrap_or_default(),
                pool.user.clone().unwrap_or_default(),
            ],
            value: 1.0,
        })
        .collect())
}
