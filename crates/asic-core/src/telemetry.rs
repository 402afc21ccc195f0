//! Typed telemetry responses, one per API category
//!
//! Miner firmware is loose about JSON types: numbers arrive as strings,
//! completion flags as `0`/`1`, error codes as strings or single-entry
//! objects. Every field is optional and the decoders in [`lenient`] map
//! anything unusable to `None`, so one odd field never sinks a whole
//! category. What a missing field means is decided by the extraction schema.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Telemetry category fetched from every device each cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Network identity (MAC, serial number)
    Info,
    /// Hashboard details (model)
    DevDetails,
    /// Per-board device status
    Devs,
    /// Active error codes
    ErrorCode,
    /// Summary counters
    Summary,
    /// Status and firmware information
    Status,
    /// Power supply telemetry
    Psu,
    /// Pool configuration and status
    Pools,
}

impl Category {
    /// All categories in fetch order
    pub const ALL: [Category; 8] = [
        Category::Info,
        Category::DevDetails,
        Category::Devs,
        Category::ErrorCode,
        Category::Summary,
        Category::Status,
        Category::Psu,
        Category::Pools,
    ];

    /// API command that returns this category
    pub fn command(self) -> &'static str {
        match self {
            Category::Info => "get_miner_info",
            Category::DevDetails => "devdetails",
            Category::Devs => "devs",
            Category::ErrorCode => "get_error_code",
            Category::Summary => "summary",
            Category::Status => "status",
            Category::Psu => "get_psu",
            Category::Pools => "pools",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Info => "info",
            Category::DevDetails => "devdetails",
            Category::Devs => "devs",
            Category::ErrorCode => "error_code",
            Category::Summary => "summary",
            Category::Status => "status",
            Category::Psu => "psu",
            Category::Pools => "pools",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `get_miner_info` response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MinerInfoResponse {
    #[serde(rename = "Msg", default)]
    pub msg: Option<MinerInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MinerInfo {
    #[serde(default, deserialize_with = "lenient::string")]
    pub mac: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub minersn: Option<String>,
}

/// `devdetails` response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DevDetailsResponse {
    #[serde(rename = "DEVDETAILS", default)]
    pub details: Vec<DevDetail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DevDetail {
    #[serde(rename = "Model", default, deserialize_with = "lenient::string")]
    pub model: Option<String>,
}

/// `devs` response: one entry per hashboard
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DevsResponse {
    #[serde(rename = "DEVS", default)]
    pub boards: Vec<BoardDev>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BoardDev {
    #[serde(rename = "Slot", default, deserialize_with = "lenient::index")]
    pub slot: Option<u32>,
    #[serde(rename = "Status", default, deserialize_with = "lenient::string")]
    pub status: Option<String>,
    #[serde(rename = "Temperature", default, deserialize_with = "lenient::number")]
    pub temperature: Option<f64>,
    #[serde(rename = "Chip Temp Min", default, deserialize_with = "lenient::number")]
    pub chip_temp_min: Option<f64>,
    #[serde(rename = "Chip Temp Max", default, deserialize_with = "lenient::number")]
    pub chip_temp_max: Option<f64>,
    #[serde(rename = "Chip Temp Avg", default, deserialize_with = "lenient::number")]
    pub chip_temp_avg: Option<f64>,
    #[serde(rename = "Upfreq Complete", default, deserialize_with = "lenient::flag")]
    pub upfreq_complete: Option<bool>,
}

/// `get_error_code` response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorCodeResponse {
    #[serde(rename = "Msg", default)]
    pub msg: Option<ErrorCodeMsg>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorCodeMsg {
    #[serde(default, deserialize_with = "lenient::error_codes")]
    pub error_code: Vec<String>,
}

/// `summary` response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SummaryResponse {
    #[serde(rename = "SUMMARY", default)]
    pub entries: Vec<SummaryEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SummaryEntry {
    #[serde(rename = "Elapsed", default, deserialize_with = "lenient::number")]
    pub elapsed: Option<f64>,
    #[serde(rename = "Uptime", default, deserialize_with = "lenient::number")]
    pub uptime: Option<f64>,
    /// Realtime hashrate in MH/s
    #[serde(rename = "HS RT", default, deserialize_with = "lenient::number")]
    pub hs_rt: Option<f64>,
    #[serde(rename = "Temperature", default, deserialize_with = "lenient::number")]
    pub temperature: Option<f64>,
    #[serde(rename = "Env Temp", default, deserialize_with = "lenient::number")]
    pub env_temp: Option<f64>,
    #[serde(rename = "Fan Speed In", default, deserialize_with = "lenient::number")]
    pub fan_speed_in: Option<f64>,
    #[serde(rename = "Fan Speed Out", default, deserialize_with = "lenient::number")]
    pub fan_speed_out: Option<f64>,
    #[serde(rename = "Power", default, deserialize_with = "lenient::number")]
    pub power: Option<f64>,
    #[serde(rename = "Power Limit", default, deserialize_with = "lenient::number")]
    pub power_limit: Option<f64>,
    #[serde(rename = "Power Mode", default, deserialize_with = "lenient::string")]
    pub power_mode: Option<String>,
}

/// `status` response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusResponse {
    #[serde(rename = "Msg", default)]
    pub msg: Option<StatusMsg>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusMsg {
    #[serde(rename = "FirmwareVersion", default, deserialize_with = "lenient::string")]
    pub firmware_version: Option<String>,
}

impl StatusMsg {
    /// Firmware version without the single quotes some firmwares wrap it in
    pub fn firmware(&self) -> Option<&str> {
        self.firmware_version
            .as_deref()
            .map(|v| v.trim().trim_matches('\''))
            .filter(|v| !v.is_empty())
    }
}

/// `get_psu` response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PsuResponse {
    #[serde(rename = "Msg", default)]
    pub msg: Option<PsuMsg>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PsuMsg {
    /// Input voltage in hundredths of a volt
    #[serde(default, deserialize_with = "lenient::number")]
    pub vin: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub temp0: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub fan_speed: Option<f64>,
}

/// `pools` response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoolsResponse {
    #[serde(rename = "POOLS", default)]
    pub pools: Vec<PoolEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoolEntry {
    #[serde(rename = "POOL", default, deserialize_with = "lenient::index")]
    pub pool: Option<u32>,
    #[serde(rename = "URL", default, deserialize_with = "lenient::string")]
    pub url: Option<String>,
    #[serde(rename = "Status", default, deserialize_with = "lenient::string")]
    pub status: Option<String>,
    #[serde(rename = "User", default, deserialize_with = "lenient::string")]
    pub user: Option<String>,
    #[serde(rename = "Last Share Time", default, deserialize_with = "lenient::number")]
    pub last_share_time: Option<f64>,
    #[serde(rename = "Pool Rejected%", default, deserialize_with = "lenient::number")]
    pub rejected_percent: Option<f64>,
}

/// Decoders that turn inconsistently typed JSON into `Option`s
mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn as_f64(value: &Value) -> Option<f64> {
        let parsed = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        parsed.filter(|v| v.is_finite())
    }

    pub fn number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value.as_ref().and_then(as_f64))
    }

    /// Strings pass through, numbers and booleans are rendered, the rest is `None`
    pub fn string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        })
    }

    pub fn index<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value
            .as_ref()
            .and_then(as_f64)
            .filter(|v| *v >= 0.0 && v.fract() == 0.0 && *v <= u32::MAX as f64)
            .map(|v| v as u32))
    }

    pub fn flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            Some(Value::Bool(b)) => Some(b),
            Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "y" | "yes" => Some(true),
                "false" | "0" | "n" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        })
    }

    /// Error codes come as `["110"]`, `[110]` or `[{"110": "2024-01-01 00:00:00"}]`
    pub fn error_codes<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        let Some(Value::Array(entries)) = value else {
            return Ok(Vec::new());
        };

        let mut codes = Vec::new();
        for entry in entries {
            match entry {
                Value::String(s) => codes.push(s),
                Value::Number(n) => codes.push(n.to_string()),
                Value::Object(map) => codes.extend(map.keys().cloned()),
                _ => {}
            }
        }
        Ok(codes)
    }
}
