//! Per-device snapshot assembled once per poll cycle

use chrono::{DateTime, Utc};
use std::net::IpAddr;

use crate::telemetry::{
    BoardDev, Category, DevDetailsResponse, DevsResponse, ErrorCodeResponse, MinerInfo,
    MinerInfoResponse, PoolEntry, PoolsResponse, PsuMsg, PsuResponse, StatusMsg,
    StatusResponse, SummaryEntry, SummaryResponse,
};

/// Decoded category responses for one device. A category is `None` when
/// its fetch failed, timed out, or did not decode.
#[derive(Debug, Clone, Default)]
pub struct Categories {
    pub info: Option<MinerInfoResponse>,
    pub devdetails: Option<DevDetailsResponse>,
    pub devs: Option<DevsResponse>,
    pub error_code: Option<ErrorCodeResponse>,
    pub summary: Option<SummaryResponse>,
    pub status: Option<StatusResponse>,
    pub psu: Option<PsuResponse>,
    pub pools: Option<PoolsResponse>,
}

impl Categories {
    /// Decode a raw API response into the slot for `category`
    pub fn insert(
        &mut self,
        category: Category,
        value: serde_json::Value,
    ) -> Result<(), serde_json::Error> {
        match category {
            Category::Info => self.info = Some(serde_json::from_value(value)?),
            Category::DevDetails => self.devdetails = Some(serde_json::from_value(value)?),
            Category::Devs => self.devs = Some(serde_json::from_value(value)?),
            Category::ErrorCode => self.error_code = Some(serde_json::from_value(value)?),
            Category::Summary => self.summary = Some(serde_json::from_value(value)?),
            Category::Status => self.status = Some(serde_json::from_value(value)?),
            Category::Psu => self.psu = Some(serde_json::from_value(value)?),
            Category::Pools => self.pools = Some(serde_json::from_value(value)?),
        }
        Ok(())
    }

    pub fn contains(&self, category: Category) -> bool {
        match category {
            Category::Info => self.info.is_some(),
            Category::DevDetails => self.devdetails.is_some(),
            Category::Devs => self.devs.is_some(),
            Category::ErrorCode => self.error_code.is_some(),
            Category::Summary => self.summary.is_some(),
            Category::Status => self.status.is_some(),
            Category::Psu => self.psu.is_some(),
            Category::Pools => self.pools.is_some(),
        }
    }

    /// True when no category was fetched successfully
    pub fn is_empty(&self) -> bool {
        !Category::ALL.iter().any(|c| self.contains(*c))
    }
}

/// One cycle's best-effort telemetry capture for one device
#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    pub address: IpAddr,
    /// Resolved location name
    pub location: String,
    /// At least one category was fetched successfully
    pub available: bool,
    pub collected_at: DateTime<Utc>,
    pub categories: Categories,
}

impl DeviceSnapshot {
    /// Create a snapshot; availability follows from the fetched categories
    pub fn new(address: IpAddr, location: impl Into<String>, categories: Categories) -> Self {
        Self {
            address,
            location: location.into(),
            available: !categories.is_empty(),
            collected_at: Utc::now(),
            categories,
        }
    }

    /// Categories that failed this cycle, in fetch order
    pub fn missing_categories(&self) -> Vec<Category> {
        Category::ALL
            .into_iter()
            .filter(|c| !self.categories.contains(*c))
            .collect()
    }

    pub fn info(&self) -> Option<&MinerInfo> {
        self.categories.info.as_ref()?.msg.as_ref()
    }

    /// Model name from the first hashboard detail entry
    pub fn model(&self) -> Option<&str> {
        self.categories
            .devdetails
            .as_ref()?
            .details
            .iter()
            .find_map(|d| d.model.as_deref())
    }

    /// Hashboards ordered by slot; entries without a slot keep response order
    pub fn boards(&self) -> Option<Vec<&BoardDev>> {
        let devs = self.categories.devs.as_ref()?;
        let mut boards: Vec<&BoardDev> = devs.boards.iter().collect();
        boards.sort_by_key(|b| b.slot.unwrap_or(u32::MAX));
        Some(boards)
    }

    pub fn error_codes(&self) -> Option<&[String]> {
        self.categories
            .error_code
            .as_ref()?
            .msg
            .as_ref()
            .map(|m| m.error_code.as_slice())
    }

    /// First summary entry
    pub fn summary(&self) -> Option<&SummaryEntry> {
        self.categories.summary.as_ref()?.entries.first()
    }

    pub fn status(&self) -> Option<&StatusMsg> {
        self.categories.status.as_ref()?.msg.as_ref()
    }

    pub fn psu(&self) -> Option<&PsuMsg> {
        self.categories.psu.as_ref()?.msg.as_ref()
    }

    pub fn pools(&self) -> Option<&[PoolEntry]> {
        self.categories.pools.as_ref().map(|p| p.pools.as_slice())
    }
}
