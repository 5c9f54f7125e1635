//! Configuration for schedules and outbound synchronization
//!
//! Every field has a default, so a JSON file only needs to name the values
//! it overrides. Durations are given in milliseconds.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::push::TransmissionType;

/// Errors while loading a configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Complete synchronization configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub schedule: ScheduleConfig,
    pub push: PushConfig,
}

/// History bound for one entity's two schedules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySize {
    pub status: usize,
    pub admin_status: usize,
}

impl HistorySize {
    pub const fn new(status: usize, admin_status: usize) -> Self {
        Self { status, admin_status }
    }
}

impl Default for HistorySize {
    fn default() -> Self {
        Self::new(
            crate::schedule::DEFAULT_MAX_SCHEDULE_SIZE,
            crate::schedule::DEFAULT_MAX_SCHEDULE_SIZE,
        )
    }
}

/// History bounds per entity kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub evse: HistorySize,
    pub charging_station: HistorySize,
    pub charging_pool: HistorySize,
    pub operator: HistorySize,
    pub roaming_network: HistorySize,
    pub group: HistorySize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            evse: HistorySize::new(50, 50),
            charging_station: HistorySize::new(30, 30),
            charging_pool: HistorySize::new(20, 20),
            operator: HistorySize::new(15, 15),
            roaming_network: HistorySize::new(15, 15),
            group: HistorySize::new(20, 20),
        }
    }
}

/// Outbound push/pull settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// Per-receiver deadline
    #[serde(with = "millis")]
    pub request_timeout: Duration,

    /// Transmission used when the caller does not choose one
    pub transmission_type: TransmissionType,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            transmission_type: TransmissionType::Direct,
        }
    }
}

impl SyncConfig {
    /// Parse a (possibly partial) JSON document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a (possibly partial) JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Set the per-receiver deadline
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.push.request_timeout = timeout;
        self
    }

    /// Set the default transmission type
    pub fn with_transmission_type(mut self, transmission_type: TransmissionType) -> Self {
        self.push.transmission_type = transmission_type;
        self
    }

    /// Set the EVSE history bounds
    pub fn with_evse_history(mut self, size: HistorySize) -> Self {
        self.schedule.evse = size;
        self
    }

    /// Set the group history bounds
    pub fn with_group_history(mut self, size: HistorySize) -> Self {
        self.schedule.group = size;
        self
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
