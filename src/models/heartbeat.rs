use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Liveness record the device rewrites every heartbeat interval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatRecord {
    #[serde(default)]
    pub status: DeviceStatus,
    /// Device clock, epoch seconds. Not trusted for freshness on its own.
    #[serde(rename = "last_seen", alias = "lastSeenEpochSeconds")]
    pub last_seen: i64,
}

impl HeartbeatRecord {
    pub fn new(status: DeviceStatus, last_seen: i64) -> Self {
        Self { status, last_seen }
    }

    /// `None` for absent or malformed heartbeat nodes.
    pub fn from_value(value: Option<&Value>) -> Option<Self> {
        let value = value?;
        if !value.is_object() {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }
}
