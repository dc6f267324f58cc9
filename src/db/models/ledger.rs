use serde::{Deserialize, Serialize};

/// Ledger rows for one account as stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedLedger {
    /// Notified event ids in the order they were first recorded.
    pub event_ids: Vec<String>,
    pub last_event_id: Option<String>,
    pub last_timestamp: i64,
}
