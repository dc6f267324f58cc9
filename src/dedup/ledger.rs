use std::collections::HashSet;

use crate::db::PersistedLedger;

/// Why a candidate event was or was not treated as new.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    New,
    AlreadyNotified,
    SameAsLast,
    /// Older than the last alerted event; accepting it would regress.
    Stale,
}

/// In-memory view of the events already alerted for one account.
///
/// Ids are only ever added; [`NotifiedLedger::clear`] exists for debug resets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifiedLedger {
    order: Vec<String>,
    notified: HashSet<String>,
    last_event_id: Option<String>,
    last_timestamp: i64,
}

impl NotifiedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.notified.contains(event_id)
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    pub fn last_timestamp(&self) -> i64 {
        self.last_timestamp
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Notified ids in first-recorded order.
    pub fn event_ids(&self) -> &[String] {
        &self.order
    }

    /// Checks run in order: membership, last id, timestamp regression.
    pub fn evaluate(&self, event_id: &str, timestamp: i64) -> Verdict {
        if self.contains(event_id) {
            Verdict::AlreadyNotified
        } else if self.last_event_id.as_deref() == Some(event_id) {
            Verdict::SameAsLast
        } else if timestamp < self.last_timestamp {
            Verdict::Stale
        } else {
            Verdict::New
        }
    }

    /// Records an alerted event and makes it the latest.
    pub fn record_alerted(&mut self, event_id: &str, timestamp: i64) {
        self.insert(event_id);
        self.last_event_id = Some(event_id.to_string());
        self.last_timestamp = self.last_timestamp.max(timestamp);
    }

    /// Adds `event_id` without touching the "latest" fields. Returns false
    /// when it was already present.
    pub fn insert(&mut self, event_id: &str) -> bool {
        if self.notified.insert(event_id.to_string()) {
            self.order.push(event_id.to_string());
            true
        } else {
            false
        }
    }

    /// Drops the "last alerted" fields so timestamps from a different device
    /// are not compared against this one's. Notified ids stay.
    pub fn forget_latest(&mut self) {
        self.last_event_id = None;
        self.last_timestamp = 0;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

impl From<PersistedLedger> for NotifiedLedger {
    fn from(persisted: PersistedLedger) -> Self {
        let mut ledger = NotifiedLedger::new();
        for event_id in &persisted.event_ids {
            ledger.insert(event_id);
        }
        ledger.last_event_id = persisted.last_event_id;
        ledger.last_timestamp = persisted.last_timestamp;
        ledger
    }
}

impl From<&NotifiedLedger> for PersistedLedger {
    fn from(ledger: &NotifiedLedger) -> Self {
        PersistedLedger {
            event_ids: ledger.order.clone(),
            last_event_id: ledger.last_event_id.clone(),
            last_timestamp: ledger.last_timestamp,
        }
    }
}
