use tokio::sync::{Mutex, MutexGuard};

use crate::{
    config::EventIdPolicy,
    db::{Database, PersistedLedger},
    models::{latest_event, DoorbellEvent, KeyedEvent},
};

use super::ledger::{NotifiedLedger, Verdict};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info};

/// An event that passed duplicate detection and is already in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub event_id: String,
    pub key: String,
    pub event: DoorbellEvent,
}

/// Turns full event-list snapshots into at most one new event each.
///
/// The ledger is loaded from the database on first use and every accepted
/// event is persisted before it is returned, so a restart never re-alerts it.
pub struct EventDeduplicator {
    account: String,
    policy: EventIdPolicy,
    db: Database,
    ledger: Mutex<Option<NotifiedLedger>>,
}

impl EventDeduplicator {
    pub fn new(account: impl Into<String>, policy: EventIdPolicy, db: Database) -> Self {
        Self {
            account: account.into(),
            policy,
            db,
            ledger: Mutex::new(None),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Latest-only policy: only the newest event in the snapshot is a
    /// candidate, so several presses between two snapshots coalesce.
    pub async fn on_snapshot(&self, events: &[KeyedEvent]) -> Vec<NewEvent> {
        let Some(mut guard) = self.loaded_ledger().await else {
            return Vec::new();
        };
        let Some(ledger) = guard.as_mut() else {
            return Vec::new();
        };

        let Some(candidate) = latest_event(events) else {
            log_debug!("No doorbell events in snapshot for {}", self.account);
            return Vec::new();
        };

        let event_id = candidate.event_id(self.policy);
        let timestamp = candidate.event.timestamp;

        match ledger.evaluate(&event_id, timestamp) {
            Verdict::New => {}
            verdict => {
                log_debug!(
                    "Ignoring event {event_id} (timestamp {timestamp}): {verdict:?}, last alerted {:?} at {}",
                    ledger.last_event_id(),
                    ledger.last_timestamp()
                );
                return Vec::new();
            }
        }

        // Persist first: a crash after this point drops the alert instead of
        // repeating it on restart.
        if let Err(err) = self
            .db
            .record_notified(&self.account, &event_id, timestamp, true)
            .await
        {
            log_error!("Failed to persist ledger entry {event_id}; not alerting: {err:?}");
            return Vec::new();
        }

        ledger.record_alerted(&event_id, timestamp);
        log_info!(
            "New doorbell event {event_id} at {} {} (timestamp {timestamp})",
            candidate.event.time,
            candidate.event.date
        );

        vec![NewEvent {
            event_id,
            key: candidate.key.clone(),
            event: candidate.event.clone(),
        }]
    }

    /// Records `event_id` as alerted. Calling it again changes nothing.
    pub async fn mark_delivered(&self, event_id: &str) {
        let Some(mut guard) = self.loaded_ledger().await else {
            return;
        };
        let Some(ledger) = guard.as_mut() else {
            return;
        };

        if ledger.contains(event_id) {
            return;
        }

        match self
            .db
            .record_notified(&self.account, event_id, 0, false)
            .await
        {
            Ok(()) => {
                ledger.insert(event_id);
            }
            Err(err) => log_error!("Failed to persist delivered event {event_id}: {err:?}"),
        }
    }

    /// False when the ledger cannot be loaded.
    pub async fn has_been_notified(&self, event_id: &str) -> bool {
        match self.loaded_ledger().await {
            Some(guard) => guard
                .as_ref()
                .map(|ledger| ledger.contains(event_id))
                .unwrap_or(false),
            None => false,
        }
    }

    /// Clears the ledger in memory and on disk. Debug and test use only.
    pub async fn reset(&self) {
        let mut guard = self.ledger.lock().await;
        match self.db.reset_ledger(&self.account).await {
            Ok(()) => {
                *guard = Some(NotifiedLedger::new());
                log_info!("Duplicate detection reset for {}", self.account);
            }
            Err(err) => {
                // Force a reload so memory matches whatever is still on disk.
                *guard = None;
                log_error!("Failed to reset ledger for {}: {err:?}", self.account);
            }
        }
    }

    /// Called when the account switches devices: the new device's clock has
    /// nothing to do with the old one's, so only membership carries over.
    pub async fn forget_latest(&self) {
        let Some(mut guard) = self.loaded_ledger().await else {
            return;
        };
        match self.db.forget_last_alerted(&self.account).await {
            Ok(()) => {
                if let Some(ledger) = guard.as_mut() {
                    ledger.forget_latest();
                }
                log_info!("Cleared last alerted event for {}", self.account);
            }
            Err(err) => {
                *guard = None;
                log_error!("Failed to clear last alerted event for {}: {err:?}", self.account);
            }
        }
    }

    /// Copy of the current ledger, if it could be loaded.
    pub async fn snapshot(&self) -> Option<PersistedLedger> {
        let guard = self.loaded_ledger().await?;
        guard.as_ref().map(PersistedLedger::from)
    }

    /// Locks the ledger, loading it first if needed. `None` when loading
    /// failed; the next call retries.
    async fn loaded_ledger(&self) -> Option<MutexGuard<'_, Option<NotifiedLedger>>> {
        let mut guard = self.ledger.lock().await;
        if guard.is_none() {
            match self.db.load_ledger(&self.account).await {
                Ok(persisted) => {
                    log_info!(
                        "Loaded ledger for {}: {} notified, last {:?} at {}",
                        self.account,
                        persisted.event_ids.len(),
                        persisted.last_event_id,
                        persisted.last_timestamp
                    );
                    *guard = Some(NotifiedLedger::from(persisted));
                }
                Err(err) => {
                    log_error!("Failed to load ledger for {}: {err:?}", self.account);
                    return None;
                }
            }
        }
        Some(guard)
    }
}
