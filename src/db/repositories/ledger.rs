use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::db::{models::PersistedLedger, Database};

impl Database {
    /// Everything already alerted for `account`. Empty for unknown accounts.
    pub async fn load_ledger(&self, account: &str) -> Result<PersistedLedger> {
        let account = account.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT event_id FROM notified_events
                 WHERE account = ?1
                 ORDER BY seq ASC",
            )?;
            let event_ids = stmt
                .query_map(params![account], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()
                .context("failed to read notified events")?;

            let state: Option<(Option<String>, i64)> = conn
                .query_row(
                    "SELECT last_event_id, last_timestamp FROM ledger_state WHERE account = ?1",
                    params![account],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .context("failed to read ledger state")?;

            let (last_event_id, last_timestamp) = state.unwrap_or((None, 0));
            Ok(PersistedLedger {
                event_ids,
                last_event_id,
                last_timestamp,
            })
        })
        .await
    }

    /// Adds `event_id` to the account's ledger in one transaction.
    ///
    /// Re-recording a known id is a no-op for the id set. With `advance_last`
    /// the "last alerted" fields move to this event.
    pub async fn record_notified(
        &self,
        account: &str,
        event_id: &str,
        event_timestamp: i64,
        advance_last: bool,
    ) -> Result<()> {
        let account = account.to_string();
        let event_id = event_id.to_string();
        self.execute(move |conn| {
            let now = Utc::now().to_rfc3339();
            let tx = conn
                .transaction()
                .context("failed to open ledger transaction")?;

            tx.execute(
                "INSERT OR IGNORE INTO notified_events (account, event_id, event_timestamp, notified_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![account, event_id, event_timestamp, now],
            )
            .context("failed to insert notified event")?;

            if advance_last {
                tx.execute(
                    "INSERT INTO ledger_state (account, last_event_id, last_timestamp, updated_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(account) DO UPDATE SET
                         last_event_id = excluded.last_event_id,
                         last_timestamp = max(ledger_state.last_timestamp, excluded.last_timestamp),
                         updated_at = excluded.updated_at",
                    params![account, event_id, event_timestamp, now],
                )
                .context("failed to update ledger state")?;
            }

            tx.commit().context("failed to commit ledger update")?;
            Ok(())
        })
        .await
    }

    /// Drops the "last alerted" fields for `account`; the id set is kept.
    pub async fn forget_last_alerted(&self, account: &str) -> Result<()> {
        let account = account.to_string();
        self.execute(move |conn| {
            conn.execute("DELETE FROM ledger_state WHERE account = ?1", params![account])
                .context("failed to clear ledger state")?;
            Ok(())
        })
        .await
    }

    /// Forgets every alerted event for `account`. Debug and test use only.
    pub async fn reset_ledger(&self, account: &str) -> Result<()> {
        let account = account.to_string();
        self.execute(move |conn| {
            let tx = conn
                .transaction()
                .context("failed to open ledger reset transaction")?;
            tx.execute(
                "DELETE FROM notified_events WHERE account = ?1",
                params![account],
            )?;
            tx.execute("DELETE FROM ledger_state WHERE account = ?1", params![account])?;
            tx.commit().context("failed to commit ledger reset")?;
            Ok(())
        })
        .await
    }
}
