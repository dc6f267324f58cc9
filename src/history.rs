//! Read and maintenance operations over a device's stored event history.

use std::sync::Arc;

use chrono::{DateTime, Local, TimeZone};
use serde::Serialize;
use serde_json::Value;

use crate::{
    gateway::{EventStoreGateway, StorePath},
    models::{parse_event_children, DoorbellEvent, KeyedEvent},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventAnalytics {
    pub total: usize,
    pub today: usize,
    pub this_week: usize,
    /// `"{time} - {date}"` of the newest event, or `"Never"`.
    pub last_notification: String,
}

impl Default for EventAnalytics {
    fn default() -> Self {
        Self {
            total: 0,
            today: 0,
            this_week: 0,
            last_notification: "Never".to_string(),
        }
    }
}

pub struct EventHistory {
    gateway: Arc<dyn EventStoreGateway>,
    device_id: String,
    recent_limit: usize,
}

impl EventHistory {
    pub fn new(
        gateway: Arc<dyn EventStoreGateway>,
        device_id: impl Into<String>,
        recent_limit: usize,
    ) -> Self {
        Self {
            gateway,
            device_id: device_id.into(),
            recent_limit,
        }
    }

    fn events_path(&self) -> StorePath {
        StorePath::events(&self.device_id)
    }

    /// The last `recent_limit` events by store key, newest first.
    pub async fn recent_activity(&self) -> Vec<KeyedEvent> {
        match self
            .gateway
            .query_last(&self.events_path(), self.recent_limit)
            .await
        {
            Ok(rows) => newest_first(rows),
            Err(err) => {
                log_warn!("Failed to load recent activity for {}: {err:?}", self.device_id);
                Vec::new()
            }
        }
    }

    /// Every stored event, newest first.
    pub async fn all_events(&self) -> Vec<KeyedEvent> {
        match self.gateway.read(&self.events_path()).await {
            Ok(node) => {
                let (mut events, rejected) = parse_event_children(node.as_ref());
                if !rejected.is_empty() {
                    log_warn!("Skipped malformed events {:?} for {}", rejected, self.device_id);
                }
                events.sort_by(KeyedEvent::newest_first);
                events
            }
            Err(err) => {
                log_warn!("Failed to load events for {}: {err:?}", self.device_id);
                Vec::new()
            }
        }
    }

    /// Up to `limit` events with keys strictly before `before_key`, newest
    /// first. Pass the last key of one page to get the next.
    pub async fn page(&self, limit: usize, before_key: Option<&str>) -> Vec<KeyedEvent> {
        let rows = match self.gateway.query_ordered(&self.events_path()).await {
            Ok(rows) => rows,
            Err(err) => {
                log_warn!("Failed to page events for {}: {err:?}", self.device_id);
                return Vec::new();
            }
        };

        let eligible: Vec<(String, Value)> = rows
            .into_iter()
            .filter(|(key, _)| before_key.map_or(true, |before| key.as_str() < before))
            .collect();
        let skip = eligible.len().saturating_sub(limit);
        newest_first(eligible.into_iter().skip(skip).collect())
    }

    pub async fn delete_event(&self, key: &str) -> bool {
        match self.gateway.delete(&self.events_path().child(key)).await {
            Ok(()) => {
                log_info!("Deleted event {key} for {}", self.device_id);
                true
            }
            Err(err) => {
                log_warn!("Failed to delete event {key}: {err:?}");
                false
            }
        }
    }

    /// Deletes the first stored event whose timestamp matches.
    pub async fn delete_event_by_timestamp(&self, timestamp: i64) -> bool {
        let rows = match self.gateway.query_ordered(&self.events_path()).await {
            Ok(rows) => rows,
            Err(err) => {
                log_warn!("Failed to look up event at {timestamp}: {err:?}");
                return false;
            }
        };

        let found = rows.into_iter().find_map(|(key, value)| {
            let event: DoorbellEvent = serde_json::from_value(value).ok()?;
            (event.timestamp == timestamp).then_some(key)
        });

        match found {
            Some(key) => self.delete_event(&key).await,
            None => {
                log_warn!("No event with timestamp {timestamp} for {}", self.device_id);
                false
            }
        }
    }

    pub async fn clear_history(&self) -> bool {
        match self.gateway.delete(&self.events_path()).await {
            Ok(()) => {
                log_info!("Cleared event history for {}", self.device_id);
                true
            }
            Err(err) => {
                log_warn!("Failed to clear history for {}: {err:?}", self.device_id);
                false
            }
        }
    }

    pub async fn event_count(&self) -> usize {
        match self.gateway.read(&self.events_path()).await {
            Ok(Some(Value::Object(children))) => children.len(),
            Ok(_) => 0,
            Err(err) => {
                log_warn!("Failed to count events for {}: {err:?}", self.device_id);
                0
            }
        }
    }

    pub async fn analytics<Tz: TimeZone>(&self, now: DateTime<Tz>) -> EventAnalytics {
        summarize(&self.all_events().await, now)
    }
}

/// Counts events since local midnight and over the seven days before it.
/// Event timestamps are taken as epoch seconds.
pub fn summarize<Tz: TimeZone>(events: &[KeyedEvent], now: DateTime<Tz>) -> EventAnalytics {
    let Some(today_start) = start_of_day(&now) else {
        return EventAnalytics {
            total: events.len(),
            ..Default::default()
        };
    };
    let week_start = today_start - 7 * SECONDS_PER_DAY;

    let newest = events.iter().min_by(|a, b| KeyedEvent::newest_first(a, b));

    EventAnalytics {
        total: events.len(),
        today: events
            .iter()
            .filter(|e| e.event.timestamp >= today_start)
            .count(),
        this_week: events
            .iter()
            .filter(|e| e.event.timestamp >= week_start)
            .count(),
        last_notification: newest
            .map(|e| format!("{} - {}", e.event.time, e.event.date))
            .unwrap_or_else(|| "Never".to_string()),
    }
}

fn start_of_day<Tz: TimeZone>(now: &DateTime<Tz>) -> Option<i64> {
    let midnight = now.date_naive().and_hms_opt(0, 0, 0)?;
    now.timezone()
        .from_local_datetime(&midnight)
        .earliest()
        .map(|start| start.timestamp())
}

/// Epoch seconds become `h:mm AM/PM` local time; anything else is returned
/// unchanged.
pub fn format_event_time(raw: &str) -> String {
    format_event_time_in(raw, &Local)
}

pub fn format_event_time_in<Tz: TimeZone>(raw: &str, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return raw.to_string();
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|utc| utc.with_timezone(tz).format("%-I:%M %p").to_string())
        .unwrap_or_else(|| raw.to_string())
}

fn newest_first(rows: Vec<(String, Value)>) -> Vec<KeyedEvent> {
    let mut events: Vec<KeyedEvent> = rows
        .into_iter()
        .filter_map(|(key, value)| {
            serde_json::from_value::<DoorbellEvent>(value)
                .ok()
                .map(|event| KeyedEvent::new(key, event))
        })
        .collect();
    events.reverse();
    events
}

/// Checks a device identifier and shared secret against the store. Any
/// failure, including a missing device, is `false`.
pub async fn validate_device_credentials(
    gateway: &dyn EventStoreGateway,
    device_id: &str,
    shared_secret: &str,
) -> bool {
    if !crate::settings::validate_inputs(device_id, shared_secret) {
        return false;
    }

    match gateway.read(&StorePath::device(device_id)).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            log_warn!("Device {device_id} not found");
            return false;
        }
        Err(err) => {
            log_warn!("Failed to look up device {device_id}: {err:?}");
            return false;
        }
    }

    match gateway.read(&StorePath::auth_key(device_id)).await {
        Ok(Some(Value::String(key))) => key == shared_secret,
        Ok(_) => {
            log_warn!("Device {device_id} has no usable auth key");
            false
        }
        Err(err) => {
            log_warn!("Failed to read auth key for {device_id}: {err:?}");
            false
        }
    }
}
