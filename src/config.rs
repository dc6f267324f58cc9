use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

/// How a doorbell event is identified for duplicate detection.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum EventIdPolicy {
    /// Use the store's child key, falling back to the composite when a key is
    /// missing.
    #[default]
    StoreKey,
    /// Always use `{timestamp}_{time}_{date}`. Two presses with identical
    /// formatted values collapse into one event.
    Composite,
}

/// Tunables for the listening core.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreConfig {
    /// How often the remote device writes its heartbeat.
    pub heartbeat_interval: Duration,
    /// Slack added to the heartbeat interval before a device counts as gone.
    pub active_buffer: Duration,
    /// How far in the future a first-seen heartbeat may claim to be.
    pub grace_past: Duration,
    /// Period of the presence re-validation loop.
    pub validation_period: Duration,
    /// Delay before re-subscribing after the store cancels a subscription.
    pub resubscribe_delay: Duration,
    /// Number of events shown as "recent activity".
    pub recent_activity_limit: usize,
    pub event_id_policy: EventIdPolicy,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            active_buffer: Duration::from_secs(3),
            grace_past: Duration::from_secs(5),
            validation_period: Duration::from_secs(2),
            resubscribe_delay: Duration::from_secs(5),
            recent_activity_limit: 10,
            event_id_policy: EventIdPolicy::StoreKey,
        }
    }
}

impl CoreConfig {
    /// Defaults overridden by `KNOCKTRACK_*` environment variables.
    ///
    /// Durations are whole seconds. Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let secs = |key: &str, target: &mut Duration| {
            if let Some(raw) = lookup(key) {
                match raw.trim().parse::<u64>() {
                    Ok(value) => *target = Duration::from_secs(value),
                    Err(_) => warn!("Ignoring {key}={raw:?}: expected whole seconds"),
                }
            }
        };

        secs("KNOCKTRACK_HEARTBEAT_INTERVAL_SECS", &mut config.heartbeat_interval);
        secs("KNOCKTRACK_ACTIVE_BUFFER_SECS", &mut config.active_buffer);
        secs("KNOCKTRACK_GRACE_PAST_SECS", &mut config.grace_past);
        secs("KNOCKTRACK_VALIDATION_PERIOD_SECS", &mut config.validation_period);
        secs("KNOCKTRACK_RESUBSCRIBE_DELAY_SECS", &mut config.resubscribe_delay);

        if let Some(raw) = lookup("KNOCKTRACK_RECENT_LIMIT") {
            match raw.trim().parse::<usize>() {
                Ok(limit) if limit > 0 => config.recent_activity_limit = limit,
                _ => warn!("Ignoring KNOCKTRACK_RECENT_LIMIT={raw:?}"),
            }
        }

        if let Some(raw) = lookup("KNOCKTRACK_EVENT_ID_POLICY") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "storekey" | "store_key" | "key" => config.event_id_policy = EventIdPolicy::StoreKey,
                "composite" => config.event_id_policy = EventIdPolicy::Composite,
                _ => warn!("Ignoring KNOCKTRACK_EVENT_ID_POLICY={raw:?}"),
            }
        }

        let debug_mode = lookup("KNOCKTRACK_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if debug_mode {
            config.validation_period = Duration::from_secs(1);
        }

        if config.validation_period.is_zero() {
            warn!("Validation period of zero is not allowed, using 1s");
            config.validation_period = Duration::from_secs(1);
        }

        config
    }

    /// Heartbeat interval plus buffer: how long one proof of life lasts.
    pub fn active_window(&self) -> Duration {
        self.heartbeat_interval + self.active_buffer
    }
}
