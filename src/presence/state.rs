//! Pure presence logic: no I/O, no clocks of its own.
//!
//! A device is active while its most recent confirmed proof of life is
//! younger than the active window. Proof of life is either a heartbeat value
//! that differs from the previous one (whatever its embedded timestamp says)
//! or, on the very first observation, an embedded timestamp that is plausibly
//! recent. An unchanged value confirms nothing and simply ages out.

use std::time::Duration;

use tokio::time::Instant;

use crate::{
    config::CoreConfig,
    models::{DeviceStatus, HeartbeatRecord},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceParams {
    pub active_window: Duration,
    pub grace_past: Duration,
}

impl From<&CoreConfig> for PresenceParams {
    fn from(config: &CoreConfig) -> Self {
        Self {
            active_window: config.active_window(),
            grace_past: config.grace_past,
        }
    }
}

/// What a single heartbeat observation turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Value differs from the last one seen.
    Changed,
    /// First value ever seen, embedded timestamp plausible.
    FirstFresh,
    /// First value ever seen, embedded timestamp too old or too far ahead.
    FirstStale,
    Unchanged,
    /// No heartbeat record, or one that could not be parsed.
    Missing,
    /// The device wrote `status: offline`.
    ReportedOffline,
    /// The store could not be read.
    Unreachable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub active: bool,
    /// True on the first evaluation and whenever `active` flips.
    pub changed: bool,
    pub observation: Option<Observation>,
}

#[derive(Debug, Clone, Default)]
pub struct PresenceState {
    last_observed_value: Option<i64>,
    /// Local time of the most recent confirmed activation.
    last_confirmed: Option<Instant>,
    current_estimate: bool,
    published: bool,
}

impl PresenceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_estimate(&self) -> bool {
        self.current_estimate
    }

    pub fn last_observed_value(&self) -> Option<i64> {
        self.last_observed_value
    }

    pub fn observe(
        &mut self,
        record: Option<&HeartbeatRecord>,
        now: Instant,
        now_epoch_secs: i64,
        params: &PresenceParams,
    ) -> PresenceUpdate {
        let observation = match record {
            None => Observation::Missing,
            Some(record) => {
                let previous = self.last_observed_value.replace(record.last_seen);
                let first = previous.is_none();
                let changed = !first && previous != Some(record.last_seen);

                if record.status == DeviceStatus::Offline {
                    self.last_confirmed = None;
                    Observation::ReportedOffline
                } else if changed {
                    self.last_confirmed = Some(now);
                    Observation::Changed
                } else if first {
                    if timestamp_is_plausible(record.last_seen, now_epoch_secs, params) {
                        self.last_confirmed = Some(now);
                        Observation::FirstFresh
                    } else {
                        Observation::FirstStale
                    }
                } else {
                    Observation::Unchanged
                }
            }
        };

        let active = match observation {
            Observation::Missing | Observation::ReportedOffline => false,
            _ => self.confirmed_within_window(now, params),
        };
        self.publish(active, Some(observation))
    }

    /// Re-evaluates without a new observation; the estimate only decays.
    pub fn evaluate(&mut self, now: Instant, params: &PresenceParams) -> PresenceUpdate {
        let active = self.current_estimate && self.confirmed_within_window(now, params);
        self.publish(active, None)
    }

    /// A failed read counts as offline but keeps history, so the next
    /// successful read can still detect a changed value.
    pub fn mark_unreachable(&mut self) -> PresenceUpdate {
        self.publish(false, Some(Observation::Unreachable))
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn confirmed_within_window(&self, now: Instant, params: &PresenceParams) -> bool {
        self.last_confirmed
            .map(|confirmed| now.saturating_duration_since(confirmed) < params.active_window)
            .unwrap_or(false)
    }

    fn publish(&mut self, active: bool, observation: Option<Observation>) -> PresenceUpdate {
        let changed = !self.published || active != self.current_estimate;
        self.published = true;
        self.current_estimate = active;
        PresenceUpdate {
            active,
            changed,
            observation,
        }
    }
}

/// `now - last_seen` must fall in `[-grace_past, active_window]`.
fn timestamp_is_plausible(last_seen: i64, now_epoch_secs: i64, params: &PresenceParams) -> bool {
    let age = now_epoch_secs.saturating_sub(last_seen);
    let window = params.active_window.as_secs() as i64;
    let grace = params.grace_past.as_secs() as i64;
    (-grace..=window).contains(&age)
}
