use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::{dedup::NewEvent, models::KeyedEvent};

use super::registry::SurfaceRegistry;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

pub const ALERT_TITLE: &str = "DOORBELL ALERT!";

/// What the user sees for one doorbell press.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DoorbellAlert {
    pub event_id: String,
    pub time: String,
    pub date: String,
    pub timestamp: i64,
    pub title: String,
    pub body: String,
}

impl DoorbellAlert {
    pub fn new(event_id: impl Into<String>, time: &str, date: &str, timestamp: i64) -> Self {
        Self {
            event_id: event_id.into(),
            time: time.to_string(),
            date: date.to_string(),
            timestamp,
            title: ALERT_TITLE.to_string(),
            body: format!("Someone is at your door!\n\nTime: {time}\nDate: {date}"),
        }
    }

    /// Synthetic alert for manual testing; never enters the ledger.
    pub fn test(timestamp_millis: i64) -> Self {
        Self::new(
            format!("test_{timestamp_millis}_TestTime_TestDate"),
            "Test Time",
            "Test Date",
            timestamp_millis,
        )
    }
}

impl From<&NewEvent> for DoorbellAlert {
    fn from(new_event: &NewEvent) -> Self {
        Self::new(
            new_event.event_id.clone(),
            &new_event.event.time,
            &new_event.event.date,
            new_event.event.timestamp,
        )
    }
}

/// Background notification channel used when no surface is showing.
pub trait PassiveNotifier: Send + Sync {
    fn notify(&self, alert: &DoorbellAlert) -> Result<()>;
}

/// Notifier that only writes the alert to the log.
pub struct LogNotifier;

impl PassiveNotifier for LogNotifier {
    fn notify(&self, alert: &DoorbellAlert) -> Result<()> {
        log::info!("{}: {}", alert.title, alert.body.replace('\n', " "));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Shown on the named surface.
    Surface(String),
    Passive,
    /// Both routes failed; logged only.
    Dropped,
}

/// Routes every alert to exactly one place: the current surface, or the
/// passive notifier when there is none or it failed to render.
pub struct AlertDispatcher {
    registry: Arc<SurfaceRegistry>,
    notifier: Arc<dyn PassiveNotifier>,
}

impl AlertDispatcher {
    pub fn new(registry: Arc<SurfaceRegistry>, notifier: Arc<dyn PassiveNotifier>) -> Self {
        Self { registry, notifier }
    }

    pub fn registry(&self) -> &Arc<SurfaceRegistry> {
        &self.registry
    }

    pub fn dispatch(&self, alert: &DoorbellAlert) -> DispatchOutcome {
        if let Some(surface) = self.registry.get_current() {
            match surface.on_new_doorbell_event(alert) {
                Ok(()) => {
                    log_info!("Alert {} shown on {}", alert.event_id, surface.name());
                    return DispatchOutcome::Surface(surface.name().to_string());
                }
                Err(err) => log_warn!(
                    "Surface {} failed to show alert {}: {err:?}; falling back to notification",
                    surface.name(),
                    alert.event_id
                ),
            }
        }

        match self.notifier.notify(alert) {
            Ok(()) => {
                log_info!("Alert {} sent as passive notification", alert.event_id);
                DispatchOutcome::Passive
            }
            Err(err) => {
                log_error!("Passive notification for {} failed: {err:?}", alert.event_id);
                DispatchOutcome::Dropped
            }
        }
    }

    /// Forwards the presence estimate to the current surface, if any.
    pub fn publish_device_active(&self, active: bool) {
        match self.registry.get_current() {
            Some(surface) => surface.on_device_active(active),
            None => log_debug!("No surface for device status {active}"),
        }
    }

    /// Forwards the full event list (newest first) to the current surface.
    pub fn publish_event_list(&self, events: &[KeyedEvent]) {
        if let Some(surface) = self.registry.get_current() {
            surface.on_event_list_changed(events);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::Surface;
    use anyhow::bail;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        alerts: Mutex<Vec<String>>,
        fail: bool,
    }

    impl Surface for Recorder {
        fn name(&self) -> &str {
            "home"
        }
        fn on_device_active(&self, _active: bool) {}
        fn on_new_doorbell_event(&self, alert: &DoorbellAlert) -> Result<()> {
            if self.fail {
                bail!("view detached");
            }
            self.alerts.lock().unwrap().push(alert.event_id.clone());
            Ok(())
        }
        fn on_event_list_changed(&self, _events: &[KeyedEvent]) {}
    }

    #[derive(Default)]
    struct CountingNotifier {
        sent: Mutex<Vec<String>>,
        fail: bool,
    }

    impl PassiveNotifier for CountingNotifier {
        fn notify(&self, alert: &DoorbellAlert) -> Result<()> {
            if self.fail {
                bail!("notifications disabled");
            }
            self.sent.lock().unwrap().push(alert.event_id.clone());
            Ok(())
        }
    }

    fn alert() -> DoorbellAlert {
        DoorbellAlert::new("e1", "10:32 AM", "Jan 01, 2025", 10)
    }

    #[test]
    fn alert_text() {
        let alert = alert();
        assert_eq!(alert.title, "DOORBELL ALERT!");
        assert_eq!(
            alert.body,
            "Someone is at your door!\n\nTime: 10:32 AM\nDate: Jan 01, 2025"
        );

        let test = DoorbellAlert::test(42);
        assert_eq!(test.event_id, "test_42_TestTime_TestDate");
        assert_eq!(test.time, "Test Time");
        assert_eq!(test.date, "Test Date");
    }

    #[test]
    fn surface_wins_and_notifier_is_untouched() {
        let registry = Arc::new(SurfaceRegistry::new());
        let notifier = Arc::new(CountingNotifier::default());
        let dispatcher = AlertDispatcher::new(registry.clone(), notifier.clone());

        let recorder = Arc::new(Recorder::default());
        let surface: Arc<dyn Surface> = recorder.clone();
        registry.set_current(Some(&surface));

        assert_eq!(dispatcher.dispatch(&alert()), DispatchOutcome::Surface("home".into()));
        assert_eq!(*recorder.alerts.lock().unwrap(), vec!["e1".to_string()]);
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn no_surface_goes_passive() {
        let notifier = Arc::new(CountingNotifier::default());
        let dispatcher = AlertDispatcher::new(Arc::new(SurfaceRegistry::new()), notifier.clone());

        assert_eq!(dispatcher.dispatch(&alert()), DispatchOutcome::Passive);
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn failing_surface_degrades_to_passive() {
        let registry = Arc::new(SurfaceRegistry::new());
        let notifier = Arc::new(CountingNotifier::default());
        let dispatcher = AlertDispatcher::new(registry.clone(), notifier.clone());

        let surface: Arc<dyn Surface> = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        registry.set_current(Some(&surface));

        assert_eq!(dispatcher.dispatch(&alert()), DispatchOutcome::Passive);
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn total_failure_is_swallowed() {
        let notifier = Arc::new(CountingNotifier {
            fail: true,
            ..Default::default()
        });
        let dispatcher = AlertDispatcher::new(Arc::new(SurfaceRegistry::new()), notifier);
        assert_eq!(dispatcher.dispatch(&alert()), DispatchOutcome::Dropped);
    }
}
