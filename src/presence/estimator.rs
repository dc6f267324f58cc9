use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde_json::Value;
use tokio::time::{Duration, Instant};

use crate::{
    gateway::{EventStoreGateway, StorePath},
    models::HeartbeatRecord,
};

use super::{
    controller::ValidationController,
    state::{PresenceParams, PresenceState, PresenceUpdate},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const READ_TIMEOUT_SECS: u64 = 10;

/// Receives the new estimate on the first evaluation and on every change.
pub type ActiveCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Seconds since the Unix epoch.
pub type WallClock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Decides whether one device is currently alive from its heartbeat.
///
/// Heartbeats arrive two ways: pushed by a subscription through
/// [`PresenceEstimator::observe_value`], and pulled by [`PresenceEstimator::check_now`]
/// (on demand or from the validation loop). Both feed the same state.
///
/// Clones share state. The change callback runs while the state lock is
/// held, so it must not call back into the estimator.
#[derive(Clone)]
pub struct PresenceEstimator {
    device_id: String,
    gateway: Arc<dyn EventStoreGateway>,
    params: PresenceParams,
    state: Arc<Mutex<PresenceState>>,
    on_change: Option<ActiveCallback>,
    wall_clock: WallClock,
    validation: Arc<tokio::sync::Mutex<ValidationController>>,
}

impl PresenceEstimator {
    pub fn new(
        device_id: impl Into<String>,
        gateway: Arc<dyn EventStoreGateway>,
        params: PresenceParams,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            gateway,
            params,
            state: Arc::new(Mutex::new(PresenceState::new())),
            on_change: None,
            wall_clock: Arc::new(|| Utc::now().timestamp()),
            validation: Arc::new(tokio::sync::Mutex::new(ValidationController::new())),
        }
    }

    pub fn with_on_change(mut self, on_change: ActiveCallback) -> Self {
        self.on_change = Some(on_change);
        self
    }

    pub fn with_wall_clock(mut self, wall_clock: WallClock) -> Self {
        self.wall_clock = wall_clock;
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Last published estimate, without re-evaluating.
    pub fn current_estimate(&self) -> bool {
        self.lock_state().current_estimate()
    }

    /// Re-evaluates against the clock; a stale confirmation decays to false.
    pub fn is_active(&self) -> bool {
        let now = Instant::now();
        self.apply(|state, params| state.evaluate(now, params))
    }

    pub fn observe_heartbeat(&self, record: Option<HeartbeatRecord>) -> bool {
        let now = Instant::now();
        let now_epoch = (self.wall_clock)();
        self.apply(|state, params| state.observe(record.as_ref(), now, now_epoch, params))
    }

    /// Takes a raw heartbeat node as delivered by the store.
    pub fn observe_value(&self, value: Option<&Value>) -> bool {
        let record = HeartbeatRecord::from_value(value);
        if record.is_none() && value.is_some_and(|v| !v.is_null()) {
            log_warn!("Malformed heartbeat for {}: {:?}", self.device_id, value);
        }
        self.observe_heartbeat(record)
    }

    /// Reads the heartbeat once and returns the resulting estimate. A failed
    /// or slow read counts as inactive.
    pub async fn check_now(&self) -> bool {
        let path = StorePath::heartbeat(&self.device_id);
        let read = tokio::time::timeout(
            Duration::from_secs(READ_TIMEOUT_SECS),
            self.gateway.read(&path),
        )
        .await;

        match read {
            Ok(Ok(value)) => self.observe_value(value.as_ref()),
            Ok(Err(err)) => {
                log_warn!("Heartbeat read failed for {}: {err:?}", self.device_id);
                self.apply(|state, _| state.mark_unreachable())
            }
            Err(_) => {
                log_warn!(
                    "Heartbeat read timed out (> {}s) for {}",
                    READ_TIMEOUT_SECS,
                    self.device_id
                );
                self.apply(|state, _| state.mark_unreachable())
            }
        }
    }

    /// Starts periodic checks. Returns false when already running or when
    /// `period` is zero.
    pub async fn start_validation_loop(&self, period: Duration) -> bool {
        if period.is_zero() {
            log_warn!("Refusing zero validation period for {}", self.device_id);
            return false;
        }
        let started = self.validation.lock().await.start(self.clone(), period);
        if started {
            log_info!(
                "Validation loop started for {} every {:?}",
                self.device_id,
                period
            );
        }
        started
    }

    pub async fn is_validating(&self) -> bool {
        self.validation.lock().await.is_running()
    }

    /// Stops periodic checks. Calling it repeatedly is harmless.
    pub async fn stop(&self) {
        if let Err(err) = self.validation.lock().await.stop().await {
            log_warn!("Validation loop for {} ended badly: {err:?}", self.device_id);
        }
    }

    /// Forgets all observations; the next heartbeat counts as the first.
    pub fn reset(&self) {
        self.lock_state().reset();
    }

    fn apply<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut PresenceState, &PresenceParams) -> PresenceUpdate,
    {
        let mut state = self.lock_state();
        let update = f(&mut state, &self.params);
        if update.changed {
            log_info!(
                "Device {} is now {} ({:?})",
                self.device_id,
                if update.active { "active" } else { "inactive" },
                update.observation
            );
            if let Some(on_change) = &self.on_change {
                on_change(update.active);
            }
        }
        update.active
    }

    fn lock_state(&self) -> MutexGuard<'_, PresenceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{gateway::InMemoryGateway, models::DeviceStatus};
    use serde_json::json;

    const EPOCH: i64 = 1_700_000_000;

    fn params() -> PresenceParams {
        PresenceParams {
            active_window: Duration::from_secs(8),
            grace_past: Duration::from_secs(5),
        }
    }

    fn recording(
        gateway: Arc<InMemoryGateway>,
    ) -> (PresenceEstimator, Arc<Mutex<Vec<bool>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let estimator = PresenceEstimator::new("dev-1", gateway, params())
            .with_wall_clock(Arc::new(|| EPOCH))
            .with_on_change(Arc::new(move |active| sink.lock().unwrap().push(active)));
        (estimator, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn polling_detects_then_times_out_without_new_heartbeats() {
        let gateway = Arc::new(InMemoryGateway::new());
        gateway.set(
            &StorePath::heartbeat("dev-1"),
            json!({ "status": "online", "last_seen": EPOCH }),
        );
        let (estimator, seen) = recording(gateway);

        assert!(estimator.start_validation_loop(Duration::from_secs(2)).await);
        assert!(!estimator.start_validation_loop(Duration::from_secs(2)).await);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(estimator.current_estimate());

        // Nothing changes in the store; the confirmation ages out.
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(!estimator.current_estimate());
        assert_eq!(*seen.lock().unwrap(), vec![true, false]);

        estimator.stop().await;
        estimator.stop().await;
        assert!(!estimator.is_validating().await);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_period_is_refused() {
        let gateway = Arc::new(InMemoryGateway::new());
        let (estimator, _seen) = recording(gateway);

        assert!(!estimator.start_validation_loop(Duration::ZERO).await);
        assert!(!estimator.is_validating().await);

        // A real period still starts afterwards.
        assert!(estimator.start_validation_loop(Duration::from_secs(2)).await);
        estimator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn pushed_change_keeps_device_active() {
        let gateway = Arc::new(InMemoryGateway::new());
        let (estimator, seen) = recording(gateway);

        // Device clock far behind: first value alone proves nothing.
        assert!(!estimator.observe_heartbeat(Some(HeartbeatRecord::new(DeviceStatus::Online, 100))));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!estimator.observe_heartbeat(Some(HeartbeatRecord::new(DeviceStatus::Online, 100))));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(estimator.observe_heartbeat(Some(HeartbeatRecord::new(DeviceStatus::Online, 105))));

        tokio::time::advance(Duration::from_secs(7)).await;
        assert!(estimator.is_active());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!estimator.is_active());

        assert_eq!(*seen.lock().unwrap(), vec![false, true, false]);
    }

    #[tokio::test]
    async fn read_failure_reports_inactive() {
        let gateway = Arc::new(InMemoryGateway::new());
        gateway.set(
            &StorePath::heartbeat("dev-1"),
            json!({ "status": "online", "last_seen": EPOCH }),
        );
        let (estimator, _) = recording(gateway.clone());

        assert!(estimator.check_now().await);
        gateway.set_fail_reads(true);
        assert!(!estimator.check_now().await);
    }

    #[tokio::test]
    async fn missing_or_malformed_heartbeat_is_inactive() {
        let gateway = Arc::new(InMemoryGateway::new());
        let (estimator, _) = recording(gateway.clone());

        assert!(!estimator.check_now().await);
        assert!(!estimator.observe_value(Some(&json!("garbage"))));
    }
}
