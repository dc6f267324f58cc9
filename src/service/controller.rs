use std::sync::Arc;

use chrono::Utc;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use crate::{
    alerts::{
        AlertDispatcher, DispatchOutcome, DoorbellAlert, PassiveNotifier, Surface,
        SurfaceRegistry, SurfaceToken,
    },
    config::CoreConfig,
    db::Database,
    dedup::EventDeduplicator,
    gateway::EventStoreGateway,
    history::EventHistory,
    presence::{PresenceEstimator, PresenceParams},
    settings::DeviceConfig,
};

use super::{
    listener::{listen_loop, ListenerContext, ListenerMessage},
    ServiceState, ServiceStatus,
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

struct Listener {
    estimator: PresenceEstimator,
    tx: mpsc::UnboundedSender<ListenerMessage>,
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
    started_at: Instant,
}

struct ServiceInner {
    device: DeviceConfig,
    listener: Option<Listener>,
    stopped: bool,
}

/// Background listening for one signed-in account.
///
/// Listening starts lazily on the first surface activation and survives
/// navigation; only [`DoorbellService::shutdown`] (sign-out) or
/// [`DoorbellService::reconfigure`] tears it down. Without a paired device
/// the service stays dormant and reports [`ServiceState::NotConnected`].
pub struct DoorbellService {
    account: String,
    config: CoreConfig,
    gateway: Arc<dyn EventStoreGateway>,
    registry: Arc<SurfaceRegistry>,
    dispatcher: Arc<AlertDispatcher>,
    dedup: Arc<EventDeduplicator>,
    inner: Mutex<ServiceInner>,
}

impl DoorbellService {
    pub fn new(
        account: impl Into<String>,
        config: CoreConfig,
        device: DeviceConfig,
        gateway: Arc<dyn EventStoreGateway>,
        db: Database,
        notifier: Arc<dyn PassiveNotifier>,
    ) -> Self {
        let account = account.into();
        let registry = Arc::new(SurfaceRegistry::new());
        let dispatcher = Arc::new(AlertDispatcher::new(registry.clone(), notifier));
        let dedup = Arc::new(EventDeduplicator::new(
            account.clone(),
            config.event_id_policy,
            db,
        ));

        Self {
            account,
            config,
            gateway,
            registry,
            dispatcher,
            dedup,
            inner: Mutex::new(ServiceInner {
                device,
                listener: None,
                stopped: false,
            }),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn registry(&self) -> &Arc<SurfaceRegistry> {
        &self.registry
    }

    /// Makes `surface` current and starts listening if this is the first
    /// activation. Keep the token and pass it to
    /// [`DoorbellService::deactivate_surface`] on teardown.
    pub async fn activate_surface(&self, surface: &Arc<dyn Surface>) -> Option<SurfaceToken> {
        let token = self.registry.set_current(Some(surface));

        let mut inner = self.inner.lock().await;
        if inner.stopped {
            log_warn!("Surface {} activated after shutdown of {}", surface.name(), self.account);
            surface.on_device_active(false);
            return token;
        }

        if !inner.device.is_paired() {
            log_info!("No paired device for {}; staying dormant", self.account);
            surface.on_device_active(false);
            return token;
        }

        match &inner.listener {
            Some(listener) => {
                let _ = listener.tx.send(ListenerMessage::SurfaceAttached);
            }
            None => {
                let listener = self.start_listener(&inner.device).await;
                inner.listener = Some(listener);
            }
        }
        token
    }

    /// Clears the surface if it is still current. Listening continues.
    pub fn deactivate_surface(&self, token: SurfaceToken) {
        self.registry.release(token);
    }

    async fn start_listener(&self, device: &DeviceConfig) -> Listener {
        let dispatcher = self.dispatcher.clone();
        let estimator = PresenceEstimator::new(
            device.device_id.clone(),
            self.gateway.clone(),
            PresenceParams::from(&self.config),
        )
        .with_on_change(Arc::new(move |active| dispatcher.publish_device_active(active)));

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel_token = CancellationToken::new();
        let ctx = ListenerContext {
            device_id: device.device_id.clone(),
            gateway: self.gateway.clone(),
            dedup: self.dedup.clone(),
            dispatcher: self.dispatcher.clone(),
            estimator: estimator.clone(),
            resubscribe_delay: self.config.resubscribe_delay,
        };
        let handle = tokio::spawn(listen_loop(ctx, tx.clone(), rx, cancel_token.clone()));

        let mut period = self.config.validation_period;
        if period.is_zero() {
            period = CoreConfig::default().validation_period;
            log_warn!("Zero validation period configured; using {period:?}");
        }
        estimator.start_validation_loop(period).await;

        log_info!(
            "Listening for device {} on behalf of {}",
            device.device_id,
            self.account
        );

        Listener {
            estimator,
            tx,
            cancel_token,
            handle,
            started_at: Instant::now(),
        }
    }

    async fn stop_listener(listener: Listener) {
        listener.cancel_token.cancel();
        listener.estimator.stop().await;
        if let Err(err) = listener.handle.await {
            log_error!("Listener task failed to join: {err:?}");
        }
    }

    /// Stops all listening for sign-out. Safe to call more than once.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        inner.stopped = true;
        if let Some(listener) = inner.listener.take() {
            Self::stop_listener(listener).await;
            log_info!("Doorbell service for {} shut down", self.account);
        }
        self.registry.set_current(None);
    }

    /// Switches to a different device configuration. Presence state starts
    /// over; listening resumes on the next surface activation if paired.
    /// A different device id also drops the last alerted event, since its
    /// timestamp came from the old device's clock.
    pub async fn reconfigure(&self, device: DeviceConfig) {
        let mut inner = self.inner.lock().await;
        if let Some(listener) = inner.listener.take() {
            Self::stop_listener(listener).await;
        }
        if inner.device.device_id != device.device_id {
            self.dedup.forget_latest().await;
        }
        log_info!(
            "Reconfigured {} to device {:?} (paired: {})",
            self.account,
            device.device_id,
            device.is_paired()
        );
        inner.device = device;
    }

    /// Forces a fresh heartbeat read. `false` when not listening.
    pub async fn check_device_now(&self) -> bool {
        let estimator = {
            let inner = self.inner.lock().await;
            inner.listener.as_ref().map(|l| l.estimator.clone())
        };
        match estimator {
            Some(estimator) => estimator.check_now().await,
            None => false,
        }
    }

    /// Dispatches a synthetic alert that never touches the ledger.
    pub fn trigger_test_alert(&self) -> DispatchOutcome {
        let alert = DoorbellAlert::test(Utc::now().timestamp_millis());
        log_info!("Triggering test alert {}", alert.event_id);
        self.dispatcher.dispatch(&alert)
    }

    /// Forgets every alerted event for this account. Debug use only.
    pub async fn reset_duplicate_detection(&self) {
        self.dedup.reset().await;
    }

    pub fn deduplicator(&self) -> &Arc<EventDeduplicator> {
        &self.dedup
    }

    /// History view for the configured device, if any.
    pub async fn history(&self) -> Option<EventHistory> {
        let inner = self.inner.lock().await;
        inner.device.is_paired().then(|| {
            EventHistory::new(
                self.gateway.clone(),
                inner.device.device_id.clone(),
                self.config.recent_activity_limit,
            )
        })
    }

    pub async fn status(&self) -> ServiceStatus {
        let inner = self.inner.lock().await;
        let state = if inner.stopped {
            ServiceState::Stopped
        } else if !inner.device.is_paired() {
            ServiceState::NotConnected
        } else if inner.listener.is_some() {
            ServiceState::Listening
        } else {
            ServiceState::Idle
        };

        ServiceStatus {
            state,
            device_id: inner
                .device
                .is_paired()
                .then(|| inner.device.device_id.clone()),
            device_active: inner
                .listener
                .as_ref()
                .map(|l| l.estimator.current_estimate())
                .unwrap_or(false),
            current_surface: self.registry.current_name(),
            last_surface_name: self.registry.last_surface_name(),
            uptime_ms: inner
                .listener
                .as_ref()
                .map(|l| l.started_at.elapsed().as_millis() as u64),
        }
    }
}
