pub mod alerts;
pub mod config;
pub mod db;
pub mod dedup;
pub mod gateway;
pub mod history;
pub mod models;
pub mod presence;
pub mod service;
pub mod settings;
pub mod utils;

use std::{path::Path, sync::Arc};

use anyhow::Result;

pub use alerts::{
    AlertDispatcher, DispatchOutcome, DoorbellAlert, LogNotifier, PassiveNotifier, Surface,
    SurfaceRegistry, SurfaceToken,
};
pub use config::{CoreConfig, EventIdPolicy};
pub use db::Database;
pub use dedup::{EventDeduplicator, NewEvent};
pub use gateway::{EventStoreGateway, InMemoryGateway, StoreChange, StorePath};
pub use history::{format_event_time, validate_device_credentials, EventAnalytics, EventHistory};
pub use models::{DeviceStatus, DoorbellEvent, HeartbeatRecord, KeyedEvent};
pub use presence::PresenceEstimator;
pub use service::{DoorbellService, ServiceState, ServiceStatus};
pub use settings::{validate_inputs, DeviceConfig, DeviceConfigStore};
pub use utils::init_logging;

/// Process-wide handles a host creates once at startup.
pub struct KnockTrack {
    config: CoreConfig,
    db: Database,
    settings: DeviceConfigStore,
    gateway: Arc<dyn EventStoreGateway>,
    notifier: Arc<dyn PassiveNotifier>,
}

impl KnockTrack {
    /// Opens the ledger database and device settings under `data_dir`.
    pub fn open(
        data_dir: &Path,
        gateway: Arc<dyn EventStoreGateway>,
        notifier: Arc<dyn PassiveNotifier>,
    ) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;

        let db = Database::new(data_dir.join("knocktrack.sqlite3"))?;
        let settings = DeviceConfigStore::new(data_dir.join("devices.json"))?;
        let config = CoreConfig::from_env();
        log::info!("KnockTrack core ready (active window {:?})", config.active_window());

        Ok(Self {
            config,
            db,
            settings,
            gateway,
            notifier,
        })
    }

    pub fn with_config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn settings(&self) -> &DeviceConfigStore {
        &self.settings
    }

    /// Builds the listening service for a freshly signed-in account.
    pub fn service_for(&self, account: &str) -> DoorbellService {
        DoorbellService::new(
            account,
            self.config.clone(),
            self.settings.device_config(account),
            self.gateway.clone(),
            self.db.clone(),
            self.notifier.clone(),
        )
    }

    /// Checks the credentials against the store and saves them on success.
    pub async fn pair_device(
        &self,
        account: &str,
        device_id: &str,
        shared_secret: &str,
    ) -> Result<bool> {
        if !validate_device_credentials(self.gateway.as_ref(), device_id, shared_secret).await {
            log::warn!("Pairing rejected for device {device_id}");
            return Ok(false);
        }
        self.settings
            .update_device_config(account, DeviceConfig::new(device_id, shared_secret))?;
        log::info!("Paired device {device_id} for {account}");
        Ok(true)
    }

    pub fn unpair_device(&self, account: &str) -> Result<()> {
        self.settings.clear_device_config(account)
    }
}
