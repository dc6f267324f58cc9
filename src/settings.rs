use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

/// Pairing between an account and one doorbell device.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceConfig {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub shared_secret: String,
    #[serde(default)]
    pub connected: bool,
}

impl DeviceConfig {
    pub fn new(device_id: impl Into<String>, shared_secret: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            shared_secret: shared_secret.into(),
            connected: true,
        }
    }

    /// True only when the user completed pairing and both credentials exist.
    pub fn is_paired(&self) -> bool {
        self.connected && !self.device_id.is_empty() && !self.shared_secret.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DeviceSettings {
    #[serde(default)]
    accounts: HashMap<String, DeviceConfig>,
}

/// Per-account device configuration persisted as JSON.
pub struct DeviceConfigStore {
    path: PathBuf,
    data: RwLock<DeviceSettings>,
}

impl DeviceConfigStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read device settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(
                    "Device settings at {} are unreadable ({err}); starting unpaired",
                    path.display()
                );
                DeviceSettings::default()
            })
        } else {
            DeviceSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Config for `account`, or an unpaired default.
    pub fn device_config(&self, account: &str) -> DeviceConfig {
        self.read()
            .accounts
            .get(account)
            .cloned()
            .unwrap_or_default()
    }

    pub fn update_device_config(&self, account: &str, config: DeviceConfig) -> Result<()> {
        let mut guard = self.write();
        guard.accounts.insert(account.to_string(), config);
        self.persist(&guard)
    }

    pub fn clear_device_config(&self, account: &str) -> Result<()> {
        let mut guard = self.write();
        if guard.accounts.remove(account).is_some() {
            self.persist(&guard)?;
        }
        Ok(())
    }

    fn persist(&self, data: &DeviceSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write device settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, DeviceSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, DeviceSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Rejects blank identifiers or secrets before they reach the store.
pub fn validate_inputs(device_id: &str, shared_secret: &str) -> bool {
    !device_id.trim().is_empty() && !shared_secret.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_unpaired() {
        let dir = TempDir::new().unwrap();
        let store = DeviceConfigStore::new(dir.path().join("devices.json")).unwrap();

        let config = store.device_config("alice@example.com");
        assert!(!config.is_paired());
        assert!(config.device_id.is_empty());
    }

    #[test]
    fn configs_are_scoped_per_account_and_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("devices.json");
        let store = DeviceConfigStore::new(path.clone()).unwrap();

        store
            .update_device_config("alice@example.com", DeviceConfig::new("DOORBELL_001", "s3cret"))
            .unwrap();

        let reopened = DeviceConfigStore::new(path).unwrap();
        assert!(reopened.device_config("alice@example.com").is_paired());
        assert!(!reopened.device_config("bob@example.com").is_paired());
    }

    #[test]
    fn corrupt_file_loads_as_unpaired() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("devices.json");
        fs::write(&path, "{ not json").unwrap();

        let store = DeviceConfigStore::new(path).unwrap();
        assert!(!store.device_config("alice@example.com").is_paired());
    }

    #[test]
    fn pairing_requires_flag_and_both_credentials() {
        let mut config = DeviceConfig::new("DOORBELL_001", "");
        assert!(!config.is_paired());
        config.shared_secret = "key".into();
        assert!(config.is_paired());
        config.connected = false;
        assert!(!config.is_paired());
    }

    #[test]
    fn clear_removes_account() {
        let dir = TempDir::new().unwrap();
        let store = DeviceConfigStore::new(dir.path().join("devices.json")).unwrap();
        store
            .update_device_config("alice@example.com", DeviceConfig::new("D1", "k"))
            .unwrap();
        store.clear_device_config("alice@example.com").unwrap();
        assert!(!store.device_config("alice@example.com").is_paired());
    }

    #[test]
    fn blank_inputs_are_rejected() {
        assert!(!validate_inputs("  ", "key"));
        assert!(!validate_inputs("D1", ""));
        assert!(validate_inputs("D1", "key"));
    }
}
