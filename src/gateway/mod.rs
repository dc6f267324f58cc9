//! Contract for the remote data store the device writes into.
//!
//! The core never talks to a concrete backend; hosts hand it something that
//! implements [`EventStoreGateway`]. [`memory::InMemoryGateway`] is the
//! in-process implementation used by tests and demos.

pub mod memory;

use std::{fmt, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

pub use memory::InMemoryGateway;

/// Slash-separated path into the store, e.g. `devices/DOORBELL_001/events`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorePath(String);

impl StorePath {
    pub fn new(path: impl AsRef<str>) -> Self {
        let trimmed = path
            .as_ref()
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        Self(trimmed)
    }

    pub fn child(&self, segment: impl AsRef<str>) -> Self {
        if self.0.is_empty() {
            Self::new(segment)
        } else {
            Self::new(format!("{}/{}", self.0, segment.as_ref()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|segment| !segment.is_empty())
    }

    /// True when `self` equals `other` or lies below it.
    pub fn starts_with(&self, other: &StorePath) -> bool {
        let mut mine = self.segments();
        other.segments().all(|segment| mine.next() == Some(segment))
    }

    pub fn device(device_id: &str) -> Self {
        Self::new("devices").child(device_id)
    }

    pub fn heartbeat(device_id: &str) -> Self {
        Self::device(device_id).child("heartbeat")
    }

    pub fn events(device_id: &str) -> Self {
        Self::device(device_id).child("events")
    }

    pub fn auth_key(device_id: &str) -> Self {
        Self::device(device_id).child("auth_key")
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a subscription delivers.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    /// Full current value of the watched node (`None` when it does not exist).
    Value(Option<Value>),
    /// The store dropped the subscription (permission revoked, network loss).
    /// No further callbacks follow for this handle.
    Cancelled(String),
}

/// Invoked on the gateway's own delivery thread; must not block.
pub type ChangeCallback = Arc<dyn Fn(StoreChange) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(Uuid);

impl SubscriptionHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
pub trait EventStoreGateway: Send + Sync {
    /// Point read. `Ok(None)` when nothing is stored at `path`.
    async fn read(&self, path: &StorePath) -> Result<Option<Value>>;

    /// Registers `on_change`, which fires with the node's current value once
    /// on subscribe and again whenever anything at or below it changes.
    async fn subscribe(&self, path: &StorePath, on_change: ChangeCallback)
        -> Result<SubscriptionHandle>;

    /// Idempotent; unknown handles are ignored.
    async fn unsubscribe(&self, handle: SubscriptionHandle);

    async fn write(&self, path: &StorePath, value: Value) -> Result<()>;

    async fn delete(&self, path: &StorePath) -> Result<()>;

    /// Children of `path` ordered by key, keeping only the last `limit`.
    async fn query_last(&self, path: &StorePath, limit: usize) -> Result<Vec<(String, Value)>>;

    /// Children of `path` ordered by key.
    async fn query_ordered(&self, path: &StorePath) -> Result<Vec<(String, Value)>> {
        self.query_last(path, usize::MAX).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_normalize_slashes() {
        assert_eq!(StorePath::new("/devices//D1/").as_str(), "devices/D1");
        assert_eq!(StorePath::events("D1").as_str(), "devices/D1/events");
    }

    #[test]
    fn prefix_matching_is_segment_aware() {
        let events = StorePath::events("D1");
        assert!(events.child("k1").starts_with(&events));
        assert!(events.starts_with(&StorePath::device("D1")));
        assert!(!StorePath::new("devices/D10").starts_with(&StorePath::device("D1")));
        assert!(events.starts_with(&StorePath::new("")));
    }
}
