use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{ChangeCallback, EventStoreGateway, StoreChange, StorePath, SubscriptionHandle};

struct Subscription {
    path: StorePath,
    callback: ChangeCallback,
}

struct MemoryState {
    root: Map<String, Value>,
    subscriptions: HashMap<SubscriptionHandle, Subscription>,
    push_counter: u64,
    fail_reads: bool,
}

/// Hierarchical JSON store with value-subscriptions, kept in process.
///
/// Callbacks run synchronously on the writer's thread after the internal lock
/// is released, so a callback may call back into the gateway.
pub struct InMemoryGateway {
    state: Mutex<MemoryState>,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                root: Map::new(),
                subscriptions: HashMap::new(),
                push_counter: 0,
                fail_reads: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Writes `value` under a fresh child key of `path` and returns the key.
    /// Keys sort in insertion order.
    pub fn push(&self, path: &StorePath, value: Value) -> String {
        let key = {
            let mut state = self.lock();
            state.push_counter += 1;
            let key = format!("-K{:016}", state.push_counter);
            set_node(&mut state.root, &path.child(&key), value);
            key
        };
        self.notify(&path.child(&key));
        key
    }

    /// Synchronous write, for seeding fixtures.
    pub fn set(&self, path: &StorePath, value: Value) {
        {
            let mut state = self.lock();
            set_node(&mut state.root, path, value);
        }
        self.notify(path);
    }

    pub fn remove(&self, path: &StorePath) {
        {
            let mut state = self.lock();
            remove_node(&mut state.root, path);
        }
        self.notify(path);
    }

    /// Makes every `read`/`query_*` fail until switched off.
    pub fn set_fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Drops every subscription at `path`, delivering [`StoreChange::Cancelled`].
    pub fn cancel_subscriptions(&self, path: &StorePath, reason: &str) {
        let cancelled: Vec<ChangeCallback> = {
            let mut state = self.lock();
            let handles: Vec<SubscriptionHandle> = state
                .subscriptions
                .iter()
                .filter(|(_, sub)| &sub.path == path)
                .map(|(handle, _)| *handle)
                .collect();
            handles
                .into_iter()
                .filter_map(|handle| state.subscriptions.remove(&handle))
                .map(|sub| sub.callback)
                .collect()
        };

        for callback in cancelled {
            callback(StoreChange::Cancelled(reason.to_string()));
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.lock().subscriptions.len()
    }

    fn notify(&self, changed: &StorePath) {
        let deliveries: Vec<(ChangeCallback, Option<Value>)> = {
            let state = self.lock();
            state
                .subscriptions
                .values()
                .filter(|sub| sub.path.starts_with(changed) || changed.starts_with(&sub.path))
                .map(|sub| (sub.callback.clone(), get_node(&state.root, &sub.path).cloned()))
                .collect()
        };

        for (callback, value) in deliveries {
            callback(StoreChange::Value(value));
        }
    }
}

#[async_trait]
impl EventStoreGateway for InMemoryGateway {
    async fn read(&self, path: &StorePath) -> Result<Option<Value>> {
        let state = self.lock();
        if state.fail_reads {
            bail!("read of {path} failed: store unreachable");
        }
        Ok(get_node(&state.root, path).cloned())
    }

    async fn subscribe(
        &self,
        path: &StorePath,
        on_change: ChangeCallback,
    ) -> Result<SubscriptionHandle> {
        let handle = SubscriptionHandle::new();
        let initial = {
            let mut state = self.lock();
            state.subscriptions.insert(
                handle,
                Subscription {
                    path: path.clone(),
                    callback: on_change.clone(),
                },
            );
            get_node(&state.root, path).cloned()
        };

        on_change(StoreChange::Value(initial));
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.lock().subscriptions.remove(&handle);
    }

    async fn write(&self, path: &StorePath, value: Value) -> Result<()> {
        self.set(path, value);
        Ok(())
    }

    async fn delete(&self, path: &StorePath) -> Result<()> {
        self.remove(path);
        Ok(())
    }

    async fn query_last(&self, path: &StorePath, limit: usize) -> Result<Vec<(String, Value)>> {
        let state = self.lock();
        if state.fail_reads {
            bail!("query of {path} failed: store unreachable");
        }

        let Some(Value::Object(children)) = get_node(&state.root, path) else {
            return Ok(Vec::new());
        };

        // serde_json's default map is ordered by key.
        let skip = children.len().saturating_sub(limit);
        Ok(children
            .iter()
            .skip(skip)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

fn get_node<'a>(root: &'a Map<String, Value>, path: &StorePath) -> Option<&'a Value> {
    let mut segments = path.segments();
    let first = segments.next()?;
    let mut node = root.get(first)?;
    for segment in segments {
        node = node.as_object()?.get(segment)?;
    }
    Some(node)
}

fn set_node(root: &mut Map<String, Value>, path: &StorePath, value: Value) {
    if value.is_null() {
        remove_node(root, path);
        return;
    }

    let segments: Vec<&str> = path.segments().collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut map = root;
    for segment in parents {
        let entry = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        map = match entry {
            Value::Object(child) => child,
            _ => return,
        };
    }
    map.insert(last.to_string(), value);
}

/// Removes the node and prunes parents left empty.
fn remove_node(root: &mut Map<String, Value>, path: &StorePath) {
    fn remove_in(map: &mut Map<String, Value>, segments: &[&str]) {
        match segments {
            [] => {}
            [last] => {
                map.remove(*last);
            }
            [head, rest @ ..] => {
                let now_empty = match map.get_mut(*head) {
                    Some(Value::Object(child)) => {
                        remove_in(child, rest);
                        child.is_empty()
                    }
                    _ => false,
                };
                if now_empty {
                    map.remove(*head);
                }
            }
        }
    }

    let segments: Vec<&str> = path.segments().collect();
    remove_in(root, &segments);
}
