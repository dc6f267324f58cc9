use std::{collections::HashMap, sync::Arc};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::{
    alerts::{AlertDispatcher, DoorbellAlert},
    dedup::EventDeduplicator,
    gateway::{ChangeCallback, EventStoreGateway, StoreChange, StorePath, SubscriptionHandle},
    models::{parse_event_children, KeyedEvent},
    presence::PresenceEstimator,
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum WatchedNode {
    Heartbeat,
    Events,
}

impl WatchedNode {
    fn path(self, device_id: &str) -> StorePath {
        match self {
            WatchedNode::Heartbeat => StorePath::heartbeat(device_id),
            WatchedNode::Events => StorePath::events(device_id),
        }
    }
}

pub(crate) enum ListenerMessage {
    Change(WatchedNode, StoreChange),
    Resubscribe(WatchedNode),
    /// A new surface became current and needs the latest state.
    SurfaceAttached,
}

/// What the listening task needs for one device.
pub(crate) struct ListenerContext {
    pub device_id: String,
    pub gateway: Arc<dyn EventStoreGateway>,
    pub dedup: Arc<EventDeduplicator>,
    pub dispatcher: Arc<AlertDispatcher>,
    pub estimator: PresenceEstimator,
    pub resubscribe_delay: Duration,
}

/// Single writer for everything the store pushes.
///
/// Gateway callbacks may fire on any thread; they only enqueue messages, and
/// this task applies them one at a time, so the ledger and presence state are
/// never updated concurrently from subscriptions.
pub(crate) async fn listen_loop(
    ctx: ListenerContext,
    tx: UnboundedSender<ListenerMessage>,
    mut rx: UnboundedReceiver<ListenerMessage>,
    cancel_token: CancellationToken,
) {
    let mut handles: HashMap<WatchedNode, SubscriptionHandle> = HashMap::new();
    let mut latest_events: Vec<KeyedEvent> = Vec::new();

    for node in [WatchedNode::Heartbeat, WatchedNode::Events] {
        subscribe(&ctx, node, &tx, &mut handles, &cancel_token).await;
    }

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("listener for {} shutting down", ctx.device_id);
                break;
            }
            message = rx.recv() => {
                let Some(message) = message else {
                    break;
                };
                match message {
                    ListenerMessage::Change(node, StoreChange::Cancelled(reason)) => {
                        handles.remove(&node);
                        log_warn!(
                            "Subscription to {} cancelled by store: {reason}; retrying in {:?}",
                            node.path(&ctx.device_id),
                            ctx.resubscribe_delay
                        );
                        schedule_resubscribe(&ctx, node, &tx, &cancel_token);
                    }
                    ListenerMessage::Change(WatchedNode::Heartbeat, StoreChange::Value(value)) => {
                        ctx.estimator.observe_value(value.as_ref());
                    }
                    ListenerMessage::Change(WatchedNode::Events, StoreChange::Value(value)) => {
                        latest_events = handle_event_snapshot(&ctx, value.as_ref()).await;
                    }
                    ListenerMessage::Resubscribe(node) => {
                        if !handles.contains_key(&node) {
                            subscribe(&ctx, node, &tx, &mut handles, &cancel_token).await;
                        }
                    }
                    ListenerMessage::SurfaceAttached => {
                        ctx.dispatcher
                            .publish_device_active(ctx.estimator.current_estimate());
                        ctx.dispatcher.publish_event_list(&latest_events);
                    }
                }
            }
        }
    }

    for (_, handle) in handles.drain() {
        ctx.gateway.unsubscribe(handle).await;
    }
}

async fn handle_event_snapshot(
    ctx: &ListenerContext,
    value: Option<&serde_json::Value>,
) -> Vec<KeyedEvent> {
    let (mut events, rejected) = parse_event_children(value);
    if !rejected.is_empty() {
        log_warn!(
            "Skipped malformed events {:?} for {}",
            rejected,
            ctx.device_id
        );
    }
    events.sort_by(KeyedEvent::newest_first);

    ctx.dispatcher.publish_event_list(&events);

    for new_event in ctx.dedup.on_snapshot(&events).await {
        let alert = DoorbellAlert::from(&new_event);
        let outcome = ctx.dispatcher.dispatch(&alert);
        log_debug!("Dispatched {} -> {:?}", new_event.event_id, outcome);
    }

    events
}

async fn subscribe(
    ctx: &ListenerContext,
    node: WatchedNode,
    tx: &UnboundedSender<ListenerMessage>,
    handles: &mut HashMap<WatchedNode, SubscriptionHandle>,
    cancel_token: &CancellationToken,
) {
    let sender = tx.clone();
    let callback: ChangeCallback = Arc::new(move |change| {
        // The receiver is gone only after shutdown.
        let _ = sender.send(ListenerMessage::Change(node, change));
    });

    let path = node.path(&ctx.device_id);
    match ctx.gateway.subscribe(&path, callback).await {
        Ok(handle) => {
            log_info!("Subscribed to {path}");
            handles.insert(node, handle);
        }
        Err(err) => {
            log_warn!(
                "Failed to subscribe to {path}: {err:?}; retrying in {:?}",
                ctx.resubscribe_delay
            );
            schedule_resubscribe(ctx, node, tx, cancel_token);
        }
    }
}

fn schedule_resubscribe(
    ctx: &ListenerContext,
    node: WatchedNode,
    tx: &UnboundedSender<ListenerMessage>,
    cancel_token: &CancellationToken,
) {
    let delay = ctx.resubscribe_delay;
    let tx = tx.clone();
    let cancel_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel_token.cancelled() => {}
            _ = tokio::time::sleep(delay) => {
                let _ = tx.send(ListenerMessage::Resubscribe(node));
            }
        }
    });
}
