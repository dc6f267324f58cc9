use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::Utc;
use knocktrack_lib::{
    CoreConfig, Database, DeviceConfig, DispatchOutcome, DoorbellAlert, DoorbellEvent,
    DoorbellService, EventDeduplicator, EventIdPolicy, InMemoryGateway, KeyedEvent,
    PassiveNotifier, ServiceState, StorePath, Surface,
};
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

const ACCOUNT: &str = "alice@example.com";
const DEVICE: &str = "DOORBELL_001";

fn keyed(key: &str, timestamp: i64) -> KeyedEvent {
    KeyedEvent::new(
        key,
        DoorbellEvent {
            timestamp,
            time: format!("{timestamp}"),
            date: "Jan 01, 2025".into(),
            device_id: DEVICE.into(),
            ..Default::default()
        },
    )
}

fn ids(new_events: &[knocktrack_lib::NewEvent]) -> Vec<&str> {
    new_events.iter().map(|e| e.event_id.as_str()).collect()
}

fn open_dedup(dir: &TempDir) -> EventDeduplicator {
    let db = Database::new(dir.path().join("knocktrack.sqlite3")).unwrap();
    EventDeduplicator::new(ACCOUNT, EventIdPolicy::StoreKey, db)
}

#[tokio::test]
async fn new_event_reported_once_per_snapshot_history() {
    let dir = TempDir::new().unwrap();
    let dedup = open_dedup(&dir);

    let first = dedup.on_snapshot(&[keyed("e1", 10)]).await;
    assert_eq!(ids(&first), vec!["e1"]);

    let second = dedup.on_snapshot(&[keyed("e1", 10), keyed("e2", 20)]).await;
    assert_eq!(ids(&second), vec!["e2"]);
}

#[tokio::test]
async fn duplicate_push_reports_nothing() {
    let dir = TempDir::new().unwrap();
    let dedup = open_dedup(&dir);

    assert_eq!(dedup.on_snapshot(&[keyed("e1", 10)]).await.len(), 1);
    assert!(dedup.on_snapshot(&[keyed("e1", 10)]).await.is_empty());
}

#[tokio::test]
async fn restart_does_not_realert() {
    let dir = TempDir::new().unwrap();
    {
        let dedup = open_dedup(&dir);
        dedup.on_snapshot(&[keyed("e1", 10)]).await;
        dedup
            .on_snapshot(&[keyed("e1", 10), keyed("e2", 20)])
            .await;
        dedup.mark_delivered("e2").await;
    }

    let dedup = open_dedup(&dir);
    assert!(dedup.has_been_notified("e1").await);
    assert!(dedup
        .on_snapshot(&[keyed("e1", 10), keyed("e2", 20)])
        .await
        .is_empty());
}

#[tokio::test]
async fn ledgers_are_scoped_per_account() {
    let dir = TempDir::new().unwrap();
    let db = Database::new(dir.path().join("knocktrack.sqlite3")).unwrap();
    let alice = EventDeduplicator::new("alice", EventIdPolicy::StoreKey, db.clone());
    let bob = EventDeduplicator::new("bob", EventIdPolicy::StoreKey, db);

    assert_eq!(alice.on_snapshot(&[keyed("e1", 10)]).await.len(), 1);
    assert_eq!(bob.on_snapshot(&[keyed("e1", 10)]).await.len(), 1);
}

#[derive(Debug, Clone, PartialEq)]
enum Seen {
    Active(bool),
    Alert(String),
    List(Vec<String>),
    Passive(String),
}

struct RecordingSurface {
    name: &'static str,
    tx: UnboundedSender<Seen>,
}

impl Surface for RecordingSurface {
    fn name(&self) -> &str {
        self.name
    }

    fn on_device_active(&self, active: bool) {
        let _ = self.tx.send(Seen::Active(active));
    }

    fn on_new_doorbell_event(&self, alert: &DoorbellAlert) -> Result<()> {
        let _ = self.tx.send(Seen::Alert(alert.event_id.clone()));
        Ok(())
    }

    fn on_event_list_changed(&self, events: &[KeyedEvent]) {
        let keys = events.iter().map(|e| e.key.clone()).collect();
        let _ = self.tx.send(Seen::List(keys));
    }
}

struct RecordingNotifier {
    tx: UnboundedSender<Seen>,
}

impl PassiveNotifier for RecordingNotifier {
    fn notify(&self, alert: &DoorbellAlert) -> Result<()> {
        let _ = self.tx.send(Seen::Passive(alert.event_id.clone()));
        Ok(())
    }
}

struct Harness {
    _dir: TempDir,
    gateway: Arc<InMemoryGateway>,
    service: DoorbellService,
    surface: Arc<dyn Surface>,
    rx: UnboundedReceiver<Seen>,
}

fn harness(device: DeviceConfig) -> Harness {
    let dir = TempDir::new().unwrap();
    let db = Database::new(dir.path().join("knocktrack.sqlite3")).unwrap();
    let gateway = Arc::new(InMemoryGateway::new());
    let (tx, rx) = unbounded_channel();

    let config = CoreConfig {
        resubscribe_delay: Duration::from_millis(50),
        ..CoreConfig::default()
    };
    let service = DoorbellService::new(
        ACCOUNT,
        config,
        device,
        gateway.clone(),
        db,
        Arc::new(RecordingNotifier { tx: tx.clone() }),
    );
    let surface: Arc<dyn Surface> = Arc::new(RecordingSurface { name: "home", tx });

    Harness {
        _dir: dir,
        gateway,
        service,
        surface,
        rx,
    }
}

async fn wait_for(rx: &mut UnboundedReceiver<Seen>, wanted: &Seen) -> Vec<Seen> {
    let mut seen = Vec::new();
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(item) = rx.recv().await {
            let done = &item == wanted;
            seen.push(item);
            if done {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    assert!(found, "never saw {wanted:?}; got {seen:?}");
    seen
}

/// Everything received within a short quiet period.
async fn drain(rx: &mut UnboundedReceiver<Seen>) -> Vec<Seen> {
    let mut seen = Vec::new();
    while let Ok(Some(item)) = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await {
        seen.push(item);
    }
    seen
}

fn alerts(seen: &[Seen]) -> Vec<&Seen> {
    seen.iter()
        .filter(|s| matches!(s, Seen::Alert(_) | Seen::Passive(_)))
        .collect()
}

#[tokio::test]
async fn service_alerts_each_press_once_and_tracks_presence() {
    let mut h = harness(DeviceConfig::new(DEVICE, "s3cret"));
    let events = StorePath::events(DEVICE);
    h.gateway.set(
        &StorePath::heartbeat(DEVICE),
        json!({ "status": "online", "last_seen": Utc::now().timestamp() }),
    );

    let token = h.service.activate_surface(&h.surface).await.unwrap();
    wait_for(&mut h.rx, &Seen::Active(true)).await;
    assert_eq!(h.service.status().await.state, ServiceState::Listening);

    let k1 = h.gateway.push(&events, json!({ "timestamp": 10, "time": "10:00 AM", "date": "Jan 01" }));
    wait_for(&mut h.rx, &Seen::Alert(k1.clone())).await;

    // Editing an existing event replays the whole list; nothing new.
    h.gateway.set(&events.child(&k1).child("location"), json!("front door"));
    let k2 = h.gateway.push(&events, json!({ "timestamp": 20, "time": "10:05 AM", "date": "Jan 01" }));
    let seen = wait_for(&mut h.rx, &Seen::Alert(k2.clone())).await;
    assert_eq!(alerts(&seen), vec![&Seen::Alert(k2.clone())]);
    assert!(seen.contains(&Seen::List(vec![k2.clone(), k1.clone()])));

    // Screen torn down: the next press goes out passively.
    h.service.deactivate_surface(token);
    let k3 = h.gateway.push(&events, json!({ "timestamp": 30, "time": "10:10 AM", "date": "Jan 01" }));
    wait_for(&mut h.rx, &Seen::Passive(k3)).await;

    h.service.shutdown().await;
    h.service.shutdown().await;
    assert_eq!(h.service.status().await.state, ServiceState::Stopped);
    assert_eq!(h.gateway.subscription_count(), 0);
}

#[tokio::test]
async fn replayed_snapshot_after_restart_stays_quiet() {
    let mut h = harness(DeviceConfig::new(DEVICE, "s3cret"));
    let events = StorePath::events(DEVICE);
    let k1 = h.gateway.push(&events, json!({ "timestamp": 10, "time": "10:00 AM", "date": "Jan 01" }));

    h.service.activate_surface(&h.surface).await;
    wait_for(&mut h.rx, &Seen::Alert(k1.clone())).await;
    h.service.shutdown().await;

    // A new service for the same account over the same database file.
    let db = Database::new(h._dir.path().join("knocktrack.sqlite3")).unwrap();
    let (tx, mut rx) = unbounded_channel();
    let restarted = DoorbellService::new(
        ACCOUNT,
        CoreConfig::default(),
        DeviceConfig::new(DEVICE, "s3cret"),
        h.gateway.clone(),
        db,
        Arc::new(RecordingNotifier { tx: tx.clone() }),
    );
    let surface: Arc<dyn Surface> = Arc::new(RecordingSurface { name: "home", tx });
    restarted.activate_surface(&surface).await;

    let seen = wait_for(&mut rx, &Seen::List(vec![k1])).await;
    let mut seen_after = drain(&mut rx).await;
    seen_after.extend(seen);
    assert!(alerts(&seen_after).is_empty());
    restarted.shutdown().await;
}

#[tokio::test]
async fn switching_devices_does_not_silence_the_new_one() {
    const NEW_DEVICE: &str = "DOORBELL_002";
    let mut h = harness(DeviceConfig::new(DEVICE, "s3cret"));

    h.service.activate_surface(&h.surface).await;
    // The old device stamps events in milliseconds.
    let old = h.gateway.push(
        &StorePath::events(DEVICE),
        json!({ "timestamp": 1_700_000_000_000_i64, "time": "9:00 AM", "date": "Jan 01" }),
    );
    wait_for(&mut h.rx, &Seen::Alert(old.clone())).await;

    h.service
        .reconfigure(DeviceConfig::new(NEW_DEVICE, "s3cret"))
        .await;
    h.service.activate_surface(&h.surface).await;
    assert_eq!(h.service.status().await.device_id.as_deref(), Some(NEW_DEVICE));

    // The new device stamps them in seconds.
    let fresh = h.gateway.push(
        &StorePath::events(NEW_DEVICE),
        json!({ "timestamp": 1_700_000_100, "time": "9:05 AM", "date": "Jan 01" }),
    );
    wait_for(&mut h.rx, &Seen::Alert(fresh)).await;
    assert!(h.service.deduplicator().has_been_notified(&old).await);
    h.service.shutdown().await;
}

#[tokio::test]
async fn unpaired_account_stays_dormant() {
    let mut h = harness(DeviceConfig::default());

    h.service.activate_surface(&h.surface).await;
    assert_eq!(drain(&mut h.rx).await, vec![Seen::Active(false)]);

    let status = h.service.status().await;
    assert_eq!(status.state, ServiceState::NotConnected);
    assert_eq!(status.current_surface.as_deref(), Some("home"));
    assert_eq!(h.gateway.subscription_count(), 0);
    assert!(!h.service.check_device_now().await);
}

#[tokio::test]
async fn cancelled_subscription_is_restored() {
    let mut h = harness(DeviceConfig::new(DEVICE, "s3cret"));
    h.service.activate_surface(&h.surface).await;
    drain(&mut h.rx).await;
    assert_eq!(h.gateway.subscription_count(), 2);

    h.gateway
        .cancel_subscriptions(&StorePath::events(DEVICE), "permission denied");
    assert_eq!(h.gateway.subscription_count(), 1);

    let restored = tokio::time::timeout(Duration::from_secs(5), async {
        while h.gateway.subscription_count() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(restored.is_ok());

    let key = h.gateway.push(
        &StorePath::events(DEVICE),
        json!({ "timestamp": 10, "time": "10:00 AM", "date": "Jan 01" }),
    );
    wait_for(&mut h.rx, &Seen::Alert(key)).await;
    h.service.shutdown().await;
}

#[tokio::test]
async fn test_alert_bypasses_ledger() {
    let mut h = harness(DeviceConfig::new(DEVICE, "s3cret"));

    assert_eq!(h.service.trigger_test_alert(), DispatchOutcome::Passive);
    let seen = drain(&mut h.rx).await;
    assert!(matches!(&seen[..], [Seen::Passive(id)] if id.starts_with("test_")));
    assert!(h.service.deduplicator().snapshot().await.unwrap().event_ids.is_empty());
}
