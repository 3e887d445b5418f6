// Event watcher tests: per-event effects, malformed events, reconnect with resume

mod common;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bollard::models::{EventActor, EventMessage, EventMessageTypeEnum};
use chrono::{DateTime, Utc};
use chronos::collector::PollTrigger;
use chronos::event_watcher::{BackoffConfig, EventSource, EventWatcher};
use chronos::models::EventKind;
use common::MemoryStore;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::mpsc;

fn message(typ: EventMessageTypeEnum, action: &str, name: &str, time_ns: i64) -> EventMessage {
    EventMessage {
        typ: Some(typ),
        action: Some(action.to_string()),
        actor: Some(EventActor {
            id: Some(format!("id-{}", name)),
            attributes: Some(HashMap::from([("name".to_string(), name.to_string())])),
            ..Default::default()
        }),
        time: Some(time_ns / 1_000_000_000),
        time_nano: Some(time_ns),
        ..Default::default()
    }
}

/// Hands out one scripted stream per subscribe call; pending forever once the script runs out.
#[derive(Default)]
struct ScriptedSource {
    scripts: Mutex<VecDeque<Vec<anyhow::Result<EventMessage>>>>,
    subscriptions: Mutex<Vec<Option<DateTime<Utc>>>>,
}

impl EventSource for ScriptedSource {
    fn subscribe(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> BoxStream<'static, anyhow::Result<EventMessage>> {
        self.subscriptions.lock().unwrap().push(since);
        match self.scripts.lock().unwrap().pop_front() {
            Some(items) => futures_util::stream::iter(items).boxed(),
            None => futures_util::stream::pending().boxed(),
        }
    }
}

fn watcher(
    source: Arc<ScriptedSource>,
    store: Arc<MemoryStore>,
) -> (EventWatcher<ScriptedSource, MemoryStore>, mpsc::Receiver<()>) {
    let (trigger, rx) = PollTrigger::channel();
    let backoff = BackoffConfig {
        initial: Duration::from_millis(10),
        max: Duration::from_millis(40),
    };
    (EventWatcher::new(source, store, trigger, backoff), rx)
}

fn drain(rx: &mut mpsc::Receiver<()>) -> usize {
    let mut n = 0;
    while rx.try_recv().is_ok() {
        n += 1;
    }
    n
}

#[tokio::test]
async fn container_event_requests_one_poll_and_records_one_row() {
    let store = Arc::new(MemoryStore::default());
    let (w, mut polls) = watcher(Arc::new(ScriptedSource::default()), store.clone());

    let msg = message(EventMessageTypeEnum::CONTAINER, "start", "web", 1_700_000_000_000_000_000);
    let recorded = w.handle_event(&msg).await.unwrap();

    assert_eq!(recorded.kind, EventKind::Container);
    assert_eq!(drain(&mut polls), 1);
    let rows = store.event_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].actor_name, "web");
}

#[tokio::test]
async fn network_event_records_row_without_poll() {
    let store = Arc::new(MemoryStore::default());
    let (w, mut polls) = watcher(Arc::new(ScriptedSource::default()), store.clone());

    let msg = message(EventMessageTypeEnum::NETWORK, "connect", "bridge", 1_700_000_000_000_000_000);
    w.handle_event(&msg).await.unwrap();

    assert_eq!(drain(&mut polls), 0);
    assert_eq!(store.event_rows().len(), 1);
}

#[tokio::test]
async fn malformed_event_is_dropped() {
    let store = Arc::new(MemoryStore::default());
    let (w, mut polls) = watcher(Arc::new(ScriptedSource::default()), store.clone());

    let mut msg = message(EventMessageTypeEnum::CONTAINER, "die", "web", 1_700_000_000_000_000_000);
    msg.action = None;
    assert!(w.handle_event(&msg).await.is_none());
    assert_eq!(drain(&mut polls), 0);
    assert!(store.event_rows().is_empty());
}

#[tokio::test]
async fn write_failure_still_requests_poll() {
    let store = Arc::new(MemoryStore::default());
    store.fail_event_writes.store(true, Ordering::SeqCst);
    let (w, mut polls) = watcher(Arc::new(ScriptedSource::default()), store.clone());

    let msg = message(EventMessageTypeEnum::CONTAINER, "die", "web", 1_700_000_000_000_000_000);
    assert!(w.handle_event(&msg).await.is_some());
    assert_eq!(drain(&mut polls), 1);
    assert!(store.event_rows().is_empty());
}

#[tokio::test]
async fn burst_of_container_events_coalesces_into_one_pending_poll() {
    let store = Arc::new(MemoryStore::default());
    let (w, mut polls) = watcher(Arc::new(ScriptedSource::default()), store.clone());

    for i in 0..5 {
        let msg = message(
            EventMessageTypeEnum::CONTAINER,
            "start",
            &format!("c{}", i),
            1_700_000_000_000_000_000 + i,
        );
        w.handle_event(&msg).await.unwrap();
    }
    assert_eq!(drain(&mut polls), 1);
    assert_eq!(store.event_rows().len(), 5);
}

#[tokio::test]
async fn run_resubscribes_from_last_event_after_stream_loss() {
    let first_ns = 1_700_000_000_000_000_000;
    let source = Arc::new(ScriptedSource::default());
    {
        let mut scripts = source.scripts.lock().unwrap();
        scripts.push_back(vec![
            Ok(message(EventMessageTypeEnum::CONTAINER, "start", "web", first_ns)),
            Err(anyhow::anyhow!("connection reset")),
        ]);
        scripts.push_back(vec![Ok(message(
            EventMessageTypeEnum::NETWORK,
            "connect",
            "bridge",
            first_ns + 5_000_000_000,
        ))]);
    }
    let store = Arc::new(MemoryStore::default());
    let (w, _polls) = watcher(source.clone(), store.clone());
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(w.run(shutdown_rx));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while store.event_rows().len() < 2 || source.subscriptions.lock().unwrap().len() < 3 {
        assert!(tokio::time::Instant::now() < deadline, "watcher did not reconnect");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    let subs = source.subscriptions.lock().unwrap().clone();
    assert!(subs[0].is_some());
    assert_eq!(subs[1], Some(DateTime::from_timestamp_nanos(first_ns)));
    assert_eq!(
        subs[2],
        Some(DateTime::from_timestamp_nanos(first_ns + 5_000_000_000))
    );
}

#[tokio::test]
async fn stream_lost_before_first_event_resumes_from_subscribe_time() {
    let source = Arc::new(ScriptedSource::default());
    source
        .scripts
        .lock()
        .unwrap()
        .push_back(vec![Err(anyhow::anyhow!("daemon restarting"))]);
    let store = Arc::new(MemoryStore::default());
    let (w, _polls) = watcher(source.clone(), store);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let before = Utc::now();
    let handle = tokio::spawn(w.run(shutdown_rx));
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while source.subscriptions.lock().unwrap().len() < 2 {
        assert!(tokio::time::Instant::now() < deadline, "watcher did not reconnect");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    let subs = source.subscriptions.lock().unwrap().clone();
    let first = subs[0].unwrap();
    assert!(first >= before);
    assert_eq!(subs[1], Some(first));
}
