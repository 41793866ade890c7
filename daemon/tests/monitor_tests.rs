use chrono::{DateTime, TimeZone, Utc};
use procwatch_daemon::broadcaster::{EventSink, SubscriberId};
use procwatch_daemon::enricher::StartTimeLookup;
use procwatch_daemon::monitor::MonitorController;
use procwatch_daemon::protocol::{EventKind, ProcessEvent};
use procwatch_daemon::reader::SnapshotReader;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

const HEADER: &str = "    PID USER      PR  NI    VIRT    RES    SHR S  %CPU  %MEM     TIME+ COMMAND";

#[derive(Debug, Clone, PartialEq)]
struct Delivery {
    to: Option<SubscriberId>,
    kind: EventKind,
    events: Vec<ProcessEvent>,
}

#[derive(Default)]
struct RecordingSink {
    deliveries: Mutex<Vec<Delivery>>,
}

impl RecordingSink {
    fn take(&self) -> Vec<Delivery> {
        std::mem::take(&mut *self.deliveries.lock().unwrap())
    }
}

impl EventSink for RecordingSink {
    fn broadcast(&self, kind: EventKind, events: &[ProcessEvent]) {
        self.deliveries.lock().unwrap().push(Delivery { to: None, kind, events: events.to_vec() });
    }

    fn send_to(&self, subscriber: SubscriberId, kind: EventKind, events: &[ProcessEvent]) {
        self.deliveries.lock().unwrap().push(Delivery {
            to: Some(subscriber),
            kind,
            events: events.to_vec(),
        });
    }
}

struct FixedStartTimes(HashMap<String, DateTime<Utc>>);

impl StartTimeLookup for FixedStartTimes {
    fn start_times(&self, pids: &[String]) -> HashMap<String, DateTime<Utc>> {
        pids.iter()
            .filter_map(|p| self.0.get(p).map(|t| (p.clone(), *t)))
            .collect()
    }
}

fn row(pid: u32, command: &str) -> String {
    format!("  {:>5} root      20   0    1000    100     50 S   0.0   0.1   0:00.01 {}", pid, command)
}

fn reader(lines: &[String]) -> SnapshotReader {
    let text = lines.join("\n") + "\n";
    SnapshotReader::from_reader(Cursor::new(text.into_bytes()))
}

fn controller(lookup: HashMap<String, DateTime<Utc>>) -> (MonitorController, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let monitor = MonitorController::new("top", sink.clone(), Arc::new(FixedStartTimes(lookup)));
    (monitor, sink)
}

fn ids(delivery: &Delivery) -> Vec<&str> {
    delivery.events.iter().map(|e| e.id.as_str()).collect()
}

#[tokio::test]
async fn test_session_broadcasts_removed_then_new() {
    let (monitor, sink) = controller(HashMap::new());
    let lines = vec![
        "top - 10:00:00 up 3 days".to_string(),
        HEADER.to_string(),
        row(1, "init"),
        row(20, "bash"),
        HEADER.to_string(),
        row(1, "init"),
        row(30, "cargo"),
        HEADER.to_string(),
    ];
    monitor.attach(reader(&lines), 1.0).await;
    monitor.wait_finished().await;

    let deliveries = sink.take();
    assert_eq!(deliveries.len(), 2);
    assert_eq!(deliveries[0].kind, EventKind::RemovedProcess);
    assert_eq!(deliveries[0].to, None);
    assert_eq!(ids(&deliveries[0]), vec!["20"]);
    assert_eq!(deliveries[1].kind, EventKind::NewProcess);
    assert_eq!(ids(&deliveries[1]), vec!["30"]);
    assert!(!monitor.is_running().await);
}

#[tokio::test]
async fn test_filter_limits_broadcasts() {
    let (monitor, sink) = controller(HashMap::new());
    monitor.set_filter(vec!["node".to_string()]).await;
    let lines = vec![
        HEADER.to_string(),
        row(1, "sshd"),
        row(2, "node"),
        HEADER.to_string(),
        row(3, "bash"),
        row(4, "node"),
        HEADER.to_string(),
    ];
    monitor.attach(reader(&lines), 1.0).await;
    monitor.wait_finished().await;

    let deliveries = sink.take();
    assert_eq!(deliveries.len(), 2);
    assert_eq!(ids(&deliveries[0]), vec!["2"]);
    assert_eq!(ids(&deliveries[1]), vec!["4"]);
    assert_eq!(monitor.filters().await, vec!["node"]);
}

#[tokio::test]
async fn test_new_subscriber_gets_enriched_snapshot() {
    let started = Utc.with_ymd_and_hms(2026, 10, 1, 8, 30, 0).unwrap();
    let (monitor, sink) = controller(HashMap::from([("2".to_string(), started)]));
    let lines = vec![HEADER.to_string(), row(1, "systemd"), row(2, "node"), row(3, "node"), HEADER.to_string()];
    monitor.attach(reader(&lines), 1.0).await;
    monitor.wait_finished().await;
    monitor.set_filter(vec!["node".to_string()]).await;

    let before = Utc::now();
    monitor.handle_new_subscriber(SubscriberId(7)).await;

    let deliveries = sink.take();
    assert_eq!(deliveries.len(), 1);
    let sync = &deliveries[0];
    assert_eq!(sync.to, Some(SubscriberId(7)));
    assert_eq!(sync.kind, EventKind::CurrentProcess);
    assert_eq!(ids(sync), vec!["2", "3"]);
    assert_eq!(sync.events[0].timestamp, started);
    // no start time known for pid 3, so it carries the sync time
    assert!(sync.events[1].timestamp >= before);
}

#[tokio::test]
async fn test_sync_falls_back_when_lookup_is_empty() {
    let (monitor, sink) = controller(HashMap::new());
    let lines = vec![HEADER.to_string(), row(5, "vim")];
    monitor.attach(reader(&lines), 1.0).await;
    monitor.wait_finished().await;

    let before = Utc::now();
    monitor.handle_new_subscriber(SubscriberId(1)).await;
    let deliveries = sink.take();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(ids(&deliveries[0]), vec!["5"]);
    assert!(deliveries[0].events[0].timestamp >= before);
}

#[tokio::test]
async fn test_sync_with_nothing_to_report_sends_nothing() {
    let (monitor, sink) = controller(HashMap::new());
    monitor.handle_new_subscriber(SubscriberId(1)).await;
    assert!(sink.take().is_empty());
}

#[tokio::test]
async fn test_restart_forgets_previous_session() {
    let (monitor, sink) = controller(HashMap::new());
    let first = vec![HEADER.to_string(), row(1, "init"), row(2, "bash"), HEADER.to_string(), row(1, "init")];
    monitor.attach(reader(&first), 1.0).await;
    monitor.wait_finished().await;
    monitor.stop().await;
    assert!(sink.take().is_empty());
    assert_eq!(monitor.delay().await, None);

    let second = vec![
        row(9, "leftover"),
        HEADER.to_string(),
        row(4, "cron"),
        HEADER.to_string(),
        row(4, "cron"),
        row(6, "make"),
        HEADER.to_string(),
    ];
    monitor.attach(reader(&second), 2.0).await;
    monitor.wait_finished().await;

    let deliveries = sink.take();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].kind, EventKind::NewProcess);
    assert_eq!(ids(&deliveries[0]), vec!["6"]);
    assert_eq!(monitor.delay().await, Some(2.0));
}

#[tokio::test]
async fn test_stop_terminates_a_live_reader() {
    let (monitor, sink) = controller(HashMap::new());
    let (client, server) = tokio::io::duplex(1024);
    let live = SnapshotReader::from_reader(tokio::io::BufReader::new(server));
    monitor.attach(live, 1.0).await;
    assert!(monitor.is_running().await);

    monitor.stop().await;
    assert!(!monitor.is_running().await);
    drop(client);
    assert!(sink.take().is_empty());
}

#[tokio::test]
async fn test_undecodable_line_does_not_end_session() {
    let (monitor, sink) = controller(HashMap::new());
    let mut bytes = Vec::new();
    for line in [HEADER.to_string(), row(1, "init"), HEADER.to_string(), row(1, "init")] {
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
    }
    bytes.extend_from_slice(row(2, "bad").as_bytes());
    bytes.extend_from_slice(&[0xff, 0xfe]);
    bytes.extend_from_slice(b"name\n");
    for line in [HEADER.to_string(), row(1, "init"), row(3, "cargo"), HEADER.to_string()] {
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
    }
    monitor.attach(SnapshotReader::from_reader(Cursor::new(bytes)), 1.0).await;
    monitor.wait_finished().await;

    let deliveries = sink.take();
    assert_eq!(deliveries.len(), 3);
    assert_eq!(deliveries[0].kind, EventKind::NewProcess);
    assert_eq!(ids(&deliveries[0]), vec!["2"]);
    assert_eq!(deliveries[0].events[0].name, "bad\u{FFFD}\u{FFFD}name");
    assert_eq!(deliveries[1].kind, EventKind::RemovedProcess);
    assert_eq!(ids(&deliveries[1]), vec!["2"]);
    assert_eq!(deliveries[2].kind, EventKind::NewProcess);
    assert_eq!(ids(&deliveries[2]), vec!["3"]);
}

#[tokio::test]
async fn test_unchanged_samples_broadcast_nothing() {
    let (monitor, sink) = controller(HashMap::new());
    let lines = vec![
        HEADER.to_string(),
        row(1, "init"),
        HEADER.to_string(),
        row(1, "init"),
        HEADER.to_string(),
        row(1, "init"),
        HEADER.to_string(),
    ];
    monitor.attach(reader(&lines), 1.0).await;
    monitor.wait_finished().await;
    assert!(sink.take().is_empty());
}
