//! Monitoring session lifecycle and subscriber synchronization

use crate::broadcaster::{EventSink, SubscriberId};
use crate::config::DEFAULT_DELAY;
use crate::enricher::StartTimeLookup;
use crate::protocol::{EventKind, ProcessEvent};
use crate::reader::{sampling_args, SamplingArgs, SnapshotReader};
use crate::snapshot::{FilterSet, SnapshotDiff, SnapshotDiffer};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct Session {
    delay: f64,
    shutdown: oneshot::Sender<()>,
    finished: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl Session {
    /// Signals the ingestion loop and waits until the reader is closed.
    async fn terminate(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            warn!("Ingestion task ended abnormally: {}", e);
        }
    }
}

/// Owns the sampling session. Only the ingestion loop writes snapshots;
/// subscriber synchronization takes read access.
pub struct MonitorController {
    program: String,
    differ: Arc<RwLock<SnapshotDiffer>>,
    sink: Arc<dyn EventSink>,
    lookup: Arc<dyn StartTimeLookup>,
    session: Mutex<Option<Session>>,
}

impl MonitorController {
    pub fn new(program: impl Into<String>, sink: Arc<dyn EventSink>, lookup: Arc<dyn StartTimeLookup>) -> Self {
        Self {
            program: program.into(),
            differ: Arc::new(RwLock::new(SnapshotDiffer::new())),
            sink,
            lookup,
            session: Mutex::new(None),
        }
    }

    /// (Re)starts sampling every `delay` seconds. A negative or non-finite
    /// delay becomes 1. Spawn failures are logged and leave the monitor idle.
    pub async fn start(&self, delay: f64) {
        let delay = if delay.is_finite() && delay >= 0.0 { delay } else { DEFAULT_DELAY };
        let mut slot = self.session.lock().await;
        self.stop_locked(&mut slot).await;

        let os = std::env::consts::OS;
        let args = match sampling_args(os, delay) {
            SamplingArgs::Repeat(args) => args,
            SamplingArgs::Unsupported => {
                error!("Platform {} not supported for {} command", os, self.program);
                Vec::new()
            }
            SamplingArgs::Unknown => {
                error!("Platform {} has no known {} invocation, running it without arguments", os, self.program);
                Vec::new()
            }
        };
        info!("Starting process monitor: {} {}", self.program, args.join(" "));

        match SnapshotReader::spawn(&self.program, &args) {
            Ok(reader) => *slot = Some(self.launch(reader, delay)),
            Err(e) => error!("{}", e),
        }
    }

    /// Replaces any running session with one fed by `reader`.
    pub async fn attach(&self, reader: SnapshotReader, delay: f64) {
        let mut slot = self.session.lock().await;
        self.stop_locked(&mut slot).await;
        *slot = Some(self.launch(reader, delay));
    }

    /// Terminates the active reader and drops both snapshots. The column
    /// layout is kept, so a restarted tool must print the same columns.
    pub async fn stop(&self) {
        let mut slot = self.session.lock().await;
        self.stop_locked(&mut slot).await;
    }

    async fn stop_locked(&self, slot: &mut Option<Session>) {
        if let Some(session) = slot.take() {
            session.terminate().await;
            info!("Process monitor stopped");
        }
        self.differ.write().await.clear_snapshots();
    }

    fn launch(&self, reader: SnapshotReader, delay: f64) -> Session {
        let (shutdown, shutdown_rx) = oneshot::channel();
        let (finished_tx, finished) = watch::channel(false);
        let differ = Arc::clone(&self.differ);
        let sink = Arc::clone(&self.sink);
        let task = tokio::spawn(async move {
            ingest(reader, differ, sink, shutdown_rx).await;
            let _ = finished_tx.send(true);
        });
        Session { delay, shutdown, finished, task }
    }

    /// Replaces the command filter. Applies from the next diff or sync on.
    pub async fn set_filter(&self, filters: Vec<String>) {
        debug!("Filter set to {:?}", filters);
        self.differ.write().await.set_filters(FilterSet::new(filters));
    }

    pub async fn filters(&self) -> Vec<String> {
        self.differ.read().await.filters().patterns().to_vec()
    }

    pub async fn is_running(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| !*s.finished.borrow())
    }

    pub async fn delay(&self) -> Option<f64> {
        self.session.lock().await.as_ref().map(|s| s.delay)
    }

    /// Resolves once the active reader has hit end of stream or been stopped.
    pub async fn wait_finished(&self) {
        let finished = self.session.lock().await.as_ref().map(|s| s.finished.clone());
        if let Some(mut finished) = finished {
            let _ = finished.wait_for(|done| *done).await;
        }
    }

    /// Sends the currently running (filtered) processes to one subscriber,
    /// with start times from the lookup where it has them.
    pub async fn handle_new_subscriber(&self, subscriber: SubscriberId) {
        let records = self.differ.read().await.visible_records();
        if records.is_empty() {
            return;
        }

        let pids: Vec<String> = records.iter().map(|r| r.pid.clone()).collect();
        let lookup = Arc::clone(&self.lookup);
        let started = match tokio::task::spawn_blocking(move || lookup.start_times(&pids)).await {
            Ok(started) => started,
            Err(e) => {
                warn!("Start time lookup panicked: {}", e);
                HashMap::new()
            }
        };

        let now = Utc::now();
        let events: Vec<ProcessEvent> = records
            .iter()
            .map(|r| ProcessEvent::from_record(r, started.get(&r.pid).copied().unwrap_or(now)))
            .collect();
        debug!("Syncing {} processes to subscriber {}", events.len(), subscriber);
        self.sink.send_to(subscriber, EventKind::CurrentProcess, &events);
    }
}

async fn ingest(
    mut reader: SnapshotReader,
    differ: Arc<RwLock<SnapshotDiffer>>,
    sink: Arc<dyn EventSink>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            line = reader.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let changes = differ.write().await.ingest(&line, Utc::now());
                        if let Some(changes) = changes {
                            publish(sink.as_ref(), changes);
                        }
                    }
                    Ok(None) => {
                        warn!("Sampling tool output ended");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read sampling tool output: {}", e);
                        break;
                    }
                }
            }
        }
    }
    reader.close().await;
}

fn publish(sink: &dyn EventSink, changes: SnapshotDiff) {
    if changes.is_empty() {
        return;
    }
    if !changes.disappeared.is_empty() {
        info!("{}: {} processes", EventKind::RemovedProcess, changes.disappeared.len());
        sink.broadcast(EventKind::RemovedProcess, &changes.disappeared);
    }
    if !changes.appeared.is_empty() {
        info!("{}: {} processes", EventKind::NewProcess, changes.appeared.len());
        sink.broadcast(EventKind::NewProcess, &changes.appeared);
    }
}
