//! Scriptable in-memory log source for engine tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use futures::stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use podweave_types::{
    ContainerRef, ContainerSnapshot, LineStream, LogLine, LogSource, LogsError, LogsResult,
    PodPhase, TopologyChange, TopologyEvent, TopologyStream, Workload,
};

use crate::config::LogsConfig;
use crate::reader::LogsReader;

pub const NS: &str = "some-ns";

pub fn container(pod: &str, name: &str) -> ContainerRef {
    ContainerRef::new(NS, pod, name)
}

pub fn workload() -> Workload {
    Workload::new(NS, "some-name")
}

/// Default config with a short poll so tests page through history quickly
pub fn config() -> LogsConfig {
    LogsConfig {
        poll_interval_ms: 10,
        ..LogsConfig::default()
    }
}

pub fn reader(source: Arc<FakeSource>) -> LogsReader {
    LogsReader::new(source, config())
}

/// A line `secs` seconds before `base`
pub fn ago(base: DateTime<Utc>, secs: i64, text: &str) -> LogLine {
    LogLine::new(base - Duration::seconds(secs), text)
}

pub fn event(change: TopologyChange, container: &ContainerRef, phase: PodPhase) -> TopologyEvent {
    TopologyEvent::new(change, container.clone(), phase)
}

/// One recorded `stream_lines` call
#[derive(Clone, Debug)]
pub struct StreamCall {
    pub container: ContainerRef,
    pub since: DateTime<Utc>,
    pub follow: bool,
}

#[derive(Default)]
pub struct FakeSource {
    snapshots: Mutex<Vec<ContainerSnapshot>>,
    list_error: Mutex<Option<String>>,
    lines: Mutex<HashMap<ContainerRef, Vec<LogLine>>>,
    sessions: Mutex<HashMap<ContainerRef, VecDeque<Vec<LogLine>>>>,
    failing: Mutex<HashSet<ContainerRef>>,
    watch_error: Mutex<Option<String>>,
    topology: Mutex<Option<mpsc::UnboundedReceiver<LogsResult<TopologyEvent>>>>,
    calls: Mutex<Vec<StreamCall>>,
    dropped: Arc<AtomicUsize>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a container created at `created` with the given lines
    pub fn with_container(
        self,
        container: ContainerRef,
        created: DateTime<Utc>,
        lines: Vec<LogLine>,
    ) -> Self {
        self.snapshots.lock().push(ContainerSnapshot::new(
            container.clone(),
            created,
            PodPhase::Running,
        ));
        self.lines.lock().insert(container, lines);
        self
    }

    /// Each follow stream opened for `container` serves the next batch and
    /// ends, as after a container restart. The last batch stays open.
    pub fn with_follow_sessions(
        self,
        container: ContainerRef,
        batches: Vec<Vec<LogLine>>,
    ) -> Self {
        self.sessions.lock().insert(container, batches.into());
        self
    }

    /// Makes every stream for `container` fail to open
    pub fn with_failing_stream(self, container: ContainerRef) -> Self {
        self.failing.lock().insert(container);
        self
    }

    pub fn with_list_error(self, message: &str) -> Self {
        *self.list_error.lock() = Some(message.to_string());
        self
    }

    pub fn with_watch_error(self, message: &str) -> Self {
        *self.watch_error.lock() = Some(message.to_string());
        self
    }

    /// Returns the sender that drives `watch_topology`
    pub fn topology(&self) -> mpsc::UnboundedSender<LogsResult<TopologyEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.topology.lock() = Some(rx);
        tx
    }

    pub fn calls(&self) -> Vec<StreamCall> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, container: &ContainerRef) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| &c.container == container)
            .count()
    }

    /// Number of streams handed out and since dropped by the consumer
    pub fn dropped_streams(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }
}

/// Bumps a counter when the stream holding it is dropped
struct DropGuard(Arc<AtomicUsize>);

impl Drop for DropGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LogSource for FakeSource {
    async fn list_containers(&self, _workload: &Workload) -> LogsResult<Vec<ContainerSnapshot>> {
        if let Some(message) = self.list_error.lock().clone() {
            return Err(LogsError::ListContainers(message.into()));
        }
        Ok(self.snapshots.lock().clone())
    }

    async fn stream_lines(
        &self,
        container: &ContainerRef,
        since: DateTime<Utc>,
        follow: bool,
    ) -> LogsResult<LineStream> {
        self.calls.lock().push(StreamCall {
            container: container.clone(),
            since,
            follow,
        });

        if self.failing.lock().contains(container) {
            return Err(LogsError::stream(container, "some-error"));
        }

        let session = match self.sessions.lock().get_mut(container) {
            Some(batches) if follow && batches.len() > 1 => batches.pop_front().map(|b| (b, true)),
            Some(batches) if follow => batches.front().cloned().map(|b| (b, false)),
            _ => None,
        };
        let ends = session.as_ref().is_some_and(|(_, ends)| *ends);
        let batch = match session {
            Some((batch, _)) => batch,
            None => self.lines.lock().get(container).cloned().unwrap_or_default(),
        };
        let lines: Vec<LogsResult<LogLine>> = batch
            .into_iter()
            .filter(|l| l.timestamp >= since)
            .map(Ok)
            .collect();

        let guard = DropGuard(Arc::clone(&self.dropped));
        let tail = if follow && !ends {
            stream::pending::<LogsResult<LogLine>>().boxed()
        } else {
            stream::empty::<LogsResult<LogLine>>().boxed()
        };

        Ok(stream::iter(lines)
            .chain(tail)
            .map(move |item| {
                let _held = &guard;
                item
            })
            .boxed())
    }

    async fn watch_topology(&self, _workload: &Workload) -> LogsResult<TopologyStream> {
        if let Some(message) = self.watch_error.lock().clone() {
            return Err(LogsError::Watch(message.into()));
        }

        let Some(rx) = self.topology.lock().take() else {
            return Ok(stream::pending::<LogsResult<TopologyEvent>>().boxed());
        };

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed())
    }
}
