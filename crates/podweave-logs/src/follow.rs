use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use podweave_types::{
    ContainerRef, LogSource, LogsError, PodPhase, TopologyChange, TopologyEvent, Workload,
};

use crate::reader::LogsReader;

/// Live output of [`LogsReader::follow`].
///
/// Both channels close together once the call ends, after every tail task
/// has stopped. Both are bounded and must be drained: a fatal watch error
/// waits behind unread per-container errors, and the channels stay open
/// until it is delivered or the call is cancelled.
pub struct FollowStreams {
    pub lines: mpsc::Receiver<String>,
    pub errors: mpsc::Receiver<LogsError>,
}

/// Sends `item` unless the call is cancelled first. Returns whether it was
/// delivered.
async fn deliver<T>(tx: &mpsc::Sender<T>, item: T, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(item) => sent.is_ok(),
    }
}

/// Controls one running tail
#[derive(Clone)]
struct TailHandle {
    cancel: CancellationToken,

    /// Set once the pod has exited; the current stream is the last one
    finished: Arc<AtomicBool>,
}

/// Containers currently tailed by one follow call
struct Tails {
    source: Arc<dyn LogSource>,
    since: DateTime<Utc>,
    backoff: Duration,
    call: CancellationToken,
    active: HashMap<ContainerRef, TailHandle>,
    tasks: JoinSet<()>,
    lines: mpsc::Sender<String>,
    errors: mpsc::Sender<LogsError>,
}

impl Tails {
    fn start(&mut self, container: ContainerRef, phase: PodPhase) {
        if let Some(handle) = self.active.get(&container) {
            if phase.is_finished() {
                handle.finished.store(true, Ordering::SeqCst);
            }
            return;
        }

        info!(%container, "tailing container");
        let handle = TailHandle {
            cancel: self.call.child_token(),
            finished: Arc::new(AtomicBool::new(phase.is_finished())),
        };
        self.active.insert(container.clone(), handle.clone());
        self.tasks.spawn(tail(
            Arc::clone(&self.source),
            container,
            self.since,
            self.backoff,
            handle,
            self.lines.clone(),
            self.errors.clone(),
        ));
    }

    fn stop(&mut self, container: &ContainerRef) {
        if let Some(handle) = self.active.remove(container) {
            info!(%container, "container removed, stopping tail");
            handle.cancel.cancel();
        }
    }

    /// Cancels every tail and waits for all of them to return
    async fn shutdown(mut self) {
        self.call.cancel();
        while self.tasks.join_next().await.is_some() {}
    }
}

/// Streams one container until its token is cancelled.
///
/// A stream that ends cleanly is reopened after `backoff` from the newest
/// line already delivered, so a restarted container keeps being tailed.
/// Lines the source replays up to that point are skipped. Once the pod has
/// finished, the stream that ends last is not reopened.
async fn tail(
    source: Arc<dyn LogSource>,
    container: ContainerRef,
    mut since: DateTime<Utc>,
    backoff: Duration,
    handle: TailHandle,
    lines: mpsc::Sender<String>,
    errors: mpsc::Sender<LogsError>,
) {
    let cancel = handle.cancel;
    let mut delivered: Option<DateTime<Utc>> = None;
    let mut replayed_to: Option<DateTime<Utc>> = None;

    loop {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            opened = source.stream_lines(&container, since, true) => opened,
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%container, error = %err, "failed to open log stream");
                deliver(&errors, err, &cancel).await;
                return;
            }
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(line)) => {
                    if replayed_to.is_some_and(|ts| line.timestamp <= ts) {
                        continue;
                    }
                    delivered = Some(line.timestamp);
                    if !deliver(&lines, line.text, &cancel).await {
                        return;
                    }
                }
                Some(Err(err)) => {
                    warn!(%container, error = %err, "log stream failed");
                    deliver(&errors, err, &cancel).await;
                    return;
                }
                None => break,
            }
        }

        drop(stream);
        if handle.finished.load(Ordering::SeqCst) {
            debug!(%container, "log stream ended, pod finished");
            return;
        }
        debug!(%container, "log stream ended, reopening");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(backoff) => {}
        }

        if let Some(ts) = delivered {
            since = ts;
            replayed_to = Some(ts);
        }
    }
}

impl LogsReader {
    /// Tails every container of the workload from `since` onwards, starting
    /// and stopping tails as pods come and go.
    ///
    /// Returns immediately. Per-container failures are reported on the error
    /// channel while the other tails keep running. A topology watch failure is
    /// reported there too and ends the call. A container whose stream ends
    /// while its pod lives on is reopened until the pod is deleted.
    pub fn follow(
        &self,
        workload: Workload,
        since: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> FollowStreams {
        let capacity = self.config.follow_buffer.max(1);
        let (line_tx, lines) = mpsc::channel(capacity);
        let (error_tx, errors) = mpsc::channel(capacity);

        let tails = Tails {
            source: Arc::clone(&self.source),
            since,
            backoff: self.config.poll_interval(),
            call: cancel.child_token(),
            active: HashMap::new(),
            tasks: JoinSet::new(),
            lines: line_tx,
            errors: error_tx,
        };
        tokio::spawn(self.clone().watch(workload, tails));

        FollowStreams { lines, errors }
    }

    async fn watch(self, workload: Workload, mut tails: Tails) {
        let call = tails.call.clone();

        let opened = tokio::select! {
            biased;
            _ = call.cancelled() => return tails.shutdown().await,
            opened = self.source.watch_topology(&workload) => opened,
        };

        let mut events = match opened {
            Ok(events) => events,
            Err(err) => {
                warn!(error = %err, "failed to watch topology");
                deliver(&tails.errors, err, &call).await;
                return tails.shutdown().await;
            }
        };

        loop {
            tokio::select! {
                biased;
                _ = call.cancelled() => break,
                event = events.next() => match event {
                    Some(Ok(event)) => self.apply(&workload, event, &mut tails),
                    Some(Err(err)) => {
                        warn!(error = %err, "topology watch failed");
                        deliver(&tails.errors, err, &call).await;
                        break;
                    }
                    None => {
                        let err = LogsError::Watch("topology watch ended".into());
                        deliver(&tails.errors, err, &call).await;
                        break;
                    }
                },
                Some(joined) = tails.tasks.join_next() => {
                    if let Err(err) = joined {
                        warn!(error = %err, "tail task failed");
                    }
                }
            }
        }

        tails.shutdown().await;
        debug!("follow finished");
    }

    fn apply(&self, workload: &Workload, event: TopologyEvent, tails: &mut Tails) {
        let container = event.container;
        match event.change {
            TopologyChange::Added | TopologyChange::Modified => {
                if !self.is_tailable(workload, &container) {
                    debug!(%container, "ignoring container");
                } else if !event.phase.is_ready() {
                    debug!(%container, phase = ?event.phase, "container not ready");
                } else {
                    tails.start(container, event.phase);
                }
            }
            TopologyChange::Deleted => tails.stop(&container),
        }
    }
}
