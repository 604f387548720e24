use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use podweave_types::{LogsError, LogsResult, Workload};

use crate::queue::{Frontier, LogQueue};
use crate::reader::LogsReader;

/// Next step of the merge loop
#[derive(Debug, PartialEq, Eq)]
enum Pick {
    /// Emit the head of the queue at this index
    Line(usize),

    /// A producer may still enqueue something newer than every buffered head
    Wait,

    /// Every producer is done and every queue is drained
    Done,
}

/// Chooses the queue holding the newest line that no producer can still beat.
///
/// Ties go to the earliest queue in list order.
fn pick(queues: &[Arc<LogQueue>]) -> Pick {
    let frontiers: Vec<Frontier> = queues.iter().map(|q| q.frontier()).collect();

    let mut newest: Option<(usize, DateTime<Utc>)> = None;
    for (index, frontier) in frontiers.iter().enumerate() {
        if let Frontier::Head(ts) = *frontier {
            if newest.is_none_or(|(_, best)| ts > best) {
                newest = Some((index, ts));
            }
        }
    }

    let Some((index, ts)) = newest else {
        return if frontiers.iter().all(|f| *f == Frontier::Finished) {
            Pick::Done
        } else {
            Pick::Wait
        };
    };

    let pending = frontiers.iter().any(|f| match f {
        Frontier::Unknown => true,
        Frontier::Below(horizon) => *horizon > ts,
        Frontier::Head(_) | Frontier::Finished => false,
    });

    if pending { Pick::Wait } else { Pick::Line(index) }
}

fn settle(joined: Result<LogsResult<()>, JoinError>) -> LogsResult<()> {
    joined.map_err(|err| LogsError::Task(err.to_string()))?
}

impl LogsReader {
    /// Returns up to `num_lines` of the workload's most recent lines across
    /// every container, newest first.
    ///
    /// One reverse reader runs per container; the first one to fail aborts the
    /// whole call and nothing gathered so far is returned. Every reader is
    /// stopped before this returns, however it returns.
    pub async fn recent(
        &self,
        workload: &Workload,
        num_lines: usize,
        cancel: &CancellationToken,
    ) -> LogsResult<Vec<String>> {
        self.recent_before(workload, num_lines, Utc::now(), cancel).await
    }

    /// Like [`LogsReader::recent`], but only lines stamped strictly before
    /// `until` are considered.
    ///
    /// Following from the same `until` afterwards picks up exactly where this
    /// left off.
    pub async fn recent_before(
        &self,
        workload: &Workload,
        num_lines: usize,
        until: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> LogsResult<Vec<String>> {
        if num_lines == 0 {
            return Ok(Vec::new());
        }

        let snapshots = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LogsError::Cancelled),
            listed = self.source.list_containers(workload) => listed?,
        };

        let call = cancel.child_token();
        let _stop = call.clone().drop_guard();

        let mut producers = JoinSet::new();
        let mut queues = Vec::new();
        for snapshot in snapshots {
            if !self.is_tailable(workload, &snapshot.container) {
                debug!(container = %snapshot.container, "skipping container");
                continue;
            }

            let queue = Arc::new(LogQueue::new(self.config.queue_capacity));
            let sink = Arc::clone(&queue);
            let reverse = self.reverse.clone();
            let token = call.clone();
            debug!(container = %snapshot.container, "starting reverse reader");
            producers.spawn(async move {
                reverse.read(&snapshot, until, &sink, &token).await?;
                sink.finish();
                Ok(())
            });
            queues.push(queue);
        }

        let mut lines = Vec::new();
        while lines.len() < num_lines {
            if cancel.is_cancelled() {
                return Err(LogsError::Cancelled);
            }
            while let Some(joined) = producers.try_join_next() {
                settle(joined)?;
            }

            match pick(&queues) {
                Pick::Line(index) => {
                    if let Some(line) = queues[index].dequeue() {
                        lines.push(line.text);
                    }
                }
                Pick::Done => break,
                Pick::Wait => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(LogsError::Cancelled),
                        Some(joined) = producers.join_next() => settle(joined)?,
                        _ = tokio::time::sleep(self.config.poll_interval()) => {}
                    }
                }
            }
        }

        debug!(lines = lines.len(), "recent lines merged");
        Ok(lines)
    }
}
