use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use podweave_types::{ContainerSnapshot, LogsError, LogsResult};

use crate::queue::LogQueue;
use crate::window::WindowReader;

/// Walks a container's history backwards, newest line first.
///
/// Sources can only stream forward from a point in time, so the reader
/// slides a window `[next, end)` back from a fixed instant. Each pass moves `next` one
/// window width further back. When a pass finds lines, `end` becomes the
/// oldest of them so the following pass resumes exactly where this one
/// stopped; when it finds none, the reader backs off and tries again with the
/// wider window.
#[derive(Clone)]
pub struct ReverseReader {
    windows: WindowReader,
    width: chrono::Duration,
    backoff: Duration,
}

impl ReverseReader {
    pub fn new(windows: WindowReader, width: chrono::Duration, backoff: Duration) -> Self {
        Self {
            windows,
            width,
            backoff,
        }
    }

    /// Feeds `sink` with every line older than `until`, stopping at the
    /// container's creation time.
    ///
    /// After every window the sink's horizon is lowered to the window start,
    /// since nothing at or after it remains unread. Lines enqueued before a
    /// cancellation stay in the sink.
    pub async fn read(
        &self,
        snapshot: &ContainerSnapshot,
        until: DateTime<Utc>,
        sink: &LogQueue,
        cancel: &CancellationToken,
    ) -> LogsResult<()> {
        let created = snapshot.created;
        let mut end = until;
        let mut next = end;

        loop {
            if cancel.is_cancelled() {
                return Err(LogsError::Cancelled);
            }
            if next <= created {
                debug!(container = %snapshot.container, "reached container creation time");
                return Ok(());
            }

            next = (next - self.width).max(created);
            let lines = self
                .windows
                .read(next, end, &snapshot.container, cancel)
                .await?;

            let Some(oldest) = lines.first() else {
                sink.set_horizon(next);
                if next > created {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(LogsError::Cancelled),
                        _ = tokio::time::sleep(self.backoff) => {}
                    }
                }
                continue;
            };

            end = oldest.timestamp;
            for line in lines.into_iter().rev() {
                sink.enqueue(line, cancel).await?;
            }
            sink.set_horizon(next);
        }
    }
}
