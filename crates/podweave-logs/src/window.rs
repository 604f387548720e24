use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use podweave_types::{ContainerRef, LogLine, LogSource, LogsError, LogsResult};

/// Reads one bounded slice of a container's history.
#[derive(Clone)]
pub struct WindowReader {
    source: Arc<dyn LogSource>,
}

impl WindowReader {
    pub fn new(source: Arc<dyn LogSource>) -> Self {
        Self { source }
    }

    /// Returns every line of `container` stamped within `[start, end)`,
    /// oldest first.
    ///
    /// The source stream is abandoned at the first line stamped at or after
    /// `end`; it is never drained.
    pub async fn read(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        container: &ContainerRef,
        cancel: &CancellationToken,
    ) -> LogsResult<Vec<LogLine>> {
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LogsError::Cancelled),
            opened = self.source.stream_lines(container, start, false) => opened?,
        };

        let mut lines = Vec::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LogsError::Cancelled),
                next = stream.next() => next,
            };

            match next {
                Some(Ok(line)) if line.timestamp >= end => break,
                Some(Ok(line)) if line.timestamp >= start => lines.push(line),
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err),
                None => break,
            }
        }

        // Sources make no ordering promise within a window.
        lines.sort_by_key(|l| l.timestamp);
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeSource, ago, container};

    fn texts(lines: &[LogLine]) -> Vec<&str> {
        lines.iter().map(|l| l.text.as_str()).collect()
    }

    #[tokio::test]
    async fn test_truncates_at_end_and_sorts() {
        let now = Utc::now();
        let c = container("pod-0", "a");
        let source = FakeSource::new().with_container(
            c.clone(),
            now - chrono::Duration::hours(1),
            vec![
                ago(now, 40, "t1"),
                ago(now, 50, "t0"),
                ago(now, 30, "t2"),
                ago(now, 20, "t3"),
                ago(now, 10, "t4"),
            ],
        );
        let reader = WindowReader::new(Arc::new(source));

        let end = now - chrono::Duration::seconds(20);
        let lines = reader
            .read(now - chrono::Duration::minutes(5), end, &c, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(texts(&lines), vec!["t0", "t1", "t2"]);
    }

    #[tokio::test]
    async fn test_excludes_lines_before_start() {
        let now = Utc::now();
        let c = container("pod-0", "a");
        let source = Arc::new(FakeSource::new().with_container(
            c.clone(),
            now - chrono::Duration::hours(1),
            vec![ago(now, 30, "old"), ago(now, 10, "new")],
        ));
        let reader = WindowReader::new(source.clone());

        let start = now - chrono::Duration::seconds(15);
        let lines = reader
            .read(start, now, &c, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(texts(&lines), vec!["new"]);
        let calls = source.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].since, start);
        assert!(!calls[0].follow);
    }

    #[tokio::test]
    async fn test_empty_window() {
        let now = Utc::now();
        let c = container("pod-0", "a");
        let source = FakeSource::new().with_container(c.clone(), now, vec![]);
        let reader = WindowReader::new(Arc::new(source));

        let lines = reader
            .read(now - chrono::Duration::seconds(5), now, &c, &CancellationToken::new())
            .await
            .unwrap();
        assert!(lines.is_empty());
    }

    #[tokio::test]
    async fn test_source_error_propagates() {
        let now = Utc::now();
        let c = container("pod-0", "a");
        let source = FakeSource::new()
            .with_container(c.clone(), now, vec![])
            .with_failing_stream(c.clone());
        let reader = WindowReader::new(Arc::new(source));

        let err = reader
            .read(now - chrono::Duration::seconds(5), now, &c, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LogsError::Stream { container, .. } if container == c));
    }

    #[tokio::test]
    async fn test_cancelled_before_read() {
        let now = Utc::now();
        let c = container("pod-0", "a");
        let source = Arc::new(FakeSource::new().with_container(c.clone(), now, vec![]));
        let reader = WindowReader::new(source.clone());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = reader
            .read(now - chrono::Duration::seconds(5), now, &c, &cancel)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(source.calls().is_empty());
    }
}
