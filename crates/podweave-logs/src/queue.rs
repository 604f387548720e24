use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use podweave_types::{LogLine, LogsError, LogsResult};

/// Fixed-capacity line buffer between one producer and one consumer.
///
/// Enqueueing waits for room (or cancellation). Peeking and dequeueing never
/// wait: they return `None` when nothing is buffered. A peeked line is held in
/// a single cache slot until the next dequeue, so peek-then-dequeue always
/// observes the same line.
pub struct LogQueue {
    tx: mpsc::Sender<LogLine>,
    state: Mutex<QueueState>,
}

struct QueueState {
    rx: mpsc::Receiver<LogLine>,

    /// Line taken off the channel by a peek but not yet dequeued
    head: Option<LogLine>,

    /// Every line the producer has yet to enqueue is strictly older than this
    horizon: Option<DateTime<Utc>>,

    /// The producer returned successfully and will enqueue nothing more
    finished: bool,
}

impl QueueState {
    fn fill_head(&mut self) {
        if self.head.is_none() {
            self.head = self.rx.try_recv().ok();
        }
    }
}

/// What a consumer may assume about a queue's next line
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Frontier {
    /// A line is buffered with this timestamp
    Head(DateTime<Utc>),

    /// Empty; any line still to come is older than this
    Below(DateTime<Utc>),

    /// Empty; nothing is known about lines still to come
    Unknown,

    /// Empty and the producer is done
    Finished,
}

impl LogQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            state: Mutex::new(QueueState {
                rx,
                head: None,
                horizon: None,
                finished: false,
            }),
        }
    }

    /// Appends a line, waiting while the queue is full.
    ///
    /// On cancellation the line is dropped and [`LogsError::Cancelled`] is
    /// returned.
    pub async fn enqueue(&self, line: LogLine, cancel: &CancellationToken) -> LogsResult<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LogsError::Cancelled),
            sent = self.tx.send(line) => sent.map_err(|_| LogsError::Cancelled),
        }
    }

    /// Removes and returns the oldest buffered line
    pub fn dequeue(&self) -> Option<LogLine> {
        let mut state = self.state.lock();
        state.head.take().or_else(|| state.rx.try_recv().ok())
    }

    /// Returns the oldest buffered line without removing it
    pub fn peek(&self) -> Option<LogLine> {
        let mut state = self.state.lock();
        state.fill_head();
        state.head.clone()
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        state.head.is_none() && state.rx.is_empty()
    }

    /// Declares that every line still to be enqueued is older than `horizon`
    pub fn set_horizon(&self, horizon: DateTime<Utc>) {
        self.state.lock().horizon = Some(horizon);
    }

    /// Marks the producer as done
    pub fn finish(&self) {
        self.state.lock().finished = true;
    }

    pub fn frontier(&self) -> Frontier {
        let mut state = self.state.lock();
        state.fill_head();
        match (&state.head, state.finished, state.horizon) {
            (Some(line), _, _) => Frontier::Head(line.timestamp),
            (None, true, _) => Frontier::Finished,
            (None, false, Some(horizon)) => Frontier::Below(horizon),
            (None, false, None) => Frontier::Unknown,
        }
    }
}
