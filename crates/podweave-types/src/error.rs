//! Error taxonomy shared by every podweave crate.

use std::time::Duration;

use thiserror::Error;

use crate::ContainerRef;

/// Boxed error reported by a log source implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for log aggregation operations.
pub type LogsResult<T> = Result<T, LogsError>;

#[derive(Debug, Error)]
pub enum LogsError {
    /// The source could not list the workload's containers
    #[error("failed to list pods: {0}")]
    ListContainers(#[source] BoxError),

    /// The topology watch could not be opened or broke while running
    #[error("failed to watch pods: {0}")]
    Watch(#[source] BoxError),

    /// A single container's log stream failed to open or read
    #[error("failed to stream logs from {container}: {source}")]
    Stream {
        container: ContainerRef,
        #[source]
        source: BoxError,
    },

    /// The caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to write output: {0}")]
    Io(#[from] std::io::Error),

    /// A spawned task panicked or was aborted
    #[error("log task failed: {0}")]
    Task(String),
}

impl LogsError {
    pub fn stream(container: &ContainerRef, source: impl Into<BoxError>) -> Self {
        Self::Stream {
            container: container.clone(),
            source: source.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Errors after which no further output can be trusted
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ListContainers(_) | Self::Watch(_))
    }
}
