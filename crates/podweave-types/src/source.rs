//! The capability the aggregation engine reads logs through.
//!
//! Production code talks to the Kubernetes API; tests script their own
//! implementation. Both are plain implementors of [`LogSource`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::{ContainerRef, ContainerSnapshot, LogLine, LogsResult, TopologyEvent, Workload};

/// Lazily produced lines of one container, oldest first as the source emits them.
pub type LineStream = BoxStream<'static, LogsResult<LogLine>>;

/// Endless feed of topology changes for a workload.
pub type TopologyStream = BoxStream<'static, LogsResult<TopologyEvent>>;

#[async_trait]
pub trait LogSource: Send + Sync {
    /// Snapshot of every container currently belonging to the workload.
    async fn list_containers(&self, workload: &Workload) -> LogsResult<Vec<ContainerSnapshot>>;

    /// Streams lines from `container` starting at `since`.
    ///
    /// With `follow` unset the stream ends once the source has nothing newer;
    /// with it set the stream stays open until dropped. Lines the source
    /// cannot timestamp carry the time they were read.
    async fn stream_lines(
        &self,
        container: &ContainerRef,
        since: DateTime<Utc>,
        follow: bool,
    ) -> LogsResult<LineStream>;

    /// Watches the workload's containers being added, modified and deleted.
    async fn watch_topology(&self, workload: &Workload) -> LogsResult<TopologyStream>;
}
