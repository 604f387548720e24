use std::sync::Arc;

use podweave_types::{ContainerRef, LogSource, SidecarFilter, Workload};

use crate::config::LogsConfig;
use crate::reverse::ReverseReader;
use crate::window::WindowReader;

/// Reads the logs of a workload across all of its containers.
///
/// [`LogsReader::recent`] merges history from every current container into a
/// single newest-first list. [`LogsReader::follow`] tails every container as
/// it comes and goes.
#[derive(Clone)]
pub struct LogsReader {
    pub(crate) source: Arc<dyn LogSource>,
    pub(crate) reverse: ReverseReader,
    pub(crate) sidecars: SidecarFilter,
    pub(crate) config: LogsConfig,
}

impl LogsReader {
    pub fn new(source: Arc<dyn LogSource>, config: LogsConfig) -> Self {
        let reverse = ReverseReader::new(
            WindowReader::new(Arc::clone(&source)),
            config.window(),
            config.poll_interval(),
        );

        Self {
            source,
            reverse,
            sidecars: config.sidecar_filter(),
            config,
        }
    }

    pub fn config(&self) -> &LogsConfig {
        &self.config
    }

    /// Whether `container` contributes to the workload's output
    pub(crate) fn is_tailable(&self, workload: &Workload, container: &ContainerRef) -> bool {
        !self.sidecars.is_sidecar(&container.container) && workload.selects(&container.container)
    }
}
