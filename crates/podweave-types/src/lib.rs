//! Shared types for podweave
//!
//! This crate contains the data model used across the podweave crates, the
//! error taxonomy, and the [`LogSource`] capability the aggregation engine
//! consumes.

mod error;
mod source;

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

pub use error::{BoxError, LogsError, LogsResult};
pub use source::{LineStream, LogSource, TopologyStream};

/// Label carrying the workload name on every pod it owns
pub const NAME_LABEL: &str = "app.kubernetes.io/name";

/// Label carrying the workload component (e.g. `app-server`, `task`)
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";

// ============================================================================
// Log Types
// ============================================================================

/// A single timestamped line of container output
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

impl LogLine {
    pub fn new(timestamp: DateTime<Utc>, text: impl Into<String>) -> Self {
        Self {
            timestamp,
            text: text.into(),
        }
    }
}

// ============================================================================
// Kubernetes Resource Types
// ============================================================================

/// Identifies one log-producing container inside a pod
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerRef {
    pub namespace: String,
    pub pod: String,
    pub container: String,
}

impl ContainerRef {
    pub fn new(
        namespace: impl Into<String>,
        pod: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            container: container.into(),
        }
    }
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.pod, self.container)
    }
}

/// Point-in-time view of a container as reported by a listing
#[derive(Clone, Debug)]
pub struct ContainerSnapshot {
    pub container: ContainerRef,

    /// Creation time of the owning pod; nothing older can exist
    pub created: DateTime<Utc>,

    pub phase: PodPhase,
}

impl ContainerSnapshot {
    pub fn new(container: ContainerRef, created: DateTime<Utc>, phase: PodPhase) -> Self {
        Self {
            container,
            created,
            phase,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    #[default]
    Unknown,
}

impl PodPhase {
    /// Whether the pod has started and its containers can be asked for logs
    pub fn is_ready(&self) -> bool {
        !matches!(self, Self::Pending | Self::Unknown)
    }

    /// Whether every container has exited for good
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl From<&str> for PodPhase {
    fn from(s: &str) -> Self {
        match s {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

// ============================================================================
// Topology Types
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopologyChange {
    Added,
    Modified,
    Deleted,
}

/// A change to the set of containers belonging to a workload
#[derive(Clone, Debug)]
pub struct TopologyEvent {
    pub change: TopologyChange,
    pub container: ContainerRef,
    pub phase: PodPhase,
}

impl TopologyEvent {
    pub fn new(change: TopologyChange, container: ContainerRef, phase: PodPhase) -> Self {
        Self {
            change,
            container,
            phase,
        }
    }
}

// ============================================================================
// Workload
// ============================================================================

/// Logical owner of a set of pods whose output is aggregated together
#[derive(Clone, Debug, Default)]
pub struct Workload {
    pub namespace: String,
    pub name: String,

    /// Restricts the selector to one component of the workload
    pub component: Option<String>,

    /// Extra labels merged into the selector
    pub labels: BTreeMap<String, String>,

    /// Restricts aggregation to a single container name per pod
    pub container: Option<String>,
}

impl Workload {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels.extend(labels);
        self
    }

    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    /// All labels a pod must carry to belong to this workload
    pub fn selector_labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.labels.clone();
        labels.insert(NAME_LABEL.to_string(), self.name.clone());
        if let Some(component) = &self.component {
            labels.insert(COMPONENT_LABEL.to_string(), component.clone());
        }
        labels
    }

    /// Label selector used to find the workload's pods
    pub fn log_selector(&self) -> String {
        self.selector_labels()
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Whether a container with this name should be read at all
    pub fn selects(&self, container: &str) -> bool {
        self.container.as_deref().is_none_or(|c| c == container)
    }
}

// ============================================================================
// Sidecar Filter
// ============================================================================

/// Name-based denylist for injected helper containers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SidecarFilter {
    names: Vec<String>,
}

impl SidecarFilter {
    pub const DEFAULT_SIDECARS: [&'static str; 2] = ["istio-proxy", "istio-init"];

    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_sidecar(&self, container: &str) -> bool {
        self.names.iter().any(|n| n == container)
    }
}

impl Default for SidecarFilter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SIDECARS)
    }
}
