use std::pin::pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{AsyncBufRead, AsyncBufReadExt, StreamExt, stream};
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::api::{ListParams, LogParams};
use kube::runtime::watcher::{self, Event, watcher};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use podweave_types::{
    ContainerRef, ContainerSnapshot, LineStream, LogLine, LogSource, LogsError, LogsResult,
    PodPhase, SidecarFilter, TopologyChange, TopologyEvent, TopologyStream, Workload,
};

use crate::parser::LineParser;

/// Lines read ahead of the consumer per open stream
const LINE_BUFFER: usize = 64;

/// [`LogSource`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeLogSource {
    client: kube::Client,
    sidecars: SidecarFilter,
}

impl KubeLogSource {
    pub fn new(client: kube::Client) -> Self {
        Self {
            client,
            sidecars: SidecarFilter::default(),
        }
    }

    pub fn with_sidecars(mut self, sidecars: SidecarFilter) -> Self {
        self.sidecars = sidecars;
        self
    }
}

fn pod_phase(pod: &Pod) -> PodPhase {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .map(PodPhase::from)
        .unwrap_or_default()
}

/// The pod's app containers, minus sidecars
fn containers(pod: &Pod, namespace: &str, sidecars: &SidecarFilter) -> Vec<ContainerRef> {
    let namespace = pod.metadata.namespace.as_deref().unwrap_or(namespace);
    let name = pod.metadata.name.as_deref().unwrap_or_default();

    pod.spec
        .iter()
        .flat_map(|spec| &spec.containers)
        .filter(|c| !sidecars.is_sidecar(&c.name))
        .map(|c| ContainerRef::new(namespace, name, c.name.clone()))
        .collect()
}

fn snapshots(pod: &Pod, namespace: &str, sidecars: &SidecarFilter) -> Vec<ContainerSnapshot> {
    let created = pod
        .metadata
        .creation_timestamp
        .as_ref()
        .map(|t| t.0)
        .unwrap_or_else(Utc::now);
    let phase = pod_phase(pod);

    containers(pod, namespace, sidecars)
        .into_iter()
        .map(|c| ContainerSnapshot::new(c, created, phase))
        .collect()
}

/// Translates one pod watch event into per-container topology events
fn topology_events(
    event: Event<Pod>,
    namespace: &str,
    sidecars: &SidecarFilter,
) -> Vec<TopologyEvent> {
    let (change, pod) = match event {
        Event::InitApply(pod) => (TopologyChange::Added, pod),
        Event::Apply(pod) => (TopologyChange::Modified, pod),
        Event::Delete(pod) => (TopologyChange::Deleted, pod),
        Event::Init | Event::InitDone => return Vec::new(),
    };
    let phase = pod_phase(&pod);

    containers(&pod, namespace, sidecars)
        .into_iter()
        .map(|c| TopologyEvent::new(change, c, phase))
        .collect()
}

/// Forwards parsed lines from `reader` until EOF, a read error, or the
/// consumer going away.
async fn pump(
    reader: impl AsyncBufRead,
    target: &ContainerRef,
    tx: mpsc::Sender<LogsResult<LogLine>>,
) {
    let mut reader = pin!(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = tokio::select! {
            _ = tx.closed() => break,
            read = reader.read_until(b'\n', &mut buf) => read,
        };

        let item = match read {
            Ok(0) => break,
            Ok(_) => Ok(LineParser::parse_bytes(&buf)),
            Err(err) => Err(LogsError::stream(target, err)),
        };
        let failed = item.is_err();
        if tx.send(item).await.is_err() || failed {
            break;
        }
    }
}

#[async_trait]
impl LogSource for KubeLogSource {
    async fn list_containers(&self, workload: &Workload) -> LogsResult<Vec<ContainerSnapshot>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &workload.namespace);
        let list = pods
            .list(&ListParams::default().labels(&workload.log_selector()))
            .await
            .map_err(|err| LogsError::ListContainers(Box::new(err)))?;

        debug!(
            namespace = %workload.namespace,
            pods = list.items.len(),
            "listed workload pods"
        );
        Ok(list
            .items
            .iter()
            .flat_map(|pod| snapshots(pod, &workload.namespace, &self.sidecars))
            .collect())
    }

    async fn stream_lines(
        &self,
        container: &ContainerRef,
        since: DateTime<Utc>,
        follow: bool,
    ) -> LogsResult<LineStream> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &container.namespace);
        let params = LogParams {
            container: Some(container.container.clone()),
            follow,
            since_time: Some(since),
            timestamps: true,
            ..Default::default()
        };

        let (opened_tx, opened_rx) = oneshot::channel();
        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        let target = container.clone();

        // The pump owns the API handle and stops once the consumer drops the stream.
        tokio::spawn(async move {
            let stream = match pods.log_stream(&target.pod, &params).await {
                Ok(stream) => {
                    let _ = opened_tx.send(Ok(()));
                    stream
                }
                Err(err) => {
                    let _ = opened_tx.send(Err(LogsError::stream(&target, err)));
                    return;
                }
            };

            pump(stream, &target, tx).await;
            debug!(container = %target, "log stream closed");
        });

        match opened_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(_) => return Err(LogsError::Task("log stream task exited".to_string())),
        }

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }

    async fn watch_topology(&self, workload: &Workload) -> LogsResult<TopologyStream> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &workload.namespace);
        let config = watcher::Config::default().labels(&workload.log_selector());
        let namespace = workload.namespace.clone();
        let sidecars = self.sidecars.clone();

        let events = watcher(pods, config).flat_map(move |event| {
            let batch: Vec<LogsResult<TopologyEvent>> = match event {
                Ok(event) => topology_events(event, &namespace, &sidecars)
                    .into_iter()
                    .map(Ok)
                    .collect(),
                Err(err) => vec![Err(LogsError::Watch(Box::new(err)))],
            };
            stream::iter(batch)
        });

        Ok(events.boxed())
    }
}
