use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use podweave_types::{LogsError, LogsResult, Workload};

use crate::follow::FollowStreams;
use crate::reader::LogsReader;

/// How a workload's logs are selected and printed
#[derive(Clone, Debug)]
pub struct TailOptions {
    pub namespace: String,
    pub component: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub container: Option<String>,

    /// Recent lines printed before following; zero skips them
    pub num_lines: usize,
    pub follow: bool,

    /// Deadline for gathering the recent lines
    pub timeout: Option<Duration>,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            component: None,
            labels: BTreeMap::new(),
            container: None,
            num_lines: 0,
            follow: false,
            timeout: None,
        }
    }
}

impl TailOptions {
    pub fn workload(&self, name: &str) -> Workload {
        let mut workload =
            Workload::new(self.namespace.clone(), name).with_labels(self.labels.clone());
        if let Some(component) = &self.component {
            workload = workload.with_component(component.clone());
        }
        if let Some(container) = &self.container {
            workload = workload.with_container(container.clone());
        }
        workload
    }
}

/// Prints a workload's logs: recent history in chronological order, then
/// optionally everything new as it arrives.
pub struct Tailer {
    reader: LogsReader,
}

impl Tailer {
    pub fn new(reader: LogsReader) -> Self {
        Self { reader }
    }

    pub async fn tail(
        &self,
        name: &str,
        out: &mut impl Write,
        options: &TailOptions,
        cancel: &CancellationToken,
    ) -> LogsResult<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LogsError::InvalidArgument(
                "workload name must not be empty".to_string(),
            ));
        }
        let workload = options.workload(name);
        info!(
            namespace = %workload.namespace,
            selector = %workload.log_selector(),
            "tailing workload"
        );

        // Recent history ends and the live tail begins at the same instant.
        let since = Utc::now();
        if options.num_lines > 0 {
            let recent = self
                .reader
                .recent_before(&workload, options.num_lines, since, cancel);
            let lines = match options.timeout {
                Some(limit) => tokio::time::timeout(limit, recent)
                    .await
                    .map_err(|_| LogsError::Timeout(limit))??,
                None => recent.await?,
            };

            for line in lines.iter().rev() {
                writeln!(out, "{line}")?;
            }
            out.flush()?;
        }

        if options.follow {
            self.follow(workload, since, out, cancel).await?;
        }
        Ok(())
    }

    /// Writes live lines from `since` until cancelled or the topology watch fails
    async fn follow(
        &self,
        workload: Workload,
        since: DateTime<Utc>,
        out: &mut impl Write,
        cancel: &CancellationToken,
    ) -> LogsResult<()> {
        let call = cancel.child_token();
        let _stop = call.clone().drop_guard();

        let FollowStreams {
            mut lines,
            mut errors,
        } = self.reader.follow(workload, since, &call);

        let mut fatal = None;
        let mut errors_open = true;
        loop {
            tokio::select! {
                line = lines.recv() => match line {
                    Some(line) => {
                        writeln!(out, "{line}")?;
                        out.flush()?;
                    }
                    None => break,
                },
                err = errors.recv(), if errors_open => match err {
                    Some(err) if err.is_fatal() => fatal = Some(err),
                    Some(err) => warn!(error = %err, "container log stream failed"),
                    None => errors_open = false,
                },
            }
        }

        // Both channels are closed; pick up anything still buffered.
        while let Some(err) = errors.recv().await {
            if err.is_fatal() {
                fatal = Some(err);
            } else {
                warn!(error = %err, "container log stream failed");
            }
        }

        match fatal {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
