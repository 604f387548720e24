mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use podweave_k8s::{KubeClient, KubeLogSource};
use podweave_logs::{LogsReader, TailOptions, Tailer};

use crate::config::Config;

/// Podweave - merged, time-ordered logs for every container of a Kubernetes workload
#[derive(Parser, Debug)]
#[command(name = "podweave")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Workload name (its app.kubernetes.io/name label)
    #[arg(value_name = "NAME")]
    name: String,

    /// Namespace (defaults to the context's namespace, then "default")
    #[arg(short, long)]
    namespace: Option<String>,

    /// Kubernetes context name (defaults to the current context)
    #[arg(long)]
    context: Option<String>,

    /// Extra pod labels to select on, as key=value
    #[arg(short = 'l', long = "label", value_parser = parse_label, value_delimiter = ',')]
    labels: Vec<(String, String)>,

    /// Workload component (its app.kubernetes.io/component label)
    #[arg(long)]
    component: Option<String>,

    /// Only read containers with this name
    #[arg(short, long)]
    container: Option<String>,

    /// Number of recent lines to print
    #[arg(long, default_value = "10")]
    lines: usize,

    /// Keep printing new lines as they arrive
    #[arg(short, long)]
    follow: bool,

    /// Give up gathering recent lines after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// TOML file with engine tunables
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long)]
    verbose: bool,
}

fn parse_label(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Log lines go to stdout, diagnostics to stderr
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load(args.config.as_deref())?;

    let kube_client = KubeClient::new()?;
    let client = kube_client
        .client_for_context(args.context.as_deref())
        .await?;
    let namespace = args
        .namespace
        .or_else(|| kube_client.default_namespace(args.context.as_deref()))
        .unwrap_or_else(|| "default".to_string());

    let source = KubeLogSource::new(client).with_sidecars(config.logs.sidecar_filter());
    let tailer = Tailer::new(LogsReader::new(Arc::new(source), config.logs));

    let options = TailOptions {
        namespace,
        component: args.component,
        labels: args.labels.into_iter().collect(),
        container: args.container,
        num_lines: args.lines,
        follow: args.follow,
        timeout: args.timeout.map(Duration::from_secs),
    };

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, stopping");
            interrupt.cancel();
        }
    });

    let mut out = std::io::stdout();
    match tailer.tail(&args.name, &mut out, &options, &cancel).await {
        Err(err) if !err.is_cancelled() => {
            Err(err).context(format!("Failed to read logs for '{}'", args.name))
        }
        _ => Ok(()),
    }
}
