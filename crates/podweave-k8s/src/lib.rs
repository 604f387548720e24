//! Kubernetes log source for podweave
//!
//! This crate provides the kubeconfig-backed client and the
//! [`podweave_types::LogSource`] implementation that lists, streams and
//! watches a workload's pods.

mod client;
mod parser;
mod source;

pub use client::KubeClient;
pub use parser::LineParser;
pub use source::KubeLogSource;
