//! Log aggregation engine for podweave
//!
//! Merges the history of every container of a workload into one
//! newest-first list, and tails them live as pods come and go.

mod config;
mod follow;
mod queue;
mod reader;
mod recent;
mod reverse;
mod tailer;
mod window;

#[cfg(test)]
mod testing;

pub use config::LogsConfig;
pub use follow::FollowStreams;
pub use queue::{Frontier, LogQueue};
pub use reader::LogsReader;
pub use reverse::ReverseReader;
pub use tailer::{TailOptions, Tailer};
pub use window::WindowReader;

// Re-export types used in our public API
pub use podweave_types::{LogLine, LogSource, LogsError, LogsResult, Workload};
