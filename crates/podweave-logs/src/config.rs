use std::time::Duration;

use serde::Deserialize;

use podweave_types::SidecarFilter;

/// Tunables for the aggregation engine
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    /// Lines buffered per container while merging recent output
    pub queue_capacity: usize,

    /// Width of each backward window, in seconds
    pub window_secs: u64,

    /// Back-off whenever a reader finds nothing new, in milliseconds
    pub poll_interval_ms: u64,

    /// Capacity of the follow output channels
    pub follow_buffer: usize,

    /// Container names that are never read
    pub sidecars: Vec<String>,
}

impl LogsConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs.max(1) as i64)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sidecar_filter(&self) -> SidecarFilter {
        SidecarFilter::new(self.sidecars.iter().cloned())
    }
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            window_secs: 5,
            poll_interval_ms: 250,
            follow_buffer: 100,
            sidecars: SidecarFilter::DEFAULT_SIDECARS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LogsConfig::default();
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.window(), chrono::Duration::seconds(5));
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert!(config.sidecar_filter().is_sidecar("istio-proxy"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: LogsConfig = toml::from_str(
            r#"
            poll_interval_ms = 50
            sidecars = ["linkerd-proxy"]
            "#,
        )
        .unwrap();

        assert_eq!(config.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.window_secs, 5);
        assert!(config.sidecar_filter().is_sidecar("linkerd-proxy"));
        assert!(!config.sidecar_filter().is_sidecar("istio-proxy"));
    }

    #[test]
    fn test_zero_window_is_clamped() {
        let config = LogsConfig {
            window_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.window(), chrono::Duration::seconds(1));
    }
}
