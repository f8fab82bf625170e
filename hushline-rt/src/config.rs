//! Configuration management for the hushline pipeline
//!
//! The TOML file has two tables, both optional:
//!
//! ```toml
//! [pipeline]
//! topology = "worker"
//! ring_capacity_frames = 8
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Every field has a built-in default; a missing file yields the defaults.

use crate::error::{Error, Result};
use hushline_common::config::{load_toml_or_default, resolve_config_path, CONFIG_ENV_VAR};
use hushline_common::Topology;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Hard ceiling for the worker's bounded waits
pub const MAX_WAIT_TIMEOUT_MS: u64 = 15;

/// Top-level configuration file
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TomlConfig {
    /// Resolve (CLI > env > platform dir > defaults), load and validate
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let path = resolve_config_path(cli_path, CONFIG_ENV_VAR);
        let config: TomlConfig = load_toml_or_default(path.as_deref())?;
        config.pipeline.validate()?;

        if let Some(path) = path {
            info!("Configuration resolved from {}", path.display());
        }
        Ok(config)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Pipeline tuning
///
/// Frame length is not configured here: it is dictated by the engine at load time.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Where the engine runs
    pub topology: Topology,

    /// Slots per ring buffer (one slot is always kept free, so usable = capacity - 1)
    pub ring_capacity_frames: usize,

    /// Largest host block expected; pre-sizes the frame assembler
    pub max_block_size: usize,

    /// Playback FIFO headroom, in engine frames, on top of one `max_block_size`
    pub drain_capacity_frames: usize,

    /// Cross-fade length in samples at each frame boundary
    pub fade_length: usize,

    /// Adaptive gain ceiling
    pub user_gain: f32,

    /// Peak the adaptive gain aims for (below full scale)
    pub target_peak: f32,

    /// Boundary jump that counts as a declick event
    pub click_threshold: f32,

    /// Bounded wait used by the worker (input empty / output full)
    pub wait_timeout_ms: u64,

    /// Housekeeping period of the controller (stats events, reclamation)
    pub stats_interval_ms: u64,

    /// Go straight from Ready to Processing after a successful load
    pub auto_enable: bool,

    /// Post-filter beta sent to a freshly loaded engine
    pub default_post_filter_beta: f32,

    /// Inbound control queue depth
    pub control_queue_size: usize,

    /// Outbound event buffer per subscriber
    pub event_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            topology: Topology::Worker,
            ring_capacity_frames: 8,
            max_block_size: 4096,
            drain_capacity_frames: 4,
            fade_length: 32,
            user_gain: 3.0,
            target_peak: 0.7,
            click_threshold: 0.1,
            wait_timeout_ms: 10,
            stats_interval_ms: 500,
            auto_enable: true,
            default_post_filter_beta: 0.0,
            control_queue_size: 32,
            event_capacity: 100,
        }
    }
}

impl PipelineConfig {
    /// Reject values the real-time path cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.ring_capacity_frames < 2 {
            return Err(Error::Config(format!(
                "ring_capacity_frames must be >= 2 (got {})",
                self.ring_capacity_frames
            )));
        }
        if self.max_block_size == 0 {
            return Err(Error::Config("max_block_size must be > 0".to_string()));
        }
        if self.drain_capacity_frames < 2 {
            return Err(Error::Config(format!(
                "drain_capacity_frames must be >= 2 (got {})",
                self.drain_capacity_frames
            )));
        }
        if !(self.user_gain.is_finite() && self.user_gain > 0.0) {
            return Err(Error::Config(format!("user_gain must be > 0 (got {})", self.user_gain)));
        }
        if !(self.target_peak.is_finite() && self.target_peak > 0.0 && self.target_peak <= 1.0) {
            return Err(Error::Config(format!(
                "target_peak must be in (0, 1] (got {})",
                self.target_peak
            )));
        }
        if !(self.click_threshold.is_finite() && self.click_threshold >= 0.0) {
            return Err(Error::Config(format!(
                "click_threshold must be >= 0 (got {})",
                self.click_threshold
            )));
        }
        if self.wait_timeout_ms == 0 || self.wait_timeout_ms > MAX_WAIT_TIMEOUT_MS {
            return Err(Error::Config(format!(
                "wait_timeout_ms must be in 1..={} (got {})",
                MAX_WAIT_TIMEOUT_MS, self.wait_timeout_ms
            )));
        }
        if self.stats_interval_ms == 0 {
            return Err(Error::Config("stats_interval_ms must be > 0".to_string()));
        }
        if self.control_queue_size == 0 || self.event_capacity == 0 {
            return Err(Error::Config(
                "control_queue_size and event_capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    /// Playback FIFO cap in samples for a given engine frame length
    ///
    /// A tick can leave up to `block + frame_length - 1` samples queued before
    /// the drain runs, so the cap always covers one full host block.
    pub fn drain_capacity_samples(&self, frame_length: usize) -> usize {
        frame_length * self.drain_capacity_frames + self.max_block_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ring_capacity_frames, 8);
        assert_eq!(config.fade_length, 32);
        assert_eq!(config.wait_timeout(), Duration::from_millis(10));
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            [pipeline]
            topology = "in_thread"
            user_gain = 2.0

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.pipeline.topology, Topology::InThread);
        assert_eq!(config.pipeline.user_gain, 2.0);
        assert_eq!(config.pipeline.target_peak, 0.7);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_drain_capacity_covers_largest_block() {
        let config = PipelineConfig {
            max_block_size: 2048,
            ..Default::default()
        };
        // 4 frames of 480 = 1920 would be smaller than a single block
        assert_eq!(config.drain_capacity_samples(480), 1920 + 2048);
        assert!(config.drain_capacity_samples(480) >= config.max_block_size + 480);
    }

    #[test]
    fn test_ring_capacity_below_two_rejected() {
        let config = PipelineConfig {
            ring_capacity_frames: 1,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_wait_timeout_bounded() {
        let config = PipelineConfig {
            wait_timeout_ms: 50,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            wait_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_target_peak_must_be_below_full_scale() {
        let config = PipelineConfig {
            target_peak: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
