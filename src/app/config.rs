//! Configuration Management

use crate::capture::backend::{BackendChain, Capability};
use crate::capture::scroll::ScrollFilterConfig;
use crate::capture::session::SessionOptions;
use crate::induce::{MergeConfig, SegmenterConfig, SemanticMergeConfig};
use crate::time::Duration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Capture settings
    pub capture: CaptureConfig,
    /// Induction pipeline settings
    #[serde(default)]
    pub induction: InductionConfig,
}

/// Capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Directory for the trace log, manifest, and pipeline artifacts
    pub data_directory: PathBuf,
    /// Directory for written frames (default: `<data_directory>/screenshots`)
    #[serde(default)]
    pub screenshots_directory: Option<PathBuf>,
    /// Minimum time between aggregated scroll emissions (seconds)
    pub scroll_debounce: f64,
    /// Minimum accumulated scroll distance to emit (pixels)
    pub scroll_min_distance: f64,
    /// Maximum aggregated scroll emissions per second
    pub scroll_max_frequency: u32,
    /// Scroll session timeout (seconds)
    pub scroll_session_timeout: f64,
    /// Disable keyboard capture
    #[serde(default)]
    pub disable_keyboard: bool,
    /// Disable mouse capture
    #[serde(default)]
    pub disable_mouse: bool,
    /// Disable scroll capture
    #[serde(default)]
    pub disable_scroll: bool,
    /// Disable screen frame capture
    #[serde(default)]
    pub disable_screenshots: bool,
    /// Per-backend event channel capacity (power of 2)
    pub channel_capacity: usize,
    /// Bounded frame queue capacity
    pub frame_queue_capacity: usize,
    /// Hard cap on live frame buffers
    pub max_live_frames: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            data_directory: default_data_directory(),
            screenshots_directory: None,
            scroll_debounce: 0.5,
            scroll_min_distance: 5.0,
            scroll_max_frequency: 10,
            scroll_session_timeout: 2.0,
            disable_keyboard: false,
            disable_mouse: false,
            disable_scroll: false,
            disable_screenshots: false,
            channel_capacity: 4096,
            frame_queue_capacity: 16,
            max_live_frames: 32,
        }
    }
}

/// Induction pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InductionConfig {
    /// Adjacency threshold for the trajectory merger (milliseconds)
    pub adjacency_threshold_ms: u64,
    /// Click merge radius (pixels)
    pub click_merge_radius_px: f64,
    /// Segment boundary threshold
    pub boundary_threshold: f64,
    /// Sliding window size for boundary detection
    pub boundary_window: usize,
    /// Semantic merge threshold
    pub merge_threshold: f64,
    /// Iteration cap for the semantic merge loop
    pub max_merge_passes: u32,
}

impl Default for InductionConfig {
    fn default() -> Self {
        Self {
            adjacency_threshold_ms: 500,
            click_merge_radius_px: 8.0,
            boundary_threshold: 0.5,
            boundary_window: 4,
            merge_threshold: 0.55,
            max_merge_passes: 8,
        }
    }
}

fn default_data_directory() -> PathBuf {
    dirs::download_dir()
        .map(|d| d.join("records"))
        .unwrap_or_else(|| PathBuf::from("records"))
}

impl CaptureConfig {
    /// The effective screenshots directory
    pub fn screenshots_dir(&self) -> PathBuf {
        self.screenshots_directory
            .clone()
            .unwrap_or_else(|| self.data_directory.join("screenshots"))
    }

    /// Scroll filter thresholds from the configured values
    pub fn scroll_filter_config(&self) -> ScrollFilterConfig {
        ScrollFilterConfig {
            debounce: Duration::from_secs_f64(self.scroll_debounce),
            min_distance: self.scroll_min_distance,
            max_frequency: self.scroll_max_frequency,
            session_timeout: Duration::from_secs_f64(self.scroll_session_timeout),
        }
    }

    /// Build session options: platform chains for enabled capabilities,
    /// null/empty chains for disabled ones.
    pub fn session_options(&self) -> SessionOptions {
        let mut options = SessionOptions::new(self.data_directory.clone());
        options.screenshots_dir = self.screenshots_dir();
        options.scroll = self.scroll_filter_config();
        options.channel_capacity = self.channel_capacity;
        options.frame_queue_capacity = self.frame_queue_capacity;
        options.max_live_frames = self.max_live_frames;

        options.chains = Capability::EVENT_CAPABILITIES
            .iter()
            .map(|capability| {
                let disabled = match capability {
                    Capability::Keyboard => self.disable_keyboard,
                    Capability::Mouse => self.disable_mouse,
                    Capability::Scroll => self.disable_scroll,
                    Capability::Screenshot => self.disable_screenshots,
                };
                if disabled {
                    BackendChain::disabled(*capability)
                } else {
                    BackendChain::platform_default(*capability)
                }
            })
            .collect();

        if self.disable_screenshots {
            options.grabber_chain = Vec::new();
        }
        options
    }
}

impl InductionConfig {
    /// Trajectory merger thresholds
    pub fn merge_config(&self) -> MergeConfig {
        MergeConfig {
            adjacency_threshold: Duration::from_millis(self.adjacency_threshold_ms),
            click_radius_px: self.click_merge_radius_px,
        }
    }

    /// Segmenter thresholds
    pub fn segmenter_config(&self) -> SegmenterConfig {
        SegmenterConfig {
            boundary_threshold: self.boundary_threshold,
            window: self.boundary_window,
            ..Default::default()
        }
    }

    /// Semantic merger thresholds
    pub fn semantic_config(&self) -> SemanticMergeConfig {
        SemanticMergeConfig {
            merge_threshold: self.merge_threshold,
            max_passes: self.max_merge_passes,
            ..Default::default()
        }
    }
}

impl Config {
    /// Validate config values are within acceptable ranges.
    /// Returns Ok(()) if valid, or Err describing the first invalid field.
    pub fn validate(&self) -> crate::Result<()> {
        let c = &self.capture;
        if c.scroll_debounce < 0.0 {
            return Err(crate::Error::Config(format!(
                "scroll_debounce must be >= 0, got {}",
                c.scroll_debounce
            )));
        }
        if c.scroll_min_distance < 0.0 {
            return Err(crate::Error::Config(format!(
                "scroll_min_distance must be >= 0, got {}",
                c.scroll_min_distance
            )));
        }
        if c.scroll_max_frequency == 0 {
            return Err(crate::Error::Config(
                "scroll_max_frequency must be > 0".to_string(),
            ));
        }
        if c.scroll_session_timeout <= 0.0 {
            return Err(crate::Error::Config(format!(
                "scroll_session_timeout must be > 0, got {}",
                c.scroll_session_timeout
            )));
        }
        if c.channel_capacity == 0 || !c.channel_capacity.is_power_of_two() {
            return Err(crate::Error::Config(format!(
                "channel_capacity must be a power of 2, got {}",
                c.channel_capacity
            )));
        }
        if c.frame_queue_capacity == 0 {
            return Err(crate::Error::Config(
                "frame_queue_capacity must be > 0".to_string(),
            ));
        }
        if c.max_live_frames < c.frame_queue_capacity {
            return Err(crate::Error::Config(format!(
                "max_live_frames ({}) must be >= frame_queue_capacity ({})",
                c.max_live_frames, c.frame_queue_capacity
            )));
        }

        let i = &self.induction;
        if i.adjacency_threshold_ms == 0 {
            return Err(crate::Error::Config(
                "adjacency_threshold_ms must be > 0".to_string(),
            ));
        }
        if i.click_merge_radius_px < 0.0 {
            return Err(crate::Error::Config(format!(
                "click_merge_radius_px must be >= 0, got {}",
                i.click_merge_radius_px
            )));
        }
        if !(0.0..=1.0).contains(&i.boundary_threshold) {
            return Err(crate::Error::Config(format!(
                "boundary_threshold must be in [0, 1], got {}",
                i.boundary_threshold
            )));
        }
        if i.boundary_window == 0 {
            return Err(crate::Error::Config(
                "boundary_window must be > 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&i.merge_threshold) {
            return Err(crate::Error::Config(format!(
                "merge_threshold must be in [0, 1], got {}",
                i.merge_threshold
            )));
        }
        if i.max_merge_passes == 0 {
            return Err(crate::Error::Config(
                "max_merge_passes must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Load config from file
    pub fn load(path: &PathBuf) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from the default location, falling back to defaults
    /// when no file exists
    pub fn load_default() -> crate::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file
    pub fn save(&self, path: &PathBuf) -> crate::Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Default config path
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".traceloom").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    /// TOML representation
    pub fn to_toml(&self) -> crate::Result<String> {
        toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))
    }
}
