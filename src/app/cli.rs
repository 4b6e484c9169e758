//! Command-Line Interface

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Traceloom - Record device interaction and distill it into workflows
#[derive(Parser, Debug)]
#[command(name = "traceloom")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record device interaction into a trace
    Record {
        /// Recording duration in seconds (0 = until Ctrl+C)
        #[arg(short, long, default_value = "0")]
        duration: u64,

        /// Directory for database and artifacts
        #[arg(long)]
        data_directory: Option<PathBuf>,

        /// Directory to save screenshots
        #[arg(long)]
        screenshots_dir: Option<PathBuf>,

        /// Minimum time between scroll emissions (seconds)
        #[arg(long)]
        scroll_debounce: Option<f64>,

        /// Minimum scroll distance to log (pixels)
        #[arg(long)]
        scroll_min_distance: Option<f64>,

        /// Maximum scroll emissions per second
        #[arg(long)]
        scroll_max_frequency: Option<u32>,

        /// Scroll session timeout (seconds)
        #[arg(long)]
        scroll_session_timeout: Option<f64>,

        /// Disable keyboard capture
        #[arg(long)]
        disable_keyboard: bool,

        /// Disable mouse capture
        #[arg(long)]
        disable_mouse: bool,

        /// Disable scroll capture
        #[arg(long)]
        disable_scroll: bool,

        /// Disable screen frame capture
        #[arg(long)]
        disable_screenshots: bool,
    },

    /// Induction stage 1: merge duplicate actions from the trace
    Merge {
        /// Directory holding the trace
        #[arg(long)]
        data_directory: Option<PathBuf>,
    },

    /// Induction stage 2: detect segments in the merged actions
    Segment {
        /// Directory holding the merge artifact
        #[arg(long)]
        data_directory: Option<PathBuf>,
    },

    /// Induction stage 3: merge segments by semantic intent and write the
    /// workflow artifacts
    Induce {
        /// Directory holding the segment artifact
        #[arg(long)]
        data_directory: Option<PathBuf>,

        /// Apply merges automatically instead of only proposing them
        #[arg(long)]
        auto: bool,
    },

    /// View or initialize configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Write the default configuration file
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
