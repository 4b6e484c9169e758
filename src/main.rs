//! Traceloom - Interaction Trace Recorder and Workflow Inducer
//!
//! `record` captures device interaction into an append-only trace;
//! `merge`, `segment`, and `induce` distill the trace into workflow
//! artifacts.

use std::path::PathBuf;

use traceloom::app::cli::{Cli, Commands, ConfigAction};
use traceloom::app::config::Config;
use traceloom::capture::session::CaptureSession;
use traceloom::induce;
use traceloom::time::Timebase;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Parse CLI arguments first so --verbose can set the log level
    let cli = Cli::parse_args();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    Timebase::init();

    let config = if let Some(path) = &cli.config {
        Config::load(path)?
    } else {
        Config::load_default()?
    };

    match cli.command {
        Commands::Record {
            duration,
            data_directory,
            screenshots_dir,
            scroll_debounce,
            scroll_min_distance,
            scroll_max_frequency,
            scroll_session_timeout,
            disable_keyboard,
            disable_mouse,
            disable_scroll,
            disable_screenshots,
        } => {
            let mut capture = config.capture.clone();
            if let Some(dir) = data_directory {
                capture.data_directory = dir;
            }
            if let Some(dir) = screenshots_dir {
                capture.screenshots_directory = Some(dir);
            }
            if let Some(v) = scroll_debounce {
                capture.scroll_debounce = v;
            }
            if let Some(v) = scroll_min_distance {
                capture.scroll_min_distance = v;
            }
            if let Some(v) = scroll_max_frequency {
                capture.scroll_max_frequency = v;
            }
            if let Some(v) = scroll_session_timeout {
                capture.scroll_session_timeout = v;
            }
            capture.disable_keyboard |= disable_keyboard;
            capture.disable_mouse |= disable_mouse;
            capture.disable_scroll |= disable_scroll;
            capture.disable_screenshots |= disable_screenshots;

            let patched = Config {
                capture,
                induction: config.induction.clone(),
            };
            patched.validate()?;
            run_record(duration, &patched)?;
        }
        Commands::Merge { data_directory } => {
            let data_dir = data_directory.unwrap_or_else(|| config.capture.data_directory.clone());
            let artifact = induce::merge::run(&data_dir, config.induction.merge_config())?;
            println!(
                "Merged {} trace records into {} actions",
                artifact.source_records,
                artifact.actions.len()
            );
            println!("Wrote {}", data_dir.join(induce::action::MERGED_FILE_NAME).display());
        }
        Commands::Segment { data_directory } => {
            let data_dir = data_directory.unwrap_or_else(|| config.capture.data_directory.clone());
            let artifact = induce::segment::run(&data_dir, config.induction.segmenter_config())?;
            println!("Detected {} segments", artifact.segments.len());
            println!(
                "Wrote {}",
                data_dir.join(induce::action::SEGMENTS_FILE_NAME).display()
            );
        }
        Commands::Induce {
            data_directory,
            auto,
        } => {
            let data_dir = data_directory.unwrap_or_else(|| config.capture.data_directory.clone());
            let workflow =
                induce::semantic::run(&data_dir, config.induction.semantic_config(), auto)?;
            println!("Workflow with {} segments", workflow.segments.len());
            for (index, segment) in workflow.segments.iter().enumerate() {
                println!("  {}. {} ({} actions)", index + 1, segment.label, segment.actions.len());
            }
            println!(
                "Wrote {} and {}",
                data_dir.join(induce::action::WORKFLOW_JSON_FILE_NAME).display(),
                data_dir.join(induce::action::WORKFLOW_TEXT_FILE_NAME).display()
            );
        }
        Commands::Config { action } => {
            run_config(action, &config)?;
        }
    }

    Ok(())
}

fn run_record(duration: u64, config: &Config) -> anyhow::Result<()> {
    if duration > 0 {
        info!("Recording for {} seconds", duration);
    } else {
        info!("Recording until Ctrl+C");
    }

    let session = CaptureSession::start(config.capture.session_options())?;
    for capability in &session.manifest().disabled {
        warn!(capability = capability.name(), "capability disabled for this session");
    }

    let stop_flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let stop_flag_handler = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_handler.store(true, std::sync::atomic::Ordering::SeqCst);
    })?;

    let start_time = std::time::Instant::now();
    loop {
        if stop_flag.load(std::sync::atomic::Ordering::SeqCst) {
            break;
        }
        if duration > 0 && start_time.elapsed().as_secs() >= duration {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    let summary = session.stop();
    let elapsed = start_time.elapsed();

    info!("Recording stopped after {:.1}s", elapsed.as_secs_f64());
    println!("\nRecording Summary");
    println!("  Duration: {:.1}s", elapsed.as_secs_f64());
    println!("  Trace records written: {}", summary.records_written);
    println!("  Frames captured: {}", summary.frames_captured);
    println!("  Frames encoded: {}", summary.frames_encoded);
    println!(
        "  Scroll events: {} raw -> {} emitted",
        summary.scroll.received, summary.scroll.emitted
    );
    if summary.records_dropped > 0 || summary.events_dropped > 0 || summary.frames_dropped > 0 {
        println!(
            "  Dropped: {} records, {} events, {} frames",
            summary.records_dropped, summary.events_dropped, summary.frames_dropped
        );
    }
    if !summary.disabled.is_empty() {
        let names: Vec<&str> = summary.disabled.iter().map(|c| c.name()).collect();
        println!("  Disabled capabilities: {}", names.join(", "));
    }
    println!(
        "  Data directory: {}",
        config.capture.data_directory.display()
    );

    Ok(())
}

fn run_config(action: ConfigAction, config: &Config) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            println!("Configuration ({}):\n", Config::default_path().display());
            println!("{}", config.to_toml()?);
        }
        ConfigAction::Init { force } => {
            let path: PathBuf = Config::default_path();
            if path.exists() && !force {
                anyhow::bail!(
                    "Config already exists at {}. Use --force to overwrite.",
                    path.display()
                );
            }
            config.save(&path)?;
            println!("Created config at {}", path.display());
            println!("\n{}", config.to_toml()?);
        }
    }
    Ok(())
}
