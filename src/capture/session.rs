//! Capture Session Orchestration
//!
//! Wires the whole capture pipeline together: resolves backend chains,
//! spawns the trace collector (scroll filter inline), starts the frame
//! scheduler and encode pool, and winds everything down cooperatively on
//! stop. Disabled capabilities are reported, never fatal.

use super::backend::{resolve_backends, BackendChain, Capability, EventBackend, ResolvedBackends};
use super::channel::ChannelStats;
use super::frames::{
    platform_grabber_chain, resolve_grabber, FrameBudget, FrameScheduler, FrameSink,
    GrabberFactory, SchedulerConfig, SchedulerStats,
};
use super::pool::{EncodePool, EncodePoolConfig};
use super::scroll::{ScrollFilter, ScrollFilterConfig, ScrollFilterStats};
use super::types::{EventKind, RawEvent};
use crate::time::{Timebase, Timestamp};
use crate::trace::{TraceRecord, TraceSink, TraceStore, TraceStoreConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};
use uuid::Uuid;

/// Current session manifest format version
pub const MANIFEST_FORMAT_VERSION: &str = "1.0";
/// Manifest file name inside the data directory
pub const MANIFEST_FILE_NAME: &str = "session.json";

/// Everything needed to start a capture session
pub struct SessionOptions {
    /// Per-session data directory (trace log, manifest, artifacts)
    pub data_dir: PathBuf,
    /// Directory written frames land in
    pub screenshots_dir: PathBuf,
    /// Scroll filter thresholds
    pub scroll: ScrollFilterConfig,
    /// Capacity of each backend event channel (power of 2)
    pub channel_capacity: usize,
    /// Capacity of the bounded frame queue
    pub frame_queue_capacity: usize,
    /// Hard cap on live frame buffers
    pub max_live_frames: usize,
    /// Frame scheduler tuning
    pub scheduler: SchedulerConfig,
    /// Trace store tuning
    pub store: TraceStoreConfig,
    /// Ordered backend fallback chains, one per capability
    pub chains: Vec<BackendChain>,
    /// Ordered frame grabber fallback chain
    pub grabber_chain: Vec<GrabberFactory>,
}

impl SessionOptions {
    /// Platform defaults rooted at `data_dir`.
    pub fn new(data_dir: PathBuf) -> Self {
        let screenshots_dir = data_dir.join("screenshots");
        Self {
            data_dir,
            screenshots_dir,
            scroll: ScrollFilterConfig::default(),
            channel_capacity: super::channel::DEFAULT_CAPACITY,
            frame_queue_capacity: super::pool::DEFAULT_QUEUE_CAPACITY,
            max_live_frames: 32,
            scheduler: SchedulerConfig::default(),
            store: TraceStoreConfig::default(),
            chains: Capability::EVENT_CAPABILITIES
                .iter()
                .map(|c| BackendChain::platform_default(*c))
                .collect(),
            grabber_chain: platform_grabber_chain(),
        }
    }
}

/// Session manifest persisted as `session.json` in the data directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionManifest {
    /// Unique session id
    pub id: Uuid,
    /// Wall-clock start time
    pub started_at: DateTime<Utc>,
    /// Wall-clock end time (absent while recording)
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Capabilities disabled for this session
    #[serde(default)]
    pub disabled: Vec<Capability>,
    /// Trace records written when the session closed
    #[serde(default)]
    pub record_count: u64,
    /// Manifest format version
    pub format_version: String,
}

impl SessionManifest {
    fn new(disabled: Vec<Capability>) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            ended_at: None,
            disabled,
            record_count: 0,
            format_version: MANIFEST_FORMAT_VERSION.to_string(),
        }
    }

    fn save(&self, data_dir: &Path) -> crate::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(data_dir.join(MANIFEST_FILE_NAME), json)?;
        Ok(())
    }

    /// Load the manifest from a data directory
    pub fn load(data_dir: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(data_dir.join(MANIFEST_FILE_NAME))?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Summary of a finished session
#[derive(Debug, Clone)]
pub struct SessionSummary {
    /// Trace records written to disk
    pub records_written: u64,
    /// Trace records dropped (saturation or exhausted retries)
    pub records_dropped: u64,
    /// Raw events dropped at the channel boundary
    pub events_dropped: u64,
    /// Frames grabbed
    pub frames_captured: u64,
    /// Frames encoded and written
    pub frames_encoded: u64,
    /// Frames dropped at the queue boundary
    pub frames_dropped: u64,
    /// Frames discarded at shutdown
    pub frames_discarded: u64,
    /// Scroll filter counters
    pub scroll: ScrollFilterStats,
    /// Capabilities that were disabled
    pub disabled: Vec<Capability>,
}

/// A running capture session.
///
/// All threads stop cooperatively through [`CaptureSession::stop`]; drop
/// without stop also shuts down, discarding nothing the threads have
/// already persisted.
pub struct CaptureSession {
    data_dir: PathBuf,
    backends: Vec<Box<dyn EventBackend>>,
    channel_stats: Vec<Arc<ChannelStats>>,
    collector_running: Arc<AtomicBool>,
    collector: Option<JoinHandle<ScrollFilterStats>>,
    scheduler: Option<FrameScheduler>,
    scheduler_stats: Option<Arc<SchedulerStats>>,
    pool: Option<EncodePool>,
    store: Option<TraceStore>,
    manifest: SessionManifest,
}

impl CaptureSession {
    /// Start a capture session.
    ///
    /// Backend and grabber chains resolve here; capabilities whose chains
    /// exhaust are disabled and reported through the manifest and summary.
    pub fn start(options: SessionOptions) -> crate::Result<Self> {
        Timebase::init();
        std::fs::create_dir_all(&options.data_dir)?;

        let store = TraceStore::open(&options.data_dir, options.store.clone())?;
        let sink = store.sink();

        // Input backends
        let ResolvedBackends { active, disabled } =
            resolve_backends(options.chains, options.channel_capacity);

        let mut backends = Vec::with_capacity(active.len());
        let mut channel_stats = Vec::with_capacity(active.len());
        let mut streams = Vec::with_capacity(active.len());
        for resolved in active {
            backends.push(resolved.backend);
            channel_stats.push(resolved.stats);
            streams.push(resolved.stream);
        }

        // Trace collector with the scroll filter inline
        let collector_running = Arc::new(AtomicBool::new(true));
        let filter = ScrollFilter::new(options.scroll.clone());
        let collector_sink = sink.clone();
        let collector_flag = Arc::clone(&collector_running);
        let collector = thread::Builder::new()
            .name("trace-collector".into())
            .spawn(move || collector_loop(streams, filter, collector_sink, collector_flag))
            .map_err(|e| crate::Error::Capture(format!("failed to spawn collector: {e}")))?;

        // Screen frames: grabber chain → scheduler → pool
        let mut disabled = disabled;
        let (scheduler, scheduler_stats, pool) =
            match resolve_grabber(&options.grabber_chain) {
                Some(grabber) => {
                    let pool = EncodePool::start(
                        EncodePoolConfig {
                            output_dir: options.screenshots_dir.clone(),
                            queue_capacity: options.frame_queue_capacity,
                            workers: super::pool::WORKER_COUNT,
                        },
                        sink.clone(),
                    )?;
                    let budget = Arc::new(FrameBudget::new(options.max_live_frames));
                    let scheduler = FrameScheduler::start(
                        grabber,
                        Arc::new(pool.sink()) as Arc<dyn FrameSink>,
                        budget,
                        options.scheduler.clone(),
                    )?;
                    let stats = scheduler.stats();
                    (Some(scheduler), Some(stats), Some(pool))
                }
                None => {
                    warn!("no frame grabber available, screenshot capability disabled");
                    disabled.push(Capability::Screenshot);
                    (None, None, None)
                }
            };

        let manifest = SessionManifest::new(disabled);
        manifest.save(&options.data_dir)?;
        info!(session = %manifest.id, data_dir = %options.data_dir.display(), "capture session started");

        Ok(Self {
            data_dir: options.data_dir,
            backends,
            channel_stats,
            collector_running,
            collector: Some(collector),
            scheduler,
            scheduler_stats,
            pool,
            store: Some(store),
            manifest,
        })
    }

    /// The session manifest
    pub fn manifest(&self) -> &SessionManifest {
        &self.manifest
    }

    /// Stop every component cooperatively and return the session summary.
    ///
    /// Order matters: producers first (backends, scheduler), then the
    /// collector drains what is left, then the pool finishes in-flight
    /// frames, then the store flushes its final batch.
    pub fn stop(mut self) -> SessionSummary {
        // 1. Stop event producers
        for backend in &mut self.backends {
            backend.stop();
        }

        // 2. Stop the frame scheduler (flushes retained frames to the pool)
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.stop();
        }

        // 3. Collector drains remaining events and flushes the scroll filter
        self.collector_running.store(false, Ordering::SeqCst);
        let scroll = self
            .collector
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        // 4. Pool: workers finish their current item, the rest is discarded
        let (frames_encoded, frames_dropped, frames_discarded) = match self.pool.take() {
            Some(pool) => {
                let sink = pool.sink();
                pool.shutdown();
                let stats = sink.stats();
                (stats.encoded(), stats.dropped(), stats.discarded())
            }
            None => (0, 0, 0),
        };

        // 5. Store: final flush
        let (records_written, records_dropped) = match self.store.take() {
            Some(store) => {
                let sink = store.sink();
                store.close();
                (sink.stats().written(), sink.stats().dropped())
            }
            None => (0, 0),
        };

        let events_dropped: u64 = self.channel_stats.iter().map(|s| s.dropped()).sum();
        let frames_captured = self
            .scheduler_stats
            .as_ref()
            .map(|s| s.captured())
            .unwrap_or(0);

        // Finalize the manifest
        self.manifest.ended_at = Some(Utc::now());
        self.manifest.record_count = records_written;
        if let Err(e) = self.manifest.save(&self.data_dir) {
            warn!(error = %e, "failed to finalize session manifest");
        }

        let summary = SessionSummary {
            records_written,
            records_dropped,
            events_dropped,
            frames_captured,
            frames_encoded,
            frames_dropped,
            frames_discarded,
            scroll,
            disabled: self.manifest.disabled.clone(),
        };
        info!(
            records = summary.records_written,
            frames = summary.frames_encoded,
            "capture session stopped"
        );
        summary
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        // `stop` already took the collector; this path only runs when the
        // session is dropped without a summary.
        for backend in &mut self.backends {
            backend.stop();
        }
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.stop();
        }
        self.collector_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.collector.take() {
            let _ = handle.join();
        }
    }
}

fn collector_loop(
    mut streams: Vec<super::channel::EventStream>,
    mut filter: ScrollFilter,
    sink: TraceSink,
    running: Arc<AtomicBool>,
) -> ScrollFilterStats {
    let mut last_scroll_app: Option<String> = None;

    loop {
        let active = running.load(Ordering::SeqCst);
        let mut drained = 0usize;

        for stream in &mut streams {
            for sequenced in stream.pop_batch(256) {
                drained += 1;
                route_event(&sequenced.event, &mut filter, &sink, &mut last_scroll_app);
            }
        }

        // Observe scroll session timeouts on the collector cadence
        if let Some(emission) = filter.poll(Timestamp::now()) {
            sink.append(TraceRecord::from_scroll(&emission, last_scroll_app.clone()));
        }

        if !active {
            if drained == 0 {
                break;
            }
            // Keep draining the channels dry before exiting
            continue;
        }

        thread::sleep(std::time::Duration::from_millis(10));
    }

    // Shutdown flush: close any open scroll session exactly once
    if let Some(emission) = filter.flush(Timestamp::now()) {
        sink.append(TraceRecord::from_scroll(&emission, last_scroll_app));
    }
    filter.stats()
}

fn route_event(
    event: &RawEvent,
    filter: &mut ScrollFilter,
    sink: &TraceSink,
    last_scroll_app: &mut Option<String>,
) {
    match event.kind() {
        EventKind::Scroll => {
            if event.app.is_some() {
                *last_scroll_app = event.app.clone();
            }
            if let Some(emission) = filter.offer(event) {
                sink.append(TraceRecord::from_scroll(&emission, last_scroll_app.clone()));
            }
        }
        _ => {
            if let Some(record) = TraceRecord::from_raw(event) {
                sink.append(record);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frames::DisplayInfo;
    use crate::capture::synthetic::{SyntheticBackend, SyntheticGrabber};
    use crate::capture::types::MouseButton;
    use crate::trace::{read_trace, TRACE_FILE_NAME};
    use tempfile::TempDir;

    fn synthetic_options(dir: &TempDir) -> SessionOptions {
        let mut options = SessionOptions::new(dir.path().to_path_buf());

        let keyboard: Vec<RawEvent> = (0..20)
            .map(|_| RawEvent::keyboard(Timestamp::from_ticks(0), 0, "a"))
            .collect();
        let clicks: Vec<RawEvent> = (0..5)
            .map(|_| {
                RawEvent::mouse(Timestamp::from_ticks(0), 1, MouseButton::Left, 10.0, 10.0, 1)
            })
            .collect();

        options.chains = vec![
            BackendChain {
                capability: Capability::Keyboard,
                factories: vec![Box::new(move || {
                    Ok(Box::new(SyntheticBackend::new(
                        keyboard.clone(),
                        std::time::Duration::from_millis(1),
                    )) as Box<dyn EventBackend>)
                })],
            },
            BackendChain {
                capability: Capability::Mouse,
                factories: vec![Box::new(move || {
                    Ok(Box::new(SyntheticBackend::new(
                        clicks.clone(),
                        std::time::Duration::from_millis(1),
                    )) as Box<dyn EventBackend>)
                })],
            },
            BackendChain::empty(Capability::Scroll),
        ];
        options.grabber_chain = vec![Box::new(|| {
            Ok(Box::new(SyntheticGrabber::new(
                vec![DisplayInfo {
                    id: 1,
                    width: 64,
                    height: 64,
                    scale: 1.0,
                }],
                8,
                8,
            )) as Box<dyn crate::capture::frames::FrameGrabber>)
        })];
        options.scheduler.base_fps = 200;
        options
    }

    #[test]
    fn test_synthetic_end_to_end_session() {
        let dir = TempDir::new().unwrap();
        let session = CaptureSession::start(synthetic_options(&dir)).unwrap();

        // Scroll chain was empty: reported disabled, session still runs
        assert!(session.manifest().disabled.contains(&Capability::Scroll));

        thread::sleep(std::time::Duration::from_millis(300));
        let summary = session.stop();

        assert!(summary.records_written > 0);
        assert!(summary.frames_captured > 0);
        assert_eq!(summary.records_dropped, 0);

        let records = read_trace(&dir.path().join(TRACE_FILE_NAME)).unwrap();
        let keys = records
            .iter()
            .filter(|r| r.kind() == EventKind::Keyboard)
            .count();
        let clicks = records
            .iter()
            .filter(|r| r.kind() == EventKind::Mouse)
            .count();
        assert_eq!(keys, 20, "every keyboard event must reach the trace");
        assert_eq!(clicks, 5);

        // Manifest finalized
        let manifest = SessionManifest::load(dir.path()).unwrap();
        assert!(manifest.ended_at.is_some());
        assert_eq!(manifest.record_count, summary.records_written);
    }

    #[test]
    fn test_session_with_all_capabilities_disabled() {
        let dir = TempDir::new().unwrap();
        let mut options = SessionOptions::new(dir.path().to_path_buf());
        options.chains = Capability::EVENT_CAPABILITIES
            .iter()
            .map(|c| BackendChain::empty(*c))
            .collect();
        options.grabber_chain = Vec::new();

        let session = CaptureSession::start(options).unwrap();
        assert_eq!(session.manifest().disabled.len(), 4);

        let summary = session.stop();
        assert_eq!(summary.records_written, 0);
        assert_eq!(summary.frames_captured, 0);
    }

    #[test]
    fn test_scroll_events_are_filtered_into_trace() {
        let dir = TempDir::new().unwrap();
        let mut options = SessionOptions::new(dir.path().to_path_buf());

        // 60 rapid 1px scroll ticks: far fewer aggregated records than raw
        let script: Vec<RawEvent> = (0..60)
            .map(|_| RawEvent::scroll(Timestamp::from_ticks(0), 2, 0.0, 1.0, 50.0, 50.0))
            .collect();
        options.chains = vec![BackendChain {
            capability: Capability::Scroll,
            factories: vec![Box::new(move || {
                Ok(Box::new(SyntheticBackend::new(
                    script.clone(),
                    std::time::Duration::from_millis(5),
                )) as Box<dyn EventBackend>)
            })],
        }];
        options.grabber_chain = Vec::new();

        let session = CaptureSession::start(options).unwrap();
        thread::sleep(std::time::Duration::from_millis(500));
        let summary = session.stop();

        let records = read_trace(&dir.path().join(TRACE_FILE_NAME)).unwrap();
        let scrolls: Vec<_> = records
            .iter()
            .filter(|r| r.kind() == EventKind::Scroll)
            .collect();

        assert!(!scrolls.is_empty(), "scroll activity must reach the trace");
        assert!(
            scrolls.len() < 60,
            "raw ticks must be aggregated, got {}",
            scrolls.len()
        );
        // Every raw tick is accounted for in some aggregated record
        let counted: u32 = scrolls
            .iter()
            .map(|r| match &r.payload {
                crate::trace::TracePayload::Scroll { events, .. } => *events,
                _ => 0,
            })
            .sum();
        assert_eq!(counted, 60);
        assert_eq!(summary.scroll.sessions_flushed, summary.scroll.sessions_opened);
    }
}
