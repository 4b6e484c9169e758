//! Bounded Encode Worker Pool
//!
//! Fixed-size pool consuming frames from a bounded queue: JPEG encode at a
//! fixed quality, write to the screenshots directory, report the written
//! frame to the trace store. Decouples capture cadence from I/O latency.
//!
//! Backpressure: when the queue is full the newest frame is dropped and
//! counted; capture cadence takes priority over completeness. Dequeue
//! blocks a worker until a frame arrives or shutdown is observed; on
//! shutdown each worker finishes its current item and exits, then the
//! remaining queue is discarded and counted.

use super::frames::{Frame, FrameSink};
use crate::trace::{TraceRecord, TraceSink};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Number of encode workers
pub const WORKER_COUNT: usize = 4;
/// JPEG encode quality
pub const JPEG_QUALITY: u8 = 70;
/// Default frame queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Pool configuration
#[derive(Debug, Clone)]
pub struct EncodePoolConfig {
    /// Directory written frames land in
    pub output_dir: PathBuf,
    /// Bounded queue capacity
    pub queue_capacity: usize,
    /// Worker count (fixed at [`WORKER_COUNT`] outside tests)
    pub workers: usize,
}

impl EncodePoolConfig {
    /// Standard configuration for a screenshots directory
    pub fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            workers: WORKER_COUNT,
        }
    }
}

/// Pool statistics
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Frames accepted into the queue
    pub submitted: AtomicU64,
    /// Frames dropped because the queue was full
    pub dropped: AtomicU64,
    /// Frames encoded and written
    pub encoded: AtomicU64,
    /// Frames that failed to encode or write
    pub failed: AtomicU64,
    /// Frames discarded from the queue at shutdown
    pub discarded: AtomicU64,
}

impl PoolStats {
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn encoded(&self) -> u64 {
        self.encoded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

struct PoolShared {
    queue: Mutex<VecDeque<Frame>>,
    ready: Condvar,
    capacity: usize,
    shutdown: AtomicBool,
    stats: PoolStats,
    output_dir: PathBuf,
    trace: TraceSink,
}

/// Clonable submission handle (the scheduler's [`FrameSink`])
#[derive(Clone)]
pub struct PoolSink {
    shared: Arc<PoolShared>,
}

impl PoolSink {
    /// Pool statistics (remain readable after shutdown)
    pub fn stats(&self) -> &PoolStats {
        &self.shared.stats
    }
}

impl FrameSink for PoolSink {
    fn try_submit(&self, frame: Frame) -> bool {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            self.shared.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let mut queue = self.shared.queue.lock();
        if queue.len() >= self.shared.capacity {
            drop(queue);
            self.shared.stats.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("frame queue full, dropping newest frame");
            return false;
        }
        queue.push_back(frame);
        drop(queue);

        self.shared.stats.submitted.fetch_add(1, Ordering::Relaxed);
        self.shared.ready.notify_one();
        true
    }
}

/// Fixed-size encode + write worker pool
pub struct EncodePool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl EncodePool {
    /// Create the output directory and start the workers.
    pub fn start(config: EncodePoolConfig, trace: TraceSink) -> crate::Result<Self> {
        std::fs::create_dir_all(&config.output_dir)?;

        let shared = Arc::new(PoolShared {
            queue: Mutex::new(VecDeque::with_capacity(config.queue_capacity)),
            ready: Condvar::new(),
            capacity: config.queue_capacity.max(1),
            shutdown: AtomicBool::new(false),
            stats: PoolStats::default(),
            output_dir: config.output_dir,
            trace,
        });

        let mut workers = Vec::with_capacity(config.workers);
        for id in 0..config.workers {
            let worker_shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("encode-worker-{id}"))
                .spawn(move || worker_loop(worker_shared, id))
                .map_err(|e| crate::Error::Capture(format!("failed to spawn worker: {e}")))?;
            workers.push(handle);
        }

        Ok(Self { shared, workers })
    }

    /// Submission handle for the frame scheduler
    pub fn sink(&self) -> PoolSink {
        PoolSink {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Pool statistics
    pub fn stats(&self) -> &PoolStats {
        &self.shared.stats
    }

    /// Number of frames currently queued
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Cooperative shutdown: each worker finishes its current item and
    /// exits; whatever is still queued afterwards is discarded and counted.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return; // already shut down
        }
        self.shared.ready.notify_all();

        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }

        let mut queue = self.shared.queue.lock();
        let leftover = queue.len() as u64;
        queue.clear(); // releases the frames' budget slots
        drop(queue);

        if leftover > 0 {
            self.shared
                .stats
                .discarded
                .fetch_add(leftover, Ordering::Relaxed);
            warn!(discarded = leftover, "frames discarded at pool shutdown");
        }
        debug!("encode pool stopped");
    }
}

impl Drop for EncodePool {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

fn worker_loop(shared: Arc<PoolShared>, id: usize) {
    loop {
        let frame = {
            let mut queue = shared.queue.lock();
            loop {
                if shared.shutdown.load(Ordering::SeqCst) {
                    break None;
                }
                if let Some(frame) = queue.pop_front() {
                    break Some(frame);
                }
                shared
                    .ready
                    .wait_for(&mut queue, std::time::Duration::from_millis(100));
            }
        };

        let Some(frame) = frame else { break };

        if let Err(e) = process_frame(&shared, frame) {
            shared.stats.failed.fetch_add(1, Ordering::Relaxed);
            warn!(worker = id, error = %e, "frame encode/write failed");
        }
    }
    debug!(worker = id, "encode worker stopped");
}

/// Encode one frame to JPEG and write it, then report the written frame to
/// the trace store. The frame is released (budget slot freed) when it goes
/// out of scope here.
fn process_frame(shared: &PoolShared, frame: Frame) -> crate::Result<()> {
    let file_name = format!(
        "{:.5}_{}_{}.jpg",
        frame.captured_at.as_secs_f64(),
        frame.display,
        frame.sequence
    );
    let path = shared.output_dir.join(file_name);

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
        .write_image(
            &frame.pixels,
            frame.width,
            frame.height,
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| crate::Error::Capture(format!("jpeg encode failed: {e}")))?;

    std::fs::write(&path, &jpeg)?;

    shared.trace.append(TraceRecord::frame_written(
        frame.captured_at,
        frame.display,
        frame.sequence,
        path.to_string_lossy().into_owned(),
        frame.width,
        frame.height,
    ));
    shared.stats.encoded.fetch_add(1, Ordering::Relaxed);
    Ok(())
}
