//! Synthetic Capture Sources
//!
//! Scripted stand-ins for the platform backends: a replay backend that
//! delivers a pre-built event sequence on its own thread, and a grabber
//! that produces solid-color frames. The benchmarks and integration tests
//! drive the real pipeline through these, which is why they are not
//! test-gated.

use super::backend::EventBackend;
use super::channel::EventSink;
use super::frames::{DisplayInfo, FrameGrabber, GrabbedImage};
use super::types::RawEvent;
use crate::time::{Timebase, Timestamp};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Backend that replays a scripted event sequence.
///
/// Events are re-stamped with the delivery time, so timestamps within the
/// stream are monotonic regardless of what the script carries.
pub struct SyntheticBackend {
    script: Vec<RawEvent>,
    interval: std::time::Duration,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SyntheticBackend {
    /// Create a backend that delivers `script` with `interval` between
    /// events.
    pub fn new(script: Vec<RawEvent>, interval: std::time::Duration) -> Self {
        Self {
            script,
            interval,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }
}

impl EventBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn start(&mut self, mut sink: EventSink) -> crate::Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(crate::Error::Backend("synthetic backend already running".into()));
        }
        Timebase::init();

        let script = self.script.clone();
        let interval = self.interval;
        let running = Arc::clone(&self.running);

        let handle = thread::Builder::new()
            .name("synthetic-backend".into())
            .spawn(move || {
                for event in script {
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    let mut event = event;
                    event.timestamp = Timestamp::now();
                    sink.push(event);
                    if !interval.is_zero() {
                        thread::sleep(interval);
                    }
                }
            })
            .map_err(|e| crate::Error::Backend(format!("failed to spawn replay thread: {e}")))?;

        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for SyntheticBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Grabber producing solid-color frames, optionally failing every Nth grab
/// to exercise the scheduler's skip path.
pub struct SyntheticGrabber {
    displays: Vec<DisplayInfo>,
    width: u32,
    height: u32,
    counter: u64,
    fail_every: Option<u64>,
}

impl SyntheticGrabber {
    /// Create a grabber for the given displays producing frames of the
    /// given pixel dimensions.
    pub fn new(displays: Vec<DisplayInfo>, width: u32, height: u32) -> Self {
        Self {
            displays,
            width,
            height,
            counter: 0,
            fail_every: None,
        }
    }

    /// Make every `n`th grab fail
    pub fn failing_every(mut self, n: u64) -> Self {
        self.fail_every = Some(n.max(1));
        self
    }
}

impl FrameGrabber for SyntheticGrabber {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn displays(&mut self) -> crate::Result<Vec<DisplayInfo>> {
        Ok(self.displays.clone())
    }

    fn grab(&mut self, _display: &DisplayInfo) -> crate::Result<GrabbedImage> {
        self.counter += 1;
        if let Some(n) = self.fail_every {
            if self.counter % n == 0 {
                return Err(crate::Error::Capture("synthetic grab failure".into()));
            }
        }

        let shade = (self.counter % 251) as u8;
        Ok(GrabbedImage {
            pixels: vec![shade; (self.width * self.height * 3) as usize],
            width: self.width,
            height: self.height,
        })
    }
}
