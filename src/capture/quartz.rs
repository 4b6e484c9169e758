//! Quartz Capture Backend (macOS)
//!
//! Listen-only CGEventTap per capability on a dedicated CFRunLoop thread,
//! pushing raw events into the capability's channel sink, plus a
//! CoreGraphics display grabber for screen frames.
//!
//! Requires Accessibility permission for the event taps and Screen
//! Recording permission for display capture; a missing permission fails
//! the backend at start time, which the fallback chain reports as a
//! disabled capability.

use super::backend::{Capability, EventBackend};
use super::channel::EventSink;
use super::frames::{DisplayInfo, FrameGrabber, GrabbedImage};
use super::types::{MouseButton, RawEvent};
use crate::time::{Timebase, Timestamp};
use core_foundation::base::CFTypeRef;
use core_foundation::runloop::kCFRunLoopCommonModes;
use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info, trace};

type CGEventRef = CFTypeRef;
type CGEventTapProxy = *const c_void;
type CGEventMask = u64;

// CGEventType values
const CG_EVENT_LEFT_MOUSE_DOWN: u32 = 1;
const CG_EVENT_RIGHT_MOUSE_DOWN: u32 = 3;
const CG_EVENT_KEY_DOWN: u32 = 10;
const CG_EVENT_SCROLL_WHEEL: u32 = 22;
const CG_EVENT_OTHER_MOUSE_DOWN: u32 = 25;

// CGEventField values
const CG_MOUSE_EVENT_CLICK_STATE: u32 = 1;
const CG_KEYBOARD_EVENT_KEYCODE: u32 = 9;
const CG_SCROLL_WHEEL_EVENT_DELTA_AXIS_1: u32 = 11;
const CG_SCROLL_WHEEL_EVENT_DELTA_AXIS_2: u32 = 12;

#[repr(u32)]
#[derive(Copy, Clone)]
enum CGEventTapLocation {
    SessionEventTap = 1,
}

#[repr(u32)]
#[derive(Copy, Clone)]
enum CGEventTapPlacement {
    HeadInsertEventTap = 0,
}

#[repr(u32)]
#[derive(Copy, Clone)]
enum CGEventTapOptions {
    ListenOnly = 1,
}

#[repr(C)]
#[derive(Copy, Clone, Debug)]
struct CGPoint {
    x: f64,
    y: f64,
}

#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    fn CGEventTapCreate(
        tap: CGEventTapLocation,
        place: CGEventTapPlacement,
        options: CGEventTapOptions,
        events_of_interest: CGEventMask,
        callback: extern "C" fn(CGEventTapProxy, u32, CGEventRef, *mut c_void) -> CGEventRef,
        user_info: *mut c_void,
    ) -> CFTypeRef;

    fn CGEventTapEnable(tap: CFTypeRef, enable: bool);
    fn CGEventGetLocation(event: CGEventRef) -> CGPoint;
    fn CGEventGetIntegerValueField(event: CGEventRef, field: u32) -> i64;
}

#[link(name = "CoreFoundation", kind = "framework")]
extern "C" {
    fn CFMachPortCreateRunLoopSource(
        allocator: CFTypeRef,
        port: CFTypeRef,
        order: i64,
    ) -> CFTypeRef;

    fn CFRunLoopGetCurrent() -> CFTypeRef;
    fn CFRunLoopAddSource(rl: CFTypeRef, source: CFTypeRef, mode: CFTypeRef);
    fn CFRunLoopRun();
    fn CFRunLoopStop(rl: CFTypeRef);
    fn CFRelease(cf: CFTypeRef);
}

extern "C" {
    fn AXIsProcessTrusted() -> bool;
}

/// Event mask for one capability
fn event_mask(capability: Capability) -> CGEventMask {
    match capability {
        Capability::Keyboard => 1 << CG_EVENT_KEY_DOWN,
        Capability::Mouse => {
            (1 << CG_EVENT_LEFT_MOUSE_DOWN)
                | (1 << CG_EVENT_RIGHT_MOUSE_DOWN)
                | (1 << CG_EVENT_OTHER_MOUSE_DOWN)
        }
        Capability::Scroll => 1 << CG_EVENT_SCROLL_WHEEL,
        Capability::Screenshot => 0,
    }
}

/// Per-tap context handed to the callback through `user_info`.
///
/// The sink is only touched from the tap's own CFRunLoop thread, so no
/// lock is needed around it.
struct TapContext {
    sink: EventSink,
    running: Arc<AtomicBool>,
}

/// Quartz event tap backend for one capability
pub struct QuartzBackend {
    capability: Capability,
    running: Arc<AtomicBool>,
    run_loop: Arc<AtomicPtr<c_void>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl QuartzBackend {
    /// Create a backend for a capability. Fails for capabilities the tap
    /// cannot serve.
    pub fn new(capability: Capability) -> crate::Result<Self> {
        if event_mask(capability) == 0 {
            return Err(crate::Error::Backend(format!(
                "quartz tap does not serve {}",
                capability.name()
            )));
        }
        Timebase::init();
        Ok(Self {
            capability,
            running: Arc::new(AtomicBool::new(false)),
            run_loop: Arc::new(AtomicPtr::new(ptr::null_mut())),
            thread_handle: None,
        })
    }
}

impl EventBackend for QuartzBackend {
    fn name(&self) -> &'static str {
        "quartz"
    }

    fn start(&mut self, sink: EventSink) -> crate::Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(crate::Error::Backend("quartz tap already running".into()));
        }

        if !unsafe { AXIsProcessTrusted() } {
            self.running.store(false, Ordering::SeqCst);
            return Err(crate::Error::Backend(
                "Accessibility permission not granted".into(),
            ));
        }

        let context = Box::new(TapContext {
            sink,
            running: Arc::clone(&self.running),
        });
        let context_ptr = Box::into_raw(context);

        let capability = self.capability;
        let running = Arc::clone(&self.running);
        let run_loop = Arc::clone(&self.run_loop);

        let handle = thread::Builder::new()
            .name(format!("quartz-tap-{}", capability.name()))
            .spawn(move || {
                if let Err(e) = run_tap_loop(capability, context_ptr, run_loop) {
                    error!(capability = capability.name(), error = %e, "quartz tap failed");
                    running.store(false, Ordering::SeqCst);
                }
                // The run loop has exited; reclaim the context
                unsafe {
                    drop(Box::from_raw(context_ptr));
                }
            })
            .map_err(|e| {
                unsafe {
                    drop(Box::from_raw(context_ptr));
                }
                self.running.store(false, Ordering::SeqCst);
                crate::Error::Backend(format!("failed to spawn tap thread: {e}"))
            })?;

        self.thread_handle = Some(handle);
        info!(capability = self.capability.name(), "quartz tap started");
        Ok(())
    }

    fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let run_loop = self.run_loop.swap(ptr::null_mut(), Ordering::SeqCst);
        if !run_loop.is_null() {
            unsafe {
                CFRunLoopStop(run_loop as CFTypeRef);
            }
        }
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        info!(capability = self.capability.name(), "quartz tap stopped");
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for QuartzBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

/// RAII guard disabling and releasing the tap on any exit
struct TapGuard(CFTypeRef);

impl Drop for TapGuard {
    fn drop(&mut self) {
        unsafe {
            CGEventTapEnable(self.0, false);
            CFRelease(self.0);
        }
    }
}

/// RAII guard releasing the run-loop source
struct SourceGuard(CFTypeRef);

impl Drop for SourceGuard {
    fn drop(&mut self) {
        unsafe {
            CFRelease(self.0);
        }
    }
}

fn run_tap_loop(
    capability: Capability,
    context: *mut TapContext,
    run_loop_out: Arc<AtomicPtr<c_void>>,
) -> crate::Result<()> {
    let tap = unsafe {
        CGEventTapCreate(
            CGEventTapLocation::SessionEventTap,
            CGEventTapPlacement::HeadInsertEventTap,
            CGEventTapOptions::ListenOnly,
            event_mask(capability),
            tap_callback,
            context as *mut c_void,
        )
    };
    if tap.is_null() {
        return Err(crate::Error::Backend(
            "CGEventTapCreate failed (check Accessibility permission)".into(),
        ));
    }
    let _tap_guard = TapGuard(tap);

    let source = unsafe { CFMachPortCreateRunLoopSource(ptr::null(), tap, 0) };
    if source.is_null() {
        return Err(crate::Error::Backend("failed to create run loop source".into()));
    }
    let _source_guard = SourceGuard(source);

    let run_loop = unsafe { CFRunLoopGetCurrent() };
    run_loop_out.store(run_loop as *mut c_void, Ordering::SeqCst);

    unsafe {
        CFRunLoopAddSource(run_loop, source, kCFRunLoopCommonModes as CFTypeRef);
        CGEventTapEnable(tap, true);
        CFRunLoopRun();
    }

    run_loop_out.store(ptr::null_mut(), Ordering::SeqCst);
    Ok(())
}

/// Tap callback: one per tap instance, context through `user_info`.
extern "C" fn tap_callback(
    _proxy: CGEventTapProxy,
    event_type: u32,
    event: CGEventRef,
    user_info: *mut c_void,
) -> CGEventRef {
    if user_info.is_null() {
        return event;
    }
    // Only this tap's run-loop thread enters the callback
    let context = unsafe { &mut *(user_info as *mut TapContext) };
    if !context.running.load(Ordering::Relaxed) {
        return event;
    }

    let timestamp = Timestamp::now();
    let location = unsafe { CGEventGetLocation(event) };

    let raw = match event_type {
        CG_EVENT_KEY_DOWN => {
            let key_code =
                unsafe { CGEventGetIntegerValueField(event, CG_KEYBOARD_EVENT_KEYCODE) } as u16;
            Some(RawEvent::keyboard(timestamp, 0, key_token(key_code)))
        }
        CG_EVENT_LEFT_MOUSE_DOWN | CG_EVENT_RIGHT_MOUSE_DOWN | CG_EVENT_OTHER_MOUSE_DOWN => {
            let click_count =
                unsafe { CGEventGetIntegerValueField(event, CG_MOUSE_EVENT_CLICK_STATE) } as u8;
            let button = match event_type {
                CG_EVENT_LEFT_MOUSE_DOWN => MouseButton::Left,
                CG_EVENT_RIGHT_MOUSE_DOWN => MouseButton::Right,
                _ => MouseButton::Middle,
            };
            Some(RawEvent::mouse(
                timestamp,
                0,
                button,
                location.x,
                location.y,
                click_count,
            ))
        }
        CG_EVENT_SCROLL_WHEEL => {
            let dy =
                unsafe { CGEventGetIntegerValueField(event, CG_SCROLL_WHEEL_EVENT_DELTA_AXIS_1) };
            let dx =
                unsafe { CGEventGetIntegerValueField(event, CG_SCROLL_WHEEL_EVENT_DELTA_AXIS_2) };
            Some(RawEvent::scroll(
                timestamp,
                0,
                dx as f64,
                dy as f64,
                location.x,
                location.y,
            ))
        }
        _ => None,
    };

    if let Some(raw) = raw {
        if !context.sink.push(raw) {
            trace!("event channel full, dropping event");
        }
    }

    event
}

/// Printable token for a macOS virtual key code (ANSI layout)
pub fn key_token(key_code: u16) -> String {
    let token = match key_code {
        0 => "a",
        1 => "s",
        2 => "d",
        3 => "f",
        4 => "h",
        5 => "g",
        6 => "z",
        7 => "x",
        8 => "c",
        9 => "v",
        11 => "b",
        12 => "q",
        13 => "w",
        14 => "e",
        15 => "r",
        16 => "y",
        17 => "t",
        18 => "1",
        19 => "2",
        20 => "3",
        21 => "4",
        22 => "6",
        23 => "5",
        24 => "=",
        25 => "9",
        26 => "7",
        27 => "-",
        28 => "8",
        29 => "0",
        30 => "]",
        31 => "o",
        32 => "u",
        33 => "[",
        34 => "i",
        35 => "p",
        36 => "enter",
        37 => "l",
        38 => "j",
        39 => "'",
        40 => "k",
        41 => ";",
        42 => "\\",
        43 => ",",
        44 => "/",
        45 => "n",
        46 => "m",
        47 => ".",
        48 => "tab",
        49 => "space",
        50 => "`",
        51 => "backspace",
        53 => "escape",
        55 => "cmd",
        56 => "shift",
        57 => "capslock",
        58 => "option",
        59 => "ctrl",
        96 => "f5",
        97 => "f6",
        98 => "f7",
        99 => "f3",
        100 => "f8",
        101 => "f9",
        109 => "f10",
        111 => "f12",
        118 => "f4",
        120 => "f2",
        122 => "f1",
        123 => "left",
        124 => "right",
        125 => "down",
        126 => "up",
        _ => return format!("key{key_code}"),
    };
    token.to_string()
}

/// Backend factory entry for the platform chain
pub fn make_backend(capability: Capability) -> crate::Result<Box<dyn EventBackend>> {
    Ok(Box::new(QuartzBackend::new(capability)?))
}

/// CoreGraphics display grabber
pub struct QuartzGrabber;

impl QuartzGrabber {
    pub fn new() -> Self {
        Self
    }
}

impl Default for QuartzGrabber {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameGrabber for QuartzGrabber {
    fn name(&self) -> &'static str {
        "quartz"
    }

    fn displays(&mut self) -> crate::Result<Vec<DisplayInfo>> {
        use core_graphics::display::CGDisplay;

        let ids = CGDisplay::active_displays()
            .map_err(|code| crate::Error::Capture(format!("CGGetActiveDisplayList failed: {code}")))?;

        let mut displays = Vec::with_capacity(ids.len());
        for id in ids {
            let display = CGDisplay::new(id);
            let pixels_wide = display.pixels_wide() as u32;
            let pixels_high = display.pixels_high() as u32;
            let bounds = display.bounds();
            let scale = if bounds.size.width > 0.0 {
                pixels_wide as f64 / bounds.size.width
            } else {
                1.0
            };
            displays.push(DisplayInfo {
                id,
                width: pixels_wide,
                height: pixels_high,
                scale,
            });
        }
        Ok(displays)
    }

    fn grab(&mut self, display: &DisplayInfo) -> crate::Result<GrabbedImage> {
        use core_graphics::display::CGDisplay;

        let image = CGDisplay::new(display.id)
            .image()
            .ok_or_else(|| crate::Error::Capture("CGDisplayCreateImage returned null".into()))?;

        let width = image.width() as u32;
        let height = image.height() as u32;
        let bytes_per_row = image.bytes_per_row();
        let data = image.data();
        let bytes = data.bytes();

        // CGDisplayCreateImage yields 32bpp BGRA; repack to RGB8
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for row in 0..height as usize {
            let offset = row * bytes_per_row;
            for col in 0..width as usize {
                let px = offset + col * 4;
                if px + 2 >= bytes.len() {
                    return Err(crate::Error::Capture("truncated display image data".into()));
                }
                pixels.push(bytes[px + 2]);
                pixels.push(bytes[px + 1]);
                pixels.push(bytes[px]);
            }
        }

        Ok(GrabbedImage {
            pixels,
            width,
            height,
        })
    }
}

/// Grabber factory entry for the platform chain
pub fn make_grabber() -> crate::Result<Box<dyn FrameGrabber>> {
    Ok(Box::new(QuartzGrabber::new()))
}
