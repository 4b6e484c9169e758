//! Capture Backends
//!
//! A backend is a platform-specific (or generic) producer of raw input
//! events for one capability. Each capability resolves against an ordered
//! fallback chain at startup: the first backend that constructs and starts
//! wins; a failure falls through to the next entry. An exhausted chain
//! disables the capability for the session: reported, never fatal.

use super::channel::{ChannelStats, EventChannel, EventSink, EventStream};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Input capabilities a backend can provide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Keyboard,
    Mouse,
    Scroll,
    Screenshot,
}

impl Capability {
    /// Capabilities served by event backends (screenshots go through the
    /// frame grabber chain instead)
    pub const EVENT_CAPABILITIES: [Capability; 3] =
        [Capability::Keyboard, Capability::Mouse, Capability::Scroll];

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Capability::Keyboard => "keyboard",
            Capability::Mouse => "mouse",
            Capability::Scroll => "scroll",
            Capability::Screenshot => "screenshot",
        }
    }
}

/// Abstract interface for raw event sources.
///
/// `start` takes ownership of the channel sink and must deliver events to
/// it from the backend's own thread until `stop` is called or the backend
/// fails unrecoverably. All events pushed into the sink must carry
/// non-decreasing timestamps.
pub trait EventBackend: Send {
    /// Backend name for logs and diagnostics
    fn name(&self) -> &'static str;

    /// Begin delivering events to the sink
    fn start(&mut self, sink: EventSink) -> crate::Result<()>;

    /// Stop delivering events and release resources
    fn stop(&mut self);

    /// Check whether the backend is currently delivering
    fn is_running(&self) -> bool;
}

/// Backend factory: constructs a backend or reports why it is unavailable
pub type BackendFactory = Box<dyn Fn() -> crate::Result<Box<dyn EventBackend>> + Send>;

/// Ordered fallback chain for one capability
pub struct BackendChain {
    /// The capability this chain resolves
    pub capability: Capability,
    /// Factories tried in order at startup
    pub factories: Vec<BackendFactory>,
}

impl BackendChain {
    /// Chain with no candidates: the capability resolves to disabled
    pub fn empty(capability: Capability) -> Self {
        Self {
            capability,
            factories: Vec::new(),
        }
    }

    /// Chain that resolves to the null backend (explicitly disabled
    /// capability: starts successfully, never emits)
    pub fn disabled(capability: Capability) -> Self {
        Self {
            capability,
            factories: vec![Box::new(|| {
                Ok(Box::new(NullBackend::new()) as Box<dyn EventBackend>)
            })],
        }
    }

    /// Platform default chain: native backend first, nothing after it.
    ///
    /// On platforms without a native backend the chain is empty and the
    /// capability is reported disabled at resolution time.
    pub fn platform_default(capability: Capability) -> Self {
        #[cfg(target_os = "macos")]
        {
            Self {
                capability,
                factories: vec![Box::new(move || super::quartz::make_backend(capability))],
            }
        }
        #[cfg(not(target_os = "macos"))]
        {
            Self::empty(capability)
        }
    }
}

/// A capability resolved to a running backend
pub struct ResolvedBackend {
    /// The capability this backend serves
    pub capability: Capability,
    /// The running backend (stopped on drop via `CaptureSession`)
    pub backend: Box<dyn EventBackend>,
    /// Consumer half of the backend's channel
    pub stream: EventStream,
    /// Channel statistics
    pub stats: Arc<ChannelStats>,
}

/// Outcome of resolving every capability chain
pub struct ResolvedBackends {
    /// Capabilities that resolved to a running backend
    pub active: Vec<ResolvedBackend>,
    /// Capabilities whose chain was exhausted
    pub disabled: Vec<Capability>,
}

/// Resolve a single chain: try factories in order, return the first backend
/// that constructs and starts. Each attempt gets a fresh channel so a failed
/// start cannot leak a half-wired sink.
pub fn resolve_chain(chain: &BackendChain, channel_capacity: usize) -> Option<ResolvedBackend> {
    for factory in &chain.factories {
        let mut backend = match factory() {
            Ok(backend) => backend,
            Err(e) => {
                warn!(
                    capability = chain.capability.name(),
                    error = %e,
                    "backend unavailable, falling through"
                );
                continue;
            }
        };

        let channel = EventChannel::with_capacity(channel_capacity);
        let stats = channel.stats();
        let (sink, stream) = channel.split();

        match backend.start(sink) {
            Ok(()) => {
                info!(
                    capability = chain.capability.name(),
                    backend = backend.name(),
                    "backend started"
                );
                return Some(ResolvedBackend {
                    capability: chain.capability,
                    backend,
                    stream,
                    stats,
                });
            }
            Err(e) => {
                warn!(
                    capability = chain.capability.name(),
                    backend = backend.name(),
                    error = %e,
                    "backend failed to start, falling through"
                );
            }
        }
    }
    None
}

/// Resolve every chain, reporting exhausted capabilities without failing.
pub fn resolve_backends(chains: Vec<BackendChain>, channel_capacity: usize) -> ResolvedBackends {
    let mut active = Vec::new();
    let mut disabled = Vec::new();

    for chain in &chains {
        match resolve_chain(chain, channel_capacity) {
            Some(resolved) => active.push(resolved),
            None => {
                warn!(
                    capability = chain.capability.name(),
                    "no backend available, capability disabled for this session"
                );
                disabled.push(chain.capability);
            }
        }
    }

    ResolvedBackends { active, disabled }
}

/// Backend stub that starts successfully and never emits.
///
/// Installed when a capability is explicitly disabled via configuration,
/// so the rest of the pipeline sees a normal (silent) stream.
pub struct NullBackend {
    running: bool,
}

impl NullBackend {
    pub fn new() -> Self {
        Self { running: false }
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn start(&mut self, _sink: EventSink) -> crate::Result<()> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::types::RawEvent;
    use crate::time::Timestamp;

    fn failing_factory() -> crate::Result<Box<dyn EventBackend>> {
        Err(crate::Error::Backend("not available on this host".into()))
    }

    struct StartFailBackend;

    impl EventBackend for StartFailBackend {
        fn name(&self) -> &'static str {
            "start-fail"
        }
        fn start(&mut self, _sink: EventSink) -> crate::Result<()> {
            Err(crate::Error::Backend("permission denied".into()))
        }
        fn stop(&mut self) {}
        fn is_running(&self) -> bool {
            false
        }
    }

    fn start_fail_factory() -> crate::Result<Box<dyn EventBackend>> {
        Ok(Box::new(StartFailBackend))
    }

    struct OneShotBackend {
        running: bool,
    }

    impl EventBackend for OneShotBackend {
        fn name(&self) -> &'static str {
            "one-shot"
        }
        fn start(&mut self, mut sink: EventSink) -> crate::Result<()> {
            sink.push(RawEvent::keyboard(Timestamp::from_ticks(1), 0, "a"));
            self.running = true;
            Ok(())
        }
        fn stop(&mut self) {
            self.running = false;
        }
        fn is_running(&self) -> bool {
            self.running
        }
    }

    fn one_shot_factory() -> crate::Result<Box<dyn EventBackend>> {
        Ok(Box::new(OneShotBackend { running: false }))
    }

    #[test]
    fn test_empty_chain_disables_capability() {
        let chain = BackendChain::empty(Capability::Keyboard);
        assert!(resolve_chain(&chain, 64).is_none());
    }

    #[test]
    fn test_construction_failure_falls_through() {
        let chain = BackendChain {
            capability: Capability::Keyboard,
            factories: vec![Box::new(failing_factory), Box::new(one_shot_factory)],
        };

        let resolved = resolve_chain(&chain, 64).expect("fallback should win");
        assert_eq!(resolved.backend.name(), "one-shot");
    }

    #[test]
    fn test_start_failure_falls_through() {
        let chain = BackendChain {
            capability: Capability::Mouse,
            factories: vec![Box::new(start_fail_factory), Box::new(one_shot_factory)],
        };

        let mut resolved = resolve_chain(&chain, 64).expect("fallback should win");
        assert_eq!(resolved.backend.name(), "one-shot");
        assert!(resolved.backend.is_running());

        // The winning backend got a fresh sink: its event is observable
        let event = resolved.stream.pop().expect("event from fallback");
        assert_eq!(event.sequence, 0);
    }

    #[test]
    fn test_exhausted_chain_reported_not_fatal() {
        let chains = vec![
            BackendChain {
                capability: Capability::Keyboard,
                factories: vec![Box::new(failing_factory), Box::new(start_fail_factory)],
            },
            BackendChain {
                capability: Capability::Scroll,
                factories: vec![Box::new(one_shot_factory)],
            },
        ];

        let resolved = resolve_backends(chains, 64);
        assert_eq!(resolved.disabled, vec![Capability::Keyboard]);
        assert_eq!(resolved.active.len(), 1);
        assert_eq!(resolved.active[0].capability, Capability::Scroll);
    }

    #[test]
    fn test_null_backend_lifecycle() {
        let mut backend = NullBackend::new();
        assert!(!backend.is_running());

        let (sink, mut stream) = EventChannel::with_capacity(64).split();
        backend.start(sink).unwrap();
        assert!(backend.is_running());
        assert!(stream.pop().is_none());

        backend.stop();
        assert!(!backend.is_running());
    }

    #[test]
    fn test_disabled_chain_resolves_to_null() {
        let chain = BackendChain::disabled(Capability::Keyboard);
        let resolved = resolve_chain(&chain, 64).expect("null backend should start");
        assert_eq!(resolved.backend.name(), "null");
    }

    #[test]
    fn test_capability_names() {
        assert_eq!(Capability::Keyboard.name(), "keyboard");
        assert_eq!(Capability::Screenshot.name(), "screenshot");
        assert_eq!(Capability::EVENT_CAPABILITIES.len(), 3);
    }
}
