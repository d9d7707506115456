//! Lifecycle event emulation: buffered listeners and synthetic events.

use crate::host::ListenerToken;
use crate::state::EventPhase;
use dk_core::EngineResult;
use std::collections::HashMap;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Where a listener was registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTarget {
    Document,
    Window,
}

/// Minimal event object handed to buffered listeners. Modeled on the
/// cross-browser `DOMContentLoaded` fallback shape: enough for consumers
/// that read the event they are passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticEvent {
    pub bubbles: bool,
    pub cancelable: bool,
    /// Always `2` (at-target).
    pub event_phase: u8,
    pub time_stamp: u64,
    pub event_type: &'static str,
    /// The event target is always the document, never the window.
    pub target: EventTarget,
    pub current_target: EventTarget,
}

impl SyntheticEvent {
    pub fn at_target(phase: EventPhase, registered_on: EventTarget) -> Self {
        Self {
            bubbles: false,
            cancelable: false,
            event_phase: 2,
            time_stamp: unix_millis(),
            event_type: phase.event_type(),
            target: EventTarget::Document,
            current_target: registered_on,
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// A registered callback: a native Rust closure, a host-side (JS)
/// function referenced by token, or handler source evaluated on fire.
pub enum Listener {
    Native(Box<dyn FnMut(&SyntheticEvent) -> EngineResult<()>>),
    Hosted(ListenerToken),
    HandlerSource { origin: String, source: String },
}

impl core::fmt::Debug for Listener {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Native(_) => f.write_str("Listener::Native"),
            Self::Hosted(token) => write!(f, "Listener::Hosted({})", token.0),
            Self::HandlerSource { origin, .. } => {
                write!(f, "Listener::HandlerSource({origin})")
            }
        }
    }
}

/// One buffered registration, kept until its phase fires.
#[derive(Debug)]
pub struct BufferedListener {
    pub target: EventTarget,
    pub listener: Listener,
}

/// A registration that fell through to the native API (event already
/// past, engine done, or unrecognized event name). Recorded so native
/// semantics remain observable; the engine itself never fires these.
#[derive(Debug)]
pub struct NativeRegistration {
    pub target: EventTarget,
    pub event_name: String,
    pub listener: Listener,
}

/// Routing decision for one `addEventListener` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerRoute {
    Buffer(EventPhase),
    Native,
}

/// Maps an event name to a phase, honoring the current event state: a
/// phase that has already fired routes to native registration.
pub fn classify_event(event_name: &str, event_state: EventPhase) -> ListenerRoute {
    match event_name {
        "DOMContentLoaded" | "readystatechange" | "onDOMContentLoaded" | "onreadystatechange" => {
            if event_state < EventPhase::DomReady {
                ListenerRoute::Buffer(EventPhase::DomReady)
            } else {
                ListenerRoute::Native
            }
        }
        "load" | "onload" => {
            if event_state < EventPhase::Load {
                ListenerRoute::Buffer(EventPhase::Load)
            } else {
                ListenerRoute::Native
            }
        }
        "beforescripts" | "onbeforescripts" => ListenerRoute::Buffer(EventPhase::BeforeScripts),
        "afterscripts" | "onafterscripts" => ListenerRoute::Buffer(EventPhase::AfterScripts),
        _ => ListenerRoute::Native,
    }
}

/// Buffered listener storage, drained phase by phase.
#[derive(Debug, Default)]
pub struct EventListeners {
    buffered: HashMap<EventPhase, Vec<BufferedListener>>,
    native: Vec<NativeRegistration>,
}

impl EventListeners {
    pub fn buffer(&mut self, phase: EventPhase, target: EventTarget, listener: Listener) {
        self.buffered
            .entry(phase)
            .or_default()
            .push(BufferedListener { target, listener });
    }

    /// Removes and returns the phase's listeners; the phase's buffer is
    /// empty afterwards, so a phase fires its listeners at most once.
    pub fn drain_phase(&mut self, phase: EventPhase) -> Vec<BufferedListener> {
        self.buffered.remove(&phase).unwrap_or_default()
    }

    pub fn register_native(&mut self, target: EventTarget, event_name: &str, listener: Listener) {
        self.native.push(NativeRegistration {
            target,
            event_name: event_name.to_owned(),
            listener,
        });
    }

    pub fn buffered_count(&self, phase: EventPhase) -> usize {
        self.buffered.get(&phase).map(Vec::len).unwrap_or(0)
    }

    pub fn native_registrations(&self) -> &[NativeRegistration] {
        &self.native
    }
}
