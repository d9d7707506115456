//! Deferred-script execution engine.
//!
//! Replays sentinel-marked `<script>` nodes against a live DOM in strict
//! document order: a task queue drains one script at a time, a facade
//! emulates the partially-parsed DOM view those scripts expect
//! (`document.write` buffering, not-processed visibility filtering,
//! created-script tracking), lifecycle events are buffered and
//! synthesized once the queue settles, and a state machine gates when
//! control returns to the host page.
//!
//! Two engine instances run per page: the high-priority engine first,
//! then a hand-off to the low-priority engine. [`PageRuntime`] owns both
//! plus the shared document and drives the hand-off without globals.

mod engine;
mod events;
mod host;
mod markers;
mod queue;
mod quirks;
mod runtime;
mod scope;
mod state;

#[cfg(test)]
mod tests;

pub use engine::DeferJs;
pub use engine::EngineConfig;
pub use engine::EnginePriority;
pub use engine::IncrementalCallback;
pub use engine::RunOutcome;
pub use events::EventTarget;
pub use events::Listener;
pub use events::NativeRegistration;
pub use events::SyntheticEvent;
pub use host::ListenerToken;
pub use host::NullScriptHost;
pub use host::ScriptHost;
pub use host::ScriptUnit;
pub use markers::ScriptMarkers;
pub use quirks::Quirks;
pub use runtime::PageRuntime;
pub use runtime::RuntimeConfig;
pub use runtime::RuntimeStatus;
pub use scope::DomDispatch;
pub use scope::PageScope;
pub use state::EngineState;
pub use state::EventPhase;
