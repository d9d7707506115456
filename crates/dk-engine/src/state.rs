//! Engine and event-phase state machines.

/// Execution states of one engine instance.
///
/// ```text
/// NOT_STARTED --> SCRIPTS_REGISTERED --> SCRIPTS_EXECUTING ----------
///                          ^                                         |
///                          |                                         |
///                    WAITING_FOR_NEXT_RUN <--                        |
///                                             \                      |
///                                              \                     |
/// SCRIPTS_DONE <--- WAITING_FOR_ONLOAD <--- SYNC_SCRIPTS_DONE <------
/// ```
///
/// The state never regresses, with one documented exception: an
/// incremental (streamed) pass parks at `WaitingForNextRun` and moves
/// back to `ScriptsRegistered` when the next batch of HTML registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EngineState {
    NotStarted,
    /// Pause state between incremental registration passes.
    WaitingForNextRun,
    /// All sentinel script tags of this engine's type are queued.
    ScriptsRegistered,
    /// The task queue is draining.
    ScriptsExecuting,
    /// Every queued (synchronous) script has run; dynamically inserted
    /// scripts may still be outstanding.
    SyncScriptsDone,
    /// Facade restored; waiting for the load event to be fired.
    WaitingForOnload,
    /// Terminal.
    ScriptsDone,
}

/// Synthetic lifecycle event phases, in firing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventPhase {
    NotStarted,
    /// Fired before the first queue drain.
    BeforeScripts,
    /// Stands in for `DOMContentLoaded`.
    DomReady,
    /// Stands in for `load`.
    Load,
    /// Fired after the load phase, once the engine is done.
    AfterScripts,
}

impl EventPhase {
    /// Canonical event-type string put on synthetic event objects.
    pub fn event_type(self) -> &'static str {
        match self {
            Self::NotStarted => "",
            Self::BeforeScripts => "beforescripts",
            Self::DomReady => "DOMContentLoaded",
            Self::Load => "load",
            Self::AfterScripts => "afterscripts",
        }
    }
}
