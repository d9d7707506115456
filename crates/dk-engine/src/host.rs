//! Script host boundary.
//!
//! The engine owns ordering, interception and lifecycle; actually
//! evaluating script text is delegated to a host. Hosts call back into
//! the page exclusively through the [`PageScope`](crate::PageScope)
//! facade they are handed, which is what preserves the engine's
//! partially-parsed DOM view inside evaluated code.

use crate::events::SyntheticEvent;
use crate::scope::PageScope;
use dk_core::EngineResult;

/// Handle to a callback kept alive inside the host (for example a
/// JavaScript function object) so it can be invoked across evals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(pub u32);

/// One script payload to evaluate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptUnit {
    /// Script text.
    pub source: String,
    /// Diagnostic origin: `inline:<n>`, a URL, or a handler label.
    pub origin: String,
}

impl ScriptUnit {
    pub fn new(source: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            origin: origin.into(),
        }
    }
}

/// Evaluates script text against the page.
///
/// An `Err` from either method is a script-level failure: the engine
/// logs it and proceeds, matching top-level script error semantics.
pub trait ScriptHost {
    fn eval(&mut self, unit: &ScriptUnit, scope: &mut PageScope<'_>) -> EngineResult<()>;

    /// Invokes a previously captured host callback with a synthetic
    /// lifecycle event.
    fn invoke_listener(
        &mut self,
        token: ListenerToken,
        event: &SyntheticEvent,
        scope: &mut PageScope<'_>,
    ) -> EngineResult<()>;
}

/// Host that treats every script as a successful no-op. Useful when the
/// engine is exercised purely for its queue/lifecycle behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NullScriptHost;

impl ScriptHost for NullScriptHost {
    fn eval(&mut self, _unit: &ScriptUnit, _scope: &mut PageScope<'_>) -> EngineResult<()> {
        Ok(())
    }

    fn invoke_listener(
        &mut self,
        _token: ListenerToken,
        _event: &SyntheticEvent,
        _scope: &mut PageScope<'_>,
    ) -> EngineResult<()> {
        Ok(())
    }
}
