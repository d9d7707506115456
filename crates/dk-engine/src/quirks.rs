//! Browser-behavior predicates.
//!
//! User-agent differences are injected as explicit predicates so the
//! core algorithm stays branch-free on browser trivia.

/// Feature predicates describing the hosting environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quirks {
    /// Selector-based not-processed filtering is available for
    /// `getElementsByTagName` emulation and marker stripping.
    pub supports_selector_filtering: bool,
    /// A created script only ever signals load/error once connected to
    /// the document. When false, the legacy rule applies instead: a
    /// script with a parent signals unless both its src and its text are
    /// empty.
    pub script_load_requires_connected: bool,
}

impl Default for Quirks {
    fn default() -> Self {
        Self {
            supports_selector_filtering: true,
            script_load_requires_connected: true,
        }
    }
}

impl Quirks {
    /// Environment without selector support and with legacy load-signal
    /// rules.
    pub fn legacy() -> Self {
        Self {
            supports_selector_filtering: false,
            script_load_requires_connected: false,
        }
    }
}
