//! Sentinel attribute contract shared with the server-side rewriter.
//!
//! The attribute and type strings below are produced by the upstream
//! rewriter and must match byte for byte; they are the engine's only
//! interface to rewritten markup.

/// Sentinel type for normal deferred scripts.
pub const SCRIPT_TYPE_DEFERRED: &str = "text/psajs";

/// Sentinel type for priority deferred scripts, run first.
pub const SCRIPT_TYPE_PRIORITY: &str = "text/prioritypsajs";

/// Original `type` attribute of a rewritten script node.
pub const ATTR_ORIG_TYPE: &str = "data-pagespeed-orig-type";

/// Original `src` attribute of a rewritten script node.
pub const ATTR_ORIG_SRC: &str = "data-pagespeed-orig-src";

/// Original document-order index of a rewritten script node.
pub const ATTR_ORIG_INDEX: &str = "data-pagespeed-orig-index";

/// Not-processed marker used by the low-priority engine.
pub const ATTR_NOT_PROCESSED: &str = "psa_not_processed";

/// Not-processed marker used by the high-priority engine.
pub const ATTR_PRIORITY_NOT_PROCESSED: &str = "priority_psa_not_processed";

/// Marks the node that anchors where synthesized output is inserted.
pub const ATTR_CURRENT_NODE: &str = "psa_current_node";

/// Deferred inline onload handler source.
pub const ATTR_DEFERRED_ONLOAD: &str = "data-pagespeed-onload";

/// Companion marker: the element's resource has already loaded.
pub const ATTR_LOADED: &str = "data-pagespeed-loaded";

/// Tag of the synthetic placeholder element appended to `body`.
pub const ANCHOR_TAG: &str = "psanode";

/// Attribute stamped on the anchor element.
pub const ATTR_ANCHOR_TARGET: &str = "psa_dw_target";

/// Class put on speculative prefetch links so they can be cleaned up.
pub const PREFETCH_CONTAINER_CLASS: &str = "psa_prefetch_container";

/// MIME types treated as JavaScript when classifying script nodes.
pub const JS_MIME_TYPES: &[&str] = &[
    "application/ecmascript",
    "application/javascript",
    "application/x-ecmascript",
    "application/x-javascript",
    "text/ecmascript",
    "text/javascript",
    "text/javascript1.0",
    "text/javascript1.1",
    "text/javascript1.2",
    "text/javascript1.3",
    "text/javascript1.4",
    "text/javascript1.5",
    "text/jscript",
    "text/livescript",
    "text/x-ecmascript",
    "text/x-javascript",
];

/// Per-engine sentinel identity: which script type this instance
/// executes and which not-processed marker it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptMarkers {
    pub script_type: &'static str,
    pub not_processed_attr: &'static str,
}

impl ScriptMarkers {
    pub fn high_priority() -> Self {
        Self {
            script_type: SCRIPT_TYPE_PRIORITY,
            not_processed_attr: ATTR_PRIORITY_NOT_PROCESSED,
        }
    }

    pub fn low_priority() -> Self {
        Self {
            script_type: SCRIPT_TYPE_DEFERRED,
            not_processed_attr: ATTR_NOT_PROCESSED,
        }
    }
}
