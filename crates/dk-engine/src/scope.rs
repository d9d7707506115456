//! Capability-scoped DOM facade handed to page code.
//!
//! Stands in for the patched `document`/`window` entry points: while the
//! engine is in its override window the scope buffers writes, filters
//! queries by the not-processed marker and tracks created scripts; once
//! the engine restores, the same calls pass straight through to the raw
//! DOM. The switch happens by swapping [`DomDispatch`] exactly once.

use crate::engine::DeferJs;
use crate::events::EventTarget;
use crate::events::Listener;
use dk_dom::Document;
use dk_dom::NodeId;

/// Dispatch mode of the facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomDispatch {
    /// Override window: emulate the still-parsing document.
    Intercepting,
    /// Restored: behave exactly like the raw DOM.
    Passthrough,
}

/// Borrowed view over one engine and the shared document, implementing
/// the intercepted DOM surface. Page scripts and script hosts only see
/// the DOM through this handle.
pub struct PageScope<'a> {
    pub(crate) engine: &'a mut DeferJs,
    pub(crate) dom: &'a mut Document,
}

impl<'a> PageScope<'a> {
    pub fn new(engine: &'a mut DeferJs, dom: &'a mut Document) -> Self {
        Self { engine, dom }
    }

    /// `document.write`.
    pub fn document_write(&mut self, html: &str) {
        self.engine.facade_write(self.dom, html);
    }

    /// `document.writeln`.
    pub fn document_writeln(&mut self, html: &str) {
        self.engine.facade_write(self.dom, &format!("{html}\n"));
    }

    /// `document.open`. A real open would destroy the document, so it
    /// is inert during the override window.
    pub fn document_open(&mut self) {}

    /// `document.close`, inert during the override window.
    pub fn document_close(&mut self) {}

    /// `document.getElementById`, with pending writes flushed first and
    /// not-yet-processed content hidden.
    pub fn get_element_by_id(&mut self, id: &str) -> Option<NodeId> {
        self.engine.facade_get_element_by_id(self.dom, id)
    }

    /// `document.getElementsByTagName` with not-processed filtering.
    pub fn get_elements_by_tag_name(&mut self, tag: &str) -> Vec<NodeId> {
        self.engine.facade_get_elements_by_tag_name(self.dom, tag)
    }

    /// `document.createElement`; created `script` elements are tracked
    /// until their load or error is reported.
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.engine.facade_create_element(self.dom, tag)
    }

    /// `addEventListener` on document or window: lifecycle events are
    /// buffered, everything else goes to native registration.
    pub fn add_event_listener(&mut self, target: EventTarget, event_name: &str, listener: Listener) {
        self.engine.add_event_listener(target, event_name, listener);
    }

    /// Shadowed `document.readyState`.
    pub fn ready_state(&self) -> &'static str {
        self.engine.ready_state()
    }

    pub fn dispatch(&self) -> DomDispatch {
        self.engine.dispatch()
    }

    /// Raw tree access for ordinary (non-intercepted) node manipulation:
    /// attributes, text, structure.
    pub fn dom(&mut self) -> &mut Document {
        self.dom
    }

    pub fn dom_ref(&self) -> &Document {
        self.dom
    }

    /// Appends a diagnostic line to the owning engine's log.
    pub fn log_info(&mut self, message: impl Into<String>) {
        self.engine.log_mut().info(message);
    }
}
