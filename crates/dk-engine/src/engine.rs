//! One deferred-script engine instance.

use crate::events::EventListeners;
use crate::events::EventTarget;
use crate::events::Listener;
use crate::events::ListenerRoute;
use crate::events::NativeRegistration;
use crate::events::SyntheticEvent;
use crate::events::classify_event;
use crate::host::ScriptHost;
use crate::host::ScriptUnit;
use crate::markers;
use crate::markers::ScriptMarkers;
use crate::queue::Task;
use crate::queue::TaskQueue;
use crate::quirks::Quirks;
use crate::scope::DomDispatch;
use crate::scope::PageScope;
use crate::state::EngineState;
use crate::state::EventPhase;
use dk_core::DiagnosticLog;
use dk_core::EngineError;
use dk_core::EngineResult;
use dk_dom::Attribute;
use dk_dom::Document;
use dk_dom::NodeId;
use dk_html::HtmlParser;

/// Which of the page's two engines this instance is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePriority {
    High,
    Low,
}

/// Per-engine knobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    /// Streaming mode: script registration may happen in several passes
    /// as more HTML arrives.
    pub incremental: bool,
}

/// What the queue drain left behind when control returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Nothing to do right now (drained, gated, or suspended elsewhere).
    Idle,
    /// The drain stopped at an external script; resume through
    /// [`DeferJs::resolve_script_load`] once the load or error fires.
    AwaitingScriptLoad { url: String },
}

/// Callback run when an incremental batch finishes executing.
pub type IncrementalCallback = Box<dyn FnOnce()>;

/// Cross-engine action produced by a completion, consumed by the page
/// runtime on its next pump.
pub(crate) enum Notice {
    HandoffToLow {
        callback: Option<IncrementalCallback>,
        last_index: Option<i64>,
    },
    ReadyForOnload,
    IncrementalPassDone {
        callback: Option<IncrementalCallback>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingExternal {
    url: String,
}

/// Deferred-script execution engine for one sentinel script type.
pub struct DeferJs {
    markers: ScriptMarkers,
    quirks: Quirks,
    config: EngineConfig,
    priority: EnginePriority,
    queue: TaskQueue,
    state: EngineState,
    event_state: EventPhase,
    listeners: EventListeners,
    /// Scripts created through the facade during execution, pending
    /// their load/error notification.
    dynamic_scripts: Vec<NodeId>,
    /// Scripts created by non-deferred page code before the run; they
    /// gate `execute`.
    no_defer_scripts: Vec<NodeId>,
    document_write_html: String,
    dispatch: DomDispatch,
    first_incremental_run: bool,
    last_incremental_run: bool,
    incremental_done_callback: Option<IncrementalCallback>,
    last_index: Option<i64>,
    pending_external: Option<PendingExternal>,
    notice: Option<Notice>,
    log: DiagnosticLog,
}

impl core::fmt::Debug for DeferJs {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeferJs")
            .field("priority", &self.priority)
            .field("state", &self.state)
            .field("event_state", &self.event_state)
            .field("queue_len", &self.queue.len())
            .field("queue_cursor", &self.queue.cursor())
            .field("dynamic_pending", &self.dynamic_scripts.len())
            .finish_non_exhaustive()
    }
}

impl DeferJs {
    pub fn new(
        markers: ScriptMarkers,
        priority: EnginePriority,
        config: EngineConfig,
        quirks: Quirks,
    ) -> Self {
        Self {
            markers,
            quirks,
            config,
            priority,
            queue: TaskQueue::default(),
            state: EngineState::NotStarted,
            event_state: EventPhase::NotStarted,
            listeners: EventListeners::default(),
            dynamic_scripts: Vec::new(),
            no_defer_scripts: Vec::new(),
            document_write_html: String::new(),
            dispatch: DomDispatch::Intercepting,
            first_incremental_run: true,
            last_incremental_run: true,
            incremental_done_callback: None,
            last_index: None,
            pending_external: None,
            notice: None,
            log: DiagnosticLog::default(),
        }
    }

    pub fn priority(&self) -> EnginePriority {
        self.priority
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn event_state(&self) -> EventPhase {
        self.event_state
    }

    pub fn markers(&self) -> &ScriptMarkers {
        &self.markers
    }

    pub fn dispatch(&self) -> DomDispatch {
        self.dispatch
    }

    pub fn logs(&self) -> &DiagnosticLog {
        &self.log
    }

    pub(crate) fn log_mut(&mut self) -> &mut DiagnosticLog {
        &mut self.log
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn queue_cursor(&self) -> usize {
        self.queue.cursor()
    }

    pub fn dynamic_pending(&self) -> usize {
        self.dynamic_scripts.len()
    }

    pub fn native_registrations(&self) -> &[NativeRegistration] {
        self.listeners.native_registrations()
    }

    /// Whether all deferred scripts of this engine are done executing.
    pub fn scripts_are_done(&self) -> bool {
        self.state == EngineState::ScriptsDone
    }

    pub(crate) fn take_notice(&mut self) -> Option<Notice> {
        self.notice.take()
    }

    // ----- registration -------------------------------------------------

    /// Stamps this engine's not-processed marker on every element
    /// currently in the document.
    pub fn set_not_processed_attribute_for_nodes(&self, dom: &mut Document) {
        for node in dom.elements_by_tag_name("*") {
            dom.set_attribute(node, self.markers.not_processed_attr, "");
        }
    }

    /// Scans the document for this engine's sentinel script tags and
    /// queues them in document order. A second call at or past
    /// `ScriptsRegistered` is a no-op.
    ///
    /// With a callback (incremental mode only) the pass is partial: only
    /// scripts whose recorded original index is `<= last_index` register
    /// now; the callback runs when this batch finishes executing.
    pub fn register_script_tags(
        &mut self,
        dom: &mut Document,
        callback: Option<IncrementalCallback>,
        last_index: Option<i64>,
    ) {
        if self.state >= EngineState::ScriptsRegistered {
            return;
        }
        let partial_pass = match callback {
            Some(callback) => {
                if !self.config.incremental {
                    callback();
                    return;
                }
                self.last_incremental_run = false;
                self.incremental_done_callback = Some(callback);
                if last_index.is_some() {
                    self.last_index = last_index;
                }
                true
            }
            None => {
                self.last_incremental_run = true;
                false
            }
        };

        self.state = EngineState::ScriptsRegistered;
        for script in dom.elements_by_tag_name("script") {
            if dom.attribute(script, "type") != Some(self.markers.script_type) {
                continue;
            }
            let is_first = self.queue.drained();
            // A missing or unparsable index counts as zero and joins
            // the first batch.
            let recorded = dom
                .attribute(script, markers::ATTR_ORIG_INDEX)
                .and_then(|value| value.parse::<i64>().ok())
                .unwrap_or(0);
            if partial_pass {
                if recorded <= self.last_index.unwrap_or(-1) {
                    self.add_node(dom, script, None, !is_first);
                }
            } else {
                if let Some(last) = self.last_index {
                    if recorded < last {
                        // Tolerated, not prevented: see the double
                        // execution note in DESIGN.md.
                        self.log
                            .warn(format!("executing a script twice, orig index {recorded}"));
                    }
                }
                self.add_node(dom, script, None, !is_first);
            }
        }
    }

    /// Defers execution of a sentinel script node: external scripts (an
    /// original src is recorded) queue a load, everything else queues
    /// the node's text.
    pub fn add_node(
        &mut self,
        dom: &mut Document,
        script: NodeId,
        position: Option<usize>,
        prefetch: bool,
    ) {
        let src = non_empty_attr(dom, script, markers::ATTR_ORIG_SRC)
            .or_else(|| non_empty_attr(dom, script, "src"));
        match src {
            Some(url) => {
                if prefetch {
                    self.attempt_prefetch(dom, &url);
                }
                self.add_url(script, &url, position);
            }
            None => {
                let source = dom.text_content(script);
                self.add_str(script, &source, position);
            }
        }
    }

    /// Queues inline script text for deferred evaluation.
    pub fn add_str(&mut self, script: NodeId, source: &str, position: Option<usize>) {
        self.log.info(format!("add to queue str: {source}"));
        self.queue.submit(
            Task::Inline {
                node: script,
                source: source.to_owned(),
            },
            position,
        );
    }

    /// Queues an external script URL for deferred load + evaluation.
    pub fn add_url(&mut self, script: NodeId, url: &str, position: Option<usize>) {
        self.log.info(format!("add to queue url: {url}"));
        self.queue.submit(
            Task::External {
                node: script,
                url: url.to_owned(),
            },
            position,
        );
    }

    /// Speculative fetch hint for an upcoming external script.
    fn attempt_prefetch(&mut self, dom: &mut Document, url: &str) {
        let head = dom.head();
        let link = dom.create_element("link");
        dom.set_attribute(link, "rel", "preload");
        dom.set_attribute(link, "as", "script");
        dom.set_attribute(link, "href", url);
        dom.set_attribute(link, "class", markers::PREFETCH_CONTAINER_CLASS);
        dom.append_child(head, link);
    }

    // ----- execution ----------------------------------------------------

    /// Starts the run, unless an async script created by non-deferred
    /// page code is still outstanding.
    pub fn execute(&mut self, dom: &mut Document, host: &mut dyn ScriptHost) -> RunOutcome {
        if self.state != EngineState::ScriptsRegistered {
            return RunOutcome::Idle;
        }
        let signal_less = self.scripts_without_load_signal(dom, &self.no_defer_scripts);
        if self.no_defer_scripts.len() != signal_less {
            return RunOutcome::Idle;
        }
        self.run(dom, host)
    }

    /// Unconditionally starts draining the queue.
    pub fn run(&mut self, dom: &mut Document, host: &mut dyn ScriptHost) -> RunOutcome {
        if self.state != EngineState::ScriptsRegistered {
            return RunOutcome::Idle;
        }
        if self.first_incremental_run {
            self.fire_event(dom, host, EventPhase::BeforeScripts);
        }
        self.state = EngineState::ScriptsExecuting;
        self.set_up(dom);
        self.run_next(dom, host)
    }

    fn set_up(&mut self, dom: &mut Document) {
        if dom.elements_by_tag_name(markers::ANCHOR_TAG).is_empty() {
            let anchor = dom.create_element(markers::ANCHOR_TAG);
            dom.set_attribute(anchor, markers::ATTR_ANCHOR_TARGET, "true");
            let body = dom.body();
            dom.append_child(body, anchor);
        }
    }

    /// Drains the queue until it runs dry or suspends on an external
    /// load. Iterative on purpose; nested discoveries land at the cursor
    /// and are picked up by the same loop.
    pub(crate) fn run_next(&mut self, dom: &mut Document, host: &mut dyn ScriptHost) -> RunOutcome {
        loop {
            self.handle_pending_document_writes(dom);
            self.remove_current_dom_location(dom);
            match self.queue.take_next() {
                Some(Task::Inline { node, source }) => {
                    self.remove_not_processed_until(dom, Some(node));
                    self.mark_current_sentinel(dom);
                    let synthesized = self.synthesize_script_node(dom, node);
                    dom.set_attribute(synthesized, "type", "text/javascript");
                    let text = dom.create_text(&source);
                    dom.append_child(synthesized, text);
                    self.insert_at_current_location(dom, synthesized);

                    let origin = format!("inline:{}", self.queue.cursor());
                    let unit = ScriptUnit::new(source, origin);
                    let mut scope = PageScope::new(self, dom);
                    if let Err(error) = host.eval(&unit, &mut scope) {
                        self.log.caught("exception while evaluating", &error);
                    }
                    self.log.info(format!("evaluated: {}", unit.origin));
                }
                Some(Task::External { node, url }) => {
                    self.remove_not_processed_until(dom, Some(node));
                    self.mark_current_sentinel(dom);
                    let synthesized = self.synthesize_script_node(dom, node);
                    dom.set_attribute(synthesized, "type", "text/javascript");
                    dom.set_attribute(synthesized, "src", &url);
                    // A src script with body text keeps an equivalent
                    // text child; the text is never executed.
                    let body_text = dom.text_content(node);
                    if !body_text.is_empty() {
                        let text = dom.create_text(&body_text);
                        dom.append_child(synthesized, text);
                    }
                    self.insert_at_current_location(dom, synthesized);
                    self.pending_external = Some(PendingExternal { url: url.clone() });
                    return RunOutcome::AwaitingScriptLoad { url };
                }
                None => {
                    if self.last_incremental_run {
                        self.state = EngineState::SyncScriptsDone;
                        self.remove_not_processed_until(dom, None);
                        self.fire_event(dom, host, EventPhase::DomReady);
                        if self.can_call_on_complete(dom) {
                            self.on_complete();
                        }
                    } else {
                        self.on_complete();
                    }
                    return RunOutcome::Idle;
                }
            }
        }
    }

    /// Resumes a drain suspended on an external script: `Ok` evaluates
    /// the fetched source, `Err` logs the load failure; either way the
    /// queue proceeds, matching onload/onerror semantics.
    pub fn resolve_script_load(
        &mut self,
        dom: &mut Document,
        host: &mut dyn ScriptHost,
        result: Result<&str, EngineError>,
    ) -> RunOutcome {
        let Some(pending) = self.pending_external.take() else {
            self.log
                .warn("script load resolved with no pending external script");
            return RunOutcome::Idle;
        };
        match result {
            Ok(source) => {
                let unit = ScriptUnit::new(source, pending.url.clone());
                let mut scope = PageScope::new(self, dom);
                if let Err(error) = host.eval(&unit, &mut scope) {
                    self.log.caught("exception while evaluating", &error);
                }
                self.log.info(format!("executed: {}", pending.url));
            }
            Err(error) => {
                self.log.caught("external script failed", &error);
            }
        }
        self.run_next(dom, host)
    }

    /// Load/error notification for a script element created through the
    /// facade (either the no-defer gate list or the dynamic list).
    pub fn notify_script_event(
        &mut self,
        dom: &mut Document,
        host: &mut dyn ScriptHost,
        node: NodeId,
    ) -> RunOutcome {
        if let Some(index) = self.no_defer_scripts.iter().position(|id| *id == node) {
            self.no_defer_scripts.remove(index);
            return self.execute(dom, host);
        }
        if let Some(index) = self.dynamic_scripts.iter().position(|id| *id == node) {
            self.dynamic_scripts.remove(index);
            if self.can_call_on_complete(dom) {
                self.on_complete();
            }
        }
        RunOutcome::Idle
    }

    // ----- completion ---------------------------------------------------

    /// Scripts in `list` that will never signal load or error. Which
    /// rule applies is a browser quirk.
    fn scripts_without_load_signal(&self, dom: &Document, list: &[NodeId]) -> usize {
        list.iter()
            .filter(|node| {
                let src_empty = !non_empty_attr_present(dom, **node, "src");
                if self.quirks.script_load_requires_connected {
                    !dom.is_connected(**node) || src_empty
                } else {
                    dom.parent(**node).is_none()
                        || (src_empty && dom.text_content(**node).is_empty())
                }
            })
            .count()
    }

    fn can_call_on_complete(&self, dom: &Document) -> bool {
        if self.state != EngineState::SyncScriptsDone {
            return false;
        }
        let signal_less = if self.dynamic_scripts.is_empty() {
            0
        } else {
            self.scripts_without_load_signal(dom, &self.dynamic_scripts)
        };
        self.dynamic_scripts.len() == signal_less
    }

    fn on_complete(&mut self) {
        if self.state >= EngineState::WaitingForOnload {
            return;
        }
        // Restoration point: the facade reverts to raw DOM behavior
        // exactly once.
        self.dispatch = DomDispatch::Passthrough;
        if self.last_incremental_run {
            self.state = EngineState::WaitingForOnload;
            self.notice = Some(match self.priority {
                EnginePriority::Low => Notice::ReadyForOnload,
                EnginePriority::High => Notice::HandoffToLow {
                    callback: self.incremental_done_callback.take(),
                    last_index: self.last_index,
                },
            });
        } else {
            self.state = EngineState::WaitingForNextRun;
            self.first_incremental_run = false;
            self.notice = Some(match self.priority {
                EnginePriority::Low => Notice::IncrementalPassDone {
                    callback: self.incremental_done_callback.take(),
                },
                EnginePriority::High => Notice::HandoffToLow {
                    callback: self.incremental_done_callback.take(),
                    last_index: self.last_index,
                },
            });
        }
    }

    /// Fires the load phase listeners.
    pub(crate) fn fire_load_phase(&mut self, dom: &mut Document, host: &mut dyn ScriptHost) {
        self.fire_event(dom, host, EventPhase::Load);
    }

    /// Marks the engine terminal and fires the after-scripts phase.
    pub(crate) fn finish(&mut self, dom: &mut Document, host: &mut dyn ScriptHost) {
        self.state = EngineState::ScriptsDone;
        self.fire_event(dom, host, EventPhase::AfterScripts);
    }

    /// Buffers load-phase listeners for elements whose inline onload
    /// handlers were deferred by the rewriter.
    pub(crate) fn add_deferred_onload_listeners(&mut self, dom: &Document) {
        for node in dom.elements_with_attribute(markers::ATTR_DEFERRED_ONLOAD) {
            if !dom.has_attribute(node, markers::ATTR_LOADED) {
                continue;
            }
            let Some(source) = dom.attribute(node, markers::ATTR_DEFERRED_ONLOAD) else {
                continue;
            };
            self.listeners.buffer(
                EventPhase::Load,
                EventTarget::Document,
                Listener::HandlerSource {
                    origin: "deferred-onload".to_owned(),
                    source: source.to_owned(),
                },
            );
        }
    }

    // ----- events -------------------------------------------------------

    /// Registers a lifecycle or native listener, emulating the patched
    /// `addEventListener`.
    pub fn add_event_listener(
        &mut self,
        target: EventTarget,
        event_name: &str,
        listener: Listener,
    ) {
        if self.state >= EngineState::WaitingForOnload {
            self.listeners.register_native(target, event_name, listener);
            return;
        }
        match classify_event(event_name, self.event_state) {
            ListenerRoute::Buffer(phase) => self.listeners.buffer(phase, target, listener),
            ListenerRoute::Native => self.listeners.register_native(target, event_name, listener),
        }
    }

    /// Runs as the first thing once this engine starts draining.
    pub fn add_before_defer_run_function(
        &mut self,
        listener: Box<dyn FnMut(&SyntheticEvent) -> EngineResult<()>>,
    ) {
        self.add_event_listener(
            EventTarget::Window,
            "onbeforescripts",
            Listener::Native(listener),
        );
    }

    /// Runs after the deferred scripts, DOM-ready and load listeners.
    pub fn add_after_defer_run_function(
        &mut self,
        listener: Box<dyn FnMut(&SyntheticEvent) -> EngineResult<()>>,
    ) {
        self.add_event_listener(
            EventTarget::Window,
            "onafterscripts",
            Listener::Native(listener),
        );
    }

    /// Advances the event state and invokes every listener buffered for
    /// `phase`, in registration order. Listener failures are logged and
    /// do not stop the remaining listeners.
    pub(crate) fn fire_event(
        &mut self,
        dom: &mut Document,
        host: &mut dyn ScriptHost,
        phase: EventPhase,
    ) {
        self.event_state = phase;
        self.log.info(format!("firing event: {}", phase.event_type()));
        for buffered in self.listeners.drain_phase(phase) {
            let event = SyntheticEvent::at_target(phase, buffered.target);
            let result = match buffered.listener {
                Listener::Native(mut callback) => callback(&event),
                Listener::Hosted(token) => {
                    let mut scope = PageScope::new(self, dom);
                    host.invoke_listener(token, &event, &mut scope)
                }
                Listener::HandlerSource { origin, source } => {
                    let unit = ScriptUnit::new(source, origin);
                    let mut scope = PageScope::new(self, dom);
                    host.eval(&unit, &mut scope)
                }
            };
            if let Err(error) = result {
                self.log.caught("exception in listener", &error);
            }
        }
    }

    // ----- facade -------------------------------------------------------

    pub(crate) fn facade_write(&mut self, dom: &mut Document, html: &str) {
        match self.dispatch {
            DomDispatch::Intercepting => {
                self.log.info(format!("dw: {html}"));
                self.document_write_html.push_str(html);
            }
            DomDispatch::Passthrough => {
                let body = dom.body();
                HtmlParser.parse_into(dom, body, html);
            }
        }
    }

    pub(crate) fn facade_get_element_by_id(
        &mut self,
        dom: &mut Document,
        id: &str,
    ) -> Option<NodeId> {
        if self.dispatch == DomDispatch::Passthrough {
            return dom.get_element_by_id(id);
        }
        self.handle_pending_document_writes(dom);
        let node = dom.get_element_by_id(id)?;
        if dom.has_attribute(node, self.markers.not_processed_attr) {
            None
        } else {
            Some(node)
        }
    }

    pub(crate) fn facade_get_elements_by_tag_name(
        &mut self,
        dom: &mut Document,
        tag: &str,
    ) -> Vec<NodeId> {
        if self.dispatch == DomDispatch::Intercepting && self.quirks.supports_selector_filtering {
            return dom
                .elements_by_tag_name(tag)
                .into_iter()
                .filter(|node| !dom.has_attribute(*node, self.markers.not_processed_attr))
                .collect();
        }
        dom.elements_by_tag_name(tag)
    }

    pub(crate) fn facade_create_element(&mut self, dom: &mut Document, tag: &str) -> NodeId {
        let node = dom.create_element(tag);
        if self.dispatch == DomDispatch::Intercepting && tag.eq_ignore_ascii_case("script") {
            if self.state < EngineState::ScriptsExecuting {
                self.no_defer_scripts.push(node);
            } else {
                self.dynamic_scripts.push(node);
            }
        }
        node
    }

    pub(crate) fn ready_state(&self) -> &'static str {
        if self.dispatch == DomDispatch::Passthrough {
            "complete"
        } else if self.state >= EngineState::SyncScriptsDone {
            "interactive"
        } else {
            "loading"
        }
    }

    // ----- document.write replay ----------------------------------------

    /// Renders buffered `document.write` output before the current
    /// location, splicing any scripts it contains ahead of the next
    /// queued task.
    pub(crate) fn handle_pending_document_writes(&mut self, dom: &mut Document) {
        if self.document_write_html.is_empty() {
            return;
        }
        // Reset before parsing: insertion can re-enter here.
        let html = std::mem::take(&mut self.document_write_html);
        self.log.info(format!("handle_dw: {html}"));
        let context = self.current_dom_location(dom);
        self.insert_html(dom, &html, self.queue.cursor(), context);
    }

    fn insert_html(
        &mut self,
        dom: &mut Document,
        html: &str,
        position: usize,
        context: Option<NodeId>,
    ) {
        let container = dom.create_element("div");
        HtmlParser.parse_into(dom, container, html);

        let mut script_nodes = Vec::new();
        self.mark_nodes_and_extract_script_nodes(dom, container, &mut script_nodes);

        match context {
            Some(reference) => {
                for child in dom.children(container).to_owned() {
                    dom.insert_before(child, reference);
                }
            }
            None => {
                self.log.warn("unable to insert nodes, no context element found");
            }
        }

        for (offset, script) in script_nodes.iter().enumerate() {
            self.add_node(dom, *script, Some(position + offset), offset > 0);
        }
    }

    /// Depth-first over parsed content: sentinel-marks JavaScript nodes
    /// (so natural execution can never pick them up) and collects them.
    fn mark_nodes_and_extract_script_nodes(
        &mut self,
        dom: &mut Document,
        node: NodeId,
        script_nodes: &mut Vec<NodeId>,
    ) {
        for child in dom.children(node).to_owned() {
            if dom.tag_name(child) == Some("script") {
                if is_js_node(dom, child) {
                    script_nodes.push(child);
                    let orig_type = dom.attribute(child, "type").unwrap_or("").to_owned();
                    dom.set_attribute(child, markers::ATTR_ORIG_TYPE, &orig_type);
                    dom.set_attribute(child, "type", self.markers.script_type);
                    let orig_src = dom.attribute(child, "src").unwrap_or("").to_owned();
                    dom.set_attribute(child, markers::ATTR_ORIG_SRC, &orig_src);
                    dom.set_attribute(child, "src", "");
                    dom.set_attribute(child, self.markers.not_processed_attr, "");
                }
            } else {
                self.mark_nodes_and_extract_script_nodes(dom, child, script_nodes);
            }
        }
    }

    // ----- DOM bookkeeping ----------------------------------------------

    /// Builds the node that will actually execute, copying attributes
    /// from the sentinel node except type/src/async/defer and the
    /// bookkeeping attributes, and stripping the copied ones from the
    /// sentinel so it ends up inert.
    fn synthesize_script_node(&mut self, dom: &mut Document, original: NodeId) -> NodeId {
        let excluded = [
            "type",
            "src",
            "async",
            "defer",
            markers::ATTR_ORIG_TYPE,
            markers::ATTR_ORIG_SRC,
            markers::ATTR_ORIG_INDEX,
            markers::ATTR_CURRENT_NODE,
            self.markers.not_processed_attr,
        ];
        let copied: Vec<Attribute> = dom
            .attributes(original)
            .iter()
            .filter(|attr| !excluded.contains(&attr.name.as_str()))
            .cloned()
            .collect();
        let script = dom.create_element("script");
        for attr in copied {
            dom.set_attribute(script, &attr.name, &attr.value);
            dom.remove_attribute(original, &attr.name);
        }
        script
    }

    /// Marks the next sentinel node of this engine's type as the current
    /// insertion location.
    fn mark_current_sentinel(&mut self, dom: &mut Document) {
        if let Some(node) = dom.first_with_attribute_value("type", self.markers.script_type) {
            dom.set_attribute(node, markers::ATTR_CURRENT_NODE, "");
        }
    }

    /// Where synthesized output goes: the node carrying the current-node
    /// marker, falling back to the `psanode` anchor.
    fn current_dom_location(&self, dom: &Document) -> Option<NodeId> {
        dom.elements_with_attribute(markers::ATTR_CURRENT_NODE)
            .first()
            .copied()
            .or_else(|| {
                dom.elements_by_tag_name(markers::ANCHOR_TAG)
                    .first()
                    .copied()
            })
    }

    fn insert_at_current_location(&mut self, dom: &mut Document, node: NodeId) {
        match self.current_dom_location(dom) {
            Some(reference) => dom.insert_before(node, reference),
            None => {
                let body = dom.body();
                dom.append_child(body, node);
            }
        }
    }

    /// Removes the processed sentinel script at the current location;
    /// the anchor itself is never removed here.
    fn remove_current_dom_location(&mut self, dom: &mut Document) {
        if let Some(node) = self.current_dom_location(dom) {
            if dom.tag_name(node) == Some("script") {
                dom.detach(node);
            }
        }
    }

    /// Strips this engine's not-processed marker from elements up to
    /// (but not past) `stop`, so content ahead of the cursor becomes
    /// visible while unexecuted script blocks stay hidden.
    fn remove_not_processed_until(&mut self, dom: &mut Document, stop: Option<NodeId>) {
        if !self.quirks.supports_selector_filtering {
            return;
        }
        for node in dom.elements_with_attribute(self.markers.not_processed_attr) {
            if Some(node) == stop {
                return;
            }
            if dom.attribute(node, "type") != Some(self.markers.script_type) {
                dom.remove_attribute(node, self.markers.not_processed_attr);
            }
        }
    }
}

fn non_empty_attr(dom: &Document, node: NodeId, name: &str) -> Option<String> {
    dom.attribute(node, name)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn non_empty_attr_present(dom: &Document, node: NodeId, name: &str) -> bool {
    dom.attribute(node, name).is_some_and(|value| !value.is_empty())
}

/// Whether a script node holds JavaScript (by type, then language, then
/// by default).
fn is_js_node(dom: &Document, node: NodeId) -> bool {
    if dom.tag_name(node) != Some("script") {
        return false;
    }
    if let Some(script_type) = dom.attribute(node, "type") {
        return script_type.is_empty() || markers::JS_MIME_TYPES.contains(&script_type);
    }
    if let Some(language) = dom.attribute(node, "language") {
        let qualified = format!("text/{}", language.to_ascii_lowercase());
        return language.is_empty() || markers::JS_MIME_TYPES.contains(&qualified.as_str());
    }
    true
}
