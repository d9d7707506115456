//! Page-level coordinator for the two engines.
//!
//! Owns the shared document plus the high- and low-priority engines and
//! drives every cross-engine transition through returned [`Notice`]s
//! instead of shared globals: the high engine drains first, hands off to
//! the low engine, and the low engine's completion triggers the onload
//! chain.

use crate::engine::DeferJs;
use crate::engine::EngineConfig;
use crate::engine::EnginePriority;
use crate::engine::IncrementalCallback;
use crate::engine::Notice;
use crate::engine::RunOutcome;
use crate::events::SyntheticEvent;
use crate::host::ScriptHost;
use crate::markers;
use crate::markers::ScriptMarkers;
use crate::quirks::Quirks;
use crate::scope::PageScope;
use dk_core::EngineError;
use dk_core::EngineResult;
use dk_dom::Document;
use dk_dom::NodeId;

/// Page-wide knobs, applied to both engines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Allow scripts to register in several passes as HTML streams in.
    pub incremental: bool,
    pub quirks: Quirks,
}

/// What the runtime is waiting on after control returns to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeStatus {
    /// An external script fetch is outstanding; resume through
    /// [`PageRuntime::resolve_script_load`].
    AwaitingScriptLoad {
        priority: EnginePriority,
        url: String,
    },
    /// Scripts created during execution have not signalled load or
    /// error yet; resume through [`PageRuntime::notify_script_event`].
    AwaitingScriptEvents,
    /// An incremental batch finished; more HTML may still register
    /// scripts through [`PageRuntime::register_incremental`].
    AwaitingMoreHtml,
    /// Both engines are done and the onload chain has fired.
    Done,
}

/// The document and both engines, with the active-engine pointer that
/// decides where facade calls and load notifications go.
#[derive(Debug)]
pub struct PageRuntime {
    dom: Document,
    high: DeferJs,
    low: DeferJs,
    active: EnginePriority,
    started: bool,
}

impl PageRuntime {
    pub fn new(dom: Document) -> Self {
        Self::with_config(dom, RuntimeConfig::default())
    }

    pub fn with_config(mut dom: Document, config: RuntimeConfig) -> Self {
        let engine_config = EngineConfig {
            incremental: config.incremental,
        };
        let high = DeferJs::new(
            ScriptMarkers::high_priority(),
            EnginePriority::High,
            engine_config.clone(),
            config.quirks.clone(),
        );
        let low = DeferJs::new(
            ScriptMarkers::low_priority(),
            EnginePriority::Low,
            engine_config,
            config.quirks,
        );
        // Everything already parsed is marked before any script runs, so
        // the facade can tell pre-existing content from deferred output.
        high.set_not_processed_attribute_for_nodes(&mut dom);
        low.set_not_processed_attribute_for_nodes(&mut dom);
        Self {
            dom,
            high,
            low,
            active: EnginePriority::High,
            started: false,
        }
    }

    pub fn dom(&self) -> &Document {
        &self.dom
    }

    pub fn dom_mut(&mut self) -> &mut Document {
        &mut self.dom
    }

    pub fn active(&self) -> EnginePriority {
        self.active
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn engine(&self, priority: EnginePriority) -> &DeferJs {
        match priority {
            EnginePriority::High => &self.high,
            EnginePriority::Low => &self.low,
        }
    }

    /// Facade over the active engine and the document, for host
    /// integrations that replay page calls between drains.
    pub fn scope(&mut self) -> PageScope<'_> {
        match self.active {
            EnginePriority::High => PageScope::new(&mut self.high, &mut self.dom),
            EnginePriority::Low => PageScope::new(&mut self.low, &mut self.dom),
        }
    }

    /// Runs as the first thing before any deferred script.
    pub fn add_before_run_function(
        &mut self,
        listener: Box<dyn FnMut(&SyntheticEvent) -> EngineResult<()>>,
    ) {
        self.high.add_before_defer_run_function(listener);
    }

    /// Runs after every deferred script and the emulated lifecycle.
    pub fn add_after_run_function(
        &mut self,
        listener: Box<dyn FnMut(&SyntheticEvent) -> EngineResult<()>>,
    ) {
        self.low.add_after_defer_run_function(listener);
    }

    /// Registers and starts draining the high-priority scripts. A second
    /// call does not restart anything.
    pub fn start(&mut self, host: &mut dyn ScriptHost) -> RuntimeStatus {
        if self.started {
            return self.idle_status();
        }
        self.register_final(host)
    }

    /// Registers the final (or only) batch, with no callback: everything
    /// still marked runs and the normal completion chain follows.
    pub fn register_final(&mut self, host: &mut dyn ScriptHost) -> RuntimeStatus {
        self.started = true;
        let outcome = match self.active {
            EnginePriority::High => {
                self.high.register_script_tags(&mut self.dom, None, None);
                self.high.execute(&mut self.dom, host)
            }
            EnginePriority::Low => {
                self.low.register_script_tags(&mut self.dom, None, None);
                self.low.execute(&mut self.dom, host)
            }
        };
        self.settle(outcome, host)
    }

    /// Registers the next incremental batch on the active engine: only
    /// scripts recorded at or before `last_index` run now, and
    /// `callback` fires once they have.
    pub fn register_incremental(
        &mut self,
        host: &mut dyn ScriptHost,
        callback: IncrementalCallback,
        last_index: i64,
    ) -> RuntimeStatus {
        self.started = true;
        let outcome = match self.active {
            EnginePriority::High => {
                self.high
                    .register_script_tags(&mut self.dom, Some(callback), Some(last_index));
                self.high.execute(&mut self.dom, host)
            }
            EnginePriority::Low => {
                self.low
                    .register_script_tags(&mut self.dom, Some(callback), Some(last_index));
                self.low.execute(&mut self.dom, host)
            }
        };
        self.settle(outcome, host)
    }

    /// Resolves the external script fetch the active engine suspended
    /// on, then keeps pumping.
    pub fn resolve_script_load(
        &mut self,
        host: &mut dyn ScriptHost,
        result: Result<&str, EngineError>,
    ) -> RuntimeStatus {
        let outcome = match self.active {
            EnginePriority::High => self.high.resolve_script_load(&mut self.dom, host, result),
            EnginePriority::Low => self.low.resolve_script_load(&mut self.dom, host, result),
        };
        self.settle(outcome, host)
    }

    /// Reports load or error for a script element created through the
    /// facade.
    pub fn notify_script_event(&mut self, host: &mut dyn ScriptHost, node: NodeId) -> RuntimeStatus {
        let outcome = match self.active {
            EnginePriority::High => self.high.notify_script_event(&mut self.dom, host, node),
            EnginePriority::Low => self.low.notify_script_event(&mut self.dom, host, node),
        };
        self.settle(outcome, host)
    }

    fn settle(&mut self, outcome: RunOutcome, host: &mut dyn ScriptHost) -> RuntimeStatus {
        if let RunOutcome::AwaitingScriptLoad { url } = outcome {
            return RuntimeStatus::AwaitingScriptLoad {
                priority: self.active,
                url,
            };
        }
        self.pump(host)
    }

    /// Consumes completion notices until the page either finishes or
    /// has to wait on the caller.
    fn pump(&mut self, host: &mut dyn ScriptHost) -> RuntimeStatus {
        loop {
            let notice = match self.active {
                EnginePriority::High => self.high.take_notice(),
                EnginePriority::Low => self.low.take_notice(),
            };
            let Some(notice) = notice else {
                return self.idle_status();
            };
            match notice {
                Notice::HandoffToLow {
                    callback,
                    last_index,
                } => {
                    self.active = EnginePriority::Low;
                    self.low
                        .register_script_tags(&mut self.dom, callback, last_index);
                    if let RunOutcome::AwaitingScriptLoad { url } =
                        self.low.execute(&mut self.dom, host)
                    {
                        return RuntimeStatus::AwaitingScriptLoad {
                            priority: EnginePriority::Low,
                            url,
                        };
                    }
                }
                Notice::ReadyForOnload => {
                    self.fire_onload_chain(host);
                    return RuntimeStatus::Done;
                }
                Notice::IncrementalPassDone { callback } => {
                    // The next batch registers on the high engine again.
                    self.active = EnginePriority::High;
                    if let Some(callback) = callback {
                        callback();
                    }
                    return RuntimeStatus::AwaitingMoreHtml;
                }
            }
        }
    }

    /// The emulated onload: deferred element onloads are collected,
    /// the high engine finishes first, then the low engine fires its
    /// load listeners, the bookkeeping nodes are cleaned out of the
    /// document, and the low engine goes terminal.
    fn fire_onload_chain(&mut self, host: &mut dyn ScriptHost) {
        self.low.add_deferred_onload_listeners(&self.dom);

        self.high.fire_load_phase(&mut self.dom, host);
        self.high.finish(&mut self.dom, host);

        self.low.fire_load_phase(&mut self.dom, host);
        self.cleanup_bookkeeping_nodes();
        self.low.finish(&mut self.dom, host);
    }

    /// Detaches the insertion anchors and prefetch hints the engines
    /// added while running.
    fn cleanup_bookkeeping_nodes(&mut self) {
        for node in self.dom.elements_by_tag_name(markers::ANCHOR_TAG) {
            self.dom.detach(node);
        }
        let prefetch: Vec<NodeId> = self
            .dom
            .elements_by_tag_name("*")
            .into_iter()
            .filter(|node| {
                self.dom.attribute(*node, "class") == Some(markers::PREFETCH_CONTAINER_CLASS)
            })
            .collect();
        for node in prefetch {
            self.dom.detach(node);
        }
    }

    fn idle_status(&self) -> RuntimeStatus {
        if self.low.scripts_are_done() {
            RuntimeStatus::Done
        } else {
            RuntimeStatus::AwaitingScriptEvents
        }
    }
}
