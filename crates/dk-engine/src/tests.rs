//! End-to-end scenarios driving the page runtime against small
//! documents.

use crate::EnginePriority;
use crate::EventTarget;
use crate::Listener;
use crate::ListenerToken;
use crate::PageRuntime;
use crate::PageScope;
use crate::Quirks;
use crate::RuntimeConfig;
use crate::RuntimeStatus;
use crate::ScriptHost;
use crate::ScriptUnit;
use crate::SyntheticEvent;
use dk_core::EngineError;
use dk_core::EngineResult;
use dk_dom::Document;
use dk_html::HtmlParser;
use std::cell::RefCell;
use std::rc::Rc;

type EvalHook = Box<dyn FnMut(&ScriptUnit, &mut PageScope<'_>) -> EngineResult<()>>;

/// Host that records everything it is asked to evaluate, with an
/// optional per-eval hook for scripts that need side effects.
struct TestHost {
    evaluated: Rc<RefCell<Vec<String>>>,
    on_eval: Option<EvalHook>,
}

impl TestHost {
    fn new() -> (Self, Rc<RefCell<Vec<String>>>) {
        let evaluated = Rc::new(RefCell::new(Vec::new()));
        (
            Self {
                evaluated: Rc::clone(&evaluated),
                on_eval: None,
            },
            evaluated,
        )
    }

    fn with_hook(hook: EvalHook) -> (Self, Rc<RefCell<Vec<String>>>) {
        let (mut host, evaluated) = Self::new();
        host.on_eval = Some(hook);
        (host, evaluated)
    }
}

impl ScriptHost for TestHost {
    fn eval(&mut self, unit: &ScriptUnit, scope: &mut PageScope<'_>) -> EngineResult<()> {
        self.evaluated.borrow_mut().push(unit.source.clone());
        match self.on_eval.as_mut() {
            Some(hook) => hook(unit, scope),
            None => Ok(()),
        }
    }

    fn invoke_listener(
        &mut self,
        token: ListenerToken,
        event: &SyntheticEvent,
        _scope: &mut PageScope<'_>,
    ) -> EngineResult<()> {
        self.evaluated
            .borrow_mut()
            .push(format!("listener#{}:{}", token.0, event.event_type));
        Ok(())
    }
}

fn page(body: &str) -> Document {
    let mut dom = Document::new();
    let root = dom.root();
    HtmlParser.parse_into(
        &mut dom,
        root,
        &format!("<html><head></head><body>{body}</body></html>"),
    );
    dom
}

fn evaluated(log: &Rc<RefCell<Vec<String>>>) -> Vec<String> {
    log.borrow().clone()
}

#[test]
fn priority_scripts_run_before_deferred_scripts_regardless_of_position() {
    let dom = page(concat!(
        r#"<script type="text/psajs">low1</script>"#,
        r#"<script type="text/prioritypsajs">high1</script>"#,
        r#"<script type="text/psajs">low2</script>"#,
        r#"<script type="text/prioritypsajs">high2</script>"#,
    ));
    let mut runtime = PageRuntime::new(dom);
    let (mut host, log) = TestHost::new();

    let status = runtime.start(&mut host);

    assert_eq!(status, RuntimeStatus::Done);
    assert_eq!(evaluated(&log), ["high1", "high2", "low1", "low2"]);
    assert!(runtime.engine(EnginePriority::High).scripts_are_done());
    assert!(runtime.engine(EnginePriority::Low).scripts_are_done());
}

#[test]
fn external_scripts_suspend_the_drain_and_resume_in_order() {
    let dom = page(concat!(
        r#"<script type="text/psajs">first</script>"#,
        r#"<script type="text/psajs" src="https://cdn.test/x.js"></script>"#,
        r#"<script type="text/psajs">last</script>"#,
    ));
    let mut runtime = PageRuntime::new(dom);
    let (mut host, log) = TestHost::new();

    let status = runtime.start(&mut host);
    assert_eq!(
        status,
        RuntimeStatus::AwaitingScriptLoad {
            priority: EnginePriority::Low,
            url: "https://cdn.test/x.js".to_owned(),
        }
    );
    assert_eq!(evaluated(&log), ["first"]);

    let status = runtime.resolve_script_load(&mut host, Ok("fetched body"));
    assert_eq!(status, RuntimeStatus::Done);
    assert_eq!(evaluated(&log), ["first", "fetched body", "last"]);
}

#[test]
fn failed_external_load_is_logged_and_does_not_stall_the_queue() {
    let dom = page(concat!(
        r#"<script type="text/psajs">first</script>"#,
        r#"<script type="text/psajs" src="https://cdn.test/missing.js"></script>"#,
        r#"<script type="text/psajs">last</script>"#,
    ));
    let mut runtime = PageRuntime::new(dom);
    let (mut host, log) = TestHost::new();

    runtime.start(&mut host);
    let status =
        runtime.resolve_script_load(&mut host, Err(EngineError::new("net.fetch", "status 404")));

    assert_eq!(status, RuntimeStatus::Done);
    assert_eq!(evaluated(&log), ["first", "last"]);
    assert!(
        runtime
            .engine(EnginePriority::Low)
            .logs()
            .contains("external script failed")
    );
}

#[test]
fn a_throwing_script_does_not_stop_the_scripts_after_it() {
    let dom = page(concat!(
        r#"<script type="text/psajs">ok1</script>"#,
        r#"<script type="text/psajs">boom</script>"#,
        r#"<script type="text/psajs">ok2</script>"#,
    ));
    let mut runtime = PageRuntime::new(dom);
    let (mut host, log) = TestHost::with_hook(Box::new(|unit, _scope| {
        if unit.source == "boom" {
            return Err(EngineError::new("js.eval", "deliberate failure"));
        }
        Ok(())
    }));

    let status = runtime.start(&mut host);

    assert_eq!(status, RuntimeStatus::Done);
    assert_eq!(evaluated(&log), ["ok1", "boom", "ok2"]);
    assert!(
        runtime
            .engine(EnginePriority::Low)
            .logs()
            .contains("exception while evaluating")
    );
}

#[test]
fn document_write_output_splices_before_later_scripts() {
    let dom = page(concat!(
        r#"<script type="text/psajs">writer</script>"#,
        r#"<script type="text/psajs">tail</script>"#,
    ));
    let mut runtime = PageRuntime::new(dom);
    let (mut host, log) = TestHost::with_hook(Box::new(|unit, scope| {
        if unit.source == "writer" {
            scope.document_write(r#"<div id="written"></div><script>spliced</script>"#);
        }
        Ok(())
    }));

    let status = runtime.start(&mut host);

    assert_eq!(status, RuntimeStatus::Done);
    assert_eq!(evaluated(&log), ["writer", "spliced", "tail"]);
    // The non-script output landed in the document.
    let written = runtime.dom().get_element_by_id("written");
    assert!(written.is_some_and(|node| runtime.dom().is_connected(node)));
}

#[test]
fn lifecycle_hooks_fire_once_each_in_phase_order() {
    let dom = page(r#"<script type="text/psajs">only</script>"#);
    let mut runtime = PageRuntime::new(dom);
    let fired = Rc::new(RefCell::new(Vec::new()));

    let sink = Rc::clone(&fired);
    runtime.add_before_run_function(Box::new(move |event| {
        sink.borrow_mut().push(format!("before:{}", event.event_type));
        Ok(())
    }));
    let sink = Rc::clone(&fired);
    runtime.add_after_run_function(Box::new(move |event| {
        sink.borrow_mut().push(format!("after:{}", event.event_type));
        Ok(())
    }));
    let sink = Rc::clone(&fired);
    runtime.scope().add_event_listener(
        EventTarget::Document,
        "DOMContentLoaded",
        Listener::Native(Box::new(move |event| {
            sink.borrow_mut().push(format!("ready:{}", event.event_type));
            Ok(())
        })),
    );

    let (mut host, _log) = TestHost::new();
    let status = runtime.start(&mut host);

    assert_eq!(status, RuntimeStatus::Done);
    assert_eq!(
        fired.borrow().as_slice(),
        [
            "before:beforescripts",
            "ready:DOMContentLoaded",
            "after:afterscripts",
        ]
    );
}

#[test]
fn listeners_added_after_completion_fall_through_to_native() {
    let dom = page(r#"<script type="text/psajs">only</script>"#);
    let mut runtime = PageRuntime::new(dom);
    let (mut host, _log) = TestHost::new();
    assert_eq!(runtime.start(&mut host), RuntimeStatus::Done);

    runtime.scope().add_event_listener(
        EventTarget::Document,
        "DOMContentLoaded",
        Listener::Native(Box::new(|_| Ok(()))),
    );

    let native = runtime.engine(EnginePriority::Low).native_registrations();
    assert_eq!(native.len(), 1);
    assert_eq!(native[0].event_name, "DOMContentLoaded");
}

#[test]
fn dynamically_created_scripts_gate_completion_until_they_signal() {
    let dom = page(r#"<script type="text/psajs">maker</script>"#);
    let mut runtime = PageRuntime::new(dom);
    let created = Rc::new(RefCell::new(None));

    let slot = Rc::clone(&created);
    let (mut host, _log) = TestHost::with_hook(Box::new(move |unit, scope| {
        if unit.source == "maker" {
            let script = scope.create_element("script");
            let body = scope.dom().body();
            scope.dom().set_attribute(script, "src", "https://cdn.test/dyn.js");
            scope.dom().append_child(body, script);
            *slot.borrow_mut() = Some(script);
        }
        Ok(())
    }));

    let status = runtime.start(&mut host);
    assert_eq!(status, RuntimeStatus::AwaitingScriptEvents);
    assert!(created.borrow().is_some());

    let node = created.borrow().unwrap_or(0);
    let status = runtime.notify_script_event(&mut host, node);
    assert_eq!(status, RuntimeStatus::Done);
}

#[test]
fn scripts_created_before_the_run_gate_the_start() {
    let dom = page(r#"<script type="text/psajs">deferred</script>"#);
    let mut runtime = PageRuntime::new(dom);
    let (mut host, log) = TestHost::new();

    // Page code creates an async script before deferred execution
    // starts; the run must wait for its load signal.
    let pending = {
        let mut scope = runtime.scope();
        let script = scope.create_element("script");
        let body = scope.dom().body();
        scope.dom().set_attribute(script, "src", "https://cdn.test/async.js");
        scope.dom().append_child(body, script);
        script
    };

    let status = runtime.start(&mut host);
    assert_eq!(status, RuntimeStatus::AwaitingScriptEvents);
    assert!(evaluated(&log).is_empty());

    let status = runtime.notify_script_event(&mut host, pending);
    assert_eq!(status, RuntimeStatus::Done);
    assert_eq!(evaluated(&log), ["deferred"]);
}

#[test]
fn unreached_content_is_hidden_while_executing_and_visible_after() {
    let dom = page(concat!(
        r#"<script type="text/psajs">peek</script>"#,
        r#"<div id="later"></div>"#,
    ));
    let mut runtime = PageRuntime::new(dom);
    let seen = Rc::new(RefCell::new(Vec::new()));

    let sink = Rc::clone(&seen);
    let (mut host, _log) = TestHost::with_hook(Box::new(move |unit, scope| {
        if unit.source == "peek" {
            sink.borrow_mut()
                .push(format!("by_id:{}", scope.get_element_by_id("later").is_some()));
            sink.borrow_mut()
                .push(format!("ready_state:{}", scope.ready_state()));
        }
        Ok(())
    }));

    assert_eq!(runtime.start(&mut host), RuntimeStatus::Done);
    assert_eq!(seen.borrow().as_slice(), ["by_id:false", "ready_state:loading"]);
    // Restored facade behaves like the raw DOM.
    assert!(runtime.scope().get_element_by_id("later").is_some());
    assert_eq!(runtime.scope().ready_state(), "complete");
}

#[test]
fn bookkeeping_nodes_are_cleaned_up_after_onload() {
    let dom = page(concat!(
        r#"<script type="text/psajs" src="https://cdn.test/a.js"></script>"#,
        r#"<script type="text/psajs" src="https://cdn.test/b.js"></script>"#,
    ));
    let mut runtime = PageRuntime::new(dom);
    let (mut host, _log) = TestHost::new();

    runtime.start(&mut host);
    // Mid-run the insertion anchor and the prefetch hint for the second
    // script are present.
    assert!(!runtime.dom().elements_by_tag_name("psanode").is_empty());
    assert!(has_prefetch_container(runtime.dom()));

    runtime.resolve_script_load(&mut host, Ok("a"));
    let status = runtime.resolve_script_load(&mut host, Ok("b"));

    assert_eq!(status, RuntimeStatus::Done);
    assert!(runtime.dom().elements_by_tag_name("psanode").is_empty());
    assert!(!has_prefetch_container(runtime.dom()));
}

fn has_prefetch_container(dom: &Document) -> bool {
    dom.elements_by_tag_name("*")
        .into_iter()
        .any(|node| dom.attribute(node, "class") == Some("psa_prefetch_container"))
}

#[test]
fn deferred_element_onload_handlers_replay_during_the_load_phase() {
    let dom = page(concat!(
        r#"<img data-pagespeed-onload="imgHandler()" data-pagespeed-loaded="1">"#,
        r#"<script type="text/psajs">body</script>"#,
    ));
    let mut runtime = PageRuntime::new(dom);
    let (mut host, log) = TestHost::new();

    let status = runtime.start(&mut host);

    assert_eq!(status, RuntimeStatus::Done);
    assert_eq!(evaluated(&log), ["body", "imgHandler()"]);
}

#[test]
fn incremental_batches_execute_as_html_arrives() {
    let dom = page(concat!(
        r#"<script type="text/psajs" data-pagespeed-orig-index="0">one</script>"#,
    ));
    let config = RuntimeConfig {
        incremental: true,
        quirks: Quirks::default(),
    };
    let mut runtime = PageRuntime::with_config(dom, config);
    let (mut host, log) = TestHost::new();
    let batches = Rc::new(RefCell::new(Vec::new()));

    let sink = Rc::clone(&batches);
    let status = runtime.register_incremental(
        &mut host,
        Box::new(move || sink.borrow_mut().push("batch1")),
        0,
    );
    assert_eq!(status, RuntimeStatus::AwaitingMoreHtml);
    assert_eq!(evaluated(&log), ["one"]);
    assert_eq!(batches.borrow().as_slice(), ["batch1"]);

    // The next chunk of the page arrives.
    let body = runtime.dom().body();
    HtmlParser.parse_into(
        runtime.dom_mut(),
        body,
        r#"<script type="text/psajs" data-pagespeed-orig-index="1">two</script>"#,
    );

    let status = runtime.register_final(&mut host);
    assert_eq!(status, RuntimeStatus::Done);
    assert_eq!(evaluated(&log), ["one", "two"]);
}

#[test]
fn a_straggler_below_the_flushed_index_warns_and_still_runs() {
    let dom = page(r#"<script type="text/psajs" data-pagespeed-orig-index="5">five</script>"#);
    let config = RuntimeConfig {
        incremental: true,
        quirks: Quirks::default(),
    };
    let mut runtime = PageRuntime::with_config(dom, config);
    let (mut host, log) = TestHost::new();

    let status = runtime.register_incremental(&mut host, Box::new(|| {}), 5);
    assert_eq!(status, RuntimeStatus::AwaitingMoreHtml);
    assert_eq!(evaluated(&log), ["five"]);

    // A script the rewriter indexed earlier arrives after the batch
    // that should have contained it.
    let body = runtime.dom().body();
    HtmlParser.parse_into(
        runtime.dom_mut(),
        body,
        r#"<script type="text/psajs" data-pagespeed-orig-index="2">two</script>"#,
    );

    let status = runtime.register_final(&mut host);
    assert_eq!(status, RuntimeStatus::Done);
    assert_eq!(evaluated(&log), ["five", "two"]);
    assert!(
        runtime
            .engine(EnginePriority::Low)
            .logs()
            .contains("executing a script twice, orig index 2")
    );
}

#[test]
fn unindexed_scripts_join_the_first_streaming_batch() {
    let dom = page(r#"<script type="text/psajs">plain</script>"#);
    let config = RuntimeConfig {
        incremental: true,
        quirks: Quirks::default(),
    };
    let mut runtime = PageRuntime::with_config(dom, config);
    let (mut host, log) = TestHost::new();

    // No recorded index counts as index zero.
    let status = runtime.register_incremental(&mut host, Box::new(|| {}), 0);
    assert_eq!(status, RuntimeStatus::AwaitingMoreHtml);
    assert_eq!(evaluated(&log), ["plain"]);

    let status = runtime.register_final(&mut host);
    assert_eq!(status, RuntimeStatus::Done);
    assert_eq!(evaluated(&log), ["plain"]);
}

#[test]
fn legacy_quirks_gate_on_inline_content_and_skip_visibility_filtering() {
    let dom = page(concat!(
        r#"<script type="text/psajs">peeker</script>"#,
        r#"<div id="later"></div>"#,
    ));
    let config = RuntimeConfig {
        incremental: false,
        quirks: Quirks::legacy(),
    };
    let mut runtime = PageRuntime::with_config(dom, config);

    // Under the legacy rule a parented script with body text promises a
    // load signal even without a src, so it must gate the start.
    let pending = {
        let mut scope = runtime.scope();
        let script = scope.create_element("script");
        let text = scope.dom().create_text("inlinePayload()");
        scope.dom().append_child(script, text);
        let body = scope.dom().body();
        scope.dom().append_child(body, script);
        script
    };

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let (mut host, log) = TestHost::with_hook(Box::new(move |unit, scope| {
        if unit.source == "peeker" {
            let divs = scope.get_elements_by_tag_name("div");
            sink.borrow_mut().push(format!("divs:{}", divs.len()));
        }
        Ok(())
    }));

    let status = runtime.start(&mut host);
    assert_eq!(status, RuntimeStatus::AwaitingScriptEvents);
    assert!(evaluated(&log).is_empty());

    let status = runtime.notify_script_event(&mut host, pending);
    assert_eq!(status, RuntimeStatus::Done);
    assert_eq!(evaluated(&log), ["peeker"]);
    // Without selector support the unprocessed div is not hidden.
    assert_eq!(seen.borrow().as_slice(), ["divs:1"]);
}

#[test]
fn starting_twice_does_not_rerun_anything() {
    let dom = page(r#"<script type="text/psajs">once</script>"#);
    let mut runtime = PageRuntime::new(dom);
    let (mut host, log) = TestHost::new();

    assert_eq!(runtime.start(&mut host), RuntimeStatus::Done);
    assert_eq!(runtime.start(&mut host), RuntimeStatus::Done);
    assert_eq!(evaluated(&log), ["once"]);
}
