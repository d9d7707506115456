//! boa-backed script host.
//!
//! One persistent JavaScript context per page, so deferred scripts share
//! globals the way sequential page scripts do. Page calls made inside
//! evaluated code (`document.write`, `addEventListener`,
//! `createElement('script')`) are captured into buffers by a bootstrap
//! shim and replayed onto the [`PageScope`] facade after every
//! evaluation; element lookups read a visibility snapshot refreshed
//! before each evaluation.

use boa_engine::Context;
use boa_engine::Source;
use dk_core::EngineError;
use dk_core::EngineResult;
use dk_dom::NodeId;
use dk_engine::EventTarget;
use dk_engine::Listener;
use dk_engine::ListenerToken;
use dk_engine::PageScope;
use dk_engine::ScriptHost;
use dk_engine::ScriptUnit;
use dk_engine::SyntheticEvent;
use std::fmt::Write;

const BOOTSTRAP_ENV: &str = r#"
globalThis.window = globalThis;
globalThis.self = globalThis;
globalThis.navigator = {
  userAgent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
  language: "en-US",
  languages: ["en-US", "en"],
  platform: "Win32"
};
globalThis.console = {
  log: function () {},
  warn: function () {},
  error: function () {}
};
globalThis.performance = {
  now: function () { return Date.now(); },
  timeOrigin: 0
};
globalThis.__dk_timer_queue = [];
globalThis.__dk_timer_cancelled = {};
globalThis.__dk_next_timer_id = 1;
globalThis.setTimeout = function (callback, _delay) {
  var cb = callback;
  if (typeof cb !== "function") {
    var src = String(callback);
    cb = function () { (0, eval)(src); };
  }
  var id = globalThis.__dk_next_timer_id++;
  globalThis.__dk_timer_queue.push({ id: id, cb: cb });
  return id;
};
globalThis.clearTimeout = function (id) {
  globalThis.__dk_timer_cancelled[String(id)] = true;
};
globalThis.setInterval = function (callback, delay) {
  return globalThis.setTimeout(callback, delay);
};
globalThis.clearInterval = globalThis.clearTimeout;
globalThis.queueMicrotask = function (callback) {
  return globalThis.setTimeout(callback, 0);
};
globalThis.__dk_flush_timers = function (limit) {
  var maxRuns = Number(limit) || 0;
  if (maxRuns < 1) {
    maxRuns = 1;
  }
  var runs = 0;
  while (globalThis.__dk_timer_queue.length > 0 && runs < maxRuns) {
    var task = globalThis.__dk_timer_queue.shift();
    if (!task) {
      continue;
    }
    var cancelled = !!globalThis.__dk_timer_cancelled[String(task.id)];
    delete globalThis.__dk_timer_cancelled[String(task.id)];
    if (!cancelled) {
      task.cb();
    }
    runs++;
  }
  return runs;
};
"#;

const PAGE_SHIM: &str = r#"
(function () {
  globalThis.__dk_writes = [];
  globalThis.__dk_registrations = [];
  globalThis.__dk_listeners = [];
  globalThis.__dk_created_scripts = [];
  globalThis.__dk_elements = {};
  globalThis.__dk_all = [];
  globalThis.__dk_ready_state = "loading";

  function register(targetName) {
    return function (type, handler) {
      if (typeof handler !== "function") {
        return;
      }
      var token = globalThis.__dk_listeners.length;
      globalThis.__dk_listeners.push(handler);
      globalThis.__dk_registrations.push({
        target: targetName,
        type: String(type || ""),
        token: token
      });
    };
  }

  function makeElement(record) {
    if (!record) {
      return null;
    }
    return {
      id: record.id,
      tagName: record.tagName,
      textContent: record.textContent,
      innerText: record.textContent,
      style: {},
      getAttribute: function (name) {
        var key = String(name);
        return Object.prototype.hasOwnProperty.call(record.attributes, key)
          ? record.attributes[key]
          : null;
      },
      addEventListener: register("document"),
      appendChild: function () {},
      removeChild: function () {}
    };
  }

  function stubContainer() {
    return {
      style: {},
      appendChild: function (child) {
        if (child && child.__dk_record) {
          child.__dk_record.appended = true;
        }
        return child;
      },
      insertBefore: function (child) {
        if (child && child.__dk_record) {
          child.__dk_record.appended = true;
        }
        return child;
      },
      addEventListener: register("document")
    };
  }

  var doc = {
    write: function (html) {
      globalThis.__dk_writes.push(String(html));
    },
    writeln: function (html) {
      globalThis.__dk_writes.push(String(html) + "\n");
    },
    open: function () {},
    close: function () {},
    getElementById: function (id) {
      if (id == null) {
        return null;
      }
      return makeElement(globalThis.__dk_elements[String(id)]);
    },
    getElementsByTagName: function (tag) {
      var name = String(tag || "").toLowerCase();
      var out = [];
      for (var i = 0; i < globalThis.__dk_all.length; i++) {
        var record = globalThis.__dk_all[i];
        if (name === "*" || record.tagName.toLowerCase() === name) {
          out.push(makeElement(record));
        }
      }
      return out;
    },
    createElement: function (tag) {
      var name = String(tag || "").toLowerCase();
      if (name !== "script") {
        return {
          tagName: name.toUpperCase(),
          style: {},
          setAttribute: function () {},
          getAttribute: function () { return null; },
          appendChild: function (child) { return child; },
          addEventListener: register("document")
        };
      }
      var record = { src: "", text: "", appended: false };
      globalThis.__dk_created_scripts.push(record);
      var el = {
        __dk_record: record,
        tagName: "SCRIPT",
        style: {},
        setAttribute: function (attrName, value) {
          if (String(attrName).toLowerCase() === "src") {
            record.src = String(value);
          }
        },
        getAttribute: function (attrName) {
          return String(attrName).toLowerCase() === "src" ? record.src : null;
        },
        appendChild: function (child) {
          if (child && typeof child.data === "string") {
            record.text += child.data;
          }
          return child;
        },
        addEventListener: function () {}
      };
      Object.defineProperty(el, "src", {
        get: function () { return record.src; },
        set: function (value) { record.src = String(value); }
      });
      Object.defineProperty(el, "text", {
        get: function () { return record.text; },
        set: function (value) { record.text = String(value); }
      });
      return el;
    },
    createTextNode: function (data) {
      return { data: String(data) };
    },
    body: stubContainer(),
    head: stubContainer(),
    documentElement: stubContainer(),
    addEventListener: register("document"),
    attachEvent: function (type, handler) {
      register("document")(String(type || "").replace(/^on/, ""), handler);
    }
  };
  Object.defineProperty(doc, "readyState", {
    get: function () { return globalThis.__dk_ready_state; }
  });

  globalThis.document = doc;
  globalThis.window.addEventListener = register("window");
  globalThis.window.attachEvent = function (type, handler) {
    register("window")(String(type || "").replace(/^on/, ""), handler);
  };

  globalThis.__dk_invoke = function (token, evt) {
    var handler = globalThis.__dk_listeners[token];
    if (typeof handler === "function") {
      handler.call(globalThis, evt || {});
    }
  };
})();
"#;

/// Runtime hardening knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub recursion_limit: usize,
    pub stack_size_limit: usize,
    pub loop_iteration_limit: u64,
    /// Timer callbacks run per evaluation.
    pub timer_flush_limit: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            recursion_limit: 64,
            stack_size_limit: 1024,
            loop_iteration_limit: 100_000,
            timer_flush_limit: 128,
        }
    }
}

impl HostConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.recursion_limit == 0 || self.stack_size_limit == 0 {
            return Err(EngineError::new(
                "js.limit_invalid",
                "recursion and stack limits must be greater than zero",
            ));
        }

        if self.loop_iteration_limit == 0 {
            return Err(EngineError::new(
                "js.limit_invalid",
                "loop iteration limit must be greater than zero",
            ));
        }

        Ok(())
    }
}

/// [`ScriptHost`] backed by a persistent boa context.
pub struct BoaScriptHost {
    config: HostConfig,
    context: Option<Context>,
    created_nodes: Vec<NodeId>,
}

impl Default for BoaScriptHost {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for BoaScriptHost {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BoaScriptHost")
            .field("config", &self.config)
            .field("initialized", &self.context.is_some())
            .field("created_nodes", &self.created_nodes.len())
            .finish()
    }
}

impl BoaScriptHost {
    pub fn new() -> Self {
        Self::with_config(HostConfig::default())
    }

    pub fn with_config(config: HostConfig) -> Self {
        Self {
            config,
            context: None,
            created_nodes: Vec::new(),
        }
    }

    /// Script nodes created by evaluated code since the last call. The
    /// driver owns delivering their load/error notifications.
    pub fn take_created_scripts(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.created_nodes)
    }

    fn ensure_context(&mut self) -> EngineResult<()> {
        if self.context.is_some() {
            return Ok(());
        }
        self.config.validate()?;
        let mut context = Context::default();
        context
            .runtime_limits_mut()
            .set_recursion_limit(self.config.recursion_limit);
        context
            .runtime_limits_mut()
            .set_stack_size_limit(self.config.stack_size_limit);
        context
            .runtime_limits_mut()
            .set_loop_iteration_limit(self.config.loop_iteration_limit);
        context
            .eval(Source::from_bytes(BOOTSTRAP_ENV.as_bytes()))
            .map_err(|error| EngineError::new("js.context", format!("bootstrap: {error}")))?;
        context
            .eval(Source::from_bytes(PAGE_SHIM.as_bytes()))
            .map_err(|error| EngineError::new("js.context", format!("page shim: {error}")))?;
        self.context = Some(context);
        Ok(())
    }

    fn eval_discard(&mut self, code: &str) -> EngineResult<()> {
        let Some(context) = self.context.as_mut() else {
            return Err(EngineError::new("js.context", "context not initialized"));
        };
        context
            .eval(Source::from_bytes(code.as_bytes()))
            .map(|_| ())
            .map_err(|error| EngineError::new("js.host", error.to_string()))
    }

    fn read_string(&mut self, expr: &str) -> Option<String> {
        let context = self.context.as_mut()?;
        let value = context.eval(Source::from_bytes(expr.as_bytes())).ok()?;
        let js_string = value.to_string(context).ok()?;
        Some(js_string.to_std_string_escaped())
    }

    fn read_count(&mut self, expr: &str) -> usize {
        self.read_string(&format!("String({expr})"))
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(0)
    }

    /// Rebuilds the element snapshot and ready-state mirror from the
    /// facade's current view.
    fn refresh_page_view(&mut self, scope: &mut PageScope<'_>) -> EngineResult<()> {
        let snapshot = build_visible_snapshot(scope);
        let ready_state = js_string_literal(scope.ready_state());
        self.eval_discard(&format!(
            "globalThis.__dk_ready_state = {ready_state}; {snapshot}"
        ))
    }

    /// Replays everything evaluated code buffered, until the buffers
    /// stay empty (inline created scripts may buffer more as they run).
    fn drain_page_effects(&mut self, scope: &mut PageScope<'_>) -> EngineResult<()> {
        for _ in 0..8 {
            if self.drain_once(scope)? == 0 {
                break;
            }
        }
        Ok(())
    }

    fn drain_once(&mut self, scope: &mut PageScope<'_>) -> EngineResult<usize> {
        let mut processed = 0;

        let writes = self.read_count("__dk_writes.length");
        for index in 0..writes {
            if let Some(html) = self.read_string(&format!("String(__dk_writes[{index}])")) {
                scope.document_write(&html);
            }
        }
        if writes > 0 {
            self.eval_discard("__dk_writes.length = 0;")?;
            processed += writes;
        }

        let registrations = self.read_count("__dk_registrations.length");
        for index in 0..registrations {
            let target = self
                .read_string(&format!("String(__dk_registrations[{index}].target)"))
                .unwrap_or_default();
            let event_name = self
                .read_string(&format!("String(__dk_registrations[{index}].type)"))
                .unwrap_or_default();
            let token = self.read_count(&format!("__dk_registrations[{index}].token"));
            let target = if target == "window" {
                EventTarget::Window
            } else {
                EventTarget::Document
            };
            scope.add_event_listener(
                target,
                &event_name,
                Listener::Hosted(ListenerToken(token as u32)),
            );
        }
        if registrations > 0 {
            self.eval_discard("__dk_registrations.length = 0;")?;
            processed += registrations;
        }

        let created = self.read_count("__dk_created_scripts.length");
        let mut inline_sources = Vec::new();
        for index in 0..created {
            let src = self
                .read_string(&format!("String(__dk_created_scripts[{index}].src)"))
                .unwrap_or_default();
            let text = self
                .read_string(&format!("String(__dk_created_scripts[{index}].text)"))
                .unwrap_or_default();
            let appended = self
                .read_string(&format!(
                    "__dk_created_scripts[{index}].appended ? \"1\" : \"0\""
                ))
                .as_deref()
                == Some("1");

            let script = scope.create_element("script");
            if !src.is_empty() {
                scope.dom().set_attribute(script, "src", &src);
            }
            if !text.is_empty() {
                let child = scope.dom().create_text(&text);
                scope.dom().append_child(script, child);
            }
            if appended {
                let body = scope.dom().body();
                scope.dom().append_child(body, script);
            }
            self.created_nodes.push(script);
            // An inserted inline script runs synchronously, like a
            // native insertion would.
            if appended && src.is_empty() && !text.is_empty() {
                inline_sources.push(text);
            }
        }
        if created > 0 {
            self.eval_discard("__dk_created_scripts.length = 0;")?;
            processed += created;
        }
        for source in inline_sources {
            if let Err(error) = self.eval_discard(&source) {
                scope.log_info(format!("inserted script failed: {error}"));
            }
        }

        Ok(processed)
    }

    fn flush_timers(&mut self) {
        let limit = self.config.timer_flush_limit;
        let _ = self.eval_discard(&format!("__dk_flush_timers({limit});"));
    }
}

impl ScriptHost for BoaScriptHost {
    fn eval(&mut self, unit: &ScriptUnit, scope: &mut PageScope<'_>) -> EngineResult<()> {
        self.ensure_context()?;
        self.refresh_page_view(scope)?;
        let failure = {
            let Some(context) = self.context.as_mut() else {
                return Err(EngineError::new("js.context", "context not initialized"));
            };
            context
                .eval(Source::from_bytes(unit.source.as_bytes()))
                .err()
                .map(|error| error.to_string())
        };
        self.flush_timers();
        self.drain_page_effects(scope)?;
        match failure {
            Some(message) => Err(EngineError::new(
                "js.eval",
                format!("{}: {message}", unit.origin),
            )),
            None => Ok(()),
        }
    }

    fn invoke_listener(
        &mut self,
        token: ListenerToken,
        event: &SyntheticEvent,
        scope: &mut PageScope<'_>,
    ) -> EngineResult<()> {
        self.ensure_context()?;
        self.refresh_page_view(scope)?;
        let code = format!(
            "__dk_invoke({}, {{ type: {}, bubbles: false, cancelable: false, eventPhase: 2, timeStamp: {} }});",
            token.0,
            js_string_literal(event.event_type),
            event.time_stamp,
        );
        let failure = {
            let Some(context) = self.context.as_mut() else {
                return Err(EngineError::new("js.context", "context not initialized"));
            };
            context
                .eval(Source::from_bytes(code.as_bytes()))
                .err()
                .map(|error| error.to_string())
        };
        self.flush_timers();
        self.drain_page_effects(scope)?;
        match failure {
            Some(message) => Err(EngineError::new(
                "js.listener",
                format!("listener {}: {message}", token.0),
            )),
            None => Ok(()),
        }
    }
}

/// Serializes the facade's visible elements into assignments for the
/// `__dk_elements` / `__dk_all` snapshot.
fn build_visible_snapshot(scope: &mut PageScope<'_>) -> String {
    let nodes = scope.get_elements_by_tag_name("*");
    let mut by_id = String::from("{");
    let mut all = String::from("[");
    let mut first_id = true;
    let mut first_all = true;
    for node in nodes {
        let dom = scope.dom_ref();
        let Some(tag) = dom.tag_name(node) else {
            continue;
        };
        let id = dom.attribute(node, "id").unwrap_or("");
        let record = build_element_record(
            id,
            &tag.to_ascii_uppercase(),
            &dom.text_content(node),
            dom.attributes(node),
        );
        if !first_all {
            all.push(',');
        }
        all.push_str(&record);
        first_all = false;
        if !id.is_empty() {
            if !first_id {
                by_id.push(',');
            }
            by_id.push_str(&format!("{}:{record}", js_string_literal(id)));
            first_id = false;
        }
    }
    by_id.push('}');
    all.push(']');
    format!("globalThis.__dk_elements = {by_id}; globalThis.__dk_all = {all};")
}

fn build_element_record(
    id: &str,
    tag_name: &str,
    text_content: &str,
    attributes: &[dk_dom::Attribute],
) -> String {
    let mut attrs = String::from("{");
    for (index, attribute) in attributes.iter().enumerate() {
        if index > 0 {
            attrs.push(',');
        }
        attrs.push_str(&format!(
            "{}:{}",
            js_string_literal(&attribute.name),
            js_string_literal(&attribute.value)
        ));
    }
    attrs.push('}');
    format!(
        "{{id:{},tagName:{},textContent:{},attributes:{attrs}}}",
        js_string_literal(id),
        js_string_literal(tag_name),
        js_string_literal(text_content)
    )
}

/// Quotes `input` as a JavaScript string literal. Control characters
/// and the line separators use `\uXXXX` escapes so the result is valid
/// in a double-quoted JavaScript string.
fn js_string_literal(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 2);
    out.push('"');
    for ch in input.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            ch if (ch as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", ch as u32);
            }
            ch => out.push(ch),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::BoaScriptHost;
    use super::js_string_literal;
    use dk_dom::Document;
    use dk_engine::PageRuntime;
    use dk_engine::RuntimeStatus;
    use dk_html::HtmlParser;

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

    #[test]
    fn deferred_scripts_share_one_global_scope() {
        let dom = page(concat!(
            r#"<script type="text/psajs">window.tally = 1;</script>"#,
            r#"<script type="text/psajs">window.tally += 1;</script>"#,
            r#"<script type="text/psajs">document.write('<p id="t' + String(window.tally) + '"></p>');</script>"#,
        ));
        let mut runtime = PageRuntime::new(dom);
        let mut host = BoaScriptHost::new();

        let status = runtime.start(&mut host);

        assert_eq!(status, RuntimeStatus::Done);
        assert!(runtime.dom().get_element_by_id("t2").is_some());
    }

    #[test]
    fn dom_ready_listener_sees_interactive_ready_state() {
        let dom = page(concat!(
            r#"<script type="text/psajs">"#,
            "document.addEventListener('DOMContentLoaded', function () {",
            "  globalThis.__seenState = document.readyState;",
            "});",
            r#"</script>"#,
        ));
        let mut runtime = PageRuntime::new(dom);
        let mut host = BoaScriptHost::new();

        let status = runtime.start(&mut host);

        assert_eq!(status, RuntimeStatus::Done);
        assert_eq!(
            host.read_string("String(globalThis.__seenState)").as_deref(),
            Some("interactive")
        );
    }

    #[test]
    fn created_external_scripts_gate_completion_until_notified() {
        let dom = page(concat!(
            r#"<script type="text/psajs">"#,
            "var s = document.createElement('script');",
            "s.src = 'https://cdn.test/late.js';",
            "document.body.appendChild(s);",
            r#"</script>"#,
        ));
        let mut runtime = PageRuntime::new(dom);
        let mut host = BoaScriptHost::new();

        let status = runtime.start(&mut host);
        assert_eq!(status, RuntimeStatus::AwaitingScriptEvents);

        let created = host.take_created_scripts();
        assert_eq!(created.len(), 1);
        let status = runtime.notify_script_event(&mut host, created[0]);
        assert_eq!(status, RuntimeStatus::Done);
    }

    #[test]
    fn inserted_inline_scripts_run_synchronously() {
        let dom = page(concat!(
            r#"<script type="text/psajs">"#,
            "var s = document.createElement('script');",
            "s.appendChild(document.createTextNode('globalThis.ran = \"yes\";'));",
            "document.body.appendChild(s);",
            r#"</script>"#,
        ));
        let mut runtime = PageRuntime::new(dom);
        let mut host = BoaScriptHost::new();

        let status = runtime.start(&mut host);

        assert_eq!(status, RuntimeStatus::Done);
        assert_eq!(
            host.read_string("String(globalThis.ran)").as_deref(),
            Some("yes")
        );
    }

    #[test]
    fn element_lookups_respect_visibility_filtering() {
        let dom = page(concat!(
            r#"<div id="early"></div>"#,
            r#"<script type="text/psajs">"#,
            "globalThis.found_early = document.getElementById('early') !== null;",
            "globalThis.found_late = document.getElementById('late') !== null;",
            r#"</script>"#,
            r#"<div id="late"></div>"#,
        ));
        let mut runtime = PageRuntime::new(dom);
        let mut host = BoaScriptHost::new();

        let status = runtime.start(&mut host);

        assert_eq!(status, RuntimeStatus::Done);
        assert_eq!(
            host.read_string("String(globalThis.found_early)").as_deref(),
            Some("true")
        );
        assert_eq!(
            host.read_string("String(globalThis.found_late)").as_deref(),
            Some("false")
        );
    }

    #[test]
    fn timer_callbacks_run_before_the_next_script() {
        let dom = page(concat!(
            r#"<script type="text/psajs">setTimeout(function () { globalThis.timer_ran = true; }, 0);</script>"#,
            r#"<script type="text/psajs">globalThis.seen = String(globalThis.timer_ran);</script>"#,
        ));
        let mut runtime = PageRuntime::new(dom);
        let mut host = BoaScriptHost::new();

        let status = runtime.start(&mut host);

        assert_eq!(status, RuntimeStatus::Done);
        assert_eq!(
            host.read_string("String(globalThis.seen)").as_deref(),
            Some("true")
        );
    }

    #[test]
    fn string_literals_escape_control_characters() {
        let literal = js_string_literal("a\u{1}b\"c\\d\ne");
        assert_eq!(literal, "\"a\\u0001b\\\"c\\\\d\\ne\"");
    }

    #[test]
    fn control_characters_in_page_text_do_not_break_evaluation() {
        let dom = page(&format!(
            "<div id=\"noisy\">a{}b</div>{}",
            '\u{1}',
            r#"<script type="text/psajs">globalThis.after_noise = 'ran';</script>"#
        ));
        let mut runtime = PageRuntime::new(dom);
        let mut host = BoaScriptHost::new();

        let status = runtime.start(&mut host);

        assert_eq!(status, RuntimeStatus::Done);
        assert_eq!(
            host.read_string("String(globalThis.after_noise)").as_deref(),
            Some("ran")
        );
    }
}
