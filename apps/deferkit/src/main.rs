//! Command-line driver: loads an HTML page rewritten with deferred
//! script markers, executes the deferred scripts against a JS host, and
//! reports what ran.

use dk_core::EngineError;
use dk_dom::Document;
use dk_dom::NodeId;
use dk_engine::EnginePriority;
use dk_engine::PageRuntime;
use dk_engine::RuntimeStatus;
use dk_html::HtmlParser;
use dk_js::BoaScriptHost;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;
use url::Url;

const MAX_EXTERNAL_FETCHES: usize = 64;
const MAX_SCRIPT_EVENT_ROUNDS: usize = 64;

const USAGE: &str = "usage: deferkit <page.html> [--base <url>] [--dump-html] [--verbose]";

#[derive(Debug, Clone)]
struct CliOptions {
    page: PathBuf,
    base: Option<Url>,
    dump_html: bool,
    verbose: bool,
}

fn main() -> ExitCode {
    let options = match options_from_args() {
        Ok(options) => options,
        Err(error) => {
            eprintln!("deferkit: {error}");
            eprintln!("{USAGE}");
            return ExitCode::FAILURE;
        }
    };
    match run(&options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("deferkit: {error}");
            ExitCode::FAILURE
        }
    }
}

fn options_from_args() -> Result<CliOptions, String> {
    let mut page = None;
    let mut base = None;
    let mut dump_html = false;
    let mut verbose = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--base" => {
                let raw = args
                    .next()
                    .ok_or_else(|| "missing URL after --base".to_owned())?;
                let parsed = Url::parse(&raw).map_err(|error| format!("invalid base URL: {error}"))?;
                base = Some(parsed);
            }
            "--dump-html" => dump_html = true,
            "--verbose" => verbose = true,
            other if other.starts_with("--") => {
                return Err(format!("unknown flag `{other}`"));
            }
            _ => {
                if page.is_some() {
                    return Err("more than one page argument".to_owned());
                }
                page = Some(PathBuf::from(arg));
            }
        }
    }

    let page = page.ok_or_else(|| "missing page argument".to_owned())?;
    Ok(CliOptions {
        page,
        base,
        dump_html,
        verbose,
    })
}

fn run(options: &CliOptions) -> Result<(), String> {
    let html = std::fs::read_to_string(&options.page)
        .map_err(|error| format!("cannot read {}: {error}", options.page.display()))?;
    let base = match &options.base {
        Some(base) => base.clone(),
        None => directory_base(&options.page)?,
    };

    let mut dom = Document::new();
    let root = dom.root();
    HtmlParser.parse_into(&mut dom, root, &html);

    let mut runtime = PageRuntime::new(dom);
    let mut host = BoaScriptHost::new();

    let mut status = runtime.start(&mut host);
    let mut fetches = 0;
    let mut event_rounds = 0;
    loop {
        match status {
            RuntimeStatus::AwaitingScriptLoad { url, .. } => {
                fetches += 1;
                if fetches > MAX_EXTERNAL_FETCHES {
                    return Err(format!("more than {MAX_EXTERNAL_FETCHES} external scripts"));
                }
                status = match fetch_script(&base, &url) {
                    Ok(source) => runtime.resolve_script_load(&mut host, Ok(&source)),
                    Err(error) => runtime.resolve_script_load(&mut host, Err(error)),
                };
            }
            RuntimeStatus::AwaitingScriptEvents => {
                event_rounds += 1;
                let created = host.take_created_scripts();
                if created.is_empty() || event_rounds > MAX_SCRIPT_EVENT_ROUNDS {
                    eprintln!("deferkit: page is waiting on script events that will never arrive");
                    break;
                }
                status = RuntimeStatus::AwaitingScriptEvents;
                for node in created {
                    status = runtime.notify_script_event(&mut host, node);
                }
            }
            RuntimeStatus::AwaitingMoreHtml => {
                eprintln!("deferkit: page expects more HTML; incremental input is not driven here");
                break;
            }
            RuntimeStatus::Done => break,
        }
    }

    print_report(&runtime, options.verbose);
    if options.dump_html {
        let mut out = String::new();
        serialize_children(runtime.dom(), runtime.dom().root(), &mut out);
        println!("{out}");
    }
    Ok(())
}

fn directory_base(page: &Path) -> Result<Url, String> {
    let absolute = page
        .canonicalize()
        .map_err(|error| format!("cannot resolve {}: {error}", page.display()))?;
    let directory = absolute
        .parent()
        .ok_or_else(|| format!("{} has no parent directory", page.display()))?;
    Url::from_directory_path(directory)
        .map_err(|()| format!("cannot express {} as a URL", directory.display()))
}

/// Resolves a script URL against the base and reads it. Only `file`
/// URLs are fetchable from this driver; anything else is reported as a
/// load error and the page proceeds without it.
fn fetch_script(base: &Url, reference: &str) -> Result<String, EngineError> {
    let resolved = base
        .join(reference)
        .map_err(|error| EngineError::new("net.url", format!("{reference}: {error}")))?;
    if resolved.scheme() != "file" {
        return Err(EngineError::new(
            "net.fetch",
            format!("{resolved}: only file URLs are fetchable"),
        ));
    }
    let path = resolved
        .to_file_path()
        .map_err(|()| EngineError::new("net.url", format!("{resolved}: not a local path")))?;
    std::fs::read_to_string(&path)
        .map_err(|error| EngineError::new("net.fetch", format!("{}: {error}", path.display())))
}

fn print_report(runtime: &PageRuntime, verbose: bool) {
    for priority in [EnginePriority::High, EnginePriority::Low] {
        let engine = runtime.engine(priority);
        let executed = engine
            .logs()
            .entries()
            .iter()
            .filter(|entry| {
                entry.message.starts_with("evaluated:") || entry.message.starts_with("executed:")
            })
            .count();
        println!(
            "{:?} priority: state {:?}, {} of {} queued scripts executed",
            priority,
            engine.state(),
            executed,
            engine.queue_len(),
        );
        if verbose {
            for entry in engine.logs().entries() {
                println!("  [{}] {}", entry.level.as_str(), entry.message);
            }
            if engine.logs().truncated() {
                println!("  [warn] log truncated");
            }
        }
    }
}

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

fn serialize_children(dom: &Document, node: NodeId, out: &mut String) {
    for child in dom.children(node) {
        serialize_node(dom, *child, out);
    }
}

fn serialize_node(dom: &Document, node: NodeId, out: &mut String) {
    if let Some(text) = dom.text(node) {
        out.push_str(&escape_text(text));
        return;
    }
    let Some(tag) = dom.tag_name(node) else {
        return;
    };
    out.push('<');
    out.push_str(tag);
    for attribute in dom.attributes(node) {
        out.push(' ');
        out.push_str(&attribute.name);
        out.push_str("=\"");
        out.push_str(&escape_attribute(&attribute.value));
        out.push('"');
    }
    out.push('>');
    if VOID_TAGS.contains(&tag) {
        return;
    }
    let tag = tag.to_owned();
    serialize_children(dom, node, out);
    out.push_str("</");
    out.push_str(&tag);
    out.push('>');
}

fn escape_text(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attribute(input: &str) -> String {
    escape_text(input).replace('"', "&quot;")
}
