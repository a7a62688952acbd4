/**
 * Stack trace capture and parsing.
 *
 * Reports carry their stack trace as plain text, one frame per line in the
 * form `    at <function> (<file>:<line>:<column>)`. Traces from the
 * `backtrace` crate and traces handed over by the embedding application go
 * through fingerprinting and wire mapping the same way.
 */
use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;

/// `(file:line)` or `file:line:col` at the end of a frame line.
static LOCATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(?([^\s()]+?):(\d+)(?::\d+)?\)?\s*$").expect("location pattern is valid")
});

/**
 * A single resolved frame.
 *
 * Frames with neither a function name nor a file are dropped during
 * conversion; they are runtime / linker internals.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub function: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl std::fmt::Display for StackFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let function = self.function.as_deref().unwrap_or("<unknown>");
        match (&self.file, self.line) {
            (Some(file), Some(line)) => match self.column {
                Some(col) => write!(f, "at {function} ({file}:{line}:{col})"),
                None => write!(f, "at {function} ({file}:{line})"),
            },
            (Some(file), None) => write!(f, "at {function} ({file})"),
            _ => write!(f, "at {function}"),
        }
    }
}

/**
 * Module prefixes of frames that belong to the capture machinery rather
 * than to the application: the `backtrace` crate, this SDK's crates, and the
 * standard library's panic plumbing.
 */
const SDK_FRAME_PREFIXES: &[&str] = &[
    "backtrace::",
    "flare_core::",
    "flare_panic::",
    "flare::",
    "std::panicking",
    "std::panic::",
    "core::panicking",
    "rust_begin_unwind",
    "__rust",
];

/**
 * Captures a backtrace at the current call site and renders it as text,
 * starting at the first application frame. Returns `None` if no useful frames
 * were resolved.
 */
pub fn capture() -> Option<String> {
    let frames = application_frames(resolve_frames(&backtrace::Backtrace::new()));
    (!frames.is_empty()).then(|| render(&frames))
}

/**
 * Flattens every resolved symbol into a `StackFrame`. Function names are
 * demangled without their hash suffix; symbols with neither a name nor a
 * file are skipped.
 */
pub fn resolve_frames(bt: &backtrace::Backtrace) -> Vec<StackFrame> {
    bt.frames()
        .iter()
        .flat_map(|frame| frame.symbols())
        .filter_map(|symbol| {
            let function = symbol.name().map(|name| format!("{name:#}"));
            let file = symbol.filename().map(|path| path.display().to_string());
            if function.is_none() && file.is_none() {
                return None;
            }
            Some(StackFrame {
                function,
                file,
                line: symbol.lineno(),
                column: symbol.colno(),
            })
        })
        .collect()
}

/**
 * Drops the leading run of SDK and panic-machinery frames so the trace opens
 * at the code that raised the error. Frames further down are kept as-is, so
 * an application called back from inside the SDK still shows the full path.
 * If nothing but SDK frames remain, the input is returned untouched.
 */
pub fn application_frames(frames: Vec<StackFrame>) -> Vec<StackFrame> {
    let skip = frames.iter().take_while(|f| is_sdk_frame(f)).count();
    if skip == frames.len() {
        return frames;
    }
    frames.into_iter().skip(skip).collect()
}

fn is_sdk_frame(frame: &StackFrame) -> bool {
    frame.function.as_deref().is_some_and(|name| {
        let name = name.trim_start_matches('<');
        SDK_FRAME_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
    })
}

/// Renders frames one per line, indented, in the textual trace format.
pub fn render(frames: &[StackFrame]) -> String {
    let mut out = String::new();
    for frame in frames {
        let _ = writeln!(out, "    {frame}");
    }
    out
}

/**
 * Finds the first frame line carrying a `file:line` location and returns it.
 *
 * Used to fill the `file` / `line` fields of the wire report.
 */
pub fn top_frame_location(stack_trace: &str) -> Option<(String, u32)> {
    stack_trace.lines().find_map(|line| {
        let caps = LOCATION_RE.captures(line.trim())?;
        let file = caps.get(1)?.as_str().to_string();
        let line_no = caps.get(2)?.as_str().parse().ok()?;
        Some((file, line_no))
    })
}
