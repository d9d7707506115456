//! Shared primitives used across DeferKit crates.

use core::fmt;

/// Result alias used across the workspace.
pub type EngineResult<T> = Result<T, EngineError>;

/// Top-level error type carried through every crate boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    pub code: &'static str,
    pub message: String,
}

impl EngineError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for EngineError {}

/// Severity of a diagnostic entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// One recorded diagnostic line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

/// Bounded in-memory diagnostic log.
///
/// Script evaluation and listener exceptions do not abort a run; they
/// land here and callers inspect `entries()` afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticLog {
    entries: Vec<LogEntry>,
    max_entries: usize,
    truncated: bool,
}

const DEFAULT_MAX_LOG_ENTRIES: usize = 2048;

impl Default for DiagnosticLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_LOG_ENTRIES)
    }
}

impl DiagnosticLog {
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_entries: max_entries.max(1),
            truncated: false,
        }
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Info, message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Warn, message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Error, message.into());
    }

    /// Records a caught error together with its context line.
    pub fn caught(&mut self, context: &str, error: &EngineError) {
        self.push(LogLevel::Error, format!("{context}: {error}"));
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.message.contains(needle))
    }

    fn push(&mut self, level: LogLevel, message: String) {
        if self.entries.len() >= self.max_entries {
            self.truncated = true;
            return;
        }
        self.entries.push(LogEntry { level, message });
    }
}
