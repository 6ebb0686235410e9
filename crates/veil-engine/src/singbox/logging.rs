//! Engine log relay. Each complete stdout/stderr line from the engine, and
//! each supervisor notice, is handed to a single registered [`LogSink`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Where a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Stdout,
    Stderr,
    /// Notices emitted by the supervisor itself (cache fallback, exit).
    Supervisor,
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
            Self::Supervisor => write!(f, "supervisor"),
        }
    }
}

/// One relayed line. `text` is verbatim, without the trailing newline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineLogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub text: String,
}

impl EngineLogLine {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self::new(LogStream::Stdout, text)
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self::new(LogStream::Stderr, text)
    }

    pub fn supervisor(text: impl Into<String>) -> Self {
        Self::new(LogStream::Supervisor, text)
    }

    pub fn new(stream: LogStream, text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            stream,
            text: text.into(),
        }
    }
}

/// Receiver for relayed lines. Called from reader tasks; must not block for
/// long and cannot fail back into the supervisor.
pub trait LogSink: Send + Sync {
    fn on_line(&self, line: &EngineLogLine);
}

pub type SharedLogSink = Arc<dyn LogSink>;

/// Adapts a closure into a [`LogSink`].
pub struct FnSink<F>(pub F);

impl<F> LogSink for FnSink<F>
where
    F: Fn(&EngineLogLine) + Send + Sync,
{
    fn on_line(&self, line: &EngineLogLine) {
        (self.0)(line)
    }
}

/// Forwards lines to the `log` facade under the `sing-box` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFacadeSink;

impl LogSink for LogFacadeSink {
    fn on_line(&self, line: &EngineLogLine) {
        match line.stream {
            LogStream::Stdout => log::info!(target: "sing-box", "{}", line.text),
            LogStream::Stderr => log::info!(target: "sing-box", "[stderr] {}", line.text),
            LogStream::Supervisor => log::info!(target: "veilbox", "{}", line.text),
        }
    }
}

/// Drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn on_line(&self, _line: &EngineLogLine) {}
}

/// Human notice emitted when the engine process ends.
pub fn exit_notice(status: Option<std::process::ExitStatus>) -> String {
    match status.and_then(|s| s.code()) {
        Some(0) => "sing-box exited cleanly".into(),
        Some(code) => format!("sing-box exited with code {}", code),
        None => match status {
            Some(_) => "sing-box terminated by signal".into(),
            None => "sing-box exited (status unavailable)".into(),
        },
    }
}
