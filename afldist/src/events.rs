//! The reporting boundary. Every classified output line and every lifecycle
//! event leaves the core as a `(Severity, scope, text)` triple.

use std::{fmt, sync::Mutex};

use log::Level;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_level(self) -> Level {
        match self {
            Severity::Debug => Level::Debug,
            Severity::Info => Level::Info,
            Severity::Warning => Level::Warn,
            Severity::Critical => Level::Error,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

/// Consumer of classified events. Implementations are shared by all worker
/// threads of a campaign.
pub trait EventSink: Send + Sync + fmt::Debug {
    fn emit(&self, severity: Severity, scope: &str, text: &str);
}

/// Forwards events to the `log` facade, using the scope as the record target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, severity: Severity, scope: &str, text: &str) {
        log::log!(target: scope, severity.as_level(), "{}", text);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub severity: Severity,
    pub scope: String,
    pub text: String,
}

/// Keeps every event in memory, in the order it was emitted.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        RecordingSink::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn events_for(&self, scope: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.scope == scope)
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, severity: Severity, scope: &str, text: &str) {
        self.events.lock().unwrap().push(Event {
            severity,
            scope: scope.to_owned(),
            text: text.to_owned(),
        });
    }
}
