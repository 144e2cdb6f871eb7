///! Per-item problems that a run absorbs instead of failing on.
///!
///! Every event is logged through `tracing` as it is recorded and kept so the
///! caller can report it after the run.

use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Fetch,
    Parse,
    Resolve,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Parse => "parse",
            Stage::Resolve => "resolve",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Info,
    Warning,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub stage: Stage,
    pub severity: Severity,
    /// The page, id or record the event is about
    pub subject: String,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.stage.as_str(), self.subject, self.message)
    }
}

#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    events: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, stage: Stage, subject: impl Into<String>, message: impl Into<String>) {
        let event = Diagnostic {
            stage,
            severity: Severity::Warning,
            subject: subject.into(),
            message: message.into(),
        };
        warn!("{}", event);
        self.events.push(event);
    }

    pub fn info(&mut self, stage: Stage, subject: impl Into<String>, message: impl Into<String>) {
        let event = Diagnostic {
            stage,
            severity: Severity::Info,
            subject: subject.into(),
            message: message.into(),
        };
        info!("{}", event);
        self.events.push(event);
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.events.iter().filter(|e| e.severity == Severity::Warning)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}
