use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity of a single validation problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

impl Severity {
    /// Map a libxml2 `xmlErrorLevel` onto a severity.
    ///
    /// Level 0 (`XML_ERR_NONE`) never reaches the collector in practice; it is
    /// treated as a warning so that nothing reported is silently dropped.
    pub fn from_libxml2_level(level: i32) -> Self {
        match level {
            3 => Severity::Fatal,
            2 => Severity::Error,
            _ => Severity::Warning,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// Position of a validation problem in the source document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventLocation {
    pub line: u32,
    pub column: u32,
}

/// One schema-conformance problem reported during a bind or unbind pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationEvent {
    pub severity: Severity,
    pub message: String,
    pub location: Option<EventLocation>,
}

impl ValidationEvent {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            location: None,
        }
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.location = Some(EventLocation { line, column });
        self
    }
}

impl fmt::Display for ValidationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(
                f,
                "[{}] line {}, column {}: {}",
                self.severity, loc.line, loc.column, self.message
            ),
            None => write!(f, "[{}] location unknown: {}", self.severity, self.message),
        }
    }
}

/// Event sink for a single bind/unbind pass.
///
/// Every reported event is kept, in encounter order, and the pass is never
/// aborted by the collector itself. A collector belongs to exactly one pass;
/// create a new one per call.
#[derive(Debug, Default)]
pub struct ValidationCollector {
    events: Vec<ValidationEvent>,
}

impl ValidationCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event. Always returns `true`: processing continues.
    pub fn handle_event(&mut self, event: ValidationEvent) -> bool {
        self.events.push(event);
        true
    }

    pub fn events(&self) -> &[ValidationEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Hand the collected events over to the classifier.
    pub fn into_events(self) -> Vec<ValidationEvent> {
        self.events
    }
}
