//! Translation of raw engine outcomes into the closed [`BinderError`] taxonomy.

use crate::error::{BinderError, Cause, Result};
use crate::event::ValidationEvent;

/// Default cap on how much of the offending input is embedded in an error message.
pub const DEFAULT_MESSAGE_LIMIT: usize = 500;

/// Appended to any excerpt that was cut short.
pub const TRUNCATION_MARKER: &str = "...[truncated]";

/// Raw failure signal from the parsing/binding engines
#[derive(Debug, Clone)]
pub enum EngineFailure {
    /// The input is not well-formed XML, independent of any schema.
    Structural(Cause),
    /// Anything else: type configuration, I/O, serializer failures.
    Provider(Cause),
}

/// What a failed pass was doing, used to word `Binding` errors
#[derive(Debug, Clone, Copy)]
pub enum PassKind<'a> {
    /// XML text -> value of the named type; carries the input for the excerpt.
    Bind { type_name: &'a str, input: &'a str },
    /// Value of the named type -> XML text.
    Unbind { type_name: &'a str },
}

/// Maps engine outcomes plus collected events onto a single result
#[derive(Debug, Clone, Copy)]
pub struct ErrorClassifier {
    message_limit: usize,
}

impl ErrorClassifier {
    pub fn new(message_limit: usize) -> Self {
        Self { message_limit }
    }

    pub fn message_limit(&self) -> usize {
        self.message_limit
    }

    /// Classify a finished pass.
    ///
    /// Precedence: structural failure, then any collected event, then other
    /// provider failures, then success.
    pub fn classify<T>(
        &self,
        outcome: std::result::Result<T, EngineFailure>,
        events: Vec<ValidationEvent>,
        pass: PassKind<'_>,
    ) -> Result<T> {
        match outcome {
            Err(EngineFailure::Structural(cause)) => Err(BinderError::malformed_input(events, cause)),
            _ if !events.is_empty() => Err(BinderError::schema_violation(events)),
            Err(EngineFailure::Provider(cause)) => {
                Err(BinderError::binding(self.describe(pass, &cause), Some(cause)))
            }
            Ok(value) => Ok(value),
        }
    }

    fn describe(&self, pass: PassKind<'_>, cause: &Cause) -> String {
        match pass {
            PassKind::Bind { type_name, input } => format!(
                "Unmarshalling error for type [{}], XML [{}]: [{}]",
                type_name,
                abbreviate(input, self.message_limit),
                cause
            ),
            PassKind::Unbind { type_name } => {
                format!("Failed [{}] -> XML conversion: [{}]", type_name, cause)
            }
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_MESSAGE_LIMIT)
    }
}

/// Cut `text` to at most `limit` characters, marking the cut explicitly.
pub fn abbreviate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::into_cause;
    use crate::event::Severity;
    use std::io;

    fn io_cause(msg: &str) -> Cause {
        into_cause(io::Error::other(msg.to_string()))
    }

    fn bind_pass(input: &str) -> PassKind<'_> {
        PassKind::Bind {
            type_name: "tests::Person",
            input,
        }
    }

    #[test]
    fn test_structural_failure_wins_over_events() {
        let classifier = ErrorClassifier::default();
        let events = vec![ValidationEvent::new(Severity::Error, "collected before failure")];

        let result: Result<()> = classifier.classify(
            Err(EngineFailure::Structural(io_cause("mismatched end tag"))),
            events,
            bind_pass("<a><b></a>"),
        );

        match result {
            Err(BinderError::MalformedInput { events, cause }) => {
                assert_eq!(events.len(), 1);
                assert!(cause.to_string().contains("mismatched end tag"));
            }
            other => panic!("Expected MalformedInput, got {:?}", other),
        }
    }

    #[test]
    fn test_events_win_over_provider_failure() {
        let classifier = ErrorClassifier::default();
        let events = vec![
            ValidationEvent::new(Severity::Error, "first").at(2, 5),
            ValidationEvent::new(Severity::Error, "second").at(3, 9),
        ];

        let result: Result<()> = classifier.classify(
            Err(EngineFailure::Provider(io_cause("invalid digit"))),
            events,
            bind_pass("<person/>"),
        );

        match result {
            Err(BinderError::SchemaViolation { events }) => {
                assert_eq!(events[0].message, "first");
                assert_eq!(events[1].message, "second");
            }
            other => panic!("Expected SchemaViolation, got {:?}", other),
        }
    }

    #[test]
    fn test_events_turn_success_into_violation() {
        let classifier = ErrorClassifier::default();
        let result = classifier.classify(
            Ok(42),
            vec![ValidationEvent::new(Severity::Warning, "suspicious")],
            bind_pass("<n>42</n>"),
        );
        assert!(matches!(result, Err(BinderError::SchemaViolation { .. })));
    }

    #[test]
    fn test_provider_failure_becomes_binding_error() {
        let classifier = ErrorClassifier::default();
        let result: Result<()> = classifier.classify(
            Err(EngineFailure::Provider(io_cause("missing field `name`"))),
            vec![],
            bind_pass("<person/>"),
        );

        match result {
            Err(BinderError::Binding { message, cause }) => {
                assert!(message.contains("tests::Person"));
                assert!(message.contains("<person/>"));
                assert!(message.contains("missing field `name`"));
                assert!(cause.is_some());
            }
            other => panic!("Expected Binding, got {:?}", other),
        }
    }

    #[test]
    fn test_unbind_failure_message() {
        let classifier = ErrorClassifier::default();
        let result: Result<()> = classifier.classify(
            Err(EngineFailure::Provider(io_cause("unsupported value"))),
            vec![],
            PassKind::Unbind {
                type_name: "tests::Person",
            },
        );
        let err = result.unwrap_err();
        assert!(err.to_string().starts_with("Failed [tests::Person] -> XML conversion"));
    }

    #[test]
    fn test_success_passes_through() {
        let classifier = ErrorClassifier::default();
        let result = classifier.classify(Ok("done"), vec![], bind_pass("<x/>"));
        assert_eq!(result.unwrap(), "done");
    }

    #[test]
    fn test_long_input_is_truncated_in_message() {
        let classifier = ErrorClassifier::new(20);
        let input = format!("<payload>{}</payload>", "x".repeat(1000));

        let err = classifier
            .classify::<()>(
                Err(EngineFailure::Provider(io_cause("bad"))),
                vec![],
                bind_pass(&input),
            )
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains(TRUNCATION_MARKER));
        assert!(!message.contains(&input));
        assert!(message.contains("<payload>xxxxxxxxxxx...[truncated]"));
    }

    #[test]
    fn test_abbreviate() {
        assert_eq!(abbreviate("short", 10), "short");
        assert_eq!(abbreviate("exactly10!", 10), "exactly10!");
        assert_eq!(abbreviate("0123456789abc", 10), "0123456789...[truncated]");
        assert_eq!(abbreviate("", 3), "");
    }

    #[test]
    fn test_abbreviate_respects_char_boundaries() {
        let text = "ééééé";
        assert_eq!(abbreviate(text, 2), "éé...[truncated]");
    }
}
