use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::event::ValidationEvent;

/// Shared, cloneable handle to an underlying failure
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Wrap any error as a [`Cause`].
pub fn into_cause<E>(err: E) -> Cause
where
    E: std::error::Error + Send + Sync + 'static,
{
    Arc::new(err)
}

/// Error kinds surfaced by every public operation.
///
/// The set is closed: callers are expected to match on it, treating
/// `MalformedInput`/`SchemaViolation` as data-quality problems and the rest
/// as caller or operational faults.
#[derive(Error, Debug, Clone)]
pub enum BinderError {
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Resource not found: {path}")]
    ResourceNotFound { path: String },

    #[error("Xml malformed: {cause}")]
    MalformedInput {
        events: Vec<ValidationEvent>,
        #[source]
        cause: Cause,
    },

    #[error("Xml schema validation failed with {} event(s)", .events.len())]
    SchemaViolation { events: Vec<ValidationEvent> },

    #[error("{message}")]
    Binding {
        message: String,
        #[source]
        cause: Option<Cause>,
    },
}

impl BinderError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        BinderError::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn resource_not_found(path: impl Into<String>) -> Self {
        BinderError::ResourceNotFound { path: path.into() }
    }

    pub fn malformed_input(events: Vec<ValidationEvent>, cause: Cause) -> Self {
        BinderError::MalformedInput { events, cause }
    }

    pub fn schema_violation(events: Vec<ValidationEvent>) -> Self {
        BinderError::SchemaViolation { events }
    }

    pub fn binding(message: impl Into<String>, cause: Option<Cause>) -> Self {
        BinderError::Binding {
            message: message.into(),
            cause,
        }
    }

    /// Validation events carried by the error, empty for kinds that carry none.
    pub fn events(&self) -> &[ValidationEvent] {
        match self {
            BinderError::MalformedInput { events, .. } | BinderError::SchemaViolation { events } => {
                events
            }
            _ => &[],
        }
    }

    /// True when the failure is caused by the document rather than by the caller or provider.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            BinderError::MalformedInput { .. } | BinderError::SchemaViolation { .. }
        )
    }
}

/// Configuration-specific error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration value: {key} = {value} - {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

/// LibXML2-specific error types
#[derive(Error, Debug, Clone)]
pub enum LibXml2Error {
    #[error("Schema parsing failed: {details}")]
    SchemaParseFailed { details: String },

    #[error("Validation context creation failed")]
    ValidationContextCreationFailed,

    #[error("Memory allocation failed in libxml2")]
    MemoryAllocation,

    #[error("Invalid XML structure: {details}")]
    InvalidXml { details: String },

    #[error("Path is not representable for libxml2: {path}")]
    InvalidPath { path: PathBuf },

    #[error("Schema validation internal error: {details}")]
    InternalError { details: String },
}

impl From<ConfigError> for BinderError {
    fn from(err: ConfigError) -> Self {
        BinderError::invalid_argument(err.to_string())
    }
}

impl From<LibXml2Error> for BinderError {
    fn from(err: LibXml2Error) -> Self {
        BinderError::binding(err.to_string(), Some(into_cause(err)))
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, BinderError>;

/// Configuration result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// LibXML2 result type alias
pub type LibXml2Result<T> = std::result::Result<T, LibXml2Error>;
