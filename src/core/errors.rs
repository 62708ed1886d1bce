//! Error types for the odavl-rs library.
//!
//! This module provides structured error handling for every subsystem, from
//! baseline storage through recipe execution, with error kinds that map onto
//! the process exit codes used by the CLI.

use std::io;

use thiserror::Error;

/// Main result type for odavl operations.
pub type Result<T> = std::result::Result<T, OdavlError>;

/// Comprehensive error type for all odavl operations.
#[derive(Error, Debug)]
pub enum OdavlError {
    /// I/O related errors (snapshots, reports, audit log, state files)
    #[error("I/O error: {message}")]
    Io {
        /// Human-readable error message
        message: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Configuration errors (malformed config, invalid policy, bad CLI input)
    #[error("Configuration error: {message}")]
    Config {
        /// Error description
        message: String,
        /// Configuration field that caused the error
        field: Option<String>,
    },

    /// A named baseline does not exist in the store
    #[error("Baseline not found: {name}")]
    BaselineNotFound {
        /// Baseline name requested by the caller
        name: String,
    },

    /// A baseline document failed schema validation
    #[error("Baseline validation error: {message}")]
    BaselineValidation {
        /// Error description
        message: String,
        /// Schema version carried by the document, if readable
        version: Option<String>,
    },

    /// Detector failure captured during analysis
    #[error("Detector error in '{detector}': {message}")]
    Detector {
        /// Detector id that failed
        detector: String,
        /// Error description
        message: String,
    },

    /// Recipe execution failure
    #[error("Execution error in recipe '{recipe_id}': {message}")]
    Execution {
        /// Recipe that failed
        recipe_id: String,
        /// Error description
        message: String,
    },

    /// The recipe dependency graph contains a cycle
    #[error("Circular dependency among recipes: {message}")]
    CircularDependency {
        /// Description of the cycle
        message: String,
    },

    /// Operation blocked by a deny rule or protected path
    #[error("Policy denied: {message}")]
    PolicyDenied {
        /// Error description
        message: String,
        /// Rule that matched, if any
        rule: Option<String>,
    },

    /// A recipe or detector exceeded its wall-clock budget
    #[error("Timeout after {seconds}s: {operation}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Budget that was exceeded
        seconds: u64,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error description
        message: String,
        /// Data type being serialized
        data_type: Option<String>,
        /// Underlying serialization error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Validation errors for input data
    #[error("Validation error: {message}")]
    Validation {
        /// Error description
        message: String,
        /// Field or input that failed validation
        field: Option<String>,
    },

    /// Session state machine violations and other invariant breaks
    #[error("Internal error: {message}")]
    Internal {
        /// Error description
        message: String,
        /// Additional context
        context: Option<String>,
    },
}

impl OdavlError {
    /// Create a new I/O error with context
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new configuration error with field context
    pub fn config_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new baseline-not-found error
    pub fn baseline_not_found(name: impl Into<String>) -> Self {
        Self::BaselineNotFound { name: name.into() }
    }

    /// Create a new baseline validation error
    pub fn baseline_validation(message: impl Into<String>) -> Self {
        Self::BaselineValidation {
            message: message.into(),
            version: None,
        }
    }

    /// Create a new detector error
    pub fn detector(detector: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Detector {
            detector: detector.into(),
            message: message.into(),
        }
    }

    /// Create a new execution error
    pub fn execution(recipe_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            recipe_id: recipe_id.into(),
            message: message.into(),
        }
    }

    /// Create a new circular dependency error
    pub fn circular_dependency(message: impl Into<String>) -> Self {
        Self::CircularDependency {
            message: message.into(),
        }
    }

    /// Create a new policy denial
    pub fn policy_denied(message: impl Into<String>) -> Self {
        Self::PolicyDenied {
            message: message.into(),
            rule: None,
        }
    }

    /// Create a new timeout error
    pub fn timeout(operation: impl Into<String>, seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            seconds,
        }
    }

    /// Create a new validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            context: None,
        }
    }

    /// Add context to an existing error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        if let Self::Internal { context: ctx, .. } = &mut self {
            *ctx = Some(context.into());
        }
        self
    }

    /// Process exit code for this error per the CLI contract.
    ///
    /// Config-class errors exit 3; detector and execution-class failures
    /// exit 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } | Self::BaselineValidation { .. } | Self::Validation { .. } => 3,
            _ => 1,
        }
    }
}

// Implement From traits for common error types
impl From<io::Error> for OdavlError {
    fn from(err: io::Error) -> Self {
        Self::io("I/O operation failed", err)
    }
}

impl From<serde_json::Error> for OdavlError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: format!("JSON serialization failed: {err}"),
            data_type: Some("JSON".to_string()),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_yaml::Error> for OdavlError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization {
            message: format!("YAML serialization failed: {err}"),
            data_type: Some("YAML".to_string()),
            source: Some(Box::new(err)),
        }
    }
}

/// Result extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    /// Add static context to an error result
    fn context(self, msg: &'static str) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<OdavlError>,
{
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }

    fn context(self, msg: &'static str) -> Result<T> {
        self.map_err(|e| e.into().with_context(msg))
    }
}
