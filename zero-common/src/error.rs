//! Error types for the Zero ecosystem.

use thiserror::Error;

/// Result type alias using the Zero error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading and checking shared configuration.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration failed validation
    #[error("Validation error: {0}")]
    Validation(#[from] crate::validation::ValidationError),

    /// Other error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create an error with additional context.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping context layers.
    pub fn root(&self) -> &Error {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Extension trait for adding context to any error type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }
}
