//! Error handling for the control center core
//!
//! Provides the error type shared by config parsing and value inflation.

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the core data model
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Template expansion failed (unknown key, unterminated expression)
    #[error("Template error: {0}")]
    Template(String),

    /// Content is structurally valid YAML but not a usable configuration
    #[error("Configuration error: {0}")]
    InvalidConfiguration(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Create a template error
    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Whether the error stems from file content rather than file access
    pub fn is_content_error(&self) -> bool {
        matches!(
            self,
            Error::Template(_) | Error::InvalidConfiguration(_) | Error::Yaml(_)
        )
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Template(_) => "template",
            Error::InvalidConfiguration(_) => "configuration",
            Error::Io(_) => "io",
            Error::Yaml(_) => "yaml",
        }
    }
}
