//! Error handling for the operator execution core
//!
//! Every failure the core can hit is a variant of [`OperatorError`]. Most of
//! them never reach the caller as an `Err`: compile, binding, invocation and
//! extraction problems are logged and absorbed, and the operator stays in a
//! consistent state. The enum still exists so that the places that *do*
//! return a `Result` (configuration, persistence, owning-thread checks) speak
//! the same vocabulary as the log output.

use thiserror::Error;

/// Main error type for operator operations
#[derive(Error, Debug)]
pub enum OperatorError {
    /// Script text could not be compiled into a module
    #[error("Compile error in '{module}': {message}")]
    Compile { module: String, message: String },

    /// Compiled module lacks the entry point or a usable capability hook
    #[error("Binding error in '{module}': {message}")]
    Binding { module: String, message: String },

    /// The entry point raised an error while running
    #[error("Invocation error: {0}")]
    Invocation(String),

    /// A declared result or child dataset was missing or of the wrong kind
    #[error("Result extraction error for '{name}': {message}")]
    ResultExtraction { name: String, message: String },

    /// Descriptor JSON was malformed or incomplete
    #[error("Descriptor parse error: {0}")]
    DescriptorParse(String),

    /// Script text is set but no transform is bound
    #[error("No valid transform is bound for operator '{0}'")]
    NoTransform(String),

    /// An owning-thread operation was attempted from another thread
    #[error("Operation must run on the operator's owning thread")]
    WrongThread,

    /// Invalid data object construction or access
    #[error("Data error: {0}")]
    Data(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<OperatorError>,
    },
}

impl OperatorError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        OperatorError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Wrap a Rhai runtime error raised by the entry point
    pub fn from_rhai_error(err: Box<rhai::EvalAltResult>) -> Self {
        OperatorError::Invocation(err.to_string())
    }
}

impl From<serde_json::Error> for OperatorError {
    fn from(err: serde_json::Error) -> Self {
        OperatorError::Serialization(err.to_string())
    }
}

/// Result type alias for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

/// Extension trait for adding context to interpreter results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for std::result::Result<T, Box<rhai::EvalAltResult>> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| OperatorError::from_rhai_error(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| OperatorError::from_rhai_error(e).with_context(f()))
    }
}
