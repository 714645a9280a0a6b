//! Error types for vcstat.
//!
//! This module defines the error taxonomy used by the collector core and the
//! classifier that decides whether a failure aborts a whole gather cycle or
//! only the entity being queried.
//!
//! # Classification
//!
//! - **Fatal**: the caller's context was cancelled or ran past its deadline,
//!   or the endpoint is unreachable at the transport level. Continuing to
//!   iterate the remaining entities would only pile up more timeouts.
//! - **Transient**: anything else. One malformed property, one permission
//!   failure or one host command failing is logged and skipped.

use thiserror::Error;

/// Result type alias for vcstat operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for vcstat.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Session Errors
    // ========================================================================
    /// No session has been opened yet, or it was closed.
    #[error("no vCenter client, no session has been opened")]
    NoSession,

    /// The endpoint answered but is not a vCenter server.
    #[error("endpoint does not look like a vCenter (reported api type '{0}')")]
    NotVcenter(String),

    /// The session could not be established.
    #[error("connection error: {0}")]
    Connection(String),

    /// Credentials were rejected.
    #[error("authentication failed: {0}")]
    Authentication(String),

    // ========================================================================
    // Fatal Query Errors
    // ========================================================================
    /// DNS resolution or transport-level failure reaching the endpoint.
    #[error("network error: {0}")]
    Network(String),

    /// The cycle context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The cycle context (or a shorter per-call timeout) ran out.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    // ========================================================================
    // Per-entity Errors
    // ========================================================================
    /// The requested entity class does not exist in the queried scope.
    #[error("not found: {0}")]
    NotFound(String),

    /// The session lacks privileges on one object.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A property or command query failed for one entity.
    #[error("query failed: {0}")]
    Query(String),

    /// A returned value could not be interpreted.
    #[error("could not parse {what}: {message}")]
    Parse {
        /// What was being parsed
        what: String,
        /// Parser message
        message: String,
    },

    /// The backend does not implement this operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    // ========================================================================
    // Usage Errors
    // ========================================================================
    /// A bulk query was planned with a zero chunk size.
    #[error("invalid chunk size {0}, must be greater than zero")]
    InvalidChunkSize(usize),

    /// Configuration is invalid or incomplete.
    #[error("configuration error: {0}")]
    Config(String),

    /// An error annotated with the call site that produced it.
    #[error("{context}: {source}")]
    Context {
        /// Description of the failed operation
        context: String,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },
}

/// How a failure affects the running gather cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Abort the whole cycle.
    Fatal,
    /// Record the error and continue with the next entity.
    Transient,
}

impl Error {
    /// Create a parse error.
    pub fn parse(what: impl Into<String>, message: impl ToString) -> Self {
        Error::Parse {
            what: what.into(),
            message: message.to_string(),
        }
    }

    /// Wrap this error with a description of the failed operation.
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error of a context chain.
    pub fn root(&self) -> &Error {
        let mut err = self;
        while let Error::Context { source, .. } = err {
            err = source;
        }
        err
    }

    /// Whether this error must abort the gather cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.root(),
            Error::Cancelled | Error::DeadlineExceeded | Error::Network(_)
        )
    }

    /// Whether this error only signals that an entity class is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Error::NotFound(_))
    }

    /// Whether this error was caused by cancellation of the caller.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Error::Cancelled)
    }
}

/// Classify an error from any API call site.
pub fn classify(err: &Error) -> ErrorClass {
    if err.is_fatal() {
        ErrorClass::Fatal
    } else {
        ErrorClass::Transient
    }
}

/// Returns true if the error should abort the whole gather cycle.
pub fn is_fatal(err: &Error) -> bool {
    classify(err) == ErrorClass::Fatal
}
