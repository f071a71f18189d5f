//! Error taxonomy shared across every Memoh component.
//!
//! Every component boundary (adapters, tool executors, the container manager,
//! the MCP connection service, persistence) converts whatever it sees at its
//! edge into one of these kinds before handing it further in. The Flow
//! Resolver maps a terminal `Error` into a single user-visible stream event;
//! everything above the edge keeps propagating the typed value with `?`.

use thiserror::Error;

/// Abstract error kind, independent of where the failure originated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    Unauthenticated,
    PreconditionFailed,
    ResourceExhausted,
    Unavailable,
    Timeout,
    Cancelled,
    Conflict,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::PreconditionFailed => "precondition_failed",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A typed error carrying an [`ErrorKind`], a short message, and an optional
/// source error for logging (never surfaced to end users verbatim).
#[derive(Error, Debug)]
#[error("{kind}: {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PreconditionFailed, message)
    }

    /// A short natural-language summary safe to surface as a terminal stream
    /// event. Does not include the source chain.
    pub fn user_summary(&self) -> String {
        format!("{}: {}", self.kind, self.message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let e = Error::not_found("bot abc123");
        assert_eq!(e.to_string(), "not_found: bot abc123");
    }

    #[test]
    fn user_summary_matches_display() {
        let e = Error::timeout("llm call exceeded 120s");
        assert_eq!(e.user_summary(), "timeout: llm call exceeded 120s");
    }

    #[test]
    fn with_source_preserves_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let e = Error::with_source(ErrorKind::Internal, "snapshot commit failed", io_err);
        assert!(std::error::Error::source(&e).is_some());
    }
}
