//! Error types returned by the core.

use std::fmt;
use std::io;

use thiserror::Error;

/// Failure to bind the listening socket at startup.
///
/// Distinguishing these cases lets a caller print something more useful than
/// "os error 98".
#[derive(Debug, Error)]
pub enum BindError {
    /// Another process already holds the address.
    #[error("address {0} already in use")]
    AddressInUse(String),
    /// The configured host did not resolve to any address.
    #[error("host {0} could not be resolved")]
    UnresolvableHost(String),
    /// The process lacks permission to bind the address (e.g. a privileged port).
    #[error("permission denied binding {0}")]
    PermissionDenied(String),
    /// Any other OS-level bind failure.
    #[error("failed to bind {addr}: {source}")]
    Other {
        /// The address that failed to bind.
        addr: String,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },
}

impl BindError {
    /// Classify a raw bind `io::Error` into one of the distinguished variants.
    pub fn classify(addr: impl fmt::Display, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::AddrInUse => BindError::AddressInUse(addr.to_string()),
            io::ErrorKind::PermissionDenied => BindError::PermissionDenied(addr.to_string()),
            _ => BindError::Other {
                addr: addr.to_string(),
                source: err,
            },
        }
    }
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Startup failure binding the listening socket.
    #[error("bind failed: {0}")]
    Bind(#[from] BindError),
    /// Malformed framing (bad magic, unsupported version, bad length). Connection-fatal.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Failure decoding a call's identity blob or request object. Connection-fatal.
    #[error("decode error: {0}")]
    Decode(String),
    /// Transport-level I/O failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// An error produced by the application dispatcher while handling a call.
///
/// Unlike [`Error`], this never tears down the connection — it is serialized
/// onto the reply frame for the call that triggered it, and the connection
/// keeps serving subsequent calls.
#[derive(Debug, Clone)]
pub struct ApplicationError {
    /// Fully-qualified name of the error, written to the wire so clients can
    /// dispatch on error type without string-matching the message.
    pub class: String,
    /// Human-readable message.
    pub message: String,
}

impl ApplicationError {
    /// Build an application error from a type name and message.
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
        }
    }

    /// The non-retryable error reported when a handler's accumulated response
    /// size would exceed the configured ceiling (`spec.md` §4.3).
    pub fn response_too_large(limit: usize) -> Self {
        Self::new(
            "hrpc.ResponseTooLargeException",
            format!("response exceeded the {limit}-byte per-call ceiling"),
        )
    }

    /// The error reported when a call negotiates a compression tag the server
    /// does not implement.
    pub fn unsupported_compression(tag: u8) -> Self {
        Self::new(
            "hrpc.UnsupportedCompressionException",
            format!("compression tag {tag} is not supported by this server"),
        )
    }
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class, self.message)
    }
}

impl std::error::Error for ApplicationError {}
