//! Single status-code namespace for the server core, modeled on the OPC UA status
//! codes used throughout this subsystem. Every fallible entry point in `opcua-server`
//! and `opcua-transport-tcp`
//! returns `Result<_, ServerError>` or a type that converts into it.

use std::fmt;
use std::io;

use crate::ids::ReverseConnectHandle;

/// The stable classification carried by every [`ServerError`]. Kept separate from the
/// error itself so callers can match on "what kind of thing happened" without pattern
/// matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Null/absent required argument, or a URL/URI that failed to parse.
    InvalidArgument,
    /// Allocation failure growing the namespace table or a reverse-connect entry.
    OutOfMemory,
    /// A lookup (namespace, reverse-connect handle, security policy) missed.
    NotFound,
    /// No connection manager accepted a listen request, or a comparable internal
    /// condition that isn't the caller's fault.
    Internal,
    /// A reverse-connect attempt found its target connection manager not yet started;
    /// retry at the next scheduler tick.
    AsyncInProgress,
    /// Server construction cannot proceed (no node store, no event loop configured).
    FatalInit,
}

/// The crate-wide error type. Construction always goes through the `ServerError::*`
/// constructors below rather than building the struct literal, so every error carries
/// a [`ErrorKind`] and a human-readable message.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// See [`ErrorKind::InvalidArgument`].
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// See [`ErrorKind::OutOfMemory`].
    #[error("out of memory: {message}")]
    OutOfMemory { message: String },

    /// Namespace lookup by URI or index missed.
    #[error("namespace not found: {message}")]
    NamespaceNotFound { message: String },

    /// `removeReverseConnect` was called with a handle that is not currently tracked.
    #[error("reverse-connect handle {handle} is not registered")]
    ReverseConnectNotFound { handle: ReverseConnectHandle },

    /// See [`ErrorKind::Internal`]. Logged as a warning at the call site per the
    /// propagation policy; returned here so tests can assert on it.
    #[error("internal error: {message}")]
    Internal { message: String },

    /// See [`ErrorKind::AsyncInProgress`].
    #[error("operation in progress, retry at next tick: {message}")]
    AsyncInProgress { message: String },

    /// See [`ErrorKind::FatalInit`]. Returned only from `Server::new`/`Server::init`.
    #[error("fatal initialization error: {message}")]
    FatalInit { message: String },

    /// A lower-level transport failure surfaced through `std::io::Error`.
    #[error("transport I/O error: {source}")]
    Io {
        #[source]
        source: io::Error,
    },
}

impl ServerError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument { message: message.into() }
    }

    pub fn out_of_memory(message: impl Into<String>) -> Self {
        Self::OutOfMemory { message: message.into() }
    }

    pub fn namespace_not_found(message: impl Into<String>) -> Self {
        Self::NamespaceNotFound { message: message.into() }
    }

    pub fn reverse_connect_not_found(handle: ReverseConnectHandle) -> Self {
        Self::ReverseConnectNotFound { handle }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    pub fn async_in_progress(message: impl Into<String>) -> Self {
        Self::AsyncInProgress { message: message.into() }
    }

    pub fn fatal_init(message: impl Into<String>) -> Self {
        Self::FatalInit { message: message.into() }
    }

    /// The stable classification for this error, used by callers that branch on
    /// "retry vs. give up vs. abort" rather than on the specific variant.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            Self::NamespaceNotFound { .. } | Self::ReverseConnectNotFound { .. } => {
                ErrorKind::NotFound
            }
            Self::Internal { .. } | Self::Io { .. } => ErrorKind::Internal,
            Self::AsyncInProgress { .. } => ErrorKind::AsyncInProgress,
            Self::FatalInit { .. } => ErrorKind::FatalInit,
        }
    }
}

impl From<io::Error> for ServerError {
    fn from(source: io::Error) -> Self {
        Self::Io { source }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::InvalidArgument => "invalid-argument",
            Self::OutOfMemory => "out-of-memory",
            Self::NotFound => "not-found",
            Self::Internal => "internal-error",
            Self::AsyncInProgress => "async-in-progress",
            Self::FatalInit => "fatal-init",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_reflects_constructor() {
        assert_eq!(ServerError::invalid_argument("x").kind(), ErrorKind::InvalidArgument);
        assert_eq!(
            ServerError::reverse_connect_not_found(ReverseConnectHandle::from_raw(7)).kind(),
            ErrorKind::NotFound
        );
    }
}
