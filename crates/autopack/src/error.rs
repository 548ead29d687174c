//! Error types for autopack

use crate::format::Behavior;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Core error types for the autopack library
///
/// Errors are `Clone` so that the first failure recorded by a background
/// worker can be handed back, unchanged, on every later stream call.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Stream used before it was bound to a directory
    #[error("{0} must be constructed with a directory before use")]
    NotInitialized(&'static str),

    /// Behavior name did not match any known format
    #[error("Unknown value for 'pack' parameter: {0}")]
    UnknownFormat(String),

    /// Host operating system cannot auto-pack or auto-unpack
    #[error("Auto-unpacking functionality not supported on {0}")]
    UnsupportedPlatform(String),

    /// Signature budget exhausted with no match
    #[error("Unable to detect pack type")]
    UnableToDetect,

    /// Format is recognized but has no codec
    #[error("{0} has not yet been implemented")]
    NotImplemented(Behavior),

    /// Archive entry (or hard-link target) resolves outside the destination
    #[error("Archive entry {entry:?} resolves to {resolved:?}, outside the destination directory")]
    PathTraversal { entry: PathBuf, resolved: PathBuf },

    /// Filesystem or stream I/O failure
    #[error("Failure when {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: Arc<io::Error>,
    },

    /// Internal contract violated while streaming
    #[error("Stream invariant violated: {0}")]
    StreamInvariant(String),

    /// Stream closed before it did any work
    #[error("{0}")]
    Incomplete(String),

    /// Operation attempted after close
    #[error("Stream already closed")]
    Closed,

    /// Configuration-related error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Wrap an I/O error with the operation and path it happened on
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        // Errors that already carry one of ours (e.g. surfaced through a
        // decoder reading the bridge) keep their original identity.
        if let Some(inner) = Self::from_io(&source) {
            return inner.clone();
        }
        Error::Io {
            context: context.into(),
            source: Arc::new(source),
        }
    }

    /// Recover an autopack error carried inside an `io::Error`
    pub fn from_io(err: &io::Error) -> Option<&Error> {
        err.get_ref().and_then(|inner| inner.downcast_ref::<Error>())
    }

    fn kind(&self) -> io::ErrorKind {
        match self {
            Error::NotInitialized(_) | Error::Closed => io::ErrorKind::NotConnected,
            Error::UnknownFormat(_) | Error::Config(_) => io::ErrorKind::InvalidInput,
            Error::UnsupportedPlatform(_) | Error::NotImplemented(_) => io::ErrorKind::Unsupported,
            Error::UnableToDetect | Error::PathTraversal { .. } => io::ErrorKind::InvalidData,
            Error::Io { source, .. } => source.kind(),
            Error::Incomplete(_) => io::ErrorKind::UnexpectedEof,
            Error::StreamInvariant(_) => io::ErrorKind::Other,
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        io::Error::new(err.kind(), err)
    }
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        let context = match err.path() {
            Some(path) => format!("walking {}", path.display()),
            None => "walking source directory".to_string(),
        };
        Error::io(context, err.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_survives_io_round_trip() {
        let io_err: io::Error = Error::UnableToDetect.into();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidData);
        assert!(matches!(Error::from_io(&io_err), Some(Error::UnableToDetect)));
    }

    #[test]
    fn test_io_wrapping_keeps_inner_error() {
        let io_err: io::Error = Error::NotImplemented(Behavior::Zip).into();
        let wrapped = Error::io("reading archive", io_err);
        assert!(matches!(wrapped, Error::NotImplemented(Behavior::Zip)));
    }

    #[test]
    fn test_plain_io_error_is_wrapped_with_context() {
        let wrapped = Error::io(
            "creating /tmp/x",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(wrapped.to_string().contains("creating /tmp/x"));
        let io_err: io::Error = wrapped.into();
        assert_eq!(io_err.kind(), io::ErrorKind::PermissionDenied);
    }
}
