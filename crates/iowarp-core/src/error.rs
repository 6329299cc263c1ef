//! Error types shared by the iowarp crates.

use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    io, result,
};

/// Opaque identifier of a platform I/O handle (file, socket, pipe).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawHandle(pub u64);

impl Display for RawHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "handle#{}", self.0)
    }
}

/// Wrapped result type for iowarp operations.
pub type Result<T> = result::Result<T, ErrorKind>;

/// Enum with all possible errors that can occur.
#[derive(Debug)]
pub enum ErrorKind {
    /// Wrapper around a std io::Error.
    IOError(io::Error),
    /// The handle is already associated with a completion port for its lifetime.
    HandleAlreadyAssociated(RawHandle),
    /// The handle was never associated with the completion port (or was closed).
    HandleNotAssociated(RawHandle),
    /// The completion port has been shut down and accepts no more packets.
    PortClosed,
    /// The dispatch thread could not be started; the bridge is not functional.
    DispatcherUnavailable,
    /// A notifier was enabled before a handle was assigned to it.
    NotifierHandleMissing,
}

impl Display for ErrorKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::IOError(e) => write!(fmt, "An IO Error occurred. Reason: {:?}.", e),
            ErrorKind::HandleAlreadyAssociated(handle) => write!(
                fmt,
                "The {} is already associated with a completion port and cannot be registered twice.",
                handle
            ),
            ErrorKind::HandleNotAssociated(handle) => {
                write!(fmt, "The {} is not associated with this completion port.", handle)
            }
            ErrorKind::PortClosed => write!(fmt, "The completion port has been closed."),
            ErrorKind::DispatcherUnavailable => {
                write!(fmt, "The completion dispatch thread is not running.")
            }
            ErrorKind::NotifierHandleMissing => {
                write!(fmt, "A handle must be set before the notifier can be enabled.")
            }
        }
    }
}

impl Error for ErrorKind {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ErrorKind::IOError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ErrorKind {
    fn from(inner: io::Error) -> ErrorKind {
        ErrorKind::IOError(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_handle() {
        let err = ErrorKind::HandleAlreadyAssociated(RawHandle(7));
        assert!(err.to_string().contains("handle#7"));
    }

    #[test]
    fn test_io_error_conversion_keeps_source() {
        let err: ErrorKind = io::Error::new(io::ErrorKind::Other, "spawn failed").into();
        assert!(matches!(err, ErrorKind::IOError(_)));
        assert!(err.source().is_some());
        assert!(ErrorKind::PortClosed.source().is_none());
    }
}
