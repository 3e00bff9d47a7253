//! Dispatcher error types.

use std::io;

/// Convenience result alias for dispatcher operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the dispatcher.
///
/// Transport conditions the dispatcher absorbs (would-block, interruption,
/// peer closure) never appear here; they are delivered through the completion
/// callbacks instead. A `Transfer` error means the loop is no longer in a
/// well-defined state and the embedder should drop the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Backend setup, registration, or wait failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A recv or send failed with an error the dispatcher does not absorb.
    #[error("transfer failed on {conn}: {source}")]
    Transfer {
        /// Diagnostic description of the connection.
        conn: String,
        /// The underlying transport error.
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// The OS error code carried by this error, if any.
    pub fn os_error(&self) -> Option<i32> {
        match self {
            Error::Io(e) => e.raw_os_error(),
            Error::Transfer { source, .. } => source.raw_os_error(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_error_display() {
        let err = Error::Transfer {
            conn: "tcp fd=7".to_string(),
            source: io::Error::from_raw_os_error(104),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("tcp fd=7"));
        assert_eq!(err.os_error(), Some(104));
    }

    #[test]
    fn test_io_error_from() {
        let err: Error = io::Error::new(io::ErrorKind::AddrInUse, "bind").into();
        assert!(matches!(err, Error::Io(_)));
    }
}
