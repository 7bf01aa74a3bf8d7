//! Centralized error handling for Flatwire.
//!
//! All failure conditions are propagated through the [`Result`] type; the
//! library contains no panicking paths (enforced by clippy lints in
//! `lib.rs`). Errors fall into two families:
//!
//! - **Data-validation faults** ([`FlatwireError::OutOfBounds`],
//!   [`FlatwireError::InvalidOffset`], [`FlatwireError::TypeMismatch`]):
//!   the input buffer or value graph is malformed. Retrying cannot help;
//!   a failed parse yields no usable view and a failed write yields no
//!   usable buffer.
//! - **Programming-error faults** ([`FlatwireError::AssertionViolation`]):
//!   an internal invariant was broken, e.g. a type handle was used before
//!   its definition was registered. Callers should not catch and retry
//!   these; they indicate a bug in the calling code or in the library.
//!
//! [`FlatwireError::SchemaLimitExceeded`] sits on the write side: the value
//! graph does not fit the addressing capacity of the wire format (vtable
//! size, table body size, or the configured offset width). It is raised
//! before any buffer is handed to the caller.
//!
//! The error type is `Clone` so results can be shared across threads or
//! stored for later inspection; I/O errors are wrapped in an `Arc` to keep
//! cloning cheap.

use std::fmt;
use std::io;
use std::sync::Arc;

/// A specialized `Result` type for Flatwire operations.
pub type Result<T> = std::result::Result<T, FlatwireError>;

/// The master error enum covering all failure domains in Flatwire.
#[derive(Debug, Clone)]
pub enum FlatwireError {
    /// Low-level I/O failure while opening or mapping a file-backed buffer.
    ///
    /// The underlying `io::Error` is wrapped in an `Arc` to make the error
    /// `Clone`.
    Io(Arc<io::Error>),

    /// A computed read or write position exceeds the buffer length.
    ///
    /// Fatal for the current parse or write call. Never silently truncated.
    OutOfBounds {
        /// The offending absolute position.
        position: usize,
        /// The length of the buffer being accessed.
        length: usize,
    },

    /// A decoded offset is zero where a required reference was expected, or
    /// resolves outside the buffer.
    ///
    /// Offsets on the wire are strictly forward-pointing, so a buffer that
    /// trips this check is corrupt or truncated.
    InvalidOffset(String),

    /// The value graph exceeds what the wire format can address: too many
    /// field slots for a vtable, a table body larger than 64 KiB, or a
    /// buffer larger than the configured offset width can reach.
    ///
    /// Raised before any partial buffer is returned.
    SchemaLimitExceeded(String),

    /// A union discriminant does not match any declared member, a value does
    /// not match the declared type of its field, or a root buffer's file
    /// identifier does not match the expected value under strict checking.
    TypeMismatch(String),

    /// An internal invariant was broken.
    ///
    /// This is a programming-error fault, not a data-validation fault. It
    /// should not occur in production; if it does, it indicates a bug in
    /// the registry construction or in the library itself.
    AssertionViolation(String),
}

impl fmt::Display for FlatwireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O Error: {e}"),
            Self::OutOfBounds { position, length } => {
                write!(
                    f,
                    "Out of Bounds: position {position} exceeds buffer length {length}"
                )
            }
            Self::InvalidOffset(s) => write!(f, "Invalid Offset: {s}"),
            Self::SchemaLimitExceeded(s) => write!(f, "Schema Limit Exceeded: {s}"),
            Self::TypeMismatch(s) => write!(f, "Type Mismatch: {s}"),
            Self::AssertionViolation(s) => write!(f, "Assertion Violation: {s}"),
        }
    }
}

impl std::error::Error for FlatwireError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FlatwireError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}
