//! Centralized error handling for Cereal.
//!
//! Every fallible operation in the crate returns [`Result`], and nothing in the
//! library panics on malformed input. Errors fall into two propagation classes:
//!
//! 1. **Immediate:** buffer and codec errors ([`CerealError::OutOfRange`],
//!    [`CerealError::Truncated`], [`CerealError::ConstructionFailure`]) describe
//!    structurally broken input. They are returned straight away and never
//!    retried.
//!
//! 2. **Deferred:** errors raised inside a pipeline worker thread are captured
//!    (first one wins), stored, and replayed to the caller on its next call as
//!    [`CerealError::WorkerFailure`]. This is why the type is `Clone`: the
//!    stored error must outlive the thread that produced it.
//!
//! Invalid UTF-8 inside a string field is not an error at all: the offending
//! bytes are dropped during decoding.
//!
//! ## Usage
//!
//! ```rust
//! use cereal::{ChunkedBuffer, CerealError};
//!
//! let mut buf = ChunkedBuffer::from(vec![0u8, 1]);
//! match buf.get_i32() {
//!     Err(CerealError::OutOfRange(msg)) => println!("short buffer: {msg}"),
//!     other => panic!("unexpected {other:?}"),
//! }
//! ```

use std::fmt;
use std::io;
use std::sync::Arc;

/// A specialized `Result` type for Cereal operations.
pub type Result<T> = std::result::Result<T, CerealError>;

/// The master error enum covering all failure domains in Cereal.
#[derive(Debug, Clone)]
pub enum CerealError {
    /// Low-level I/O failure reported by a source, sink or temp file.
    ///
    /// Wrapped in an `Arc` so the error stays `Clone`.
    Io(Arc<io::Error>),

    /// Fewer bytes were available than a length prefix promised, or the
    /// stream stopped in the middle of a frame.
    ///
    /// Running out of input exactly at a frame boundary is not an error: the
    /// frame reader reports it as end of stream instead.
    Truncated {
        /// Number of bytes the reader needed.
        expected: usize,
        /// Number of bytes that were actually there.
        available: usize,
    },

    /// A request addressed bytes or bits that are not present: removing more
    /// than the buffer holds, a bitmap index past its size, or a length prefix
    /// that cannot be valid.
    OutOfRange(String),

    /// A type's factory could not produce the blank instance that decoding
    /// starts from.
    ConstructionFailure(String),

    /// The requested compression mode is unknown or was compiled out.
    Compression(String),

    /// A pipeline worker failed. Reported once, on the caller's next call.
    WorkerFailure {
        /// Name of the stage that failed (`decompress`, `decode`, ...).
        stage: &'static str,
        /// The error raised inside the worker.
        source: Box<CerealError>,
    },

    /// An external sort aborted. Temp files were already removed.
    SortFailure {
        /// Sort phase that failed (`partition` or `merge`).
        phase: &'static str,
        /// The error that aborted the sort.
        source: Box<CerealError>,
    },

    /// A pipeline was used after it was closed or after it reported a
    /// worker failure.
    Closed,

    /// Logic error inside the crate: poisoned lock, panicked worker.
    /// Should not occur in production.
    Internal(String),
}

impl CerealError {
    /// Builds a [`CerealError::Truncated`].
    pub fn truncated(expected: usize, available: usize) -> Self {
        Self::Truncated {
            expected,
            available,
        }
    }

    /// Returns the innermost error, looking through worker and sort wrappers.
    pub fn root_cause(&self) -> &CerealError {
        match self {
            Self::WorkerFailure { source, .. } | Self::SortFailure { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }
}

impl fmt::Display for CerealError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O Error: {e}"),
            Self::Truncated {
                expected,
                available,
            } => write!(
                f,
                "Truncated Input: needed {expected} bytes but only {available} were available"
            ),
            Self::OutOfRange(s) => write!(f, "Out Of Range: {s}"),
            Self::ConstructionFailure(s) => write!(f, "Construction Failure: {s}"),
            Self::Compression(s) => write!(f, "Compression Error: {s}"),
            Self::WorkerFailure { stage, source } => {
                write!(f, "Pipeline Worker '{stage}' Failed: {source}")
            }
            Self::SortFailure { phase, source } => {
                write!(f, "External Sort Failed During {phase}: {source}")
            }
            Self::Closed => write!(f, "Pipeline Closed"),
            Self::Internal(s) => write!(f, "Internal Logic Error: {s}"),
        }
    }
}

impl std::error::Error for CerealError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::WorkerFailure { source, .. } | Self::SortFailure { source, .. } => {
                Some(source.as_ref())
            }
            _ => None,
        }
    }
}

impl From<io::Error> for CerealError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}
