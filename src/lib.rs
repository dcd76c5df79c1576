//! # Cereal
//!
//! A big-endian binary record codec with a disk-backed merge sorter and
//! threaded (de)compression pipelines built on top of it.
//!
//! ## Overview
//!
//! Cereal encodes values into a compact, bit-exact wire format with no schema
//! on the wire: field order is fixed by the code that writes it. Records are
//! framed one after another in a stream, and two subsystems work on those
//! streams without ever looking inside a record:
//!
//! *   **External sorting:** [`ExternalSorter`] sorts streams far larger than
//!     memory by spilling sorted blocks to temporary runs and merging them.
//! *   **Pipelined I/O:** [`PipelinedReader`] and [`PipelinedWriter`] move
//!     compression and (de)serialization onto two worker threads, so the
//!     caller only hands values in or takes them out.
//!
//! ## Architecture
//!
//! ### The Buffer
//!
//! Every encode and decode goes through a [`ChunkedBuffer`]: a deque of
//! shared `bytes::Bytes` chunks. Appending a chunk or removing bytes from the
//! front never copies the payload; only [`ChunkedBuffer::coalesce`] does.
//!
//! ### Wire Format
//!
//! The codec methods live directly on [`ChunkedBuffer`] (see [`wire`]):
//!
//! ```text
//! integers        big-endian, two's complement
//! f32 / f64       IEEE-754 bits, NaN canonicalized
//! bool            one byte, 0 or 1
//! string / bytes  [i32 length][payload], length -1 = null
//! uuid            [i64 msb][i64 lsb]
//! array           [i32 count][elements], nested per dimension
//! ```
//!
//! ### Record Framing
//!
//! A stream of records is a sequence of frames:
//!
//! ```text
//! [i32 len][payload] [i32 len][payload] ... EOF
//! ```
//!
//! The stream may only end on a frame boundary. [`CerealWriter`] and
//! [`CerealReader`] produce and consume it.
//!
//! ## Core Concepts
//!
//! ### Capabilities
//!
//! A type takes part in encoding in one of two ways:
//!
//! *   [`Cerealizable`]: the type encodes itself. Decoding builds a blank
//!     instance first, then fills it in. `#[derive(Cerealizable)]` writes
//!     both halves for structs with named fields.
//! *   [`Cerealizer`]: an external codec for a type that cannot implement
//!     the trait itself, such as `Option<String>` or [`Locale`].
//!
//! ## Usage Patterns
//!
//! ### Encoding a record
//!
//! ```rust
//! use cereal::{Cerealizable, CerealReader, CerealWriter};
//!
//! #[derive(Cerealizable, Debug, PartialEq)]
//! struct Reading {
//!     station: String,
//!     timestamp: i64,
//!     celsius: Option<f64>,
//! }
//!
//! # fn main() -> cereal::Result<()> {
//! let mut writer = CerealWriter::new(Vec::new());
//! writer.write(&Reading { station: "KSEA".into(), timestamp: 7, celsius: None })?;
//!
//! let bytes = writer.into_inner();
//! let mut reader = CerealReader::new(bytes.as_slice());
//! let back: Reading = reader.read()?.ok_or(cereal::CerealError::Closed)?;
//! assert_eq!(back.station, "KSEA");
//! assert_eq!(back.celsius, None);
//! # Ok(())
//! # }
//! ```
//!
//! ### Sorting a file in place
//!
//! ```rust,ignore
//! let mut sorter = ExternalSorter::new(|a: &Reading, b: &Reading| a.timestamp.cmp(&b.timestamp));
//! sorter.sort_files("readings.cereal", "readings.cereal")?;
//! ```
//!
//! ### Compressed streams
//!
//! ```rust,ignore
//! let config = PipelineConfig::new(Compression::Gzip);
//! let mut writer = PipelinedWriter::create(File::create("readings.cereal.gz")?, config)?;
//! for reading in readings {
//!     writer.write(reading)?;
//! }
//! writer.close()?;
//! ```
//!
//! ## Features
//!
//! - `gzip` (default): [`Compression::Gzip`] through `flate2`.
//! - `snappy` (default): [`Compression::Snappy`] through `snap`, frame format.
//! - `lz4`: [`Compression::Lz4`] through `lz4_flex`, frame format.
//!
//! ### Safety and Error Handling
//!
//! * **No Unsafe:** the crate forbids `unsafe` code.
//! * **No Panics:** No `unwrap()` or `panic!()` calls in the library (enforced by clippy lints).
//! * **Comprehensive Errors:** All failures correspond to a [`CerealError`] type.
//! * **Deferred Worker Errors:** Pipeline failures are captured once and
//!   reported on the caller's next call.
//! * **Logging:** Events go through the `log` facade under the `cereal` target.
//!   No logger is installed by the library.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::panic))]

// Lets derived code inside this crate name it `::cereal`.
extern crate self as cereal;

// --- PUBLIC API MODULES ---
pub mod bitmap;
pub mod buffer;
pub mod cerealizable;
pub mod cerealizer;
pub mod compression;
pub mod config;
pub mod error;
pub mod framing;
pub mod pipe;
pub mod pipeline;
pub mod sorter;
pub mod wire;

// Private modules
mod heap;
mod logging;

// --- RE-EXPORTS ---

pub use bitmap::{BitMap, NullBitMap};
pub use buffer::ChunkedBuffer;
pub use cerealizable::{CerealField, Cerealizable};
pub use cerealizer::{
    BitMapCerealizer, CerealizableCerealizer, Cerealizer, ListCerealizer, Locale,
    LocaleCerealizer, StringCerealizer, UuidCerealizer,
};
pub use compression::{CompressedWriter, Compression};
pub use config::{PipelineConfig, SortConfig};
pub use error::{CerealError, Result};
pub use framing::{CerealReader, CerealWriter, FRAME_HEADER_SIZE, Records};
pub use pipe::{PipeReader, PipeWriter, pipe};
pub use pipeline::{PipelinedReader, PipelinedWriter};
pub use sorter::{ExternalSorter, SortState, SortStats};

// Re-export the derive macro so it is accessible as `cereal::Cerealizable`
pub use cereal_derive::Cerealizable;

/// Constants used throughout the library.
pub mod constants {
    use std::time::Duration;

    /// The default buffer size for file I/O in the sorter and for buffered
    /// reads of whole streams.
    pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

    /// Encoded bytes per in-memory sort block.
    pub const DEFAULT_BLOCK_SIZE: u64 = 10 * 1024 * 1024;

    /// Buffer in front of a pipeline's raw source or sink.
    pub const DEFAULT_IO_BUFFER_SIZE: usize = 1024 * 1024;

    /// Values held between a pipeline's caller and its codec worker.
    pub const DEFAULT_QUEUE_CAPACITY: usize = 512;

    /// Chunks in flight in the byte pipe between the two pipeline workers.
    pub const DEFAULT_PIPE_CAPACITY: usize = 16;

    /// Largest chunk pushed through the byte pipe.
    pub const DEFAULT_PIPE_CHUNK_SIZE: usize = 64 * 1024;

    /// Queue poll interval of `PipelinedReader::read`.
    pub const DEFAULT_READ_POLL: Duration = Duration::from_millis(100);

    /// Queue poll interval of the pipeline encode worker.
    pub const DEFAULT_WRITE_POLL: Duration = Duration::from_millis(10);
}
