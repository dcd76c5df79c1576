//! Tuning knobs for the sorter and the pipelines.
//!
//! Both configs are plain values with defaults taken from
//! [`constants`](crate::constants) and consuming `with_*` setters:
//!
//! ```rust
//! use cereal::{Compression, PipelineConfig, SortConfig};
//!
//! let sort = SortConfig::default().with_block_size(64 * 1024);
//! let pipeline = PipelineConfig::default()
//!     .with_compression(Compression::None)
//!     .with_queue_capacity(64);
//! assert_eq!(sort.block_size(), 64 * 1024);
//! assert_eq!(pipeline.queue_capacity(), 64);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::compression::Compression;
use crate::constants::{
    DEFAULT_BLOCK_SIZE, DEFAULT_IO_BUFFER_SIZE, DEFAULT_PIPE_CAPACITY, DEFAULT_PIPE_CHUNK_SIZE,
    DEFAULT_QUEUE_CAPACITY, DEFAULT_READ_POLL, DEFAULT_WRITE_POLL,
};

/// Settings for an [`ExternalSorter`](crate::ExternalSorter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortConfig {
    block_size: u64,
    workspace: PathBuf,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            workspace: std::env::temp_dir(),
        }
    }
}

impl SortConfig {
    /// Encoded bytes gathered into one in-memory block before it is sorted
    /// and spilled. Clamped to at least one byte.
    pub fn with_block_size(mut self, bytes: u64) -> Self {
        self.block_size = bytes.max(1);
        self
    }

    /// Directory that receives the temporary runs.
    pub fn with_workspace(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace = dir.into();
        self
    }

    /// Block size in encoded bytes.
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Directory for temporary runs.
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }
}

/// Settings shared by [`PipelinedReader`](crate::PipelinedReader) and
/// [`PipelinedWriter`](crate::PipelinedWriter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    compression: Compression,
    io_buffer_size: usize,
    queue_capacity: usize,
    pipe_capacity: usize,
    pipe_chunk_size: usize,
    read_poll: Duration,
    write_poll: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            io_buffer_size: DEFAULT_IO_BUFFER_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
            pipe_chunk_size: DEFAULT_PIPE_CHUNK_SIZE,
            read_poll: DEFAULT_READ_POLL,
            write_poll: DEFAULT_WRITE_POLL,
        }
    }
}

impl PipelineConfig {
    /// Config with every default except the compression mode.
    pub fn new(compression: Compression) -> Self {
        Self::default().with_compression(compression)
    }

    /// Compression applied between the record stream and the raw bytes.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Buffer size on the raw source or sink.
    pub fn with_io_buffer_size(mut self, bytes: usize) -> Self {
        self.io_buffer_size = bytes.max(1);
        self
    }

    /// Decoded (or pending) values held between the caller and the codec
    /// stage.
    pub fn with_queue_capacity(mut self, items: usize) -> Self {
        self.queue_capacity = items.max(1);
        self
    }

    /// Chunks the byte pipe between the two workers can hold.
    pub fn with_pipe_capacity(mut self, chunks: usize) -> Self {
        self.pipe_capacity = chunks.max(1);
        self
    }

    /// Largest chunk a worker pushes into the byte pipe at once.
    pub fn with_pipe_chunk_size(mut self, bytes: usize) -> Self {
        self.pipe_chunk_size = bytes.max(1);
        self
    }

    /// How long `read()` waits on the queue before re-checking worker state.
    pub fn with_read_poll(mut self, interval: Duration) -> Self {
        self.read_poll = interval;
        self
    }

    /// How long the encode worker waits on the queue before re-checking
    /// whether it should stop.
    pub fn with_write_poll(mut self, interval: Duration) -> Self {
        self.write_poll = interval;
        self
    }

    /// Compression mode.
    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Raw I/O buffer size.
    pub fn io_buffer_size(&self) -> usize {
        self.io_buffer_size
    }

    /// Queue capacity in values.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Pipe capacity in chunks.
    pub fn pipe_capacity(&self) -> usize {
        self.pipe_capacity
    }

    /// Pipe chunk size in bytes.
    pub fn pipe_chunk_size(&self) -> usize {
        self.pipe_chunk_size
    }

    /// Read-side poll interval.
    pub fn read_poll(&self) -> Duration {
        self.read_poll
    }

    /// Write-side poll interval.
    pub fn write_poll(&self) -> Duration {
        self.write_poll
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.compression(), Compression::None);
        assert_eq!(config.queue_capacity(), 512);
        assert_eq!(config.io_buffer_size(), 1024 * 1024);
        assert_eq!(config.read_poll(), Duration::from_millis(100));
        assert_eq!(config.write_poll(), Duration::from_millis(10));
        assert_eq!(SortConfig::default().block_size(), 10 * 1024 * 1024);
    }

    #[test]
    fn test_zero_sizes_are_clamped() {
        let config = PipelineConfig::default()
            .with_queue_capacity(0)
            .with_pipe_capacity(0);
        assert_eq!(config.queue_capacity(), 1);
        assert_eq!(config.pipe_capacity(), 1);
        assert_eq!(SortConfig::default().with_block_size(0).block_size(), 1);
    }
}
