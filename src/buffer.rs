//! The chunked byte buffer: Cereal's encoding scratch space and the in-memory
//! form of one framed record.
//!
//! Bytes can be attached at either end in O(1) without copying, and consumed
//! from the front only. Appends just push another [`Bytes`] view onto a deque;
//! the first removal after appends pays a single O(len) [`coalesce`] into one
//! contiguous allocation, after which removals only move the view's start.
//!
//! A buffer never writes into memory it did not allocate itself, so callers
//! can hand over blocks without defensive copies. It is not meant to be
//! shared: every mutation goes through `&mut self`.
//!
//! [`coalesce`]: ChunkedBuffer::coalesce

use std::collections::VecDeque;
use std::io::{Read, Write};

use bytes::{Bytes, BytesMut};

use crate::constants::DEFAULT_BUFFER_SIZE;
use crate::error::{CerealError, Result};

/// An append-at-both-ends, remove-from-front byte sequence.
#[derive(Debug, Default)]
pub struct ChunkedBuffer {
    chunks: VecDeque<Bytes>,
    len: usize,
}

impl ChunkedBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current logical length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no bytes are left.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of internal segments. `1` right after a coalesce.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Attaches `bytes` after the current content.
    pub fn append_back(&mut self, bytes: impl Into<Bytes>) {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return;
        }
        self.len += bytes.len();
        self.chunks.push_back(bytes);
    }

    /// Attaches `bytes` before the current content.
    pub fn append_front(&mut self, bytes: impl Into<Bytes>) {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return;
        }
        self.len += bytes.len();
        self.chunks.push_front(bytes);
    }

    /// Attaches the window `block[from..from + len]` after the current content.
    ///
    /// # Errors
    /// `OutOfRange` if the window does not fit inside `block`.
    pub fn append_back_slice(&mut self, block: &Bytes, from: usize, len: usize) -> Result<()> {
        let window = Self::window(block, from, len)?;
        self.append_back(window);
        Ok(())
    }

    /// Attaches the window `block[from..from + len]` before the current content.
    ///
    /// # Errors
    /// `OutOfRange` if the window does not fit inside `block`.
    pub fn append_front_slice(&mut self, block: &Bytes, from: usize, len: usize) -> Result<()> {
        let window = Self::window(block, from, len)?;
        self.append_front(window);
        Ok(())
    }

    fn window(block: &Bytes, from: usize, len: usize) -> Result<Bytes> {
        match from.checked_add(len) {
            Some(end) if end <= block.len() => Ok(block.slice(from..end)),
            _ => Err(CerealError::OutOfRange(format!(
                "window {from}+{len} exceeds a block of {} bytes",
                block.len()
            ))),
        }
    }

    /// Merges all segments into a single freshly allocated one.
    ///
    /// No-op when the buffer already holds at most one segment.
    pub fn coalesce(&mut self) {
        if self.chunks.len() <= 1 {
            return;
        }
        let mut merged = BytesMut::with_capacity(self.len);
        for chunk in self.chunks.drain(..) {
            merged.extend_from_slice(&chunk);
        }
        self.chunks.push_back(merged.freeze());
    }

    /// Removes and returns the next `n` bytes.
    ///
    /// Coalesces first if the content is spread over several segments. The
    /// returned view shares the coalesced allocation, so repeated removals
    /// after a coalesce do not copy.
    ///
    /// # Errors
    /// `OutOfRange` if `n` exceeds [`len`](Self::len).
    pub fn remove_front(&mut self, n: usize) -> Result<Bytes> {
        if n > self.len {
            return Err(CerealError::OutOfRange(format!(
                "tried to remove {n} bytes while length is {}",
                self.len
            )));
        }
        if n == 0 {
            return Ok(Bytes::new());
        }
        self.coalesce();
        let front = self
            .chunks
            .front_mut()
            .ok_or_else(|| CerealError::Internal("non-empty buffer without chunks".into()))?;
        let taken = front.split_to(n);
        if front.is_empty() {
            self.chunks.pop_front();
        }
        self.len -= n;
        Ok(taken)
    }

    /// Removes and returns everything. The buffer is empty afterwards.
    pub fn remove_all(&mut self) -> Bytes {
        self.coalesce();
        self.len = 0;
        self.chunks.pop_front().unwrap_or_default()
    }

    /// Copies the whole content without consuming it.
    pub fn copy_all(&mut self) -> Vec<u8> {
        self.coalesce();
        self.chunks
            .front()
            .map(|chunk| chunk.to_vec())
            .unwrap_or_default()
    }

    /// Writes the whole content to `writer` segment by segment, without
    /// coalescing or consuming.
    ///
    /// # Errors
    /// The writer's I/O error.
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        for chunk in &self.chunks {
            writer.write_all(chunk)?;
        }
        Ok(())
    }

    /// Drops all content.
    pub fn reset(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }

    /// Replaces the content with `bytes`.
    pub fn reset_to(&mut self, bytes: impl Into<Bytes>) {
        self.reset();
        self.append_back(bytes);
    }

    /// Reads `reader` to its end into a new buffer.
    ///
    /// `max_len` bounds memory use when the source is untrusted; `None`
    /// means unbounded.
    ///
    /// # Errors
    /// `OutOfRange` once `max_len` bytes were read before end of input, or
    /// the reader's I/O error.
    pub fn read_from<R: Read>(reader: &mut R, max_len: Option<usize>) -> Result<Self> {
        let mut buffer = Self::new();
        loop {
            let mut block = vec![0u8; DEFAULT_BUFFER_SIZE];
            let read = match reader.read(&mut block) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            block.truncate(read);
            buffer.append_back(block);
            if let Some(limit) = max_len
                && buffer.len() >= limit
            {
                return Err(CerealError::OutOfRange(format!(
                    "input reached the {limit} byte limit before its end"
                )));
            }
        }
        Ok(buffer)
    }
}

impl Clone for ChunkedBuffer {
    /// Deep copy: the clone owns a fresh allocation and shares nothing.
    fn clone(&self) -> Self {
        let mut merged = BytesMut::with_capacity(self.len);
        for chunk in &self.chunks {
            merged.extend_from_slice(chunk);
        }
        let mut copy = Self::new();
        copy.append_back(merged.freeze());
        copy
    }
}

impl PartialEq for ChunkedBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len
            && self
                .chunks
                .iter()
                .flat_map(|c| c.iter())
                .eq(other.chunks.iter().flat_map(|c| c.iter()))
    }
}

impl Eq for ChunkedBuffer {}

impl From<Vec<u8>> for ChunkedBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        let mut buffer = Self::new();
        buffer.append_back(bytes);
        buffer
    }
}

impl From<Bytes> for ChunkedBuffer {
    fn from(bytes: Bytes) -> Self {
        let mut buffer = Self::new();
        buffer.append_back(bytes);
        buffer
    }
}

impl From<&[u8]> for ChunkedBuffer {
    fn from(bytes: &[u8]) -> Self {
        Self::from(bytes.to_vec())
    }
}
