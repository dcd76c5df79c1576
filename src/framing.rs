//! Record framing: a stream of `[i32 BE length][payload]` frames.
//!
//! The payload is the wire encoding of exactly one value. A stream ends
//! cleanly only at a frame boundary; running dry anywhere else is
//! [`CerealError::Truncated`].

use std::io::{ErrorKind, Read, Write};
use std::marker::PhantomData;

use crate::buffer::ChunkedBuffer;
use crate::cerealizable::Cerealizable;
use crate::cerealizer::Cerealizer;
use crate::error::{CerealError, Result};

/// Size of the length header in front of every frame.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Writes framed records to any [`Write`].
///
/// No buffering is added; wrap files in a `BufWriter`.
#[derive(Debug)]
pub struct CerealWriter<W: Write> {
    inner: W,
    records: u64,
    bytes: u64,
}

impl<W: Write> CerealWriter<W> {
    /// Wraps `inner`.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            records: 0,
            bytes: 0,
        }
    }

    /// Encodes `value` and writes it as one frame.
    ///
    /// # Errors
    /// Encoding errors, or the sink's I/O error.
    pub fn write<T: Cerealizable>(&mut self, value: &T) -> Result<()> {
        let mut payload = value.to_buffer()?;
        self.write_raw(&mut payload)
    }

    /// Encodes `value` through `cerealizer` and writes it as one frame.
    ///
    /// # Errors
    /// Encoding errors, or the sink's I/O error.
    pub fn write_with<T, C: Cerealizer<T> + ?Sized>(&mut self, cerealizer: &C, value: &T) -> Result<()> {
        let mut payload = ChunkedBuffer::new();
        cerealizer.cerealize_to(&mut payload, value)?;
        self.write_raw(&mut payload)
    }

    /// Writes an already encoded payload as one frame and drains it.
    ///
    /// # Errors
    /// `OutOfRange` if the payload exceeds `i32::MAX` bytes, or the sink's
    /// I/O error.
    pub fn write_raw(&mut self, payload: &mut ChunkedBuffer) -> Result<()> {
        let len = i32::try_from(payload.len()).map_err(|_| {
            CerealError::OutOfRange(format!("{} byte record does not fit a frame", payload.len()))
        })?;
        self.inner.write_all(&len.to_be_bytes())?;
        payload.write_to(&mut self.inner)?;
        self.bytes += (FRAME_HEADER_SIZE + payload.len()) as u64;
        self.records += 1;
        payload.reset();
        Ok(())
    }

    /// Flushes the sink.
    ///
    /// # Errors
    /// The sink's I/O error.
    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    /// Number of frames written so far.
    pub fn records_written(&self) -> u64 {
        self.records
    }

    /// Number of bytes written so far, headers included.
    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    /// Borrows the sink.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Mutably borrows the sink.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Returns the sink. Nothing is flushed.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Reads framed records from any [`Read`].
#[derive(Debug)]
pub struct CerealReader<R: Read> {
    inner: R,
    position: u64,
    records: u64,
}

impl<R: Read> CerealReader<R> {
    /// Wraps `inner`.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            position: 0,
            records: 0,
        }
    }

    /// Bytes consumed so far. Never decreases.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Frames read so far.
    pub fn records_read(&self) -> u64 {
        self.records
    }

    /// Reads the next payload.
    ///
    /// Returns `Ok(None)` when the input ends exactly at a frame boundary.
    ///
    /// # Errors
    /// `Truncated` if the input stops inside a header or payload,
    /// `OutOfRange` for a negative length, or the source's I/O error.
    pub fn read_raw(&mut self) -> Result<Option<ChunkedBuffer>> {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        let got = self.fill(&mut header)?;
        if got == 0 {
            return Ok(None);
        }
        self.position += got as u64;
        if got < FRAME_HEADER_SIZE {
            return Err(CerealError::truncated(FRAME_HEADER_SIZE, got));
        }

        let len = i32::from_be_bytes(header);
        let len = usize::try_from(len)
            .map_err(|_| CerealError::OutOfRange(format!("negative frame length {len}")))?;

        let mut payload = Vec::with_capacity(len.min(crate::constants::DEFAULT_BUFFER_SIZE * 128));
        (&mut self.inner).take(len as u64).read_to_end(&mut payload)?;
        self.position += payload.len() as u64;
        if payload.len() < len {
            return Err(CerealError::truncated(len, payload.len()));
        }
        self.records += 1;
        Ok(Some(ChunkedBuffer::from(payload)))
    }

    /// Reads and decodes the next record: blank instance, then decode.
    ///
    /// # Errors
    /// See [`read_raw`](Self::read_raw), plus decoding errors.
    pub fn read<T: Cerealizable>(&mut self) -> Result<Option<T>> {
        match self.read_raw()? {
            Some(mut payload) => T::uncerealize(&mut payload).map(Some),
            None => Ok(None),
        }
    }

    /// Reads and decodes the next record through `cerealizer`.
    ///
    /// # Errors
    /// See [`read_raw`](Self::read_raw), plus decoding errors.
    pub fn read_with<T, C: Cerealizer<T> + ?Sized>(&mut self, cerealizer: &C) -> Result<Option<T>> {
        match self.read_raw()? {
            Some(mut payload) => cerealizer.uncerealize_from(&mut payload).map(Some),
            None => Ok(None),
        }
    }

    /// Iterates over the remaining records. Stops after the first error.
    pub fn records<T: Cerealizable>(&mut self) -> Records<'_, R, T> {
        Records {
            reader: self,
            done: false,
            _marker: PhantomData,
        }
    }

    /// Borrows the source.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Returns the source.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Reads until `buf` is full or the source is exhausted.
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }
}

/// Iterator returned by [`CerealReader::records`].
pub struct Records<'a, R: Read, T> {
    reader: &'a mut CerealReader<R>,
    done: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<R: Read, T: Cerealizable> Iterator for Records<'_, R, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.read::<T>() {
            Ok(Some(value)) => Some(Ok(value)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
