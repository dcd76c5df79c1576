//! A bounded in-memory byte pipe between two threads.
//!
//! [`PipeWriter`] sends each `write` call as one chunk over a bounded
//! channel; [`PipeReader`] hands the chunks back out as a byte stream.
//! Both ends block when the channel is full or empty.
//!
//! End of stream must be explicit: [`PipeWriter::close`] makes the reader
//! return `0`, while a writer dropped without closing (its thread failed)
//! makes the reader fail with [`io::ErrorKind::BrokenPipe`]. A reader that
//! went away makes every further write fail the same way.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Buf, Bytes};

/// Creates a pipe holding at most `capacity` chunks in flight.
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = flume::bounded(capacity.max(1));
    let closed = Arc::new(AtomicBool::new(false));
    (
        PipeWriter {
            tx: Some(tx),
            closed: Arc::clone(&closed),
        },
        PipeReader {
            rx,
            current: Bytes::new(),
            closed,
        },
    )
}

/// Sending end of a [`pipe`].
#[derive(Debug)]
pub struct PipeWriter {
    tx: Option<flume::Sender<Bytes>>,
    closed: Arc<AtomicBool>,
}

impl PipeWriter {
    /// Ends the stream cleanly. Later writes fail.
    pub fn close(&mut self) {
        if let Some(tx) = self.tx.take() {
            // The flag must be visible before the reader can see the disconnect.
            self.closed.store(true, Ordering::Release);
            drop(tx);
        }
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "pipe writer closed"))?;
        tx.send(Bytes::copy_from_slice(buf))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader went away"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Receiving end of a [`pipe`].
#[derive(Debug)]
pub struct PipeReader {
    rx: flume::Receiver<Bytes>,
    current: Bytes,
    closed: Arc<AtomicBool>,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.current.is_empty() {
            match self.rx.recv() {
                Ok(chunk) => self.current = chunk,
                Err(flume::RecvError::Disconnected) => {
                    if self.closed.load(Ordering::Acquire) {
                        return Ok(0);
                    }
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "pipe writer went away before closing",
                    ));
                }
            }
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current.advance(n);
        Ok(n)
    }
}
