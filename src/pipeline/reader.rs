//! The read half of the pipeline: the decompress worker streams the source
//! through the codec into the byte pipe, and the decode worker turns the pipe
//! back into values on a bounded queue that `read()` drains.

use std::io::{BufReader, Read, Write};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::cerealizable::Cerealizable;
use crate::cerealizer::{Cerealizer, CerealizableCerealizer};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::framing::CerealReader;
use crate::logging::cereal_log;
use crate::pipe::{PipeReader, PipeWriter, pipe};

use super::{WorkerContext, join_worker, spawn_worker};

const DECOMPRESS: &str = "decompress";
const DECODE: &str = "decode";

/// Reads a framed, optionally compressed record stream on two background
/// threads: one decompresses, the other decodes into a bounded queue.
///
/// ```rust
/// use cereal::{BitMap, CerealWriter, PipelineConfig, PipelinedReader};
///
/// # fn main() -> cereal::Result<()> {
/// let mut writer = CerealWriter::new(Vec::new());
/// writer.write(&BitMap::new(3))?;
/// let bytes = writer.into_inner();
///
/// let mut reader = PipelinedReader::<BitMap>::open(std::io::Cursor::new(bytes), PipelineConfig::default())?;
/// assert_eq!(reader.read()?.map(|m| m.size()), Some(3));
/// assert!(reader.read()?.is_none());
/// reader.close()?;
/// # Ok(())
/// # }
/// ```
pub struct PipelinedReader<T: Send + 'static> {
    queue: Option<flume::Receiver<T>>,
    ctx: Arc<WorkerContext>,
    decompressor: Option<JoinHandle<()>>,
    decoder: Option<JoinHandle<()>>,
    config: PipelineConfig,
    closed: bool,
}

impl<T: Cerealizable + Send + 'static> PipelinedReader<T> {
    /// Starts reading `T` records from `source`.
    ///
    /// # Errors
    /// I/O error if a worker thread cannot be spawned.
    pub fn open<R: Read + Send + 'static>(source: R, config: PipelineConfig) -> Result<Self> {
        Self::open_with(source, config, CerealizableCerealizer::<T>::new())
    }
}

impl<T: Send + 'static> PipelinedReader<T> {
    /// Starts reading records decoded by `cerealizer` from `source`.
    ///
    /// # Errors
    /// I/O error if a worker thread cannot be spawned.
    pub fn open_with<R, C>(source: R, config: PipelineConfig, cerealizer: C) -> Result<Self>
    where
        R: Read + Send + 'static,
        C: Cerealizer<T> + 'static,
    {
        let ctx = Arc::new(WorkerContext::new());
        let (queue_tx, queue_rx) = flume::bounded(config.queue_capacity());
        let (pipe_tx, pipe_rx) = pipe(config.pipe_capacity());

        let mut reader = Self {
            queue: Some(queue_rx),
            ctx: Arc::clone(&ctx),
            decompressor: None,
            decoder: None,
            config: config.clone(),
            closed: false,
        };

        let worker_ctx = Arc::clone(&ctx);
        let worker_config = config.clone();
        reader.decompressor = Some(spawn_worker(DECOMPRESS, move || {
            decompress_stage(&worker_ctx, &worker_config, source, pipe_tx);
        })?);

        let worker_ctx = Arc::clone(&ctx);
        reader.decoder = Some(spawn_worker(DECODE, move || {
            decode_stage(&worker_ctx, pipe_rx, &cerealizer, queue_tx);
        })?);

        Ok(reader)
    }

    /// Returns the next value, `None` at end of stream.
    ///
    /// # Errors
    /// `WorkerFailure` once if a worker failed; every later call returns
    /// `Ok(None)`.
    pub fn read(&mut self) -> Result<Option<T>> {
        loop {
            if self.ctx.should_abort() {
                return self.ctx.take_error().map_or(Ok(None), Err);
            }
            let Some(queue) = self.queue.as_ref() else {
                return Ok(None);
            };
            match queue.recv_timeout(self.config.read_poll()) {
                Ok(value) => return Ok(Some(value)),
                Err(flume::RecvTimeoutError::Timeout) => continue,
                Err(flume::RecvTimeoutError::Disconnected) => {
                    // The decoder is gone: end of stream, unless it failed.
                    return match self.ctx.take_error() {
                        Some(err) => Err(err),
                        None => Ok(None),
                    };
                }
            }
        }
    }

    /// Stops both workers and waits for them.
    ///
    /// Values still queued are discarded.
    ///
    /// # Errors
    /// A worker failure not yet returned by [`read`](Self::read), or
    /// `Internal` if a worker panicked.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.ctx.stop();
        // Unblocks a decoder waiting on a full queue.
        self.queue = None;

        let decoder = join_worker(DECODE, self.decoder.take());
        let decompressor = join_worker(DECOMPRESS, self.decompressor.take());
        cereal_log!(log::Level::Debug, "pipeline_closed", "side=read");

        if let Some(err) = self.ctx.take_error() {
            return Err(err);
        }
        decoder?;
        decompressor?;
        Ok(())
    }
}

impl<T: Send + 'static> Iterator for PipelinedReader<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read().transpose()
    }
}

impl<T: Send + 'static> Drop for PipelinedReader<T> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            cereal_log!(log::Level::Warn, "pipeline_drop_error", "side=read error={e}");
        }
    }
}

impl<T: Send + 'static> std::fmt::Debug for PipelinedReader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelinedReader")
            .field("config", &self.config)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Source bytes through the decompressor into the pipe.
fn decompress_stage<R: Read + Send>(
    ctx: &WorkerContext,
    config: &PipelineConfig,
    source: R,
    mut pipe_tx: PipeWriter,
) {
    let buffered = BufReader::with_capacity(config.io_buffer_size(), source);
    let mut input = config.compression().reader(buffered);
    let mut chunk = vec![0u8; config.pipe_chunk_size()];

    let result = (|| -> Result<()> {
        loop {
            if ctx.should_abort() || !ctx.keep_running() {
                return Ok(());
            }
            let n = match input.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            pipe_tx.write_all(&chunk[..n])?;
        }
        pipe_tx.close();
        Ok(())
    })();

    // Shutdown breaks the pipe on purpose; only report failures before it.
    if ctx.keep_running() {
        ctx.finish(DECOMPRESS, result);
    }
    // The pipe end drops only now, after the error was recorded.
    drop(pipe_tx);
}

/// Frames from the pipe, decoded into the queue.
fn decode_stage<T, C: Cerealizer<T> + ?Sized>(
    ctx: &WorkerContext,
    pipe_rx: PipeReader,
    cerealizer: &C,
    queue_tx: flume::Sender<T>,
) {
    let mut frames = CerealReader::new(pipe_rx);
    let result = (|| -> Result<()> {
        while !ctx.should_abort() && ctx.keep_running() {
            let Some(value) = frames.read_with(cerealizer)? else {
                return Ok(());
            };
            if queue_tx.send(value).is_err() {
                // Reader closed.
                return Ok(());
            }
        }
        Ok(())
    })();

    if ctx.keep_running() {
        ctx.finish(DECODE, result);
    }
    drop(frames);
    drop(queue_tx);
}
