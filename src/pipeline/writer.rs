//! The write half of the pipeline: `write()` feeds a bounded queue, the
//! encode worker frames values into the byte pipe, and the compress worker
//! turns the pipe into the sink's bytes.

use std::io::{BufWriter, ErrorKind, Read, Write};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::cerealizable::Cerealizable;
use crate::cerealizer::{CerealizableCerealizer, Cerealizer};
use crate::config::PipelineConfig;
use crate::error::{CerealError, Result};
use crate::framing::CerealWriter;
use crate::logging::cereal_log;
use crate::pipe::{PipeReader, PipeWriter, pipe};

use super::{WorkerContext, join_worker, spawn_worker};

const ENCODE: &str = "encode";
const COMPRESS: &str = "compress";

/// Writes a framed, optionally compressed record stream on two background
/// threads: one encodes queued values, the other compresses into the sink.
///
/// [`close`](Self::close) drains everything written so far and hands the
/// sink back. Dropping the writer also drains it, but only logs failures.
///
/// ```rust
/// use cereal::{BitMap, Compression, PipelineConfig, PipelinedReader, PipelinedWriter};
///
/// # fn main() -> cereal::Result<()> {
/// let config = PipelineConfig::new(Compression::None);
/// let mut writer = PipelinedWriter::create(Vec::new(), config.clone())?;
/// writer.write(BitMap::new(8))?;
/// let bytes = writer.close()?;
///
/// let sizes: Vec<usize> = PipelinedReader::<BitMap>::open(std::io::Cursor::new(bytes), config)?
///     .map(|m| m.map(|m| m.size()))
///     .collect::<cereal::Result<_>>()?;
/// assert_eq!(sizes, vec![8]);
/// # Ok(())
/// # }
/// ```
pub struct PipelinedWriter<T: Send + 'static, W: Write + Send + 'static> {
    queue: Option<flume::Sender<T>>,
    ctx: Arc<WorkerContext>,
    encoder: Option<JoinHandle<()>>,
    compressor: Option<JoinHandle<Option<W>>>,
    config: PipelineConfig,
    closed: bool,
}

impl<T, W> PipelinedWriter<T, W>
where
    T: Cerealizable + Send + 'static,
    W: Write + Send + 'static,
{
    /// Starts writing `T` records into `sink`.
    ///
    /// # Errors
    /// I/O error if a worker thread cannot be spawned.
    pub fn create(sink: W, config: PipelineConfig) -> Result<Self> {
        Self::create_with(sink, config, CerealizableCerealizer::<T>::new())
    }
}

impl<T, W> PipelinedWriter<T, W>
where
    T: Send + 'static,
    W: Write + Send + 'static,
{
    /// Starts writing records encoded by `cerealizer` into `sink`.
    ///
    /// # Errors
    /// I/O error if a worker thread cannot be spawned.
    pub fn create_with<C>(sink: W, config: PipelineConfig, cerealizer: C) -> Result<Self>
    where
        C: Cerealizer<T> + 'static,
    {
        let ctx = Arc::new(WorkerContext::new());
        let (queue_tx, queue_rx) = flume::bounded(config.queue_capacity());
        let (pipe_tx, pipe_rx) = pipe(config.pipe_capacity());

        let mut writer = Self {
            queue: Some(queue_tx),
            ctx: Arc::clone(&ctx),
            encoder: None,
            compressor: None,
            config: config.clone(),
            closed: false,
        };

        let worker_ctx = Arc::clone(&ctx);
        let worker_config = config.clone();
        writer.compressor = Some(spawn_worker(COMPRESS, move || {
            compress_stage(&worker_ctx, &worker_config, pipe_rx, sink)
        })?);

        let worker_ctx = Arc::clone(&ctx);
        writer.encoder = Some(spawn_worker(ENCODE, move || {
            encode_stage(&worker_ctx, &config, queue_rx, &cerealizer, pipe_tx);
        })?);

        Ok(writer)
    }

    /// Queues `value`, blocking while the queue is full.
    ///
    /// # Errors
    /// `WorkerFailure` once if a worker failed, `Closed` on every call
    /// after that.
    pub fn write(&mut self, value: T) -> Result<()> {
        let mut value = value;
        loop {
            // Abort is raised only after the error is stored.
            if self.ctx.should_abort() {
                return Err(self.ctx.take_error().unwrap_or(CerealError::Closed));
            }
            let queue = self.queue.as_ref().ok_or(CerealError::Closed)?;
            match queue.send_timeout(value, self.config.write_poll()) {
                Ok(()) => return Ok(()),
                Err(flume::SendTimeoutError::Timeout(back)) => value = back,
                Err(flume::SendTimeoutError::Disconnected(_)) => {
                    return Err(self.ctx.take_error().unwrap_or(CerealError::Closed));
                }
            }
        }
    }

    /// Drains every queued value, finishes the compressed stream, and
    /// returns the sink.
    ///
    /// # Errors
    /// A worker failure not yet returned by [`write`](Self::write), `Closed`
    /// if one was already returned, or `Internal` if a worker panicked.
    pub fn close(mut self) -> Result<W> {
        self.shutdown()?.ok_or(CerealError::Closed)
    }

    fn shutdown(&mut self) -> Result<Option<W>> {
        if self.closed {
            return Ok(None);
        }
        self.closed = true;
        // The encoder drains what is queued, then sees the disconnect.
        self.queue = None;

        let encoder = join_worker(ENCODE, self.encoder.take());
        let compressor = join_worker(COMPRESS, self.compressor.take());
        cereal_log!(log::Level::Debug, "pipeline_closed", "side=write");

        if let Some(err) = self.ctx.take_error() {
            return Err(err);
        }
        encoder?;
        Ok(compressor?.flatten())
    }
}

impl<T: Send + 'static, W: Write + Send + 'static> Drop for PipelinedWriter<T, W> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            cereal_log!(log::Level::Warn, "pipeline_drop_error", "side=write error={e}");
        }
    }
}

impl<T: Send + 'static, W: Write + Send + 'static> std::fmt::Debug for PipelinedWriter<T, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelinedWriter")
            .field("config", &self.config)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Queued values, framed into the pipe.
fn encode_stage<T, C: Cerealizer<T> + ?Sized>(
    ctx: &WorkerContext,
    config: &PipelineConfig,
    queue_rx: flume::Receiver<T>,
    cerealizer: &C,
    pipe_tx: PipeWriter,
) {
    let mut frames = CerealWriter::new(BufWriter::with_capacity(config.pipe_chunk_size(), pipe_tx));

    let result = (|| -> Result<()> {
        loop {
            if ctx.should_abort() {
                return Ok(());
            }
            match queue_rx.recv_timeout(config.write_poll()) {
                Ok(value) => frames.write_with(cerealizer, &value)?,
                Err(flume::RecvTimeoutError::Timeout) => continue,
                Err(flume::RecvTimeoutError::Disconnected) => break,
            }
        }
        frames.flush()?;
        frames.get_mut().get_mut().close();
        Ok(())
    })();

    ctx.finish(ENCODE, result);
    // Pipe and queue ends drop only after the outcome was recorded.
    drop(frames);
    drop(queue_rx);
}

/// Pipe bytes, compressed into the sink.
fn compress_stage<W: Write>(
    ctx: &WorkerContext,
    config: &PipelineConfig,
    mut pipe_rx: PipeReader,
    sink: W,
) -> Option<W> {
    let result = (|| -> Result<W> {
        let buffered = BufWriter::with_capacity(config.io_buffer_size(), sink);
        let mut output = config.compression().writer(buffered);
        let mut chunk = vec![0u8; config.pipe_chunk_size()];
        loop {
            if ctx.should_abort() {
                return Err(CerealError::Closed);
            }
            let n = match pipe_rx.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            output.write_all(&chunk[..n])?;
        }
        output
            .finish()?
            .into_inner()
            .map_err(|e| CerealError::from(e.into_error()))
    })();

    let sink = ctx.finish(COMPRESS, result);
    drop(pipe_rx);
    sink
}
