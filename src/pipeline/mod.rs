//! Two-stage threaded readers and writers for record streams.
//!
//! Each direction runs exactly two worker threads next to the caller:
//!
//! ```text
//! read:   source -> [decompress] -> pipe -> [decode] -> queue -> read()
//! write:  write() -> queue -> [encode] -> pipe -> [compress] -> sink
//! ```
//!
//! The pipe and the queue are both bounded, so a slow consumer slows the
//! whole chain down instead of buffering without limit. Values come out in
//! the order they went in.
//!
//! ## Failure model
//!
//! Worker errors are not returned where they happen. The first one is stored
//! in a context shared by both workers (later ones are dropped) and raises the
//! abort flag every worker checks between items. The caller sees it, wrapped
//! in [`CerealError::WorkerFailure`], on its next `read`, `write` or `close`,
//! and only once. After that a reader reports end of stream and a writer
//! reports [`CerealError::Closed`].

mod reader;
mod writer;

pub use reader::PipelinedReader;
pub use writer::PipelinedWriter;

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crate::error::{CerealError, Result};
use crate::logging::cereal_log;

/// State shared between the caller and both workers of one pipeline.
pub(crate) struct WorkerContext {
    keep_running: AtomicBool,
    abort_flag: AtomicBool,
    error_capture: Mutex<Option<(&'static str, CerealError)>>,
}

impl WorkerContext {
    pub(crate) fn new() -> Self {
        Self {
            keep_running: AtomicBool::new(true),
            abort_flag: AtomicBool::new(false),
            error_capture: Mutex::new(None),
        }
    }

    /// Records `err` unless an earlier error was already captured.
    pub(crate) fn signal_error(&self, stage: &'static str, err: CerealError) {
        let mut guard = self.error_capture.lock().unwrap_or_else(|p| p.into_inner());
        if guard.is_none() && !self.should_abort() {
            cereal_log!(log::Level::Warn, "worker_failed", "stage={stage} error={err}");
            *guard = Some((stage, err));
            self.abort_flag.store(true, Ordering::SeqCst);
        }
    }

    /// Records the outcome of a worker body.
    pub(crate) fn finish<T>(&self, stage: &'static str, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => {
                cereal_log!(log::Level::Debug, "worker_exit", "stage={stage}");
                Some(value)
            }
            Err(err) => {
                self.signal_error(stage, err);
                None
            }
        }
    }

    /// True once any worker failed.
    pub(crate) fn should_abort(&self) -> bool {
        self.abort_flag.load(Ordering::Relaxed)
    }

    /// False once the owner asked the workers to wind down.
    pub(crate) fn keep_running(&self) -> bool {
        self.keep_running.load(Ordering::Relaxed)
    }

    pub(crate) fn stop(&self) {
        self.keep_running.store(false, Ordering::SeqCst);
    }

    /// Hands out the captured error, at most once.
    pub(crate) fn take_error(&self) -> Option<CerealError> {
        let mut guard = self.error_capture.lock().unwrap_or_else(|p| p.into_inner());
        guard
            .take()
            .map(|(stage, source)| CerealError::WorkerFailure {
                stage,
                source: Box::new(source),
            })
    }
}

/// Starts a worker thread named `cereal-<stage>`.
pub(crate) fn spawn_worker<F, R>(stage: &'static str, body: F) -> Result<JoinHandle<R>>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    thread::Builder::new()
        .name(format!("cereal-{stage}"))
        .spawn(move || {
            cereal_log!(log::Level::Debug, "worker_start", "stage={stage}");
            body()
        })
        .map_err(CerealError::from)
}

/// Waits for a worker. A panic becomes [`CerealError::Internal`].
pub(crate) fn join_worker<R>(stage: &'static str, handle: Option<JoinHandle<R>>) -> Result<Option<R>> {
    match handle {
        None => Ok(None),
        Some(handle) => handle
            .join()
            .map(Some)
            .map_err(|_| CerealError::Internal(format!("worker '{stage}' panicked"))),
    }
}
