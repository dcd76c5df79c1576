//! Disk-backed merge sort over streams of framed records.
//!
//! Sorting happens in two phases:
//!
//! 1. **Partitioning.** Records are read into an in-memory block until the
//!    encoded size of the accepted records reaches the configured block
//!    size. The block is stable-sorted on the rayon pool and spilled to a
//!    temporary *run* file.
//! 2. **Merging.** One cursor per run feeds a heap ordered by the comparator,
//!    with ties going to the run created first. The minimum is written out
//!    and replaced by the next record of the same run until every run is
//!    exhausted.
//!
//! Equal records therefore keep their input order end to end.
//!
//! Runs are named `<uuid>_tmp_<n>.cereal` inside the workspace directory and
//! are always deleted, whether the sort succeeds, fails or unwinds. File
//! sorts merge into a hidden sibling of the output and rename it into place,
//! so a failure never leaves a half-written output behind.
//!
//! ```rust,no_run
//! use cereal::{ExternalSorter, SortConfig, BitMap};
//!
//! # fn main() -> cereal::Result<()> {
//! let mut sorter = ExternalSorter::new(|a: &BitMap, b: &BitMap| a.size().cmp(&b.size()))
//!     .with_config(SortConfig::default().with_block_size(1 << 20));
//! let stats = sorter.sort_files("maps.cereal", "maps.cereal")?;
//! println!("{} records in {} runs", stats.records_written, stats.runs);
//! # Ok(())
//! # }
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use rayon::slice::ParallelSliceMut;
use uuid::Uuid;

use crate::cerealizable::Cerealizable;
use crate::cerealizer::{Cerealizer, CerealizableCerealizer};
use crate::config::SortConfig;
use crate::constants::DEFAULT_BUFFER_SIZE;
use crate::error::{CerealError, Result};
use crate::framing::{CerealReader, CerealWriter};
use crate::heap::MergeHeap;
use crate::logging::cereal_log;

/// Where a sorter is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortState {
    /// Nothing started yet.
    Idle,
    /// Reading input and spilling sorted runs.
    Partitioning,
    /// Merging runs into the output.
    Merging,
    /// The last sort completed.
    Done,
    /// The last sort aborted. Its runs were removed.
    Failed,
}

/// Counters reported by a completed sort.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortStats {
    /// Records decoded from the input, filtered ones included.
    pub records_read: u64,
    /// Records written to the output.
    pub records_written: u64,
    /// Temporary runs created.
    pub runs: usize,
}

type Filter<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Sorts framed records of `T` with a comparator `C`.
///
/// Records are decoded and re-encoded through a [`Cerealizer`]: the type's
/// own [`Cerealizable`] impl for [`new`](Self::new), or any external one
/// given to [`with_cerealizer`](Self::with_cerealizer).
pub struct ExternalSorter<T, C> {
    config: SortConfig,
    compare: C,
    codec: Box<dyn Cerealizer<T>>,
    filter: Option<Filter<T>>,
    state: SortState,
}

impl<T, C> fmt::Debug for ExternalSorter<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalSorter")
            .field("config", &self.config)
            .field("filtered", &self.filter.is_some())
            .field("state", &self.state)
            .finish()
    }
}

impl<T, C> ExternalSorter<T, C>
where
    T: Cerealizable + Send + 'static,
    C: Fn(&T, &T) -> Ordering + Sync,
{
    /// Creates a sorter with the default [`SortConfig`].
    pub fn new(compare: C) -> Self {
        Self::with_cerealizer(compare, CerealizableCerealizer::<T>::new())
    }
}

impl<T, C> ExternalSorter<T, C>
where
    T: Send + 'static,
    C: Fn(&T, &T) -> Ordering + Sync,
{
    /// Creates a sorter whose records go through `cerealizer`.
    pub fn with_cerealizer(compare: C, cerealizer: impl Cerealizer<T> + 'static) -> Self {
        Self {
            config: SortConfig::default(),
            compare,
            codec: Box::new(cerealizer),
            filter: None,
            state: SortState::Idle,
        }
    }

    /// Replaces the configuration.
    pub fn with_config(mut self, config: SortConfig) -> Self {
        self.config = config;
        self
    }

    /// Keeps only records for which `filter` returns true.
    pub fn with_filter(mut self, filter: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SortState {
        self.state
    }

    /// The active configuration.
    pub fn config(&self) -> &SortConfig {
        &self.config
    }

    /// Sorts framed records from `input` into `output`.
    ///
    /// # Errors
    /// `SortFailure` wrapping the I/O or decode error that aborted the sort.
    pub fn sort<R: Read, W: Write>(&mut self, input: R, output: W) -> Result<SortStats> {
        let mut reader = CerealReader::new(input);
        let mut writer = CerealWriter::new(output);
        let mut runs = RunSet::new(self.config.workspace());
        let sink = &mut writer;
        let (stats, _) = self.execute(&mut reader, &mut runs, move || Ok(sink))?;
        writer.flush().map_err(|e| self.fail("merge", e))?;
        Ok(stats)
    }

    /// Sorts into an existing framed writer. The writer is not flushed.
    ///
    /// # Errors
    /// `SortFailure` wrapping the I/O or decode error that aborted the sort.
    pub fn sort_into<R: Read, W: Write>(
        &mut self,
        input: &mut CerealReader<R>,
        output: &mut CerealWriter<W>,
    ) -> Result<SortStats> {
        let mut runs = RunSet::new(self.config.workspace());
        self.execute(input, &mut runs, move || Ok(output))
            .map(|(stats, _)| stats)
    }

    /// Sorts the file at `input` into the file at `output`.
    ///
    /// The merge goes to a hidden file next to `output`, which replaces
    /// `output` only once it is complete and synced. Both paths may name the
    /// same file, and a failed sort leaves `output` untouched.
    ///
    /// # Errors
    /// `SortFailure` wrapping the I/O or decode error that aborted the sort.
    pub fn sort_files(
        &mut self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Result<SortStats> {
        let output = output.as_ref();
        let input = File::open(input.as_ref()).map_err(|e| self.fail("partition", e.into()))?;
        let mut reader = CerealReader::new(BufReader::with_capacity(DEFAULT_BUFFER_SIZE, input));
        let mut runs = RunSet::new(self.config.workspace());
        let staged = runs
            .stage_beside(output)
            .map_err(|e| self.fail("partition", e))?;

        let (stats, writer) = self.execute(&mut reader, &mut runs, || {
            let file = File::create(&staged)?;
            Ok(CerealWriter::new(BufWriter::with_capacity(
                DEFAULT_BUFFER_SIZE,
                file,
            )))
        })?;
        let file = writer
            .into_inner()
            .into_inner()
            .map_err(|e| self.fail("merge", e.into_error().into()))?;
        file.sync_all().map_err(|e| self.fail("merge", e.into()))?;
        drop(file);
        fs::rename(&staged, output).map_err(|e| self.fail("merge", e.into()))?;
        cereal_log!(
            log::Level::Debug,
            "sort_output_replaced",
            "path={}",
            output.display()
        );
        Ok(stats)
    }

    fn fail(&mut self, phase: &'static str, source: CerealError) -> CerealError {
        self.state = SortState::Failed;
        CerealError::SortFailure {
            phase,
            source: Box::new(source),
        }
    }

    /// Both phases. `open` is called only after the input was fully consumed.
    /// The caller owns `runs`, so its files outlive this call until the
    /// caller is done with the output.
    fn execute<R, S>(
        &mut self,
        input: &mut CerealReader<R>,
        runs: &mut RunSet,
        open: impl FnOnce() -> Result<S>,
    ) -> Result<(SortStats, S)>
    where
        R: Read,
        S: MergeSink<T>,
    {
        let mut stats = SortStats::default();

        self.state = SortState::Partitioning;
        if let Err(e) = self.partition(input, runs, &mut stats) {
            return Err(self.fail("partition", e));
        }
        stats.runs = runs.len();

        self.state = SortState::Merging;
        let merged = open().and_then(|mut sink| {
            stats.records_written = self.merge(runs, &mut sink)?;
            Ok(sink)
        });
        match merged {
            Ok(sink) => {
                self.state = SortState::Done;
                Ok((stats, sink))
            }
            Err(e) => Err(self.fail("merge", e)),
        }
    }

    fn partition<R: Read>(
        &self,
        input: &mut CerealReader<R>,
        runs: &mut RunSet,
        stats: &mut SortStats,
    ) -> Result<()> {
        let codec = self.codec.as_ref();
        let block_size = self.config.block_size();
        loop {
            let mut block = Vec::new();
            let mut block_bytes = 0u64;
            let mut exhausted = false;

            while block_bytes < block_size {
                let before = input.position();
                let Some(record) = input.read_with(codec)? else {
                    exhausted = true;
                    break;
                };
                stats.records_read += 1;
                if self.filter.as_ref().is_none_or(|keep| keep(&record)) {
                    block_bytes += input.position() - before;
                    block.push(record);
                }
            }

            if block.is_empty() {
                return Ok(());
            }
            block.par_sort_by(|a, b| (self.compare)(a, b));
            runs.spill(codec, &block, block_bytes)?;
            if exhausted {
                return Ok(());
            }
        }
    }

    fn merge<S: MergeSink<T>>(&self, runs: &mut RunSet, sink: &mut S) -> Result<u64> {
        let codec = self.codec.as_ref();
        runs.open_cursors()?;

        let mut seed = Vec::with_capacity(runs.cursors.len());
        for (run, cursor) in runs.cursors.iter_mut().enumerate() {
            if let Some(first) = cursor.read_with(codec)? {
                seed.push((first, run));
            }
        }

        let compare = &self.compare;
        let mut heap = MergeHeap::new(seed, |a: &(T, usize), b: &(T, usize)| {
            compare(&a.0, &b.0).then(a.1.cmp(&b.1)).is_gt()
        });
        cereal_log!(log::Level::Info, "merge_start", "runs={}", heap.len());

        let mut written = 0u64;
        while let Some((value, run)) = heap.peek() {
            sink.accept(codec, value)?;
            written += 1;
            let run = *run;
            let cursor = runs
                .cursors
                .get_mut(run)
                .ok_or_else(|| CerealError::Internal(format!("no cursor for run {run}")))?;
            match cursor.read_with(codec)? {
                Some(next) => {
                    heap.replace_top((next, run));
                }
                None => {
                    heap.pop();
                }
            }
        }

        cereal_log!(
            log::Level::Info,
            "merge_complete",
            "runs={} records={written}",
            runs.len()
        );
        Ok(written)
    }
}

/// Receives merged records in order.
trait MergeSink<T> {
    fn accept(&mut self, codec: &dyn Cerealizer<T>, value: &T) -> Result<()>;
}

impl<T, W: Write> MergeSink<T> for CerealWriter<W> {
    fn accept(&mut self, codec: &dyn Cerealizer<T>, value: &T) -> Result<()> {
        self.write_with(codec, value)
    }
}

impl<T, S: MergeSink<T> + ?Sized> MergeSink<T> for &mut S {
    fn accept(&mut self, codec: &dyn Cerealizer<T>, value: &T) -> Result<()> {
        (**self).accept(codec, value)
    }
}

/// The runs of one sort and their cursors, plus any staged output. Dropping
/// it closes every cursor and deletes every file it still tracks.
struct RunSet {
    dir: PathBuf,
    prefix: Uuid,
    counter: usize,
    paths: Vec<PathBuf>,
    staged: Vec<PathBuf>,
    cursors: Vec<CerealReader<BufReader<File>>>,
}

impl RunSet {
    fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            prefix: Uuid::new_v4(),
            counter: 0,
            paths: Vec::new(),
            staged: Vec::new(),
            cursors: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.paths.len()
    }

    fn next_path(&mut self) -> PathBuf {
        let path = self
            .dir
            .join(format!("{}_tmp_{}.cereal", self.prefix, self.counter));
        self.counter += 1;
        path
    }

    /// Reserves `.<name>.<uuid>.partial` in the directory of `target`, so a
    /// rename onto `target` stays on one filesystem.
    fn stage_beside(&mut self, target: &Path) -> Result<PathBuf> {
        let name = target.file_name().ok_or_else(|| {
            CerealError::OutOfRange(format!("{} does not name a file", target.display()))
        })?;
        let path = target.with_file_name(format!(
            ".{}.{}.partial",
            name.to_string_lossy(),
            self.prefix
        ));
        self.staged.push(path.clone());
        Ok(path)
    }

    fn spill<T>(&mut self, codec: &dyn Cerealizer<T>, block: &[T], block_bytes: u64) -> Result<()> {
        let path = self.next_path();
        // Registered before creation so a failed write is still cleaned up.
        self.paths.push(path.clone());
        let file = File::create(&path)?;
        let mut writer = CerealWriter::new(BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, file));
        for record in block {
            writer.write_with(codec, record)?;
        }
        writer.flush()?;
        cereal_log!(
            log::Level::Debug,
            "run_spilled",
            "run={} records={} bytes={block_bytes} path={}",
            self.paths.len() - 1,
            block.len(),
            path.display()
        );
        Ok(())
    }

    fn open_cursors(&mut self) -> Result<()> {
        for path in &self.paths {
            let file = File::open(path)?;
            self.cursors.push(CerealReader::new(BufReader::with_capacity(
                DEFAULT_BUFFER_SIZE,
                file,
            )));
        }
        Ok(())
    }
}

impl Drop for RunSet {
    fn drop(&mut self) {
        self.cursors.clear();
        for path in self.paths.drain(..).chain(self.staged.drain(..)) {
            match fs::remove_file(&path) {
                Ok(()) => {}
                // A staged output that was renamed into place.
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => cereal_log!(
                    log::Level::Warn,
                    "cleanup_failed",
                    "path={} error={e}",
                    path.display()
                ),
            }
        }
    }
}
