//! External sorter.

use log;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::marker::PhantomData;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::buffer::{SortBuffer, SortStrategy};
use crate::merger::BinaryHeapMerger;
use crate::run::{RmpStreams, RunDir};
use crate::stream::{RowReader, RowWriter, StreamError, StreamPair, StreamSettings};
use crate::KeyFn;

/// Sorting phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Reading the input, sorting blocks and writing runs.
    RunGeneration,
    /// Merging runs.
    Merge,
    /// Partitioning a key range into bucket files.
    Split,
    /// Sorting buckets and writing the output.
    FinalSort,
}

impl Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            Phase::RunGeneration => write!(f, "run generation"),
            Phase::Merge => write!(f, "merge"),
            Phase::Split => write!(f, "split"),
            Phase::FinalSort => write!(f, "final sort"),
        }
    }
}

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Temporary directory creation or removal error.
    TempDir(io::Error),
    /// Invalid sorter or buffer configuration.
    Config(String),
    /// Row stream error along with the phase it happened in.
    Stream(Phase, StreamError),
    /// Common I/O error.
    IO(io::Error),
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::TempDir(err) => Some(err),
            SortError::Config(_) => None,
            SortError::Stream(_, err) => Some(err),
            SortError::IO(err) => Some(err),
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::TempDir(err) => write!(f, "temporary directory not created or removed: {}", err),
            SortError::Config(msg) => write!(f, "invalid configuration: {}", msg),
            SortError::Stream(phase, err) => write!(f, "{} failed: {}", phase, err),
            SortError::IO(err) => write!(f, "I/O operation failed: {}", err),
        }
    }
}

/// Attaches a sorting phase to a stream error.
pub(crate) trait DuringPhase<V> {
    fn during(self, phase: Phase) -> Result<V, SortError>;
}

impl<V> DuringPhase<V> for Result<V, StreamError> {
    fn during(self, phase: Phase) -> Result<V, SortError> {
        self.map_err(|err| SortError::Stream(phase, err))
    }
}

/// Merge sort statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeStats {
    /// Number of sorted runs written during run generation.
    /// Zero if the input fit in the buffer and was written to the output directly.
    pub initial_runs: usize,
    /// Number of outputs produced by every merge pass. The last pass always produces the final output.
    pub pass_outputs: Vec<usize>,
    /// Time spent reading the input.
    pub read_time: Duration,
    /// Time spent sorting blocks in memory.
    pub sort_time: Duration,
    /// Time spent writing runs (or the output if no runs were needed).
    pub write_time: Duration,
    /// Time spent in merge passes.
    pub merge_time: Duration,
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone)]
pub struct ExternalSorterBuilder<S = RmpStreams> {
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Temporary file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Maximum number of runs merged at once.
    fan_in: usize,
    /// Number of buckets a key range is split into.
    fan_out: usize,
    /// Number of key samples taken per bucket.
    samples_per_bucket: usize,

    /// Temporary storage format.
    streams_type: PhantomData<S>,
}

impl<S> ExternalSorterBuilder<S> {
    /// Default merge fan-in.
    pub const DEFAULT_FAN_IN: usize = 64;
    /// Default bucket fan-out.
    pub const DEFAULT_FAN_OUT: usize = 64;
    /// Default number of key samples per bucket.
    pub const DEFAULT_SAMPLES_PER_BUCKET: usize = 4;

    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    /// The temporary directory is not created until a sort needs it.
    pub fn build(self) -> Result<ExternalSorter<S>, SortError> {
        if self.fan_in == 0 {
            return Err(SortError::Config("merge fan-in must be positive".to_string()));
        }
        if self.fan_out == 0 {
            return Err(SortError::Config("bucket fan-out must be positive".to_string()));
        }
        if self.samples_per_bucket == 0 {
            return Err(SortError::Config("samples per bucket must be positive".to_string()));
        }
        if self.rw_buf_size == Some(0) {
            return Err(SortError::Config("read/write buffer size must be positive".to_string()));
        }

        return Ok(ExternalSorter {
            tmp_dir: self.tmp_dir,
            rw_buf_size: self.rw_buf_size,
            // a single run merged at a time never reduces the number of runs
            fan_in: self.fan_in.max(2),
            fan_out: self.fan_out.max(2),
            samples_per_bucket: self.samples_per_bucket,
            streams_type: PhantomData,
        });
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder<S> {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets temporary file read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder<S> {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Sets maximum number of runs merged at once.
    pub fn with_fan_in(mut self, fan_in: usize) -> ExternalSorterBuilder<S> {
        self.fan_in = fan_in;
        return self;
    }

    /// Sets number of buckets a key range is split into.
    pub fn with_fan_out(mut self, fan_out: usize) -> ExternalSorterBuilder<S> {
        self.fan_out = fan_out;
        return self;
    }

    /// Sets number of key samples taken per bucket when a key range is split.
    pub fn with_samples_per_bucket(mut self, samples_per_bucket: usize) -> ExternalSorterBuilder<S> {
        self.samples_per_bucket = samples_per_bucket;
        return self;
    }
}

impl<S> Default for ExternalSorterBuilder<S> {
    fn default() -> Self {
        ExternalSorterBuilder {
            tmp_dir: None,
            rw_buf_size: None,
            fan_in: Self::DEFAULT_FAN_IN,
            fan_out: Self::DEFAULT_FAN_OUT,
            samples_per_bucket: Self::DEFAULT_SAMPLES_PER_BUCKET,
            streams_type: PhantomData,
        }
    }
}

/// External sorter.
///
/// Sorts rows read from a [`RowReader`] into a [`RowWriter`] using a caller provided [`SortBuffer`]
/// as the only row memory. Temporary files are written using the `S` storage format into a temporary directory
/// that lives no longer than a single sort call.
pub struct ExternalSorter<S = RmpStreams> {
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Temporary file read/write buffer size.
    rw_buf_size: Option<usize>,
    pub(crate) fan_in: usize,
    pub(crate) fan_out: usize,
    pub(crate) samples_per_bucket: usize,

    /// Temporary storage format.
    streams_type: PhantomData<S>,
}

impl<S> ExternalSorter<S> {
    pub fn fan_in(&self) -> usize {
        self.fan_in
    }

    pub fn fan_out(&self) -> usize {
        self.fan_out
    }

    pub fn samples_per_bucket(&self) -> usize {
        self.samples_per_bucket
    }

    /// Returns settings for temporary streams given that `streams` of them are open at once.
    pub(crate) fn stream_settings<T>(&self, buffer_capacity: usize, streams: usize) -> StreamSettings {
        match self.rw_buf_size {
            Some(buf_size) => StreamSettings::with_buffer_size(buf_size),
            None => StreamSettings::new(buffer_capacity, streams, std::mem::size_of::<T>()),
        }
    }

    /// Returns the temporary directory of the current call creating it on first use.
    pub(crate) fn run_dir<'a>(&self, slot: &'a mut Option<RunDir>) -> Result<&'a mut RunDir, SortError> {
        let run_dir = match slot.take() {
            Some(run_dir) => run_dir,
            None => RunDir::new(self.tmp_dir.as_deref()).map_err(SortError::TempDir)?,
        };
        return Ok(slot.insert(run_dir));
    }

    /// Sorts rows using external merge sort.
    ///
    /// The input is read in blocks of the buffer capacity, every block is sorted and written to a temporary run.
    /// Runs are then merged in groups of up to fan-in runs until a single one remains, which is written to the output.
    /// If the whole input fits in the buffer it is sorted and written to the output directly without any temporary
    /// files. The buffer storage is released after run generation.
    ///
    /// # Arguments
    /// * `input` - Input stream rows to be fetched from
    /// * `output` - Output stream sorted rows to be written to
    /// * `buffer` - Sort buffer which defines the memory budget, the key and the in-memory sort strategy
    pub fn merge_sort<T, I, O, F, St>(
        &self,
        input: &mut I,
        output: &mut O,
        buffer: &mut SortBuffer<T, F, St>,
    ) -> Result<MergeStats, SortError>
    where
        T: Default,
        I: RowReader<T>,
        O: RowWriter<T>,
        F: KeyFn<T>,
        St: SortStrategy<T>,
        S: StreamPair<T>,
    {
        if buffer.capacity() == 0 {
            return Err(SortError::Config("sort buffer capacity must be positive".to_string()));
        }
        buffer.allocate();

        log::info!(
            "merge sort started (buffer: {} rows, fan-in: {})",
            buffer.capacity(),
            self.fan_in
        );

        let settings = self.stream_settings::<T>(buffer.capacity(), self.fan_in + 1);
        let mut stats = MergeStats::default();
        let mut run_dir: Option<RunDir> = None;
        let mut runs = Vec::new();

        loop {
            let started = Instant::now();
            let size = fill_buffer(input, buffer).during(Phase::RunGeneration)?;
            stats.read_time += started.elapsed();

            if size == 0 {
                break;
            }

            let started = Instant::now();
            buffer.sort(size);
            stats.sort_time += started.elapsed();

            let started = Instant::now();
            if runs.is_empty() && input.is_exhausted() {
                log::debug!("input fits in the buffer, writing {} rows to the output", size);
                write_rows(output, &buffer.as_slice()[..size]).during(Phase::RunGeneration)?;
                stats.write_time += started.elapsed();
                break;
            }

            let dir = self.run_dir(&mut run_dir)?;
            let run_id = dir.next_id();
            let mut writer = S::create(&dir.file(run_id), &settings).during(Phase::RunGeneration)?;
            write_rows(&mut writer, &buffer.as_slice()[..size]).during(Phase::RunGeneration)?;
            writer.flush().during(Phase::RunGeneration)?;
            stats.write_time += started.elapsed();

            log::debug!("run {} written ({} rows)", run_id, size);
            runs.push(run_id);

            if input.is_exhausted() {
                break;
            }
        }

        buffer.clear();
        stats.initial_runs = runs.len();

        let started = Instant::now();
        while !runs.is_empty() {
            let dir = self.run_dir(&mut run_dir)?;
            let last_pass = runs.len() <= self.fan_in;
            let mut pass_runs = Vec::new();

            for group in runs.chunks(self.fan_in) {
                if last_pass {
                    self.merge_runs::<T, _, _>(dir, group, output, buffer.key_fn(), &settings)?;
                } else if group.len() == 1 {
                    // nothing to merge the run with, it is carried over to the next pass as is
                    pass_runs.push(group[0]);
                } else {
                    let run_id = dir.next_id();
                    let mut writer = S::create(&dir.file(run_id), &settings).during(Phase::Merge)?;
                    self.merge_runs::<T, _, _>(dir, group, &mut writer, buffer.key_fn(), &settings)?;
                    pass_runs.push(run_id);
                }
            }

            let outputs = if last_pass { 1 } else { pass_runs.len() };
            log::debug!("merge pass {} done: {} -> {} runs", stats.pass_outputs.len() + 1, runs.len(), outputs);
            stats.pass_outputs.push(outputs);
            runs = pass_runs;
        }
        stats.merge_time = started.elapsed();

        let last_phase = if stats.initial_runs == 0 { Phase::RunGeneration } else { Phase::Merge };
        output.flush().during(last_phase)?;
        if let Some(run_dir) = run_dir {
            run_dir.close().map_err(SortError::TempDir)?;
        }

        log::info!(
            "merge sort done (runs: {}, passes: {})",
            stats.initial_runs,
            stats.pass_outputs.len()
        );

        return Ok(stats);
    }

    fn merge_runs<T, W, F>(
        &self,
        run_dir: &RunDir,
        group: &[usize],
        output: &mut W,
        key: &F,
        settings: &StreamSettings,
    ) -> Result<(), SortError>
    where
        T: Default,
        W: RowWriter<T>,
        F: KeyFn<T>,
        S: StreamPair<T>,
    {
        let mut sources = Vec::with_capacity(group.len());
        for run_id in group {
            sources.push(S::open(&run_dir.file(*run_id), settings).during(Phase::Merge)?);
        }

        let mut merger = BinaryHeapMerger::new(sources, key);
        while let Some(row) = merger.next() {
            output.write(&row.during(Phase::Merge)?).during(Phase::Merge)?;
            for idx in merger.drained() {
                run_dir.remove(group[idx]).map_err(SortError::IO)?;
            }
        }
        for idx in merger.drained() {
            run_dir.remove(group[idx]).map_err(SortError::IO)?;
        }

        return output.flush().during(Phase::Merge);
    }
}

/// Reads rows into the buffer until it is full or the source is exhausted. Returns the number of rows read.
pub(crate) fn fill_buffer<T, R, F, St>(source: &mut R, buffer: &mut SortBuffer<T, F, St>) -> Result<usize, StreamError>
where
    T: Default,
    R: RowReader<T>,
    F: KeyFn<T>,
    St: SortStrategy<T>,
{
    let mut size = 0;
    while size < buffer.capacity() && !source.is_exhausted() {
        source.read(&mut buffer[size])?;
        size += 1;
    }
    return Ok(size);
}

pub(crate) fn write_rows<T, W: RowWriter<T>>(writer: &mut W, rows: &[T]) -> Result<(), StreamError> {
    for row in rows {
        writer.write(row)?;
    }
    return Ok(());
}
