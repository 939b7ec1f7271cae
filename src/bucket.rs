//! External bucket sort.
//!
//! The key range is recursively partitioned into buckets stored in temporary files until every bucket fits in the
//! sort buffer. Pending buckets are kept on a stack and processed depth-first in ascending key order, so sorted
//! buckets are appended to the output one after another.

use log;

use crate::buffer::{SortBuffer, SortStrategy};
use crate::run::RunDir;
use crate::sort::{fill_buffer, write_rows, DuringPhase, ExternalSorter, Phase, SortError};
use crate::splitter::{SampleSplitter, Splitter};
use crate::stream::{RowReader, RowWriter, StreamPair, StreamSettings};
use crate::{KeyFn, RadixKey};

/// Id of the bucket holding the whole input. It is read from the input stream rather than a temporary file.
const ROOT_BUCKET: usize = 0;

/// Pending bucket: a file with rows whose keys lie within `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketRange<K> {
    pub file_id: usize,
    pub min: K,
    pub max: K,
}

/// Bucket sort statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BucketStats {
    /// Number of buckets that were split into sub-buckets.
    pub splits: usize,
    /// Number of buckets sorted in memory.
    pub sorted_buckets: usize,
    /// Number of buckets holding a single key value, copied to the output without sorting.
    pub single_value_buckets: usize,
    /// Largest number of pending buckets.
    pub max_pending: usize,
}

/// Sub-bucket being written while its parent is split.
struct BucketWriter<W, K> {
    file_id: usize,
    writer: W,
    rows: usize,
    min: K,
    max: K,
}

impl<W, K: RadixKey> BucketWriter<W, K> {
    fn write<T>(&mut self, row: &T, key: K) -> Result<(), SortError>
    where
        W: RowWriter<T>,
    {
        self.writer.write(row).during(Phase::Split)?;
        self.rows += 1;
        self.min = self.min.min(key);
        self.max = self.max.max(key);
        return Ok(());
    }
}

/// Bucket sort call state.
struct BucketContext<'a, T, O, F, St>
where
    F: KeyFn<T>,
{
    output: &'a mut O,
    buffer: &'a mut SortBuffer<T, F, St>,
    run_dir: Option<RunDir>,
    pending: Vec<BucketRange<F::Key>>,
    settings: StreamSettings,
    stats: BucketStats,
}

impl<S> ExternalSorter<S> {
    /// Sorts rows using external bucket sort with a sample based splitter over the whole key type range.
    ///
    /// See [`ExternalSorter::bucket_sort_with`].
    pub fn bucket_sort<T, I, O, F, St>(
        &self,
        input: &mut I,
        output: &mut O,
        buffer: &mut SortBuffer<T, F, St>,
    ) -> Result<BucketStats, SortError>
    where
        T: Default,
        I: RowReader<T>,
        O: RowWriter<T>,
        F: KeyFn<T>,
        St: SortStrategy<T>,
        S: StreamPair<T>,
    {
        self.bucket_sort_within(
            input,
            output,
            buffer,
            <F::Key as RadixKey>::MIN,
            <F::Key as RadixKey>::MAX,
        )
    }

    /// Sorts rows whose keys are known to lie within `[min, max]` using external bucket sort with a sample based
    /// splitter.
    ///
    /// See [`ExternalSorter::bucket_sort_with`].
    pub fn bucket_sort_within<T, I, O, F, St>(
        &self,
        input: &mut I,
        output: &mut O,
        buffer: &mut SortBuffer<T, F, St>,
        min: F::Key,
        max: F::Key,
    ) -> Result<BucketStats, SortError>
    where
        T: Default,
        I: RowReader<T>,
        O: RowWriter<T>,
        F: KeyFn<T>,
        St: SortStrategy<T>,
        S: StreamPair<T>,
    {
        self.bucket_sort_with::<SampleSplitter<F::Key>, T, I, O, F, St>(input, output, buffer, min, max)
    }

    /// Sorts rows using external bucket sort.
    ///
    /// A bucket is read into the buffer. If it fits, it is sorted and written to the output. Otherwise keys of the
    /// buffered rows are sampled, a `Sp` splitter divides the bucket key range into fan-out sub-buckets and all the
    /// bucket rows are scattered into sub-bucket files. Buckets holding a single key are copied to the output as is.
    /// Rows with equal keys keep their input order across splits.
    ///
    /// # Arguments
    /// * `input` - Input stream rows to be fetched from
    /// * `output` - Output stream sorted rows to be written to
    /// * `buffer` - Sort buffer which defines the memory budget, the key and the in-memory sort strategy
    /// * `min` - Smallest possible key of the input rows
    /// * `max` - Largest possible key of the input rows. A range with `min == max` is copied to the output as is.
    ///
    /// Keys outside of `[min, max]` are not detected and leave the output order undefined.
    pub fn bucket_sort_with<Sp, T, I, O, F, St>(
        &self,
        input: &mut I,
        output: &mut O,
        buffer: &mut SortBuffer<T, F, St>,
        min: F::Key,
        max: F::Key,
    ) -> Result<BucketStats, SortError>
    where
        Sp: Splitter<F::Key>,
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
        if min > max {
            return Err(SortError::Config("key range minimum exceeds its maximum".to_string()));
        }
        buffer.allocate();

        log::info!(
            "bucket sort started (buffer: {} rows, fan-out: {}, keys: [{}, {}])",
            buffer.capacity(),
            self.fan_out,
            min.to_u64(),
            max.to_u64()
        );

        let mut ctx = BucketContext {
            settings: self.stream_settings::<T>(buffer.capacity(), self.fan_out + 1),
            output,
            buffer,
            run_dir: None,
            pending: vec![BucketRange {
                file_id: ROOT_BUCKET,
                min,
                max,
            }],
            stats: BucketStats::default(),
        };

        while let Some(range) = ctx.pending.pop() {
            ctx.stats.max_pending = ctx.stats.max_pending.max(ctx.pending.len() + 1);

            if range.file_id == ROOT_BUCKET {
                self.process_bucket::<Sp, _, _, _, _, _>(range, input, &mut ctx)?;
                continue;
            }

            let run_dir = self.run_dir(&mut ctx.run_dir)?;
            let path = run_dir.file(range.file_id);
            let mut reader = S::open(&path, &ctx.settings).during(Phase::Split)?;
            self.process_bucket::<Sp, _, _, _, _, _>(range, &mut reader, &mut ctx)?;
            drop(reader);

            if let Some(run_dir) = &ctx.run_dir {
                run_dir.remove(range.file_id).map_err(SortError::IO)?;
            }
        }

        ctx.output.flush().during(Phase::FinalSort)?;
        ctx.buffer.clear();
        if let Some(run_dir) = ctx.run_dir {
            run_dir.close().map_err(SortError::TempDir)?;
        }

        log::info!(
            "bucket sort done (splits: {}, sorted buckets: {}, single value buckets: {})",
            ctx.stats.splits,
            ctx.stats.sorted_buckets,
            ctx.stats.single_value_buckets
        );

        return Ok(ctx.stats);
    }

    fn process_bucket<Sp, T, R, O, F, St>(
        &self,
        range: BucketRange<F::Key>,
        source: &mut R,
        ctx: &mut BucketContext<'_, T, O, F, St>,
    ) -> Result<(), SortError>
    where
        Sp: Splitter<F::Key>,
        T: Default,
        R: RowReader<T>,
        O: RowWriter<T>,
        F: KeyFn<T>,
        St: SortStrategy<T>,
        S: StreamPair<T>,
    {
        if range.min == range.max {
            let mut row = T::default();
            while !source.is_exhausted() {
                source.read(&mut row).during(Phase::FinalSort)?;
                ctx.output.write(&row).during(Phase::FinalSort)?;
            }
            ctx.stats.single_value_buckets += 1;
            return Ok(());
        }

        let size = fill_buffer(source, ctx.buffer).during(Phase::Split)?;
        if source.is_exhausted() {
            ctx.buffer.sort_within(size, range.min, range.max);
            write_rows(ctx.output, &ctx.buffer.as_slice()[..size]).during(Phase::FinalSort)?;
            ctx.stats.sorted_buckets += 1;
            log::debug!(
                "bucket [{:?}, {:?}] sorted ({} rows)",
                range.min,
                range.max,
                size
            );
            return Ok(());
        }

        let splitter = Sp::from_samples(self.sample_keys(ctx.buffer, size), range.min, range.max, self.fan_out);

        let run_dir = self.run_dir(&mut ctx.run_dir)?;
        let mut buckets = Vec::with_capacity(splitter.buckets());
        for _ in 0..splitter.buckets() {
            let file_id = run_dir.next_id();
            buckets.push(BucketWriter {
                file_id,
                writer: S::create(&run_dir.file(file_id), &ctx.settings).during(Phase::Split)?,
                rows: 0,
                min: range.max,
                max: range.min,
            });
        }

        let buffer = &*ctx.buffer;
        for row in &buffer.as_slice()[..size] {
            let key = buffer.key(row);
            buckets[splitter.bucket(key)].write(row, key)?;
        }

        let mut row = T::default();
        while !source.is_exhausted() {
            source.read(&mut row).during(Phase::Split)?;
            let key = buffer.key(&row);
            buckets[splitter.bucket(key)].write(&row, key)?;
        }

        // pushed in reverse so that the lowest key range is popped first
        for bucket in buckets.into_iter().rev() {
            let mut writer = bucket.writer;
            writer.flush().during(Phase::Split)?;
            drop(writer);

            if bucket.rows == 0 {
                run_dir.remove(bucket.file_id).map_err(SortError::IO)?;
            } else {
                ctx.pending.push(BucketRange {
                    file_id: bucket.file_id,
                    min: bucket.min,
                    max: bucket.max,
                });
            }
        }

        ctx.stats.splits += 1;
        log::debug!(
            "bucket [{:?}, {:?}] split into {} buckets",
            range.min,
            range.max,
            splitter.buckets()
        );

        return Ok(());
    }

    /// Takes evenly spaced key samples from the first `size` buffered rows.
    fn sample_keys<T, F, St>(&self, buffer: &SortBuffer<T, F, St>, size: usize) -> Vec<F::Key>
    where
        T: Default,
        F: KeyFn<T>,
        St: SortStrategy<T>,
    {
        let samples_num = self.fan_out * self.samples_per_bucket;
        let step = (size / samples_num).max(1);

        buffer.as_slice()[..size]
            .iter()
            .step_by(step)
            .take(samples_num)
            .map(|row| buffer.key(row))
            .collect()
    }
}
