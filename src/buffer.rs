//! Fixed capacity sort buffers.
//!
//! A [`SortBuffer`] owns a fixed number of row slots and sorts a prefix of them in place using a pluggable
//! [`SortStrategy`]. The strategies differ in how much data they move and how much auxiliary memory they own:
//!
//! * [`Comparison`] - stable comparison sort of the rows themselves. No auxiliary memory.
//! * [`Radix`] - radix sort of the rows with a scratch copy of the rows.
//! * [`Indices`] - comparison sort of a permutation, then rows are moved into place once.
//! * [`RadixIndices`] - radix sort of a permutation, then rows are moved into place once.
//! * [`RadixKeyedIndices`] - radix sort of extracted `(key, index)` pairs, then rows are moved into place once.
//!
//! Index based strategies pay off for wide rows, where moving a row costs much more than moving an index.

use std::ops::{Index, IndexMut};

use crate::radix::RadixSort;
use crate::{KeyFn, RadixKey};

/// In-memory sort strategy.
pub trait SortStrategy<T> {
    /// Allocates auxiliary storage for `capacity` rows.
    fn allocate(&mut self, capacity: usize);

    /// Releases auxiliary storage.
    fn release(&mut self);

    /// Sorts `rows` in ascending key order. All keys are within `[min, max]`.
    fn sort<F: KeyFn<T>>(&mut self, rows: &mut [T], min: F::Key, max: F::Key, key: &F);
}

/// Row buffer with a fixed capacity and an in-memory sort strategy.
pub struct SortBuffer<T, F, S = Comparison> {
    key: F,
    capacity: usize,
    rows: Vec<T>,
    strategy: S,
}

/// Buffer sorting rows by comparison.
pub type ComparisonSortBuffer<T, F> = SortBuffer<T, F, Comparison>;
/// Buffer radix sorting rows.
pub type RadixSortBuffer<T, F> = SortBuffer<T, F, Radix<T>>;
/// Buffer sorting a permutation by comparison.
pub type IndicesSortBuffer<T, F> = SortBuffer<T, F, Indices>;
/// Buffer radix sorting a permutation.
pub type RadixIndicesSortBuffer<T, F> = SortBuffer<T, F, RadixIndices>;
/// Buffer radix sorting extracted keys along with row indices.
pub type RadixKeyedIndicesSortBuffer<T, F> = SortBuffer<T, F, RadixKeyedIndices>;

impl<T, F, S> SortBuffer<T, F, S>
where
    T: Default,
    F: KeyFn<T>,
    S: SortStrategy<T>,
{
    /// Creates a buffer of `capacity` rows using the default strategy configuration.
    pub fn new(capacity: usize, key: F) -> Self
    where
        S: Default,
    {
        Self::with_strategy(capacity, key, S::default())
    }

    /// Creates a buffer of `capacity` rows using the provided strategy.
    pub fn with_strategy(capacity: usize, key: F, strategy: S) -> Self {
        let mut buffer = SortBuffer {
            key,
            capacity,
            rows: Vec::new(),
            strategy,
        };
        buffer.allocate();
        return buffer;
    }

    /// Returns the number of row slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Checks whether the backing storage is allocated.
    pub fn is_allocated(&self) -> bool {
        self.rows.len() == self.capacity
    }

    /// Returns the key of a row.
    pub fn key(&self, row: &T) -> F::Key {
        self.key.key(row)
    }

    /// Returns the key extraction function.
    pub fn key_fn(&self) -> &F {
        &self.key
    }

    /// Allocates backing storage for all row slots if it was released.
    pub fn allocate(&mut self) {
        if !self.is_allocated() {
            self.rows.resize_with(self.capacity, T::default);
            self.strategy.allocate(self.capacity);
        }
    }

    /// Changes the buffer capacity and reallocates backing storage.
    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.rows.truncate(capacity);
        self.rows.shrink_to_fit();
        self.rows.resize_with(capacity, T::default);
        self.strategy.allocate(capacity);
    }

    /// Releases backing storage. The capacity is kept, so [`SortBuffer::allocate`] restores the buffer.
    pub fn clear(&mut self) {
        self.rows = Vec::new();
        self.strategy.release();
    }

    /// Sorts the first `size` rows by key.
    pub fn sort(&mut self, size: usize) {
        self.sort_within(size, <F::Key as RadixKey>::MIN, <F::Key as RadixKey>::MAX);
    }

    /// Sorts the first `size` rows by key, all of which are known to be within `[min, max]`.
    /// Narrower bounds let radix strategies skip digits.
    ///
    /// # Panics
    /// Panics if `size` exceeds the allocated capacity.
    pub fn sort_within(&mut self, size: usize, min: F::Key, max: F::Key) {
        assert!(
            size <= self.rows.len(),
            "sort size {} exceeds allocated capacity {}",
            size,
            self.rows.len()
        );
        self.strategy.sort(&mut self.rows[..size], min, max, &self.key);
    }

    pub fn as_slice(&self) -> &[T] {
        &self.rows
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.rows
    }
}

impl<T, F, S> Index<usize> for SortBuffer<T, F, S> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.rows[index]
    }
}

impl<T, F, S> IndexMut<usize> for SortBuffer<T, F, S> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut self.rows[index]
    }
}

/// Stable comparison sort of rows.
#[derive(Debug, Default, Clone, Copy)]
pub struct Comparison;

impl<T> SortStrategy<T> for Comparison {
    fn allocate(&mut self, _capacity: usize) {}

    fn release(&mut self) {}

    fn sort<F: KeyFn<T>>(&mut self, rows: &mut [T], _min: F::Key, _max: F::Key, key: &F) {
        rows.sort_by_key(|row| key.key(row));
    }
}

/// Radix sort of rows, ping-ponging between the rows and a scratch copy.
pub struct Radix<T> {
    kernel: RadixSort,
    extra: Vec<T>,
}

impl<T> Radix<T> {
    pub fn new(kernel: RadixSort) -> Self {
        Radix {
            kernel,
            extra: Vec::new(),
        }
    }
}

impl<T> Default for Radix<T> {
    fn default() -> Self {
        Radix::new(RadixSort::default())
    }
}

impl<T: Default> SortStrategy<T> for Radix<T> {
    fn allocate(&mut self, capacity: usize) {
        self.extra.resize_with(capacity, T::default);
    }

    fn release(&mut self) {
        self.extra = Vec::new();
    }

    fn sort<F: KeyFn<T>>(&mut self, rows: &mut [T], min: F::Key, max: F::Key, key: &F) {
        self.kernel.sort(rows, &mut self.extra, min, max, |row: &T| key.key(row));
    }
}

/// Comparison sort of a permutation.
#[derive(Debug, Default)]
pub struct Indices {
    indices: Vec<usize>,
}

impl<T> SortStrategy<T> for Indices {
    fn allocate(&mut self, capacity: usize) {
        self.indices.resize(capacity, 0);
    }

    fn release(&mut self) {
        self.indices = Vec::new();
    }

    fn sort<F: KeyFn<T>>(&mut self, rows: &mut [T], _min: F::Key, _max: F::Key, key: &F) {
        let indices = identity(&mut self.indices, rows.len());
        indices.sort_unstable_by_key(|ind| key.key(&rows[*ind]));
        apply_permutation(rows, indices);
    }
}

/// Radix sort of a permutation.
#[derive(Debug, Default)]
pub struct RadixIndices {
    kernel: RadixSort,
    indices: Vec<usize>,
    extra: Vec<usize>,
}

impl RadixIndices {
    pub fn new(kernel: RadixSort) -> Self {
        RadixIndices {
            kernel,
            indices: Vec::new(),
            extra: Vec::new(),
        }
    }
}

impl<T> SortStrategy<T> for RadixIndices {
    fn allocate(&mut self, capacity: usize) {
        self.indices.resize(capacity, 0);
        self.extra.resize(capacity, 0);
    }

    fn release(&mut self) {
        self.indices = Vec::new();
        self.extra = Vec::new();
    }

    fn sort<F: KeyFn<T>>(&mut self, rows: &mut [T], min: F::Key, max: F::Key, key: &F) {
        let indices = identity(&mut self.indices, rows.len());
        let data: &[T] = rows;
        self.kernel
            .sort(indices, &mut self.extra, min, max, |ind: &usize| key.key(&data[*ind]));
        apply_permutation(rows, indices);
    }
}

/// Extracted key along with the row index it belongs to.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct KeyedIndex {
    pub key: u64,
    pub index: usize,
}

/// Radix sort of extracted `(key, index)` pairs. Keys are extracted once per sort.
#[derive(Debug, Default)]
pub struct RadixKeyedIndices {
    kernel: RadixSort,
    keyed: Vec<KeyedIndex>,
    extra: Vec<KeyedIndex>,
}

impl RadixKeyedIndices {
    pub fn new(kernel: RadixSort) -> Self {
        RadixKeyedIndices {
            kernel,
            keyed: Vec::new(),
            extra: Vec::new(),
        }
    }
}

impl<T> SortStrategy<T> for RadixKeyedIndices {
    fn allocate(&mut self, capacity: usize) {
        self.keyed.resize(capacity, KeyedIndex::default());
        self.extra.resize(capacity, KeyedIndex::default());
    }

    fn release(&mut self) {
        self.keyed = Vec::new();
        self.extra = Vec::new();
    }

    fn sort<F: KeyFn<T>>(&mut self, rows: &mut [T], min: F::Key, max: F::Key, key: &F) {
        let keyed = &mut self.keyed[..rows.len()];
        for (index, (slot, row)) in keyed.iter_mut().zip(rows.iter()).enumerate() {
            *slot = KeyedIndex {
                key: key.key(row).to_u64(),
                index,
            };
        }
        self.kernel.sort(keyed, &mut self.extra, min.to_u64(), max.to_u64(), |slot: &KeyedIndex| slot.key);
        apply_permutation(rows, keyed);
    }
}

/// Permutation entry: the position of the row that has to end up at this slot.
trait PermutationSlot {
    fn position(&mut self) -> &mut usize;
}

impl PermutationSlot for usize {
    fn position(&mut self) -> &mut usize {
        self
    }
}

impl PermutationSlot for KeyedIndex {
    fn position(&mut self) -> &mut usize {
        &mut self.index
    }
}

fn identity(indices: &mut [usize], size: usize) -> &mut [usize] {
    let indices = &mut indices[..size];
    for (ind, slot) in indices.iter_mut().enumerate() {
        *slot = ind;
    }
    indices
}

/// Moves `rows[perm[i]]` to `rows[i]` in place by walking permutation cycles.
/// The permutation is left as the identity.
fn apply_permutation<T, P: PermutationSlot>(rows: &mut [T], perm: &mut [P]) {
    for start in 0..rows.len() {
        let mut current = start;
        loop {
            let next = *perm[current].position();
            *perm[current].position() = current;
            if next == start {
                break;
            }
            rows.swap(current, next);
            current = next;
        }
    }
}

#[cfg(test)]
mod test {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rstest::*;

    use super::{
        apply_permutation, Comparison, Indices, Radix, RadixIndices, RadixKeyedIndices, SortBuffer, SortStrategy,
    };
    use crate::radix::RadixSort;

    #[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord)]
    struct WideRow {
        key: u64,
        seq: usize,
        payload: String,
    }

    fn rows(len: usize, max_key: u64, seed: u64) -> Vec<WideRow> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..len)
            .map(|seq| WideRow {
                key: rng.gen_range(0..=max_key),
                seq,
                payload: format!("row-{}", seq),
            })
            .collect()
    }

    fn check_strategy<S: SortStrategy<WideRow> + Default>(len: usize, capacity: usize, max_key: u64) {
        let input = rows(len, max_key, len as u64);
        let mut buffer: SortBuffer<WideRow, _, S> = SortBuffer::new(capacity, |row: &WideRow| row.key);
        for (ind, row) in input.iter().enumerate() {
            buffer[ind] = row.clone();
        }

        buffer.sort(len);

        let actual = &buffer.as_slice()[..len];
        assert!(actual.windows(2).all(|pair| pair[0].key <= pair[1].key));

        let mut actual = actual.to_vec();
        let mut expected = input;
        actual.sort();
        expected.sort();
        assert_eq!(actual, expected);
    }

    #[rstest]
    #[case(0, 10, 100)]
    #[case(1, 1, 100)]
    #[case(100, 100, 5)]
    #[case(3_000, 5_000, u64::MAX)]
    #[case(3_000, 3_000, 0)]
    fn test_sort_buffers(#[case] len: usize, #[case] capacity: usize, #[case] max_key: u64) {
        check_strategy::<Comparison>(len, capacity, max_key);
        check_strategy::<Radix<WideRow>>(len, capacity, max_key);
        check_strategy::<Indices>(len, capacity, max_key);
        check_strategy::<RadixIndices>(len, capacity, max_key);
        check_strategy::<RadixKeyedIndices>(len, capacity, max_key);
    }

    #[test]
    fn test_lsd_strategies() {
        let input = rows(2_000, 1 << 30, 17);
        let kernel = RadixSort::lsd(8);

        let mut radix: SortBuffer<WideRow, _, _> =
            SortBuffer::with_strategy(2_000, |row: &WideRow| row.key, Radix::new(kernel));
        let mut keyed: SortBuffer<WideRow, _, _> =
            SortBuffer::with_strategy(2_000, |row: &WideRow| row.key, RadixKeyedIndices::new(kernel));
        let mut indices: SortBuffer<WideRow, _, _> =
            SortBuffer::with_strategy(2_000, |row: &WideRow| row.key, RadixIndices::new(kernel));
        for (ind, row) in input.iter().enumerate() {
            radix[ind] = row.clone();
            keyed[ind] = row.clone();
            indices[ind] = row.clone();
        }

        radix.sort_within(2_000, 0, 1 << 30);
        keyed.sort_within(2_000, 0, 1 << 30);
        indices.sort_within(2_000, 0, 1 << 30);

        // LSD radix sort is stable, so all three agree with a stable sort
        let mut expected = input;
        expected.sort_by_key(|row| row.key);
        assert_eq!(radix.as_slice(), expected.as_slice());
        assert_eq!(keyed.as_slice(), expected.as_slice());
        assert_eq!(indices.as_slice(), expected.as_slice());
    }

    #[test]
    fn test_comparison_buffer_is_stable() {
        let input = rows(5_000, 20, 23);
        let mut buffer: SortBuffer<WideRow, _> = SortBuffer::new(5_000, |row: &WideRow| row.key);
        for (ind, row) in input.iter().enumerate() {
            buffer[ind] = row.clone();
        }

        buffer.sort(5_000);

        let mut expected = input;
        expected.sort_by_key(|row| row.key);
        assert_eq!(buffer.as_slice(), expected.as_slice());
    }

    #[test]
    fn test_sort_prefix_only() {
        let mut buffer: SortBuffer<u64, _, Radix<u64>> = SortBuffer::new(6, |key: &u64| *key);
        for (ind, key) in [5u64, 3, 4, 2, 1, 0].into_iter().enumerate() {
            buffer[ind] = key;
        }

        buffer.sort_within(3, 3, 5);

        assert_eq!(buffer.as_slice(), &[3, 4, 5, 2, 1, 0]);
    }

    #[test]
    fn test_sort_idempotent() {
        let input = rows(1_000, 1_000, 31);
        let mut buffer: SortBuffer<WideRow, _, RadixKeyedIndices> = SortBuffer::new(1_000, |row: &WideRow| row.key);
        for (ind, row) in input.into_iter().enumerate() {
            buffer[ind] = row;
        }

        buffer.sort(1_000);
        let sorted = buffer.as_slice().to_vec();
        buffer.sort(1_000);

        assert_eq!(buffer.as_slice(), sorted.as_slice());
    }

    #[test]
    fn test_buffer_lifecycle() {
        let mut buffer: SortBuffer<u64, _, RadixIndices> = SortBuffer::new(4, |key: &u64| *key);
        assert!(buffer.is_allocated());

        buffer.clear();
        assert_eq!(buffer.capacity(), 4);
        assert!(!buffer.is_allocated());
        assert!(buffer.as_slice().is_empty());

        buffer.allocate();
        assert_eq!(buffer.as_slice().len(), 4);

        buffer.resize(8);
        for ind in 0..8 {
            buffer[ind] = 8 - ind as u64;
        }
        buffer.sort(8);
        assert_eq!(buffer.as_slice(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    #[should_panic]
    fn test_sort_beyond_capacity() {
        let mut buffer: SortBuffer<u64, _> = SortBuffer::new(4, |key: &u64| *key);
        buffer.sort(5);
    }

    #[rstest]
    #[case(vec![0, 1, 2, 3], vec!['a', 'b', 'c', 'd'])]
    #[case(vec![3, 2, 1, 0], vec!['d', 'c', 'b', 'a'])]
    #[case(vec![1, 2, 3, 0], vec!['b', 'c', 'd', 'a'])]
    #[case(vec![2, 0, 3, 1], vec!['c', 'a', 'd', 'b'])]
    fn test_apply_permutation(#[case] mut perm: Vec<usize>, #[case] expected: Vec<char>) {
        let mut data = vec!['a', 'b', 'c', 'd'];

        apply_permutation(&mut data, &mut perm);

        assert_eq!(data, expected);
        assert_eq!(perm, vec![0, 1, 2, 3]);
    }
}
