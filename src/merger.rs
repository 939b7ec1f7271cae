//! Binary heap merger.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::stream::{RowReader, StreamError};
use crate::KeyFn;

/// Heap entry: a row along with the index of the source it was read from.
struct HeapNode<T, K> {
    key: K,
    source: usize,
    row: T,
}

impl<T, K: Ord> PartialEq for HeapNode<T, K> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T, K: Ord> Eq for HeapNode<T, K> {}

impl<T, K: Ord> PartialOrd for HeapNode<T, K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T, K: Ord> Ord for HeapNode<T, K> {
    // binary heap is max-heap by default so the order is reversed to convert it to min-heap,
    // equal keys are popped in source order
    fn cmp(&self, other: &Self) -> Ordering {
        (&other.key, other.source).cmp(&(&self.key, self.source))
    }
}

/// Binary heap merger implementation.
/// Merges multiple inputs sorted by key into a single sorted output.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of rows,
/// *n* is the number of sources (inputs). Rows with equal keys are emitted in source order.
pub struct BinaryHeapMerger<'a, T, R, F>
where
    F: KeyFn<T>,
{
    items: BinaryHeap<HeapNode<T, F::Key>>,
    sources: Vec<Option<R>>,
    drained: Vec<usize>,
    key: &'a F,
    initiated: bool,
}

impl<'a, T, R, F> BinaryHeapMerger<'a, T, R, F>
where
    T: Default,
    R: RowReader<T>,
    F: KeyFn<T>,
{
    /// Creates an instance of a binary heap merger using readers as inputs.
    /// Source rows should be sorted by key in ascending order otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `sources` - Readers to be merged in a single sorted stream
    /// * `key` - Key extraction function the sources are sorted by
    pub fn new<I>(sources: I, key: &'a F) -> Self
    where
        I: IntoIterator<Item = R>,
    {
        let sources = Vec::from_iter(sources.into_iter().map(Some));
        let items = BinaryHeap::with_capacity(sources.len());

        return BinaryHeapMerger {
            items,
            sources,
            drained: Vec::new(),
            key,
            initiated: false,
        };
    }

    /// Returns indices of the sources that have been completely consumed since the previous call.
    /// Drained sources are dropped, so their backing storage can be removed.
    pub fn drained(&mut self) -> std::vec::Drain<'_, usize> {
        self.drained.drain(..)
    }

    fn advance(&mut self, idx: usize) -> Result<(), StreamError> {
        let source = match &mut self.sources[idx] {
            Some(source) => source,
            None => return Ok(()),
        };

        if source.is_exhausted() {
            self.sources[idx] = None;
            self.drained.push(idx);
            return Ok(());
        }

        let mut row = T::default();
        source.read(&mut row)?;
        self.items.push(HeapNode {
            key: self.key.key(&row),
            source: idx,
            row,
        });

        return Ok(());
    }
}

impl<'a, T, R, F> Iterator for BinaryHeapMerger<'a, T, R, F>
where
    T: Default,
    R: RowReader<T>,
    F: KeyFn<T>,
{
    type Item = Result<T, StreamError>;

    /// Returns the next row from the inputs in ascending key order.
    fn next(&mut self) -> Option<Self::Item> {
        if !self.initiated {
            self.initiated = true;
            for idx in 0..self.sources.len() {
                if let Err(err) = self.advance(idx) {
                    return Some(Err(err));
                }
            }
        }

        let node = self.items.pop()?;
        if let Err(err) = self.advance(node.source) {
            return Some(Err(err));
        }

        return Some(Ok(node.row));
    }
}

#[cfg(test)]
mod test {
    use std::io::{self, ErrorKind};

    use rstest::*;

    use super::BinaryHeapMerger;
    use crate::stream::{IterReader, StreamError};

    type Source = IterReader<std::vec::IntoIter<Result<(u32, char), io::Error>>>;

    fn sources(rows: Vec<Vec<Result<(u32, char), io::Error>>>) -> Vec<Source> {
        rows.into_iter().map(IterReader::new).collect()
    }

    fn key(row: &(u32, char)) -> u32 {
        row.0
    }

    #[rstest]
    #[case(
        vec![],
        vec![],
    )]
    #[case(
        vec![
            vec![],
            vec![]
        ],
        vec![],
    )]
    #[case(
        vec![
            vec![Ok((4, 'a')), Ok((5, 'a')), Ok((7, 'a'))],
            vec![Ok((1, 'b')), Ok((6, 'b'))],
            vec![Ok((3, 'c'))],
            vec![],
        ],
        vec![Ok((1, 'b')), Ok((3, 'c')), Ok((4, 'a')), Ok((5, 'a')), Ok((6, 'b')), Ok((7, 'a'))],
    )]
    #[case(
        vec![
            vec![Ok((2, 'a')), Ok((2, 'a'))],
            vec![Ok((1, 'b')), Ok((2, 'b'))],
            vec![Ok((2, 'c'))],
        ],
        vec![Ok((1, 'b')), Ok((2, 'a')), Ok((2, 'a')), Ok((2, 'b')), Ok((2, 'c'))],
    )]
    #[case(
        vec![
            vec![Result::Err(io::Error::new(ErrorKind::Other, "test error"))]
        ],
        vec![
            Result::Err(io::Error::new(ErrorKind::Other, "row source error: test error"))
        ],
    )]
    #[case(
        vec![
            vec![Ok((3, 'a')), Result::Err(io::Error::new(ErrorKind::Other, "test error"))],
            vec![Ok((1, 'b')), Ok((2, 'b'))],
        ],
        vec![
            Ok((1, 'b')),
            Ok((2, 'b')),
            Result::Err(io::Error::new(ErrorKind::Other, "row source error: test error")),
        ],
    )]
    fn test_merger(
        #[case] inputs: Vec<Vec<Result<(u32, char), io::Error>>>,
        #[case] expected_result: Vec<Result<(u32, char), io::Error>>,
    ) {
        let key_fn = key;
        let merger = BinaryHeapMerger::new(sources(inputs), &key_fn);
        let actual_result: Vec<Result<(u32, char), StreamError>> = merger.collect();
        assert!(
            compare_vectors_of_result(&actual_result, &expected_result),
            "actual={:?}, expected={:?}",
            actual_result,
            expected_result
        );
    }

    #[test]
    fn test_merger_drained_sources() {
        let key_fn = key;
        let mut merger = BinaryHeapMerger::new(
            sources(vec![
                vec![Ok((1, 'a')), Ok((5, 'a'))],
                vec![],
                vec![Ok((2, 'c')), Ok((3, 'c'))],
            ]),
            &key_fn,
        );

        assert_eq!(merger.next().unwrap().unwrap(), (1, 'a'));
        assert_eq!(merger.drained().collect::<Vec<_>>(), vec![1]);
        assert_eq!(merger.next().unwrap().unwrap(), (2, 'c'));
        assert!(merger.drained().next().is_none());
        assert_eq!(merger.next().unwrap().unwrap(), (3, 'c'));
        assert_eq!(merger.drained().collect::<Vec<_>>(), vec![2]);
        assert_eq!(merger.next().unwrap().unwrap(), (5, 'a'));
        assert_eq!(merger.drained().collect::<Vec<_>>(), vec![0]);
        assert!(merger.next().is_none());
    }

    fn compare_vectors_of_result<T: PartialEq>(
        actual: &Vec<Result<T, StreamError>>,
        expected: &Vec<Result<T, io::Error>>,
    ) -> bool {
        actual.len() == expected.len()
            && actual
                .into_iter()
                .zip(expected)
                .all(
                    |(actual_result, expected_result)| match (actual_result, expected_result) {
                        (Ok(actual_result), Ok(expected_result)) if actual_result == expected_result => true,
                        (Err(actual_err), Err(expected_err)) => actual_err.to_string() == expected_err.to_string(),
                        _ => false,
                    },
                )
    }
}
