//! `radix-ext-sort` is a rust external sorting engine for rows keyed by an unsigned integer.
//!
//! External sorting is a class of sorting algorithms that can handle massive amounts of data. External sorting
//! is required when the data being sorted do not fit into the main memory (RAM) of a computer and instead must be
//! resided in slower external memory, usually a hard disk drive. For more information see
//! [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! `radix-ext-sort` supports the following features:
//!
//! * **Two external algorithms:**
//!   external merge sort (sorted runs merged by a k-way heap merge) and external bucket sort (the key range is
//!   recursively partitioned into bucket files until every bucket fits in memory).
//! * **Pluggable in-memory sort:**
//!   a fixed capacity [`SortBuffer`] sorts rows by comparison, by radix sort, or through a permutation of indices,
//!   which pays off when rows are wide.
//! * **Radix sort kernel:**
//!   LSD and MSD radix sort over any key range, usable on its own (see [`radix_sort`]).
//! * **Storage format agnostic:**
//!   temporary files use `MessagePack` for any `serde` row by default, a raw binary format is provided as well,
//!   and your own can be plugged in by implementing [`StreamPair`].
//!
//! Sorting is single threaded. The sort buffer is the only row memory a sort uses, so its capacity is the memory
//! budget of the sort.
//!
//! # Example
//!
//! ```no_run
//! use std::path;
//!
//! use serde::{Deserialize, Serialize};
//!
//! use radix_ext_sort::stream::{iter_rows, VecWriter};
//! use radix_ext_sort::{ExternalSorter, ExternalSorterBuilder, RadixKeyedIndicesSortBuffer};
//!
//! #[derive(Debug, Default, Clone, Serialize, Deserialize)]
//! struct Event {
//!     timestamp: u64,
//!     payload: String,
//! }
//!
//! fn main() {
//!     let events = (0..1_000_000u64).map(|id| Event {
//!         timestamp: id.wrapping_mul(0x9e37_79b9_7f4a_7c15) >> 16,
//!         payload: format!("event {}", id),
//!     });
//!
//!     let sorter: ExternalSorter = ExternalSorterBuilder::new()
//!         .with_tmp_dir(path::Path::new("./"))
//!         .with_fan_in(16)
//!         .build()
//!         .unwrap();
//!
//!     let mut buffer = RadixKeyedIndicesSortBuffer::new(100_000, |event: &Event| event.timestamp);
//!     let mut input = iter_rows(events);
//!     let mut output = VecWriter::new();
//!
//!     let stats = sorter.merge_sort(&mut input, &mut output, &mut buffer).unwrap();
//!     println!("{} runs merged in {} passes", stats.initial_runs, stats.pass_outputs.len());
//!
//!     for event in output.rows().iter().take(10) {
//!         println!("{:?}", event);
//!     }
//! }
//! ```

pub mod bucket;
pub mod buffer;
pub mod key;
pub mod merger;
pub mod radix;
pub mod run;
pub mod sort;
pub mod splitter;
pub mod stream;

pub use bucket::{BucketRange, BucketStats};
pub use buffer::{
    ComparisonSortBuffer, IndicesSortBuffer, RadixIndicesSortBuffer, RadixKeyedIndicesSortBuffer, RadixSortBuffer,
    SortBuffer, SortStrategy,
};
pub use key::{KeyFn, RadixKey};
pub use merger::BinaryHeapMerger;
pub use radix::{radix_sort, RadixOrder, RadixSort};
pub use run::{BinaryRow, BinaryStreams, RmpStreams};
pub use sort::{ExternalSorter, ExternalSorterBuilder, MergeStats, Phase, SortError};
pub use splitter::{SampleSplitter, Splitter, UniformSplitter};
pub use stream::{RowReader, RowWriter, StreamError, StreamPair, StreamSettings};
