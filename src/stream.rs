//! Row streams.
//!
//! Sort drivers consume and produce rows only through [`RowReader`] and [`RowWriter`]. Temporary runs and buckets
//! are stored using a [`StreamPair`] which knows how to create a writer for a new file and read it back later.

use std::error::Error;
use std::fmt::{self, Display};
use std::io;
use std::path::Path;

/// Row stream error.
#[derive(Debug)]
pub enum StreamError {
    /// Common I/O error.
    IO(io::Error),
    /// Row serialization error.
    Serialization(Box<dyn Error + Send + Sync>),
    /// Row deserialization error.
    Deserialization(Box<dyn Error + Send + Sync>),
    /// Error reported by an underlying row source.
    Source(Box<dyn Error + Send + Sync>),
    /// Read requested from an exhausted stream.
    UnexpectedEof,
}

impl Error for StreamError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            StreamError::IO(err) => Some(err),
            StreamError::Serialization(err) => Some(err.as_ref()),
            StreamError::Deserialization(err) => Some(err.as_ref()),
            StreamError::Source(err) => Some(err.as_ref()),
            StreamError::UnexpectedEof => None,
        }
    }
}

impl Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            StreamError::IO(err) => write!(f, "I/O operation failed: {}", err),
            StreamError::Serialization(err) => write!(f, "row serialization error: {}", err),
            StreamError::Deserialization(err) => write!(f, "row deserialization error: {}", err),
            StreamError::Source(err) => write!(f, "row source error: {}", err),
            StreamError::UnexpectedEof => write!(f, "read past the end of the stream"),
        }
    }
}

impl From<io::Error> for StreamError {
    fn from(err: io::Error) -> Self {
        StreamError::IO(err)
    }
}

/// Sequential row source.
pub trait RowReader<T> {
    /// Reads the next row into `row`.
    /// Must not be called once the stream is exhausted.
    fn read(&mut self, row: &mut T) -> Result<(), StreamError>;

    /// Checks whether all rows have been read.
    fn is_exhausted(&self) -> bool;
}

/// Sequential row sink.
pub trait RowWriter<T> {
    /// Appends a row to the stream.
    fn write(&mut self, row: &T) -> Result<(), StreamError>;

    /// Flushes buffered rows to the underlying storage.
    fn flush(&mut self) -> Result<(), StreamError>;
}

/// Temporary storage format: a writer creating a file and a reader reading it back.
pub trait StreamPair<T> {
    type Reader: RowReader<T>;
    type Writer: RowWriter<T>;

    /// Opens an existing file for reading.
    fn open(path: &Path, settings: &StreamSettings) -> Result<Self::Reader, StreamError>;

    /// Creates a new file for writing.
    fn create(path: &Path, settings: &StreamSettings) -> Result<Self::Writer, StreamError>;
}

/// Stream construction settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    buffer_size: usize,
}

impl StreamSettings {
    /// Smallest read/write buffer size.
    pub const MIN_BUFFER_SIZE: usize = 8 * 1024;

    /// Divides a memory budget of `total_rows` rows of `row_width` bytes evenly between `streams` simultaneously
    /// open streams.
    pub fn new(total_rows: usize, streams: usize, row_width: usize) -> Self {
        let buffer_size = (total_rows / streams.max(1)).saturating_mul(row_width);
        Self::with_buffer_size(buffer_size.max(Self::MIN_BUFFER_SIZE))
    }

    /// Uses the provided read/write buffer size as is.
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        StreamSettings { buffer_size }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self::with_buffer_size(Self::MIN_BUFFER_SIZE)
    }
}

/// Reader over an iterator of fallible rows.
///
/// The next item is prefetched so that exhaustion is known before the read.
pub struct IterReader<I: Iterator> {
    items: I,
    next: Option<I::Item>,
}

impl<T, E, I> IterReader<I>
where
    E: Error + Send + Sync + 'static,
    I: Iterator<Item = Result<T, E>>,
{
    pub fn new<C>(items: C) -> Self
    where
        C: IntoIterator<IntoIter = I>,
    {
        let mut items = items.into_iter();
        let next = items.next();
        return IterReader { items, next };
    }
}

/// Creates a reader over infallible rows.
pub fn iter_rows<T, C>(rows: C) -> IterReader<impl Iterator<Item = Result<T, std::convert::Infallible>>>
where
    C: IntoIterator<Item = T>,
{
    IterReader::new(rows.into_iter().map(Ok))
}

impl<T, E, I> RowReader<T> for IterReader<I>
where
    E: Error + Send + Sync + 'static,
    I: Iterator<Item = Result<T, E>>,
{
    fn read(&mut self, row: &mut T) -> Result<(), StreamError> {
        let next = self.items.next();
        match std::mem::replace(&mut self.next, next) {
            Some(Ok(item)) => {
                *row = item;
                Ok(())
            }
            Some(Err(err)) => Err(StreamError::Source(Box::new(err))),
            None => Err(StreamError::UnexpectedEof),
        }
    }

    fn is_exhausted(&self) -> bool {
        self.next.is_none()
    }
}

/// Writer collecting rows in memory.
#[derive(Debug, Default)]
pub struct VecWriter<T> {
    rows: Vec<T>,
}

impl<T> VecWriter<T> {
    pub fn new() -> Self {
        VecWriter { rows: Vec::new() }
    }

    pub fn rows(&self) -> &[T] {
        &self.rows
    }

    pub fn into_inner(self) -> Vec<T> {
        self.rows
    }
}

impl<T: Clone> RowWriter<T> for VecWriter<T> {
    fn write(&mut self, row: &T) -> Result<(), StreamError> {
        self.rows.push(row.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::io::{self, ErrorKind};

    use rstest::*;

    use super::{iter_rows, IterReader, RowReader, RowWriter, StreamError, StreamSettings, VecWriter};

    #[test]
    fn test_iter_reader() {
        let mut reader = iter_rows(vec![3, 1, 2]);
        let mut writer = VecWriter::new();
        let mut row = 0;

        while !reader.is_exhausted() {
            reader.read(&mut row).unwrap();
            writer.write(&row).unwrap();
        }
        writer.flush().unwrap();

        assert_eq!(writer.into_inner(), vec![3, 1, 2]);
        assert!(matches!(reader.read(&mut row), Err(StreamError::UnexpectedEof)));
    }

    #[test]
    fn test_iter_reader_empty() {
        let reader = iter_rows(Vec::<u64>::new());
        assert!(reader.is_exhausted());
    }

    #[test]
    fn test_iter_reader_source_error() {
        let mut reader = IterReader::new(vec![Ok(1), Err(io::Error::new(ErrorKind::Other, "test error"))]);
        let mut row = 0;

        reader.read(&mut row).unwrap();
        assert_eq!(row, 1);
        assert!(!reader.is_exhausted());

        let err = reader.read(&mut row).unwrap_err();
        assert_eq!(err.to_string(), "row source error: test error");
        assert!(reader.is_exhausted());
    }

    #[rstest]
    #[case(1_000_000, 10, 8, 800_000)]
    #[case(100, 10, 8, StreamSettings::MIN_BUFFER_SIZE)]
    #[case(1_000, 0, 100, 100_000)]
    #[case(usize::MAX, 1, 16, usize::MAX)]
    fn test_stream_settings(
        #[case] total_rows: usize,
        #[case] streams: usize,
        #[case] row_width: usize,
        #[case] expected: usize,
    ) {
        assert_eq!(StreamSettings::new(total_rows, streams, row_width).buffer_size(), expected);
    }
}
