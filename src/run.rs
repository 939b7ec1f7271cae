//! Temporary storage.
//!
//! Sorted runs and buckets are kept in files of a scoped temporary directory, one file per id.
//! Two storage formats are provided:
//!
//! * [`RmpStreams`] - MessagePack log, works for any `serde` row. For more information see https://msgpack.org/.
//! * [`BinaryStreams`] - raw log of length-prefixed rows serialized by [`BinaryRow`].

use std::fs;
use std::io::{self, prelude::*};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use log;
use tempfile;

use crate::stream::{RowReader, RowWriter, StreamError, StreamPair, StreamSettings};

/// Scoped temporary directory. Removed with all its files when dropped.
pub struct RunDir {
    dir: tempfile::TempDir,
    last_id: usize,
}

impl RunDir {
    /// Creates a temporary directory inside `base`, or inside the OS temporary directory if `base` is [`None`].
    pub fn new(base: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(".tmp_sort");

        let dir = match base {
            Some(base) => builder.tempdir_in(base),
            None => builder.tempdir(),
        }?;

        log::info!("using {} as a temporary directory", dir.path().display());

        return Ok(RunDir { dir, last_id: 0 });
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Returns the path of the file with the given id.
    pub fn file(&self, id: usize) -> PathBuf {
        self.dir.path().join(format!("{}.run", id))
    }

    /// Allocates a new file id. Ids start from 1 and are never reused.
    pub fn next_id(&mut self) -> usize {
        self.last_id += 1;
        self.last_id
    }

    /// Deletes the file with the given id.
    pub fn remove(&self, id: usize) -> io::Result<()> {
        fs::remove_file(self.file(id))
    }

    /// Removes the directory reporting removal errors.
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}

fn open_file(path: &Path, settings: &StreamSettings) -> io::Result<io::Take<io::BufReader<fs::File>>> {
    let file = fs::File::open(path)?;
    let file_len = file.metadata()?.len();
    return Ok(io::BufReader::with_capacity(settings.buffer_size(), file).take(file_len));
}

fn create_file(path: &Path, settings: &StreamSettings) -> io::Result<io::BufWriter<fs::File>> {
    let file = fs::File::create(path)?;
    return Ok(io::BufWriter::with_capacity(settings.buffer_size(), file));
}

/// MessagePack temporary storage.
#[derive(Debug, Default, Clone, Copy)]
pub struct RmpStreams;

impl<T> StreamPair<T> for RmpStreams
where
    T: serde::ser::Serialize + serde::de::DeserializeOwned,
{
    type Reader = RmpReader<T>;
    type Writer = RmpWriter<T>;

    fn open(path: &Path, settings: &StreamSettings) -> Result<Self::Reader, StreamError> {
        Ok(RmpReader {
            reader: open_file(path, settings)?,
            row_type: PhantomData,
        })
    }

    fn create(path: &Path, settings: &StreamSettings) -> Result<Self::Writer, StreamError> {
        Ok(RmpWriter {
            writer: create_file(path, settings)?,
            row_type: PhantomData,
        })
    }
}

pub struct RmpReader<T> {
    reader: io::Take<io::BufReader<fs::File>>,

    row_type: PhantomData<T>,
}

impl<T: serde::de::DeserializeOwned> RowReader<T> for RmpReader<T> {
    fn read(&mut self, row: &mut T) -> Result<(), StreamError> {
        if self.reader.limit() == 0 {
            return Err(StreamError::UnexpectedEof);
        }
        *row = rmp_serde::decode::from_read(&mut self.reader)
            .map_err(|err| StreamError::Deserialization(Box::new(err)))?;
        return Ok(());
    }

    fn is_exhausted(&self) -> bool {
        self.reader.limit() == 0
    }
}

pub struct RmpWriter<T> {
    writer: io::BufWriter<fs::File>,

    row_type: PhantomData<T>,
}

impl<T: serde::ser::Serialize> RowWriter<T> for RmpWriter<T> {
    fn write(&mut self, row: &T) -> Result<(), StreamError> {
        rmp_serde::encode::write(&mut self.writer, row).map_err(|err| StreamError::Serialization(Box::new(err)))
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        Ok(self.writer.flush()?)
    }
}

/// Row with a raw binary representation.
pub trait BinaryRow {
    /// Appends the row bytes to `buf`.
    fn serialize(&self, buf: &mut Vec<u8>);

    /// Restores the row from bytes produced by [`BinaryRow::serialize`].
    fn deserialize(&mut self, bytes: &[u8]) -> Result<(), StreamError>;
}

macro_rules! impl_binary_row {
    ($($t:ty),*) => {
        $(
            impl BinaryRow for $t {
                fn serialize(&self, buf: &mut Vec<u8>) {
                    buf.extend_from_slice(&self.to_le_bytes());
                }

                fn deserialize(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
                    let bytes = bytes.try_into().map_err(|err| StreamError::Deserialization(Box::new(err)))?;
                    *self = <$t>::from_le_bytes(bytes);
                    Ok(())
                }
            }
        )*
    };
}

impl_binary_row!(u32, u64);

impl BinaryRow for String {
    fn serialize(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.as_bytes());
    }

    fn deserialize(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        let value = std::str::from_utf8(bytes).map_err(|err| StreamError::Deserialization(Box::new(err)))?;
        self.clear();
        self.push_str(value);
        Ok(())
    }
}

/// Raw binary temporary storage. Every row is stored as a little-endian `u64` length followed by the row bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryStreams;

impl<T: BinaryRow> StreamPair<T> for BinaryStreams {
    type Reader = BinaryReader<T>;
    type Writer = BinaryWriter<T>;

    fn open(path: &Path, settings: &StreamSettings) -> Result<Self::Reader, StreamError> {
        Ok(BinaryReader {
            reader: open_file(path, settings)?,
            buf: Vec::new(),
            row_type: PhantomData,
        })
    }

    fn create(path: &Path, settings: &StreamSettings) -> Result<Self::Writer, StreamError> {
        Ok(BinaryWriter {
            writer: create_file(path, settings)?,
            buf: Vec::new(),
            row_type: PhantomData,
        })
    }
}

pub struct BinaryReader<T> {
    reader: io::Take<io::BufReader<fs::File>>,
    buf: Vec<u8>,

    row_type: PhantomData<T>,
}

impl<T: BinaryRow> RowReader<T> for BinaryReader<T> {
    fn read(&mut self, row: &mut T) -> Result<(), StreamError> {
        if self.reader.limit() == 0 {
            return Err(StreamError::UnexpectedEof);
        }

        let mut len = [0u8; 8];
        self.reader.read_exact(&mut len)?;
        let len = u64::from_le_bytes(len);
        if len > self.reader.limit() {
            return Err(StreamError::UnexpectedEof);
        }

        self.buf.resize(len as usize, 0);
        self.reader.read_exact(&mut self.buf)?;
        return row.deserialize(&self.buf);
    }

    fn is_exhausted(&self) -> bool {
        self.reader.limit() == 0
    }
}

pub struct BinaryWriter<T> {
    writer: io::BufWriter<fs::File>,
    buf: Vec<u8>,

    row_type: PhantomData<T>,
}

impl<T: BinaryRow> RowWriter<T> for BinaryWriter<T> {
    fn write(&mut self, row: &T) -> Result<(), StreamError> {
        self.buf.clear();
        row.serialize(&mut self.buf);
        self.writer.write_all(&(self.buf.len() as u64).to_le_bytes())?;
        self.writer.write_all(&self.buf)?;
        return Ok(());
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        Ok(self.writer.flush()?)
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use rstest::*;
    use serde::{Deserialize, Serialize};

    use super::{BinaryRow, BinaryStreams, RmpStreams, RunDir};
    use crate::stream::{RowReader, RowWriter, StreamError, StreamPair, StreamSettings};

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        key: u64,
        name: String,
    }

    #[fixture]
    fn run_dir() -> RunDir {
        RunDir::new(Some(&std::env::temp_dir())).unwrap()
    }

    fn write_and_read<T, S>(dir: &mut RunDir, rows: &[T]) -> Vec<T>
    where
        T: Default + Clone,
        S: StreamPair<T>,
    {
        let settings = StreamSettings::default();
        let id = dir.next_id();
        let path = dir.file(id);

        let mut writer = S::create(&path, &settings).unwrap();
        for row in rows {
            writer.write(row).unwrap();
        }
        writer.flush().unwrap();
        drop(writer);

        let mut reader = S::open(&path, &settings).unwrap();
        let mut restored = Vec::new();
        let mut row = T::default();
        while !reader.is_exhausted() {
            reader.read(&mut row).unwrap();
            restored.push(row.clone());
        }
        assert!(matches!(reader.read(&mut row), Err(StreamError::UnexpectedEof)));

        restored
    }

    #[rstest]
    fn test_rmp_streams(mut run_dir: RunDir) {
        let rows: Vec<Row> = (0..100)
            .map(|key| Row {
                key: 100 - key,
                name: format!("row {}", key),
            })
            .collect();

        assert_eq!(write_and_read::<_, RmpStreams>(&mut run_dir, &rows), rows);
        assert!(write_and_read::<Row, RmpStreams>(&mut run_dir, &[]).is_empty());
    }

    #[rstest]
    fn test_binary_streams(mut run_dir: RunDir) {
        let numbers: Vec<u64> = (0..1_000).map(|value| value * 7919).collect();
        assert_eq!(write_and_read::<_, BinaryStreams>(&mut run_dir, &numbers), numbers);

        let words: Vec<String> = vec!["".to_string(), "sort".to_string(), "радикс".to_string()];
        assert_eq!(write_and_read::<_, BinaryStreams>(&mut run_dir, &words), words);
    }

    #[test]
    fn test_binary_row_invalid_width() {
        let mut value = 0u32;
        assert!(BinaryRow::deserialize(&mut value, &[1, 2, 3]).is_err());

        let mut buf = Vec::new();
        BinaryRow::serialize(&0xdead_beef_u32, &mut buf);
        BinaryRow::deserialize(&mut value, &buf).unwrap();
        assert_eq!(value, 0xdead_beef);
    }

    #[rstest]
    fn test_run_dir_lifecycle(mut run_dir: RunDir) {
        assert_eq!(run_dir.next_id(), 1);
        assert_eq!(run_dir.next_id(), 2);

        let file = run_dir.file(2);
        fs::write(&file, b"run").unwrap();
        run_dir.remove(2).unwrap();
        assert!(!file.exists());

        fs::write(run_dir.file(3), b"run").unwrap();
        let path = run_dir.path().to_path_buf();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with(".tmp_sort"));

        drop(run_dir);
        assert!(!path.exists());
    }
}
