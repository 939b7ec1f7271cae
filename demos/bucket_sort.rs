use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::io::{self, prelude::*};
use std::path;

use env_logger;
use log;

use radix_ext_sort::stream::{IterReader, RowWriter, StreamError};
use radix_ext_sort::{BinaryRow, BinaryStreams, ExternalSorter, ExternalSorterBuilder, RadixKeyedIndicesSortBuffer};

#[derive(Debug)]
enum CsvParseError {
    RowError(String),
    ColumnError(String),
}

impl Display for CsvParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CsvParseError::ColumnError(err) => write!(f, "column format error: {}", err),
            CsvParseError::RowError(err) => write!(f, "row format error: {}", err),
        }
    }
}

impl Error for CsvParseError {}

#[derive(Debug, Default)]
struct Person {
    id: u64,
    name: String,
    surname: String,
}

impl Person {
    fn as_csv(&self) -> String {
        format!("{},{},{}", self.id, self.name, self.surname)
    }

    fn from_str(s: &str) -> Result<Self, CsvParseError> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() != 3 {
            Err(CsvParseError::RowError("wrong columns number".to_string()))
        } else {
            Ok(Person {
                id: parts[0]
                    .parse()
                    .map_err(|err| CsvParseError::ColumnError(format!("id field format error: {}", err)))?,
                name: parts[1].to_string(),
                surname: parts[2].to_string(),
            })
        }
    }
}

impl BinaryRow for Person {
    fn serialize(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&(self.name.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.name.as_bytes());
        buf.extend_from_slice(self.surname.as_bytes());
    }

    fn deserialize(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        if bytes.len() < 12 {
            return Err(StreamError::Deserialization(Box::new(CsvParseError::RowError(
                "truncated row".to_string(),
            ))));
        }
        self.id.deserialize(&bytes[..8])?;
        let mut name_len = 0u32;
        name_len.deserialize(&bytes[8..12])?;

        let (name, surname) = bytes[12..].split_at((name_len as usize).min(bytes.len() - 12));
        self.name.deserialize(name)?;
        self.surname.deserialize(surname)?;
        return Ok(());
    }
}

struct CsvWriter<W: Write> {
    writer: W,
}

impl<W: Write> RowWriter<Person> for CsvWriter<W> {
    fn write(&mut self, row: &Person) -> Result<(), StreamError> {
        Ok(writeln!(self.writer, "{}", row.as_csv())?)
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        Ok(self.writer.flush()?)
    }
}

fn main() {
    env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();

    let input_reader = io::BufReader::new(fs::File::open("input.csv").unwrap());
    let mut output_writer = CsvWriter {
        writer: io::BufWriter::new(fs::File::create("output.csv").unwrap()),
    };

    let sorter: ExternalSorter<BinaryStreams> = ExternalSorterBuilder::new()
        .with_tmp_dir(path::Path::new("./"))
        .with_fan_out(128)
        .build()
        .unwrap();

    let mut input = IterReader::new(
        input_reader
            .lines()
            .map(|line| line.map(|line| Person::from_str(&line).unwrap())),
    );
    let mut buffer = RadixKeyedIndicesSortBuffer::new(1_000_000, |person: &Person| person.id);

    let stats = sorter.bucket_sort(&mut input, &mut output_writer, &mut buffer).unwrap();

    log::info!(
        "{} splits, {} buckets sorted, {} single value buckets",
        stats.splits,
        stats.sorted_buckets,
        stats.single_value_buckets
    );
}
