use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;
use serde::{Deserialize, Serialize};

use radix_ext_sort::buffer::{Comparison, Indices, Radix, RadixIndices, RadixKeyedIndices};
use radix_ext_sort::stream::StreamError;
use radix_ext_sort::{
    BinaryRow, BinaryStreams, ExternalSorter, ExternalSorterBuilder, RmpStreams, SortBuffer, SortError,
    SortStrategy, StreamPair, StreamSettings,
};

/// Benchmark row: a sequential id and two random keys.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Record {
    id: u64,
    uniform: u64,
    norm: u64,
}

impl BinaryRow for Record {
    fn serialize(&self, buf: &mut Vec<u8>) {
        for field in [self.id, self.uniform, self.norm] {
            buf.extend_from_slice(&field.to_le_bytes());
        }
    }

    fn deserialize(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        if bytes.len() != 24 {
            return Err(StreamError::Deserialization(
                format!("record must be 24 bytes long, got {}", bytes.len()).into(),
            ));
        }
        BinaryRow::deserialize(&mut self.id, &bytes[0..8])?;
        BinaryRow::deserialize(&mut self.uniform, &bytes[8..16])?;
        BinaryRow::deserialize(&mut self.norm, &bytes[16..24])?;
        Ok(())
    }
}

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let algorithm: Algorithm = arg_parser.value_of_t_or_exit("algorithm");
    let buffer_kind: BufferKind = arg_parser.value_of_t_or_exit("buffer");
    let key_field: KeyField = arg_parser.value_of_t_or_exit("key");
    let tmp_format: TmpFormat = arg_parser.value_of_t_or_exit("tmp_format");
    let fan: usize = arg_parser.value_of_t_or_exit("fan");
    let tmp_dir: Option<&str> = arg_parser.value_of("tmp_dir");
    let memory = arg_parser.value_of("memory").expect("value is required");
    let input = arg_parser.value_of("input").expect("value is required");
    let output = arg_parser.value_of("output").expect("value is required");

    let memory = memory.parse::<ByteSize>().expect("value is pre-validated").as_u64() as usize;
    let capacity = memory / std::mem::size_of::<Record>();

    let job = Job {
        input: path::Path::new(input),
        output: path::Path::new(output),
        tmp_dir: tmp_dir.map(path::Path::new),
        algorithm,
        key: key_field.key_fn(),
        capacity,
        fan,
    };

    let result = match tmp_format {
        TmpFormat::Rmp => job.run_with_buffer::<RmpStreams>(buffer_kind),
        TmpFormat::Binary => job.run_with_buffer::<BinaryStreams>(buffer_kind),
    };

    if let Err(err) = result {
        log::error!("data sorting error: {}", err);
        process::exit(1);
    }
}

struct Job<'a> {
    input: &'a path::Path,
    output: &'a path::Path,
    tmp_dir: Option<&'a path::Path>,
    algorithm: Algorithm,
    key: fn(&Record) -> u64,
    capacity: usize,
    fan: usize,
}

impl<'a> Job<'a> {
    fn run_with_buffer<S: StreamPair<Record>>(&self, buffer_kind: BufferKind) -> Result<(), SortError> {
        match buffer_kind {
            BufferKind::Comparison => self.run::<S, Comparison>(),
            BufferKind::Radix => self.run::<S, Radix<Record>>(),
            BufferKind::Indices => self.run::<S, Indices>(),
            BufferKind::RadixIndices => self.run::<S, RadixIndices>(),
            BufferKind::RadixKeyedIndices => self.run::<S, RadixKeyedIndices>(),
        }
    }

    fn run<S, St>(&self) -> Result<(), SortError>
    where
        S: StreamPair<Record>,
        St: SortStrategy<Record> + Default,
    {
        let mut sorter_builder: ExternalSorterBuilder<S> = ExternalSorterBuilder::new()
            .with_fan_in(self.fan)
            .with_fan_out(self.fan);
        if let Some(tmp_dir) = self.tmp_dir {
            sorter_builder = sorter_builder.with_tmp_dir(tmp_dir);
        }
        let sorter: ExternalSorter<S> = sorter_builder.build()?;

        let settings = StreamSettings::default();
        let mut input = <RmpStreams as StreamPair<Record>>::open(self.input, &settings)
            .map_err(|err| stream_error("input", err))?;
        let mut output = <RmpStreams as StreamPair<Record>>::create(self.output, &settings)
            .map_err(|err| stream_error("output", err))?;
        let mut buffer: SortBuffer<Record, _, St> = SortBuffer::new(self.capacity, self.key);

        match self.algorithm {
            Algorithm::Merge => {
                let stats = sorter.merge_sort(&mut input, &mut output, &mut buffer)?;
                log::info!(
                    "runs: {}, merge passes: {:?}, read: {:?}, sort: {:?}, write: {:?}, merge: {:?}",
                    stats.initial_runs,
                    stats.pass_outputs,
                    stats.read_time,
                    stats.sort_time,
                    stats.write_time,
                    stats.merge_time
                );
            }
            Algorithm::Bucket => {
                let stats = sorter.bucket_sort(&mut input, &mut output, &mut buffer)?;
                log::info!(
                    "splits: {}, sorted buckets: {}, single value buckets: {}, max pending buckets: {}",
                    stats.splits,
                    stats.sorted_buckets,
                    stats.single_value_buckets,
                    stats.max_pending
                );
            }
        }

        return Ok(());
    }
}

fn stream_error(stream: &str, err: StreamError) -> SortError {
    match err {
        StreamError::IO(err) => SortError::IO(std::io::Error::new(err.kind(), format!("{} file: {}", stream, err))),
        err => SortError::Config(format!("{} file: {}", stream, err)),
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum Algorithm {
    Merge,
    Bucket,
}

impl Algorithm {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Algorithm::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Algorithm as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum BufferKind {
    Comparison,
    Radix,
    Indices,
    RadixIndices,
    RadixKeyedIndices,
}

impl BufferKind {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        BufferKind::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for BufferKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <BufferKind as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum KeyField {
    Id,
    Uniform,
    Norm,
}

impl KeyField {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        KeyField::value_variants().iter().filter_map(|v| v.to_possible_value())
    }

    fn key_fn(self) -> fn(&Record) -> u64 {
        match self {
            KeyField::Id => |record| record.id,
            KeyField::Uniform => |record| record.uniform,
            KeyField::Norm => |record| record.norm,
        }
    }
}

impl std::str::FromStr for KeyField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <KeyField as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum TmpFormat {
    Rmp,
    Binary,
}

impl TmpFormat {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        TmpFormat::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for TmpFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <TmpFormat as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("radix-ext-sort")
        .about("external sorter for MessagePack logs of benchmark records")
        .arg(
            clap::Arg::new("input")
                .short('i')
                .long("input")
                .help("MessagePack file to be sorted")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("result file")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("algorithm")
                .short('a')
                .long("algorithm")
                .help("external sorting algorithm")
                .takes_value(true)
                .default_value("merge")
                .possible_values(Algorithm::possible_values()),
        )
        .arg(
            clap::Arg::new("buffer")
                .short('b')
                .long("buffer")
                .help("in-memory sort strategy")
                .takes_value(true)
                .default_value("radix-keyed-indices")
                .possible_values(BufferKind::possible_values()),
        )
        .arg(
            clap::Arg::new("key")
                .short('k')
                .long("key")
                .help("record field to sort by")
                .takes_value(true)
                .default_value("uniform")
                .possible_values(KeyField::possible_values()),
        )
        .arg(
            clap::Arg::new("memory")
                .short('m')
                .long("memory")
                .help("sort buffer size")
                .required(true)
                .takes_value(true)
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(size) if size.as_u64() as usize >= std::mem::size_of::<Record>() => Ok(()),
                    Ok(_) => Err("Memory size must hold at least one record".to_string()),
                    Err(err) => Err(format!("Memory size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("fan")
                .short('f')
                .long("fan")
                .help("merge fan-in or bucket fan-out")
                .takes_value(true)
                .default_value("64")
                .validator(|v| match v.parse::<usize>() {
                    Ok(fan) if fan > 0 => Ok(()),
                    Ok(_) => Err("Fan must be positive".to_string()),
                    Err(err) => Err(format!("Fan format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("tmp_format")
                .long("tmp-format")
                .help("temporary file format")
                .takes_value(true)
                .default_value("rmp")
                .possible_values(TmpFormat::possible_values()),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary data")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
