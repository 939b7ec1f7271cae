use std::fs;
use std::io::{self, prelude::*};
use std::path;

use env_logger;
use log;

use radix_ext_sort::stream::{IterReader, RowWriter, StreamError};
use radix_ext_sort::{ExternalSorter, ExternalSorterBuilder, RadixSortBuffer};

struct LineWriter<W: Write> {
    writer: W,
}

impl<W: Write> RowWriter<u64> for LineWriter<W> {
    fn write(&mut self, row: &u64) -> Result<(), StreamError> {
        Ok(writeln!(self.writer, "{}", row)?)
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        Ok(self.writer.flush()?)
    }
}

fn main() {
    env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();

    let input_reader = io::BufReader::new(fs::File::open("input.txt").unwrap());
    let mut output_writer = LineWriter {
        writer: io::BufWriter::new(fs::File::create("output.txt").unwrap()),
    };

    let sorter: ExternalSorter = ExternalSorterBuilder::new()
        .with_tmp_dir(path::Path::new("./"))
        .with_fan_in(32)
        .build()
        .unwrap();

    let mut input = IterReader::new(input_reader.lines().map(|line| line.map(|line| line.parse::<u64>().unwrap())));
    let mut buffer = RadixSortBuffer::new(1_000_000, |number: &u64| *number);

    let stats = sorter.merge_sort(&mut input, &mut output_writer, &mut buffer).unwrap();

    log::info!(
        "{} runs, {} merge passes, read {:?}, sort {:?}, write {:?}, merge {:?}",
        stats.initial_runs,
        stats.pass_outputs.len(),
        stats.read_time,
        stats.sort_time,
        stats.write_time,
        stats.merge_time
    );
}
