// teletext-rs
// Copyright (c) 2026 The teletext-rs Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

use std::fs::File;
use std::io;
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use log::error;

use teletext_core::errors::{config_error, Result};
use teletext_core::io::{Chunker, ChunkerOptions, ReadOnlySource, RecordSource};
use teletext_core::packet::{Packet, PACKET_LEN};
use teletext_core::pipeline::{
    paginate, row_squash, subpage_squash, MagRowFilter, PageFilter,
};
use teletext_vbi::config::VbiConfig;
use teletext_vbi::deconvolve::{Deconvolver, LineResult};
use teletext_vbi::driver::{drive, DecodeMode, DriverOptions, SpeedMonitor};

#[derive(Parser)]
#[command(name = "teletext", version, about = "Recover teletext packets from raw VBI captures")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Deconvolve raw VBI samples into teletext packets.
    Deconvolve(DeconvolveArgs),
    /// Demultiplex, filter, and display t42 packet streams.
    Pipe(PipeArgs),
    /// Squash repeated subpage captures into one clean copy each.
    Squash(SquashArgs),
}

#[derive(Args)]
struct SelectionArgs {
    /// Input file, or - for standard input.
    input: PathBuf,

    /// Start at the Nth line of the input file.
    #[arg(long, value_name = "N", default_value_t = 0)]
    start: u64,

    /// Stop before the Nth line of the input file.
    #[arg(long, value_name = "N")]
    stop: Option<u64>,

    /// Process every Nth line from the input file.
    #[arg(long, value_name = "N", default_value_t = 1)]
    step: u64,

    /// Stop after processing N lines from the input file.
    #[arg(long, value_name = "N")]
    limit: Option<u64>,

    /// Only keep lines from these magazines.
    #[arg(short, long, value_name = "M", num_args = 1..)]
    mags: Vec<u8>,

    /// Only keep lines from these rows.
    #[arg(short, long, value_name = "R", num_args = 1..)]
    rows: Vec<u8>,

    /// Write output as FORMAT:PATH (formats: auto, t42, ansi; path - for standard output).
    /// May be given more than once.
    #[arg(short, long, value_name = "FORMAT:PATH", value_parser = parse_output)]
    output: Vec<OutputSpec>,

    /// When output is ansi, prefix each line with its ordinal in the input file.
    #[arg(short, long)]
    numbered: bool,
}

impl SelectionArgs {
    fn chunker_options(&self) -> ChunkerOptions {
        ChunkerOptions { start: self.start, stop: self.stop, step: self.step, limit: self.limit }
    }

    fn filter(&self) -> MagRowFilter {
        MagRowFilter::new(&self.mags, &self.rows)
    }
}

#[derive(Args)]
struct DeconvolveArgs {
    #[command(flatten)]
    selection: SelectionArgs,

    /// Capture card configuration.
    #[arg(short, long, default_value = "bt8x8_pal")]
    config: String,

    /// Disable GPU acceleration even if it is available.
    #[arg(short = 'C', long)]
    force_cpu: bool,

    /// Number of worker threads. Zero decodes on the main thread.
    #[arg(short = 'T', long, value_name = "T", default_value_t = 1)]
    threads: usize,

    /// Shift the located bit grid by this many samples.
    #[arg(short = 'e', long, value_name = "SAMPLES", default_value_t = 4)]
    extra_roll: isize,

    /// Merge N consecutive packets to reduce output.
    #[arg(short = 'S', long, value_name = "N", default_value_t = 1)]
    squash: usize,

    /// Shorthand for ansi output, numbered, rows 0.
    #[arg(short = 'H', long)]
    headers: bool,

    /// Use the threshold decoder instead of pattern matching.
    #[arg(long)]
    slice: bool,
}

#[derive(Args)]
struct PipeArgs {
    #[command(flatten)]
    selection: SelectionArgs,

    /// Reorder the stream so each page's rows appear contiguously.
    #[arg(long)]
    paginate: bool,

    /// Only keep these pages, e.g. 100 2ff. Implies --paginate.
    #[arg(short, long, value_name = "P", num_args = 1..)]
    pages: Vec<String>,
}

#[derive(Args)]
struct SquashArgs {
    #[command(flatten)]
    selection: SelectionArgs,

    /// Minimum captures of a subpage required to emit it.
    #[arg(short = 'd', long, value_name = "N", default_value_t = 3)]
    minimum_dups: usize,

    /// Only keep these pages, e.g. 100 2ff.
    #[arg(short, long, value_name = "P", num_args = 1..)]
    pages: Vec<String>,
}

/// One requested output sink.
#[derive(Clone, Debug)]
struct OutputSpec {
    format: OutputFormat,
    path: PathBuf,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum OutputFormat {
    /// ansi on a terminal, t42 otherwise.
    Auto,
    T42,
    Ansi,
}

fn parse_output(spec: &str) -> std::result::Result<OutputSpec, String> {
    let (format, path) = match spec.split_once(':') {
        Some((format, path)) => (format, path),
        None => (spec, "-"),
    };

    let format = match format {
        "auto" => OutputFormat::Auto,
        "t42" => OutputFormat::T42,
        "ansi" => OutputFormat::Ansi,
        other => return Err(format!("unknown output format '{}'", other)),
    };

    Ok(OutputSpec { format, path: PathBuf::from(path) })
}

/// A resolved output sink.
struct Sink {
    ansi: bool,
    numbered: bool,
    out: Box<dyn Write>,
}

impl Sink {
    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        if self.ansi {
            if self.numbered {
                write!(self.out, "{:8} ", packet.ordinal().unwrap_or(0))?;
            }
            writeln!(self.out, "{}", packet.to_ansi(true))?;
        }
        else {
            self.out.write_all(&packet.to_bytes())?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

fn open_source(path: &Path) -> Result<Box<dyn RecordSource>> {
    if path == Path::new("-") {
        Ok(Box::new(ReadOnlySource::new(io::stdin())))
    }
    else {
        Ok(Box::new(File::open(path)?))
    }
}

fn open_sinks(specs: &[OutputSpec], numbered: bool) -> Result<Vec<Sink>> {
    let default_spec = [OutputSpec { format: OutputFormat::Auto, path: PathBuf::from("-") }];
    let specs = if specs.is_empty() { &default_spec[..] } else { specs };

    let mut sinks = Vec::with_capacity(specs.len());
    for spec in specs {
        let to_stdout = spec.path == Path::new("-");

        let ansi = match spec.format {
            OutputFormat::Ansi => true,
            OutputFormat::T42 => false,
            OutputFormat::Auto => to_stdout && io::stdout().is_terminal(),
        };

        let out: Box<dyn Write> = if to_stdout {
            Box::new(io::stdout())
        }
        else {
            Box::new(File::create(&spec.path)?)
        };

        sinks.push(Sink { ansi, numbered, out });
    }

    Ok(sinks)
}

fn write_to_all(sinks: &mut [Sink], packet: &Packet) -> Result<()> {
    for sink in sinks.iter_mut() {
        sink.write_packet(packet)?;
    }
    Ok(())
}

fn run_deconvolve(args: DeconvolveArgs) -> Result<()> {
    let mut filter = args.selection.filter();
    let mut numbered = args.selection.numbered;
    let mut outputs = args.selection.output.clone();

    if args.headers {
        filter = filter.with_only_row(0);
        numbered = true;
        if outputs.is_empty() {
            outputs.push(OutputSpec { format: OutputFormat::Auto, path: PathBuf::from("-") });
        }
        for output in outputs.iter_mut() {
            if output.format == OutputFormat::Auto {
                output.format = OutputFormat::Ansi;
            }
        }
    }

    let config = VbiConfig::by_name(&args.config)?;
    if args.force_cpu {
        log::debug!("pattern matching always runs on the CPU in this build");
    }

    let chunker =
        Chunker::new(open_source(&args.selection.input)?, config.line_length, args.selection.chunker_options())?;
    let expected = match args.selection.stop {
        Some(stop) => Some(stop),
        None => chunker.record_count(),
    };

    let deconvolver = Arc::new(Deconvolver::new(config, args.extra_roll));
    let options = DriverOptions {
        threads: args.threads,
        ordered: true,
        mode: if args.slice { DecodeMode::Slice } else { DecodeMode::Deconvolve },
        ..Default::default()
    };

    let mut sinks = open_sinks(&outputs, numbered)?;
    let mut monitor = SpeedMonitor::new(expected);

    let squash = args.squash.max(1);
    let mut group: Vec<Packet> = Vec::with_capacity(squash);

    for item in drive(chunker, deconvolver, filter, options) {
        let (_, result) = item?;
        monitor.tally(&result);

        let packet = match result {
            LineResult::Packet(packet) => packet,
            _ => continue,
        };

        if squash <= 1 {
            write_to_all(&mut sinks, &packet)?;
        }
        else {
            group.push(packet);
            if group.len() == squash {
                for squashed in row_squash(std::mem::take(&mut group).into_iter(), squash) {
                    write_to_all(&mut sinks, &squashed)?;
                }
            }
        }
    }

    if !group.is_empty() {
        for squashed in row_squash(group.into_iter(), squash) {
            write_to_all(&mut sinks, &squashed)?;
        }
    }

    for sink in sinks.iter_mut() {
        sink.flush()?;
    }
    monitor.finish();

    Ok(())
}

/// Read a t42 stream into packets, stopping at the first source error.
fn read_packets(
    chunker: Chunker,
    error: &mut Option<teletext_core::errors::TeletextError>,
) -> impl Iterator<Item = Packet> + '_ {
    chunker.map_while(move |item| match item {
        Ok((ordinal, record)) => Packet::from_bytes(&record, Some(ordinal)).ok(),
        Err(err) => {
            *error = Some(err);
            None
        }
    })
}

fn run_pipe(args: PipeArgs) -> Result<()> {
    let filter = args.selection.filter();
    let pages = PageFilter::parse(&args.pages)?;
    let paginated = args.paginate || !args.pages.is_empty();

    let chunker = Chunker::new(
        open_source(&args.selection.input)?,
        PACKET_LEN,
        args.selection.chunker_options(),
    )?;

    let mut sinks = open_sinks(&args.selection.output, args.selection.numbered)?;
    let mut source_error = None;

    {
        let packets =
            read_packets(chunker, &mut source_error).filter(|p| filter.accepts_mrag(p.mrag()));

        if paginated {
            for packet in paginate(packets, pages, false) {
                write_to_all(&mut sinks, &packet)?;
            }
        }
        else {
            for packet in packets {
                write_to_all(&mut sinks, &packet)?;
            }
        }
    }

    if let Some(err) = source_error {
        return Err(err);
    }

    for sink in sinks.iter_mut() {
        sink.flush()?;
    }
    Ok(())
}

fn run_squash(args: SquashArgs) -> Result<()> {
    if args.minimum_dups == 0 {
        return config_error("--minimum-dups must be at least 1");
    }

    let filter = args.selection.filter();
    let pages = PageFilter::parse(&args.pages)?;

    let chunker = Chunker::new(
        open_source(&args.selection.input)?,
        PACKET_LEN,
        args.selection.chunker_options(),
    )?;

    let mut sinks = open_sinks(&args.selection.output, args.selection.numbered)?;
    let mut source_error = None;

    let squashed = {
        let packets =
            read_packets(chunker, &mut source_error).filter(|p| filter.accepts_mrag(p.mrag()));
        subpage_squash(packets, args.minimum_dups, pages)
    };

    if let Some(err) = source_error {
        return Err(err);
    }

    for packet in &squashed {
        write_to_all(&mut sinks, packet)?;
    }

    for sink in sinks.iter_mut() {
        sink.flush()?;
    }
    Ok(())
}

fn main() {
    pretty_env_logger::init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Deconvolve(args) => run_deconvolve(args),
        Command::Pipe(args) => run_pipe(args),
        Command::Squash(args) => run_squash(args),
    };

    if let Err(err) = result {
        error!("{}", err);
        eprintln!("teletext: {}", err);
        process::exit(1);
    }
}
