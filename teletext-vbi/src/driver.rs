// teletext-rs
// Copyright (c) 2026 The teletext-rs Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `driver` module fans raw lines out to worker threads and streams the results back.
//!
//! Records are batched into chunks and dispatched over bounded channels. Workers run the
//! deconvolver and are otherwise stateless; the consumer side reassembles chunks in record order
//! (ordered mode) or forwards them as they complete. Dropping the stream closes the channels, and
//! the pool drains and joins within a bounded time.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver};

use teletext_core::errors::{worker_fault, Result};
use teletext_core::io::Chunker;
use teletext_core::pipeline::MagRowFilter;

use crate::deconvolve::{Deconvolver, LineResult};

/// Which decoder the workers run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DecodeMode {
    /// Pattern-matching deconvolution.
    Deconvolve,
    /// The threshold-and-difference fallback.
    Slice,
}

/// Worker pool parameters.
#[derive(Copy, Clone, Debug)]
pub struct DriverOptions {
    /// Worker thread count. Zero runs the decoder on the consumer's thread.
    pub threads: usize,
    /// Records per dispatched chunk.
    pub chunk_size: usize,
    /// Whether results must appear in record order.
    pub ordered: bool,
    pub mode: DecodeMode,
}

impl Default for DriverOptions {
    fn default() -> Self {
        DriverOptions { threads: 1, chunk_size: 1000, ordered: true, mode: DecodeMode::Deconvolve }
    }
}

type Item = (u64, LineResult);
type TaggedChunk = (u64, Result<Vec<Item>>);

/// Run one record through the selected decoder, folding per-line errors into the stream.
fn process_one(
    deconvolver: &Deconvolver,
    mode: DecodeMode,
    filter: &MagRowFilter,
    ordinal: u64,
    record: &[u8],
) -> LineResult {
    let result = match mode {
        DecodeMode::Deconvolve => deconvolver.deconvolve(ordinal, record, filter),
        DecodeMode::Slice => deconvolver.slice(ordinal, record, filter),
    };

    match result {
        Ok(result) => result,
        // Per-line failures never abort the stream.
        Err(err) => {
            log::warn!("line {}: {}", ordinal, err);
            LineResult::Rejected(format!("Decoder error: {}", err))
        }
    }
}

/// Distribute the chunker's records over a worker pool, returning the consumable result stream.
pub fn drive(
    chunker: Chunker,
    deconvolver: Arc<Deconvolver>,
    filter: MagRowFilter,
    options: DriverOptions,
) -> ResultStream {
    if options.threads == 0 {
        return ResultStream {
            inner: StreamInner::Inline { chunker, deconvolver, filter, mode: options.mode },
        };
    }

    let slots = options.threads * 2;
    let (work_tx, work_rx) = bounded::<(u64, Vec<(u64, Box<[u8]>)>)>(slots);
    let (result_tx, result_rx) = bounded::<TaggedChunk>(slots);

    let chunk_size = options.chunk_size.max(1);
    let feeder_result_tx = result_tx.clone();
    let feeder = thread::spawn(move || {
        let mut chunker = chunker;
        let mut seq = 0u64;
        let mut batch: Vec<(u64, Box<[u8]>)> = Vec::with_capacity(chunk_size);

        for item in chunker.by_ref() {
            match item {
                Ok(pair) => {
                    batch.push(pair);
                    if batch.len() == chunk_size {
                        if work_tx.send((seq, std::mem::take(&mut batch))).is_err() {
                            return;
                        }
                        seq += 1;
                    }
                }
                Err(err) => {
                    // An unreadable source is fatal for the run.
                    let _ = feeder_result_tx.send((seq, Err(err)));
                    return;
                }
            }
        }

        if !batch.is_empty() {
            let _ = work_tx.send((seq, batch));
        }
        // Dropping the sender lets the workers drain and exit.
    });

    let mut workers = Vec::with_capacity(options.threads);
    for _ in 0..options.threads {
        let work_rx = work_rx.clone();
        let result_tx = result_tx.clone();
        let deconvolver = Arc::clone(&deconvolver);
        let mode = options.mode;

        workers.push(thread::spawn(move || {
            while let Ok((seq, records)) = work_rx.recv() {
                let items: Vec<Item> = records
                    .iter()
                    .map(|(ordinal, record)| {
                        (*ordinal, process_one(&deconvolver, mode, &filter, *ordinal, record))
                    })
                    .collect();

                if result_tx.send((seq, Ok(items))).is_err() {
                    return;
                }
            }
        }));
    }

    log::debug!("started {} worker threads", options.threads);

    ResultStream {
        inner: StreamInner::Pool(PoolStream {
            results: Some(result_rx),
            queue: VecDeque::new(),
            pending: HashMap::new(),
            next_seq: 0,
            ordered: options.ordered,
            faulted: false,
            feeder: Some(feeder),
            workers,
        }),
    }
}

/// The consumable stream of `(ordinal, result)` pairs.
pub struct ResultStream {
    inner: StreamInner,
}

enum StreamInner {
    Inline {
        chunker: Chunker,
        deconvolver: Arc<Deconvolver>,
        filter: MagRowFilter,
        mode: DecodeMode,
    },
    Pool(PoolStream),
}

struct PoolStream {
    results: Option<Receiver<TaggedChunk>>,
    queue: VecDeque<Item>,
    pending: HashMap<u64, Vec<Item>>,
    next_seq: u64,
    ordered: bool,
    faulted: bool,
    feeder: Option<thread::JoinHandle<()>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl Iterator for ResultStream {
    type Item = Result<Item>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner {
            StreamInner::Inline { ref mut chunker, ref deconvolver, ref filter, mode } => {
                match chunker.next()? {
                    Ok((ordinal, record)) => {
                        Some(Ok((ordinal, process_one(deconvolver, mode, filter, ordinal, &record))))
                    }
                    Err(err) => Some(Err(err)),
                }
            }
            StreamInner::Pool(ref mut pool) => pool.next(),
        }
    }
}

impl PoolStream {
    fn next(&mut self) -> Option<Result<Item>> {
        loop {
            if let Some(item) = self.queue.pop_front() {
                return Some(Ok(item));
            }
            if self.faulted {
                return None;
            }

            let results = self.results.as_ref()?;
            match results.recv() {
                Ok((seq, Ok(items))) => {
                    if self.ordered {
                        self.pending.insert(seq, items);
                        while let Some(ready) = self.pending.remove(&self.next_seq) {
                            self.queue.extend(ready);
                            self.next_seq += 1;
                        }
                    }
                    else {
                        self.queue.extend(items);
                    }
                }
                Ok((_, Err(err))) => {
                    self.faulted = true;
                    return Some(Err(err));
                }
                Err(_) => {
                    // Every sender is gone. A leftover reassembly gap means a worker died
                    // without delivering its chunk.
                    self.results = None;
                    if self.ordered && !self.pending.is_empty() {
                        self.faulted = true;
                        return Some(worker_fault(
                            "a worker thread terminated without delivering its results",
                        ));
                    }
                    return None;
                }
            }
        }
    }
}

impl Drop for PoolStream {
    fn drop(&mut self) {
        // Closing the result channel unblocks the workers; closing the work channel follows from
        // the workers exiting, which unblocks the feeder.
        self.results = None;
        if let Some(handle) = self.feeder.take() {
            let _ = handle.join();
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Throughput counters with a rate-limited status line on standard error.
pub struct SpeedMonitor {
    start: Instant,
    last_update: Instant,
    total: u64,
    teletext: u64,
    rejected: u64,
    expected: Option<u64>,
}

impl SpeedMonitor {
    /// Status line interval.
    const UPDATE_EVERY: Duration = Duration::from_secs(2);

    pub fn new(expected: Option<u64>) -> SpeedMonitor {
        let now = Instant::now();
        SpeedMonitor { start: now, last_update: now, total: 0, teletext: 0, rejected: 0, expected }
    }

    /// Count one result and emit a status line if enough time has passed.
    pub fn tally(&mut self, result: &LineResult) {
        if result.is_packet() {
            self.teletext += 1;
        }
        else {
            self.rejected += 1;
        }
        self.total += 1;

        if self.last_update.elapsed() >= SpeedMonitor::UPDATE_EVERY {
            self.emit();
            self.last_update = Instant::now();
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn teletext(&self) -> u64 {
        self.teletext
    }

    fn emit(&self) {
        let elapsed = self.start.elapsed().as_secs_f64().max(1e-6);
        let secs = elapsed as u64;
        let (h, m, s) = (secs / 3600, (secs / 60) % 60, secs % 60);

        let progress = match self.expected {
            Some(expected) if expected > 0 => format!(
                "{}/{} lines ({:.2}%)",
                self.total,
                expected,
                100.0 * self.total as f64 / expected as f64
            ),
            _ => format!("{} lines", self.total),
        };

        eprint!(
            "{:02}:{:02}:{:02} : {}, {:.0}/s total, {:.0}/s teletext, {:.2}% rejected.   \r",
            h,
            m,
            s,
            progress,
            self.total as f64 / elapsed,
            self.teletext as f64 / elapsed,
            100.0 * self.rejected as f64 / self.total.max(1) as f64,
        );
    }

    /// Emit a final status line and terminate it.
    pub fn finish(&self) {
        self.emit();
        eprintln!();
    }
}
