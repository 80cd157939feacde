// teletext-rs
// Copyright (c) 2026 The teletext-rs Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `io` module streams a byte source as a lazy sequence of fixed-size records.
//!
//! Raw VBI captures have no framing: the file is a plain concatenation of `record_size`-byte
//! sample lines, and a t42 stream is the same thing with 42-byte records. The [`Chunker`] yields
//! `(ordinal, record)` pairs with optional start/stop/step/limit selection.

use std::fs::File;
use std::io;
use std::io::{Read, Seek, SeekFrom};

use crate::errors::Result;

/// A source of records. Files are seekable; pipes and standard input are not.
pub trait RecordSource: Read + Send {
    /// Whether the source supports seeking.
    fn is_seekable(&self) -> bool;

    /// The total length of the source in bytes, if known.
    fn byte_len(&self) -> Option<u64>;

    /// Seek to an absolute byte position. Only called when `is_seekable` returns true.
    fn seek_to(&mut self, pos: u64) -> io::Result<u64>;
}

impl RecordSource for File {
    fn is_seekable(&self) -> bool {
        // A file is seekable when its metadata reports a regular file.
        match self.metadata() {
            Ok(metadata) => metadata.is_file(),
            _ => false,
        }
    }

    fn byte_len(&self) -> Option<u64> {
        match self.metadata() {
            Ok(metadata) => Some(metadata.len()),
            _ => None,
        }
    }

    fn seek_to(&mut self, pos: u64) -> io::Result<u64> {
        self.seek(SeekFrom::Start(pos))
    }
}

impl<T: AsRef<[u8]> + Send> RecordSource for io::Cursor<T> {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.get_ref().as_ref().len() as u64)
    }

    fn seek_to(&mut self, pos: u64) -> io::Result<u64> {
        self.seek(SeekFrom::Start(pos))
    }
}

/// A wrapper for a non-seekable reader such as standard input.
pub struct ReadOnlySource<R: Read + Send> {
    inner: R,
}

impl<R: Read + Send> ReadOnlySource<R> {
    pub fn new(inner: R) -> Self {
        ReadOnlySource { inner }
    }
}

impl<R: Read + Send> Read for ReadOnlySource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Read + Send> RecordSource for ReadOnlySource<R> {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }

    fn seek_to(&mut self, _pos: u64) -> io::Result<u64> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "source does not support seeking"))
    }
}

/// Record selection parameters for a [`Chunker`].
#[derive(Copy, Clone, Debug)]
pub struct ChunkerOptions {
    /// Records to skip before the first emitted record.
    pub start: u64,
    /// Exclusive upper bound on the emitted ordinal, or unbounded.
    pub stop: Option<u64>,
    /// Emit every `step`-th record. Zero is treated as one.
    pub step: u64,
    /// Maximum number of records to emit.
    pub limit: Option<u64>,
}

impl Default for ChunkerOptions {
    fn default() -> Self {
        ChunkerOptions { start: 0, stop: None, step: 1, limit: None }
    }
}

/// A lazy sequence of `(ordinal, record)` pairs over a record source.
///
/// The ordinal is the record's position in the underlying stream, counted from zero, so a
/// selection with `start = 100` emits ordinals starting at 100. A short final record ends the
/// stream.
pub struct Chunker {
    source: Box<dyn RecordSource>,
    record_size: usize,
    ordinal: u64,
    emitted: u64,
    options: ChunkerOptions,
    done: bool,
}

impl Chunker {
    pub fn new(
        mut source: Box<dyn RecordSource>,
        record_size: usize,
        options: ChunkerOptions,
    ) -> Result<Chunker> {
        assert!(record_size > 0);

        let mut options = options;
        if options.step == 0 {
            options.step = 1;
        }

        // Seekable sources honour `start` with a seek; the rest discard records below.
        let mut skipped = 0;
        if options.start > 0 && source.is_seekable() {
            source.seek_to(options.start * record_size as u64)?;
            skipped = options.start;
        }

        Ok(Chunker { source, record_size, ordinal: skipped, emitted: 0, options, done: false })
    }

    /// The number of whole records in the source, if its length is known.
    pub fn record_count(&self) -> Option<u64> {
        self.source.byte_len().map(|len| len / self.record_size as u64)
    }

    /// Read exactly one record. `None` on a clean or short end of stream.
    fn read_record(&mut self) -> Option<io::Result<Box<[u8]>>> {
        let mut record = vec![0u8; self.record_size].into_boxed_slice();
        let mut filled = 0;

        while filled < self.record_size {
            match self.source.read(&mut record[filled..]) {
                Ok(0) => return None,
                Ok(n) => filled += n,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => (),
                Err(err) => return Some(Err(err)),
            }
        }

        Some(Ok(record))
    }

    /// Skip one record without emitting it.
    fn skip_record(&mut self) -> Option<io::Result<()>> {
        if self.source.is_seekable() {
            let pos = (self.ordinal + 1) * self.record_size as u64;
            match self.source.seek_to(pos) {
                Ok(_) => Some(Ok(())),
                Err(err) => Some(Err(err)),
            }
        }
        else {
            self.read_record().map(|r| r.map(|_| ()))
        }
    }
}

impl Iterator for Chunker {
    type Item = Result<(u64, Box<[u8]>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            if let Some(stop) = self.options.stop {
                if self.ordinal >= stop {
                    self.done = true;
                    return None;
                }
            }
            if let Some(limit) = self.options.limit {
                if self.emitted >= limit {
                    self.done = true;
                    return None;
                }
            }

            // Records below `start` (non-seekable sources only) and the `step - 1` records
            // between selections are passed over.
            let selected = self.ordinal >= self.options.start
                && (self.ordinal - self.options.start) % self.options.step == 0;

            if selected {
                match self.read_record() {
                    Some(Ok(record)) => {
                        let ordinal = self.ordinal;
                        self.ordinal += 1;
                        self.emitted += 1;
                        return Some(Ok((ordinal, record)));
                    }
                    Some(Err(err)) => {
                        self.done = true;
                        return Some(Err(err.into()));
                    }
                    None => {
                        self.done = true;
                        return None;
                    }
                }
            }

            match self.skip_record() {
                Some(Ok(())) => self.ordinal += 1,
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(err.into()));
                }
                None => {
                    self.done = true;
                    return None;
                }
            }
        }
    }
}
