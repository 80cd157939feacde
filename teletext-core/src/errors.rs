// teletext-rs
// Copyright (c) 2026 The teletext-rs Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `errors` module defines the common error type.
//!
//! Per-line conditions (a rejected or filtered line) are not errors: they are sentinels carried in
//! the result stream and never abort it. The variants here cover structural and process-wide
//! failures only.

use std::error;
use std::fmt;
use std::io;
use std::result;

/// `TeletextError` provides an enumeration of all possible errors reported by teletext-rs.
#[derive(Debug)]
pub enum TeletextError {
    /// An IO error occurred while reading or seeking the sample stream. Fatal for the run.
    IoError(io::Error),
    /// A 42-byte buffer failed a structural check and no packet could be formed from it.
    MalformedPacket(&'static str),
    /// A pattern-matcher input window was too short to satisfy the margin contract. Fatal for the
    /// line, not for the stream.
    InsufficientMargin(&'static str),
    /// The slice decoder found no usable dynamic range in the line.
    SliceBelowNoise,
    /// A missing or invalid configuration. Fatal for the whole run.
    ConfigError(String),
    /// A worker thread failed; the fault is surfaced once on the consumer side and terminates the
    /// result stream.
    WorkerFault(String),
}

impl fmt::Display for TeletextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            TeletextError::IoError(ref err) => {
                write!(f, "io error: {}", err)
            }
            TeletextError::MalformedPacket(msg) => {
                write!(f, "malformed packet: {}", msg)
            }
            TeletextError::InsufficientMargin(msg) => {
                write!(f, "insufficient margin: {}", msg)
            }
            TeletextError::SliceBelowNoise => {
                write!(f, "slice decoder input is below the noise floor")
            }
            TeletextError::ConfigError(ref msg) => {
                write!(f, "configuration error: {}", msg)
            }
            TeletextError::WorkerFault(ref msg) => {
                write!(f, "worker fault: {}", msg)
            }
        }
    }
}

impl error::Error for TeletextError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            TeletextError::IoError(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for TeletextError {
    fn from(err: io::Error) -> TeletextError {
        TeletextError::IoError(err)
    }
}

pub type Result<T> = result::Result<T, TeletextError>;

/// Convenience function to create a malformed packet error.
pub fn malformed_packet_error<T>(msg: &'static str) -> Result<T> {
    Err(TeletextError::MalformedPacket(msg))
}

/// Convenience function to create an insufficient margin error.
pub fn margin_error<T>(msg: &'static str) -> Result<T> {
    Err(TeletextError::InsufficientMargin(msg))
}

/// Convenience function to create a configuration error.
pub fn config_error<T>(msg: impl Into<String>) -> Result<T> {
    Err(TeletextError::ConfigError(msg.into()))
}

/// Convenience function to create a worker fault.
pub fn worker_fault<T>(msg: impl Into<String>) -> Result<T> {
    Err(TeletextError::WorkerFault(msg.into()))
}
