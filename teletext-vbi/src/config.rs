// teletext-rs
// Copyright (c) 2026 The teletext-rs Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `config` module describes capture card sample geometry.
//!
//! A configuration fixes the record size, the sample format, and the bit grid: where each of the
//! 360 NRZ bits of a teletext line falls in the oversampled record. Bit boundaries are generally
//! non-integer multiples of the sample period, so each bit averages a short, per-bit run of
//! samples. Named profiles for known cards ship as preset constructors.

use std::ops::Range;

use teletext_core::errors::{config_error, Result};

/// The teletext symbol rate in bits per second.
pub const TELETEXT_BITRATE: f64 = 6_937_500.0;

/// Number of NRZ bits carried by one teletext line: clock run-in, framing code, and 45 payload
/// bytes.
pub const LINE_BITS: usize = 360;

/// Bit boundaries are tabulated slightly past the line so that deconvolution can chop a trailing
/// margin byte.
const GRID_BITS: usize = 369;

/// The width and byte order of one sample.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SampleFormat {
    /// One unsigned byte per sample.
    U8,
    /// Two bytes per sample, little-endian unsigned.
    U16Le,
}

impl SampleFormat {
    pub fn width(&self) -> usize {
        match *self {
            SampleFormat::U8 => 1,
            SampleFormat::U16Le => 2,
        }
    }
}

/// Sample geometry for one capture card profile.
#[derive(Clone, Debug)]
pub struct VbiConfig {
    /// The profile name.
    pub name: &'static str,
    /// Record size in bytes.
    pub line_length: usize,
    /// Sample width and byte order.
    pub sample_format: SampleFormat,
    /// The card's sample clock in Hz.
    pub sample_rate: f64,
    /// Sample offset of each bit boundary, `GRID_BITS + 1` entries.
    pub bits: Vec<usize>,
    /// Number of samples each bit averages, `GRID_BITS` entries.
    pub bit_lengths: Vec<f32>,
    /// The sample range in which the clock run-in appears.
    pub start_slice: Range<usize>,
    /// Start of the tail region known to be signal-free.
    pub line_trim: usize,
    /// Standard deviation of the detection smoothing kernel.
    pub gauss: f32,
    /// Spectrum bin edges bracketing the symbol-rate harmonics. Odd-indexed windows are summed by
    /// the detector.
    pub fftbins: Vec<usize>,
    /// The expected clock run-in and framing code bit pattern.
    pub crifc: [f32; 24],
}

impl VbiConfig {
    /// Derive a profile from the card's sample clock.
    fn from_rate(
        name: &'static str,
        line_length: usize,
        sample_format: SampleFormat,
        sample_rate: f64,
        start_slice: Range<usize>,
        line_trim: usize,
        gauss: f32,
        fftbins: Vec<usize>,
    ) -> VbiConfig {
        let bit_width = sample_rate / TELETEXT_BITRATE;

        // The grid hangs off the front of the start slice; the detected grid start is a correction
        // within that slice.
        let bits: Vec<usize> = (0..=GRID_BITS)
            .map(|i| start_slice.start + (i as f64 * bit_width).round() as usize)
            .collect();
        let bit_lengths: Vec<f32> = bits.windows(2).map(|w| (w[1] - w[0]) as f32).collect();

        let mut crifc = [0.0f32; 24];
        // Sixteen alternating clock run-in bits, leading one first.
        for (i, bit) in crifc[..16].iter_mut().enumerate() {
            *bit = if i % 2 == 0 { 1.0 } else { 0.0 };
        }
        crifc[16..].copy_from_slice(&[1.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

        VbiConfig {
            name,
            line_length,
            sample_format,
            sample_rate,
            bits,
            bit_lengths,
            start_slice,
            line_trim,
            gauss,
            fftbins,
            crifc,
        }
    }

    /// The Brooktree Bt8x8 PAL profile: 8-bit samples at 35.468950 MHz, 2048-byte records.
    pub fn bt8x8_pal() -> VbiConfig {
        VbiConfig::from_rate(
            "bt8x8_pal",
            2048,
            SampleFormat::U8,
            35_468_950.0,
            60..130,
            2000,
            3.0,
            // The clock run-in fundamental lands near bin 200 of the 256-bin half spectrum.
            vec![0, 195, 205, 250, 255],
        )
    }

    /// The Domesday Duplicator PAL profile: 16-bit little-endian samples at 40 MHz, 2560 samples
    /// per line.
    pub fn ddd_pal() -> VbiConfig {
        VbiConfig::from_rate(
            "ddd_pal",
            5120,
            SampleFormat::U16Le,
            40_000_000.0,
            60..140,
            2400,
            3.5,
            vec![0, 217, 227, 250, 255],
        )
    }

    /// Look a profile up by name.
    pub fn by_name(name: &str) -> Result<VbiConfig> {
        let config = match name {
            "bt8x8_pal" => VbiConfig::bt8x8_pal(),
            "ddd_pal" => VbiConfig::ddd_pal(),
            _ => return config_error(format!("no configuration named '{}'", name)),
        };
        log::debug!("using configuration {}", config.name);
        Ok(config)
    }

    /// Number of samples in one record.
    pub fn samples_per_record(&self) -> usize {
        self.line_length / self.sample_format.width()
    }

    /// The number of samples spanned by one bit.
    pub fn bit_width(&self) -> f64 {
        self.sample_rate / TELETEXT_BITRATE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_grid_shape() {
        let config = VbiConfig::bt8x8_pal();
        assert_eq!(config.bits.len(), GRID_BITS + 1);
        assert_eq!(config.bit_lengths.len(), GRID_BITS);

        // Boundaries are strictly increasing and stay inside the record.
        assert!(config.bits.windows(2).all(|w| w[1] > w[0]));
        assert!(*config.bits.last().unwrap() < config.samples_per_record());

        // Each bit averages five or six samples at the Bt8x8 clock.
        assert!(config.bit_lengths.iter().all(|&l| l == 5.0 || l == 6.0));
    }

    #[test]
    fn verify_crifc_shape() {
        let config = VbiConfig::bt8x8_pal();
        assert_eq!(config.crifc[0], 1.0);
        assert_eq!(config.crifc[15], 0.0);
        // The last clock run-in bit and the first framing bits read 0 1 1 1 0.
        assert_eq!(&config.crifc[15..20], &[0.0, 1.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn verify_profiles_resolve() {
        assert!(VbiConfig::by_name("bt8x8_pal").is_ok());
        assert_eq!(VbiConfig::by_name("ddd_pal").unwrap().sample_format, SampleFormat::U16Le);
        assert!(VbiConfig::by_name("unknown").is_err());
    }
}
