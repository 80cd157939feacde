// teletext-rs
// Copyright (c) 2026 The teletext-rs Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `line` module analyses one raw VBI sample line: is there a teletext signal, and where in
//! the record does its bit grid start?
//!
//! Detection compares the smoothed clock run-in region against the line's own noise floor, then
//! confirms the symbol-rate harmonic in the spectrum of the first difference. Grid location finds
//! the steepest rise of the run-in envelope and locks the final sample offset by correlating
//! against the known run-in and framing code bits.

use teletext_core::dsp::{first_difference, gaussian_smooth, normalise, Spectrum};

use crate::config::{SampleFormat, VbiConfig};

/// The analyser's verdict on one line.
#[derive(Clone, Debug, PartialEq)]
pub enum Verdict {
    /// A teletext signal was found. `start + roll` is the sample offset subtracted from the
    /// configured bit boundaries when resampling.
    Teletext { start: isize, roll: isize },
    /// No teletext signal. The reason is human-readable and flows downstream as a sentinel.
    Rejected(String),
}

/// One raw VBI line held as floats in the 0..255 range.
pub struct Line<'a> {
    config: &'a VbiConfig,
    samples: Vec<f32>,
}

impl<'a> Line<'a> {
    pub fn new(config: &'a VbiConfig, record: &[u8]) -> Line<'a> {
        assert_eq!(record.len(), config.line_length, "record size does not match configuration");

        let samples: Vec<f32> = match config.sample_format {
            SampleFormat::U8 => record.iter().map(|&b| f32::from(b)).collect(),
            // Wider samples are scaled down to the 8-bit range.
            SampleFormat::U16Le => record
                .chunks_exact(2)
                .map(|pair| f32::from(u16::from_le_bytes([pair[0], pair[1]])) / 256.0)
                .collect(),
        };

        Line { config, samples }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Chop and average the samples associated with bits `a..b`, with the bit grid shifted left
    /// by `shift` samples.
    pub fn chop(&self, a: usize, b: usize, shift: isize) -> Vec<f32> {
        let n = self.samples.len() as isize;
        let mut out = Vec::with_capacity(b - a);

        for i in a..b {
            let lo = (self.config.bits[i] as isize - shift).clamp(0, n) as usize;
            let hi = (self.config.bits[i + 1] as isize - shift).clamp(0, n) as usize;
            let sum: f32 = self.samples[lo..hi].iter().sum();
            out.push(sum / self.config.bit_lengths[i]);
        }

        out
    }

    /// Decide whether the line carries teletext and, if so, locate the bit grid.
    ///
    /// `spectrum` must be planned for one less than the line's sample count.
    pub fn analyse(&self, spectrum: &Spectrum) -> Verdict {
        let config = self.config;

        let gstart = gaussian_smooth(&self.samples[config.start_slice.clone()], config.gauss);
        let smax = max_of(&gstart);

        if smax < 64.0 {
            return Verdict::Rejected(format!("Signal max is {}", smax.round()));
        }

        // The noise floor comes from a region known to be signal-free: ahead of the run-in, or
        // the line tail when the run-in window starts the record.
        let noisefloor = if config.start_slice.start == 0 {
            let tail = &self.samples[config.line_trim..self.samples.len() - 4];
            max_of(&gaussian_smooth(tail, config.gauss))
        }
        else {
            max_of(&gaussian_smooth(&self.samples[..config.start_slice.start], config.gauss))
        };

        if noisefloor > 80.0 {
            return Verdict::Rejected(format!("Noise is {}", noisefloor.round()));
        }
        if smax < noisefloor + 16.0 {
            return Verdict::Rejected(format!(
                "Noise is higher than signal {} {}",
                smax.round(),
                noisefloor.round()
            ));
        }

        // Something is there. Confirm it is teletext by looking for harmonics of the symbol rate
        // in the first-difference spectrum.
        let mags = spectrum.magnitudes(&first_difference(&self.samples), 256);
        let mut smoothed = gaussian_smooth(&mags, 4.0);
        normalise(&mut smoothed);
        let harmonics = harmonic_sum(&smoothed, &config.fftbins);

        if harmonics <= 1000.0 {
            return Verdict::Rejected(format!("Symbol harmonics sum is {}", harmonics.round()));
        }

        // The steepest rise of the run-in envelope gives a rough grid start.
        let envelope = cumulative_max(&gstart);
        let start = -(argmax(&gradient(&envelope)) as isize);

        // Lock in with the most distinctive part of the run-in and framing code: the pattern
        // 01110 at bits 15 to 19.
        let mut best_conf = f32::MIN;
        let mut best_roll = 0isize;
        for roll in -10..20 {
            let chopped = self.chop(15, 20, start + roll);
            let conf: f32 =
                chopped.iter().zip(config.crifc[15..20].iter()).map(|(c, w)| c * w).sum();
            if conf > best_conf {
                best_conf = conf;
                best_roll = roll;
            }
        }

        Verdict::Teletext { start, roll: best_roll }
    }
}

fn max_of(xs: &[f32]) -> f32 {
    xs.iter().fold(f32::MIN, |acc, &x| acc.max(x))
}

fn argmax(xs: &[f32]) -> usize {
    let mut best = 0;
    for (i, &x) in xs.iter().enumerate() {
        if x > xs[best] {
            best = i;
        }
    }
    best
}

/// The running maximum of a signal.
fn cumulative_max(xs: &[f32]) -> Vec<f32> {
    let mut acc = f32::MIN;
    xs.iter()
        .map(|&x| {
            acc = acc.max(x);
            acc
        })
        .collect()
}

/// Central-difference gradient with one-sided ends.
fn gradient(xs: &[f32]) -> Vec<f32> {
    let n = xs.len();
    debug_assert!(n >= 2);

    let mut out = Vec::with_capacity(n);
    out.push(xs[1] - xs[0]);
    for i in 1..n - 1 {
        out.push((xs[i + 1] - xs[i - 1]) / 2.0);
    }
    out.push(xs[n - 1] - xs[n - 2]);
    out
}

/// Sum the odd-indexed windows delimited by the given bin edges.
fn harmonic_sum(spectrum: &[f32], edges: &[usize]) -> f32 {
    let n = spectrum.len();
    let mut sum = 0.0;

    for j in (1..edges.len()).step_by(2) {
        let lo = edges[j].min(n);
        let hi = if j + 1 < edges.len() { edges[j + 1].min(n) } else { n };
        sum += spectrum[lo..hi].iter().sum::<f32>();
    }

    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VbiConfig;

    fn analyse_record(record: &[u8]) -> Verdict {
        let config = VbiConfig::bt8x8_pal();
        let spectrum = Spectrum::new(config.samples_per_record() - 1);
        Line::new(&config, record).analyse(&spectrum)
    }

    #[test]
    fn verify_low_signal_rejected() {
        let verdict = analyse_record(&[40u8; 2048]);
        assert_eq!(verdict, Verdict::Rejected("Signal max is 40".into()));
    }

    #[test]
    fn verify_noisy_line_rejected() {
        let verdict = analyse_record(&[100u8; 2048]);
        assert_eq!(verdict, Verdict::Rejected("Noise is 100".into()));
    }

    #[test]
    fn verify_weak_signal_rejected() {
        let mut record = [80u8; 2048];
        for b in record[..60].iter_mut() {
            *b = 70;
        }
        let verdict = analyse_record(&record);
        assert_eq!(verdict, Verdict::Rejected("Noise is higher than signal 80 70".into()));
    }

    #[test]
    fn verify_chop_averages_runs() {
        let config = VbiConfig::bt8x8_pal();
        // A constant line chops to the constant, whatever the shift.
        let record = [200u8; 2048];
        let line = Line::new(&config, &record);
        for &shift in &[-5isize, 0, 7] {
            let chopped = line.chop(0, 360, shift);
            assert_eq!(chopped.len(), 360);
            assert!(chopped.iter().all(|&x| (x - 200.0).abs() < 1e-3));
        }
    }

    #[test]
    fn verify_sixteen_bit_samples_scale() {
        let config = VbiConfig::ddd_pal();
        let mut record = vec![0u8; config.line_length];
        // Every sample 0x8000 scales to 128.
        for pair in record.chunks_exact_mut(2) {
            pair[0] = 0x00;
            pair[1] = 0x80;
        }
        let line = Line::new(&config, &record);
        assert!(line.samples().iter().all(|&x| (x - 128.0).abs() < 1e-3));
    }

    #[test]
    fn verify_gradient_and_cumulative_max() {
        let xs = [0.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(cumulative_max(&xs), vec![0.0, 1.0, 3.0, 3.0, 5.0]);
        let g = gradient(&cumulative_max(&xs));
        // The largest rise of the envelope is into index 4.
        assert_eq!(argmax(&g), 4);
    }
}
