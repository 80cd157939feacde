// teletext-rs
// Copyright (c) 2026 The teletext-rs Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `dsp` module provides the small set of signal primitives the line analyser is built from:
//! range normalisation, Gaussian smoothing, first differences, and a magnitude spectrum.

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Rescale a buffer to the 0..255 range in place, using its own minimum and maximum.
///
/// A buffer with no dynamic range maps to all zeros. The operation is idempotent: a second
/// application leaves the buffer unchanged.
pub fn normalise(buf: &mut [f32]) {
    let mut min = f32::MAX;
    let mut max = f32::MIN;
    for &x in buf.iter() {
        min = min.min(x);
        max = max.max(x);
    }

    let mut range = max - min;
    if range == 0.0 {
        range = 1.0;
    }

    let scale = 255.0 / range;
    for x in buf.iter_mut() {
        *x = ((*x - min) * scale).clamp(0.0, 255.0);
    }
}

/// Smooth a signal with a 1-D Gaussian kernel of the given standard deviation.
///
/// The kernel is truncated at four standard deviations and boundaries are handled by reflection.
pub fn gaussian_smooth(input: &[f32], sigma: f32) -> Vec<f32> {
    assert!(sigma > 0.0, "sigma must be positive");

    let radius = (4.0 * sigma + 0.5) as usize;

    let mut kernel = Vec::with_capacity(2 * radius + 1);
    let mut sum = 0.0f32;
    for k in 0..=2 * radius {
        let x = k as f32 - radius as f32;
        let w = (-x * x / (2.0 * sigma * sigma)).exp();
        kernel.push(w);
        sum += w;
    }
    for w in kernel.iter_mut() {
        *w /= sum;
    }

    let n = input.len();
    let mut output = vec![0.0f32; n];
    for (i, out) in output.iter_mut().enumerate() {
        let mut acc = 0.0f32;
        for (k, &w) in kernel.iter().enumerate() {
            let at = i as isize + k as isize - radius as isize;
            acc += w * input[reflect(at, n)];
        }
        *out = acc;
    }

    output
}

/// Reflect an index into `0..n` (abcd -> dcba|abcd|dcba).
fn reflect(at: isize, n: usize) -> usize {
    debug_assert!(n > 0);
    let period = 2 * n as isize;
    let mut at = at.rem_euclid(period);
    if at >= n as isize {
        at = period - 1 - at;
    }
    at as usize
}

/// The first difference of a signal: `out[i] = x[i + 1] - x[i]`.
pub fn first_difference(input: &[f32]) -> Vec<f32> {
    input.windows(2).map(|w| w[1] - w[0]).collect()
}

/// A magnitude spectrum of a fixed input length, planned once.
///
/// The plan is immutable after construction and may be shared between worker threads.
pub struct Spectrum {
    fft: Arc<dyn Fft<f32>>,
    len: usize,
}

impl Spectrum {
    pub fn new(len: usize) -> Spectrum {
        assert!(len > 0);
        Spectrum { fft: FftPlanner::new().plan_fft_forward(len), len }
    }

    /// Compute the magnitudes of the first `nbins` FFT bins of `input`.
    ///
    /// The input length must equal the length the plan was built for, and `nbins` may not exceed
    /// it.
    pub fn magnitudes(&self, input: &[f32], nbins: usize) -> Vec<f32> {
        assert_eq!(input.len(), self.len);
        assert!(nbins <= self.len);

        let mut buf: Vec<Complex<f32>> =
            input.iter().map(|&x| Complex::new(x, 0.0)).collect();
        self.fft.process(&mut buf);

        buf[..nbins].iter().map(|c| c.norm()).collect()
    }
}
