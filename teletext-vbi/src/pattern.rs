// teletext-rs
// Copyright (c) 2026 The teletext-rs Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `pattern` module recovers bytes from resampled bit windows by nearest-waveform matching.
//!
//! A dictionary pairs every codeword a byte position may legally hold with the ideal waveform
//! that broadcasting it would produce. Restricting the candidates to valid codewords is what
//! makes deconvolution robust: a noisy window snaps to the nearest *legal* byte rather than the
//! nearest arbitrary one. Three dictionaries cover the teletext codings: Hamming 8/4, odd
//! parity, and the full byte range.

use teletext_core::coding::{hamming8_set, parity_set};
use teletext_core::errors::{margin_error, Result};

/// Bits per byte in a resampled window.
const BYTE_BITS: usize = 8;

/// A byte recoverer working on normalised bit windows.
///
/// Implementations must be interchangeable bit-for-bit: a window always matches to the same
/// bytes whatever the backend.
pub trait PatternMatcher: Send + Sync {
    /// Match every byte position inside `window`, writing the winning codewords to `out`.
    ///
    /// The window must carry one margin byte on each side of the bytes to be matched, so its
    /// length must be at least `(out.len() + 2) * 8`. Fails with `InsufficientMargin` otherwise.
    fn match_into(&self, window: &[f32], out: &mut [u8]) -> Result<()>;
}

/// A dictionary of (codeword, ideal waveform) pairs.
///
/// The ideal waveform of a codeword is its eight NRZ bit levels in transmission order (least
/// significant bit first) on the normalised 0..255 scale. Dictionaries are built from the codec
/// tables alone; no external data files are involved.
pub struct PatternSet {
    name: &'static str,
    codewords: Vec<u8>,
    waveforms: Vec<f32>,
}

impl PatternSet {
    fn build(name: &'static str, codewords: Vec<u8>) -> PatternSet {
        let mut waveforms = Vec::with_capacity(codewords.len() * BYTE_BITS);
        for &code in &codewords {
            for bit in 0..BYTE_BITS {
                waveforms.push(if (code >> bit) & 1 == 1 { 255.0 } else { 0.0 });
            }
        }

        log::debug!("built pattern set '{}' with {} codewords", name, codewords.len());
        PatternSet { name, codewords, waveforms }
    }

    /// The 16 Hamming 8/4 codewords.
    pub fn hamming() -> PatternSet {
        PatternSet::build("hamming", hamming8_set().to_vec())
    }

    /// The 128 odd-parity bytes.
    pub fn parity() -> PatternSet {
        PatternSet::build("parity", parity_set().to_vec())
    }

    /// All 256 bytes, for positions with no byte-level coding.
    pub fn full() -> PatternSet {
        PatternSet::build("full", (0..=255).collect())
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.codewords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codewords.is_empty()
    }
}

/// The CPU matcher: an exhaustive sum-of-absolute-differences argmin over the dictionary.
///
/// The waveform table is flat with a fixed stride so the inner loop vectorises. Ties resolve to
/// the dictionary's first entry, which is the lowest codeword by construction.
pub struct CpuMatcher {
    set: PatternSet,
}

impl CpuMatcher {
    pub fn new(set: PatternSet) -> CpuMatcher {
        CpuMatcher { set }
    }
}

impl PatternMatcher for CpuMatcher {
    fn match_into(&self, window: &[f32], out: &mut [u8]) -> Result<()> {
        if window.len() < (out.len() + 2) * BYTE_BITS {
            return margin_error("pattern window is shorter than the bytes to match plus margins");
        }

        for (k, byte) in out.iter_mut().enumerate() {
            // Skip the leading margin byte.
            let sub = &window[BYTE_BITS * (k + 1)..BYTE_BITS * (k + 2)];

            let mut best = 0usize;
            let mut best_sad = f32::MAX;
            for (index, wave) in self.set.waveforms.chunks_exact(BYTE_BITS).enumerate() {
                let mut sad = 0.0f32;
                for i in 0..BYTE_BITS {
                    sad += (sub[i] - wave[i]).abs();
                }
                if sad < best_sad {
                    best_sad = sad;
                    best = index;
                }
            }

            *byte = self.set.codewords[best];
        }

        Ok(())
    }
}
