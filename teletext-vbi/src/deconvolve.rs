// teletext-rs
// Copyright (c) 2026 The teletext-rs Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `deconvolve` module turns one analysed line into one 42-byte packet.
//!
//! After the analyser locates the bit grid, the whole line is resampled and normalised, the MRAG
//! and designation code are matched first, and the rest of the packet is filled by row class:
//! each class names the window of bits it occupies and the dictionary its bytes are drawn from.
//!
//! The resampled window is 368 bits (46 bytes) rather than the 360 bits of the physical line,
//! because the pattern matchers need one margin byte on each side of the bytes being matched.
//! The framing code covers the leading margin; the trailing one hangs past the line proper.

use teletext_core::coding::hamming8_decode;
use teletext_core::dsp::{first_difference, normalise, Spectrum};
use teletext_core::errors::{Result, TeletextError};
use teletext_core::packet::{Mrag, Packet, PACKET_LEN};
use teletext_core::pipeline::MagRowFilter;

use crate::config::VbiConfig;
use crate::line::{Line, Verdict};
use crate::pattern::{CpuMatcher, PatternMatcher, PatternSet};

/// The per-line outcome flowing through the result stream.
///
/// Rejections and filtered lines are sentinels, not errors: they are counted by the monitor and
/// dropped by the output stage without disturbing the stream.
#[derive(Debug)]
pub enum LineResult {
    /// A recovered packet.
    Packet(Packet),
    /// The line carries no usable teletext signal.
    Rejected(String),
    /// The line decoded to a magazine or row outside the selection.
    Filtered,
}

impl LineResult {
    /// True when the line yielded a packet.
    pub fn is_packet(&self) -> bool {
        matches!(*self, LineResult::Packet(_))
    }
}

/// Recovers packets from raw lines using a fixed configuration and dictionary set.
///
/// Construction builds the three pattern dictionaries and plans the detection FFT; afterwards
/// the deconvolver is immutable and may be shared between worker threads.
pub struct Deconvolver {
    config: VbiConfig,
    spectrum: Spectrum,
    h: Box<dyn PatternMatcher>,
    p: Box<dyn PatternMatcher>,
    f: Box<dyn PatternMatcher>,
    extra_roll: isize,
}

impl Deconvolver {
    /// Build a deconvolver for the given configuration.
    ///
    /// `extra_roll` shifts the located bit grid by a fixed number of samples to absorb a card's
    /// constant timing offset.
    pub fn new(config: VbiConfig, extra_roll: isize) -> Deconvolver {
        log::info!("building pattern dictionaries for {}", config.name);

        let spectrum = Spectrum::new(config.samples_per_record() - 1);
        Deconvolver {
            spectrum,
            h: Box::new(CpuMatcher::new(PatternSet::hamming())),
            p: Box::new(CpuMatcher::new(PatternSet::parity())),
            f: Box::new(CpuMatcher::new(PatternSet::full())),
            extra_roll,
            config,
        }
    }

    pub fn config(&self) -> &VbiConfig {
        &self.config
    }

    /// Recover a packet from one raw line by pattern matching.
    pub fn deconvolve(
        &self,
        ordinal: u64,
        record: &[u8],
        filter: &MagRowFilter,
    ) -> Result<LineResult> {
        let line = Line::new(&self.config, record);

        let (start, roll) = match line.analyse(&self.spectrum) {
            Verdict::Rejected(reason) => return Ok(LineResult::Rejected(reason)),
            Verdict::Teletext { start, roll } => (start, roll),
        };
        let shift = start + roll + self.extra_roll;

        let mut bits = line.chop(0, 368, shift);
        normalise(&mut bits);

        let mut bytes = [0u8; PACKET_LEN];

        // The MRAG and designation code select the codings for everything that follows.
        self.h.match_into(&bits[16..56], &mut bytes[0..3])?;
        let (mrag, _) = Mrag::from_bytes([bytes[0], bytes[1]]);
        let (dc, _) = hamming8_decode(bytes[2]);

        if !filter.accepts(mrag.magazine, mrag.row) {
            return Ok(LineResult::Filtered);
        }

        match mrag.row {
            0 => {
                self.h.match_into(&bits[40..112], &mut bytes[3..10])?;
                self.p.match_into(&bits[96..368], &mut bytes[10..42])?;
            }
            1..=25 => {
                self.p.match_into(&bits[32..368], &mut bytes[2..42])?;
            }
            27 if dc < 4 => {
                // Editorial links, with a raw checksum tail.
                self.h.match_into(&bits[40..352], &mut bytes[3..40])?;
                self.f.match_into(&bits[336..368], &mut bytes[40..42])?;
            }
            26..=29 => {
                self.f.match_into(&bits[40..368], &mut bytes[3..42])?;
            }
            30 if mrag.magazine == 8 => {
                // Broadcast service data: initial page, then format-dependent data, then the
                // status display.
                self.h.match_into(&bits[40..104], &mut bytes[3..9])?;
                if dc == 2 || dc == 3 {
                    self.h.match_into(&bits[88..208], &mut bytes[9..22])?;
                }
                else {
                    self.f.match_into(&bits[88..208], &mut bytes[9..22])?;
                }
                self.p.match_into(&bits[192..368], &mut bytes[22..42])?;
            }
            _ => {
                // Independent data lines.
                self.h.match_into(&bits[40..64], &mut bytes[3..4])?;

                if mrag.magazine == 4 {
                    // Data channels 4 and 12 carry low bit-rate audio.
                    self.f.match_into(&bits[48..368], &mut bytes[4..42])?;
                }
                else if dc & 1 == 0 {
                    // Format A.
                    self.f.match_into(&bits[48..368], &mut bytes[4..42])?;
                }
                else {
                    // Format B: a continuity index, then user data.
                    self.h.match_into(&bits[48..72], &mut bytes[4..5])?;
                    self.f.match_into(&bits[56..368], &mut bytes[5..42])?;
                }
            }
        }

        Ok(LineResult::Packet(Packet::from_bytes(&bytes, Some(ordinal))?))
    }

    /// Recover a packet from one raw line by threshold and first difference.
    ///
    /// The fallback decoder when pattern matching is unavailable: a bit is set when its level is
    /// high or it rises sharply, unless it falls sharply. Transitions pull bits in the direction
    /// of the transition.
    pub fn slice(&self, ordinal: u64, record: &[u8], filter: &MagRowFilter) -> Result<LineResult> {
        let line = Line::new(&self.config, record);

        let (start, roll) = match line.analyse(&self.spectrum) {
            Verdict::Rejected(reason) => return Ok(LineResult::Rejected(reason)),
            Verdict::Teletext { start, roll } => (start, roll),
        };
        let shift = start + roll + self.extra_roll;

        // Bit 23 is the last framing bit: the difference below shortens the window by one, so
        // the threshold starts exactly at the first MRAG bit.
        let mut bits = line.chop(23, 360, shift);

        let flat = bits.iter().all(|&x| x == bits[0]);
        if flat {
            return Err(TeletextError::SliceBelowNoise);
        }
        normalise(&mut bits);

        let diff = first_difference(&bits);

        let mut bytes = [0u8; PACKET_LEN];
        for (i, &d) in diff.iter().enumerate() {
            let bit = (bits[i + 1] > 127.0 || d > 48.0) && d > -48.0;
            if bit {
                bytes[i / 8] |= 1 << (i % 8);
            }
        }

        let packet = Packet::from_bytes(&bytes, Some(ordinal))?;
        if !filter.accepts(packet.mrag().magazine, packet.mrag().row) {
            return Ok(LineResult::Filtered);
        }

        Ok(LineResult::Packet(packet))
    }
}
