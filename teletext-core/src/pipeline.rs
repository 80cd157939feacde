// teletext-rs
// Copyright (c) 2026 The teletext-rs Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `pipeline` module post-processes packet streams: magazine/row/page selection, modal
//! squashing of repeated transmissions, and pagination.
//!
//! Broadcast teletext repeats every page on a carousel, so the same packet is usually captured
//! many times with independent noise. Byte-wise modal averaging across repeats removes most of
//! it. Pagination reorders an interleaved stream so one page's rows appear contiguously.

use std::collections::HashMap;

use crate::coding::{hamming24_encode, hamming8_encode, HammingStatus};
use crate::errors::{config_error, Result};
use crate::packet::{Mrag, Packet, PacketData, PACKET_LEN};

/// Magazine and row selection masks. The default selects everything.
#[derive(Copy, Clone, Debug)]
pub struct MagRowFilter {
    mags: u16,
    rows: u32,
}

impl MagRowFilter {
    /// Select all magazines and rows.
    pub fn all() -> MagRowFilter {
        MagRowFilter { mags: !0, rows: !0 }
    }

    /// Select the given magazines (1 to 8) and rows (0 to 31). An empty list selects all.
    pub fn new(mags: &[u8], rows: &[u8]) -> MagRowFilter {
        let mut filter = MagRowFilter::all();
        if !mags.is_empty() {
            filter.mags = mags.iter().fold(0, |acc, &m| acc | (1 << (m & 0x7)));
            // Magazine 8 is coded as 0.
            if filter.mags & 1 != 0 {
                filter.mags |= 1 << 8;
            }
        }
        if !rows.is_empty() {
            filter.rows = rows.iter().fold(0, |acc, &r| acc | (1 << (r & 0x1F)));
        }
        filter
    }

    /// Restrict the row selection to the given single row.
    pub fn with_only_row(mut self, row: u8) -> MagRowFilter {
        self.rows = 1 << (row & 0x1F);
        self
    }

    pub fn accepts(&self, magazine: u8, row: u8) -> bool {
        (self.mags & (1 << (magazine & 0xF))) != 0 && (self.rows & (1 << (row & 0x1F))) != 0
    }

    pub fn accepts_mrag(&self, mrag: Mrag) -> bool {
        self.accepts(mrag.magazine, mrag.row)
    }
}

impl Default for MagRowFilter {
    fn default() -> Self {
        MagRowFilter::all()
    }
}

/// Page selection: everything, or a set of (magazine, page) pairs.
#[derive(Clone, Debug)]
pub enum PageFilter {
    All,
    Pages(Vec<(u8, u8)>),
}

impl PageFilter {
    /// Parse page specifications of the form `MPP` — a magazine digit followed by a two-digit
    /// hex page number, e.g. `"100"`. An empty list selects all pages.
    pub fn parse(specs: &[String]) -> Result<PageFilter> {
        if specs.is_empty() {
            return Ok(PageFilter::All);
        }

        let mut pages = Vec::with_capacity(specs.len());
        for spec in specs {
            let parsed = match (spec.len(), spec.chars().next()) {
                (3, Some(m @ '1'..='8')) => u8::from_str_radix(&spec[1..], 16)
                    .ok()
                    .map(|page| (m as u8 - b'0', page)),
                _ => None,
            };
            match parsed {
                Some(pair) => pages.push(pair),
                None => return config_error(format!("invalid page specification '{}'", spec)),
            }
        }
        Ok(PageFilter::Pages(pages))
    }

    pub fn accepts(&self, magazine: u8, page: u8) -> bool {
        match *self {
            PageFilter::All => true,
            PageFilter::Pages(ref pages) => pages.iter().any(|&p| p == (magazine, page)),
        }
    }
}

/// The byte-wise statistical mode of a set of equal-length buffers. Ties go to the lowest value.
fn byte_mode(buffers: &[[u8; PACKET_LEN]]) -> [u8; PACKET_LEN] {
    let mut mode = [0u8; PACKET_LEN];
    for (i, out) in mode.iter_mut().enumerate() {
        let mut counts = [0u32; 256];
        for buf in buffers {
            counts[usize::from(buf[i])] += 1;
        }
        // Scanning upward keeps the lowest value on a tie.
        let mut best = 0usize;
        for (value, &count) in counts.iter().enumerate() {
            if count > counts[best] {
                best = value;
            }
        }
        *out = best as u8;
    }
    mode
}

/// The mode of a set of decoded values. Ties go to the lowest value.
fn value_mode(values: &[u32]) -> u32 {
    let mut counts: HashMap<u32, u32> = HashMap::new();
    for &v in values {
        *counts.entry(v).or_insert(0) += 1;
    }
    let mut entries: Vec<(u32, u32)> = counts.into_iter().collect();
    entries.sort_by_key(|&(value, count)| (std::cmp::Reverse(count), value));
    entries[0].0
}

/// Squash every `group` consecutive packets into their byte-wise mode.
///
/// The squashed packet carries the ordinal of the first group member. A short final group is
/// squashed as-is.
pub fn row_squash(
    packets: impl Iterator<Item = Packet>,
    group: usize,
) -> impl Iterator<Item = Packet> {
    let group = group.max(1);
    let mut packets = packets;

    std::iter::from_fn(move || {
        let first = packets.next()?;
        let ordinal = first.ordinal();

        let mut buffers = Vec::with_capacity(group);
        buffers.push(first.to_bytes());
        while buffers.len() < group {
            match packets.next() {
                Some(p) => buffers.push(p.to_bytes()),
                None => break,
            }
        }

        let mut squashed = Packet::from_bytes(&byte_mode(&buffers), None)
            .expect("byte mode of 42-byte buffers is 42 bytes");
        squashed.set_ordinal(ordinal);
        Some(squashed)
    })
}

/// Reorder a packet stream so each page's rows appear contiguously, yielding whole page groups.
///
/// One buffer accumulates per magazine. A header packet closes its magazine's previous group;
/// a group is emitted when it starts with a header for a selected page and, with `drop_empty`,
/// contains more than just that header. Buffers still open at end of stream flush by the same
/// rule.
pub fn paginate_groups<I: Iterator<Item = Packet>>(
    packets: I,
    pages: PageFilter,
    drop_empty: bool,
) -> PaginateGroups<I> {
    PaginateGroups {
        input: Some(packets),
        buffers: Default::default(),
        pages,
        drop_empty,
        flush_cursor: 0,
    }
}

/// Like [`paginate_groups`], flattened to a packet stream.
pub fn paginate(
    packets: impl Iterator<Item = Packet>,
    pages: PageFilter,
    drop_empty: bool,
) -> impl Iterator<Item = Packet> {
    paginate_groups(packets, pages, drop_empty).flatten()
}

pub struct PaginateGroups<I: Iterator<Item = Packet>> {
    input: Option<I>,
    buffers: [Vec<Packet>; 8],
    pages: PageFilter,
    drop_empty: bool,
    flush_cursor: usize,
}

impl<I: Iterator<Item = Packet>> PaginateGroups<I> {
    /// Take a closed buffer as an emittable group, or discard it.
    fn close(&mut self, magazine: usize) -> Option<Vec<Packet>> {
        let buffer = std::mem::take(&mut self.buffers[magazine]);

        let enough = if self.drop_empty { buffer.len() > 1 } else { !buffer.is_empty() };
        if !enough {
            return None;
        }

        let selected = match buffer[0].data() {
            PacketData::Header { header, .. } => {
                self.pages.accepts(buffer[0].mrag().magazine, header.page)
            }
            _ => false,
        };
        if !selected {
            return None;
        }

        let mut group = buffer;
        group.sort_by_key(|p| p.mrag().row);
        Some(group)
    }
}

impl<I: Iterator<Item = Packet>> Iterator for PaginateGroups<I> {
    type Item = Vec<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.input.is_none() {
                // End of stream: flush the remaining buffers one magazine at a time.
                while self.flush_cursor < 8 {
                    let magazine = self.flush_cursor;
                    self.flush_cursor += 1;
                    if let Some(group) = self.close(magazine) {
                        return Some(group);
                    }
                }
                return None;
            }

            let packet = match self.input.as_mut().unwrap().next() {
                Some(packet) => packet,
                None => {
                    self.input = None;
                    continue;
                }
            };

            let magazine = usize::from(packet.mrag().magazine - 1);
            let is_header = matches!(packet.data(), PacketData::Header { .. });

            if is_header {
                let closed = self.close(magazine);
                self.buffers[magazine].clear();
                self.buffers[magazine].push(packet);
                if let Some(group) = closed {
                    return Some(group);
                }
            }
            else {
                self.buffers[magazine].push(packet);
            }
        }
    }
}

// Subpage accumulation matrix layout: 30 byte-wise columns and 44 triplet-wise columns.
const BYTE_COLS: usize = 30;
const TRIP_COLS: usize = 44;

/// One captured instance of a subpage.
struct SubpageInstance {
    /// Rows 0..=25 at their row number, row 27 DC 0..=3 at 26 + DC. Absent columns are None.
    bytes: [Option<[u8; PACKET_LEN]>; BYTE_COLS],
    /// Decoded enhancement triplets: row 26 at DC, row 27 DC 4..=15 at 12 + DC, row 28 at
    /// 28 + DC. Uncorrectable triplets are None inside a present column.
    triplets: [Option<[Option<u32>; 13]>; TRIP_COLS],
}

impl SubpageInstance {
    fn from_group(group: &[Packet]) -> SubpageInstance {
        let mut instance =
            SubpageInstance { bytes: [None; BYTE_COLS], triplets: [None; TRIP_COLS] };

        for packet in group {
            let row = packet.mrag().row;
            let dc = packet.dc().unwrap_or(0) as usize;

            match packet.data() {
                PacketData::Fastext { .. } => {
                    instance.bytes[26 + dc] = Some(packet.to_bytes());
                }
                PacketData::Enhancement { .. } => {
                    let col = match row {
                        26 => dc,
                        27 => 12 + dc,
                        28 => 28 + dc,
                        _ => continue,
                    };
                    let decoded = packet.to_triplets().expect("enhancement packet has triplets");
                    let mut values = [None; 13];
                    for (out, &(value, status)) in values.iter_mut().zip(decoded.iter()) {
                        if status != HammingStatus::Uncorrectable {
                            *out = Some(value);
                        }
                    }
                    instance.triplets[col] = Some(values);
                }
                _ if row < 26 => {
                    instance.bytes[usize::from(row)] = Some(packet.to_bytes());
                }
                _ => (),
            }
        }

        instance
    }
}

/// Squash repeated captures of whole subpages into one synthesised copy each.
///
/// Packets are paginated, grouped by (magazine, page, subpage), and buckets seen at least
/// `minimum_dups` times are averaged: byte-wise mode for the Hamming 8/4 rows, triplet-wise mode
/// over the decoded values (uncorrectable triplets ignored) for enhancement rows. Buckets are
/// emitted in first-seen order.
pub fn subpage_squash(
    packets: impl Iterator<Item = Packet>,
    minimum_dups: usize,
    pages: PageFilter,
) -> Vec<Packet> {
    let mut order: Vec<(u8, u8, u16)> = Vec::new();
    let mut buckets: HashMap<(u8, u8, u16), Vec<SubpageInstance>> = HashMap::new();

    for group in paginate_groups(packets, pages, true) {
        let (magazine, page, subpage) = match group[0].data() {
            PacketData::Header { header, .. } => {
                (group[0].mrag().magazine, header.page, header.subpage)
            }
            _ => continue,
        };

        let key = (magazine, page, subpage);
        let instances = buckets.entry(key).or_insert_with(|| {
            order.push(key);
            Vec::new()
        });
        instances.push(SubpageInstance::from_group(&group));
    }

    let mut output = Vec::new();

    for key in order {
        let instances = &buckets[&key];
        if instances.len() < minimum_dups {
            log::debug!(
                "subpage {}{:02x}:{:04x} seen {} times, need {}",
                key.0,
                key.1,
                key.2,
                instances.len(),
                minimum_dups
            );
            continue;
        }

        let (magazine, _, _) = key;

        for col in 0..BYTE_COLS {
            let buffers: Vec<[u8; PACKET_LEN]> =
                instances.iter().filter_map(|i| i.bytes[col]).collect();
            if buffers.is_empty() {
                continue;
            }
            let squashed = Packet::from_bytes(&byte_mode(&buffers), None)
                .expect("byte mode of 42-byte buffers is 42 bytes");
            output.push(squashed);
        }

        for col in 0..TRIP_COLS {
            let present: Vec<&[Option<u32>; 13]> =
                instances.iter().filter_map(|i| i.triplets[col].as_ref()).collect();
            if present.is_empty() {
                continue;
            }

            let (row, dc) = match col {
                0..=15 => (26u8, col as u8),
                16..=27 => (27, col as u8 - 12),
                _ => (28, col as u8 - 28),
            };

            let mut bytes = [0u8; PACKET_LEN];
            bytes[..2].copy_from_slice(&Mrag::new(magazine, row).to_bytes());
            bytes[2] = hamming8_encode(dc);
            for n in 0..13 {
                let values: Vec<u32> = present.iter().filter_map(|t| t[n]).collect();
                let code = hamming24_encode(if values.is_empty() { 0 } else { value_mode(&values) });
                let at = 3 + 3 * n;
                bytes[at] = (code & 0xFF) as u8;
                bytes[at + 1] = ((code >> 8) & 0xFF) as u8;
                bytes[at + 2] = ((code >> 16) & 0xFF) as u8;
            }

            let squashed =
                Packet::from_bytes(&bytes, None).expect("synthesised packet is 42 bytes");
            output.push(squashed);
        }
    }

    output
}
