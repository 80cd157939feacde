// teletext-rs
// Copyright (c) 2026 The teletext-rs Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `packet` module defines the 42-byte teletext packet and its row-class variants.
//!
//! A packet is always stored alongside the raw buffer it was decoded from. Re-emitting a packet
//! with [`Packet::to_bytes`] re-encodes only the fields a variant decodes and preserves every
//! other byte, so a canonical packet round-trips exactly.

use std::fmt;

use crate::coding::{
    hamming16_decode, hamming24_decode, hamming8_decode, hamming8_encode, parity_decode,
    HammingStatus,
};
use crate::errors::{malformed_packet_error, Result};

/// Length in bytes of every teletext packet.
pub const PACKET_LEN: usize = 42;

/// The Magazine-Row Address Group: the first two Hamming 8/4 bytes of every packet.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Mrag {
    /// The magazine number, 1 to 8. A coded value of 0 means magazine 8.
    pub magazine: u8,
    /// The row number, 0 to 31.
    pub row: u8,
}

impl Mrag {
    pub fn new(magazine: u8, row: u8) -> Mrag {
        debug_assert!(magazine >= 1 && magazine <= 8);
        debug_assert!(row < 32);
        Mrag { magazine, row }
    }

    /// Decode an MRAG from its two coded bytes.
    pub fn from_bytes(bytes: [u8; 2]) -> (Mrag, HammingStatus) {
        let (value, status) = hamming16_decode(bytes);

        let magazine = match value & 0x7 {
            0 => 8,
            m => m,
        };

        (Mrag { magazine, row: value >> 3 }, status)
    }

    /// Re-encode the MRAG into its two coded bytes.
    pub fn to_bytes(self) -> [u8; 2] {
        let value = (self.magazine & 0x7) | (self.row << 3);
        [hamming8_encode(value & 0xF), hamming8_encode(value >> 4)]
    }
}

impl fmt::Display for Mrag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:2}", self.magazine, self.row)
    }
}

/// The decoded header fields of a row 0 packet, bytes 2 to 9.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PageHeader {
    /// The page number within the magazine, two Hamming 8/4 nibbles (units, then tens).
    pub page: u8,
    /// The subpage number, four Hamming 8/4 nibbles masked to the 13 significant bits.
    pub subpage: u16,
    /// The control bits, high nibble from byte 8 and low nibble from byte 9.
    pub control: u16,
}

impl PageHeader {
    pub fn from_bytes(bytes: &[u8]) -> PageHeader {
        debug_assert_eq!(bytes.len(), 8);

        let (page, _) = hamming16_decode([bytes[0], bytes[1]]);
        let (sub_lo, _) = hamming16_decode([bytes[2], bytes[3]]);
        let (sub_hi, _) = hamming16_decode([bytes[4], bytes[5]]);
        let (ctrl_hi, _) = hamming8_decode(bytes[6]);
        let (ctrl_lo, _) = hamming8_decode(bytes[7]);

        PageHeader {
            page,
            subpage: (u16::from(sub_lo) | (u16::from(sub_hi) << 8)) & 0x3F7F,
            control: (u16::from(ctrl_hi) << 4) | u16::from(ctrl_lo),
        }
    }

    pub fn to_bytes(self) -> [u8; 8] {
        [
            hamming8_encode(self.page & 0xF),
            hamming8_encode(self.page >> 4),
            hamming8_encode((self.subpage & 0xF) as u8),
            hamming8_encode(((self.subpage >> 4) & 0xF) as u8),
            hamming8_encode(((self.subpage >> 8) & 0xF) as u8),
            hamming8_encode(((self.subpage >> 12) & 0xF) as u8),
            hamming8_encode(((self.control >> 4) & 0xF) as u8),
            hamming8_encode((self.control & 0xF) as u8),
        ]
    }
}

/// A fastext page link: six Hamming 8/4 bytes naming a page and subpage.
///
/// The link's magazine is carried as an XOR delta against the magazine of the packet holding it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PageLink {
    pub magazine: u8,
    pub page: u8,
    pub subpage: u16,
}

impl PageLink {
    /// Decode a link relative to the carrying packet's magazine.
    pub fn from_bytes(bytes: &[u8], magazine: u8) -> PageLink {
        debug_assert_eq!(bytes.len(), 6);

        let (page, _) = hamming16_decode([bytes[0], bytes[1]]);
        let (s1, _) = hamming8_decode(bytes[2]);
        let (s2m, _) = hamming8_decode(bytes[3]);
        let (s3, _) = hamming8_decode(bytes[4]);
        let (s4m, _) = hamming8_decode(bytes[5]);

        let delta = (s2m >> 3) | ((s4m >> 2) << 1);
        let linked = match (magazine & 0x7) ^ delta {
            0 => 8,
            m => m,
        };

        PageLink {
            magazine: linked,
            page,
            subpage: u16::from(s1)
                | (u16::from(s2m & 0x7) << 4)
                | (u16::from(s3) << 8)
                | (u16::from(s4m & 0x3) << 12),
        }
    }

    /// Re-encode the link relative to the carrying packet's magazine.
    pub fn to_bytes(self, magazine: u8) -> [u8; 6] {
        let delta = (self.magazine & 0x7) ^ (magazine & 0x7);

        [
            hamming8_encode(self.page & 0xF),
            hamming8_encode(self.page >> 4),
            hamming8_encode((self.subpage & 0xF) as u8),
            hamming8_encode(((self.subpage >> 4) & 0x7) as u8 | ((delta & 1) << 3)),
            hamming8_encode(((self.subpage >> 8) & 0xF) as u8),
            hamming8_encode(((self.subpage >> 12) & 0x3) as u8 | ((delta >> 1) << 2)),
        ]
    }
}

impl fmt::Display for PageLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:02x}", self.magazine, self.page)
    }
}

/// The row-class payload of a packet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PacketData {
    /// Row 0: the page header and its 32 displayable bytes.
    Header { header: PageHeader, displayable: [u8; 32] },
    /// Rows 1 to 24: 40 parity-coded displayable bytes.
    Display([u8; 40]),
    /// Row 27 with designation code 0 to 3: six editorial page links.
    Fastext { dc: u8, links: [PageLink; 6], link_control: u8, checksum: u16 },
    /// Rows 26, 28, 29, and row 27 with designation code 4 and up: thirteen Hamming 24/18
    /// triplets, stored as raw codewords.
    Enhancement { dc: u8, triplets: [u32; 13] },
    /// Row 30, magazine 8: broadcast service data.
    Broadcast { dc: u8, initial_page: PageLink, displayable: [u8; 20] },
    /// Row 30, other magazines: an independent data line.
    Idl { dc: u8 },
    /// Rows with no structural interpretation, and packets whose MRAG was uncorrectable.
    Raw,
}

/// A 42-byte teletext packet tagged with its row-class variant.
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    mrag: Mrag,
    data: PacketData,
    raw: [u8; PACKET_LEN],
    ordinal: Option<u64>,
}

impl Packet {
    /// Decode a packet from its 42 bytes.
    ///
    /// Fails with `MalformedPacket` when the buffer is not exactly 42 bytes. An uncorrectable
    /// MRAG does not fail: the packet decodes to the base variant so the stream can keep
    /// counting it.
    pub fn from_bytes(bytes: &[u8], ordinal: Option<u64>) -> Result<Packet> {
        if bytes.len() != PACKET_LEN {
            return malformed_packet_error("packet buffer must be exactly 42 bytes");
        }

        let mut raw = [0u8; PACKET_LEN];
        raw.copy_from_slice(bytes);

        let (mrag, status) = Mrag::from_bytes([raw[0], raw[1]]);

        let data = if status.is_recovered() {
            Packet::classify(mrag, &raw)
        }
        else {
            log::debug!("uncorrectable mrag in packet {:?}", ordinal);
            PacketData::Raw
        };

        Ok(Packet { mrag, data, raw, ordinal })
    }

    /// Build the row-class payload for a packet with a recovered MRAG.
    fn classify(mrag: Mrag, raw: &[u8; PACKET_LEN]) -> PacketData {
        match mrag.row {
            0 => {
                let mut displayable = [0u8; 32];
                displayable.copy_from_slice(&raw[10..42]);
                PacketData::Header { header: PageHeader::from_bytes(&raw[2..10]), displayable }
            }
            1..=24 => {
                let mut displayable = [0u8; 40];
                displayable.copy_from_slice(&raw[2..42]);
                PacketData::Display(displayable)
            }
            26 | 28 | 29 => Packet::enhancement(raw),
            27 => {
                let (dc, _) = hamming8_decode(raw[2]);
                if dc < 4 {
                    let mut links = [PageLink { magazine: 0, page: 0, subpage: 0 }; 6];
                    for (n, link) in links.iter_mut().enumerate() {
                        let at = 3 + 6 * n;
                        *link = PageLink::from_bytes(&raw[at..at + 6], mrag.magazine);
                    }
                    let (link_control, _) = hamming8_decode(raw[39]);
                    let checksum = (u16::from(raw[40]) << 8) | u16::from(raw[41]);
                    PacketData::Fastext { dc, links, link_control, checksum }
                }
                else {
                    Packet::enhancement(raw)
                }
            }
            30 if mrag.magazine == 8 => {
                let (dc, _) = hamming8_decode(raw[2]);
                let mut displayable = [0u8; 20];
                displayable.copy_from_slice(&raw[22..42]);
                PacketData::Broadcast {
                    dc,
                    initial_page: PageLink::from_bytes(&raw[3..9], 0),
                    displayable,
                }
            }
            30 => {
                let (dc, _) = hamming8_decode(raw[2]);
                PacketData::Idl { dc }
            }
            _ => PacketData::Raw,
        }
    }

    fn enhancement(raw: &[u8; PACKET_LEN]) -> PacketData {
        let (dc, _) = hamming8_decode(raw[2]);
        let mut triplets = [0u32; 13];
        for (n, triplet) in triplets.iter_mut().enumerate() {
            let at = 3 + 3 * n;
            *triplet =
                u32::from(raw[at]) | (u32::from(raw[at + 1]) << 8) | (u32::from(raw[at + 2]) << 16);
        }
        PacketData::Enhancement { dc, triplets }
    }

    pub fn mrag(&self) -> Mrag {
        self.mrag
    }

    pub fn data(&self) -> &PacketData {
        &self.data
    }

    /// The packet's position in the input stream, when known.
    pub fn ordinal(&self) -> Option<u64> {
        self.ordinal
    }

    pub fn set_ordinal(&mut self, ordinal: Option<u64>) {
        self.ordinal = ordinal;
    }

    /// The raw 42 bytes the packet was decoded from.
    pub fn raw(&self) -> &[u8; PACKET_LEN] {
        &self.raw
    }

    /// The designation code of variants that carry one.
    pub fn dc(&self) -> Option<u8> {
        match self.data {
            PacketData::Fastext { dc, .. }
            | PacketData::Enhancement { dc, .. }
            | PacketData::Broadcast { dc, .. }
            | PacketData::Idl { dc } => Some(dc),
            _ => None,
        }
    }

    /// The page number string of a header packet, e.g. `"100"`.
    pub fn page_str(&self) -> Option<String> {
        match self.data {
            PacketData::Header { header, .. } => {
                Some(format!("{}{:02x}", self.mrag.magazine, header.page))
            }
            _ => None,
        }
    }

    /// The subpage number string of a header packet, e.g. `"3f7f"`.
    pub fn subpage_str(&self) -> Option<String> {
        match self.data {
            PacketData::Header { header, .. } => Some(format!("{:04x}", header.subpage)),
            _ => None,
        }
    }

    /// Decode the 13 enhancement triplets of this packet, if it has any.
    pub fn to_triplets(&self) -> Option<[(u32, HammingStatus); 13]> {
        match self.data {
            PacketData::Enhancement { triplets, .. } => {
                let mut decoded = [(0u32, HammingStatus::NoError); 13];
                for (out, &code) in decoded.iter_mut().zip(triplets.iter()) {
                    *out = hamming24_decode(code);
                }
                Some(decoded)
            }
            _ => None,
        }
    }

    /// Re-emit the packet as 42 bytes.
    ///
    /// Fields the variant decodes are re-encoded; all other bytes are preserved from the buffer
    /// the packet was built from.
    pub fn to_bytes(&self) -> [u8; PACKET_LEN] {
        let mut bytes = self.raw;
        bytes[..2].copy_from_slice(&self.mrag.to_bytes());

        match self.data {
            PacketData::Header { header, displayable } => {
                bytes[2..10].copy_from_slice(&header.to_bytes());
                bytes[10..42].copy_from_slice(&displayable);
            }
            PacketData::Display(displayable) => {
                bytes[2..42].copy_from_slice(&displayable);
            }
            PacketData::Fastext { dc, links, link_control, checksum } => {
                bytes[2] = hamming8_encode(dc);
                for (n, link) in links.iter().enumerate() {
                    let at = 3 + 6 * n;
                    bytes[at..at + 6].copy_from_slice(&link.to_bytes(self.mrag.magazine));
                }
                bytes[39] = hamming8_encode(link_control);
                bytes[40] = (checksum >> 8) as u8;
                bytes[41] = (checksum & 0xFF) as u8;
            }
            PacketData::Enhancement { dc, triplets } => {
                bytes[2] = hamming8_encode(dc);
                for (n, &triplet) in triplets.iter().enumerate() {
                    let at = 3 + 3 * n;
                    bytes[at] = (triplet & 0xFF) as u8;
                    bytes[at + 1] = ((triplet >> 8) & 0xFF) as u8;
                    bytes[at + 2] = ((triplet >> 16) & 0xFF) as u8;
                }
            }
            PacketData::Broadcast { dc, initial_page, displayable } => {
                bytes[2] = hamming8_encode(dc);
                bytes[3..9].copy_from_slice(&initial_page.to_bytes(0));
                bytes[22..42].copy_from_slice(&displayable);
            }
            PacketData::Idl { .. } | PacketData::Raw => (),
        }

        bytes
    }

    /// Render the packet as one line of text for a terminal.
    ///
    /// This is the minimal rendering hook consumed by the `ansi` output sink; full-fidelity
    /// rendering (colour attributes, mosaics) belongs to an external renderer.
    pub fn to_ansi(&self, colour: bool) -> String {
        let body = match self.data {
            PacketData::Header { header, ref displayable } => {
                format!("   P{}{:02x} {}", self.mrag.magazine, header.page, printable(displayable))
            }
            PacketData::Display(ref displayable) => printable(displayable),
            PacketData::Fastext { ref links, .. } => {
                links.iter().map(|l| l.to_string()).collect::<Vec<_>>().join(" ")
            }
            PacketData::Enhancement { dc, .. } => {
                format!("Row={} DC={}", self.mrag.row, dc)
            }
            PacketData::Broadcast { dc, ref displayable, .. } => {
                format!("DC={} {}", dc, printable(displayable))
            }
            PacketData::Idl { dc } => format!("IDL {} DC={}", self.mrag, dc),
            PacketData::Raw => self.mrag.to_string(),
        };

        if colour {
            format!("\x1b[37m\x1b[40m{}\x1b[0m", body)
        }
        else {
            body
        }
    }
}

/// Strip parity and replace non-printing bytes with spaces.
fn printable(displayable: &[u8]) -> String {
    displayable
        .iter()
        .map(|&b| match parity_decode(b) {
            c @ 0x20..=0x7E => char::from(c),
            _ => ' ',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coding::parity_encode;

    fn canonical_header() -> [u8; PACKET_LEN] {
        let mut bytes = [0u8; PACKET_LEN];
        bytes[..2].copy_from_slice(&Mrag::new(1, 0).to_bytes());
        let header = PageHeader { page: 0x00, subpage: 0x3F7F, control: 0x15 };
        bytes[2..10].copy_from_slice(&header.to_bytes());
        for b in bytes[10..42].iter_mut() {
            *b = parity_encode(b' ');
        }
        bytes
    }

    #[test]
    fn verify_mrag_round_trip() {
        for magazine in 1..=8 {
            for row in 0..32 {
                let mrag = Mrag::new(magazine, row);
                let (decoded, status) = Mrag::from_bytes(mrag.to_bytes());
                assert_eq!(decoded, mrag);
                assert_eq!(status, HammingStatus::NoError);
            }
        }
    }

    #[test]
    fn verify_header_decode() {
        let packet = Packet::from_bytes(&canonical_header(), Some(7)).unwrap();
        assert_eq!(packet.mrag(), Mrag::new(1, 0));
        assert_eq!(packet.page_str().unwrap(), "100");
        assert_eq!(packet.subpage_str().unwrap(), "3f7f");
        assert_eq!(packet.ordinal(), Some(7));

        match packet.data() {
            PacketData::Header { header, .. } => {
                assert_eq!(header.control, 0x15);
            }
            other => panic!("expected header, got {:?}", other),
        }
    }

    #[test]
    fn verify_length_check() {
        assert!(Packet::from_bytes(&[0u8; 41], None).is_err());
        assert!(Packet::from_bytes(&[0u8; 43], None).is_err());
    }

    #[test]
    fn verify_header_round_trip() {
        let bytes = canonical_header();
        let packet = Packet::from_bytes(&bytes, None).unwrap();
        assert_eq!(packet.to_bytes(), bytes);
    }

    #[test]
    fn verify_display_round_trip() {
        let mut bytes = [0u8; PACKET_LEN];
        bytes[..2].copy_from_slice(&Mrag::new(3, 12).to_bytes());
        for (n, b) in bytes[2..42].iter_mut().enumerate() {
            *b = parity_encode(b'A' + (n as u8 % 26));
        }

        let packet = Packet::from_bytes(&bytes, None).unwrap();
        assert!(matches!(packet.data(), PacketData::Display(_)));
        assert_eq!(packet.to_bytes(), bytes);
    }

    #[test]
    fn verify_fastext_round_trip() {
        let mut bytes = [0u8; PACKET_LEN];
        bytes[..2].copy_from_slice(&Mrag::new(2, 27).to_bytes());
        bytes[2] = hamming8_encode(0);
        let link = PageLink { magazine: 5, page: 0x2F, subpage: 0x3F7F };
        for n in 0..6 {
            bytes[3 + 6 * n..9 + 6 * n].copy_from_slice(&link.to_bytes(2));
        }
        bytes[39] = hamming8_encode(0xF);
        bytes[40] = 0x12;
        bytes[41] = 0x34;

        let packet = Packet::from_bytes(&bytes, None).unwrap();
        match packet.data() {
            PacketData::Fastext { dc, links, link_control, checksum } => {
                assert_eq!(*dc, 0);
                assert_eq!(links[0], link);
                assert_eq!(*link_control, 0xF);
                assert_eq!(*checksum, 0x1234);
            }
            other => panic!("expected fastext, got {:?}", other),
        }
        assert_eq!(packet.to_bytes(), bytes);
    }

    #[test]
    fn verify_row27_dc_split() {
        let mut bytes = [0u8; PACKET_LEN];
        bytes[..2].copy_from_slice(&Mrag::new(2, 27).to_bytes());
        bytes[2] = hamming8_encode(4);
        let packet = Packet::from_bytes(&bytes, None).unwrap();
        assert!(matches!(packet.data(), PacketData::Enhancement { dc: 4, .. }));
    }

    #[test]
    fn verify_enhancement_round_trip() {
        use crate::coding::hamming24_encode;

        let mut bytes = [0u8; PACKET_LEN];
        bytes[..2].copy_from_slice(&Mrag::new(4, 26).to_bytes());
        bytes[2] = hamming8_encode(2);
        for n in 0..13u32 {
            let code = hamming24_encode(n * 0x1111);
            let at = 3 + 3 * n as usize;
            bytes[at] = (code & 0xFF) as u8;
            bytes[at + 1] = ((code >> 8) & 0xFF) as u8;
            bytes[at + 2] = ((code >> 16) & 0xFF) as u8;
        }

        let packet = Packet::from_bytes(&bytes, None).unwrap();
        let triplets = packet.to_triplets().unwrap();
        for (n, &(value, status)) in triplets.iter().enumerate() {
            assert_eq!(value, n as u32 * 0x1111);
            assert_eq!(status, HammingStatus::NoError);
        }
        assert_eq!(packet.to_bytes(), bytes);
    }

    #[test]
    fn verify_broadcast_and_idl() {
        let mut bytes = [0u8; PACKET_LEN];
        bytes[..2].copy_from_slice(&Mrag::new(8, 30).to_bytes());
        bytes[2] = hamming8_encode(0);
        bytes[3..9].copy_from_slice(&PageLink { magazine: 1, page: 0, subpage: 0 }.to_bytes(0));
        for b in bytes[22..42].iter_mut() {
            *b = parity_encode(b' ');
        }
        let packet = Packet::from_bytes(&bytes, None).unwrap();
        assert!(matches!(packet.data(), PacketData::Broadcast { dc: 0, .. }));
        assert_eq!(packet.to_bytes(), bytes);

        bytes[..2].copy_from_slice(&Mrag::new(4, 30).to_bytes());
        let packet = Packet::from_bytes(&bytes, None).unwrap();
        assert!(matches!(packet.data(), PacketData::Idl { .. }));
    }

    #[test]
    fn verify_uncorrectable_mrag_is_raw() {
        let mut bytes = canonical_header();
        // Two bit errors in one MRAG byte cannot be corrected.
        bytes[0] ^= 0x03;
        let packet = Packet::from_bytes(&bytes, None).unwrap();
        assert!(matches!(packet.data(), PacketData::Raw));
    }
}
