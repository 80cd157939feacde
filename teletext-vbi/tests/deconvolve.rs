// teletext-rs
// Copyright (c) 2026 The teletext-rs Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end deconvolution tests over synthesised VBI lines.

use std::io::Cursor;
use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use teletext_core::coding::parity_encode;
use teletext_core::io::{Chunker, ChunkerOptions};
use teletext_core::packet::{Mrag, PacketData, PageHeader, PACKET_LEN};
use teletext_core::pipeline::{row_squash, MagRowFilter};
use teletext_vbi::config::{SampleFormat, VbiConfig};
use teletext_vbi::deconvolve::{Deconvolver, LineResult};
use teletext_vbi::driver::{drive, DecodeMode, DriverOptions, SpeedMonitor};

/// Sample offset at which the synthesised clock run-in begins.
const CRI_START: usize = 100;
const LOW: f32 = 8.0;
const HIGH: f32 = 230.0;

/// The canonical header packet used throughout: magazine `mag`, page 00, blank display.
fn header_bytes(mag: u8) -> [u8; PACKET_LEN] {
    let mut bytes = [0u8; PACKET_LEN];
    bytes[..2].copy_from_slice(&Mrag::new(mag, 0).to_bytes());
    bytes[2..10]
        .copy_from_slice(&PageHeader { page: 0x00, subpage: 0, control: 0 }.to_bytes());
    for b in bytes[10..42].iter_mut() {
        *b = parity_encode(b' ');
    }
    bytes
}

/// The 360 transmitted bit levels: clock run-in, framing code, then the packet bytes least
/// significant bit first.
fn line_bits(bytes: &[u8; PACKET_LEN]) -> Vec<bool> {
    let mut bits = Vec::with_capacity(360);
    for i in 0..16 {
        bits.push(i % 2 == 0);
    }
    for &fc in &[true, true, true, false, false, true, false, false] {
        bits.push(fc);
    }
    for &b in bytes.iter() {
        for bit in 0..8 {
            bits.push((b >> bit) & 1 == 1);
        }
    }
    bits
}

/// Render a packet as an ideal oversampled VBI record for the given configuration.
fn synth_record(config: &VbiConfig, bytes: &[u8; PACKET_LEN]) -> Vec<u8> {
    let bits = line_bits(bytes);
    let bit_width = config.bit_width();
    let samples = config.samples_per_record();

    let mut levels = vec![LOW; samples];
    for (s, level) in levels.iter_mut().enumerate() {
        if s >= CRI_START {
            let t = ((s - CRI_START) as f64 / bit_width) as usize;
            if t < bits.len() && bits[t] {
                *level = HIGH;
            }
        }
    }

    let mut record = Vec::with_capacity(config.line_length);
    for &level in &levels {
        match config.sample_format {
            SampleFormat::U8 => record.push(level as u8),
            SampleFormat::U16Le => {
                record.extend_from_slice(&(((level as u16) << 8).to_le_bytes()))
            }
        }
    }
    record
}

fn deconvolver() -> Deconvolver {
    Deconvolver::new(VbiConfig::bt8x8_pal(), 0)
}

#[test]
fn recovers_header_packet() {
    let bytes = header_bytes(1);
    let record = synth_record(&VbiConfig::bt8x8_pal(), &bytes);

    let result = deconvolver().deconvolve(0, &record, &MagRowFilter::all()).unwrap();
    match result {
        LineResult::Packet(packet) => {
            assert_eq!(packet.page_str().unwrap(), "100");
            assert_eq!(packet.ordinal(), Some(0));
            assert!(matches!(packet.data(), PacketData::Header { .. }));
            assert_eq!(&packet.to_bytes(), &bytes);
        }
        other => panic!("expected a packet, got {:?}", other),
    }
}

#[test]
fn recovers_display_packet() {
    let mut bytes = [0u8; PACKET_LEN];
    bytes[..2].copy_from_slice(&Mrag::new(3, 7).to_bytes());
    for (n, b) in bytes[2..42].iter_mut().enumerate() {
        *b = parity_encode(b'A' + (n % 26) as u8);
    }
    let record = synth_record(&VbiConfig::bt8x8_pal(), &bytes);

    let result = deconvolver().deconvolve(5, &record, &MagRowFilter::all()).unwrap();
    match result {
        LineResult::Packet(packet) => {
            assert_eq!(packet.mrag(), Mrag::new(3, 7));
            assert_eq!(&packet.to_bytes(), &bytes);
        }
        other => panic!("expected a packet, got {:?}", other),
    }
}

#[test]
fn recovers_sixteen_bit_line() {
    let config = VbiConfig::ddd_pal();
    let bytes = header_bytes(2);
    let record = synth_record(&config, &bytes);

    let result =
        Deconvolver::new(config, 0).deconvolve(0, &record, &MagRowFilter::all()).unwrap();
    match result {
        LineResult::Packet(packet) => assert_eq!(packet.page_str().unwrap(), "200"),
        other => panic!("expected a packet, got {:?}", other),
    }
}

#[test]
fn slice_decoder_recovers_packet() {
    let bytes = header_bytes(1);
    let record = synth_record(&VbiConfig::bt8x8_pal(), &bytes);

    let result = deconvolver().slice(0, &record, &MagRowFilter::all()).unwrap();
    match result {
        LineResult::Packet(packet) => assert_eq!(&packet.to_bytes(), &bytes),
        other => panic!("expected a packet, got {:?}", other),
    }
}

#[test]
fn rejects_uniform_noise() {
    let record = vec![40u8; 2048];
    let result = deconvolver().deconvolve(0, &record, &MagRowFilter::all()).unwrap();
    match result {
        LineResult::Rejected(reason) => assert_eq!(reason, "Signal max is 40"),
        other => panic!("expected a rejection, got {:?}", other),
    }
}

#[test]
fn filters_unselected_magazines() {
    let record = synth_record(&VbiConfig::bt8x8_pal(), &header_bytes(2));
    let filter = MagRowFilter::new(&[1], &[]);

    let result = deconvolver().deconvolve(0, &record, &filter).unwrap();
    assert!(matches!(result, LineResult::Filtered));
}

#[test]
fn detector_flips_once_under_rising_noise() {
    let config = VbiConfig::bt8x8_pal();
    let base = synth_record(&config, &header_bytes(1));
    let decon = deconvolver();

    let mut rng = SmallRng::seed_from_u64(0x7e1e);
    let noise: Vec<f32> = (0..base.len()).map(|_| rng.random_range(-1.0..1.0)).collect();

    let mut rejected_at = None;
    for k in (0..=300).step_by(15) {
        let record: Vec<u8> = base
            .iter()
            .zip(noise.iter())
            .map(|(&b, &n)| (f32::from(b) + k as f32 * n).clamp(0.0, 255.0) as u8)
            .collect();

        let accepted = matches!(
            decon.deconvolve(0, &record, &MagRowFilter::all()).unwrap(),
            LineResult::Packet(_) | LineResult::Filtered
        );

        match (accepted, rejected_at) {
            // Once rejected, the detector must never accept a noisier copy.
            (true, Some(at)) => panic!("accepted at amplitude {} after rejecting at {}", k, at),
            (false, None) => rejected_at = Some(k),
            _ => (),
        }
    }

    assert!(rejected_at.is_some(), "noise never high enough to reject");
}

/// Concatenate synthesised records for the given packets into one stream.
fn stream_of(packets: &[[u8; PACKET_LEN]]) -> Box<Cursor<Vec<u8>>> {
    let config = VbiConfig::bt8x8_pal();
    let mut bytes = Vec::new();
    for packet in packets {
        bytes.extend_from_slice(&synth_record(&config, packet));
    }
    Box::new(Cursor::new(bytes))
}

#[test]
fn empty_input_yields_nothing() {
    let chunker =
        Chunker::new(Box::new(Cursor::new(Vec::new())), 2048, ChunkerOptions::default()).unwrap();
    let stream = drive(
        chunker,
        Arc::new(deconvolver()),
        MagRowFilter::all(),
        DriverOptions::default(),
    );
    assert_eq!(stream.count(), 0);
}

#[test]
fn driver_preserves_order_across_workers() {
    let lines: Vec<[u8; PACKET_LEN]> =
        (0..10).map(|n| header_bytes(1 + (n % 8) as u8)).collect();
    let chunker = Chunker::new(stream_of(&lines), 2048, ChunkerOptions::default()).unwrap();

    let options =
        DriverOptions { threads: 3, chunk_size: 2, ordered: true, mode: DecodeMode::Deconvolve };
    let stream = drive(chunker, Arc::new(deconvolver()), MagRowFilter::all(), options);

    let ordinals: Vec<u64> = stream.map(|r| r.unwrap().0).collect();
    assert_eq!(ordinals, (0..10).collect::<Vec<u64>>());
}

#[test]
fn driver_unordered_delivers_everything() {
    let lines: Vec<[u8; PACKET_LEN]> = (0..10).map(|_| header_bytes(1)).collect();
    let chunker = Chunker::new(stream_of(&lines), 2048, ChunkerOptions::default()).unwrap();

    let options =
        DriverOptions { threads: 3, chunk_size: 2, ordered: false, mode: DecodeMode::Deconvolve };
    let stream = drive(chunker, Arc::new(deconvolver()), MagRowFilter::all(), options);

    let mut ordinals: Vec<u64> = stream.map(|r| r.unwrap().0).collect();
    ordinals.sort_unstable();
    assert_eq!(ordinals, (0..10).collect::<Vec<u64>>());
}

#[test]
fn magazine_filter_keeps_input_order() {
    // Two magazines interleaved; only magazine 1 selected.
    let lines: Vec<[u8; PACKET_LEN]> =
        (0..8).map(|n| header_bytes(if n % 2 == 0 { 1 } else { 2 })).collect();
    let chunker = Chunker::new(stream_of(&lines), 2048, ChunkerOptions::default()).unwrap();

    let options = DriverOptions { threads: 2, ..Default::default() };
    let stream = drive(chunker, Arc::new(deconvolver()), MagRowFilter::new(&[1], &[]), options);

    let mut monitor = SpeedMonitor::new(Some(8));
    let mut packets = Vec::new();
    for item in stream {
        let (_, result) = item.unwrap();
        monitor.tally(&result);
        if let LineResult::Packet(packet) = result {
            packets.push(packet);
        }
    }

    assert_eq!(packets.len(), 4);
    assert!(packets.iter().all(|p| p.mrag().magazine == 1));
    let ordinals: Vec<u64> = packets.iter().map(|p| p.ordinal().unwrap()).collect();
    assert_eq!(ordinals, vec![0, 2, 4, 6]);
    assert_eq!(monitor.total(), 8);
    assert_eq!(monitor.teletext(), 4);
}

#[test]
fn squash_reduces_repeated_lines() {
    // The same line five times, squashed in threes, comes out as two canonical packets.
    let bytes = header_bytes(1);
    let lines = vec![bytes; 5];
    let chunker = Chunker::new(stream_of(&lines), 2048, ChunkerOptions::default()).unwrap();

    let stream = drive(
        chunker,
        Arc::new(deconvolver()),
        MagRowFilter::all(),
        DriverOptions::default(),
    );

    let packets = stream.filter_map(|item| match item.unwrap() {
        (_, LineResult::Packet(packet)) => Some(packet),
        _ => None,
    });

    let squashed: Vec<_> = row_squash(packets, 3).collect();
    assert_eq!(squashed.len(), 2);
    assert_eq!(squashed[0].ordinal(), Some(0));
    assert_eq!(squashed[1].ordinal(), Some(3));
    for packet in &squashed {
        assert_eq!(&packet.to_bytes(), &bytes);
    }
}
