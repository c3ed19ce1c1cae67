// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{io::Cursor, sync::Arc};

use super::*;
use crate::{assemble::AssemblerStats, tests::*};

fn header(bits: SampleBits) -> PacketHeader {
    PacketHeader {
        board: 3,
        payload_error: false,
        sample_bits: bits,
        num_beamlets: 2,
        timestamp: 0x0102_0304_0506_0708,
    }
}

#[test]
fn test_header_layout() {
    let mut h = header(SampleBits::Eight);
    h.payload_error = true;
    let mut buf = vec![];
    h.write(&mut buf);
    assert_eq!(
        buf,
        [3, 3 | 0x40, 1, 2, 16, 0, 0, 0, 8, 7, 6, 5, 4, 3, 2, 1]
    );
    assert_eq!(PacketHeader::parse(&buf).unwrap(), h);
}

#[test]
fn test_header_checks() {
    let mut buf = vec![];
    header(SampleBits::Sixteen).write(&mut buf);

    let mut bad = buf.clone();
    bad[0] = 2;
    assert!(matches!(PacketHeader::parse(&bad), Err(PacketError::BadVersion(2))));

    let mut bad = buf.clone();
    bad[4] = 8;
    assert!(matches!(
        PacketHeader::parse(&bad),
        Err(PacketError::BadSamplesPerBeamlet(8))
    ));

    let mut bad = buf.clone();
    bad[2] = 3;
    assert!(matches!(PacketHeader::parse(&bad), Err(PacketError::BadBitMode(3))));

    assert!(matches!(
        PacketHeader::parse(&buf[..10]),
        Err(PacketError::TooShort(10))
    ));
}

#[test]
fn test_16_bit_payload() {
    let p = test_packet(1, 3, 4096);
    let bytes = p.encode();
    assert_eq!(bytes.len(), PACKET_HEADER_SIZE + 3 * 16 * 2 * 4);
    // The first sample is beamlet 0, time 0, pol X.
    assert_eq!(&bytes[16..20], &[0x00, 0x10, 100, 0]);
    assert_eq!(Packet::decode(&bytes).unwrap(), p);
}

#[test]
fn test_4_bit_nibbles_are_sign_extended() {
    let mut p = Packet::new(header(SampleBits::Four));
    p.samples[(0, 0, 0)] = Complex::new(-8, 7);
    p.samples[(0, 0, 1)] = Complex::new(-1, -3);
    p.samples[(1, 15, 1)] = Complex::new(5, 0);
    let bytes = p.encode();
    assert_eq!(bytes.len(), PACKET_HEADER_SIZE + 2 * 16 * 2);
    // Real in the low nibble, imaginary in the high nibble.
    assert_eq!(bytes[16], 0x78);
    assert_eq!(bytes[17], 0xdf);
    assert_eq!(Packet::decode(&bytes).unwrap(), p);
}

#[test]
fn test_8_bit_payload() {
    let mut p = Packet::new(header(SampleBits::Eight));
    p.samples[(1, 2, 0)] = Complex::new(-128, 127);
    let bytes = p.encode();
    let decoded = Packet::decode(&bytes).unwrap();
    assert_eq!(decoded.samples[(1, 2, 0)], Complex::new(-128, 127));
    assert_eq!(decoded, p);
}

#[test]
fn test_payload_size_is_checked() {
    let p = test_packet(0, 2, 0);
    let mut bytes = p.encode();
    bytes.pop();
    assert!(matches!(
        Packet::decode(&bytes),
        Err(PacketError::PayloadSize { .. })
    ));
}

#[test]
fn test_decode_into_reuses_and_resizes() {
    let mut p = test_packet(0, 2, 0);
    let other = test_packet(0, 4, 32);
    p.decode_into(&other.encode()).unwrap();
    assert_eq!(p, other);
    assert_eq!(p.begin(), 32);
    assert_eq!(p.end(), 48);
}

fn reader(board: usize, source: Box<dyn PacketSource>) -> (PacketReader, Arc<AssemblerStats>) {
    let stats = Arc::new(AssemblerStats::default());
    (
        PacketReader::new(board, SampleBits::Sixteen, 4, source, stats.clone()),
        stats,
    )
}

#[test]
fn test_reader_skips_bad_packets() {
    let good = test_packet(1, 2, 0);
    let mut flagged = test_packet(1, 2, 16);
    flagged.header.payload_error = true;
    let wrong_board = test_packet(2, 2, 32);
    let too_many_beamlets = test_packet(1, 5, 48);
    let mut eight_bit = test_packet(1, 2, 64);
    eight_bit.header.sample_bits = SampleBits::Eight;
    let last = test_packet(1, 2, 80);

    let mut source = VecSource::new([&good, &flagged, &wrong_board, &too_many_beamlets]);
    source.push_bytes(vec![1, 2, 3]);
    source.push_bytes(eight_bit.encode());
    source.push_bytes(last.encode());
    let (mut reader, stats) = reader(1, Box::new(source));

    assert_eq!(reader.read().unwrap(), Some(good));
    assert_eq!(reader.read().unwrap(), Some(last));
    assert_eq!(reader.read().unwrap(), None);

    let counts = stats.counts();
    assert_eq!(counts.packets_received, 7);
    assert_eq!(counts.payload_errors, 1);
    assert_eq!(counts.invalid_packets, 4);
}

#[test]
fn test_reader_source_frames_a_byte_stream() {
    let packets = test_packets(0, 3, 0, 64);
    let bytes: Vec<u8> = packets.iter().flat_map(Packet::encode).collect();
    let (mut reader, _) = reader(0, Box::new(ReaderSource::new(Cursor::new(bytes))));
    for p in &packets {
        assert_eq!(reader.read().unwrap().as_ref(), Some(p));
    }
    assert_eq!(reader.read().unwrap(), None);
}

#[test]
fn test_reader_source_truncated_stream_is_an_error() {
    let mut bytes = test_packet(0, 1, 0).encode();
    bytes.truncate(40);
    let (mut reader, _) = reader(0, Box::new(ReaderSource::new(Cursor::new(bytes))));
    assert!(matches!(reader.read(), Err(PacketError::Io(_))));
}

#[test]
fn test_stalled_source_times_out() {
    let source = VecSource::new(&[test_packet(0, 1, 0)]).stall_at_end();
    let (mut reader, _) = reader(0, Box::new(source));
    assert!(reader.read().unwrap().is_some());
    assert!(matches!(reader.read(), Err(PacketError::TimedOut)));
    assert!(!PacketError::TimedOut.is_invalid_packet());
}

#[test]
fn test_udp_source() {
    let source = UdpSource::bind("127.0.0.1:0").unwrap();
    let addr = source.local_addr().unwrap();
    let (mut reader, _) = reader(0, Box::new(source));

    // Nothing sent yet.
    assert!(matches!(reader.read(), Err(PacketError::TimedOut)));

    let p = test_packet(0, 2, 160);
    let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    sender.send_to(&p.encode(), addr).unwrap();
    assert_eq!(reader.read().unwrap(), Some(p));
}

#[test]
fn test_open_source() {
    assert!(matches!(
        open_source("tcp:127.0.0.1:1234"),
        Err(PacketError::UnknownSource(_))
    ));
    assert!(matches!(
        open_source("file:/does/not/exist.raw"),
        Err(PacketError::Io(_))
    ));

    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut file, &test_packet(0, 1, 0).encode()).unwrap();
    let (mut reader, _) = reader(
        0,
        open_source(&format!("file:{}", file.path().display())).unwrap(),
    );
    assert!(reader.read().unwrap().is_some());
    assert_eq!(reader.read().unwrap(), None);
}
