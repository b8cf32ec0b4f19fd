//! Record files decoded through the public API, the way an offline viewer would.

use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};

use floatlink::{decode, decode_with_report, load_capture, StreamDecoder, HEADER_MARKER};
use proptest::prelude::*;

fn temp_record(tag: &str) -> PathBuf {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("floatlink-it-{}-{}-{}", tag, process::id(), n))
}

fn packet(values: &[f32]) -> Vec<u8> {
    let mut bytes = HEADER_MARKER.to_vec();
    for value in values {
        bytes.extend_from_slice(&value.to_be_bytes());
    }
    bytes
}

#[test]
fn single_packet_record() {
    let path = temp_record("single");
    let mut bytes = packet(&[1.5]);
    bytes.extend_from_slice(&HEADER_MARKER);
    fs::write(&path, &bytes).unwrap();

    assert_eq!(load_capture(&path).unwrap(), vec![1.5]);
    fs::remove_file(&path).unwrap();
}

#[test]
fn record_matches_live_decoding() {
    let path = temp_record("live");
    // starts mid-packet, like a capture begun while the device was already streaming
    let mut bytes = vec![0x12, 0x34, 0x3F, 0x80, 0x00, 0x00];
    bytes.extend(packet(&[0.25, -8.0, 100.0]));
    bytes.extend(packet(&[3.0]));
    bytes.extend_from_slice(&[0x40, 0x00]);
    fs::write(&path, &bytes).unwrap();

    let from_file = load_capture(&path).unwrap();
    assert_eq!(from_file, decode(&bytes));
    assert_eq!(from_file, vec![1.0, 0.25, -8.0, 100.0, 3.0]);
    fs::remove_file(&path).unwrap();
}

#[test]
fn stray_bytes_decode_to_nothing() {
    let path = temp_record("stray");
    fs::write(&path, [0x01, 0x02, 0x03]).unwrap();

    assert!(load_capture(&path).unwrap().is_empty());
    let (_, report) = decode_with_report(&[0x01, 0x02, 0x03]);
    assert_eq!(report.dropped_bytes, 3);
    fs::remove_file(&path).unwrap();
}

#[test]
fn missing_record_is_an_error() {
    let path = temp_record("missing");
    assert!(load_capture(&path).is_err());
}

#[test]
fn stream_decoder_recovers_what_chunked_decoding_loses() {
    let bytes = packet(&[1.0, 2.0, 3.0, 4.0]);
    let (head, tail) = bytes.split_at(10);

    let mut chunked = decode(head);
    chunked.extend(decode(tail));
    // the second read has no marker, so it is decoded out of alignment
    assert_eq!(chunked.len(), 3);
    assert_eq!(chunked[0], 1.0);
    assert_ne!(chunked[1..], [2.0, 3.0]);

    let mut stream = StreamDecoder::new();
    let mut carried = stream.push(head);
    carried.extend(stream.push(tail));
    assert_eq!(carried, vec![1.0, 2.0, 3.0, 4.0]);
    assert!(stream.residual().is_empty());
}

fn bits(samples: &[f32]) -> Vec<u32> {
    samples.iter().map(|s| s.to_bits()).collect()
}

proptest! {
    #[test]
    fn prop_record_file_decodes_like_memory(
        bytes in prop::collection::vec(prop_oneof![3 => any::<u8>(), 1 => Just(0xFFu8)], 0..256)
    ) {
        let path = temp_record("prop");
        fs::write(&path, &bytes).unwrap();
        let from_file = load_capture(&path);
        fs::remove_file(&path).unwrap();

        prop_assert_eq!(bits(&from_file.unwrap()), bits(&decode(&bytes)));
    }
}
