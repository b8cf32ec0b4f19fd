//! Frame decoding for the float sample stream.
//!
//! The device sends variable-length packets of IEEE-754 `f32` samples, most significant
//! byte first, each preceded by the header marker `FF FF FF FF`. The marker is a plain
//! delimiter: it is neither escaped nor length-prefixed, so a payload that happens to
//! contain four consecutive `0xFF` bytes is split there as if a header had arrived.
//!
//! [`decode`] is stateless. Partial samples at the edges of a chunk are dropped, which
//! loses any float straddling two reads. [`StreamDecoder`] wraps the same rules with a
//! residual buffer for callers that need exact reconstruction across reads.

use log::debug;

/// Packet delimiter sent by the device before every packet.
pub const HEADER_MARKER: [u8; 4] = [0xFF; 4];

/// Width in bytes of one encoded sample.
pub const SAMPLE_SIZE: usize = 4;

/// Informational summary of what decoding had to drop.
///
/// Malformed input never fails decoding; this is what gets logged instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeReport {
    /// Header markers found in the input.
    pub markers: usize,
    /// Packets that contributed at least one sample.
    pub packets: usize,
    /// Non-empty spans that were too short to hold a sample after trimming.
    pub discarded_spans: usize,
    /// Bytes dropped by edge trimming.
    pub dropped_bytes: usize,
}

impl DecodeReport {
    /// True when no byte of the input was dropped.
    pub fn is_clean(&self) -> bool {
        self.dropped_bytes == 0
    }
}

/// Decode a raw chunk into samples.
///
/// Malformed bytes are dropped, never substituted, so the output never holds more than
/// `raw.len() / 4` samples.
pub fn decode(raw: &[u8]) -> Vec<f32> {
    decode_with_report(raw).0
}

/// Decode a raw chunk and report what was dropped along the way.
pub fn decode_with_report(raw: &[u8]) -> (Vec<f32>, DecodeReport) {
    let spans = split_packets(raw);
    let has_marker = spans.len() > 1;
    let mut report = DecodeReport {
        markers: spans.len() - 1,
        ..DecodeReport::default()
    };
    let mut samples = Vec::with_capacity(raw.len() / SAMPLE_SIZE);

    for (i, span) in spans.into_iter().enumerate() {
        let original_len = span.len();
        // Bytes before the first marker belong to a packet whose start was never seen,
        // so keep the tail nearest the header.
        let span = if has_marker && i == 0 {
            trim_front(span, &mut report)
        } else {
            span
        };
        let span = trim_back(span, &mut report);
        push_samples(span, original_len, &mut samples, &mut report);
    }

    if !report.is_clean() {
        debug!(
            "decode anomaly: dropped {} of {} bytes ({} markers, {} short spans)",
            report.dropped_bytes,
            raw.len(),
            report.markers,
            report.discarded_spans
        );
    }

    (samples, report)
}

/// Split on every non-overlapping occurrence of [`HEADER_MARKER`], scanning left to right.
///
/// Always yields at least one (possibly empty) span.
fn split_packets(raw: &[u8]) -> Vec<&[u8]> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + HEADER_MARKER.len() <= raw.len() {
        if raw[i..i + HEADER_MARKER.len()] == HEADER_MARKER {
            spans.push(&raw[start..i]);
            i += HEADER_MARKER.len();
            start = i;
        } else {
            i += 1;
        }
    }
    spans.push(&raw[start..]);
    spans
}

fn trim_front<'a>(span: &'a [u8], report: &mut DecodeReport) -> &'a [u8] {
    let excess = span.len() % SAMPLE_SIZE;
    report.dropped_bytes += excess;
    &span[excess..]
}

fn trim_back<'a>(span: &'a [u8], report: &mut DecodeReport) -> &'a [u8] {
    let excess = span.len() % SAMPLE_SIZE;
    report.dropped_bytes += excess;
    &span[..span.len() - excess]
}

/// Append every whole sample of an already-trimmed span.
///
/// `original_len` is the span length before trimming, so short leftovers can be counted.
fn push_samples(
    span: &[u8],
    original_len: usize,
    samples: &mut Vec<f32>,
    report: &mut DecodeReport,
) {
    if span.len() < SAMPLE_SIZE {
        if original_len > 0 {
            report.discarded_spans += 1;
        }
        return;
    }
    report.packets += 1;
    samples.extend(
        span.chunks_exact(SAMPLE_SIZE)
            .map(|b| f32::from_be_bytes([b[0], b[1], b[2], b[3]])),
    );
}

/// Stateful decoder that carries partial samples from one read into the next.
///
/// Follows the same framing rules as [`decode`], except that the trailing bytes of the
/// last packet in a chunk (fewer than [`SAMPLE_SIZE`]) are held back and prepended to
/// the next chunk instead of being dropped. Only the very first chunk of a stream is
/// front-trimmed, since later chunks continue a packet whose alignment is already known.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    residual: Vec<u8>,
    started: bool,
    report: DecodeReport,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk of the stream.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<f32> {
        let mut buffer = std::mem::take(&mut self.residual);
        buffer.extend_from_slice(chunk);

        let spans = split_packets(&buffer);
        let last = spans.len() - 1;
        let mut report = DecodeReport {
            markers: last,
            ..DecodeReport::default()
        };
        let mut samples = Vec::with_capacity(buffer.len() / SAMPLE_SIZE);

        for (i, span) in spans.into_iter().enumerate() {
            let original_len = span.len();
            let span = if !self.started && last > 0 && i == 0 {
                trim_front(span, &mut report)
            } else {
                span
            };
            let span = if i == last {
                let keep = span.len() - span.len() % SAMPLE_SIZE;
                self.residual = span[keep..].to_vec();
                &span[..keep]
            } else {
                trim_back(span, &mut report)
            };
            // a held-back tail is not a discarded span
            let original_len = if i == last { span.len() } else { original_len };
            push_samples(span, original_len, &mut samples, &mut report);
        }

        self.started = true;
        self.accumulate(report);
        samples
    }

    /// Bytes currently held back waiting for the rest of their sample.
    pub fn residual(&self) -> &[u8] {
        &self.residual
    }

    /// Totals over every chunk pushed since creation or the last [`reset`](Self::reset).
    pub fn report(&self) -> DecodeReport {
        self.report
    }

    /// Forget any held-back bytes and alignment, returning how many bytes were discarded.
    pub fn reset(&mut self) -> usize {
        let dropped = self.residual.len();
        self.residual.clear();
        self.started = false;
        self.report = DecodeReport::default();
        dropped
    }

    fn accumulate(&mut self, chunk: DecodeReport) {
        self.report.markers += chunk.markers;
        self.report.packets += chunk.packets;
        self.report.discarded_spans += chunk.discarded_spans;
        self.report.dropped_bytes += chunk.dropped_bytes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn be(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_be_bytes()).collect()
    }

    fn framed(packets: &[&[f32]]) -> Vec<u8> {
        let mut out = Vec::new();
        for packet in packets {
            out.extend_from_slice(&HEADER_MARKER);
            out.extend(be(packet));
        }
        out.extend_from_slice(&HEADER_MARKER);
        out
    }

    #[test]
    fn single_framed_sample() {
        let raw = framed(&[&[1.5]]);
        assert_eq!(decode(&raw), vec![1.5]);
    }

    #[test]
    fn empty_input_yields_nothing() {
        let (samples, report) = decode_with_report(&[]);
        assert!(samples.is_empty());
        assert_eq!(report, DecodeReport::default());
    }

    #[test]
    fn stray_bytes_without_marker_yield_nothing() {
        let (samples, report) = decode_with_report(&[0x01, 0x02, 0x03]);
        assert!(samples.is_empty());
        assert_eq!(report.dropped_bytes, 3);
        assert_eq!(report.discarded_spans, 1);
    }

    #[test]
    fn lone_marker_yields_nothing() {
        let (samples, report) = decode_with_report(&HEADER_MARKER);
        assert!(samples.is_empty());
        assert_eq!(report.markers, 1);
        assert_eq!(report.discarded_spans, 0);
        assert!(report.is_clean());
    }

    #[test]
    fn markerless_input_keeps_its_head() {
        let mut raw = be(&[2.0, -4.25]);
        raw.extend_from_slice(&[0x40, 0x49]);
        assert_eq!(decode(&raw), vec![2.0, -4.25]);
    }

    #[test]
    fn leading_partial_is_trimmed_from_the_front() {
        // two stray bytes of a float whose start was never read
        let mut raw = vec![0x12, 0x34];
        raw.extend(be(&[3.0]));
        raw.extend_from_slice(&HEADER_MARKER);
        raw.extend(be(&[7.5]));
        assert_eq!(decode(&raw), vec![3.0, 7.5]);
    }

    #[test]
    fn trailing_partial_is_trimmed_from_the_back() {
        let mut raw = framed(&[&[1.0, 2.0]]);
        raw.extend(be(&[5.0]));
        raw.extend_from_slice(&[0x3F, 0x80, 0x00]);
        assert_eq!(decode(&raw), vec![1.0, 2.0, 5.0]);
    }

    #[test]
    fn interior_packet_with_odd_length_loses_its_tail() {
        let mut raw = HEADER_MARKER.to_vec();
        raw.extend(be(&[9.0]));
        raw.push(0xAA);
        raw.extend_from_slice(&HEADER_MARKER);
        raw.extend(be(&[10.0]));
        raw.extend_from_slice(&HEADER_MARKER);
        let (samples, report) = decode_with_report(&raw);
        assert_eq!(samples, vec![9.0, 10.0]);
        assert_eq!(report.dropped_bytes, 1);
        assert_eq!(report.packets, 2);
    }

    #[test]
    fn packets_concatenate_in_order() {
        let raw = framed(&[&[1.0, 2.0], &[3.0], &[4.0, 5.0, 6.0]]);
        assert_eq!(decode(&raw), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn payload_that_looks_like_a_marker_splits_the_packet() {
        // f32::from_be_bytes([0xFF; 4]) is a NaN; the device cannot send it unambiguously
        let mut raw = HEADER_MARKER.to_vec();
        raw.extend(be(&[1.0]));
        raw.extend_from_slice(&[0xFF; 4]);
        raw.extend(be(&[2.0]));
        raw.extend_from_slice(&HEADER_MARKER);
        let (samples, report) = decode_with_report(&raw);
        assert_eq!(samples, vec![1.0, 2.0]);
        assert_eq!(report.markers, 3);
    }

    #[test]
    fn splitting_mid_float_loses_the_split_sample() {
        let whole = framed(&[&[1.0, 2.0, 3.0]]);
        assert_eq!(decode(&whole), vec![1.0, 2.0, 3.0]);

        // cut inside the second float
        let cut = HEADER_MARKER.len() + SAMPLE_SIZE + 2;
        let mut joined = decode(&whole[..cut]);
        joined.extend(decode(&whole[cut..]));
        assert_eq!(joined, vec![1.0, 3.0]);
    }

    #[test]
    fn stream_decoder_recovers_the_split_sample() {
        let whole = framed(&[&[1.0, 2.0, 3.0]]);
        let cut = HEADER_MARKER.len() + SAMPLE_SIZE + 2;
        let mut decoder = StreamDecoder::new();
        let mut joined = decoder.push(&whole[..cut]);
        assert_eq!(decoder.residual().len(), 2);
        joined.extend(decoder.push(&whole[cut..]));
        assert_eq!(joined, vec![1.0, 2.0, 3.0]);
        assert!(decoder.residual().is_empty());
    }

    #[test]
    fn stream_decoder_handles_marker_split_across_reads() {
        let whole = framed(&[&[1.0], &[2.0]]);
        // end the first read halfway through the second marker
        let cut = HEADER_MARKER.len() + SAMPLE_SIZE + 2;
        let mut decoder = StreamDecoder::new();
        let mut joined = decoder.push(&whole[..cut]);
        joined.extend(decoder.push(&whole[cut..]));
        assert_eq!(joined, vec![1.0, 2.0]);
    }

    #[test]
    fn stream_decoder_reset_discards_residual() {
        let mut decoder = StreamDecoder::new();
        decoder.push(&[0x3F, 0x80, 0x00, 0x00, 0x40]);
        assert_eq!(decoder.residual(), &[0x40]);
        assert_eq!(decoder.reset(), 1);
        assert!(decoder.residual().is_empty());
        assert_eq!(decoder.report(), DecodeReport::default());
    }

    // Bytes below 0xFF can never form a marker, wherever they sit.
    fn marker_free(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(0u8..0xFF, 0..max_len)
    }

    fn aligned_marker_free() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(prop::array::uniform4(0u8..0xFF), 0..64)
            .prop_map(|groups| groups.concat())
    }

    proptest! {
        #[test]
        fn prop_aligned_markerless_input_decodes_every_group(raw in aligned_marker_free()) {
            let samples = decode(&raw);
            prop_assert_eq!(samples.len(), raw.len() / SAMPLE_SIZE);
            for (sample, group) in samples.iter().zip(raw.chunks_exact(SAMPLE_SIZE)) {
                let expected = f32::from_be_bytes([group[0], group[1], group[2], group[3]]);
                prop_assert_eq!(sample.to_bits(), expected.to_bits());
            }
        }

        #[test]
        fn prop_never_invents_samples(raw in prop::collection::vec(any::<u8>(), 0..512)) {
            prop_assert!(decode(&raw).len() <= raw.len() / SAMPLE_SIZE);
        }

        #[test]
        fn prop_surrounding_markers_change_nothing(raw in aligned_marker_free()) {
            let mut framed = HEADER_MARKER.to_vec();
            framed.extend_from_slice(&raw);
            framed.extend_from_slice(&HEADER_MARKER);
            let plain: Vec<u32> = decode(&raw).iter().map(|v| v.to_bits()).collect();
            let wrapped: Vec<u32> = decode(&framed).iter().map(|v| v.to_bits()).collect();
            prop_assert_eq!(plain, wrapped);
        }

        #[test]
        fn prop_stream_decoder_matches_whole_stream(
            packets in prop::collection::vec(aligned_marker_free(), 1..6),
            cuts in prop::collection::vec(1usize..40, 1..20),
        ) {
            let mut stream = Vec::new();
            for packet in &packets {
                stream.extend_from_slice(&HEADER_MARKER);
                stream.extend_from_slice(packet);
            }
            let expected: Vec<u32> = decode(&stream).iter().map(|v| v.to_bits()).collect();

            let mut decoder = StreamDecoder::new();
            let mut got = Vec::new();
            let mut rest = stream.as_slice();
            for cut in cuts.iter().cycle() {
                if rest.is_empty() {
                    break;
                }
                let (head, tail) = rest.split_at((*cut).min(rest.len()));
                got.extend(decoder.push(head).iter().map(|v| v.to_bits()));
                rest = tail;
            }
            prop_assert_eq!(got, expected);
        }

        #[test]
        fn prop_markerless_stray_bytes_keep_head(raw in marker_free(64)) {
            let samples = decode(&raw);
            prop_assert_eq!(samples.len(), raw.len() / SAMPLE_SIZE);
        }
    }
}
