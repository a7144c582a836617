//! Frame boundary demultiplexer for the raw MJPEG source.
//!
//! The upstream encoder writes a multipart stream separated by a literal
//! `--<token>\r\n` marker with no length prefixes. Bytes are accumulated and
//! cut at the LAST marker seen, so each `feed` yields at most one segment.
//! When one read carries several boundaries, every completed frame up to the
//! last marker goes out as a single coalesced segment.

use bytes::{Bytes, BytesMut};

/// Initial capacity of the accumulation buffer (one typical VGA JPEG)
pub const INITIAL_BUFFER_SIZE: usize = 64 * 1024;

/// Splits a continuous boundary-delimited byte stream into forwardable segments.
#[derive(Debug)]
pub struct FrameSplitter {
    marker: Vec<u8>,
    buffer: BytesMut,
    /// Offset before which no marker can start; earlier bytes were searched
    scanned: usize,
}

impl FrameSplitter {
    /// Create a splitter for the given wire marker (e.g. `b"--spionisto\r\n"`).
    pub fn new(marker: impl Into<Vec<u8>>) -> Self {
        let marker = marker.into();
        assert!(!marker.is_empty(), "boundary marker must not be empty");
        Self {
            marker,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            scanned: 0,
        }
    }

    /// Append `data` and return everything up to and including the last
    /// boundary marker, if the buffer now contains one.
    pub fn feed(&mut self, data: &[u8]) -> Option<Bytes> {
        self.buffer.extend_from_slice(data);

        let found = rfind(&self.buffer[self.scanned..], &self.marker)
            .map(|pos| pos + self.scanned);
        let ready = found.map(|pos| self.buffer.split_to(pos + self.marker.len()).freeze());

        // A marker may still straddle the end of what is buffered now
        self.scanned = self.buffer.len().saturating_sub(self.marker.len() - 1);
        ready
    }

    /// Bytes retained after the last recognized boundary
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MARKER: &[u8] = b"--spionisto\r\n";

    fn stream(parts: &[&[u8]]) -> Vec<u8> {
        parts.concat()
    }

    #[test]
    fn test_no_boundary_only_buffers() {
        let mut splitter = FrameSplitter::new(MARKER);
        assert!(splitter.feed(b"\xff\xd8partial jpeg").is_none());
        assert_eq!(splitter.buffered(), 14);
        assert!(splitter.feed(b" more").is_none());
        assert_eq!(splitter.buffered(), 19);
    }

    #[test]
    fn test_single_boundary() {
        let mut splitter = FrameSplitter::new(MARKER);
        let out = splitter
            .feed(&stream(&[b"frame1", MARKER, b"part"]))
            .unwrap();
        assert_eq!(&out[..], &stream(&[b"frame1", MARKER])[..]);
        assert_eq!(splitter.buffered(), 4);
    }

    #[test]
    fn test_multiple_boundaries_coalesce_to_last() {
        let mut splitter = FrameSplitter::new(MARKER);
        let input = stream(&[b"frame1", MARKER, b"frame2", MARKER, b"partial"]);

        let out = splitter.feed(&input).unwrap();

        // Both frames leave together as one segment, never individually
        assert_eq!(&out[..], &stream(&[b"frame1", MARKER, b"frame2", MARKER])[..]);
        assert_eq!(splitter.buffered(), b"partial".len());
    }

    #[test]
    fn test_boundary_split_across_calls() {
        let mut splitter = FrameSplitter::new(MARKER);
        assert!(splitter.feed(b"frame1--spion").is_none());
        let out = splitter.feed(b"isto\r\nnext").unwrap();
        assert_eq!(&out[..], &stream(&[b"frame1", MARKER])[..]);
        assert_eq!(splitter.buffered(), 4);
    }

    #[test]
    fn test_ends_exactly_on_boundary() {
        let mut splitter = FrameSplitter::new(MARKER);
        let out = splitter.feed(&stream(&[b"frame", MARKER])).unwrap();
        assert_eq!(out.len(), 5 + MARKER.len());
        assert_eq!(splitter.buffered(), 0);
    }

    #[test]
    fn test_byte_at_a_time_only_rescans_tail() {
        let mut splitter = FrameSplitter::new(MARKER);
        let frame = vec![b'x'; 10_000];
        for b in &frame {
            assert!(splitter.feed(std::slice::from_ref(b)).is_none());
        }
        assert_eq!(splitter.scanned, frame.len() - (MARKER.len() - 1));

        // Marker fed one byte at a time across the scanned edge still matches
        let mut out = None;
        for b in MARKER {
            if let Some(seg) = splitter.feed(std::slice::from_ref(b)) {
                out = Some(seg);
            }
        }
        let out = out.unwrap();
        assert_eq!(out.len(), frame.len() + MARKER.len());
        assert_eq!(splitter.buffered(), 0);
        assert_eq!(splitter.scanned, 0);
    }

    #[test]
    fn test_tail_after_cut_is_rescanned() {
        let mut splitter = FrameSplitter::new(MARKER);
        // Tail "--spi" after the first marker must still complete a marker
        let first = splitter.feed(&stream(&[b"a", MARKER, b"--spi"])).unwrap();
        assert_eq!(&first[..], &stream(&[b"a", MARKER])[..]);
        let second = splitter.feed(b"onisto\r\n").unwrap();
        assert_eq!(&second[..], MARKER);
    }

    #[test]
    #[should_panic]
    fn test_empty_marker_rejected() {
        let _ = FrameSplitter::new(Vec::new());
    }

    proptest! {
        /// However the stream is chunked, forwarded bytes plus the retained
        /// tail reproduce the input, every segment ends on a marker, and the
        /// tail never contains a complete marker.
        #[test]
        fn prop_chunking_preserves_bytes(
            frames in proptest::collection::vec(
                proptest::collection::vec(0u8..=0x7f, 0..64), 1..6),
            partial in proptest::collection::vec(0u8..=0x7f, 0..32),
            cuts in proptest::collection::vec(1usize..40, 0..20),
        ) {
            // Payload bytes are 0..=0x7f with '-' excluded so no marker is forged
            let frames: Vec<Vec<u8>> = frames
                .into_iter()
                .map(|f| f.into_iter().filter(|b| *b != b'-').collect())
                .collect();
            let partial: Vec<u8> = partial.into_iter().filter(|b| *b != b'-').collect();

            let mut input = Vec::new();
            for f in &frames {
                input.extend_from_slice(f);
                input.extend_from_slice(MARKER);
            }
            input.extend_from_slice(&partial);

            let mut splitter = FrameSplitter::new(MARKER);
            let mut forwarded = Vec::new();
            let mut rest = &input[..];
            for cut in cuts {
                if rest.is_empty() {
                    break;
                }
                let n = cut.min(rest.len());
                if let Some(seg) = splitter.feed(&rest[..n]) {
                    prop_assert!(seg.ends_with(MARKER));
                    forwarded.extend_from_slice(&seg);
                }
                rest = &rest[n..];
            }
            if let Some(seg) = splitter.feed(rest) {
                prop_assert!(seg.ends_with(MARKER));
                forwarded.extend_from_slice(&seg);
            }

            prop_assert_eq!(forwarded.len() + splitter.buffered(), input.len());
            prop_assert_eq!(&forwarded[..], &input[..input.len() - partial.len()]);
            prop_assert_eq!(splitter.buffered(), partial.len());
        }
    }
}
