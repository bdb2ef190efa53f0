//! Notification Reassembler — buffers fragmented GATT notification chunks
//! into complete frames (§4.B).
//!
//! Pure buffering logic with no transport dependency, same spirit as the
//! codec: it only ever sees byte slices handed to it by whatever owns the
//! GATT notification stream.

use crate::codec::{self, DecodedFrame};
use crate::error::CodecError;

/// Per-session reassembly state. One instance lives for the lifetime of a
/// `ValveSession`'s notify subscription.
#[derive(Debug, Default)]
pub struct Reassembler {
    buf: Vec<u8>,
    expected_len: Option<u8>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one notification chunk. Returns `Some(result)` once enough bytes
    /// have accumulated to attempt a decode; the buffer is cleared either way
    /// so the next chunk starts a fresh frame.
    pub fn feed(&mut self, chunk: &[u8]) -> Option<Result<DecodedFrame, CodecError>> {
        if self.buf.is_empty() {
            if chunk.len() < 3 || chunk[0] != codec::START_MARKER || chunk[1] != codec::START_MARKER {
                return None;
            }
            self.expected_len = Some(chunk[2]);
        }
        self.buf.extend_from_slice(chunk);

        let expected = self.expected_len?;
        if self.buf.len() < expected as usize {
            return None;
        }

        let frame = std::mem::take(&mut self.buf);
        self.expected_len = None;
        Some(codec::decode(&frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;

    #[test]
    fn whole_frame_in_one_chunk_decodes_immediately() {
        let mut r = Reassembler::new();
        let frame = encode(0x01, 1, &[]);
        let decoded = r.feed(&frame).unwrap().unwrap();
        assert_eq!(decoded.function, 0x01);
    }

    #[test]
    fn split_at_any_offset_ge_3_matches_whole_decode() {
        let frame = encode(0x0C, 2, &[0x5E, 0x01, 0x5E, 0x01]);
        let whole = codec::decode(&frame).unwrap();

        for split in 3..frame.len() {
            let mut r = Reassembler::new();
            assert!(r.feed(&frame[..split]).is_none());
            let decoded = r.feed(&frame[split..]).unwrap().unwrap();
            assert_eq!(decoded, whole);
        }
    }

    #[test]
    fn chunk_that_does_not_open_with_magic_is_dropped() {
        let mut r = Reassembler::new();
        assert!(r.feed(&[0x01, 0x02, 0x03]).is_none());
        // buffer stays empty, so a later well-formed chunk still starts fresh
        let frame = encode(0x01, 1, &[]);
        let decoded = r.feed(&frame).unwrap().unwrap();
        assert_eq!(decoded.function, 0x01);
    }

    #[test]
    fn buffer_clears_after_handoff_even_on_checksum_failure() {
        let mut r = Reassembler::new();
        let mut corrupt = encode(0x01, 1, &[]);
        *corrupt.last_mut().unwrap() ^= 0xFF;
        let decoded = r.feed(&corrupt).unwrap().unwrap();
        assert!(!decoded.ok);

        // next full frame still reassembles cleanly from a fresh buffer
        let fresh = encode(0x0C, 2, &[]);
        let decoded = r.feed(&fresh).unwrap().unwrap();
        assert_eq!(decoded.packet_number, 2);
        assert!(decoded.ok);
    }
}
