//! Byte-stream framer
//!
//! The AI channel delivers response audio as variable-size byte chunks;
//! the telephony leg consumes fixed-duration frames. The framer sits
//! between them: it accumulates raw bytes and emits every complete frame,
//! retaining the remainder for the next chunk.
//!
//! Invariant: emitted frames + retained partial buffer == concatenation
//! of everything fed in since the last reset.

use call_bridge_core::{AudioFrame, FrameFormat};

/// Accumulates raw AI audio bytes into fixed-size frames
pub struct Framer {
    format: FrameFormat,
    buffer: Vec<u8>,
    sequence: u64,
}

impl Framer {
    pub fn new(format: FrameFormat) -> Self {
        Self {
            format,
            buffer: Vec::with_capacity(format.bytes_per_frame() * 4),
            sequence: 0,
        }
    }

    /// Append raw bytes and return every complete frame now available
    pub fn feed(&mut self, raw: &[u8]) -> Vec<AudioFrame> {
        self.buffer.extend_from_slice(raw);

        let frame_len = self.format.bytes_per_frame();
        let complete = self.buffer.len() / frame_len;
        if complete == 0 {
            return Vec::new();
        }

        let mut frames = Vec::with_capacity(complete);
        let consumed = complete * frame_len;
        for chunk in self.buffer[..consumed].chunks_exact(frame_len) {
            frames.push(AudioFrame::new(chunk.to_vec(), self.sequence));
            self.sequence += 1;
        }
        self.buffer.drain(..consumed);

        frames
    }

    /// Emit the trailing partial as one final frame, padded to full
    /// length with silence. Returns None when nothing is buffered.
    ///
    /// Called on end-of-audio so the tail of a response is not lost.
    pub fn flush_padded(&mut self) -> Option<AudioFrame> {
        if self.buffer.is_empty() {
            return None;
        }
        let mut payload = std::mem::take(&mut self.buffer);
        payload.resize(self.format.bytes_per_frame(), 0);
        let frame = AudioFrame::new(payload, self.sequence);
        self.sequence += 1;
        Some(frame)
    }

    /// Discard the partial buffer
    ///
    /// Called on barge-in, so a trailing partial frame never leaks into
    /// the next turn.
    pub fn reset(&mut self) {
        if !self.buffer.is_empty() {
            tracing::debug!(discarded = self.buffer.len(), "framer reset with partial frame");
        }
        self.buffer.clear();
    }

    /// Bytes currently held back waiting for a complete frame
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framer() -> Framer {
        Framer::new(FrameFormat::default()) // 320-byte frames
    }

    #[test]
    fn emits_nothing_below_one_frame() {
        let mut f = framer();
        assert!(f.feed(&[0u8; 319]).is_empty());
        assert_eq!(f.pending_bytes(), 319);
    }

    #[test]
    fn emits_complete_frames_and_retains_remainder() {
        let mut f = framer();
        let frames = f.feed(&[1u8; 320 * 2 + 50]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].len(), 320);
        assert_eq!(frames[0].sequence, 0);
        assert_eq!(frames[1].sequence, 1);
        assert_eq!(f.pending_bytes(), 50);
    }

    #[test]
    fn framing_preserves_every_byte() {
        // Property: frames + remainder reassemble the exact input,
        // regardless of how chunk boundaries fall.
        let input: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
        let chunk_sizes = [1usize, 7, 320, 333, 640, 13, 500, 186];

        let mut f = framer();
        let mut reassembled = Vec::new();
        let mut offset = 0;
        let mut i = 0;
        while offset < input.len() {
            let take = chunk_sizes[i % chunk_sizes.len()].min(input.len() - offset);
            for frame in f.feed(&input[offset..offset + take]) {
                reassembled.extend_from_slice(&frame.payload);
            }
            offset += take;
            i += 1;
        }

        let pending = f.pending_bytes();
        assert_eq!(reassembled.len() + pending, input.len());
        assert_eq!(&reassembled[..], &input[..reassembled.len()]);
    }

    #[test]
    fn reset_discards_partial() {
        let mut f = framer();
        f.feed(&[9u8; 100]);
        f.reset();
        assert_eq!(f.pending_bytes(), 0);
        // A fresh frame after reset contains only new bytes
        let frames = f.feed(&[7u8; 320]);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].payload.iter().all(|&b| b == 7));
    }

    #[test]
    fn flush_pads_trailing_partial_with_silence() {
        let mut f = framer();
        f.feed(&[5u8; 320 + 100]);
        let tail = f.flush_padded().unwrap();
        assert_eq!(tail.len(), 320);
        assert!(tail.payload[..100].iter().all(|&b| b == 5));
        assert!(tail.payload[100..].iter().all(|&b| b == 0));
        assert_eq!(f.pending_bytes(), 0);
        assert!(f.flush_padded().is_none());
    }

    #[test]
    fn sequence_is_monotonic_across_feeds() {
        let mut f = framer();
        let a = f.feed(&[0u8; 320]);
        let b = f.feed(&[0u8; 640]);
        assert_eq!(a[0].sequence, 0);
        assert_eq!(b[0].sequence, 1);
        assert_eq!(b[1].sequence, 2);
    }
}
