//! # Capture Frame Accumulator
//!
//! Browsers and sound cards hand over microphone samples in whatever chunk
//! size they like. The agent expects a steady cadence of fixed-size frames
//! (4096 samples at 16kHz ≈ 256ms), so incoming samples are collected here
//! and released one full frame at a time.
//!
//! ## Key Features:
//! - **Fixed frame size**: Every emitted frame has exactly `frame_size` samples
//! - **No backlog**: Only the current partial frame is ever held
//! - **Cheap reset**: `clear()` drops the partial frame when capture stops

use std::collections::VecDeque;

/// Collects PCM16 samples and releases them in fixed-size frames.
#[derive(Debug)]
pub struct FrameAccumulator {
    /// Samples waiting for the current frame to fill
    pending: VecDeque<i16>,

    /// Number of samples in one emitted frame
    frame_size: usize,
}

impl FrameAccumulator {
    /// Create an accumulator that emits frames of `frame_size` samples.
    ///
    /// A zero frame size is treated as one sample per frame so the
    /// accumulator can never spin without making progress.
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            pending: VecDeque::with_capacity(frame_size),
            frame_size,
        }
    }

    /// Append samples and return every frame that is now complete, oldest first.
    pub fn push(&mut self, samples: &[i16]) -> Vec<Vec<i16>> {
        self.pending.extend(samples.iter().copied());

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_size {
            frames.push(self.pending.drain(..self.frame_size).collect());
        }
        frames
    }

    /// Number of samples held in the partial frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Drop the partial frame.
    ///
    /// ## Usage:
    /// Called when capture stops so a later start does not replay stale audio.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emits_only_full_frames() {
        let mut acc = FrameAccumulator::new(4);
        assert!(acc.push(&[1, 2, 3]).is_empty());
        assert_eq!(acc.pending_len(), 3);

        let frames = acc.push(&[4, 5, 6, 7, 8, 9]);
        assert_eq!(frames, vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8]]);
        assert_eq!(acc.pending_len(), 1);
    }

    #[test]
    fn test_clear_discards_partial_frame() {
        let mut acc = FrameAccumulator::new(3);
        acc.push(&[1, 2]);
        acc.clear();
        assert_eq!(acc.push(&[3, 4, 5]), vec![vec![3, 4, 5]]);
    }

    #[test]
    fn test_zero_frame_size_is_clamped() {
        let mut acc = FrameAccumulator::new(0);
        assert_eq!(acc.frame_size(), 1);
        assert_eq!(acc.push(&[9, 8]).len(), 2);
    }
}
