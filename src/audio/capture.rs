//! # Audio Capture Adapter
//!
//! Turns raw microphone float buffers into fixed-size PCM16 frames and hands
//! them to the agent transport.
//!
//! ## Forwarding Rules:
//! - Samples are ignored until [`CaptureAdapter::start`] is called
//! - A frame is forwarded **only** while the transport gate is open;
//!   otherwise it is dropped and counted, never buffered
//! - [`CaptureAdapter::stop`] discards the partial frame

use crate::agent::protocol::OutboundMessage;
use crate::agent::transport::TransportGate;
use crate::audio::buffer::FrameAccumulator;
use crate::audio::frame::{f32_to_pcm16, AudioFrame};
use tokio::sync::mpsc;
use tracing::{debug, trace};

pub struct CaptureAdapter {
    accumulator: FrameAccumulator,
    sample_rate: u32,
    gate: TransportGate,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    running: bool,
    next_index: u64,
    forwarded_frames: u64,
    dropped_frames: u64,
}

impl CaptureAdapter {
    /// ## Parameters:
    /// - **frame_size**: samples per outbound frame (4096 by default)
    /// - **sample_rate**: capture rate declared in the settings message
    /// - **gate**: readiness flag owned by the transport
    /// - **outbound**: transport queue frames are written to
    pub fn new(
        frame_size: usize,
        sample_rate: u32,
        gate: TransportGate,
        outbound: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Self {
        Self {
            accumulator: FrameAccumulator::new(frame_size),
            sample_rate,
            gate,
            outbound,
            running: false,
            next_index: 0,
            forwarded_frames: 0,
            dropped_frames: 0,
        }
    }

    pub fn start(&mut self) {
        if !self.running {
            debug!(sample_rate = self.sample_rate, "Capture started");
        }
        self.running = true;
    }

    /// Stop capturing. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if self.running {
            debug!(
                forwarded = self.forwarded_frames,
                dropped = self.dropped_frames,
                "Capture stopped"
            );
        }
        self.running = false;
        self.accumulator.clear();
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Accept one microphone buffer of normalized float samples.
    ///
    /// Returns the number of frames forwarded to the transport.
    pub fn push_samples(&mut self, samples: &[f32]) -> usize {
        if !self.running || samples.is_empty() {
            return 0;
        }

        let pcm = f32_to_pcm16(samples);
        let mut forwarded = 0;
        for chunk in self.accumulator.push(&pcm) {
            let frame = AudioFrame::new(chunk, self.sample_rate, self.next_index);
            self.next_index += 1;

            if !self.gate.is_open() {
                self.dropped_frames += 1;
                trace!(index = frame.index(), "Transport not ready, frame dropped");
                continue;
            }

            if self.outbound.send(OutboundMessage::Audio(frame)).is_ok() {
                self.forwarded_frames += 1;
                forwarded += 1;
            } else {
                self.dropped_frames += 1;
            }
        }
        forwarded
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    pub fn forwarded_frames(&self) -> u64 {
        self.forwarded_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(frame_size: usize) -> (CaptureAdapter, TransportGate, mpsc::UnboundedReceiver<OutboundMessage>) {
        let gate = TransportGate::default();
        let (tx, rx) = mpsc::unbounded_channel();
        (CaptureAdapter::new(frame_size, 16000, gate.clone(), tx), gate, rx)
    }

    #[test]
    fn test_ignores_samples_until_started() {
        let (mut capture, gate, mut rx) = adapter(4);
        gate.open();
        assert_eq!(capture.push_samples(&[0.1; 8]), 0);
        assert!(rx.try_recv().is_err());

        capture.start();
        assert_eq!(capture.push_samples(&[0.5; 8]), 2);
        match rx.try_recv().unwrap() {
            OutboundMessage::Audio(frame) => {
                assert_eq!(frame.samples(), &[16384; 4]);
                assert_eq!(frame.index(), 0);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_closed_gate_drops_frames_without_queueing() {
        let (mut capture, gate, mut rx) = adapter(2);
        capture.start();

        assert_eq!(capture.push_samples(&[0.0; 6]), 0);
        assert_eq!(capture.dropped_frames(), 3);
        assert!(rx.try_recv().is_err());

        // Opening the gate later does not replay dropped audio
        gate.open();
        assert_eq!(capture.push_samples(&[0.0; 2]), 1);
        assert_eq!(rx.try_recv().map(|m| matches!(m, OutboundMessage::Audio(_))), Ok(true));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stop_discards_partial_frame() {
        let (mut capture, gate, mut rx) = adapter(4);
        gate.open();
        capture.start();
        capture.push_samples(&[1.0; 3]);
        capture.stop();
        capture.stop();
        assert!(!capture.is_running());

        capture.start();
        assert_eq!(capture.push_samples(&[-1.0; 4]), 1);
        match rx.try_recv().unwrap() {
            OutboundMessage::Audio(frame) => assert_eq!(frame.samples(), &[-32768; 4]),
            other => panic!("unexpected message {:?}", other),
        }
    }
}
