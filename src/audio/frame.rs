//! # Audio Frames and PCM Conversion
//!
//! Every piece of audio that crosses the agent transport is an [`AudioFrame`]:
//! an ordered run of 16-bit signed PCM samples at a fixed sample rate, tagged
//! with a monotonic index assigned where the frame was produced.
//!
//! ## Wire Format:
//! - **Encoding**: 16-bit signed integers, little-endian
//! - **Channels**: Mono
//! - **Rate**: Fixed per direction (capture and playback may differ)
//!
//! ## Conversions:
//! - Microphone floats `[-1.0, 1.0]` → PCM16 with hard clamping
//! - PCM16 → normalized floats for rendering

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use thiserror::Error;

/// Errors raised while decoding raw audio bytes.
#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    #[error("audio payload is empty")]
    Empty,
    #[error("audio payload length {0} is not a multiple of {1} bytes")]
    Misaligned(usize, usize),
}

/// An immutable chunk of PCM16 audio.
///
/// Fields are private so a frame cannot be edited after it is produced;
/// the capture adapter and the transport reader are the only producers.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<i16>,
    sample_rate: u32,
    index: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32, index: u64) -> Self {
        Self {
            samples,
            sample_rate,
            index,
        }
    }

    /// Decode a little-endian PCM16 payload (e.g. a binary WebSocket message).
    pub fn from_le_bytes(data: &[u8], sample_rate: u32, index: u64) -> Result<Self, FrameError> {
        if data.is_empty() {
            return Err(FrameError::Empty);
        }
        if data.len() % 2 != 0 {
            return Err(FrameError::Misaligned(data.len(), 2));
        }

        let mut cursor = Cursor::new(data);
        let mut samples = Vec::with_capacity(data.len() / 2);
        while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
            samples.push(sample);
        }

        Ok(Self::new(samples, sample_rate, index))
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Monotonic arrival index assigned by the producer.
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration of this frame in seconds.
    ///
    /// ## Calculation:
    /// Duration = number_of_samples / sample_rate
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Encode the samples as little-endian bytes for a binary message.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * 2);
        for &sample in &self.samples {
            // Writing into a Vec cannot fail
            let _ = bytes.write_i16::<LittleEndian>(sample);
        }
        bytes
    }

    /// Normalized float samples in `[-1.0, 1.0)` for rendering.
    pub fn to_f32(&self) -> Vec<f32> {
        pcm16_to_f32(&self.samples)
    }
}

/// Convert microphone float samples to PCM16.
///
/// Scales by 32768 and clamps hard to `[-32768, 32767]`, so out-of-range
/// input saturates instead of wrapping. NaN maps to silence.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&sample| {
            let scaled = sample * 32768.0;
            scaled.clamp(-32768.0, 32767.0) as i16
        })
        .collect()
}

/// Convert PCM16 samples to normalized floats.
pub fn pcm16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&sample| sample as f32 / 32768.0).collect()
}

/// Decode little-endian f32 samples, the format browsers send for raw
/// microphone buffers.
pub fn f32_from_le_bytes(data: &[u8]) -> Result<Vec<f32>, FrameError> {
    if data.is_empty() {
        return Err(FrameError::Empty);
    }
    if data.len() % 4 != 0 {
        return Err(FrameError::Misaligned(data.len(), 4));
    }

    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 4);
    while let Ok(sample) = cursor.read_f32::<LittleEndian>() {
        samples.push(sample);
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_conversion_clamps_out_of_range() {
        let pcm = f32_to_pcm16(&[0.0, 0.5, -0.5, 1.0, -1.0, 3.0, -3.0, f32::NAN]);
        assert_eq!(pcm, vec![0, 16384, -16384, 32767, -32768, 32767, -32768, 0]);
    }

    #[test]
    fn test_decode_rejects_odd_length() {
        assert_eq!(
            AudioFrame::from_le_bytes(&[0u8; 15], 16000, 0),
            Err(FrameError::Misaligned(15, 2))
        );
        assert_eq!(AudioFrame::from_le_bytes(&[], 16000, 0), Err(FrameError::Empty));
    }

    #[test]
    fn test_bytes_survive_encode_decode() {
        let frame = AudioFrame::new(vec![0, 1, -1, i16::MAX, i16::MIN], 24000, 7);
        let decoded = AudioFrame::from_le_bytes(&frame.to_le_bytes(), 24000, 7).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_duration_uses_sample_rate() {
        let frame = AudioFrame::new(vec![0; 4096], 16000, 0);
        assert!((frame.duration_secs() - 0.256).abs() < 1e-9);
        assert_eq!(AudioFrame::new(vec![0; 10], 0, 0).duration_secs(), 0.0);
    }

    #[test]
    fn test_browser_float_payload() {
        let mut data = Vec::new();
        data.extend_from_slice(&0.25f32.to_le_bytes());
        data.extend_from_slice(&(-1.0f32).to_le_bytes());
        assert_eq!(f32_from_le_bytes(&data).unwrap(), vec![0.25, -1.0]);
        assert!(f32_from_le_bytes(&data[..5]).is_err());
    }
}
