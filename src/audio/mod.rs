//! # Audio Pipeline
//!
//! Microphone capture on the way out, scheduled playback on the way back.
//!
//! ## Key Components:
//! - **Frames**: Immutable PCM16 chunks and float/PCM conversion (`frame`)
//! - **Accumulator**: Fixed-size framing of arbitrary microphone buffers (`buffer`)
//! - **Capture Adapter**: Gated forwarding of frames to the agent transport (`capture`)
//! - **Playback Scheduler**: Gapless per-session output timeline (`playback`)
//!
//! ## Audio Format:
//! - **Capture**: 16kHz mono PCM16, 4096-sample frames
//! - **Playback**: 24kHz mono PCM16 as sent by the agent
//! - **Encoding**: Little-endian signed integers

pub mod buffer;
pub mod capture;
pub mod frame;
pub mod playback;
