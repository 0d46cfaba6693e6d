//! # Gapless Playback Scheduler
//!
//! Agent audio arrives as a burst of small frames with network jitter between
//! them. Rendering each frame "as soon as it arrives" produces clicks and
//! overlaps, so every frame is instead placed on a per-session timeline:
//!
//! ```text
//! start_at       = max(clock.now(), next_play_time)
//! next_play_time = start_at + frame.duration
//! ```
//!
//! Frames that arrive early queue back-to-back; a frame that arrives after the
//! timeline ran dry starts immediately and the timeline self-heals.
//!
//! ## Ownership:
//! Each interview owns one [`PlaybackScheduler`] and one clock. Nothing here is
//! global, so concurrent interviews never disturb each other's timeline.

use crate::audio::frame::AudioFrame;
use std::sync::Arc;
use std::time::Instant;

/// Source of the output timeline, in seconds.
pub trait OutputClock: Send + Sync {
    fn now(&self) -> f64;
}

/// Seconds elapsed since the clock was created.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputClock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// A frame placed on the output timeline, ready for the renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledBuffer {
    pub index: u64,
    pub start_at: f64,
    pub duration: f64,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

/// Where scheduled buffers are rendered (a browser bridge, a sound card, a test probe).
pub trait AudioSink: Send {
    fn render(&mut self, buffer: ScheduledBuffer);
}

pub struct PlaybackScheduler {
    clock: Arc<dyn OutputClock>,
    next_play_time: Option<f64>,
}

impl PlaybackScheduler {
    pub fn new(clock: Arc<dyn OutputClock>) -> Self {
        Self {
            clock,
            next_play_time: None,
        }
    }

    /// Place `frame` on the timeline and advance it.
    ///
    /// ## Returns:
    /// The buffer with its absolute `start_at`; consecutive calls never
    /// overlap and leave no gap while frames arrive faster than real time.
    pub fn schedule(&mut self, frame: &AudioFrame) -> ScheduledBuffer {
        let now = self.clock.now();
        let next = self.next_play_time.unwrap_or(now);
        let start_at = now.max(next);
        let duration = frame.duration_secs();
        self.next_play_time = Some(start_at + duration);

        ScheduledBuffer {
            index: frame.index(),
            start_at,
            duration,
            sample_rate: frame.sample_rate(),
            samples: frame.to_f32(),
        }
    }

    /// Pull the timeline back to the current clock time (session closed).
    pub fn reset(&mut self) {
        self.next_play_time = Some(self.clock.now());
    }

    /// Restart the timeline after the output was suspended.
    pub fn resume(&mut self) {
        self.next_play_time = Some(self.clock.now());
    }

    pub fn next_play_time(&self) -> Option<f64> {
        self.next_play_time
    }
}
