//! Simulated media source
//!
//! Deterministic camera/microphone used by the agent binary and tests.
//! The video track warms up for a configurable number of samples before
//! reporting frames, matching devices that have not negotiated dimensions
//! yet; the audio track produces a pure tone whose amplitude can be driven
//! mid-run.

use super::{AudioTrack, MediaConstraints, MediaSource, RawFrame, VideoTrack};
use crate::error::{Error, Result};
use crate::signal_encoder::FFT_WINDOW;
use chrono::Utc;
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Simulated device source
pub struct SimulatedMediaSource {
    deny_video: bool,
    deny_audio: bool,
    no_audio_device: bool,
    warmup_frames: u32,
    width: u32,
    height: u32,
    amplitude: Arc<AtomicU32>,
}

/// Handle for driving the simulated microphone level
#[derive(Clone)]
pub struct AudioLevelDriver {
    amplitude: Arc<AtomicU32>,
}

impl AudioLevelDriver {
    /// Set tone amplitude in [0.0, 1.0]
    pub fn set_amplitude(&self, amplitude: f32) {
        self.amplitude
            .store(amplitude.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
}

impl SimulatedMediaSource {
    pub fn new() -> Self {
        Self {
            deny_video: false,
            deny_audio: false,
            no_audio_device: false,
            warmup_frames: 0,
            width: 640,
            height: 480,
            amplitude: Arc::new(AtomicU32::new(0.05_f32.to_bits())),
        }
    }

    /// Simulate camera permission denial
    pub fn deny_video(mut self) -> Self {
        self.deny_video = true;
        self
    }

    /// Simulate microphone permission denial
    pub fn deny_audio(mut self) -> Self {
        self.deny_audio = true;
        self
    }

    /// Simulate a machine with no microphone
    pub fn without_audio_device(mut self) -> Self {
        self.no_audio_device = true;
        self
    }

    /// Frames to swallow before the camera reports dimensions
    pub fn with_warmup(mut self, frames: u32) -> Self {
        self.warmup_frames = frames;
        self
    }

    /// Driver for scripting the microphone level
    pub fn audio_driver(&self) -> AudioLevelDriver {
        AudioLevelDriver {
            amplitude: self.amplitude.clone(),
        }
    }
}

impl Default for SimulatedMediaSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaSource for SimulatedMediaSource {
    async fn acquire_video(&mut self, constraints: &MediaConstraints) -> Result<Box<dyn VideoTrack>> {
        if self.deny_video {
            return Err(Error::PermissionDenied("camera access denied".to_string()));
        }
        // Ignore the ideal resolution beyond logging; the simulated device
        // has a fixed native size
        tracing::debug!(
            ideal_width = constraints.ideal_width,
            ideal_height = constraints.ideal_height,
            width = self.width,
            height = self.height,
            "Simulated camera acquired"
        );
        Ok(Box::new(SimVideoTrack {
            width: self.width,
            height: self.height,
            warmup_remaining: self.warmup_frames,
            frame_counter: 0,
            stopped: false,
        }))
    }

    async fn acquire_audio(&mut self) -> Result<Box<dyn AudioTrack>> {
        if self.deny_audio {
            return Err(Error::PermissionDenied(
                "microphone access denied".to_string(),
            ));
        }
        if self.no_audio_device {
            return Err(Error::DeviceUnavailable("no microphone found".to_string()));
        }
        Ok(Box::new(SimAudioTrack {
            amplitude: self.amplitude.clone(),
            stopped: false,
        }))
    }
}

struct SimVideoTrack {
    width: u32,
    height: u32,
    warmup_remaining: u32,
    frame_counter: u32,
    stopped: bool,
}

impl VideoTrack for SimVideoTrack {
    fn latest_frame(&mut self) -> Option<RawFrame> {
        if self.stopped {
            return None;
        }
        if self.warmup_remaining > 0 {
            self.warmup_remaining -= 1;
            return None;
        }

        self.frame_counter = self.frame_counter.wrapping_add(1);
        let shade = (self.frame_counter % 256) as u8;
        let pixels = vec![shade; (self.width * self.height * 3) as usize];

        Some(RawFrame {
            width: self.width,
            height: self.height,
            pixels,
            captured_at: Utc::now(),
        })
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

struct SimAudioTrack {
    amplitude: Arc<AtomicU32>,
    stopped: bool,
}

impl AudioTrack for SimAudioTrack {
    fn window(&mut self) -> Option<Vec<f32>> {
        if self.stopped {
            return None;
        }
        let amplitude = f32::from_bits(self.amplitude.load(Ordering::Relaxed));
        // Tone centered on an exact FFT bin so the spectrum is leak-free
        let window = (0..FFT_WINDOW)
            .map(|i| amplitude * (TAU * 64.0 * i as f32 / FFT_WINDOW as f32).sin())
            .collect();
        Some(window)
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}
