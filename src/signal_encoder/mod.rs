//! SignalEncoder - Frame Compression and Audio Loudness Analysis
//!
//! ## Responsibilities
//!
//! - Sample the video track and compress frames to bandwidth-bounded JPEG
//! - Sample the audio track and reduce an FFT window to one loudness value
//!
//! Frames and audio samples are ephemeral; nothing here is retained after
//! transmission.

use crate::error::{Error, Result};
use crate::media_capture::{MediaSession, RawFrame};
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// JPEG quality for outgoing frames; keeps per-message payloads small
pub const JPEG_QUALITY: u8 = 70;

/// Audio analysis window length
pub const FFT_WINDOW: usize = 2048;

/// Captured, compressed video sample
#[derive(Debug, Clone)]
pub struct Frame {
    pub captured_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    /// JPEG payload
    pub jpeg: Vec<u8>,
}

/// Windowed loudness measurement
#[derive(Debug, Clone, Copy)]
pub struct AudioSample {
    pub captured_at: DateTime<Utc>,
    /// Aggregate spectral magnitude, 0-255
    pub loudness: u8,
}

/// JPEG frame encoder
pub struct FrameEncoder {
    quality: u8,
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self {
            quality: JPEG_QUALITY,
        }
    }

    pub fn with_quality(quality: u8) -> Self {
        Self { quality }
    }

    /// Sample the session's video track
    ///
    /// Returns Ok(None) while the track has not reported dimensions yet or
    /// video is degraded away; a no-op tick, not an error.
    pub fn sample(&self, session: &mut MediaSession) -> Result<Option<Frame>> {
        let raw = match session.latest_frame() {
            Some(raw) if raw.width > 0 && raw.height > 0 => raw,
            _ => return Ok(None),
        };
        let frame = self.encode(&raw)?;
        Ok(Some(frame))
    }

    fn encode(&self, raw: &RawFrame) -> Result<Frame> {
        let mut jpeg = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, self.quality);
        encoder
            .encode(&raw.pixels, raw.width, raw.height, ExtendedColorType::Rgb8)
            .map_err(|e| Error::Internal(format!("JPEG encode failed: {}", e)))?;

        Ok(Frame {
            captured_at: raw.captured_at,
            width: raw.width,
            height: raw.height,
            jpeg,
        })
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Frequency-domain loudness analyzer
pub struct AudioAnalyzer {
    fft: Arc<dyn Fft<f32>>,
}

impl AudioAnalyzer {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        Self {
            fft: planner.plan_fft_forward(FFT_WINDOW),
        }
    }

    /// Sample the session's audio track
    ///
    /// Returns None while audio is degraded away or the track has no window.
    pub fn sample(&self, session: &mut MediaSession) -> Option<AudioSample> {
        let window = session.audio_window()?;
        if window.len() < FFT_WINDOW {
            return None;
        }

        let loudness = self.loudness(&window[..FFT_WINDOW]);
        Some(AudioSample {
            captured_at: Utc::now(),
            loudness,
        })
    }

    /// Reduce one window to an aggregate 0-255 loudness value
    pub fn loudness(&self, window: &[f32]) -> u8 {
        let mut buffer: Vec<Complex<f32>> =
            window.iter().map(|s| Complex::new(*s, 0.0)).collect();
        self.fft.process(&mut buffer);

        // Aggregate magnitude over the bins below Nyquist, normalized so a
        // full-scale tone lands near 1.0
        let half = FFT_WINDOW / 2;
        let aggregate = buffer[..half].iter().map(|c| c.norm()).sum::<f32>()
            / (FFT_WINDOW as f32 / 2.0);

        (aggregate * 255.0).clamp(0.0, 255.0) as u8
    }
}

impl Default for AudioAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
