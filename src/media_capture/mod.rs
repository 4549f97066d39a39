//! MediaCapture - Camera/Microphone Acquisition and Lifecycle
//!
//! ## Responsibilities
//!
//! - Acquire camera and microphone tracks behind the `MediaSource` capability
//! - Degrade per modality on denial or absence instead of blocking the exam
//! - Own track lifecycle; release is idempotent and backed by Drop

use crate::error::Result;
use chrono::{DateTime, Utc};
use std::future::Future;

pub mod sim;

pub use sim::SimulatedMediaSource;

/// Acquisition constraints for one attempt
#[derive(Debug, Clone)]
pub struct MediaConstraints {
    pub video: bool,
    pub audio: bool,
    /// Ideal capture resolution; the device may report something else
    pub ideal_width: u32,
    pub ideal_height: u32,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            video: true,
            audio: true,
            ideal_width: 1280,
            ideal_height: 720,
        }
    }
}

/// Uncompressed RGB frame as reported by the video track
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    /// RGB8 pixel data, `width * height * 3` bytes
    pub pixels: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

/// Live video track handle
pub trait VideoTrack: Send {
    /// Current frame, or None while the device has not produced one yet
    fn latest_frame(&mut self) -> Option<RawFrame>;

    fn stop(&mut self);
}

/// Live audio track handle
pub trait AudioTrack: Send {
    /// Most recent analysis window of PCM samples in [-1.0, 1.0]
    fn window(&mut self) -> Option<Vec<f32>>;

    fn stop(&mut self);
}

/// Device acquisition capability
///
/// Camera and microphone are requested separately so that denial of one
/// never costs the other.
pub trait MediaSource: Send + 'static {
    fn acquire_video(
        &mut self,
        constraints: &MediaConstraints,
    ) -> impl Future<Output = Result<Box<dyn VideoTrack>>> + Send;

    fn acquire_audio(&mut self) -> impl Future<Output = Result<Box<dyn AudioTrack>>> + Send;
}

/// Live camera/microphone handles for one attempt
///
/// Exactly one active instance per attempt, owned by the enforcement engine.
pub struct MediaSession {
    video: Option<Box<dyn VideoTrack>>,
    audio: Option<Box<dyn AudioTrack>>,
    released: bool,
}

impl MediaSession {
    pub fn new(video: Option<Box<dyn VideoTrack>>, audio: Option<Box<dyn AudioTrack>>) -> Self {
        Self {
            video,
            audio,
            released: false,
        }
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// Current video frame, None while degraded, released, or not yet ready
    pub fn latest_frame(&mut self) -> Option<RawFrame> {
        if self.released {
            return None;
        }
        self.video.as_mut()?.latest_frame()
    }

    /// Current audio analysis window, None while degraded or released
    pub fn audio_window(&mut self) -> Option<Vec<f32>> {
        if self.released {
            return None;
        }
        self.audio.as_mut()?.window()
    }

    /// Stop every track; safe to call more than once
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let Some(mut video) = self.video.take() {
            video.stop();
        }
        if let Some(mut audio) = self.audio.take() {
            audio.stop();
        }
        tracing::debug!("Media session released");
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for MediaSession {
    fn drop(&mut self) {
        self.release();
    }
}

/// Acquire camera and microphone, degrading per modality on failure
///
/// Denial or absence is logged and leaves that modality out of the session;
/// the exam proceeds in reduced mode. Never fails.
pub async fn acquire_degraded<S: MediaSource>(
    source: &mut S,
    constraints: &MediaConstraints,
) -> MediaSession {
    let video = if constraints.video {
        match source.acquire_video(constraints).await {
            Ok(track) => Some(track),
            Err(e) => {
                tracing::warn!(error = %e, "Camera unavailable - video checks bypassed");
                None
            }
        }
    } else {
        None
    };

    let audio = if constraints.audio {
        match source.acquire_audio().await {
            Ok(track) => Some(track),
            Err(e) => {
                tracing::warn!(error = %e, "Microphone unavailable - audio checks bypassed");
                None
            }
        }
    } else {
        None
    };

    tracing::info!(
        video = video.is_some(),
        audio = audio.is_some(),
        "Media session acquired"
    );

    MediaSession::new(video, audio)
}
