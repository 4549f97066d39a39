//! Invigilator - Real-Time Exam-Integrity Enforcement
//!
//! Turns a camera/microphone feed and a stream of client-surface events
//! into a continuously-updated violation record and an enforcement decision
//! (keep testing, warn, or force-submit) without ever losing answers
//! already entered.
//!
//! ## Architecture (bottom-up)
//!
//! 1. MediaCapture - camera/microphone acquisition and lifecycle
//! 2. SignalEncoder - JPEG frame compression, FFT loudness analysis
//! 3. StreamingChannel - bidirectional link to the analysis service
//! 4. ViolationAggregator - merged, deduplicated violation tally
//! 5. Enforcement - integrity state machine and engine loop
//! 6. AttemptController - exam lifecycle, answers, submission
//! 7. AttemptApi - attempt service REST adapter
//!
//! Data flows bottom-up (capture → encode → transmit → aggregate →
//! enforce → lifecycle decision); control flows top-down (the controller
//! starts and stops the whole pipeline).
//!
//! ## Design Principles
//!
//! - One engine task per attempt owns every timer, the media session, and
//!   the channel; no locks, no ambient globals
//! - Device, channel, and surface access go through capability traits with
//!   simulated implementations for deterministic tests
//! - No failure in this subsystem is fatal: degrade, retry, or prompt

pub mod attempt_api;
pub mod attempt_controller;
pub mod enforcement;
pub mod error;
pub mod exam_surface;
pub mod media_capture;
pub mod policy;
pub mod signal_encoder;
pub mod state;
pub mod streaming_channel;
pub mod violation_aggregator;

pub use error::{Error, Result};
pub use policy::EnforcementPolicy;
pub use state::AppConfig;
