//! EnforcementPolicy - Per-attempt enforcement configuration
//!
//! Loaded with defaults matching the production proctoring policy; the
//! attempt service may return overrides when an attempt is started.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Enforcement policy for one attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcementPolicy {
    /// Initial window where surface checks are suspended so media capture
    /// can initialize without spurious violations
    pub grace_period_ms: u64,
    /// Cumulative violation count that forces submission
    pub disqualify_threshold: u32,
    /// Fullscreen poll cadence
    pub fullscreen_poll_ms: u64,
    /// Frame sampling/transmission cadence
    pub frame_interval_ms: u64,
    /// Audio sampling cadence
    pub audio_interval_ms: u64,
    /// Loudness (0-255) above which the noise alert is raised
    pub noise_threshold: u8,
    /// How long a violation alert stays visible
    pub alert_cooldown_ms: u64,
    /// Repeats of the same violation kind inside this window are not recorded
    pub dedup_window_ms: u64,
    /// Pause between disqualification and forced submission
    pub disqualify_delay_ms: u64,
    /// Delay before reconnecting after an abnormal channel close
    pub reconnect_delay_ms: u64,
}

impl Default for EnforcementPolicy {
    fn default() -> Self {
        Self {
            grace_period_ms: 2_000,
            disqualify_threshold: 3,
            fullscreen_poll_ms: 500,
            frame_interval_ms: 1_000,
            audio_interval_ms: 100,
            noise_threshold: 160,
            alert_cooldown_ms: 2_000,
            dedup_window_ms: 2_000,
            disqualify_delay_ms: 1_500,
            reconnect_delay_ms: 3_000,
        }
    }
}

impl EnforcementPolicy {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn fullscreen_poll(&self) -> Duration {
        Duration::from_millis(self.fullscreen_poll_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn audio_interval(&self) -> Duration {
        Duration::from_millis(self.audio_interval_ms)
    }

    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_millis(self.alert_cooldown_ms)
    }

    pub fn disqualify_delay(&self) -> Duration {
        Duration::from_millis(self.disqualify_delay_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}
