//! ViolationAggregator - Durable Violation Tally
//!
//! ## Responsibilities
//!
//! - Merge remote-analysis and local-heuristic violations
//! - Keep the per-kind counts and cumulative total (monotone, never reset)
//! - Drop repeats of the same kind inside the dedup window
//! - Raise transient display alerts that expire after the cooldown
//! - Keep a bounded ring of recent events for display
//!
//! Alert expiry is display-only; the tally only ever increases. The
//! aggregator is owned by the engine task and mutated there alone; all
//! clocks are injected through event timestamps.

use crate::policy::EnforcementPolicy;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// Recent-event ring capacity
const RECENT_CAPACITY: usize = 256;

/// Violation kinds, remote and local
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    // Reported by the analysis service
    LookingAway,
    PhoneDetected,
    MultiplePeople,
    ExcessiveNoise,
    // Detected locally
    TabSwitch,
    WindowBlur,
    FullscreenExit,
    BlockedShortcut,
    ClipboardBlocked,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::LookingAway => "looking_away",
            ViolationKind::PhoneDetected => "phone_detected",
            ViolationKind::MultiplePeople => "multiple_people",
            ViolationKind::ExcessiveNoise => "excessive_noise",
            ViolationKind::TabSwitch => "tab_switch",
            ViolationKind::WindowBlur => "window_blur",
            ViolationKind::FullscreenExit => "fullscreen_exit",
            ViolationKind::BlockedShortcut => "blocked_shortcut",
            ViolationKind::ClipboardBlocked => "clipboard_blocked",
        }
    }

    /// Parse the analysis service's violation type
    pub fn from_remote(kind: &str) -> Option<Self> {
        match kind {
            "looking_away" => Some(ViolationKind::LookingAway),
            "phone_detected" => Some(ViolationKind::PhoneDetected),
            "multiple_people" => Some(ViolationKind::MultiplePeople),
            "excessive_noise" => Some(ViolationKind::ExcessiveNoise),
            _ => None,
        }
    }
}

/// Violation severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn from_remote(severity: &str) -> Self {
        match severity {
            "high" => Severity::High,
            "medium" => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

/// Where a violation was detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSource {
    RemoteAnalysis,
    LocalHeuristic,
}

/// One detected integrity breach; immutable once created
#[derive(Debug, Clone, Serialize)]
pub struct ViolationEvent {
    pub event_id: Uuid,
    pub kind: ViolationKind,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub source: ViolationSource,
}

impl ViolationEvent {
    pub fn new(
        kind: ViolationKind,
        severity: Severity,
        message: impl Into<String>,
        source: ViolationSource,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind,
            severity,
            message: message.into(),
            timestamp: Utc::now(),
            source,
        }
    }

    pub fn local(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self::new(
            kind,
            Severity::Medium,
            message,
            ViolationSource::LocalHeuristic,
        )
    }

    pub fn remote(kind: ViolationKind, severity: Severity, message: impl Into<String>) -> Self {
        Self::new(kind, severity, message, ViolationSource::RemoteAnalysis)
    }
}

/// Per-attempt running counts; monotonically non-decreasing
#[derive(Debug, Clone, Default, Serialize)]
pub struct ViolationTally {
    counts: HashMap<ViolationKind, u32>,
    total: u32,
}

impl ViolationTally {
    pub fn count(&self, kind: ViolationKind) -> u32 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    fn increment(&mut self, kind: ViolationKind) {
        *self.counts.entry(kind).or_insert(0) += 1;
        self.total += 1;
    }
}

/// Violation aggregator for one attempt
pub struct ViolationAggregator {
    tally: ViolationTally,
    recent: VecDeque<ViolationEvent>,
    last_accepted: HashMap<ViolationKind, DateTime<Utc>>,
    alerts: HashMap<ViolationKind, DateTime<Utc>>,
    dedup_window: Duration,
    alert_cooldown: Duration,
}

impl ViolationAggregator {
    pub fn new(policy: &EnforcementPolicy) -> Self {
        Self {
            tally: ViolationTally::default(),
            recent: VecDeque::with_capacity(RECENT_CAPACITY),
            last_accepted: HashMap::new(),
            alerts: HashMap::new(),
            dedup_window: Duration::milliseconds(policy.dedup_window_ms as i64),
            alert_cooldown: Duration::milliseconds(policy.alert_cooldown_ms as i64),
        }
    }

    /// Record a violation
    ///
    /// Returns false when the event is excluded by dedup; the tally is
    /// untouched in that case.
    pub fn record(&mut self, event: ViolationEvent) -> bool {
        if let Some(last) = self.last_accepted.get(&event.kind) {
            if event.timestamp - *last < self.dedup_window {
                tracing::debug!(kind = %event.kind.as_str(), "Duplicate violation dropped");
                return false;
            }
        }

        self.last_accepted.insert(event.kind, event.timestamp);
        self.alerts.insert(event.kind, event.timestamp);
        self.tally.increment(event.kind);

        if self.recent.len() >= RECENT_CAPACITY {
            self.recent.pop_front();
        }
        self.recent.push_back(event.clone());

        tracing::info!(
            kind = %event.kind.as_str(),
            severity = ?event.severity,
            source = ?event.source,
            total = self.tally.total,
            "Violation recorded"
        );
        true
    }

    /// Raise a display-only alert without touching the tally
    ///
    /// Used for the local loudness warning; actual excessive-noise
    /// violations come from the analysis service.
    pub fn flag_alert(&mut self, kind: ViolationKind, now: DateTime<Utc>) {
        self.alerts.insert(kind, now);
    }

    /// Drop alerts older than the cooldown
    pub fn expire_alerts(&mut self, now: DateTime<Utc>) {
        let cooldown = self.alert_cooldown;
        self.alerts.retain(|_, raised| now - *raised < cooldown);
    }

    /// Kinds with a currently-visible alert
    pub fn active_alerts(&self, now: DateTime<Utc>) -> Vec<ViolationKind> {
        self.alerts
            .iter()
            .filter(|(_, raised)| now - **raised < self.alert_cooldown)
            .map(|(kind, _)| *kind)
            .collect()
    }

    pub fn tally(&self) -> &ViolationTally {
        &self.tally
    }

    /// Most recent events, newest first
    pub fn recent(&self, count: usize) -> Vec<ViolationEvent> {
        self.recent.iter().rev().take(count).cloned().collect()
    }
}
