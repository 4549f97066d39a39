//! Enforcement state machine
//!
//! Pure reducer over typed events. The engine task feeds it everything that
//! happens (timer ticks, surface events, analysis results, submission
//! outcomes) and executes the actions it returns; the reducer itself does no
//! IO, which keeps the transition table testable without devices, sockets,
//! or clocks.

use crate::exam_surface::SurfaceEvent;
use crate::violation_aggregator::{Severity, ViolationKind, ViolationSource};

/// Enforcement phases
///
/// `Setup → Active ⇄ Violating → Disqualifying → Submitting → Completed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Grace period; surface checks suspended while capture initializes
    Setup,
    /// Normal enforcement
    Active,
    /// A violation alert is on display
    Violating,
    /// Threshold reached; forced submission pending
    Disqualifying,
    /// Submission requested or in flight
    Submitting,
    /// Terminal; enforcement torn down
    Completed,
}

/// A violation extracted from an analysis message
#[derive(Debug, Clone)]
pub struct RemoteFinding {
    pub kind: ViolationKind,
    pub severity: Severity,
    pub message: String,
}

/// Everything the engine can observe, as one typed event stream
#[derive(Debug, Clone)]
pub enum EngineEvent {
    GraceElapsed,
    FullscreenPoll { fullscreen: bool },
    Surface(SurfaceEvent),
    RemoteFindings(Vec<RemoteFinding>),
    AudioLevel(u8),
    CountdownTick { remaining_secs: i64 },
    /// The aggregator accepted a violation; carries the new cumulative total
    ViolationAccepted { total: u32 },
    AlertWindowElapsed,
    DisqualifyDelayElapsed,
    SubmitRequested,
    SubmissionSucceeded,
    SubmissionFailed,
    StopRequested,
}

/// Effects for the engine to execute
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Engage surface guards (keyboard, navigation, unload)
    EngageGuards,
    RequestFullscreen,
    RecordViolation {
        kind: ViolationKind,
        severity: Severity,
        message: String,
        source: ViolationSource,
    },
    /// Raise the display-only loudness alert
    FlagNoiseAlert,
    /// Start the pause between disqualification and forced submission
    ScheduleDisqualify,
    BeginSubmission,
    Teardown,
}

/// The reducer
pub struct EnforcementMachine {
    phase: Phase,
    disqualify_threshold: u32,
    noise_threshold: u8,
    total: u32,
    submission_in_flight: bool,
    disqualify_scheduled: bool,
}

impl EnforcementMachine {
    pub fn new(disqualify_threshold: u32, noise_threshold: u8) -> Self {
        Self {
            phase: Phase::Setup,
            disqualify_threshold,
            noise_threshold,
            total: 0,
            submission_in_flight: false,
            disqualify_scheduled: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Frame/audio sampling runs only in these phases
    pub fn sampling_active(&self) -> bool {
        matches!(self.phase, Phase::Setup | Phase::Active | Phase::Violating)
    }

    /// Surface checks run only once the grace period has elapsed
    pub fn enforcing(&self) -> bool {
        matches!(self.phase, Phase::Active | Phase::Violating)
    }

    pub fn is_completed(&self) -> bool {
        self.phase == Phase::Completed
    }

    /// Process one event and return the effects to execute
    pub fn handle(&mut self, event: EngineEvent) -> Vec<Action> {
        match event {
            EngineEvent::GraceElapsed => {
                if self.phase != Phase::Setup {
                    return vec![];
                }
                self.phase = Phase::Active;
                vec![Action::EngageGuards, Action::RequestFullscreen]
            }

            EngineEvent::FullscreenPoll { fullscreen } => {
                if !self.enforcing() || fullscreen {
                    return vec![];
                }
                vec![
                    local_violation(ViolationKind::FullscreenExit, "Fullscreen exited"),
                    Action::RequestFullscreen,
                ]
            }

            EngineEvent::Surface(event) => {
                if !self.enforcing() {
                    return vec![];
                }
                match event {
                    SurfaceEvent::VisibilityLost => {
                        vec![local_violation(
                            ViolationKind::TabSwitch,
                            "Tab or window switched",
                        )]
                    }
                    SurfaceEvent::WindowBlur => {
                        vec![local_violation(
                            ViolationKind::WindowBlur,
                            "Exam window lost focus",
                        )]
                    }
                    SurfaceEvent::FullscreenExited => vec![
                        local_violation(ViolationKind::FullscreenExit, "Fullscreen exited"),
                        Action::RequestFullscreen,
                    ],
                    SurfaceEvent::BlockedShortcut(key) => {
                        vec![local_violation(
                            ViolationKind::BlockedShortcut,
                            format!("Blocked shortcut: {}", key),
                        )]
                    }
                    SurfaceEvent::ClipboardBlocked => {
                        vec![local_violation(
                            ViolationKind::ClipboardBlocked,
                            "Copy/paste attempt blocked",
                        )]
                    }
                    // Blocked by the surface itself; not a violation
                    SurfaceEvent::BackNavigation => vec![],
                }
            }

            EngineEvent::RemoteFindings(findings) => {
                if !self.enforcing() {
                    return vec![];
                }
                findings
                    .into_iter()
                    .map(|finding| Action::RecordViolation {
                        kind: finding.kind,
                        severity: finding.severity,
                        message: finding.message,
                        source: ViolationSource::RemoteAnalysis,
                    })
                    .collect()
            }

            EngineEvent::AudioLevel(level) => {
                if self.enforcing() && level > self.noise_threshold {
                    vec![Action::FlagNoiseAlert]
                } else {
                    vec![]
                }
            }

            EngineEvent::ViolationAccepted { total } => {
                self.total = total;
                if self.phase == Phase::Active {
                    self.phase = Phase::Violating;
                }
                if matches!(self.phase, Phase::Active | Phase::Violating)
                    && self.total >= self.disqualify_threshold
                    && !self.disqualify_scheduled
                {
                    self.disqualify_scheduled = true;
                    self.phase = Phase::Disqualifying;
                    return vec![Action::ScheduleDisqualify];
                }
                vec![]
            }

            EngineEvent::AlertWindowElapsed => {
                if self.phase == Phase::Violating {
                    self.phase = Phase::Active;
                }
                vec![]
            }

            EngineEvent::DisqualifyDelayElapsed => {
                if self.phase != Phase::Disqualifying {
                    return vec![];
                }
                self.begin_submission()
            }

            EngineEvent::CountdownTick { remaining_secs } => {
                if remaining_secs > 0 {
                    return vec![];
                }
                match self.phase {
                    Phase::Setup | Phase::Active | Phase::Violating | Phase::Disqualifying => {
                        self.begin_submission()
                    }
                    // Already submitting or done; repeated zero ticks are no-ops
                    Phase::Submitting | Phase::Completed => vec![],
                }
            }

            EngineEvent::SubmitRequested => match self.phase {
                Phase::Setup | Phase::Active | Phase::Violating => self.begin_submission(),
                // Retry after a failed submission
                Phase::Submitting if !self.submission_in_flight => self.begin_submission(),
                _ => vec![],
            },

            EngineEvent::SubmissionSucceeded => {
                if self.phase != Phase::Submitting {
                    return vec![];
                }
                self.submission_in_flight = false;
                self.phase = Phase::Completed;
                vec![Action::Teardown]
            }

            EngineEvent::SubmissionFailed => {
                // Stay in Submitting with the answer map intact; the user
                // gets a retry affordance
                self.submission_in_flight = false;
                vec![]
            }

            EngineEvent::StopRequested => {
                if self.phase == Phase::Completed {
                    return vec![];
                }
                self.phase = Phase::Completed;
                vec![Action::Teardown]
            }
        }
    }

    fn begin_submission(&mut self) -> Vec<Action> {
        if self.submission_in_flight {
            return vec![];
        }
        self.submission_in_flight = true;
        self.phase = Phase::Submitting;
        vec![Action::BeginSubmission]
    }
}

fn local_violation(kind: ViolationKind, message: impl Into<String>) -> Action {
    Action::RecordViolation {
        kind,
        severity: Severity::Medium,
        message: message.into(),
        source: ViolationSource::LocalHeuristic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> EnforcementMachine {
        EnforcementMachine::new(3, 160)
    }

    fn active_machine() -> EnforcementMachine {
        let mut m = machine();
        m.handle(EngineEvent::GraceElapsed);
        assert_eq!(m.phase(), Phase::Active);
        m
    }

    fn count_submissions(actions: &[Action]) -> usize {
        actions
            .iter()
            .filter(|a| **a == Action::BeginSubmission)
            .count()
    }

    #[test]
    fn test_grace_elapsed_activates_enforcement() {
        let mut m = machine();
        let actions = m.handle(EngineEvent::GraceElapsed);
        assert_eq!(m.phase(), Phase::Active);
        assert!(actions.contains(&Action::EngageGuards));
        assert!(actions.contains(&Action::RequestFullscreen));
    }

    #[test]
    fn test_surface_events_ignored_during_grace() {
        let mut m = machine();
        let actions = m.handle(EngineEvent::Surface(SurfaceEvent::VisibilityLost));
        assert!(actions.is_empty());
        assert_eq!(m.phase(), Phase::Setup);
    }

    #[test]
    fn test_fullscreen_departure_records_and_rerequests() {
        let mut m = active_machine();
        let actions = m.handle(EngineEvent::FullscreenPoll { fullscreen: false });
        assert_eq!(actions.len(), 2);
        assert!(matches!(
            actions[0],
            Action::RecordViolation {
                kind: ViolationKind::FullscreenExit,
                ..
            }
        ));
        assert_eq!(actions[1], Action::RequestFullscreen);
    }

    #[test]
    fn test_fullscreen_poll_while_fullscreen_is_quiet() {
        let mut m = active_machine();
        assert!(m
            .handle(EngineEvent::FullscreenPoll { fullscreen: true })
            .is_empty());
    }

    #[test]
    fn test_accepted_violation_shows_violating_then_recovers() {
        let mut m = active_machine();
        m.handle(EngineEvent::ViolationAccepted { total: 1 });
        assert_eq!(m.phase(), Phase::Violating);

        m.handle(EngineEvent::AlertWindowElapsed);
        assert_eq!(m.phase(), Phase::Active);
    }

    #[test]
    fn test_threshold_disqualifies_and_submits_once_after_delay() {
        let mut m = active_machine();
        m.handle(EngineEvent::ViolationAccepted { total: 1 });
        m.handle(EngineEvent::ViolationAccepted { total: 2 });
        assert_eq!(m.phase(), Phase::Violating);

        let actions = m.handle(EngineEvent::ViolationAccepted { total: 3 });
        assert_eq!(m.phase(), Phase::Disqualifying);
        assert_eq!(actions, vec![Action::ScheduleDisqualify]);

        // Further violations do not reschedule
        assert!(m
            .handle(EngineEvent::ViolationAccepted { total: 4 })
            .is_empty());

        let actions = m.handle(EngineEvent::DisqualifyDelayElapsed);
        assert_eq!(count_submissions(&actions), 1);
        assert_eq!(m.phase(), Phase::Submitting);

        // A stray second delay elapse is a no-op
        assert!(m.handle(EngineEvent::DisqualifyDelayElapsed).is_empty());
    }

    #[test]
    fn test_countdown_zero_submits_exactly_once() {
        let mut m = active_machine();
        let first = m.handle(EngineEvent::CountdownTick { remaining_secs: 0 });
        assert_eq!(count_submissions(&first), 1);
        assert_eq!(m.phase(), Phase::Submitting);

        // Multiple ticks observing zero stay idempotent
        assert!(m
            .handle(EngineEvent::CountdownTick { remaining_secs: 0 })
            .is_empty());
        assert!(m
            .handle(EngineEvent::CountdownTick { remaining_secs: -1 })
            .is_empty());
    }

    #[test]
    fn test_duplicate_submit_request_ignored_while_in_flight() {
        let mut m = active_machine();
        assert_eq!(count_submissions(&m.handle(EngineEvent::SubmitRequested)), 1);
        assert!(m.handle(EngineEvent::SubmitRequested).is_empty());
    }

    #[test]
    fn test_failed_submission_allows_retry_and_keeps_phase() {
        let mut m = active_machine();
        m.handle(EngineEvent::SubmitRequested);
        m.handle(EngineEvent::SubmissionFailed);
        assert_eq!(m.phase(), Phase::Submitting);

        let retry = m.handle(EngineEvent::SubmitRequested);
        assert_eq!(count_submissions(&retry), 1);
    }

    #[test]
    fn test_successful_submission_completes_and_tears_down() {
        let mut m = active_machine();
        m.handle(EngineEvent::SubmitRequested);
        let actions = m.handle(EngineEvent::SubmissionSucceeded);
        assert_eq!(m.phase(), Phase::Completed);
        assert_eq!(actions, vec![Action::Teardown]);
        assert!(!m.sampling_active());
    }

    #[test]
    fn test_stop_tears_down_from_any_live_phase() {
        let mut m = active_machine();
        let actions = m.handle(EngineEvent::StopRequested);
        assert_eq!(m.phase(), Phase::Completed);
        assert_eq!(actions, vec![Action::Teardown]);

        // Already completed; stop again is a no-op
        assert!(m.handle(EngineEvent::StopRequested).is_empty());
    }

    #[test]
    fn test_loud_audio_flags_alert_only_when_enforcing() {
        let mut m = machine();
        assert!(m.handle(EngineEvent::AudioLevel(200)).is_empty());

        let mut m = active_machine();
        assert_eq!(
            m.handle(EngineEvent::AudioLevel(200)),
            vec![Action::FlagNoiseAlert]
        );
        assert!(m.handle(EngineEvent::AudioLevel(120)).is_empty());
    }

    #[test]
    fn test_remote_findings_map_to_record_actions() {
        let mut m = active_machine();
        let actions = m.handle(EngineEvent::RemoteFindings(vec![RemoteFinding {
            kind: ViolationKind::MultiplePeople,
            severity: Severity::High,
            message: "Two faces detected".to_string(),
        }]));
        assert!(matches!(
            &actions[0],
            Action::RecordViolation {
                kind: ViolationKind::MultiplePeople,
                source: ViolationSource::RemoteAnalysis,
                ..
            }
        ));
    }

    #[test]
    fn test_sampling_stops_past_violating() {
        let mut m = active_machine();
        assert!(m.sampling_active());
        m.handle(EngineEvent::ViolationAccepted { total: 3 });
        assert_eq!(m.phase(), Phase::Disqualifying);
        assert!(!m.sampling_active());
    }
}
