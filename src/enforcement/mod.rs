//! Enforcement - Exam-Integrity Engine
//!
//! ## Responsibilities
//!
//! - Own the media session, streaming channel, surface, and every timer
//! - Run the single event loop that mutates all per-attempt state
//! - Execute reducer actions: record violations, re-request fullscreen,
//!   schedule disqualification, run submission, tear down
//!
//! Teardown (guards released, channel closed cleanly with the stop control
//! message, media released, timers dropped) runs once, whichever exit path
//! triggers it: normal submit, timeout, disqualification, or manual stop.

use crate::attempt_api::{AttemptApi, AttemptResult, LogEventRequest};
use crate::attempt_controller::{AttemptCommand, AttemptNotice, AttemptOutcome, AttemptSession, AttemptStatus};
use crate::exam_surface::ExamSurface;
use crate::media_capture::MediaSession;
use crate::policy::EnforcementPolicy;
use crate::signal_encoder::{AudioAnalyzer, FrameEncoder};
use crate::streaming_channel::{
    AnalysisMessage, ChannelEvent, FrameMessage, StreamingChannel,
};
use crate::violation_aggregator::{
    Severity, ViolationAggregator, ViolationEvent, ViolationKind,
};
use chrono::Utc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

pub mod machine;

pub use machine::{Action, EngineEvent, EnforcementMachine, Phase, RemoteFinding};

/// Outcome of a spawned submission request
enum SubmissionOutcome {
    Succeeded(AttemptResult),
    Failed(String),
}

/// The enforcement engine for one attempt
///
/// Everything here is owned exclusively by the engine task; no other
/// component holds a long-lived reference to the media session, the
/// channel, or any timer.
pub struct EnforcementEngine {
    policy: EnforcementPolicy,
    machine: EnforcementMachine,
    aggregator: ViolationAggregator,
    session: AttemptSession,
    media: MediaSession,
    channel: StreamingChannel,
    surface: Box<dyn ExamSurface>,
    api: AttemptApi,
    encoder: FrameEncoder,
    analyzer: AudioAnalyzer,
    cmd_rx: mpsc::Receiver<AttemptCommand>,
    notice_tx: mpsc::UnboundedSender<AttemptNotice>,
    submission_tx: mpsc::UnboundedSender<SubmissionOutcome>,
    submission_rx: mpsc::UnboundedReceiver<SubmissionOutcome>,
    alert_deadline: Option<Instant>,
    disqualify_deadline: Option<Instant>,
    last_phase: Phase,
    last_noise: u8,
    result: Option<AttemptResult>,
    disqualified: bool,
    torn_down: bool,
}

impl EnforcementEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        policy: EnforcementPolicy,
        session: AttemptSession,
        media: MediaSession,
        channel: StreamingChannel,
        surface: Box<dyn ExamSurface>,
        api: AttemptApi,
        cmd_rx: mpsc::Receiver<AttemptCommand>,
        notice_tx: mpsc::UnboundedSender<AttemptNotice>,
    ) -> Self {
        let machine =
            EnforcementMachine::new(policy.disqualify_threshold, policy.noise_threshold);
        let aggregator = ViolationAggregator::new(&policy);
        let (submission_tx, submission_rx) = mpsc::unbounded_channel();

        Self {
            policy,
            machine,
            aggregator,
            session,
            media,
            channel,
            surface,
            api,
            encoder: FrameEncoder::new(),
            analyzer: AudioAnalyzer::new(),
            cmd_rx,
            notice_tx,
            submission_tx,
            submission_rx,
            alert_deadline: None,
            disqualify_deadline: None,
            last_phase: Phase::Setup,
            last_noise: 0,
            result: None,
            disqualified: false,
            torn_down: false,
        }
    }

    /// Run enforcement to completion
    pub async fn run(mut self) -> AttemptOutcome {
        tracing::info!(attempt_id = %self.session.id, "Enforcement started");

        let mut surface_events = self.surface.events();

        let grace = tokio::time::sleep(self.policy.grace_period());
        tokio::pin!(grace);
        let mut grace_done = false;

        let mut fullscreen_poll = delayed_interval(self.policy.fullscreen_poll());
        let mut frame_tick = delayed_interval(self.policy.frame_interval());
        let mut audio_tick = delayed_interval(self.policy.audio_interval());
        let mut countdown = tokio::time::interval(Duration::from_secs(1));
        countdown.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut channel_done = false;

        loop {
            let alert_at = self.alert_deadline.unwrap_or_else(far_future);
            let disqualify_at = self.disqualify_deadline.unwrap_or_else(far_future);

            tokio::select! {
                _ = &mut grace, if !grace_done => {
                    grace_done = true;
                    self.dispatch(EngineEvent::GraceElapsed).await;
                }

                _ = fullscreen_poll.tick(), if self.machine.enforcing() => {
                    let fullscreen = self.surface.is_fullscreen();
                    self.dispatch(EngineEvent::FullscreenPoll { fullscreen }).await;
                }

                _ = frame_tick.tick(), if self.machine.sampling_active() => {
                    self.sample_and_send_frame().await;
                }

                _ = audio_tick.tick(), if self.machine.sampling_active() => {
                    if let Some(sample) = self.analyzer.sample(&mut self.media) {
                        self.last_noise = sample.loudness;
                        self.dispatch(EngineEvent::AudioLevel(sample.loudness)).await;
                    }
                }

                _ = countdown.tick() => {
                    let remaining = self.session.remaining_secs(Utc::now());
                    self.dispatch(EngineEvent::CountdownTick { remaining_secs: remaining }).await;
                }

                Some(event) = surface_events.recv() => {
                    self.dispatch(EngineEvent::Surface(event)).await;
                }

                event = self.channel.recv(), if !channel_done => {
                    match event {
                        Some(ChannelEvent::Analysis(message)) => {
                            self.handle_analysis(message).await;
                        }
                        Some(ChannelEvent::StateChanged(state)) => {
                            tracing::debug!(state = ?state, "Channel state changed");
                        }
                        None => channel_done = true,
                    }
                }

                Some(command) = self.cmd_rx.recv() => {
                    self.handle_command(command).await;
                }

                Some(outcome) = self.submission_rx.recv() => {
                    self.handle_submission_outcome(outcome).await;
                }

                _ = tokio::time::sleep_until(alert_at), if self.alert_deadline.is_some() => {
                    self.alert_deadline = None;
                    self.aggregator.expire_alerts(Utc::now());
                    self.dispatch(EngineEvent::AlertWindowElapsed).await;
                }

                _ = tokio::time::sleep_until(disqualify_at), if self.disqualify_deadline.is_some() => {
                    self.disqualify_deadline = None;
                    self.dispatch(EngineEvent::DisqualifyDelayElapsed).await;
                }
            }

            if self.machine.is_completed() {
                break;
            }
        }

        // Belt for exit paths that bypass the Teardown action
        self.teardown().await;

        let _ = self.notice_tx.send(AttemptNotice::Completed {
            result: self.result.clone(),
        });
        tracing::info!(
            attempt_id = %self.session.id,
            total_violations = self.aggregator.tally().total(),
            disqualified = self.disqualified,
            "Enforcement finished"
        );

        AttemptOutcome {
            attempt_id: self.session.id.clone(),
            answers: self.session.answers.clone(),
            tally: self.aggregator.tally().clone(),
            result: self.result.clone(),
            disqualified: self.disqualified,
        }
    }

    /// Feed one event through the reducer and execute its actions
    async fn dispatch(&mut self, event: EngineEvent) {
        let actions = self.machine.handle(event);
        for action in actions {
            self.execute(action).await;
        }
        self.sync_phase();
    }

    async fn execute(&mut self, action: Action) {
        match action {
            Action::EngageGuards => {
                self.surface.set_guards(true);
            }

            Action::RequestFullscreen => {
                self.surface.request_fullscreen();
            }

            Action::RecordViolation {
                kind,
                severity,
                message,
                source,
            } => {
                let event = ViolationEvent::new(kind, severity, message, source);
                self.record_violation(event);
            }

            Action::FlagNoiseAlert => {
                self.aggregator
                    .flag_alert(ViolationKind::ExcessiveNoise, Utc::now());
                self.alert_deadline = Some(Instant::now() + self.policy.alert_cooldown());
                let _ = self
                    .notice_tx
                    .send(AttemptNotice::NoiseAlert(self.last_noise));
            }

            Action::ScheduleDisqualify => {
                self.schedule_disqualify();
            }

            Action::BeginSubmission => {
                self.begin_submission();
            }

            Action::Teardown => {
                self.teardown().await;
            }
        }
    }

    /// Record through the aggregator; tally increment and the threshold
    /// check stay synchronous with the causing event
    fn record_violation(&mut self, event: ViolationEvent) {
        if !self.aggregator.record(event.clone()) {
            return;
        }

        // Persist against the attempt; a log failure never affects the tally
        let api = self.api.clone();
        let attempt_id = self.session.id.clone();
        let request = LogEventRequest::from(&event);
        tokio::spawn(async move {
            if let Err(e) = api.log_event(&attempt_id, &request).await {
                tracing::warn!(attempt_id = %attempt_id, error = %e, "Violation log failed");
            }
        });

        let _ = self.notice_tx.send(AttemptNotice::Violation(event));
        self.alert_deadline = Some(Instant::now() + self.policy.alert_cooldown());

        let total = self.aggregator.tally().total();
        let follow_ups = self
            .machine
            .handle(EngineEvent::ViolationAccepted { total });
        for action in follow_ups {
            // The only follow-up the reducer produces here
            if action == Action::ScheduleDisqualify {
                self.schedule_disqualify();
            }
        }
    }

    fn schedule_disqualify(&mut self) {
        self.disqualified = true;
        self.disqualify_deadline = Some(Instant::now() + self.policy.disqualify_delay());
        tracing::warn!(
            attempt_id = %self.session.id,
            total = self.aggregator.tally().total(),
            "Violation threshold reached - disqualifying"
        );
    }

    async fn sample_and_send_frame(&mut self) {
        match self.encoder.sample(&mut self.media) {
            Ok(Some(frame)) => {
                let message = FrameMessage::new(&frame, self.last_noise);
                self.channel.send(message).await;
            }
            // Video not ready or degraded away; a no-op tick
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Frame encode failed");
            }
        }
    }

    async fn handle_analysis(&mut self, message: AnalysisMessage) {
        let Some(data) = message.data else {
            return;
        };
        if !data.has_violations {
            return;
        }

        let findings: Vec<RemoteFinding> = data
            .violations
            .iter()
            .filter_map(|violation| {
                let Some(kind) = ViolationKind::from_remote(&violation.kind) else {
                    tracing::debug!(kind = %violation.kind, "Unknown remote violation kind");
                    return None;
                };
                Some(RemoteFinding {
                    kind,
                    severity: Severity::from_remote(&violation.severity),
                    message: violation.message.clone(),
                })
            })
            .collect();

        if !findings.is_empty() {
            self.dispatch(EngineEvent::RemoteFindings(findings)).await;
        }
    }

    async fn handle_command(&mut self, command: AttemptCommand) {
        match command {
            AttemptCommand::Answer {
                question_id,
                answer,
            } => {
                if self.session.status != AttemptStatus::Completed {
                    self.session.answers.insert(question_id, answer);
                }
            }
            AttemptCommand::GotoQuestion(index) => {
                if index < self.session.question_ids.len() {
                    self.session.current_question = index;
                }
            }
            AttemptCommand::NextQuestion => {
                let last = self.session.question_ids.len().saturating_sub(1);
                if self.session.current_question < last {
                    self.session.current_question += 1;
                }
            }
            AttemptCommand::PreviousQuestion => {
                self.session.current_question = self.session.current_question.saturating_sub(1);
            }
            AttemptCommand::Submit => {
                self.dispatch(EngineEvent::SubmitRequested).await;
            }
            AttemptCommand::Stop => {
                self.dispatch(EngineEvent::StopRequested).await;
            }
        }
    }

    /// Spawn the submission request; the outcome comes back as an event
    fn begin_submission(&mut self) {
        let api = self.api.clone();
        let attempt_id = self.session.id.clone();
        let answers = self.session.answers.clone();
        let tx = self.submission_tx.clone();
        tracing::info!(
            attempt_id = %attempt_id,
            answers = answers.len(),
            "Submitting attempt"
        );

        tokio::spawn(async move {
            let outcome = match api.submit(&attempt_id, &answers).await {
                Ok(result) => SubmissionOutcome::Succeeded(result),
                Err(e) => SubmissionOutcome::Failed(e.to_string()),
            };
            let _ = tx.send(outcome);
        });
    }

    async fn handle_submission_outcome(&mut self, outcome: SubmissionOutcome) {
        match outcome {
            SubmissionOutcome::Succeeded(result) => {
                tracing::info!(attempt_id = %self.session.id, score = result.score, "Attempt submitted");
                self.result = Some(result);
                self.dispatch(EngineEvent::SubmissionSucceeded).await;
            }
            SubmissionOutcome::Failed(message) => {
                // Answers and tally stay intact; the user may retry
                tracing::error!(attempt_id = %self.session.id, error = %message, "Submission failed");
                let _ = self
                    .notice_tx
                    .send(AttemptNotice::SubmissionFailed(message));
                self.dispatch(EngineEvent::SubmissionFailed).await;
            }
        }
    }

    fn sync_phase(&mut self) {
        let phase = self.machine.phase();
        if phase != self.last_phase {
            self.last_phase = phase;
            self.session.status = AttemptStatus::from_phase(phase);
            let _ = self.notice_tx.send(AttemptNotice::PhaseChanged(phase));
        }
    }

    /// Scoped teardown; runs once whatever triggered it
    async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        tracing::info!(attempt_id = %self.session.id, "Enforcement teardown");
        self.surface.set_guards(false);
        self.channel.close_clean().await;
        self.media.release();
        self.alert_deadline = None;
        self.disqualify_deadline = None;
    }
}

/// Interval that first fires one period from now
fn delayed_interval(period: Duration) -> tokio::time::Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400)
}
