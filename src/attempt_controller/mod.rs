//! AttemptController - Exam Attempt Lifecycle
//!
//! ## Responsibilities
//!
//! - Start the attempt against the attempt service and build the session
//! - Start/stop the whole enforcement pipeline
//! - Expose answering, navigation, submission, and stop as commands
//! - Surface enforcement notices and the final outcome
//!
//! The controller is a handle; all state lives in the engine task
//! (`enforcement`), which is the only place the session is mutated.

use crate::attempt_api::{AttemptApi, AttemptResult, StartAttemptRequest};
use crate::enforcement::machine::Phase;
use crate::enforcement::EnforcementEngine;
use crate::error::{Error, Result};
use crate::exam_surface::ExamSurface;
use crate::media_capture::{acquire_degraded, MediaConstraints, MediaSource};
use crate::streaming_channel::{SignalTransport, StreamingChannel};
use crate::violation_aggregator::{ViolationEvent, ViolationTally};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Attempt status; transitions are one-directional
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Setup,
    Active,
    Submitting,
    Completed,
}

impl AttemptStatus {
    pub fn from_phase(phase: Phase) -> Self {
        match phase {
            Phase::Setup => AttemptStatus::Setup,
            Phase::Active | Phase::Violating | Phase::Disqualifying => AttemptStatus::Active,
            Phase::Submitting => AttemptStatus::Submitting,
            Phase::Completed => AttemptStatus::Completed,
        }
    }
}

/// One test-taking session
#[derive(Debug, Clone)]
pub struct AttemptSession {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub status: AttemptStatus,
    pub question_ids: Vec<String>,
    pub current_question: usize,
    pub answers: HashMap<String, String>,
}

impl AttemptSession {
    pub fn new(id: String, question_ids: Vec<String>, duration_secs: u64) -> Self {
        let started_at = Utc::now();
        Self {
            id,
            started_at,
            deadline: started_at + Duration::seconds(duration_secs as i64),
            status: AttemptStatus::Setup,
            question_ids,
            current_question: 0,
            answers: HashMap::new(),
        }
    }

    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.deadline - now).num_seconds()
    }
}

/// Commands accepted by the engine task
#[derive(Debug, Clone)]
pub enum AttemptCommand {
    Answer { question_id: String, answer: String },
    GotoQuestion(usize),
    NextQuestion,
    PreviousQuestion,
    Submit,
    Stop,
}

/// Progress notices emitted by the engine task
#[derive(Debug, Clone)]
pub enum AttemptNotice {
    PhaseChanged(Phase),
    Violation(ViolationEvent),
    /// Display-only loudness alert with the measured level
    NoiseAlert(u8),
    /// Submission failed; retryable, answers preserved
    SubmissionFailed(String),
    Completed { result: Option<AttemptResult> },
}

/// Final state of one attempt
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    pub attempt_id: String,
    pub answers: HashMap<String, String>,
    pub tally: ViolationTally,
    pub result: Option<AttemptResult>,
    pub disqualified: bool,
}

/// Handle to one running attempt
pub struct AttemptController {
    attempt_id: String,
    cmd_tx: mpsc::Sender<AttemptCommand>,
    notice_rx: mpsc::UnboundedReceiver<AttemptNotice>,
    task: JoinHandle<AttemptOutcome>,
}

impl AttemptController {
    /// Start an attempt and the full enforcement pipeline
    ///
    /// Media acquisition degrades per modality; a denied camera or missing
    /// microphone never blocks the exam.
    pub async fn begin<S, T>(
        api: AttemptApi,
        mut media_source: S,
        transport: T,
        surface: Box<dyn ExamSurface>,
        request: StartAttemptRequest,
        constraints: MediaConstraints,
    ) -> Result<Self>
    where
        S: MediaSource,
        T: SignalTransport,
    {
        let started = api.start_attempt(&request).await?;
        let policy = started.restrictions.clone().unwrap_or_default();
        tracing::info!(
            attempt_id = %started.attempt_id,
            questions = started.question_ids.len(),
            duration_secs = started.duration_secs,
            "Attempt started"
        );

        let session = AttemptSession::new(
            started.attempt_id.clone(),
            started.question_ids,
            started.duration_secs,
        );

        let media = acquire_degraded(&mut media_source, &constraints).await;
        let channel =
            StreamingChannel::open(transport, session.id.clone(), policy.reconnect_delay());

        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        let engine = EnforcementEngine::new(
            policy, session, media, channel, surface, api, cmd_rx, notice_tx,
        );
        let task = tokio::spawn(engine.run());

        Ok(Self {
            attempt_id: started.attempt_id,
            cmd_tx,
            notice_rx,
            task,
        })
    }

    pub fn attempt_id(&self) -> &str {
        &self.attempt_id
    }

    /// Record an answer; kept in memory until submission
    pub async fn answer(&self, question_id: impl Into<String>, answer: impl Into<String>) {
        self.send(AttemptCommand::Answer {
            question_id: question_id.into(),
            answer: answer.into(),
        })
        .await;
    }

    pub async fn goto_question(&self, index: usize) {
        self.send(AttemptCommand::GotoQuestion(index)).await;
    }

    pub async fn next_question(&self) {
        self.send(AttemptCommand::NextQuestion).await;
    }

    pub async fn previous_question(&self) {
        self.send(AttemptCommand::PreviousQuestion).await;
    }

    /// Request submission; ignored while a submission is already in flight
    pub async fn submit(&self) {
        self.send(AttemptCommand::Submit).await;
    }

    /// Stop enforcement and abandon the attempt
    pub async fn stop(&self) {
        self.send(AttemptCommand::Stop).await;
    }

    /// Next progress notice; None once the engine has finished
    pub async fn next_notice(&mut self) -> Option<AttemptNotice> {
        self.notice_rx.recv().await
    }

    /// Wait for the attempt to finish and return its outcome
    pub async fn join(self) -> Result<AttemptOutcome> {
        self.task
            .await
            .map_err(|e| Error::Internal(format!("engine task failed: {}", e)))
    }

    async fn send(&self, command: AttemptCommand) {
        if self.cmd_tx.send(command).await.is_err() {
            tracing::warn!(attempt_id = %self.attempt_id, "Engine gone - command dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_phase_collapses_enforcement_detail() {
        assert_eq!(AttemptStatus::from_phase(Phase::Setup), AttemptStatus::Setup);
        assert_eq!(AttemptStatus::from_phase(Phase::Active), AttemptStatus::Active);
        assert_eq!(
            AttemptStatus::from_phase(Phase::Violating),
            AttemptStatus::Active
        );
        assert_eq!(
            AttemptStatus::from_phase(Phase::Disqualifying),
            AttemptStatus::Active
        );
        assert_eq!(
            AttemptStatus::from_phase(Phase::Submitting),
            AttemptStatus::Submitting
        );
        assert_eq!(
            AttemptStatus::from_phase(Phase::Completed),
            AttemptStatus::Completed
        );
    }

    #[test]
    fn test_session_deadline_from_duration() {
        let session = AttemptSession::new("att-1".to_string(), vec!["q1".to_string()], 60);
        let remaining = session.remaining_secs(session.started_at);
        assert_eq!(remaining, 60);
        assert!(session.remaining_secs(session.deadline + Duration::seconds(5)) < 0);
    }
}
