//! AttemptApi - Attempt Service Adapter
//!
//! ## Responsibilities
//!
//! - Start attempts (id, question set, duration, policy restrictions)
//! - Persist violation events against the attempt
//! - Submit the answer map and fetch results
//!
//! All persisted state (answers, violation log) lives in the attempt
//! service; this adapter holds nothing.

use crate::error::{Error, Result};
use crate::policy::EnforcementPolicy;
use crate::violation_aggregator::{Severity, ViolationEvent, ViolationKind, ViolationSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Attempt service client
#[derive(Clone)]
pub struct AttemptApi {
    client: reqwest::Client,
    base_url: String,
}

/// Start-attempt request
#[derive(Debug, Clone, Serialize)]
pub struct StartAttemptRequest {
    pub exam_id: String,
    pub user_id: String,
}

/// Start-attempt response
#[derive(Debug, Clone, Deserialize)]
pub struct StartAttemptResponse {
    pub attempt_id: String,
    pub question_ids: Vec<String>,
    pub duration_secs: u64,
    /// Enforcement policy overrides for this exam, if any
    #[serde(default)]
    pub restrictions: Option<EnforcementPolicy>,
}

/// Violation event as persisted against the attempt
#[derive(Debug, Clone, Serialize)]
pub struct LogEventRequest {
    pub event_id: Uuid,
    pub kind: ViolationKind,
    pub severity: Severity,
    pub message: String,
    pub source: ViolationSource,
    pub timestamp: DateTime<Utc>,
}

impl From<&ViolationEvent> for LogEventRequest {
    fn from(event: &ViolationEvent) -> Self {
        Self {
            event_id: event.event_id,
            kind: event.kind,
            severity: event.severity,
            message: event.message.clone(),
            source: event.source,
            timestamp: event.timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct SubmitRequest<'a> {
    answers: &'a HashMap<String, String>,
}

/// Result summary returned on submission
#[derive(Debug, Clone, Deserialize)]
pub struct AttemptResult {
    pub score: f64,
    pub max_score: f64,
    #[serde(default)]
    pub passed: bool,
}

impl AttemptApi {
    pub fn new(base_url: String) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(15))
    }

    pub fn with_timeout(base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { client, base_url }
    }

    /// Start an attempt, retrying transient failures with backoff
    pub async fn start_attempt(&self, request: &StartAttemptRequest) -> Result<StartAttemptResponse> {
        let url = format!("{}/api/attempts/start", self.base_url);

        let mut last_error = None;
        for attempt in 0..3u32 {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(200 * 2u64.pow(attempt))).await;
            }
            match self.client.post(&url).json(request).send().await {
                Ok(resp) if resp.status().is_success() => {
                    return Ok(resp.json().await?);
                }
                Ok(resp) => {
                    last_error = Some(Error::Api(format!(
                        "attempt start failed: {}",
                        resp.status()
                    )));
                }
                Err(e) => last_error = Some(Error::from(e)),
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Api("attempt start failed".to_string())))
    }

    /// Persist one violation event; callers treat failures as non-fatal
    pub async fn log_event(&self, attempt_id: &str, event: &LogEventRequest) -> Result<()> {
        let url = format!("{}/api/attempts/{}/events", self.base_url, attempt_id);
        let resp = self.client.post(&url).json(event).send().await?;

        if !resp.status().is_success() {
            return Err(Error::Api(format!(
                "event log failed: {}",
                resp.status()
            )));
        }
        Ok(())
    }

    /// Submit the answer map
    pub async fn submit(
        &self,
        attempt_id: &str,
        answers: &HashMap<String, String>,
    ) -> Result<AttemptResult> {
        let url = format!("{}/api/attempts/{}/submit", self.base_url, attempt_id);
        let resp = self
            .client
            .post(&url)
            .json(&SubmitRequest { answers })
            .send()
            .await
            .map_err(|e| Error::Submission(format!("submit request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::Submission(format!(
                "submit rejected: {}",
                resp.status()
            )));
        }

        resp.json()
            .await
            .map_err(|e| Error::Submission(format!("unreadable submit response: {}", e)))
    }

    /// Fetch the result of a completed attempt
    pub async fn results(&self, attempt_id: &str) -> Result<AttemptResult> {
        let url = format!("{}/api/attempts/{}/results", self.base_url, attempt_id);
        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(Error::Api(format!(
                "results fetch failed: {}",
                resp.status()
            )));
        }

        Ok(resp.json().await?)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}
