//! StreamingChannel - Bidirectional Link to the Analysis Service
//!
//! ## Responsibilities
//!
//! - One message-oriented connection per attempt, behind `SignalTransport`
//! - Frame/control message transmission with open-state gating
//! - Analysis message distribution to the engine
//! - Fixed-delay reconnect on abnormal close, stale-generation guarded
//!
//! A clean close (caller stops proctoring) sends the stop control message
//! and never reconnects.

use crate::error::Result;
use crate::signal_encoder::Frame;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub mod ws;

pub use ws::WsTransport;

/// Channel connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

/// Event observed on a transport link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Text message from the analysis service
    Message(String),
    /// Connection ended; clean means the explicit clean-close code
    Closed { clean: bool },
}

/// Message handed to a transport link for transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Text(String),
    Close { clean: bool },
}

/// One live connection as produced by a transport
pub struct TransportLink {
    pub outgoing: mpsc::Sender<OutboundMessage>,
    pub incoming: mpsc::Receiver<TransportEvent>,
}

/// Connection capability for the analysis service
pub trait SignalTransport: Send + 'static {
    fn connect(&mut self, attempt_id: &str)
        -> impl Future<Output = Result<TransportLink>> + Send;
}

/// Client → server frame message
#[derive(Debug, Clone, Serialize)]
pub struct FrameMessage {
    /// Base64 JPEG payload
    pub frame: String,
    /// Current loudness, 0-255
    pub noise_level: u8,
}

impl FrameMessage {
    pub fn new(frame: &Frame, noise_level: u8) -> Self {
        Self {
            frame: base64::engine::general_purpose::STANDARD.encode(&frame.jpeg),
            noise_level,
        }
    }
}

/// Server → client analysis message
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisMessage {
    pub status: String,
    #[serde(default)]
    pub data: Option<AnalysisData>,
    #[serde(default)]
    pub message: Option<String>,
}

impl AnalysisMessage {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Analysis payload for one frame
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisData {
    #[serde(default)]
    pub yaw: f32,
    #[serde(default)]
    pub pitch: f32,
    #[serde(default)]
    pub looking_away: bool,
    #[serde(default)]
    pub phone_detected: bool,
    #[serde(default)]
    pub multiple_people: bool,
    #[serde(default)]
    pub has_violations: bool,
    #[serde(default)]
    pub violations: Vec<RemoteViolation>,
}

/// One violation as reported by the analysis service
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteViolation {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: String,
    pub message: String,
}

/// Event forwarded to the engine
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Analysis(AnalysisMessage),
    StateChanged(ChannelState),
}

enum ChannelCommand {
    Send(FrameMessage),
    CloseClean,
}

/// Handle to one attempt's streaming channel
///
/// Owned exclusively by the enforcement engine. Dropping the handle ends the
/// supervisor; `close_clean` is the intentional-stop path.
pub struct StreamingChannel {
    cmd_tx: mpsc::Sender<ChannelCommand>,
    event_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    state_rx: watch::Receiver<ChannelState>,
    task: Option<JoinHandle<()>>,
}

impl StreamingChannel {
    /// Open the channel for one attempt and start its supervisor
    pub fn open<T: SignalTransport>(
        transport: T,
        attempt_id: impl Into<String>,
        reconnect_delay: Duration,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);

        let supervisor = Supervisor {
            transport,
            attempt_id: attempt_id.into(),
            reconnect_delay,
            generation: 0,
            state_tx,
            event_tx,
        };
        let task = tokio::spawn(supervisor.run(cmd_rx));

        Self {
            cmd_tx,
            event_rx,
            state_rx,
            task: Some(task),
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }

    /// Send a frame message; a no-op with a warning unless the channel is open
    pub async fn send(&self, message: FrameMessage) {
        if self.state() != ChannelState::Open {
            tracing::warn!(state = ?self.state(), "Channel not open - frame dropped");
            return;
        }
        let _ = self.cmd_tx.send(ChannelCommand::Send(message)).await;
    }

    /// Next channel event; None once the channel is closed for good
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.event_rx.recv().await
    }

    /// Intentional stop: send the stop control message, close cleanly,
    /// suppress reconnection
    pub async fn close_clean(&mut self) {
        let _ = self.cmd_tx.send(ChannelCommand::CloseClean).await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

struct Supervisor<T: SignalTransport> {
    transport: T,
    attempt_id: String,
    reconnect_delay: Duration,
    /// Bumped on every successful connect; pending reconnects remember the
    /// generation that scheduled them and are discarded once outdated
    generation: u64,
    state_tx: watch::Sender<ChannelState>,
    event_tx: mpsc::UnboundedSender<ChannelEvent>,
}

/// A reconnect fires only if no newer connection has replaced the one that
/// scheduled it
fn reconnect_is_stale(scheduled_generation: u64, current_generation: u64) -> bool {
    scheduled_generation != current_generation
}

impl<T: SignalTransport> Supervisor<T> {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<ChannelCommand>) {
        let mut outgoing: Option<mpsc::Sender<OutboundMessage>> = None;
        let mut incoming: Option<mpsc::Receiver<TransportEvent>> = None;
        let mut pending_reconnect: Option<(u64, Instant)> = None;

        match self.connect().await {
            Ok(link) => {
                outgoing = Some(link.outgoing);
                incoming = Some(link.incoming);
            }
            Err(e) => {
                tracing::warn!(attempt_id = %self.attempt_id, error = %e, "Channel connect failed");
                pending_reconnect = self.schedule_reconnect();
            }
        }

        loop {
            let reconnect_at = pending_reconnect
                .map(|(_, at)| at)
                .unwrap_or_else(far_future);

            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(ChannelCommand::Send(message)) => {
                        let Some(tx) = outgoing.as_ref() else {
                            tracing::warn!("Channel not open - frame dropped");
                            continue;
                        };
                        match serde_json::to_string(&message) {
                            Ok(text) => {
                                if tx.send(OutboundMessage::Text(text)).await.is_err() {
                                    tracing::warn!("Channel link gone - frame dropped");
                                }
                            }
                            Err(e) => tracing::error!(error = %e, "Failed to serialize frame message"),
                        }
                    }
                    Some(ChannelCommand::CloseClean) | None => {
                        if let Some(tx) = outgoing.take() {
                            let _ = tx
                                .send(OutboundMessage::Text(json!({"action": "stop"}).to_string()))
                                .await;
                            let _ = tx.send(OutboundMessage::Close { clean: true }).await;
                        }
                        self.set_state(ChannelState::Closed);
                        break;
                    }
                },

                event = async { incoming.as_mut().expect("guarded").recv().await },
                    if incoming.is_some() =>
                {
                    match event {
                        Some(TransportEvent::Message(text)) => self.handle_message(&text),
                        Some(TransportEvent::Closed { clean: true }) => {
                            tracing::info!(attempt_id = %self.attempt_id, "Channel closed cleanly");
                            self.set_state(ChannelState::Closed);
                            break;
                        }
                        Some(TransportEvent::Closed { clean: false }) | None => {
                            tracing::warn!(attempt_id = %self.attempt_id, "Channel closed abnormally");
                            outgoing = None;
                            incoming = None;
                            pending_reconnect = self.schedule_reconnect();
                        }
                    }
                }

                _ = tokio::time::sleep_until(reconnect_at), if pending_reconnect.is_some() => {
                    let (scheduled, _) = pending_reconnect.take().expect("guarded");
                    if reconnect_is_stale(scheduled, self.generation) {
                        tracing::debug!("Stale reconnect discarded");
                        continue;
                    }
                    match self.connect().await {
                        Ok(link) => {
                            outgoing = Some(link.outgoing);
                            incoming = Some(link.incoming);
                        }
                        Err(e) => {
                            tracing::warn!(attempt_id = %self.attempt_id, error = %e, "Reconnect failed");
                            pending_reconnect = self.schedule_reconnect();
                        }
                    }
                }
            }
        }
    }

    async fn connect(&mut self) -> Result<TransportLink> {
        self.set_state(ChannelState::Connecting);
        let link = self.transport.connect(&self.attempt_id).await?;
        self.generation += 1;
        self.set_state(ChannelState::Open);
        tracing::info!(
            attempt_id = %self.attempt_id,
            generation = self.generation,
            "Channel open"
        );
        Ok(link)
    }

    fn schedule_reconnect(&self) -> Option<(u64, Instant)> {
        self.set_state(ChannelState::Reconnecting);
        tracing::info!(
            delay_ms = self.reconnect_delay.as_millis() as u64,
            "Reconnect scheduled"
        );
        Some((self.generation, Instant::now() + self.reconnect_delay))
    }

    fn handle_message(&self, text: &str) {
        match serde_json::from_str::<AnalysisMessage>(text) {
            Ok(message) => {
                if !message.is_success() {
                    // Failed analyses are logged and otherwise ignored
                    tracing::warn!(
                        message = message.message.as_deref().unwrap_or("unknown"),
                        "Analysis service reported an error"
                    );
                    return;
                }
                let _ = self.event_tx.send(ChannelEvent::Analysis(message));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Unparseable analysis message dropped");
            }
        }
    }

    fn set_state(&self, state: ChannelState) {
        if *self.state_tx.borrow() != state {
            let _ = self.state_tx.send(state);
            let _ = self.event_tx.send(ChannelEvent::StateChanged(state));
        }
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400)
}
