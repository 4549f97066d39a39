//! WebSocket transport for the analysis service

use super::{OutboundMessage, SignalTransport, TransportEvent, TransportLink};
use crate::error::{Error, Result};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// WebSocket-backed `SignalTransport`
pub struct WsTransport {
    base_url: String,
}

impl WsTransport {
    /// `base_url` is the analysis service root, e.g. `ws://analysis:9000`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    fn url_for(&self, attempt_id: &str) -> String {
        format!(
            "{}/proctor/{}",
            self.base_url.trim_end_matches('/'),
            attempt_id
        )
    }
}

impl SignalTransport for WsTransport {
    async fn connect(&mut self, attempt_id: &str) -> Result<TransportLink> {
        let url = self.url_for(attempt_id);
        let (socket, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::Channel(format!("connect to {} failed: {}", url, e)))?;
        tracing::info!(url = %url, "WebSocket connected");

        let (mut sink, mut stream) = socket.split();
        let (out_tx, mut out_rx) = mpsc::channel::<OutboundMessage>(32);
        let (in_tx, in_rx) = mpsc::channel::<TransportEvent>(32);

        // Write pump
        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                match message {
                    OutboundMessage::Text(text) => {
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    OutboundMessage::Close { clean } => {
                        if clean {
                            let _ = sink
                                .send(Message::Close(Some(CloseFrame {
                                    code: CloseCode::Normal,
                                    reason: "proctoring stopped".into(),
                                })))
                                .await;
                        }
                        break;
                    }
                }
            }
        });

        // Read pump
        tokio::spawn(async move {
            let mut close_reported = false;
            while let Some(result) = stream.next().await {
                match result {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(TransportEvent::Message(text)).await.is_err() {
                            close_reported = true;
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        let clean = frame
                            .map(|f| f.code == CloseCode::Normal)
                            .unwrap_or(false);
                        let _ = in_tx.send(TransportEvent::Closed { clean }).await;
                        close_reported = true;
                        break;
                    }
                    // Ping/pong handled by the library
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "WebSocket read failed");
                        let _ = in_tx.send(TransportEvent::Closed { clean: false }).await;
                        close_reported = true;
                        break;
                    }
                }
            }
            if !close_reported {
                // Socket ended without a close frame
                let _ = in_tx.send(TransportEvent::Closed { clean: false }).await;
            }
        });

        Ok(TransportLink {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}
