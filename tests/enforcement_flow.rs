//! End-to-end enforcement flows against scripted capabilities
//!
//! Uses the simulated media source, a scripted surface, a scripted
//! transport, and a minimal attempt-service stub over a real socket.

use invigilator::attempt_api::{AttemptApi, StartAttemptRequest};
use invigilator::attempt_controller::{AttemptController, AttemptNotice};
use invigilator::enforcement::Phase;
use invigilator::exam_surface::{ScriptedSurface, SurfaceEvent};
use invigilator::media_capture::{MediaConstraints, SimulatedMediaSource};
use invigilator::policy::EnforcementPolicy;
use invigilator::streaming_channel::{
    OutboundMessage, SignalTransport, TransportEvent, TransportLink,
};
use invigilator::violation_aggregator::ViolationKind;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Enforcement policy with timings shrunk for tests
fn fast_policy() -> EnforcementPolicy {
    EnforcementPolicy {
        grace_period_ms: 50,
        disqualify_threshold: 3,
        fullscreen_poll_ms: 50,
        frame_interval_ms: 100,
        audio_interval_ms: 50,
        noise_threshold: 160,
        alert_cooldown_ms: 100,
        dedup_window_ms: 40,
        disqualify_delay_ms: 100,
        reconnect_delay_ms: 200,
    }
}

// ========================================
// Attempt service stub
// ========================================

struct AttemptServer {
    base_url: String,
    submits: Arc<AtomicU32>,
    events: Arc<AtomicU32>,
}

impl AttemptServer {
    /// Serve start/events/submit; the first `fail_submits` submissions
    /// return 500
    async fn spawn(duration_secs: u64, policy: EnforcementPolicy, fail_submits: u32) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let submits = Arc::new(AtomicU32::new(0));
        let events = Arc::new(AtomicU32::new(0));

        let start_body = serde_json::json!({
            "attempt_id": "att-1",
            "question_ids": ["q1", "q2", "q3"],
            "duration_secs": duration_secs,
            "restrictions": policy,
        })
        .to_string();

        let submits_task = submits.clone();
        let events_task = events.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(handle_request(
                    stream,
                    start_body.clone(),
                    submits_task.clone(),
                    events_task.clone(),
                    fail_submits,
                ));
            }
        });

        Self {
            base_url: format!("http://{}", addr),
            submits,
            events,
        }
    }

    fn submits(&self) -> u32 {
        self.submits.load(Ordering::SeqCst)
    }

    fn events(&self) -> u32 {
        self.events.load(Ordering::SeqCst)
    }
}

async fn handle_request(
    mut stream: TcpStream,
    start_body: String,
    submits: Arc<AtomicU32>,
    events: Arc<AtomicU32>,
    fail_submits: u32,
) {
    let mut buf: Vec<u8> = Vec::new();
    let mut tmp = [0u8; 2048];

    let headers_end = loop {
        match stream.read(&mut tmp).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                buf.extend_from_slice(&tmp[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            }
        }
    };

    let head = String::from_utf8_lossy(&buf[..headers_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < headers_end + content_length {
        match stream.read(&mut tmp).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&tmp[..n]),
        }
    }

    let request_line = head.lines().next().unwrap_or_default().to_string();
    let (status, body) = if request_line.starts_with("POST /api/attempts/start") {
        ("200 OK", start_body)
    } else if request_line.contains("/events") {
        events.fetch_add(1, Ordering::SeqCst);
        ("200 OK", r#"{"ok":true}"#.to_string())
    } else if request_line.contains("/submit") {
        let n = submits.fetch_add(1, Ordering::SeqCst);
        if n < fail_submits {
            (
                "500 Internal Server Error",
                r#"{"error":"storage down"}"#.to_string(),
            )
        } else {
            (
                "200 OK",
                r#"{"score": 7.5, "max_score": 10.0, "passed": true}"#.to_string(),
            )
        }
    } else {
        ("404 Not Found", r#"{"error":"not found"}"#.to_string())
    };

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

// ========================================
// Scripted analysis transport
// ========================================

struct TransportShared {
    sent: Mutex<Vec<String>>,
    closes: Mutex<Vec<bool>>,
    event_tx: Mutex<Option<mpsc::Sender<TransportEvent>>>,
}

impl TransportShared {
    fn frame_count(&self) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|text| text.contains("\"frame\""))
            .count()
    }

    fn clean_closes(&self) -> usize {
        self.closes.lock().unwrap().iter().filter(|c| **c).count()
    }

    async fn force_abnormal_close(&self) {
        let tx = self
            .event_tx
            .lock()
            .unwrap()
            .clone()
            .expect("transport connected");
        tx.send(TransportEvent::Closed { clean: false })
            .await
            .expect("close event");
    }

    async fn push_analysis(&self, body: serde_json::Value) {
        let tx = self
            .event_tx
            .lock()
            .unwrap()
            .clone()
            .expect("transport connected");
        tx.send(TransportEvent::Message(body.to_string()))
            .await
            .expect("analysis event");
    }
}

struct ScriptedTransport {
    connects: Arc<AtomicU32>,
    shared: Arc<TransportShared>,
}

impl ScriptedTransport {
    fn new() -> (Self, Arc<TransportShared>, Arc<AtomicU32>) {
        let shared = Arc::new(TransportShared {
            sent: Mutex::new(Vec::new()),
            closes: Mutex::new(Vec::new()),
            event_tx: Mutex::new(None),
        });
        let connects = Arc::new(AtomicU32::new(0));
        (
            Self {
                connects: connects.clone(),
                shared: shared.clone(),
            },
            shared,
            connects,
        )
    }
}

impl SignalTransport for ScriptedTransport {
    async fn connect(&mut self, _attempt_id: &str) -> invigilator::Result<TransportLink> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (out_tx, mut out_rx) = mpsc::channel(64);
        let (in_tx, in_rx) = mpsc::channel(64);
        *self.shared.event_tx.lock().unwrap() = Some(in_tx);

        let shared = self.shared.clone();
        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                match message {
                    OutboundMessage::Text(text) => shared.sent.lock().unwrap().push(text),
                    OutboundMessage::Close { clean } => {
                        shared.closes.lock().unwrap().push(clean);
                        break;
                    }
                }
            }
        });

        Ok(TransportLink {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}

// ========================================
// Helpers
// ========================================

async fn begin(
    server: &AttemptServer,
    transport: ScriptedTransport,
    media_source: SimulatedMediaSource,
) -> (AttemptController, invigilator::exam_surface::SurfaceDriver) {
    let (surface, driver) = ScriptedSurface::new();
    let controller = AttemptController::begin(
        AttemptApi::new(server.base_url.clone()),
        media_source,
        transport,
        Box::new(surface),
        StartAttemptRequest {
            exam_id: "exam-1".to_string(),
            user_id: "user-1".to_string(),
        },
        MediaConstraints::default(),
    )
    .await
    .expect("attempt start");
    (controller, driver)
}

async fn wait_for_phase(controller: &mut AttemptController, want: Phase) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(notice) = controller.next_notice().await {
            if let AttemptNotice::PhaseChanged(phase) = notice {
                if phase == want {
                    return;
                }
            }
        }
        panic!("engine finished before reaching {:?}", want);
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {:?}", want));
}

async fn wait_for<F>(controller: &mut AttemptController, mut predicate: F) -> AttemptNotice
where
    F: FnMut(&AttemptNotice) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(notice) = controller.next_notice().await {
            if predicate(&notice) {
                return notice;
            }
        }
        panic!("engine finished before the expected notice");
    })
    .await
    .expect("timed out waiting for notice")
}

// ========================================
// Scenarios
// ========================================

#[tokio::test]
async fn three_tab_switches_disqualify_and_auto_submit() {
    let server = AttemptServer::spawn(60, fast_policy(), 0).await;
    let (transport, shared, _connects) = ScriptedTransport::new();
    let (mut controller, driver) = begin(&server, transport, SimulatedMediaSource::new()).await;

    wait_for_phase(&mut controller, Phase::Active).await;

    for _ in 0..3 {
        driver.emit(SurfaceEvent::VisibilityLost);
        tokio::time::sleep(Duration::from_millis(60)).await;
    }

    wait_for(
        &mut controller,
        |n| matches!(n, AttemptNotice::Completed { result: Some(_) }),
    )
    .await;

    let outcome = controller.join().await.expect("outcome");
    assert!(outcome.disqualified);
    assert_eq!(outcome.tally.count(ViolationKind::TabSwitch), 3);
    assert_eq!(outcome.tally.total(), 3);
    assert!(outcome.result.expect("result").passed);
    assert_eq!(server.submits(), 1);

    // Teardown closed the channel cleanly
    assert_eq!(shared.clean_closes(), 1);

    // All three violations were forwarded to the attempt-event log
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.events(), 3);
}

#[tokio::test]
async fn denied_camera_degrades_but_exam_reaches_active() {
    let server = AttemptServer::spawn(60, fast_policy(), 0).await;
    let (transport, shared, _connects) = ScriptedTransport::new();
    let (mut controller, _driver) = begin(
        &server,
        transport,
        SimulatedMediaSource::new().deny_video(),
    )
    .await;

    wait_for_phase(&mut controller, Phase::Active).await;

    // No frames can be produced in degraded mode
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(shared.frame_count(), 0);

    controller.stop().await;
    let outcome = controller.join().await.expect("outcome");
    assert!(!outcome.disqualified);
    assert!(outcome.result.is_none());
    assert_eq!(outcome.tally.total(), 0);
}

#[tokio::test]
async fn frames_flow_only_while_channel_open() {
    let mut policy = fast_policy();
    policy.reconnect_delay_ms = 400;
    let server = AttemptServer::spawn(60, policy, 0).await;
    let (transport, shared, connects) = ScriptedTransport::new();
    let (mut controller, _driver) = begin(&server, transport, SimulatedMediaSource::new()).await;

    wait_for_phase(&mut controller, Phase::Active).await;

    tokio::time::sleep(Duration::from_millis(350)).await;
    let while_open = shared.frame_count();
    assert!(while_open >= 2, "expected frames while open, got {}", while_open);

    shared.force_abnormal_close().await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    let at_close = shared.frame_count();

    // Reconnect is still pending; sampled frames are dropped, not queued
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(shared.frame_count(), at_close);

    // After the reconnect, frames resume on the new connection
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(connects.load(Ordering::SeqCst), 2);
    assert!(shared.frame_count() > at_close);

    controller.stop().await;
    controller.join().await.expect("outcome");
}

#[tokio::test]
async fn deadline_submits_exactly_once_with_answers() {
    let server = AttemptServer::spawn(2, fast_policy(), 0).await;
    let (transport, _shared, _connects) = ScriptedTransport::new();
    let (mut controller, _driver) = begin(&server, transport, SimulatedMediaSource::new()).await;

    wait_for_phase(&mut controller, Phase::Active).await;
    controller.answer("q1", "42").await;
    controller.answer("q2", "acid").await;

    wait_for(
        &mut controller,
        |n| matches!(n, AttemptNotice::Completed { .. }),
    )
    .await;

    let outcome = controller.join().await.expect("outcome");
    assert_eq!(outcome.answers.len(), 2);
    assert_eq!(outcome.answers.get("q1").map(String::as_str), Some("42"));
    assert!(!outcome.disqualified);
    assert!(outcome.result.is_some());
    assert_eq!(server.submits(), 1);
}

#[tokio::test]
async fn failed_submission_keeps_answers_and_allows_retry() {
    let server = AttemptServer::spawn(60, fast_policy(), 1).await;
    let (transport, _shared, _connects) = ScriptedTransport::new();
    let (mut controller, _driver) = begin(&server, transport, SimulatedMediaSource::new()).await;

    wait_for_phase(&mut controller, Phase::Active).await;
    controller.answer("q1", "first draft").await;

    controller.submit().await;
    wait_for(
        &mut controller,
        |n| matches!(n, AttemptNotice::SubmissionFailed(_)),
    )
    .await;

    // Retry succeeds and the answer map survived the failure
    controller.submit().await;
    wait_for(
        &mut controller,
        |n| matches!(n, AttemptNotice::Completed { result: Some(_) }),
    )
    .await;

    let outcome = controller.join().await.expect("outcome");
    assert_eq!(
        outcome.answers.get("q1").map(String::as_str),
        Some("first draft")
    );
    assert!(outcome.result.is_some());
    assert_eq!(server.submits(), 2);
}

#[tokio::test]
async fn remote_violations_merge_into_the_tally() {
    let server = AttemptServer::spawn(60, fast_policy(), 0).await;
    let (transport, shared, _connects) = ScriptedTransport::new();
    let (mut controller, _driver) = begin(&server, transport, SimulatedMediaSource::new()).await;

    wait_for_phase(&mut controller, Phase::Active).await;

    shared
        .push_analysis(serde_json::json!({
            "status": "success",
            "data": {
                "yaw": 38.0,
                "pitch": 4.0,
                "looking_away": true,
                "has_violations": true,
                "violations": [
                    {"type": "looking_away", "severity": "low", "message": "Looking away from screen"}
                ]
            }
        }))
        .await;

    let notice = wait_for(
        &mut controller,
        |n| matches!(n, AttemptNotice::Violation(_)),
    )
    .await;
    match notice {
        AttemptNotice::Violation(event) => {
            assert_eq!(event.kind, ViolationKind::LookingAway);
        }
        _ => unreachable!(),
    }

    // An error response must not add violations
    shared
        .push_analysis(serde_json::json!({
            "status": "error",
            "message": "model overloaded"
        }))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    controller.stop().await;
    let outcome = controller.join().await.expect("outcome");
    assert_eq!(outcome.tally.total(), 1);
    assert_eq!(outcome.tally.count(ViolationKind::LookingAway), 1);
}

#[tokio::test]
async fn loud_audio_raises_display_alert_without_tally() {
    let server = AttemptServer::spawn(60, fast_policy(), 0).await;
    let (transport, _shared, _connects) = ScriptedTransport::new();
    let media_source = SimulatedMediaSource::new();
    let audio = media_source.audio_driver();
    let (mut controller, _driver) = begin(&server, transport, media_source).await;

    wait_for_phase(&mut controller, Phase::Active).await;
    audio.set_amplitude(0.9);

    let notice = wait_for(
        &mut controller,
        |n| matches!(n, AttemptNotice::NoiseAlert(_)),
    )
    .await;
    match notice {
        AttemptNotice::NoiseAlert(level) => assert!(level > 160),
        _ => unreachable!(),
    }

    controller.stop().await;
    let outcome = controller.join().await.expect("outcome");
    // The alert is display-only
    assert_eq!(outcome.tally.total(), 0);
}

#[tokio::test]
async fn fullscreen_exit_records_once_and_rerequests() {
    let server = AttemptServer::spawn(60, fast_policy(), 0).await;
    let (transport, _shared, _connects) = ScriptedTransport::new();
    let (mut controller, driver) = begin(&server, transport, SimulatedMediaSource::new()).await;

    wait_for_phase(&mut controller, Phase::Active).await;
    let requests_before = driver.fullscreen_requests();

    driver.set_fullscreen(false);
    let notice = wait_for(
        &mut controller,
        |n| matches!(n, AttemptNotice::Violation(_)),
    )
    .await;
    match notice {
        AttemptNotice::Violation(event) => {
            assert_eq!(event.kind, ViolationKind::FullscreenExit);
        }
        _ => unreachable!(),
    }
    assert!(driver.fullscreen_requests() > requests_before);

    // The re-request restored fullscreen; within the dedup window only one
    // violation was recorded
    controller.stop().await;
    let outcome = controller.join().await.expect("outcome");
    assert_eq!(outcome.tally.count(ViolationKind::FullscreenExit), 1);
}
