//! Invigilator agent
//!
//! Runs one proctored attempt end-to-end against the configured attempt and
//! analysis services, using the simulated camera/microphone and a scripted
//! client surface. Device integration is the embedding client's job; this
//! binary exists to exercise the full pipeline.

use invigilator::attempt_api::{AttemptApi, StartAttemptRequest};
use invigilator::attempt_controller::{AttemptController, AttemptNotice};
use invigilator::exam_surface::ScriptedSurface;
use invigilator::media_capture::{MediaConstraints, SimulatedMediaSource};
use invigilator::streaming_channel::WsTransport;
use invigilator::AppConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "invigilator=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting invigilator agent v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::default();
    tracing::info!(
        attempt_api_url = %config.attempt_api_url,
        analysis_ws_url = %config.analysis_ws_url,
        exam_id = %config.exam_id,
        "Configuration loaded"
    );

    let api = AttemptApi::new(config.attempt_api_url.clone());
    let transport = WsTransport::new(config.analysis_ws_url.clone());
    let media_source = SimulatedMediaSource::new();
    let (surface, driver) = ScriptedSurface::new();

    let mut controller = AttemptController::begin(
        api,
        media_source,
        transport,
        Box::new(surface),
        StartAttemptRequest {
            exam_id: config.exam_id.clone(),
            user_id: config.user_id.clone(),
        },
        MediaConstraints::default(),
    )
    .await?;

    // The scripted host grants fullscreen up front
    driver.set_fullscreen(true);
    tracing::info!(attempt_id = %controller.attempt_id(), "Attempt running");

    while let Some(notice) = controller.next_notice().await {
        match notice {
            AttemptNotice::PhaseChanged(phase) => {
                tracing::info!(phase = ?phase, "Enforcement phase changed");
            }
            AttemptNotice::Violation(event) => {
                tracing::warn!(
                    kind = %event.kind.as_str(),
                    message = %event.message,
                    "Violation recorded"
                );
            }
            AttemptNotice::NoiseAlert(level) => {
                tracing::warn!(level = level, "Noise alert");
            }
            AttemptNotice::SubmissionFailed(message) => {
                tracing::error!(error = %message, "Submission failed - abandoning attempt");
                controller.stop().await;
            }
            AttemptNotice::Completed { .. } => break,
        }
    }

    let outcome = controller.join().await?;
    tracing::info!(
        attempt_id = %outcome.attempt_id,
        answers = outcome.answers.len(),
        total_violations = outcome.tally.total(),
        disqualified = outcome.disqualified,
        "Attempt finished"
    );
    if let Some(result) = outcome.result {
        tracing::info!(
            score = result.score,
            max_score = result.max_score,
            passed = result.passed,
            "Attempt result"
        );
    }

    Ok(())
}
