//! ExamSurface - Client Surface Capability
//!
//! ## Responsibilities
//!
//! - Fullscreen state query and re-request
//! - Surface event stream (visibility loss, blur, blocked shortcuts,
//!   clipboard/context-menu attempts, back navigation)
//! - Exam guards: keyboard interception, navigation block, unload warning
//!
//! The engine owns the surface exclusively and is its only consumer. A real
//! deployment backs this with the embedding client; `ScriptedSurface` backs
//! the agent binary and tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Events emitted by the client surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// Tab/window visibility lost (tab switch)
    VisibilityLost,
    /// Window lost focus
    WindowBlur,
    /// Fullscreen was exited outside the poll cycle
    FullscreenExited,
    /// A blocked shortcut was attempted (Escape, F11, PrintScreen, Tab)
    BlockedShortcut(String),
    /// A copy/paste/context-menu attempt was blocked
    ClipboardBlocked,
    /// Back navigation was attempted and re-pushed
    BackNavigation,
}

/// Client surface capability
///
/// Implementations intercept Escape/F11 at the earliest point so the host
/// cannot exit fullscreen before the event reaches the engine, re-push
/// history on back navigation, and warn before unload while guards are
/// engaged.
pub trait ExamSurface: Send + 'static {
    /// Take the surface event stream; called once at enforcement start
    fn events(&mut self) -> mpsc::UnboundedReceiver<SurfaceEvent>;

    /// Whether the exam is currently displayed fullscreen
    fn is_fullscreen(&self) -> bool;

    /// Re-request fullscreen after a departure
    fn request_fullscreen(&mut self);

    /// Engage or release keyboard/navigation/unload guards
    fn set_guards(&mut self, engaged: bool);
}

/// Scripted surface for the agent binary and deterministic tests
pub struct ScriptedSurface {
    fullscreen: Arc<AtomicBool>,
    fullscreen_requests: Arc<AtomicU32>,
    guards_engaged: bool,
    rx: Option<mpsc::UnboundedReceiver<SurfaceEvent>>,
}

/// Driver handle for a ScriptedSurface
#[derive(Clone)]
pub struct SurfaceDriver {
    fullscreen: Arc<AtomicBool>,
    fullscreen_requests: Arc<AtomicU32>,
    tx: mpsc::UnboundedSender<SurfaceEvent>,
}

impl ScriptedSurface {
    /// Create a surface plus the driver that scripts it
    pub fn new() -> (Self, SurfaceDriver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let fullscreen = Arc::new(AtomicBool::new(false));
        let fullscreen_requests = Arc::new(AtomicU32::new(0));

        let surface = Self {
            fullscreen: fullscreen.clone(),
            fullscreen_requests: fullscreen_requests.clone(),
            guards_engaged: false,
            rx: Some(rx),
        };
        let driver = SurfaceDriver {
            fullscreen,
            fullscreen_requests,
            tx,
        };
        (surface, driver)
    }
}

impl ExamSurface for ScriptedSurface {
    fn events(&mut self) -> mpsc::UnboundedReceiver<SurfaceEvent> {
        self.rx.take().expect("surface event stream already taken")
    }

    fn is_fullscreen(&self) -> bool {
        self.fullscreen.load(Ordering::Relaxed)
    }

    fn request_fullscreen(&mut self) {
        // The scripted host always grants the re-request
        self.fullscreen.store(true, Ordering::Relaxed);
        self.fullscreen_requests.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Fullscreen re-requested");
    }

    fn set_guards(&mut self, engaged: bool) {
        if self.guards_engaged != engaged {
            self.guards_engaged = engaged;
            tracing::debug!(engaged = engaged, "Exam surface guards updated");
        }
    }
}

impl SurfaceDriver {
    /// Emit a surface event toward the engine
    pub fn emit(&self, event: SurfaceEvent) {
        let _ = self.tx.send(event);
    }

    /// Script the host's fullscreen state
    pub fn set_fullscreen(&self, fullscreen: bool) {
        self.fullscreen.store(fullscreen, Ordering::Relaxed);
    }

    /// Number of fullscreen re-requests the engine issued
    pub fn fullscreen_requests(&self) -> u32 {
        self.fullscreen_requests.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_driver_events_reach_surface() {
        let (mut surface, driver) = ScriptedSurface::new();
        let mut rx = surface.events();

        driver.emit(SurfaceEvent::VisibilityLost);
        driver.emit(SurfaceEvent::BlockedShortcut("F11".to_string()));

        assert_eq!(rx.recv().await, Some(SurfaceEvent::VisibilityLost));
        assert_eq!(
            rx.recv().await,
            Some(SurfaceEvent::BlockedShortcut("F11".to_string()))
        );
    }

    #[tokio::test]
    async fn test_request_fullscreen_granted_and_counted() {
        let (mut surface, driver) = ScriptedSurface::new();
        driver.set_fullscreen(false);
        assert!(!surface.is_fullscreen());

        surface.request_fullscreen();
        assert!(surface.is_fullscreen());
        assert_eq!(driver.fullscreen_requests(), 1);
    }
}
