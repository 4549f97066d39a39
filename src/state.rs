//! Application configuration
//!
//! Environment-driven settings for the agent binary.

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Attempt service base URL
    pub attempt_api_url: String,
    /// Analysis service WebSocket base URL
    pub analysis_ws_url: String,
    /// Exam to start an attempt for
    pub exam_id: String,
    /// Test-taker identifier
    pub user_id: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            attempt_api_url: std::env::var("ATTEMPT_API_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            analysis_ws_url: std::env::var("ANALYSIS_WS_URL")
                .unwrap_or_else(|_| "ws://localhost:9000".to_string()),
            exam_id: std::env::var("EXAM_ID").unwrap_or_else(|_| "exam-demo".to_string()),
            user_id: std::env::var("USER_ID").unwrap_or_else(|_| "user-demo".to_string()),
        }
    }
}
