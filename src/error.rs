//! Error handling for the enforcement engine

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Camera/microphone permission denied by the user
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Camera/microphone absent or unusable
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Streaming channel failure (connect failure or abnormal close)
    #[error("Streaming channel error: {0}")]
    Channel(String),

    /// Non-success response from the analysis service
    #[error("Analysis error: {0}")]
    Analysis(String),

    /// Attempt submission failure (retryable)
    #[error("Submission error: {0}")]
    Submission(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Attempt service API error
    #[error("API error: {0}")]
    Api(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Acquisition failures degrade enforcement instead of blocking the exam
    pub fn is_degradable(&self) -> bool {
        matches!(self, Error::PermissionDenied(_) | Error::DeviceUnavailable(_))
    }
}
