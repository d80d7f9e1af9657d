/// Errors raised within the notification subsystem.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Channel configuration is missing a required field or invalid.
    #[error("Notify: invalid channel configuration: {0}")]
    InvalidConfig(String),

    /// An HTTP request to an external notification endpoint failed.
    #[error("Notify: HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The external endpoint returned a non-success response.
    #[error("Notify: endpoint returned status={status}: {body}")]
    ApiError { status: u16, body: String },

    /// Reading or writing the persisted alert store failed.
    #[error("Notify: alert store I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization or deserialization failed.
    #[error("Notify: JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Convenience `Result` alias for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;
