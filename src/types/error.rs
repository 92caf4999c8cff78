//! Error types for the feed generator
//!
//! One variant per failure class: configuration, transient stream failures,
//! record decoding, persistence, authorization and request validation.

use hyper::StatusCode;

/// Main error type for feed generator operations
#[derive(Debug, thiserror::Error)]
pub enum FeedgenError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Bulk write failed for {failed} of {total} documents: {first}")]
    BulkWrite {
        failed: usize,
        total: usize,
        first: String,
    },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FeedgenError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            // Unknown feed names are a client mistake, not a missing route
            Self::NotFound(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Database(_) | Self::BulkWrite { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Stream(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) | Self::Decode(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether the message is safe to hand back to API callers verbatim
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::BadRequest(_) | Self::NotFound(_) | Self::Unauthorized(_)
        )
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = match self {
            Self::BadRequest(msg) | Self::NotFound(msg) | Self::Unauthorized(msg) => msg,
            _ => "Internal server error".to_string(),
        };
        (status, body)
    }
}

impl From<std::io::Error> for FeedgenError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for FeedgenError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for FeedgenError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedgenError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Stream(err.to_string())
    }
}

impl From<mongodb::error::Error> for FeedgenError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<bson::ser::Error> for FeedgenError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Database(format!("BSON encode: {}", err))
    }
}

impl From<bson::de::Error> for FeedgenError {
    fn from(err: bson::de::Error) -> Self {
        Self::Database(format!("BSON decode: {}", err))
    }
}

/// Result type alias for feed generator operations
pub type Result<T> = std::result::Result<T, FeedgenError>;
