//! Error types for Rollcall

use hyper::StatusCode;

use crate::store::StoreError;

/// Main error type for Rollcall operations
#[derive(Debug, thiserror::Error)]
pub enum RollcallError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RollcallError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Conflict(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Http(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = self.to_string();
        (status, body)
    }
}

impl From<StoreError> for RollcallError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { .. } => Self::Conflict(err.to_string()),
            StoreError::NotFound { .. } => Self::NotFound(err.to_string()),
            StoreError::Serialization(reason) => Self::Internal(reason),
            other => Self::Store(other.to_string()),
        }
    }
}

impl From<std::io::Error> for RollcallError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<reqwest::Error> for RollcallError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

/// Result type alias for Rollcall operations
pub type Result<T> = std::result::Result<T, RollcallError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            RollcallError::BadRequest("port".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RollcallError::Store("down".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            RollcallError::Conflict("lost".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_store_error_conversion() {
        let err: RollcallError = StoreError::Unavailable("connection refused".into()).into();
        assert!(matches!(err, RollcallError::Store(_)));

        let err: RollcallError = StoreError::Conflict {
            key: "service-ab".into(),
            expected: 1,
            found: Some(2),
        }
        .into();
        assert!(matches!(err, RollcallError::Conflict(_)));
    }

    #[test]
    fn test_into_status_code_and_body() {
        let (status, body) = RollcallError::BadRequest("missing port".into())
            .into_status_code_and_body();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("missing port"));
    }
}
