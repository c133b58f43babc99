use thiserror::Error;

use crate::utils::truncate;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - API key may be invalid")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid row: {0}")]
    InvalidRow(#[from] serde_json::Error),

    #[error("Version conflict on {table} {id}")]
    VersionConflict { table: String, id: String },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl StoreError {
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = truncate(body, MAX_ERROR_BODY_LENGTH);
        match status.as_u16() {
            401 => StoreError::Unauthorized,
            403 => StoreError::AccessDenied(truncated),
            404 => StoreError::NotFound(truncated),
            429 => StoreError::RateLimited,
            500..=599 => StoreError::ServerError(truncated),
            _ => StoreError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// Whether repeating the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::RateLimited
                | StoreError::ServerError(_)
                | StoreError::NetworkError(_)
                | StoreError::Unavailable(_)
        )
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_from_status() {
        assert!(matches!(StoreError::from_status(StatusCode::UNAUTHORIZED, ""), StoreError::Unauthorized));
        assert!(matches!(StoreError::from_status(StatusCode::FORBIDDEN, "no"), StoreError::AccessDenied(_)));
        assert!(matches!(StoreError::from_status(StatusCode::NOT_FOUND, ""), StoreError::NotFound(_)));
        assert!(matches!(StoreError::from_status(StatusCode::TOO_MANY_REQUESTS, ""), StoreError::RateLimited));
        assert!(matches!(StoreError::from_status(StatusCode::BAD_GATEWAY, ""), StoreError::ServerError(_)));
        assert!(matches!(StoreError::from_status(StatusCode::CONFLICT, ""), StoreError::InvalidResponse(_)));
    }

    #[test]
    fn test_from_status_truncates_body() {
        let body = "x".repeat(2000);
        match StoreError::from_status(StatusCode::INTERNAL_SERVER_ERROR, &body) {
            StoreError::ServerError(msg) => assert_eq!(msg.len(), MAX_ERROR_BODY_LENGTH),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_is_transient() {
        assert!(StoreError::RateLimited.is_transient());
        assert!(StoreError::Unavailable("down".into()).is_transient());
        assert!(!StoreError::Unauthorized.is_transient());
        let conflict = StoreError::VersionConflict { table: "tour_groups".into(), id: "g1".into() };
        assert!(!conflict.is_transient());
        assert!(conflict.is_version_conflict());
    }
}
