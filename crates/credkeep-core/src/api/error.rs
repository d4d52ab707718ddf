use thiserror::Error;

/// Failure of a dashboard API call, classified by what it means for the
/// session credential.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The session is valid but the account may not perform this admin action
    #[error("Admin action forbidden for this session: {0}")]
    AccessDenied(String),

    /// The server no longer accepts the credential; the session is over
    #[error("Credential rejected by server - sign in again")]
    Unauthorized,

    #[error("Endpoint or record not found: {0}")]
    NotFound(String),

    /// Too many requests; retried with backoff before surfacing
    #[error("Rate limited after retries")]
    RateLimited,

    #[error("Dashboard API failure: {0}")]
    ServerError(String),

    /// Transport failure before any status was received
    #[error("Could not reach dashboard API: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    /// Map a non-success status and its body to an error.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// Whether the credential should be dropped in response to this error
    pub fn invalidates_credential(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }
}
