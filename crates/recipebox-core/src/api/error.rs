use serde_json::Value;
use thiserror::Error;

/// Coarse classification used to decide how a failure is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Unauthorized,
    Forbidden,
    Client,
    Server,
    Decode,
    Session,
}

/// Error payload returned by the server alongside a non-2xx status.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorBody {
    /// Parsed JSON payload, when the body was JSON
    pub payload: Option<Value>,
    /// Raw body text, truncated
    pub text: String,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized - token may be expired")]
    Unauthorized(ErrorBody),

    #[error("Access denied: {}", .0.text)]
    AccessDenied(ErrorBody),

    #[error("Resource not found: {}", .0.text)]
    NotFound(ErrorBody),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Request rejected with status {status}: {}", .body.text)]
    ClientError { status: u16, body: ErrorBody },

    #[error("Server error {status}: {}", .body.text)]
    ServerError { status: u16, body: ErrorBody },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not logged in")]
    NotAuthenticated,

    #[error("Session changed while the request was in flight")]
    SessionChanged,
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ErrorBody {
    pub fn parse(body: &str) -> Self {
        Self {
            payload: serde_json::from_str(body).ok(),
            text: truncate_body(body),
        }
    }
}

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

impl ApiError {
    pub fn from_status(status: u16, body: &str) -> Self {
        let body = ErrorBody::parse(body);
        match status {
            401 => ApiError::Unauthorized(body),
            403 => ApiError::AccessDenied(body),
            404 => ApiError::NotFound(body),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError { status, body },
            _ => ApiError::ClientError { status, body },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Unauthorized(_) => ErrorKind::Unauthorized,
            ApiError::AccessDenied(_) => ErrorKind::Forbidden,
            ApiError::NotFound(_) | ApiError::RateLimited | ApiError::ClientError { .. } => {
                ErrorKind::Client
            }
            ApiError::InvalidRequest(_) => ErrorKind::Client,
            ApiError::ServerError { .. } => ErrorKind::Server,
            ApiError::NetworkError(_) => ErrorKind::Network,
            ApiError::InvalidResponse(_) => ErrorKind::Decode,
            ApiError::NotAuthenticated | ApiError::SessionChanged => ErrorKind::Session,
        }
    }

    /// HTTP status code, for errors that came back from the server.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized(_) => Some(401),
            ApiError::AccessDenied(_) => Some(403),
            ApiError::NotFound(_) => Some(404),
            ApiError::RateLimited => Some(429),
            ApiError::ClientError { status, .. } | ApiError::ServerError { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Server-supplied error payload, if any.
    pub fn body(&self) -> Option<&ErrorBody> {
        match self {
            ApiError::Unauthorized(body)
            | ApiError::AccessDenied(body)
            | ApiError::NotFound(body)
            | ApiError::ClientError { body, .. }
            | ApiError::ServerError { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind() == ErrorKind::Unauthorized
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::InvalidResponse(err.to_string())
        } else if err.is_builder() {
            ApiError::InvalidRequest(err.to_string())
        } else {
            ApiError::NetworkError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::InvalidResponse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_classification() {
        assert_eq!(ApiError::from_status(401, "").kind(), ErrorKind::Unauthorized);
        assert_eq!(ApiError::from_status(403, "").kind(), ErrorKind::Forbidden);
        assert_eq!(ApiError::from_status(404, "").kind(), ErrorKind::Client);
        assert_eq!(ApiError::from_status(400, "").kind(), ErrorKind::Client);
        assert_eq!(ApiError::from_status(502, "").kind(), ErrorKind::Server);
        assert_eq!(ApiError::from_status(418, "").status(), Some(418));
        assert!(matches!(ApiError::from_status(429, ""), ApiError::RateLimited));
    }

    #[test]
    fn test_error_body_keeps_json_payload() {
        let err = ApiError::from_status(400, r#"{"detail": "bad input"}"#);
        let body = err.body().expect("client errors carry a body");
        assert_eq!(
            body.payload.as_ref().and_then(|p| p.get("detail")).and_then(Value::as_str),
            Some("bad input")
        );

        let err = ApiError::from_status(500, "<html>oops</html>");
        assert!(err.body().unwrap().payload.is_none());
    }

    #[test]
    fn test_truncate_body() {
        let long = "é".repeat(400);
        let truncated = truncate_body(&long);
        assert!(truncated.contains("truncated, 800 total bytes"));
        assert_eq!(truncate_body("short"), "short");
    }

    #[test]
    fn test_session_errors_have_no_status() {
        assert_eq!(ApiError::NotAuthenticated.status(), None);
        assert_eq!(ApiError::NotAuthenticated.kind(), ErrorKind::Session);
        assert_eq!(ApiError::NetworkError("down".into()).kind(), ErrorKind::Network);
    }
}
