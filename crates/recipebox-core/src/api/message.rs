//! Human-readable messages for API failures.

use serde_json::Value;

use super::{ApiError, ErrorKind};

const GENERIC_MESSAGE: &str = "An unexpected error occurred. Please try again.";

/// Derive a message suitable for showing to the user.
///
/// Server payload fields win over status-code defaults: `detail`, `error`
/// and `message` first, then field-level validation messages joined by
/// commas.
pub fn error_message(err: &ApiError) -> String {
    if let Some(message) = err
        .body()
        .and_then(|body| body.payload.as_ref())
        .and_then(payload_message)
    {
        return message;
    }

    if let Some(status) = err.status() {
        return status_message(status);
    }

    if err.kind() == ErrorKind::Network {
        return "Network error. Please check your connection.".to_string();
    }

    let text = err.to_string();
    if text.is_empty() {
        GENERIC_MESSAGE.to_string()
    } else {
        text
    }
}

fn payload_message(payload: &Value) -> Option<String> {
    for key in ["detail", "error", "message"] {
        if let Some(text) = payload.get(key).and_then(Value::as_str) {
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }
    }

    let fields = payload.as_object()?;
    let messages: Vec<String> = fields
        .values()
        .filter_map(|value| match value {
            Value::String(s) => Some(s.clone()),
            Value::Array(items) => items.first().map(|first| match first {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
            _ => None,
        })
        .collect();

    let joined = messages.join(", ");
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

fn status_message(status: u16) -> String {
    match status {
        401 => "Unauthorized. Please check your credentials.".to_string(),
        403 => "You do not have permission to access this resource.".to_string(),
        404 => "Resource not found.".to_string(),
        400 => "Invalid request. Please check your input.".to_string(),
        500..=u16::MAX => "Server error. Please try again later.".to_string(),
        400..=499 => format!("Error: {}. Please try again.", status),
        _ => GENERIC_MESSAGE.to_string(),
    }
}
