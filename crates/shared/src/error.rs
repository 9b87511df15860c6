//! Shared error types including RFC7807 Problem Details.

use serde::{Deserialize, Serialize};

/// RFC7807 Problem Details (application/problem+json)
///
/// The history endpoints answer failures with this envelope; the client turns
/// it into a readable message instead of failing to decode a page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    /// A URI reference that identifies the problem type.
    #[serde(rename = "type", default)]
    pub type_url: String,
    /// A short, human-readable summary of the problem type.
    #[serde(default)]
    pub title: String,
    /// HTTP status code.
    #[serde(default)]
    pub status: u16,
    /// Human-readable explanation specific to this occurrence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Attempt to parse an RFC7807 (or RFC7807-ish) JSON body into a user-facing message.
/// Prefers `detail`, falls back to `title`.
pub fn try_problem_detail(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ProblemDetails>(body).ok()?;
    if let Some(detail) = parsed.detail {
        if !detail.trim().is_empty() {
            return Some(detail);
        }
    }
    if !parsed.title.trim().is_empty() {
        return Some(parsed.title);
    }
    None
}

/// Error from the request/response history endpoints.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Deserialization error: {0}")]
    Deserialize(String),
}

impl ApiError {
    /// Message suitable for a status line: the problem detail when the body
    /// carries one, the plain error otherwise.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Http { body, .. } => {
                try_problem_detail(body).unwrap_or_else(|| self.to_string())
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problem_detail_prefers_detail_over_title() {
        let body = r#"{"type":"about:blank","title":"Forbidden","status":403,"detail":"Not a member of this room"}"#;
        assert_eq!(
            try_problem_detail(body).as_deref(),
            Some("Not a member of this room")
        );

        let body = r#"{"title":"Forbidden","status":403,"detail":"  "}"#;
        assert_eq!(try_problem_detail(body).as_deref(), Some("Forbidden"));

        assert_eq!(try_problem_detail("<html>bad gateway</html>"), None);
    }

    #[test]
    fn user_message_falls_back_to_display() {
        let err = ApiError::Http {
            status: 502,
            body: "upstream down".into(),
        };
        assert_eq!(err.user_message(), "HTTP 502: upstream down");

        let err = ApiError::Http {
            status: 401,
            body: r#"{"title":"Unauthorized","detail":"Token expired"}"#.into(),
        };
        assert_eq!(err.user_message(), "Token expired");
    }
}
