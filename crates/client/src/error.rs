//! Client error taxonomy.

use haven_shared::ApiError;

/// Errors surfaced by the connection manager, routers and history client.
///
/// Transport and frame errors are handled inside the manager and turned into
/// status changes; they only appear here so they can be logged and recorded
/// as `last_error`.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("not connected")]
    NotConnected,
    #[error("gave up after {attempts} reconnect attempts, manual retry required")]
    RetryExhausted { attempts: u32 },
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("no credential available for the real-time endpoint")]
    MissingCredential,
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to serialize command: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("message is empty")]
    EmptyMessage,
    #[error(transparent)]
    Api(#[from] ApiError),
}

pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    /// Text for a status line. History failures show the server's problem
    /// detail when there is one.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Api(err) => err.user_message(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_surface_problem_detail() {
        let err = ClientError::from(ApiError::Http {
            status: 403,
            body: r#"{"title":"Forbidden","detail":"Not a member of this room"}"#.into(),
        });
        assert_eq!(err.user_message(), "Not a member of this room");
        assert_eq!(ClientError::NotConnected.user_message(), "not connected");
        assert_eq!(
            ClientError::RetryExhausted { attempts: 10 }.to_string(),
            "gave up after 10 reconnect attempts, manual retry required"
        );
    }
}
