use thiserror::Error;

/// Failures seen by a Huddle client.
///
/// The first five mirror the server's taxonomy; `Transport` and `Decode` are
/// local to the client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("server unavailable: {0}")]
    Transient(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),
}

impl ClientError {
    /// Map an HTTP error status and its message back onto the taxonomy.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            400 | 422 => ClientError::Validation(message),
            401 => ClientError::Unauthorized(message),
            403 => ClientError::Forbidden(message),
            404 => ClientError::NotFound(message),
            500..=599 => ClientError::Transient(message),
            _ => ClientError::Transport(format!("unexpected status {}: {}", status, message)),
        }
    }

    /// Worth retrying with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transient(_) | ClientError::Transport(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClientError::Decode(e.to_string())
        } else {
            ClientError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Decode(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        assert!(matches!(
            ClientError::from_status(400, "bad".into()),
            ClientError::Validation(_)
        ));
        assert!(matches!(
            ClientError::from_status(403, "no".into()),
            ClientError::Forbidden(_)
        ));
        assert!(matches!(
            ClientError::from_status(404, "gone".into()),
            ClientError::NotFound(_)
        ));
        let busy = ClientError::from_status(503, "busy".into());
        assert!(matches!(busy, ClientError::Transient(_)));
        assert!(busy.is_retryable());
        assert!(!ClientError::from_status(401, "who".into()).is_retryable());
    }
}
