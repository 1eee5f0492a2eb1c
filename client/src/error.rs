use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single outbound call.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Non-2xx response. The body is kept exactly as received.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Network failure: {0}")]
    Network(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Malformed response body: {0}")]
    Decode(String),
}

impl TransportError {
    pub fn http_status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self.http_status(), Some(401) | Some(403))
    }

    /// The error body parsed as JSON, when it is JSON.
    pub fn json_body(&self) -> Option<Value> {
        match self {
            TransportError::Status { body, .. } => serde_json::from_str(body).ok(),
            _ => None,
        }
    }

    /// Best human-readable explanation: the `error`/`detail`/`message`
    /// field of a JSON body, else the raw text.
    pub fn detail(&self) -> String {
        if let Some(json) = self.json_body() {
            for key in ["error", "detail", "message"] {
                if let Some(text) = json.get(key).and_then(Value::as_str) {
                    return text.to_string();
                }
            }
        }
        match self {
            TransportError::Status { body, .. } => body.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    /// 401/403 from the backend; the front end sends the user to login.
    /// The response is kept whole.
    #[error("Not authorised: {}", .0.detail())]
    Auth(TransportError),
    #[error(transparent)]
    Transport(TransportError),
    #[error("Unexpected response from {path}: {reason}")]
    Shape { path: String, reason: String },
    #[error("Session store: {0}")]
    Session(String),
}

impl ClientError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::Auth(_))
    }

    /// The transport failure behind this error, if there was one.
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            ClientError::Auth(err) | ClientError::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        if err.is_auth() {
            ClientError::Auth(err)
        } else {
            ClientError::Transport(err)
        }
    }
}
