//! Client side of the diagnosis job protocol.
//!
//! A job is submitted once, then followed by [`StatusPoller`] until the
//! backend reports it completed or failed; chat turns can then be sent
//! against it. Every call goes through a [`Transport`].

pub mod api;
pub mod chat;
pub mod config;
pub mod error;
pub mod notices;
pub mod poller;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use api::DiagnosisApi;
pub use chat::{ChatClient, ChatSession, ChatTurn, FALLBACK_REPLY};
pub use config::ClientConfig;
pub use error::{ClientError, TransportError};
pub use notices::{Notice, NoticeBoard, NoticeKind};
pub use poller::{PollHandle, PollSnapshot, PollState, PollerConfig, StatusPoller};
pub use session::SessionStore;
pub use transport::{HttpTransport, Route, Transport};

use std::sync::Arc;

/// Wire up an HTTP-backed API with its session store from `config`.
pub fn connect(config: &ClientConfig) -> Result<Arc<DiagnosisApi>, ClientError> {
    let transport = HttpTransport::new(config.route(), config.request_timeout)?;
    let session = match config.session_file {
        Some(ref path) => SessionStore::open(path)?,
        None => SessionStore::in_memory(),
    };
    Ok(Arc::new(
        DiagnosisApi::new(Arc::new(transport)).with_session(Arc::new(session)),
    ))
}
