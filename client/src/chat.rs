//! Chat turns against a finished diagnosis.
//!
//! Conversation context lives on the backend, keyed by job id; each turn
//! here is a standalone request.

use crate::api::{with_timeout, DiagnosisApi};
use common::{ChatReply, JobId};
use std::sync::Arc;
use std::time::Duration;

pub const FALLBACK_REPLY: &str = "Sorry, I encountered an error. Please try again.";

#[derive(Clone)]
pub struct ChatClient {
    api: Arc<DiagnosisApi>,
    request_timeout: Duration,
}

impl ChatClient {
    pub fn new(api: Arc<DiagnosisApi>, request_timeout: Duration) -> Self {
        Self {
            api,
            request_timeout,
        }
    }

    /// Never fails: a broken turn degrades to the canned apology so the
    /// transcript stays intact.
    pub async fn send_turn(&self, job_id: &JobId, message: &str) -> ChatReply {
        match with_timeout(self.request_timeout, self.api.chat(job_id, message)).await {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!("Chat turn for job {} failed: {}", job_id, e);
                ChatReply {
                    response: FALLBACK_REPLY.to_string(),
                    fallback: true,
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub message: String,
    pub reply: String,
    pub fallback: bool,
}

/// In-memory transcript for one job.
pub struct ChatSession {
    client: ChatClient,
    job_id: JobId,
    turns: Vec<ChatTurn>,
}

impl ChatSession {
    pub fn new(client: ChatClient, job_id: JobId) -> Self {
        Self {
            client,
            job_id,
            turns: Vec::new(),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    /// Send one message. Blank input is ignored.
    pub async fn send(&mut self, message: &str) -> Option<&ChatTurn> {
        let message = message.trim();
        if message.is_empty() {
            return None;
        }

        let reply = self.client.send_turn(&self.job_id, message).await;
        self.turns.push(ChatTurn {
            message: message.to_string(),
            reply: reply.response,
            fallback: reply.fallback,
        });
        self.turns.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::testing::ScriptedTransport;
    use serde_json::json;

    const CHAT: &str = "POST /api/v1/diagnosis/7/chat";

    fn client(transport: &Arc<ScriptedTransport>) -> ChatClient {
        ChatClient::new(
            Arc::new(DiagnosisApi::new(transport.clone())),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_reply_is_returned() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.ok(CHAT, json!({"response": "Rest and fluids are advised."}));

        let reply = client(&transport).send_turn(&JobId::from("7"), "What next?").await;
        assert_eq!(reply.response, "Rest and fluids are advised.");
        assert!(!reply.fallback);
        assert_eq!(transport.calls()[0].body, Some(json!({"message": "What next?"})));
    }

    #[tokio::test]
    async fn test_failure_degrades_to_apology() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.fail(
            CHAT,
            TransportError::Status {
                status: 500,
                body: "model overloaded".into(),
            },
        );

        let reply = client(&transport).send_turn(&JobId::from("7"), "Hello?").await;
        assert_eq!(reply.response, FALLBACK_REPLY);
        assert!(reply.fallback);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_turn_times_out_to_apology() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.ok_after(CHAT, Duration::from_secs(600), json!({"response": "late"}));

        let reply = client(&transport).send_turn(&JobId::from("7"), "Hello?").await;
        assert!(reply.fallback);
    }

    #[tokio::test]
    async fn test_session_keeps_turn_order_across_failures() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.ok(CHAT, json!({"response": "first"}));
        transport.fail(CHAT, TransportError::Network("reset".into()));
        transport.ok(CHAT, json!({"response": "third"}));

        let mut session = ChatSession::new(client(&transport), JobId::from("7"));
        session.send("one").await;
        assert!(session.send("   ").await.is_none());
        session.send("two").await;
        session.send("three").await;

        let replies: Vec<_> = session.turns().iter().map(|t| t.reply.as_str()).collect();
        assert_eq!(replies, ["first", FALLBACK_REPLY, "third"]);
        assert!(session.turns()[1].fallback);
        assert_eq!(transport.calls_to(CHAT), 3);
    }

    #[tokio::test]
    async fn test_turns_are_not_gated_on_job_status() {
        // Only the front end refuses to chat before completion.
        let transport = Arc::new(ScriptedTransport::new());
        transport.ok(CHAT, json!({"response": "Diagnosis is still being prepared."}));

        let reply = client(&transport).send_turn(&JobId::from("7"), "Any news?").await;
        assert!(!reply.fallback);
        assert_eq!(transport.calls_to(CHAT), 1);
    }
}
