use crate::error::{ClientError, TransportError};
use crate::session::SessionStore;
use crate::transport::Transport;
use common::{
    Acknowledgement, ApiKeyUpdate, CaseExport, ChatReply, ChatRequest, DashboardStats,
    DiagnosisJob, FeedbackAck, FeedbackRequest, HealthStatus, JobId, JobSummary, LoginRequest,
    PatientForm, RegenerateAck, StatusUpdate, SubmitAck, TokenPair, KEY_UPDATE_ROUTE,
};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const DIAGNOSIS_ROOT: &str = "/api/v1/diagnosis";
pub const LOGIN_PATH: &str = "/auth/login";
pub const HEALTH_PATH: &str = "/health";
pub const FEEDBACK_PATH: &str = "/feedback";
pub const STATS_PATH: &str = "/dashboard/stats";

pub fn submit_path() -> String {
    format!("{}/start", DIAGNOSIS_ROOT)
}

pub fn job_path(id: &JobId) -> String {
    format!("{}/{}", DIAGNOSIS_ROOT, id)
}

pub fn status_path(id: &JobId) -> String {
    format!("{}/{}/status", DIAGNOSIS_ROOT, id)
}

pub fn chat_path(id: &JobId) -> String {
    format!("{}/{}/chat", DIAGNOSIS_ROOT, id)
}

pub fn regenerate_path(id: &JobId) -> String {
    format!("/cases/{}/regenerate", id)
}

pub fn export_path(id: &JobId) -> String {
    format!("/export/{}", id)
}

pub fn clear_chat_path(id: &JobId) -> String {
    format!("/chat/{}", id)
}

/// Bound `call` by `limit`, reporting expiry as a transport timeout.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(outcome) => outcome,
        Err(_) => Err(ClientError::Transport(TransportError::Timeout(limit))),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListBody {
    Bare(Vec<JobSummary>),
    Wrapped {
        #[serde(alias = "diagnoses")]
        cases: Vec<JobSummary>,
    },
}

/// Typed view of the backend's diagnosis surface.
pub struct DiagnosisApi {
    transport: Arc<dyn Transport>,
    session: Option<Arc<SessionStore>>,
}

impl DiagnosisApi {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            session: None,
        }
    }

    pub fn with_session(mut self, session: Arc<SessionStore>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn session(&self) -> Option<&Arc<SessionStore>> {
        self.session.as_ref()
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        authenticated: bool,
    ) -> Result<T, ClientError> {
        let token = if authenticated {
            self.session.as_ref().and_then(|s| s.bearer())
        } else {
            None
        };
        let value = self
            .transport
            .send(method, path, body.as_ref(), token.as_deref())
            .await?;
        serde_json::from_value(value).map_err(|e| ClientError::Shape {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    fn encode<B: Serialize>(path: &str, body: &B) -> Result<Value, ClientError> {
        serde_json::to_value(body).map_err(|e| ClientError::Shape {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Start a diagnosis. The form is expected to be validated already;
    /// failures are returned as-is, without retry.
    pub async fn submit(&self, form: &PatientForm) -> Result<SubmitAck, ClientError> {
        let path = submit_path();
        let body = Self::encode(&path, form)?;
        let ack: SubmitAck = self.call(Method::POST, &path, Some(body), true).await?;
        log::info!("Submitted diagnosis request: job {} is {}", ack.id, ack.status);
        Ok(ack)
    }

    pub async fn list(&self) -> Result<Vec<JobSummary>, ClientError> {
        let body: ListBody = self.call(Method::GET, DIAGNOSIS_ROOT, None, true).await?;
        Ok(match body {
            ListBody::Bare(cases) | ListBody::Wrapped { cases } => cases,
        })
    }

    pub async fn get(&self, id: &JobId) -> Result<DiagnosisJob, ClientError> {
        self.call(Method::GET, &job_path(id), None, true).await
    }

    pub async fn status(&self, id: &JobId) -> Result<StatusUpdate, ClientError> {
        self.call(Method::GET, &status_path(id), None, true).await
    }

    pub async fn chat(&self, id: &JobId, message: &str) -> Result<ChatReply, ClientError> {
        let path = chat_path(id);
        let body = Self::encode(
            &path,
            &ChatRequest {
                message: message.to_string(),
            },
        )?;
        self.call(Method::POST, &path, Some(body), true).await
    }

    /// Exchange credentials for tokens and keep them in the session store.
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair, ClientError> {
        let body = Self::encode(
            LOGIN_PATH,
            &LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            },
        )?;
        let tokens: TokenPair = self.call(Method::POST, LOGIN_PATH, Some(body), false).await?;
        if let Some(ref session) = self.session {
            session.store_login(email, &tokens)?;
        }
        log::info!("Logged in as {}", email);
        Ok(tokens)
    }

    pub async fn health(&self) -> Result<HealthStatus, ClientError> {
        self.call(Method::GET, HEALTH_PATH, None, false).await
    }

    /// Ask for a new diagnosis of an existing case.
    pub async fn regenerate(&self, id: &JobId) -> Result<RegenerateAck, ClientError> {
        let ack: RegenerateAck = self
            .call(Method::POST, &regenerate_path(id), None, true)
            .await?;
        log::info!("Regeneration of {} acknowledged", ack.case_id);
        Ok(ack)
    }

    pub async fn feedback(&self, feedback: &FeedbackRequest) -> Result<FeedbackAck, ClientError> {
        let body = Self::encode(FEEDBACK_PATH, feedback)?;
        self.call(Method::POST, FEEDBACK_PATH, Some(body), true).await
    }

    pub async fn export(&self, id: &JobId) -> Result<CaseExport, ClientError> {
        self.call(Method::GET, &export_path(id), None, true).await
    }

    pub async fn dashboard_stats(&self) -> Result<DashboardStats, ClientError> {
        self.call(Method::GET, STATS_PATH, None, true).await
    }

    pub async fn clear_chat(&self, id: &JobId) -> Result<Acknowledgement, ClientError> {
        self.call(Method::DELETE, &clear_chat_path(id), None, true).await
    }

    /// Replace a model provider's key. Authorised by the date of birth in
    /// the body, not by the session.
    pub async fn update_api_key(&self, update: &ApiKeyUpdate) -> Result<Acknowledgement, ClientError> {
        let body = Self::encode(KEY_UPDATE_ROUTE, update)?;
        let ack: Acknowledgement = self
            .call(Method::POST, KEY_UPDATE_ROUTE, Some(body), false)
            .await?;
        log::info!("{} API key updated", update.provider);
        Ok(ack)
    }
}
