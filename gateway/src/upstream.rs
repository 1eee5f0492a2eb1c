use crate::config::UpstreamConfig;
use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use std::time::Duration;
use thiserror::Error;

/// What the gateway sends on. Only the method, the route, the caller's
/// `Authorization` value and the raw body survive from the inbound
/// request.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub method: Method,
    pub path: String,
    /// Raw header bytes; values need not be valid UTF-8.
    pub authorization: Option<Vec<u8>>,
    pub body: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamReply {
    pub status: u16,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("Unsupported method {0}")]
    Method(String),
    #[error("Unforwardable Authorization header: {0}")]
    Header(String),
    #[error("Upstream unreachable: {0}")]
    Unreachable(String),
    #[error("Upstream timed out")]
    Timeout,
    #[error("Failed to read upstream body: {0}")]
    Body(String),
}

#[async_trait]
pub trait Upstream: Send + Sync {
    async fn forward(&self, request: OutboundRequest) -> Result<UpstreamReply, ForwardError>;
}

pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUpstream {
    pub fn new(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

fn classify(err: reqwest::Error) -> ForwardError {
    if err.is_timeout() {
        ForwardError::Timeout
    } else {
        ForwardError::Unreachable(err.to_string())
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn forward(&self, request: OutboundRequest) -> Result<UpstreamReply, ForwardError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self
            .client
            .request(request.method, url)
            .header(CONTENT_TYPE, "application/json");

        if let Some(raw) = request.authorization {
            let value =
                HeaderValue::from_bytes(&raw).map_err(|e| ForwardError::Header(e.to_string()))?;
            builder = builder.header(AUTHORIZATION, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| ForwardError::Body(e.to_string()))?;

        Ok(UpstreamReply {
            status,
            body: body.to_vec(),
        })
    }
}
