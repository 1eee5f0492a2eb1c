use crate::error::TransportError;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;

/// Single choke point for calls to the backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `body` (as JSON text) to the backend-relative `path`.
    /// `auth` becomes `Authorization: Bearer <token>`; `None` omits the
    /// header entirely. No retries.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        auth: Option<&str>,
    ) -> Result<Value, TransportError>;
}

/// Where requests go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Straight to the backend: `{base}{path}`.
    Direct(String),
    /// Through a gateway: `{gateway}/api/proxy?path={path}`. The key
    /// update route has its own fixed gateway endpoint, `{gateway}/api/gi`.
    Proxied(String),
}

pub struct HttpTransport {
    client: reqwest::Client,
    route: Route,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(route: Route, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self {
            client,
            route,
            timeout,
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        match &self.route {
            Route::Direct(base) => self
                .client
                .request(method, format!("{}{}", base.trim_end_matches('/'), path)),
            Route::Proxied(gateway) if path == common::KEY_UPDATE_ROUTE => self
                .client
                .request(method, format!("{}/api{}", gateway.trim_end_matches('/'), path)),
            Route::Proxied(gateway) => self
                .client
                .request(method, format!("{}/api/proxy", gateway.trim_end_matches('/')))
                .query(&[("path", path)]),
        }
    }

    fn classify(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        auth: Option<&str>,
    ) -> Result<Value, TransportError> {
        let mut request = self
            .request(method.clone(), path)
            .header(CONTENT_TYPE, "application/json");

        if let Some(token) = auth.filter(|t| !t.is_empty()) {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            let text =
                serde_json::to_string(body).map_err(|e| TransportError::Decode(e.to_string()))?;
            request = request.body(text);
        }

        log::debug!("{} {}", method, path);
        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| self.classify(e))?;

        if !status.is_success() {
            log::debug!("{} {} -> {}", method, path, status);
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| TransportError::Decode(format!("{} {}: {}", method, path, e)))
    }
}
