use crate::poller::PollerConfig;
use crate::transport::Route;
use common::{DEFAULT_API_URL, DEFAULT_POLL_INTERVAL_MS, DEFAULT_REQUEST_TIMEOUT_MS};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    /// Gateway to send every call through instead of the backend itself.
    pub proxy_url: Option<String>,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    /// `None` keeps the session in memory only.
    pub session_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            proxy_url: None,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            session_file: None,
        }
    }
}

impl ClientConfig {
    /// Defaults overlaid with `MEDRAG_API_URL`, `MEDRAG_PROXY_URL`,
    /// `MEDRAG_SESSION_FILE`, `MEDRAG_POLL_INTERVAL` and `MEDRAG_TIMEOUT`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("MEDRAG_API_URL") {
            config.base_url = url;
        }
        if let Ok(url) = std::env::var("MEDRAG_PROXY_URL") {
            config.proxy_url = Some(url);
        }
        if let Ok(path) = std::env::var("MEDRAG_SESSION_FILE") {
            config.session_file = Some(PathBuf::from(path));
        }
        if let Some(interval) = duration_from_env("MEDRAG_POLL_INTERVAL") {
            config.poll_interval = interval;
        }
        if let Some(timeout) = duration_from_env("MEDRAG_TIMEOUT") {
            config.request_timeout = timeout;
        }
        config
    }

    pub fn route(&self) -> Route {
        match self.proxy_url {
            Some(ref gateway) => Route::Proxied(gateway.clone()),
            None => Route::Direct(self.base_url.clone()),
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: self.poll_interval,
            request_timeout: self.request_timeout,
        }
    }
}

fn duration_from_env(var: &str) -> Option<Duration> {
    let raw = std::env::var(var).ok()?;
    match common::parse_interval(&raw) {
        Ok(d) => Some(d),
        Err(e) => {
            log::warn!("Ignoring {}={:?}: {}", var, raw, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_prefers_gateway() {
        let mut config = ClientConfig::default();
        assert_eq!(config.route(), Route::Direct(DEFAULT_API_URL.to_string()));

        config.proxy_url = Some("http://localhost:3000".into());
        assert_eq!(config.route(), Route::Proxied("http://localhost:3000".into()));
        assert_eq!(config.poller_config().interval, Duration::from_secs(2));
    }
}
