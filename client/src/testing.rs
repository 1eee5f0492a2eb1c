//! Scripted in-process backend for unit tests.

use crate::error::TransportError;
use crate::transport::Transport;
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Method;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Call {
    pub key: String,
    pub body: Option<Value>,
    pub auth: Option<String>,
}

#[derive(Clone)]
struct Step {
    delay: Duration,
    outcome: Result<Value, TransportError>,
}

/// Answers `"<METHOD> <path>"` keys from per-key queues. The last step of
/// a queue repeats forever. Every call is recorded before it is answered.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, key: &str, delay: Duration, outcome: Result<Value, TransportError>) {
        self.scripts
            .lock()
            .entry(key.to_string())
            .or_default()
            .push_back(Step { delay, outcome });
    }

    pub fn ok(&self, key: &str, value: Value) {
        self.push(key, Duration::ZERO, Ok(value));
    }

    pub fn ok_after(&self, key: &str, delay: Duration, value: Value) {
        self.push(key, delay, Ok(value));
    }

    pub fn fail(&self, key: &str, err: TransportError) {
        self.push(key, Duration::ZERO, Err(err));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, key: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.key == key).count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        auth: Option<&str>,
    ) -> Result<Value, TransportError> {
        let key = format!("{} {}", method, path);
        self.calls.lock().push(Call {
            key: key.clone(),
            body: body.cloned(),
            auth: auth.map(str::to_string),
        });

        let step = {
            let mut scripts = self.scripts.lock();
            match scripts.get_mut(&key) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };
        let Some(step) = step else {
            return Err(TransportError::Status {
                status: 404,
                body: format!("no script for {}", key),
            });
        };

        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        step.outcome
    }
}
