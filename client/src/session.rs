//! Durable client state: bearer tokens and the session expiry.
//!
//! The store is created once at start-up and handed to whoever needs it.
//! Entries live under fixed keys and, when a path is given, are mirrored
//! to a small JSON file after every change.

use crate::error::ClientError;
use chrono::{DateTime, Duration, TimeZone, Utc};
use common::{
    TokenPair, AUTH_TOKEN_KEY, REFRESH_TOKEN_KEY, SESSION_EXPIRY_KEY, SESSION_LIFETIME_MINUTES,
    USER_EMAIL_KEY,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const SESSION_KEYS: [&str; 4] = [
    AUTH_TOKEN_KEY,
    REFRESH_TOKEN_KEY,
    SESSION_EXPIRY_KEY,
    USER_EMAIL_KEY,
];

pub struct SessionStore {
    path: Option<PathBuf>,
    entries: Mutex<BTreeMap<String, String>>,
}

impl SessionStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Open the store backed by `path`, loading it if it exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ClientError> {
        let path = path.into();
        let entries = if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|e| ClientError::Session(format!("read {}: {}", path.display(), e)))?;
            serde_json::from_str(&content)
                .map_err(|e| ClientError::Session(format!("parse {}: {}", path.display(), e)))?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: Some(path),
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    pub fn store_login(&self, email: &str, tokens: &TokenPair) -> Result<(), ClientError> {
        self.store_login_at(email, tokens, Utc::now())
    }

    fn store_login_at(
        &self,
        email: &str,
        tokens: &TokenPair,
        now: DateTime<Utc>,
    ) -> Result<(), ClientError> {
        let expiry = now + Duration::minutes(SESSION_LIFETIME_MINUTES);
        let mut entries = self.entries.lock();
        entries.insert(AUTH_TOKEN_KEY.to_string(), tokens.access_token.clone());
        match tokens.refresh_token {
            Some(ref refresh) => entries.insert(REFRESH_TOKEN_KEY.to_string(), refresh.clone()),
            None => entries.remove(REFRESH_TOKEN_KEY),
        };
        entries.insert(USER_EMAIL_KEY.to_string(), email.to_string());
        entries.insert(
            SESSION_EXPIRY_KEY.to_string(),
            expiry.timestamp_millis().to_string(),
        );
        self.persist(&entries)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let millis: i64 = self.get(SESSION_EXPIRY_KEY)?.parse().ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }

    pub fn user_email(&self) -> Option<String> {
        self.get(USER_EMAIL_KEY)
    }

    /// Access token of a live session. An expired or half-written session
    /// is wiped and reported as absent.
    pub fn bearer(&self) -> Option<String> {
        self.bearer_at(Utc::now())
    }

    fn bearer_at(&self, now: DateTime<Utc>) -> Option<String> {
        let mut entries = self.entries.lock();
        let token = entries.get(AUTH_TOKEN_KEY).cloned()?;
        let expiry = entries
            .get(SESSION_EXPIRY_KEY)
            .and_then(|raw| raw.parse::<i64>().ok());

        match expiry {
            Some(expiry) if now.timestamp_millis() < expiry => Some(token),
            _ => {
                log::info!("Session expired, clearing stored credentials");
                for key in SESSION_KEYS {
                    entries.remove(key);
                }
                if let Err(e) = self.persist(&entries) {
                    log::warn!("Failed to persist cleared session: {}", e);
                }
                None
            }
        }
    }

    pub fn clear(&self) -> Result<(), ClientError> {
        let mut entries = self.entries.lock();
        for key in SESSION_KEYS {
            entries.remove(key);
        }
        self.persist(&entries)
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), ClientError> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| ClientError::Session(format!("create {}: {}", parent.display(), e)))?;
        }
        let content = serde_json::to_string_pretty(entries)
            .map_err(|e| ClientError::Session(e.to_string()))?;
        fs::write(path, content)
            .map_err(|e| ClientError::Session(format!("write {}: {}", path.display(), e)))
    }
}
