//! Short-lived user notices (success, error, info).

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Success,
    Error,
    Info,
}

impl NoticeKind {
    pub fn default_lifetime(self) -> Duration {
        match self {
            NoticeKind::Error => Duration::from_millis(4000),
            NoticeKind::Success | NoticeKind::Info => Duration::from_millis(3000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Notice {
    pub id: u64,
    pub kind: NoticeKind,
    pub message: String,
    pub expires_at: Instant,
}

pub struct NoticeBoard {
    next_id: AtomicU64,
    notices: Mutex<Vec<Notice>>,
    events: broadcast::Sender<Notice>,
}

impl NoticeBoard {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            next_id: AtomicU64::new(1),
            notices: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn success(&self, message: impl Into<String>) -> u64 {
        self.post(NoticeKind::Success, message, NoticeKind::Success.default_lifetime())
    }

    pub fn error(&self, message: impl Into<String>) -> u64 {
        self.post(NoticeKind::Error, message, NoticeKind::Error.default_lifetime())
    }

    pub fn info(&self, message: impl Into<String>) -> u64 {
        self.post(NoticeKind::Info, message, NoticeKind::Info.default_lifetime())
    }

    pub fn post(&self, kind: NoticeKind, message: impl Into<String>, lifetime: Duration) -> u64 {
        let notice = Notice {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
            message: message.into(),
            expires_at: Instant::now() + lifetime,
        };
        let id = notice.id;
        self.notices.lock().push(notice.clone());
        // no subscribers is fine
        let _ = self.events.send(notice);
        id
    }

    pub fn dismiss(&self, id: u64) -> bool {
        let mut notices = self.notices.lock();
        let before = notices.len();
        notices.retain(|n| n.id != id);
        notices.len() != before
    }

    pub fn active(&self) -> Vec<Notice> {
        self.active_at(Instant::now())
    }

    fn active_at(&self, now: Instant) -> Vec<Notice> {
        let mut notices = self.notices.lock();
        notices.retain(|n| n.expires_at > now);
        notices.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.events.subscribe()
    }
}

impl Default for NoticeBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notices_expire_and_dismiss() {
        let board = NoticeBoard::new();
        let saved = board.success("Diagnosis submitted");
        let failed = board.error("Submission failed");
        assert_ne!(saved, failed);
        assert_eq!(board.active().len(), 2);

        let later = Instant::now() + Duration::from_millis(3500);
        let remaining = board.active_at(later);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].kind, NoticeKind::Error);

        assert!(board.dismiss(failed));
        assert!(!board.dismiss(failed));
        assert!(board.active().is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_see_posts() {
        let board = NoticeBoard::new();
        let mut rx = board.subscribe();
        board.info("Polling started");

        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.kind, NoticeKind::Info);
        assert_eq!(notice.message, "Polling started");
    }
}
