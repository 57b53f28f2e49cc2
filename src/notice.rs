use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// A transient, user-visible notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub description: String,
}

#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notice>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    pub fn info(&self, title: &str, description: impl Into<String>) {
        self.emit(NoticeLevel::Info, title, description.into());
    }

    pub fn success(&self, title: &str, description: impl Into<String>) {
        self.emit(NoticeLevel::Success, title, description.into());
    }

    pub fn error(&self, title: &str, description: impl Into<String>) {
        self.emit(NoticeLevel::Error, title, description.into());
    }

    fn emit(&self, level: NoticeLevel, title: &str, description: String) {
        // Nobody listening is fine.
        let _ = self.tx.send(Notice {
            level,
            title: title.to_string(),
            description,
        });
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
