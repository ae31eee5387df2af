use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// Transient user-facing messages. The store never reads anything back.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);

    fn success(&self, message: &str) {
        self.notify(Notice {
            level: NoticeLevel::Success,
            message: message.to_string(),
        });
    }

    fn info(&self, message: &str) {
        self.notify(Notice {
            level: NoticeLevel::Info,
            message: message.to_string(),
        });
    }

    fn error(&self, message: &str) {
        self.notify(Notice {
            level: NoticeLevel::Error,
            message: message.to_string(),
        });
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Error => error!(message = %notice.message, "notice"),
            level => info!(?level, message = %notice.message, "notice"),
        }
    }
}

/// Keeps every notice; the CLI drains it after each command.
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    notices: Arc<Mutex<Vec<Notice>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<Notice> {
        std::mem::take(&mut *self.notices.lock())
    }

    pub fn last(&self) -> Option<Notice> {
        self.notices.lock().last().cloned()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }
}
