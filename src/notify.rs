use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A user-facing message, the equivalent of a toast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub severity: Severity,
}

/// Non-blocking notification channel shared by the pipeline components.
#[derive(Clone)]
pub struct Notifier {
    tx: Option<mpsc::UnboundedSender<Notification>>,
    sent_keys: Arc<Mutex<HashSet<String>>>,
}

impl Notifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(tx),
                sent_keys: Arc::new(Mutex::new(HashSet::new())),
            },
            rx,
        )
    }

    /// Notifier that only logs.
    pub fn log_only() -> Self {
        Self {
            tx: None,
            sent_keys: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn notify(&self, severity: Severity, title: impl Into<String>, message: impl Into<String>) {
        let notification = Notification {
            title: title.into(),
            message: message.into(),
            severity,
        };

        match severity {
            Severity::Info => info!("{}: {}", notification.title, notification.message),
            Severity::Warning | Severity::Error => {
                warn!("{}: {}", notification.title, notification.message)
            }
        }

        if let Some(tx) = &self.tx {
            // receiver gone means nobody is listening anymore
            let _ = tx.send(notification);
        }
    }

    /// Send at most once per `key` for the lifetime of this notifier.
    pub fn notify_once(
        &self,
        key: &str,
        severity: Severity,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> bool {
        if !self.sent_keys.lock().insert(key.to_string()) {
            return false;
        }
        self.notify(severity, title, message);
        true
    }

    /// Allow a keyed notification to fire again.
    pub fn reset(&self, key: &str) {
        self.sent_keys.lock().remove(key);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::log_only()
    }
}
