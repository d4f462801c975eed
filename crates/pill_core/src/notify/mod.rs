//! Reminder delivery. Sinks are fire-and-forget from the caller's point of view: requests are
//! queued on [`NotificationDispatcher`] and delivered by a background worker.

use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::NotifyConfig;
use crate::domain::{Notification, NotificationPriority};
use crate::error::AppError;

pub trait Notifier: Send + Sync {
    fn send(&self, notification: &Notification) -> Result<(), AppError>;
}

/// Push sink backed by an ntfy server, using its JSON publish endpoint.
#[derive(Debug, Clone)]
pub struct NtfyNotifier {
    base_url: String,
    topic: String,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct PublishRequest<'a> {
    topic: &'a str,
    title: &'a str,
    message: &'a str,
    priority: u8,
    tags: &'a [String],
}

fn priority_level(p: NotificationPriority) -> u8 {
    match p {
        NotificationPriority::Min => 1,
        NotificationPriority::Low => 2,
        NotificationPriority::Default => 3,
        NotificationPriority::High => 4,
        NotificationPriority::Urgent => 5,
    }
}

impl NtfyNotifier {
    pub fn new(base_url: &str, topic: &str, timeout: Duration) -> Result<Self, AppError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(AppError::new("NOTIFY_CONFIG_INVALID", "ntfy base URL must be http(s)")
                .with_details(format!("base_url={base_url}")));
        }
        let topic = topic.trim();
        if topic.is_empty() || topic.contains('/') {
            return Err(AppError::new("NOTIFY_CONFIG_INVALID", "ntfy topic is invalid")
                .with_details(format!("topic={topic}")));
        }
        Ok(Self {
            base_url,
            topic: topic.to_string(),
            timeout,
        })
    }

    pub fn from_config(cfg: &NotifyConfig) -> Result<Self, AppError> {
        Self::new(&cfg.base_url, &cfg.topic, Duration::from_secs(cfg.timeout_secs))
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Notifier for NtfyNotifier {
    fn send(&self, notification: &Notification) -> Result<(), AppError> {
        let req = PublishRequest {
            topic: &self.topic,
            title: &notification.title,
            message: &notification.body,
            priority: priority_level(notification.priority),
            tags: &notification.tags,
        };
        let body = serde_json::to_value(&req).map_err(|e| {
            AppError::new("NOTIFY_FAILED", "Failed to encode notification")
                .with_details(e.to_string())
        })?;

        match ureq::post(&self.base_url).timeout(self.timeout).send_json(body) {
            Ok(r) if r.status() == 200 => Ok(()),
            Ok(r) => Err(AppError::new("NOTIFY_FAILED", "Notification request failed")
                .with_details(format!("status={}", r.status()))),
            Err(ureq::Error::Status(code, _)) => Err(AppError::new(
                "NOTIFY_FAILED",
                "Notification request rejected",
            )
            .with_details(format!("status={code}"))
            .with_retryable(code == 429 || code >= 500)),
            Err(e) => Err(
                AppError::new("NOTIFY_FAILED", "Failed to reach notification server")
                    .with_details(e.to_string())
                    .with_retryable(true),
            ),
        }
    }
}

/// Reminder built from the configured defaults.
pub fn reminder_from_config(cfg: &NotifyConfig) -> Notification {
    Notification {
        title: cfg.title.clone(),
        body: cfg.message.clone(),
        priority: cfg.priority,
        tags: cfg.tags.clone(),
    }
}

/// Queue in front of a [`Notifier`]. Dropping the dispatcher drains pending notifications.
pub struct NotificationDispatcher {
    tx: Option<Sender<Notification>>,
    worker: Option<JoinHandle<()>>,
}

impl NotificationDispatcher {
    pub fn spawn(notifier: Arc<dyn Notifier>) -> Result<Self, AppError> {
        let (tx, rx) = mpsc::channel::<Notification>();
        let worker = std::thread::Builder::new()
            .name("pillpal-notify".to_string())
            .spawn(move || {
                for n in rx {
                    match notifier.send(&n) {
                        Ok(()) => info!(title = %n.title, "notification delivered"),
                        Err(e) => warn!(title = %n.title, error = %e, details = ?e.details, "notification failed"),
                    }
                }
                debug!("notification worker stopped");
            })
            .map_err(|e| {
                AppError::new("NOTIFY_WORKER_FAILED", "Failed to start notification worker")
                    .with_details(e.to_string())
            })?;
        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    /// Enqueue without waiting for delivery. Returns false if the worker has gone away.
    pub fn dispatch(&self, notification: Notification) -> bool {
        match self.tx.as_ref() {
            Some(tx) => match tx.send(notification) {
                Ok(()) => true,
                Err(_) => {
                    warn!("notification worker unavailable; dropping notification");
                    false
                }
            },
            None => false,
        }
    }

    /// Close the queue and wait for already-queued notifications to be attempted.
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        self.tx.take();
        if let Some(h) = self.worker.take() {
            if h.join().is_err() {
                warn!("notification worker panicked");
            }
        }
    }
}

impl Drop for NotificationDispatcher {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingNotifier {
        seen: Mutex<Vec<String>>,
        fail: bool,
    }

    impl Notifier for RecordingNotifier {
        fn send(&self, notification: &Notification) -> Result<(), AppError> {
            self.seen.lock().unwrap().push(notification.title.clone());
            if self.fail {
                return Err(AppError::new("NOTIFY_FAILED", "boom"));
            }
            Ok(())
        }
    }

    fn note(title: &str) -> Notification {
        Notification {
            title: title.to_string(),
            body: "take your medicine".to_string(),
            priority: NotificationPriority::High,
            tags: vec!["alarm_clock".to_string()],
        }
    }

    #[test]
    fn dispatcher_delivers_in_order_and_drains_on_shutdown() {
        let sink = Arc::new(RecordingNotifier {
            seen: Mutex::new(Vec::new()),
            fail: false,
        });
        let dispatcher = NotificationDispatcher::spawn(sink.clone()).expect("spawn");
        assert!(dispatcher.dispatch(note("a")));
        assert!(dispatcher.dispatch(note("b")));
        dispatcher.shutdown();
        assert_eq!(*sink.seen.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn sink_failures_do_not_reach_the_caller() {
        let sink = Arc::new(RecordingNotifier {
            seen: Mutex::new(Vec::new()),
            fail: true,
        });
        let dispatcher = NotificationDispatcher::spawn(sink.clone()).expect("spawn");
        assert!(dispatcher.dispatch(note("a")));
        drop(dispatcher);
        assert_eq!(sink.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn ntfy_rejects_bad_configuration() {
        let t = Duration::from_secs(1);
        assert!(NtfyNotifier::new("https://ntfy.sh/", "PillPal", t).is_ok());
        assert!(NtfyNotifier::new("ftp://ntfy.sh", "PillPal", t).is_err());
        assert!(NtfyNotifier::new("https://ntfy.sh", "", t).is_err());
        assert!(NtfyNotifier::new("https://ntfy.sh", "a/b", t).is_err());
    }

    #[test]
    fn reminder_uses_configured_defaults() {
        let n = reminder_from_config(&NotifyConfig::default());
        assert_eq!(n.priority, NotificationPriority::High);
        assert_eq!(n.tags, vec!["alarm_clock".to_string()]);
        assert_eq!(priority_level(n.priority), 4);
    }
}
