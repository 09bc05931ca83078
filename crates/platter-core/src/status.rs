//! User-visible status line
//!
//! Components report noteworthy events here in addition to the log. The
//! front end shows the latest message; alerts are also counted so a caller
//! can tell whether anything went wrong during a run.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Alert,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub level: StatusLevel,
    pub text: String,
}

impl fmt::Display for StatusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            StatusLevel::Info => write!(f, "{}", self.text),
            StatusLevel::Alert => write!(f, "ALERT: {}", self.text),
        }
    }
}

#[derive(Debug, Default)]
struct StatusInner {
    current: Option<StatusMessage>,
    alerts: usize,
}

/// Shared handle to the status line; clones refer to the same line
#[derive(Debug, Clone, Default)]
pub struct Status {
    inner: Arc<Mutex<StatusInner>>,
}

impl Status {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StatusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn info(&self, text: impl Into<String>) {
        let text = text.into();
        log::info!("{}", text);
        self.lock().current = Some(StatusMessage {
            level: StatusLevel::Info,
            text,
        });
    }

    pub fn alert(&self, text: impl Into<String>) {
        let text = text.into();
        log::warn!("{}", text);
        let mut inner = self.lock();
        inner.alerts += 1;
        inner.current = Some(StatusMessage {
            level: StatusLevel::Alert,
            text,
        });
    }

    /// The most recent message, if any
    pub fn current(&self) -> Option<StatusMessage> {
        self.lock().current.clone()
    }

    /// Number of alerts raised so far
    pub fn alerts(&self) -> usize {
        self.lock().alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_is_counted_and_shared() {
        let status = Status::new();
        let clone = status.clone();

        status.info("Scanning");
        assert_eq!(clone.alerts(), 0);

        clone.alert("Error loading cues");
        assert_eq!(status.alerts(), 1);
        let current = status.current().unwrap();
        assert_eq!(current.level, StatusLevel::Alert);
        assert_eq!(current.to_string(), "ALERT: Error loading cues");
    }
}
