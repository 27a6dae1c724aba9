use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use coldwatch_collector::{NotificationChannel, NotificationMessage, NotifyError};

/// Channel that remembers every message it was asked to send.
///
/// Shared by all instances of a cluster, it stands in for the outside
/// world: the number of recorded messages per alert is the number of
/// notifications an operator would have received.
#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<NotificationMessage>>,
    failing: AtomicBool,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail. Failed sends are still recorded as attempts.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<NotificationMessage> {
        self.sent.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn count_for(&self, alert_id: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|message| message.alert_id == alert_id)
            .count()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
        self.sent.lock().push(message.clone());

        if self.failing.load(Ordering::SeqCst) {
            Err(NotifyError::Unavailable("recording channel set to fail".into()))
        } else {
            Ok(())
        }
    }
}
