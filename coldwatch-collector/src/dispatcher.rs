//! Exactly-once critical notification.
//!
//! Any number of collectors may call [`NotificationDispatcher::dispatch_if_critical`]
//! for the same alert. Only the caller whose conditional write flips
//! `notified` from false to true sends. The leadership check is an
//! optimisation that keeps followers from contending; correctness rests on
//! the conditional write alone.

use crate::channels::{NotificationChannel, NotificationMessage};
use crate::error::bounded;
use crate::{CollectorResult, NotifyError};
use chrono::Utc;
use coldwatch_core::{Alert, Condition, ConditionalStore, FieldUpdate, ALERTS};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// What happened to one dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchOutcome {
    /// Severity below critical; nothing to do
    NotCritical,
    /// This instance is not the leader
    NotLeader,
    /// Another caller already claimed the notification, or the alert is resolved
    AlreadyNotified,
    /// This caller claimed the notification and the channel accepted it
    Sent,
    /// Claimed but the channel failed. Not retried; the alert stays notified.
    SendFailed,
    /// The claim itself could not be written
    MarkFailed,
}

impl DispatchOutcome {
    /// Whether this attempt was the one allowed to send.
    pub fn claimed(&self) -> bool {
        matches!(self, DispatchOutcome::Sent | DispatchOutcome::SendFailed)
    }
}

pub struct NotificationDispatcher {
    store: Arc<dyn ConditionalStore>,
    channel: Arc<dyn NotificationChannel>,
    destination: String,
    store_timeout: Duration,
    notify_timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn ConditionalStore>,
        channel: Arc<dyn NotificationChannel>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            store,
            channel,
            destination: destination.into(),
            store_timeout: Duration::from_secs(2),
            notify_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeouts(mut self, store_timeout: Duration, notify_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self.notify_timeout = notify_timeout;
        self
    }

    /// Claim the right to notify for `alert_id`.
    ///
    /// Succeeds for exactly one caller: the alert must exist, be unnotified
    /// and be unresolved.
    pub async fn try_mark_notified(&self, alert_id: &str) -> CollectorResult<bool> {
        let updates = [
            FieldUpdate::set(Alert::NOTIFIED_FIELD, true),
            FieldUpdate::set(Alert::NOTIFIED_AT_FIELD, Utc::now().to_rfc3339()),
        ];
        let predicate = Condition::not_true(Alert::NOTIFIED_FIELD)
            .and(Condition::not_true(Alert::RESOLVED_FIELD));

        let outcome = bounded(self.store_timeout, "mark notified", async {
            self.store
                .update_if_matches(ALERTS, alert_id, &updates, predicate)
                .await
        })
        .await?;

        debug!(alert_id, ?outcome, "Mark-notified attempt");
        Ok(outcome.is_applied())
    }

    pub async fn dispatch_if_critical<F>(&self, alert: &Alert, is_leader: F) -> DispatchOutcome
    where
        F: Fn() -> bool,
    {
        if !alert.is_critical() {
            return DispatchOutcome::NotCritical;
        }
        if !is_leader() {
            debug!(alert_id = %alert.id, "Not leader, leaving notification to the leader");
            return DispatchOutcome::NotLeader;
        }

        match self.try_mark_notified(&alert.id).await {
            Ok(true) => {}
            Ok(false) => return DispatchOutcome::AlreadyNotified,
            Err(e) => {
                error!(alert_id = %alert.id, error = %e, "Failed to mark alert notified");
                return DispatchOutcome::MarkFailed;
            }
        }

        let message = NotificationMessage::for_alert(alert, self.destination.as_str());
        match self.send(&message).await {
            Ok(()) => {
                info!(
                    alert_id = %alert.id,
                    channel = self.channel.name(),
                    "Critical notification sent"
                );
                DispatchOutcome::Sent
            }
            Err(e) => {
                error!(
                    alert_id = %alert.id,
                    channel = self.channel.name(),
                    error = %e,
                    "Critical notification failed; not retrying"
                );
                DispatchOutcome::SendFailed
            }
        }
    }

    async fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
        match tokio::time::timeout(self.notify_timeout, self.channel.send(message)).await {
            Ok(result) => result,
            Err(_) => Err(NotifyError::Timeout(self.notify_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::LogChannel;
    use crate::AlertLedger;
    use async_trait::async_trait;
    use coldwatch_core::AlertType;
    use coldwatch_store::{FileSystemStore, InMemoryStore};
    use futures_util::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        sent: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl NotificationChannel for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn send(&self, _message: &NotificationMessage) -> Result<(), NotifyError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(NotifyError::Unavailable("smtp down".into()))
            } else {
                Ok(())
            }
        }
    }

    struct Stalled;

    #[async_trait]
    impl NotificationChannel for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn send(&self, _message: &NotificationMessage) -> Result<(), NotifyError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    async fn setup(channel: Arc<dyn NotificationChannel>) -> (AlertLedger, NotificationDispatcher) {
        let store: Arc<dyn ConditionalStore> = Arc::new(InMemoryStore::new());
        let ledger = AlertLedger::new(Arc::clone(&store), Duration::from_secs(1));
        let dispatcher = NotificationDispatcher::new(store, channel, "operators");
        (ledger, dispatcher)
    }

    #[tokio::test]
    async fn test_non_critical_is_ignored() {
        let channel = Arc::new(Counting::default());
        let (ledger, dispatcher) = setup(channel.clone()).await;
        let alert = ledger.raise("s1", 5.0, AlertType::DoorOpen, "open").await.unwrap();

        assert_eq!(
            dispatcher.dispatch_if_critical(&alert, || true).await,
            DispatchOutcome::NotCritical
        );
        assert_eq!(channel.sent.load(Ordering::SeqCst), 0);
        assert!(!ledger.get(&alert.id).await.unwrap().unwrap().notified);
    }

    #[tokio::test]
    async fn test_follower_does_not_send() {
        let channel = Arc::new(Counting::default());
        let (ledger, dispatcher) = setup(channel.clone()).await;
        let alert = ledger
            .raise("s1", 9.0, AlertType::CriticalTemperature, "warm")
            .await
            .unwrap();

        assert_eq!(
            dispatcher.dispatch_if_critical(&alert, || false).await,
            DispatchOutcome::NotLeader
        );
        assert_eq!(channel.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_second_dispatch_is_suppressed() {
        let channel = Arc::new(Counting::default());
        let (ledger, dispatcher) = setup(channel.clone()).await;
        let alert = ledger
            .raise("s1", 9.0, AlertType::CriticalTemperature, "warm")
            .await
            .unwrap();

        assert_eq!(dispatcher.dispatch_if_critical(&alert, || true).await, DispatchOutcome::Sent);
        assert_eq!(
            dispatcher.dispatch_if_critical(&alert, || true).await,
            DispatchOutcome::AlreadyNotified
        );
        assert_eq!(channel.sent.load(Ordering::SeqCst), 1);

        let stored = ledger.get(&alert.id).await.unwrap().unwrap();
        assert!(stored.notified);
        assert!(stored.notified_at.is_some());
    }

    #[tokio::test]
    async fn test_resolved_alert_is_not_claimed() {
        let (ledger, dispatcher) = setup(Arc::new(LogChannel)).await;
        let alert = ledger
            .raise("s1", 9.0, AlertType::CriticalTemperature, "warm")
            .await
            .unwrap();
        ledger.resolve(&alert.id).await.unwrap();

        assert!(!dispatcher.try_mark_notified(&alert.id).await.unwrap());
        assert!(!dispatcher.try_mark_notified("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_send_is_not_retried() {
        let channel = Arc::new(Counting {
            sent: AtomicUsize::new(0),
            fail: true,
        });
        let (ledger, dispatcher) = setup(channel.clone()).await;
        let alert = ledger
            .raise("s1", 1.0, AlertType::CriticalTemperature, "cold")
            .await
            .unwrap();

        assert_eq!(
            dispatcher.dispatch_if_critical(&alert, || true).await,
            DispatchOutcome::SendFailed
        );
        assert_eq!(
            dispatcher.dispatch_if_critical(&alert, || true).await,
            DispatchOutcome::AlreadyNotified
        );
        assert_eq!(channel.sent.load(Ordering::SeqCst), 1);
        assert!(ledger.get(&alert.id).await.unwrap().unwrap().notified);
    }

    #[tokio::test]
    async fn test_stalled_channel_times_out() {
        let (ledger, dispatcher) = setup(Arc::new(Stalled)).await;
        let dispatcher =
            dispatcher.with_timeouts(Duration::from_secs(1), Duration::from_millis(50));
        let alert = ledger
            .raise("s1", 9.0, AlertType::CriticalTemperature, "warm")
            .await
            .unwrap();

        assert_eq!(
            dispatcher.dispatch_if_critical(&alert, || true).await,
            DispatchOutcome::SendFailed
        );
    }

    #[tokio::test]
    async fn test_failed_mark_leaves_alert_claimable() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let file_store = Arc::new(FileSystemStore::new(temp_dir.path()).await.unwrap());
        let store: Arc<dyn ConditionalStore> = file_store.clone();
        let channel = Arc::new(Counting::default());
        let ledger = AlertLedger::new(Arc::clone(&store), Duration::from_secs(1));
        let dispatcher = NotificationDispatcher::new(store, channel.clone(), "operators");
        let alert = ledger
            .raise("s1", 11.0, AlertType::CriticalTemperature, "warm")
            .await
            .unwrap();

        let blocker = file_store.state_file_path().with_extension("tmp");
        std::fs::create_dir(&blocker).unwrap();
        assert_eq!(
            dispatcher.dispatch_if_critical(&alert, || true).await,
            DispatchOutcome::MarkFailed
        );
        assert!(!ledger.get(&alert.id).await.unwrap().unwrap().notified);

        std::fs::remove_dir(&blocker).unwrap();
        assert_eq!(dispatcher.dispatch_if_critical(&alert, || true).await, DispatchOutcome::Sent);
        assert_eq!(channel.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_dispatchers_send_once() {
        let channel = Arc::new(Counting::default());
        let (ledger, dispatcher) = setup(channel.clone()).await;
        let dispatcher = Arc::new(dispatcher);
        let alert = ledger
            .raise("s1", 12.0, AlertType::CriticalTemperature, "warm")
            .await
            .unwrap();

        let attempts = (0..16).map(|_| {
            let dispatcher = Arc::clone(&dispatcher);
            let alert = alert.clone();
            tokio::spawn(async move { dispatcher.dispatch_if_critical(&alert, || true).await })
        });
        let outcomes: Vec<DispatchOutcome> = join_all(attempts)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        assert_eq!(outcomes.iter().filter(|o| o.claimed()).count(), 1);
        assert_eq!(channel.sent.load(Ordering::SeqCst), 1);
    }
}
