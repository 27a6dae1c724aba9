//! Notification system for leadership changes.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Leadership transitions observed by one coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum LeadershipChange {
    /// This instance won the lease
    Acquired {
        owner_id: String,
        expires_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    /// This instance extended its lease
    Renewed {
        owner_id: String,
        expires_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    /// This instance stopped believing it is leader
    Lost {
        owner_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl LeadershipChange {
    pub fn owner_id(&self) -> &str {
        match self {
            LeadershipChange::Acquired { owner_id, .. }
            | LeadershipChange::Renewed { owner_id, .. }
            | LeadershipChange::Lost { owner_id, .. } => owner_id,
        }
    }

    /// Acquired and Lost change the leadership flag; Renewed does not.
    pub fn is_transition(&self) -> bool {
        !matches!(self, LeadershipChange::Renewed { .. })
    }
}

/// Subscription filter for notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationFilter {
    /// Every change, renewals included
    All,

    /// Only Acquired and Lost
    Transitions,
}

impl NotificationFilter {
    fn matches(&self, change: &LeadershipChange) -> bool {
        match self {
            NotificationFilter::All => true,
            NotificationFilter::Transitions => change.is_transition(),
        }
    }
}

/// Unique identifier for a subscription
pub type SubscriptionId = Uuid;

/// Statistics about notification delivery
#[derive(Debug, Default, Clone)]
pub struct NotificationStats {
    pub notifications_sent: u64,
    pub notifications_delivered: u64,
    pub notifications_dropped: u64,
    pub active_subscriptions: usize,
}

type SubscriberMap =
    HashMap<SubscriptionId, (NotificationFilter, mpsc::UnboundedSender<LeadershipChange>)>;

/// Fan-out of leadership changes to interested observers (dashboards, logs).
pub struct LeaderNotificationBus {
    broadcast_tx: broadcast::Sender<LeadershipChange>,
    subscribers: Arc<RwLock<SubscriberMap>>,
    stats: Arc<RwLock<NotificationStats>>,
}

impl Default for LeaderNotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaderNotificationBus {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity);

        Self {
            broadcast_tx,
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(NotificationStats::default())),
        }
    }

    /// Receive every change published from now on. Slow receivers lag
    /// rather than block the coordinator.
    pub fn watch(&self) -> broadcast::Receiver<LeadershipChange> {
        self.broadcast_tx.subscribe()
    }

    /// Subscribe with a filter; the receiver is unbounded.
    pub async fn subscribe(
        &self,
        filter: NotificationFilter,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<LeadershipChange>) {
        let subscription_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let active = {
            let mut subscribers = self.subscribers.write().await;
            subscribers.insert(subscription_id, (filter, tx));
            subscribers.len()
        };
        self.stats.write().await.active_subscriptions = active;

        debug!("Created subscription {} with filter {:?}", subscription_id, filter);
        (subscription_id, rx)
    }

    pub async fn unsubscribe(&self, subscription_id: SubscriptionId) {
        let active = {
            let mut subscribers = self.subscribers.write().await;
            if subscribers.remove(&subscription_id).is_none() {
                return;
            }
            subscribers.len()
        };
        debug!("Removed subscription {}", subscription_id);
        self.stats.write().await.active_subscriptions = active;
    }

    pub async fn publish(&self, change: LeadershipChange) {
        // No receivers is the normal case when nobody watches
        let _ = self.broadcast_tx.send(change.clone());

        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let subscribers = self.subscribers.read().await;
            for (id, (filter, tx)) in subscribers.iter() {
                if !filter.matches(&change) {
                    continue;
                }
                match tx.send(change.clone()) {
                    Ok(()) => delivered += 1,
                    Err(_) => closed.push(*id),
                }
            }
        }

        let active = if closed.is_empty() {
            self.subscribers.read().await.len()
        } else {
            warn!("Dropping {} closed leadership subscriptions", closed.len());
            let mut subscribers = self.subscribers.write().await;
            for id in &closed {
                subscribers.remove(id);
            }
            subscribers.len()
        };

        // Never hold the subscriber map and the stats together
        let mut stats = self.stats.write().await;
        stats.notifications_sent += 1;
        stats.notifications_delivered += delivered;
        stats.notifications_dropped += closed.len() as u64;
        stats.active_subscriptions = active;
    }

    pub async fn get_stats(&self) -> NotificationStats {
        self.stats.read().await.clone()
    }
}
