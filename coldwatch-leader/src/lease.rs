//! Lease-based leader election over a conditional store.

use crate::{LeaderError, LeaderNotificationBus, LeaderResult, LeadershipChange};
use chrono::Utc;
use coldwatch_core::{
    expiry_after, Condition, ConditionalStore, FieldUpdate, LeaseRecord, StoredRecord, LEASES,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

/// Configuration for the lease coordinator
#[derive(Debug, Clone)]
pub struct LeaseConfig {
    /// Identity written into the lease when this instance wins it
    pub owner_id: String,

    /// Key of the lease record; one key per coordination domain
    pub lease_key: String,

    /// How long a written lease stays valid
    pub ttl: Duration,

    /// Interval between renewals while leader
    pub renew_interval: Duration,

    /// Interval between acquisition attempts while follower
    pub acquire_interval: Duration,

    /// Upper bound of the random delay before the first attempt
    pub initial_jitter: Duration,

    /// Bound on every store call made by the coordinator
    pub store_timeout: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            owner_id: format!("collector-{}", uuid::Uuid::new_v4()),
            lease_key: "collector-leader".to_string(),
            ttl: Duration::from_secs(30),
            renew_interval: Duration::from_secs(10),
            acquire_interval: Duration::from_secs(5),
            initial_jitter: Duration::from_secs(3),
            store_timeout: Duration::from_secs(2),
        }
    }
}

impl LeaseConfig {
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            ..Self::default()
        }
    }

    pub fn with_lease_key(mut self, lease_key: impl Into<String>) -> Self {
        self.lease_key = lease_key.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_renew_interval(mut self, renew_interval: Duration) -> Self {
        self.renew_interval = renew_interval;
        self
    }

    pub fn with_acquire_interval(mut self, acquire_interval: Duration) -> Self {
        self.acquire_interval = acquire_interval;
        self
    }

    pub fn with_initial_jitter(mut self, initial_jitter: Duration) -> Self {
        self.initial_jitter = initial_jitter;
        self
    }

    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    /// Renewal never waits longer than half the TTL, so a healthy leader
    /// always renews before its lease can be reclaimed.
    pub fn effective_renew_interval(&self) -> Duration {
        self.renew_interval.min(self.ttl / 2)
    }

    pub fn validate(&self) -> LeaderResult<()> {
        if self.owner_id.trim().is_empty() {
            return Err(LeaderError::config("owner_id must not be empty"));
        }
        if self.lease_key.trim().is_empty() {
            return Err(LeaderError::config("lease_key must not be empty"));
        }
        if self.ttl.is_zero() {
            return Err(LeaderError::config("ttl must be greater than zero"));
        }
        if self.effective_renew_interval().is_zero() || self.acquire_interval.is_zero() {
            return Err(LeaderError::config("tick intervals must be greater than zero"));
        }
        Ok(())
    }
}

/// Local belief about leadership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaderState {
    Follower,
    Leader,
}

/// Snapshot answered to status queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderStatus {
    pub is_leader: bool,
    pub owner_id: String,
}

/// Statistics about lease operations
#[derive(Debug, Default, Clone)]
pub struct LeadershipStats {
    pub acquire_attempts: u64,
    pub acquisitions: u64,
    pub renewals: u64,
    pub demotions: u64,
    pub store_errors: u64,
}

/// Read-only view of the leadership flag.
///
/// Cloned into request handlers; reading it never touches the store.
#[derive(Debug, Clone)]
pub struct LeaderHandle {
    owner_id: Arc<str>,
    flag: Arc<AtomicBool>,
}

impl LeaderHandle {
    /// A handle with a fixed flag, not driven by any coordinator.
    pub fn detached(owner_id: impl Into<String>, is_leader: bool) -> Self {
        Self {
            owner_id: Arc::from(owner_id.into()),
            flag: Arc::new(AtomicBool::new(is_leader)),
        }
    }

    pub fn is_leader(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn status(&self) -> LeaderStatus {
        LeaderStatus {
            is_leader: self.is_leader(),
            owner_id: self.owner_id.to_string(),
        }
    }
}

/// Runs the acquire/renew loop and owns the only writer of the
/// leadership flag.
pub struct LeaseCoordinator {
    config: LeaseConfig,
    store: Arc<dyn ConditionalStore>,
    flag: Arc<AtomicBool>,
    notification_bus: Arc<LeaderNotificationBus>,
    stats: Arc<RwLock<LeadershipStats>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl LeaseCoordinator {
    pub fn new(config: LeaseConfig, store: Arc<dyn ConditionalStore>) -> LeaderResult<Self> {
        config.validate()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            store,
            flag: Arc::new(AtomicBool::new(false)),
            notification_bus: Arc::new(LeaderNotificationBus::new()),
            stats: Arc::new(RwLock::new(LeadershipStats::default())),
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn config(&self) -> &LeaseConfig {
        &self.config
    }

    pub fn handle(&self) -> LeaderHandle {
        LeaderHandle {
            owner_id: Arc::from(self.config.owner_id.as_str()),
            flag: Arc::clone(&self.flag),
        }
    }

    pub fn is_leader(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn state(&self) -> LeaderState {
        if self.is_leader() {
            LeaderState::Leader
        } else {
            LeaderState::Follower
        }
    }

    pub fn current_status(&self) -> LeaderStatus {
        self.handle().status()
    }

    pub fn notification_bus(&self) -> Arc<LeaderNotificationBus> {
        Arc::clone(&self.notification_bus)
    }

    pub async fn get_stats(&self) -> LeadershipStats {
        self.stats.read().await.clone()
    }

    /// Claim the lease if nobody holds it or the holder let it expire.
    ///
    /// Returns `Ok(false)` when another owner holds a live lease.
    pub async fn try_acquire(&self) -> LeaderResult<bool> {
        let now = Utc::now();
        let record = LeaseRecord::new(self.config.owner_id.as_str(), now, self.config.ttl);
        let document = record.to_document()?;

        self.stats.write().await.acquire_attempts += 1;

        let outcome = self
            .bounded("acquire", async {
                self.store
                    .put_if_absent_or_expired(
                        LEASES,
                        &self.config.lease_key,
                        document,
                        LeaseRecord::EXPIRES_AT_FIELD,
                        now.timestamp_millis(),
                    )
                    .await
            })
            .await?;

        debug!(
            owner_id = %self.config.owner_id,
            lease_key = %self.config.lease_key,
            ?outcome,
            "Lease acquisition attempt"
        );
        Ok(outcome.is_applied())
    }

    /// Extend the lease if this instance still owns it.
    ///
    /// Returns `Ok(false)` when the record is missing or owned by someone else.
    pub async fn renew(&self) -> LeaderResult<bool> {
        let expires_at = expiry_after(Utc::now(), self.config.ttl);
        let updates = [FieldUpdate::set(
            LeaseRecord::EXPIRES_AT_FIELD,
            expires_at.timestamp_millis(),
        )];
        let predicate = Condition::equals(LeaseRecord::OWNER_FIELD, self.config.owner_id.as_str());

        let outcome = self
            .bounded("renew", async {
                self.store
                    .update_if_matches(LEASES, &self.config.lease_key, &updates, predicate)
                    .await
            })
            .await?;

        debug!(owner_id = %self.config.owner_id, ?outcome, "Lease renewal attempt");
        Ok(outcome.is_applied())
    }

    /// The lease as currently stored, expired or not.
    pub async fn lease_holder(&self) -> LeaderResult<Option<LeaseRecord>> {
        let document = self
            .bounded("lease_holder", async {
                self.store.get(LEASES, &self.config.lease_key).await
            })
            .await?;

        document
            .map(|doc| {
                LeaseRecord::from_document(doc).map_err(|e| LeaderError::CorruptLease {
                    key: self.config.lease_key.clone(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    /// One step of the state machine. A follower tries to acquire, a leader
    /// renews; any renew failure, store errors included, demotes.
    pub async fn tick(&self) -> LeaderState {
        if self.is_leader() {
            match self.renew().await {
                Ok(true) => {
                    self.stats.write().await.renewals += 1;
                    self.notification_bus
                        .publish(LeadershipChange::Renewed {
                            owner_id: self.config.owner_id.clone(),
                            expires_at: expiry_after(Utc::now(), self.config.ttl),
                            timestamp: Utc::now(),
                        })
                        .await;
                }
                Ok(false) => {
                    self.demote("lease taken by another owner").await;
                }
                Err(e) => {
                    self.stats.write().await.store_errors += 1;
                    warn!(owner_id = %self.config.owner_id, error = %e, "Lease renewal failed");
                    self.demote("lease store unavailable").await;
                }
            }
        } else {
            match self.try_acquire().await {
                Ok(true) if self.shutdown_requested() => {
                    debug!(
                        owner_id = %self.config.owner_id,
                        "Lease acquired after shutdown was requested, staying follower"
                    );
                }
                Ok(true) => {
                    self.flag.store(true, Ordering::Release);
                    self.stats.write().await.acquisitions += 1;
                    info!(
                        owner_id = %self.config.owner_id,
                        lease_key = %self.config.lease_key,
                        "Acquired leadership"
                    );
                    self.notification_bus
                        .publish(LeadershipChange::Acquired {
                            owner_id: self.config.owner_id.clone(),
                            expires_at: expiry_after(Utc::now(), self.config.ttl),
                            timestamp: Utc::now(),
                        })
                        .await;
                }
                Ok(false) => {}
                Err(e) => {
                    self.stats.write().await.store_errors += 1;
                    warn!(owner_id = %self.config.owner_id, error = %e, "Lease acquisition failed");
                }
            }
        }

        self.state()
    }

    /// Run the loop until [`stop`](Self::stop) is called.
    pub async fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        info!(
            owner_id = %self.config.owner_id,
            ttl_ms = self.config.ttl.as_millis() as u64,
            "Starting lease coordinator"
        );

        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::spawn(async move {
            let jitter = random_delay(self.config.initial_jitter);
            tokio::select! {
                _ = tokio::time::sleep(jitter) => {}
                _ = shutdown_rx.changed() => return,
            }

            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                let wait = match self.tick().await {
                    LeaderState::Leader => self.config.effective_renew_interval(),
                    LeaderState::Follower => self.config.acquire_interval,
                };

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            // A tick racing stop() may have raised the flag after stop() cleared it
            self.demote("coordinator stopped").await;
            debug!(owner_id = %self.config.owner_id, "Lease loop exited");
        })
    }

    /// End the loop and drop local leadership. The stored lease is left to
    /// expire.
    pub async fn stop(&self) {
        info!(owner_id = %self.config.owner_id, "Stopping lease coordinator");

        if let Err(e) = self.shutdown_tx.send(true) {
            error!("Failed to send shutdown signal: {}", e);
        }

        if self.is_leader() {
            self.demote("coordinator stopped").await;
        }
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    async fn demote(&self, reason: &str) {
        if !self.flag.swap(false, Ordering::AcqRel) {
            return;
        }

        warn!(owner_id = %self.config.owner_id, reason, "Lost leadership");
        self.stats.write().await.demotions += 1;
        self.notification_bus
            .publish(LeadershipChange::Lost {
                owner_id: self.config.owner_id.clone(),
                reason: reason.to_string(),
                timestamp: Utc::now(),
            })
            .await;
    }

    async fn bounded<T, F>(&self, operation: &str, call: F) -> LeaderResult<T>
    where
        F: Future<Output = coldwatch_core::Result<T>>,
    {
        match tokio::time::timeout(self.config.store_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(LeaderError::Timeout {
                operation: operation.to_string(),
            }),
        }
    }
}

fn random_delay(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let millis = max.as_millis().min(u64::MAX as u128) as u64;
    Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
}
