//! The collector facade handed to transport layers.

use crate::channels::{FanOutChannel, LogChannel, NotificationChannel, WebhookChannel};
use crate::dispatcher::NotificationDispatcher;
use crate::pipeline::{IngestAck, IngestionPipeline};
use crate::replication::ReplicationMonitor;
use crate::{AlertCounts, AlertLedger, CollectorConfig, CollectorError, CollectorResult};
use chrono::{DateTime, Utc};
use coldwatch_core::{Alert, ConditionalStore, LeaseRecord, Reading, ReplicationSnapshot};
use coldwatch_leader::{LeaderHandle, LeaderStatus, LeaseCoordinator};
use coldwatch_store::{FileSystemStore, InMemoryStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Liveness summary for probes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub store_reachable: bool,
    pub replication_enabled: bool,
    pub leader: LeaderStatus,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.store_reachable
    }
}

/// One collector instance: its lease coordinator plus the alert and
/// ingestion machinery sharing one store.
pub struct CollectorService {
    config: CollectorConfig,
    store: Arc<dyn ConditionalStore>,
    coordinator: Arc<LeaseCoordinator>,
    ledger: AlertLedger,
    dispatcher: Arc<NotificationDispatcher>,
    pipeline: IngestionPipeline,
    replication: ReplicationMonitor,
    lease_loop: Mutex<Option<JoinHandle<()>>>,
}

impl CollectorService {
    pub fn new(
        config: CollectorConfig,
        store: Arc<dyn ConditionalStore>,
        channel: Arc<dyn NotificationChannel>,
    ) -> CollectorResult<Self> {
        config.validate()?;

        let coordinator = Arc::new(LeaseCoordinator::new(
            config.lease.clone(),
            Arc::clone(&store),
        )?);
        let ledger = AlertLedger::new(Arc::clone(&store), config.store_timeout);
        let dispatcher = Arc::new(
            NotificationDispatcher::new(
                Arc::clone(&store),
                channel,
                config.notify_destination.as_str(),
            )
            .with_timeouts(config.store_timeout, config.notify_timeout),
        );
        let pipeline = IngestionPipeline::new(
            Arc::clone(&store),
            ledger.clone(),
            Arc::clone(&dispatcher),
            coordinator.handle(),
        )
        .with_range(config.temperature_range)
        .with_store_timeout(config.store_timeout);
        let replication =
            ReplicationMonitor::new(Arc::clone(&store)).with_store_timeout(config.store_timeout);

        Ok(Self {
            config,
            store,
            coordinator,
            ledger,
            dispatcher,
            pipeline,
            replication,
            lease_loop: Mutex::new(None),
        })
    }

    pub fn with_replica(mut self, replica: Arc<dyn ConditionalStore>) -> Self {
        self.replication = ReplicationMonitor::new(Arc::clone(&self.store))
            .with_replica(replica)
            .with_store_timeout(self.config.store_timeout);
        self
    }

    /// Wire stores and channels from configuration: a file-backed store when
    /// a data directory is set, otherwise in-memory; a webhook alongside the
    /// log when a URL is set.
    pub async fn from_config(config: CollectorConfig) -> CollectorResult<Self> {
        let store: Arc<dyn ConditionalStore> = match &config.data_dir {
            Some(dir) => Arc::new(FileSystemStore::new(dir).await?),
            None => {
                warn!("No data directory configured; readings and alerts live in memory only");
                Arc::new(InMemoryStore::new())
            }
        };

        let mut channel = FanOutChannel::new().with_channel(Arc::new(LogChannel));
        if let Some(url) = &config.webhook_url {
            let webhook = WebhookChannel::new(url.as_str(), config.notify_timeout).map_err(|e| {
                CollectorError::Config {
                    reason: e.to_string(),
                }
            })?;
            channel = channel.with_channel(Arc::new(webhook));
        }

        let replica = match &config.replica_dir {
            Some(dir) => Some(Arc::new(FileSystemStore::new(dir).await?) as Arc<dyn ConditionalStore>),
            None => None,
        };

        let service = Self::new(config, store, Arc::new(channel))?;
        Ok(match replica {
            Some(replica) => service.with_replica(replica),
            None => service,
        })
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    pub fn coordinator(&self) -> Arc<LeaseCoordinator> {
        Arc::clone(&self.coordinator)
    }

    pub fn leader_handle(&self) -> LeaderHandle {
        self.coordinator.handle()
    }

    pub fn dispatcher(&self) -> Arc<NotificationDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn ledger(&self) -> &AlertLedger {
        &self.ledger
    }

    /// Start the lease loop. Calling it twice has no effect.
    pub async fn start(&self) {
        let mut lease_loop = self.lease_loop.lock().await;
        if lease_loop.is_some() {
            return;
        }

        info!(instance_id = %self.config.instance_id(), "Starting collector");
        *lease_loop = Some(Arc::clone(&self.coordinator).start().await);
    }

    /// Stop the lease loop and drop local leadership. The lease itself is
    /// left to expire.
    pub async fn stop(&self) {
        self.coordinator.stop().await;

        if let Some(handle) = self.lease_loop.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Lease loop ended abnormally");
            }
        }
        info!(instance_id = %self.config.instance_id(), "Collector stopped");
    }

    pub async fn ingest(
        &self,
        sensor_id: &str,
        temperature: f64,
        taken_at: DateTime<Utc>,
    ) -> CollectorResult<IngestAck> {
        self.pipeline.ingest(sensor_id, temperature, taken_at).await
    }

    pub async fn list_alerts(&self, limit: usize) -> CollectorResult<Vec<Alert>> {
        self.ledger.list(limit).await
    }

    pub async fn latest_alert(&self) -> CollectorResult<Option<Alert>> {
        self.ledger.latest().await
    }

    pub async fn get_alert(&self, alert_id: &str) -> CollectorResult<Option<Alert>> {
        self.ledger.get(alert_id).await
    }

    pub async fn resolve_alert(&self, alert_id: &str) -> CollectorResult<bool> {
        self.ledger.resolve(alert_id).await
    }

    pub async fn alert_counts(&self) -> CollectorResult<AlertCounts> {
        self.ledger.counts().await
    }

    pub async fn latest_reading(&self) -> CollectorResult<Option<Reading>> {
        self.pipeline.latest_reading().await
    }

    pub async fn list_readings(&self, limit: usize) -> CollectorResult<Vec<Reading>> {
        self.pipeline.list_readings(limit).await
    }

    pub async fn count_readings(&self) -> CollectorResult<usize> {
        self.pipeline.count_readings().await
    }

    /// This instance's belief, answered without touching the store.
    pub fn current_leader_status(&self) -> LeaderStatus {
        self.coordinator.current_status()
    }

    /// Whoever the store says holds the lease right now.
    pub async fn lease_holder(&self) -> CollectorResult<Option<LeaseRecord>> {
        Ok(self.coordinator.lease_holder().await?)
    }

    pub async fn replication_status(&self, collection: &str) -> CollectorResult<ReplicationSnapshot> {
        self.replication.snapshot(collection).await
    }

    pub async fn replication_report(&self) -> CollectorResult<Vec<ReplicationSnapshot>> {
        self.replication.report().await
    }

    pub async fn health(&self) -> HealthReport {
        let store_reachable = match self.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Store health probe failed");
                false
            }
        };

        HealthReport {
            store_reachable,
            replication_enabled: self.replication.is_enabled(),
            leader: self.current_leader_status(),
        }
    }
}
