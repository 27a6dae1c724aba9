//! Primary/replica consistency check.

use crate::error::bounded;
use crate::{CollectorError, CollectorResult};
use chrono::{DateTime, Utc};
use coldwatch_core::{
    decode_all, Alert, Condition, ConditionalStore, Reading, ReplicationSnapshot,
    ReplicationStatus, ALERTS, READINGS,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Collections compared between primary and replica.
pub const TRACKED_COLLECTIONS: [&str; 2] = [READINGS, ALERTS];

/// Counts from the replica side. `None` when the replica is missing or
/// could not be read.
#[derive(Debug, Clone, Default)]
struct ReplicaView {
    counts: Vec<(&'static str, usize)>,
    last_write: Vec<(&'static str, Option<DateTime<Utc>>)>,
}

pub struct ReplicationMonitor {
    primary: Arc<dyn ConditionalStore>,
    replica: Option<Arc<dyn ConditionalStore>>,
    store_timeout: Duration,
}

impl ReplicationMonitor {
    pub fn new(primary: Arc<dyn ConditionalStore>) -> Self {
        Self {
            primary,
            replica: None,
            store_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_replica(mut self, replica: Arc<dyn ConditionalStore>) -> Self {
        self.replica = Some(replica);
        self
    }

    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.replica.is_some()
    }

    /// Compare one tracked collection. The status reflects every tracked
    /// collection: a lag in any of them reports `lagging`.
    ///
    /// Replica trouble never fails the call; it reports `not enabled`.
    pub async fn snapshot(&self, collection: &str) -> CollectorResult<ReplicationSnapshot> {
        let collection = TRACKED_COLLECTIONS
            .iter()
            .copied()
            .find(|tracked| *tracked == collection)
            .ok_or_else(|| {
                CollectorError::invalid_input(format!(
                    "collection {} is not replicated",
                    collection
                ))
            })?;

        let mut report = self.compare().await?;
        let index = report
            .iter()
            .position(|snapshot| snapshot.collection == collection)
            .unwrap_or(0);
        Ok(report.swap_remove(index))
    }

    /// Snapshots for every tracked collection.
    pub async fn report(&self) -> CollectorResult<Vec<ReplicationSnapshot>> {
        self.compare().await
    }

    async fn compare(&self) -> CollectorResult<Vec<ReplicationSnapshot>> {
        let mut primary_counts = Vec::with_capacity(TRACKED_COLLECTIONS.len());
        for collection in TRACKED_COLLECTIONS {
            let count = bounded(self.store_timeout, "count primary", async {
                self.primary.count(collection, &Condition::Always).await
            })
            .await?;
            primary_counts.push((collection, count));
        }

        let replica = self.read_replica().await;

        let status = match &replica {
            None => ReplicationStatus::NotEnabled,
            Some(view) => {
                let in_sync = primary_counts
                    .iter()
                    .zip(view.counts.iter())
                    .all(|((_, primary), (_, replica))| primary == replica);
                if in_sync {
                    ReplicationStatus::InSync
                } else {
                    ReplicationStatus::Lagging
                }
            }
        };

        let snapshots = primary_counts
            .into_iter()
            .enumerate()
            .map(|(i, (collection, primary_count))| ReplicationSnapshot {
                collection: collection.to_string(),
                primary_count,
                replica_count: replica.as_ref().map(|view| view.counts[i].1),
                last_replica_write_at: replica.as_ref().and_then(|view| view.last_write[i].1),
                status,
            })
            .collect();

        debug!(%status, "Replication compared");
        Ok(snapshots)
    }

    async fn read_replica(&self) -> Option<ReplicaView> {
        let replica = self.replica.as_ref()?;

        match self.scan_replica(replica.as_ref()).await {
            Ok(view) => Some(view),
            Err(e) => {
                warn!(error = %e, "Replica unreachable; reporting replication as not enabled");
                None
            }
        }
    }

    async fn scan_replica(&self, replica: &dyn ConditionalStore) -> CollectorResult<ReplicaView> {
        let mut view = ReplicaView::default();

        for collection in TRACKED_COLLECTIONS {
            let documents = bounded(self.store_timeout, "scan replica", async {
                replica.scan(collection, &Condition::Always, None).await
            })
            .await?;

            let count = documents.len();
            let last_write = if collection == READINGS {
                let (readings, _) = decode_all::<Reading>(documents);
                readings.into_iter().map(|r| r.stored_at).max()
            } else {
                let (alerts, _) = decode_all::<Alert>(documents);
                alerts.into_iter().map(|a| a.created_at).max()
            };

            view.counts.push((collection, count));
            view.last_write.push((collection, last_write));
        }

        Ok(view)
    }
}
