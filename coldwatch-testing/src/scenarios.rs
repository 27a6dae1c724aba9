use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use coldwatch_collector::{CollectorConfig, CollectorResult, CollectorService};
use coldwatch_core::ConditionalStore;
use coldwatch_leader::{LeaderState, LeaseConfig};
use coldwatch_store::InMemoryStore;

use crate::fault_injection::FaultyStore;
use crate::recording::RecordingChannel;

/// Timing used by cluster instances. Short enough for lease expiry to be
/// observed inside a test.
#[derive(Debug, Clone)]
pub struct ClusterTiming {
    pub ttl: Duration,
    pub renew_interval: Duration,
    pub acquire_interval: Duration,
    pub store_timeout: Duration,
}

impl Default for ClusterTiming {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(300),
            renew_interval: Duration::from_millis(60),
            acquire_interval: Duration::from_millis(60),
            store_timeout: Duration::from_millis(250),
        }
    }
}

/// Several collector instances sharing one store and one outside world.
///
/// Every instance talks to the shared [`InMemoryStore`] through its own
/// [`FaultyStore`], so a single instance can be cut off from the store while
/// the others keep working. All notifications land in one
/// [`RecordingChannel`].
pub struct CollectorCluster {
    store: InMemoryStore,
    channel: Arc<RecordingChannel>,
    links: Vec<Arc<FaultyStore>>,
    instances: Vec<CollectorService>,
    timing: ClusterTiming,
}

impl CollectorCluster {
    pub fn new(size: usize) -> CollectorResult<Self> {
        Self::with_timing(size, ClusterTiming::default())
    }

    pub fn with_timing(size: usize, timing: ClusterTiming) -> CollectorResult<Self> {
        let store = InMemoryStore::new();
        let channel = Arc::new(RecordingChannel::new());
        let mut links = Vec::with_capacity(size);
        let mut instances = Vec::with_capacity(size);

        for i in 0..size {
            let owner = format!("collector-{}", i);
            let link = Arc::new(FaultyStore::new(Arc::new(store.clone())));
            let lease = LeaseConfig::new(owner.as_str())
                .with_ttl(timing.ttl)
                .with_renew_interval(timing.renew_interval)
                .with_acquire_interval(timing.acquire_interval)
                .with_initial_jitter(timing.acquire_interval)
                .with_store_timeout(timing.store_timeout);
            let config = CollectorConfig::new(owner.as_str())
                .with_lease(lease)
                .with_store_timeout(timing.store_timeout);

            let service = CollectorService::new(
                config,
                Arc::clone(&link) as Arc<dyn ConditionalStore>,
                Arc::clone(&channel) as Arc<dyn coldwatch_collector::NotificationChannel>,
            )?;

            links.push(link);
            instances.push(service);
        }

        info!(size, "Collector cluster created");
        Ok(Self {
            store,
            channel,
            links,
            instances,
            timing,
        })
    }

    pub fn size(&self) -> usize {
        self.instances.len()
    }

    pub fn instance(&self, index: usize) -> &CollectorService {
        &self.instances[index]
    }

    pub fn instances(&self) -> &[CollectorService] {
        &self.instances
    }

    /// The store link of one instance, for fault injection.
    pub fn link(&self, index: usize) -> &FaultyStore {
        &self.links[index]
    }

    /// Direct access to the shared store, bypassing every link.
    pub fn store(&self) -> &InMemoryStore {
        &self.store
    }

    pub fn channel(&self) -> &RecordingChannel {
        &self.channel
    }

    pub fn timing(&self) -> &ClusterTiming {
        &self.timing
    }

    /// Run one coordinator step on every instance, in index order.
    pub async fn tick_all(&self) -> Vec<LeaderState> {
        let mut states = Vec::with_capacity(self.instances.len());
        for instance in &self.instances {
            states.push(instance.coordinator().tick().await);
        }
        states
    }

    /// Indices of instances that currently believe they lead.
    pub fn leaders(&self) -> Vec<usize> {
        self.instances
            .iter()
            .enumerate()
            .filter(|(_, instance)| instance.current_leader_status().is_leader)
            .map(|(i, _)| i)
            .collect()
    }

    pub async fn start_all(&self) {
        for instance in &self.instances {
            instance.start().await;
        }
    }

    pub async fn stop_all(&self) {
        for instance in &self.instances {
            instance.stop().await;
        }
    }

    /// Poll until some instance leads or `timeout` elapses.
    pub async fn wait_for_leader(&self, timeout: Duration) -> Option<usize> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(&leader) = self.leaders().first() {
                return Some(leader);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cluster_ticks_elect_first_instance() {
        let cluster = CollectorCluster::new(3).unwrap();
        let states = cluster.tick_all().await;

        assert_eq!(
            states,
            vec![LeaderState::Leader, LeaderState::Follower, LeaderState::Follower]
        );
        assert_eq!(cluster.leaders(), vec![0]);
        assert_eq!(cluster.size(), 3);
    }
}
