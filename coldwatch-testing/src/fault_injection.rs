use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{info, warn};

use coldwatch_core::{
    Condition, ConditionalStore, CoreError, Document, FieldUpdate, Result, WriteOutcome,
};

#[derive(Debug, Clone, PartialEq)]
pub enum FaultType {
    /// Every call fails with `Unavailable`
    Outage,
    /// Writes fail, reads succeed
    ReadOnly,
    /// Every call is delayed before reaching the inner store
    HighLatency { delay: Duration },
}

#[derive(Debug, Default, Clone)]
pub struct FaultStats {
    pub calls: u64,
    pub failed_calls: u64,
}

/// Store wrapper that fails or slows down on demand.
///
/// Wraps any [`ConditionalStore`]; with no fault injected it forwards every
/// call unchanged.
pub struct FaultyStore {
    inner: Arc<dyn ConditionalStore>,
    fault: RwLock<Option<FaultType>>,
    calls: AtomicU64,
    failed_calls: AtomicU64,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn ConditionalStore>) -> Self {
        Self {
            inner,
            fault: RwLock::new(None),
            calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
        }
    }

    pub fn inject(&self, fault: FaultType) {
        warn!(?fault, "Injecting store fault");
        *self.fault.write() = Some(fault);
    }

    pub fn heal(&self) {
        info!("Clearing store fault");
        *self.fault.write() = None;
    }

    pub fn current_fault(&self) -> Option<FaultType> {
        self.fault.read().clone()
    }

    pub fn stats(&self) -> FaultStats {
        FaultStats {
            calls: self.calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
        }
    }

    async fn before_call(&self, is_write: bool) -> Result<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let fault = self.fault.read().clone();
        match fault {
            None => Ok(()),
            Some(FaultType::HighLatency { delay }) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            Some(FaultType::ReadOnly) if !is_write => Ok(()),
            Some(FaultType::ReadOnly) | Some(FaultType::Outage) => {
                self.failed_calls.fetch_add(1, Ordering::Relaxed);
                Err(CoreError::unavailable("injected fault"))
            }
        }
    }
}

#[async_trait]
impl ConditionalStore for FaultyStore {
    async fn put_if(
        &self,
        collection: &str,
        key: &str,
        document: Document,
        condition: &Condition,
    ) -> Result<WriteOutcome> {
        self.before_call(true).await?;
        self.inner.put_if(collection, key, document, condition).await
    }

    async fn update_if(
        &self,
        collection: &str,
        key: &str,
        updates: &[FieldUpdate],
        condition: &Condition,
    ) -> Result<WriteOutcome> {
        self.before_call(true).await?;
        self.inner.update_if(collection, key, updates, condition).await
    }

    async fn insert(&self, collection: &str, document: Document) -> Result<String> {
        self.before_call(true).await?;
        self.inner.insert(collection, document).await
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>> {
        self.before_call(false).await?;
        self.inner.get(collection, key).await
    }

    async fn scan(
        &self,
        collection: &str,
        filter: &Condition,
        limit: Option<usize>,
    ) -> Result<Vec<Document>> {
        self.before_call(false).await?;
        self.inner.scan(collection, filter, limit).await
    }

    async fn count(&self, collection: &str, filter: &Condition) -> Result<usize> {
        self.before_call(false).await?;
        self.inner.count(collection, filter).await
    }

    async fn ping(&self) -> Result<()> {
        self.before_call(false).await?;
        self.inner.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coldwatch_store::InMemoryStore;

    #[tokio::test]
    async fn test_faults_toggle() {
        let store = FaultyStore::new(Arc::new(InMemoryStore::new()));
        assert!(store.insert("readings", Document::new()).await.is_ok());

        store.inject(FaultType::ReadOnly);
        assert!(store.insert("readings", Document::new()).await.is_err());
        assert_eq!(store.count("readings", &Condition::Always).await.unwrap(), 1);

        store.inject(FaultType::Outage);
        assert!(store.ping().await.is_err());

        store.heal();
        assert!(store.ping().await.is_ok());
        assert_eq!(store.current_fault(), None);

        let stats = store.stats();
        assert_eq!(stats.calls, 5);
        assert_eq!(stats.failed_calls, 2);
    }
}
