//! # In-Memory Store
//!
//! [`ConditionalStore`] backed by one `DashMap` per collection. Conditional
//! writes are evaluated while holding the key's entry lock, which makes the
//! check-and-write atomic for every task in the process.

use async_trait::async_trait;
use coldwatch_core::{
    validate_key, Condition, ConditionalStore, CoreError, Document, FieldUpdate, Result,
    WriteOutcome, ID_FIELD,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Configuration for the in-memory store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of documents per collection
    pub max_documents: usize,
    /// Maximum encoded document size in bytes
    pub max_document_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_documents: 1_000_000,
            max_document_size: 400 * 1024,
        }
    }
}

/// Store statistics
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub total_operations: u64,
    pub writes_applied: u64,
    pub writes_rejected: u64,
    pub documents_inserted: u64,
}

/// Full copy of the store contents, ordered so it encodes deterministically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub collections: BTreeMap<String, BTreeMap<String, Document>>,
}

impl StoreSnapshot {
    pub fn document_count(&self) -> usize {
        self.collections.values().map(BTreeMap::len).sum()
    }
}

type Collection = Arc<DashMap<String, Document>>;

/// Process-local conditional store.
///
/// Cloning shares the underlying data, so several coordinators in one test
/// can act as independent "processes" over the same backing store.
#[derive(Clone)]
pub struct InMemoryStore {
    config: StoreConfig,
    collections: Arc<DashMap<String, Collection>>,
    stats: Arc<RwLock<StoreStats>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            config,
            collections: Arc::new(DashMap::new()),
            stats: Arc::new(RwLock::new(StoreStats::default())),
        }
    }

    /// Copy every collection out of the store.
    pub fn snapshot(&self) -> StoreSnapshot {
        let collections = self
            .collections
            .iter()
            .map(|table| {
                let documents = table
                    .value()
                    .iter()
                    .map(|doc| (doc.key().clone(), doc.value().clone()))
                    .collect();
                (table.key().clone(), documents)
            })
            .collect();
        StoreSnapshot { collections }
    }

    /// Replace the store contents with a snapshot.
    pub fn restore(&self, snapshot: StoreSnapshot) {
        self.collections.clear();
        for (name, documents) in snapshot.collections {
            let table: DashMap<String, Document> = documents.into_iter().collect();
            self.collections.insert(name, Arc::new(table));
        }
    }

    pub fn get_stats(&self) -> StoreStats {
        self.stats.read().clone()
    }

    /// Number of documents across all collections.
    pub fn size(&self) -> usize {
        self.collections.iter().map(|table| table.value().len()).sum()
    }

    fn collection(&self, name: &str) -> Result<Collection> {
        validate_key(name)?;
        let table = self
            .collections
            .entry(name.to_string())
            .or_default()
            .value()
            .clone();
        Ok(table)
    }

    fn validate_document(&self, document: &Document) -> Result<()> {
        let size = serde_json::to_vec(document)?.len();
        if size > self.config.max_document_size {
            return Err(CoreError::validation(format!(
                "document of {} bytes exceeds limit of {}",
                size, self.config.max_document_size
            )));
        }
        Ok(())
    }

    fn ensure_capacity(&self, collection: &str, table: &Collection) -> Result<()> {
        if table.len() >= self.config.max_documents {
            return Err(CoreError::internal(format!(
                "collection {} is full ({} documents)",
                collection, self.config.max_documents
            )));
        }
        Ok(())
    }

    fn record(&self, outcome: WriteOutcome) {
        let mut stats = self.stats.write();
        stats.total_operations += 1;
        match outcome {
            WriteOutcome::Applied => stats.writes_applied += 1,
            WriteOutcome::ConditionFailed => stats.writes_rejected += 1,
        }
    }

    fn increment_operation_count(&self) {
        self.stats.write().total_operations += 1;
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConditionalStore for InMemoryStore {
    async fn put_if(
        &self,
        collection: &str,
        key: &str,
        mut document: Document,
        condition: &Condition,
    ) -> Result<WriteOutcome> {
        validate_key(key)?;
        let table = self.collection(collection)?;
        document.insert(ID_FIELD.to_string(), key.into());
        self.validate_document(&document)?;
        // len() takes every shard lock; it must not run under the entry lock below
        let has_room = table.len() < self.config.max_documents;

        let outcome = match table.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if condition.evaluate(Some(entry.get())) {
                    entry.insert(document);
                    WriteOutcome::Applied
                } else {
                    WriteOutcome::ConditionFailed
                }
            }
            Entry::Vacant(entry) => {
                if !condition.evaluate(None) {
                    WriteOutcome::ConditionFailed
                } else if !has_room {
                    return Err(CoreError::internal(format!(
                        "collection {} is full",
                        collection
                    )));
                } else {
                    entry.insert(document);
                    WriteOutcome::Applied
                }
            }
        };

        self.record(outcome);
        debug!(collection, key, ?outcome, "PUT_IF operation");
        Ok(outcome)
    }

    async fn update_if(
        &self,
        collection: &str,
        key: &str,
        updates: &[FieldUpdate],
        condition: &Condition,
    ) -> Result<WriteOutcome> {
        validate_key(key)?;
        let table = self.collection(collection)?;
        let has_room = table.len() < self.config.max_documents;

        let outcome = match table.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if condition.evaluate(Some(entry.get())) {
                    FieldUpdate::apply_all(entry.get_mut(), updates);
                    WriteOutcome::Applied
                } else {
                    WriteOutcome::ConditionFailed
                }
            }
            Entry::Vacant(entry) => {
                if !condition.evaluate(None) {
                    WriteOutcome::ConditionFailed
                } else if !has_room {
                    return Err(CoreError::internal(format!(
                        "collection {} is full",
                        collection
                    )));
                } else {
                    let mut document = Document::new();
                    document.insert(ID_FIELD.to_string(), key.into());
                    FieldUpdate::apply_all(&mut document, updates);
                    entry.insert(document);
                    WriteOutcome::Applied
                }
            }
        };

        self.record(outcome);
        debug!(collection, key, ?outcome, "UPDATE_IF operation");
        Ok(outcome)
    }

    async fn insert(&self, collection: &str, mut document: Document) -> Result<String> {
        let table = self.collection(collection)?;
        self.ensure_capacity(collection, &table)?;

        let id = Uuid::new_v4().to_string();
        document.insert(ID_FIELD.to_string(), id.clone().into());
        self.validate_document(&document)?;
        table.insert(id.clone(), document);

        {
            let mut stats = self.stats.write();
            stats.total_operations += 1;
            stats.documents_inserted += 1;
        }
        debug!(collection, id = %id, "INSERT operation");
        Ok(id)
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>> {
        validate_key(key)?;
        let table = self.collection(collection)?;
        let result = table.get(key).map(|doc| doc.value().clone());
        self.increment_operation_count();
        Ok(result)
    }

    async fn scan(
        &self,
        collection: &str,
        filter: &Condition,
        limit: Option<usize>,
    ) -> Result<Vec<Document>> {
        let table = self.collection(collection)?;
        let documents: Vec<Document> = table
            .iter()
            .filter(|doc| filter.evaluate(Some(doc.value())))
            .take(limit.unwrap_or(usize::MAX))
            .map(|doc| doc.value().clone())
            .collect();
        self.increment_operation_count();
        debug!(collection, count = documents.len(), "SCAN operation");
        Ok(documents)
    }

    async fn count(&self, collection: &str, filter: &Condition) -> Result<usize> {
        let table = self.collection(collection)?;
        let count = match filter {
            Condition::Always => table.len(),
            _ => table
                .iter()
                .filter(|doc| filter.evaluate(Some(doc.value())))
                .count(),
        };
        self.increment_operation_count();
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_put_if_absent() {
        let store = InMemoryStore::new();

        let first = store
            .put_if("leases", "leader", doc(json!({"owner_id": "a"})), &Condition::Absent)
            .await
            .unwrap();
        assert_eq!(first, WriteOutcome::Applied);

        let second = store
            .put_if("leases", "leader", doc(json!({"owner_id": "b"})), &Condition::Absent)
            .await
            .unwrap();
        assert_eq!(second, WriteOutcome::ConditionFailed);

        let stored = store.get("leases", "leader").await.unwrap().unwrap();
        assert_eq!(stored["owner_id"], json!("a"));
        assert_eq!(stored["id"], json!("leader"));
    }

    #[tokio::test]
    async fn test_put_if_absent_or_expired() {
        let store = InMemoryStore::new();
        store
            .put_if(
                "leases",
                "leader",
                doc(json!({"owner_id": "a", "expires_at": 1_000})),
                &Condition::Always,
            )
            .await
            .unwrap();

        let early = store
            .put_if_absent_or_expired(
                "leases",
                "leader",
                doc(json!({"owner_id": "b", "expires_at": 2_000})),
                "expires_at",
                500,
            )
            .await
            .unwrap();
        assert_eq!(early, WriteOutcome::ConditionFailed);

        let late = store
            .put_if_absent_or_expired(
                "leases",
                "leader",
                doc(json!({"owner_id": "b", "expires_at": 3_000})),
                "expires_at",
                1_500,
            )
            .await
            .unwrap();
        assert_eq!(late, WriteOutcome::Applied);
    }

    #[tokio::test]
    async fn test_update_if_matches_requires_existing() {
        let store = InMemoryStore::new();
        let outcome = store
            .update_if_matches(
                "alerts",
                "missing",
                &[FieldUpdate::set("resolved", true)],
                Condition::Always,
            )
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::ConditionFailed);
        assert!(store.get("alerts", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_assigns_unique_ids() {
        let store = InMemoryStore::new();
        let a = store.insert("readings", doc(json!({"t": 1}))).await.unwrap();
        let b = store.insert("readings", doc(json!({"t": 2}))).await.unwrap();
        assert_ne!(a, b);

        let stored = store.get("readings", &a).await.unwrap().unwrap();
        assert_eq!(stored["id"], json!(a));
        assert_eq!(store.count("readings", &Condition::Always).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_scan_filter_and_limit() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store
                .insert("alerts", doc(json!({"n": i, "resolved": i % 2 == 0})))
                .await
                .unwrap();
        }

        let open = store
            .scan("alerts", &Condition::not_true("resolved"), None)
            .await
            .unwrap();
        assert_eq!(open.len(), 2);

        let limited = store.scan("alerts", &Condition::Always, Some(3)).await.unwrap();
        assert_eq!(limited.len(), 3);
        assert_eq!(
            store
                .count("alerts", &Condition::equals("resolved", true))
                .await
                .unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn test_snapshot_and_restore() {
        let store = InMemoryStore::new();
        store.insert("readings", doc(json!({"t": 1}))).await.unwrap();
        store.insert("alerts", doc(json!({"t": 2}))).await.unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.document_count(), 2);

        let other = InMemoryStore::new();
        other.restore(snapshot);
        assert_eq!(other.size(), 2);
        assert_eq!(other.count("alerts", &Condition::Always).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_capacity_and_size_limits() {
        let store = InMemoryStore::with_config(StoreConfig {
            max_documents: 1,
            max_document_size: 64,
        });
        store.insert("readings", doc(json!({"t": 1}))).await.unwrap();
        assert!(store.insert("readings", doc(json!({"t": 2}))).await.is_err());

        let big = doc(json!({"blob": "x".repeat(100)}));
        assert!(store.insert("alerts", big).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_key() {
        let store = InMemoryStore::new();
        let result = store.get("alerts", "").await;
        assert!(matches!(result, Err(CoreError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_stats_track_rejections() {
        let store = InMemoryStore::new();
        store
            .put_if("leases", "k", doc(json!({})), &Condition::Absent)
            .await
            .unwrap();
        store
            .put_if("leases", "k", doc(json!({})), &Condition::Absent)
            .await
            .unwrap();
        let stats = store.get_stats();
        assert_eq!(stats.writes_applied, 1);
        assert_eq!(stats.writes_rejected, 1);
    }
}
