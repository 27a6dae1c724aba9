//! # Conditional Store
//!
//! The capability every Coldwatch coordination primitive is written against:
//! a shared, strongly consistent document store whose conditional writes are
//! evaluated and applied atomically across all callers.
//!
//! Conditions are a closed declarative vocabulary rather than closures so an
//! adapter for a remote store can translate them into that store's native
//! condition expressions.

use crate::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// A stored record: a flat JSON object.
pub type Document = Map<String, Value>;

/// Name of the field a store writes its assigned identifier into.
pub const ID_FIELD: &str = "id";

/// Precondition evaluated against the currently stored document (if any).
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Always holds
    Always,
    /// No document is stored under the key
    Absent,
    /// A document is stored under the key
    Exists,
    /// The document's field equals the value
    Equals { field: String, value: Value },
    /// The field is missing, null, or anything other than `true`.
    /// Holds for an absent document too.
    NotTrue { field: String },
    /// The field is an integer strictly less than `value`
    LessThan { field: String, value: i64 },
    /// Every condition holds
    And(Vec<Condition>),
    /// At least one condition holds
    Or(Vec<Condition>),
}

impl Condition {
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn not_true(field: impl Into<String>) -> Self {
        Condition::NotTrue {
            field: field.into(),
        }
    }

    pub fn less_than(field: impl Into<String>, value: i64) -> Self {
        Condition::LessThan {
            field: field.into(),
            value,
        }
    }

    pub fn and(self, other: Condition) -> Self {
        match self {
            Condition::And(mut conditions) => {
                conditions.push(other);
                Condition::And(conditions)
            }
            condition => Condition::And(vec![condition, other]),
        }
    }

    pub fn or(self, other: Condition) -> Self {
        match self {
            Condition::Or(mut conditions) => {
                conditions.push(other);
                Condition::Or(conditions)
            }
            condition => Condition::Or(vec![condition, other]),
        }
    }

    /// Evaluate against the current document; `None` means nothing is stored.
    pub fn evaluate(&self, current: Option<&Document>) -> bool {
        match self {
            Condition::Always => true,
            Condition::Absent => current.is_none(),
            Condition::Exists => current.is_some(),
            Condition::Equals { field, value } => current
                .and_then(|doc| doc.get(field))
                .map(|stored| stored == value)
                .unwrap_or(false),
            Condition::NotTrue { field } => !matches!(
                current.and_then(|doc| doc.get(field)),
                Some(Value::Bool(true))
            ),
            Condition::LessThan { field, value } => current
                .and_then(|doc| doc.get(field))
                .and_then(Value::as_i64)
                .map(|stored| stored < *value)
                .unwrap_or(false),
            Condition::And(conditions) => conditions.iter().all(|c| c.evaluate(current)),
            Condition::Or(conditions) => conditions.iter().any(|c| c.evaluate(current)),
        }
    }
}

/// A single field assignment applied by [`ConditionalStore::update_if`].
#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub field: String,
    pub value: Value,
}

impl FieldUpdate {
    pub fn set(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Apply a list of updates to a document in order.
    pub fn apply_all(document: &mut Document, updates: &[FieldUpdate]) {
        for update in updates {
            document.insert(update.field.clone(), update.value.clone());
        }
    }
}

/// Outcome of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The precondition held and the write was applied
    Applied,
    /// The precondition did not hold; nothing was written
    ConditionFailed,
}

impl WriteOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, WriteOutcome::Applied)
    }
}

/// Shared key/document store with atomic conditional writes.
///
/// Implementations must guarantee that, for a given `(collection, key)`, the
/// evaluation of a condition and the write it guards happen atomically with
/// respect to every other caller, in this process or any other.
#[async_trait]
pub trait ConditionalStore: Send + Sync {
    /// Write `document` under `key` if `condition` holds for the current value.
    async fn put_if(
        &self,
        collection: &str,
        key: &str,
        document: Document,
        condition: &Condition,
    ) -> Result<WriteOutcome>;

    /// Apply `updates` to the document under `key` if `condition` holds.
    /// Updating a missing document creates nothing and reports
    /// `ConditionFailed` unless the condition holds for an absent document,
    /// in which case a document is created from the updates.
    async fn update_if(
        &self,
        collection: &str,
        key: &str,
        updates: &[FieldUpdate],
        condition: &Condition,
    ) -> Result<WriteOutcome>;

    /// Store a new document under a store-assigned identifier and return it.
    /// The identifier is also written into the document's `id` field.
    async fn insert(&self, collection: &str, document: Document) -> Result<String>;

    /// Fetch the document stored under `key`.
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>>;

    /// Documents matching `filter`, in no particular order, at most `limit`.
    async fn scan(
        &self,
        collection: &str,
        filter: &Condition,
        limit: Option<usize>,
    ) -> Result<Vec<Document>>;

    /// Number of documents matching `filter`.
    async fn count(&self, collection: &str, filter: &Condition) -> Result<usize>;

    /// Cheap reachability probe.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    /// Write `document` if nothing is stored under `key` or the stored
    /// document's `expiry_field` (epoch millis) is before `now_ms`.
    async fn put_if_absent_or_expired(
        &self,
        collection: &str,
        key: &str,
        document: Document,
        expiry_field: &str,
        now_ms: i64,
    ) -> Result<WriteOutcome> {
        let condition = Condition::Absent.or(Condition::less_than(expiry_field, now_ms));
        self.put_if(collection, key, document, &condition).await
    }

    /// Apply `updates` to an existing document if `predicate` holds for it.
    async fn update_if_matches(
        &self,
        collection: &str,
        key: &str,
        updates: &[FieldUpdate],
        predicate: Condition,
    ) -> Result<WriteOutcome> {
        let condition = Condition::Exists.and(predicate);
        self.update_if(collection, key, updates, &condition).await
    }
}
