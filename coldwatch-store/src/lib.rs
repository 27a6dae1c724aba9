//! # Coldwatch Store
//!
//! [`ConditionalStore`](coldwatch_core::ConditionalStore) implementations.
//!
//! ## Implementations
//!
//! - [`InMemoryStore`] - documents held in memory (tests, single process, demos)
//! - [`FileSystemStore`] - in-memory decisions with a checksummed snapshot
//!   written atomically to disk after every applied mutation
//!
//! Both satisfy the same contract, so the lease coordinator, alert ledger and
//! notification dispatcher never know which one they are talking to.
//!
//! ## Example
//!
//! ```rust
//! use coldwatch_core::{Condition, ConditionalStore, WriteOutcome};
//! use coldwatch_store::InMemoryStore;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let store = InMemoryStore::new();
//! let lease = json!({"owner_id": "collector-a"}).as_object().cloned().unwrap();
//!
//! let first = store.put_if("leases", "leader", lease.clone(), &Condition::Absent).await.unwrap();
//! let second = store.put_if("leases", "leader", lease, &Condition::Absent).await.unwrap();
//! assert_eq!(first, WriteOutcome::Applied);
//! assert_eq!(second, WriteOutcome::ConditionFailed);
//! # });
//! ```

pub mod file_system;
pub mod in_memory;

pub use file_system::FileSystemStore;
pub use in_memory::{InMemoryStore, StoreConfig, StoreSnapshot, StoreStats};
