//! # Coldwatch Leader
//!
//! Lease-based leader election for Coldwatch collectors.
//!
//! This crate provides functionality for:
//! - Acquiring and renewing a time-bounded lease through a conditional store
//! - Publishing the local leadership belief through a lock-free handle
//! - Broadcasting leadership changes to observers
//!
//! Mutual exclusion comes entirely from the store's conditional write; no
//! in-process lock guards leadership.
//!
//! ```rust
//! use coldwatch_leader::{LeaseConfig, LeaseCoordinator, LeaderState};
//! use coldwatch_store::InMemoryStore;
//! use std::sync::Arc;
//!
//! tokio_test::block_on(async {
//!     let store = Arc::new(InMemoryStore::new());
//!     let coordinator = LeaseCoordinator::new(LeaseConfig::new("collector-a"), store).unwrap();
//!
//!     assert_eq!(coordinator.tick().await, LeaderState::Leader);
//!     assert!(coordinator.handle().is_leader());
//! });
//! ```

pub mod errors;
pub mod lease;
pub mod notifications;

pub use errors::{LeaderError, LeaderResult};
pub use lease::{
    LeaderHandle, LeaderState, LeaderStatus, LeaseConfig, LeaseCoordinator, LeadershipStats,
};
pub use notifications::{
    LeaderNotificationBus, LeadershipChange, NotificationFilter, NotificationStats,
    SubscriptionId,
};
