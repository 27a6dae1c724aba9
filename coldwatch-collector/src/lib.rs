//! # Coldwatch Collector
//!
//! The collector side of Coldwatch: readings come in, out-of-range readings
//! raise critical alerts, and exactly one collector notifies about each of
//! them even when several instances share the same store.
//!
//! - [`AlertLedger`]: raise, resolve and query alerts
//! - [`NotificationDispatcher`]: claim-then-send critical notification
//! - [`IngestionPipeline`]: persist readings and hand off alerts
//! - [`ReplicationMonitor`]: primary/replica count comparison
//! - [`CollectorService`]: the facade wiring them to a [`LeaseCoordinator`](coldwatch_leader::LeaseCoordinator)
//!
//! ```rust
//! use chrono::Utc;
//! use coldwatch_collector::{CollectorConfig, CollectorService, LogChannel};
//! use coldwatch_store::InMemoryStore;
//! use std::sync::Arc;
//!
//! tokio_test::block_on(async {
//!     let service = CollectorService::new(
//!         CollectorConfig::new("collector-a"),
//!         Arc::new(InMemoryStore::new()),
//!         Arc::new(LogChannel),
//!     )
//!     .unwrap();
//!
//!     let ack = service.ingest("fridge-1", 4.5, Utc::now()).await.unwrap();
//!     assert!(!ack.alert_created());
//! });
//! ```

pub mod channels;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod ledger;
pub mod pipeline;
pub mod replication;
pub mod service;

pub use channels::{
    FanOutChannel, LogChannel, NotificationChannel, NotificationMessage, WebhookChannel,
};
pub use config::CollectorConfig;
pub use dispatcher::{DispatchOutcome, NotificationDispatcher};
pub use error::{CollectorError, CollectorResult, NotifyError};
pub use ledger::{AlertCounts, AlertLedger};
pub use pipeline::{IngestAck, IngestionPipeline, TemperatureRange};
pub use replication::{ReplicationMonitor, TRACKED_COLLECTIONS};
pub use service::{CollectorService, HealthReport};
