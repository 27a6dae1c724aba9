//! # Coldwatch Core
//!
//! Shared building blocks for Coldwatch collectors: the cold-chain telemetry
//! domain (readings, alerts, severities), the lease record used for leader
//! election, and the [`ConditionalStore`] capability the coordination layer
//! is written against.
//!
//! ## Components
//!
//! - **Types**: `Reading`, `Alert`, `AlertType`, `Severity`, `LeaseRecord`,
//!   `ReplicationSnapshot`
//! - **Store**: `ConditionalStore` with its declarative `Condition` and
//!   `FieldUpdate` vocabulary
//! - **Serialization**: `StoredRecord` document encoding
//! - **Validation**: input checks for sensor ids, temperatures and keys
//! - **Errors**: `CoreError` and the crate `Result` alias
//!
//! ## Example
//!
//! ```rust
//! use coldwatch_core::{Alert, AlertType, Condition, Severity};
//! use serde_json::json;
//!
//! let alert = Alert::new("lab-1", 15.5, AlertType::CriticalTemperature, "above 8.0");
//! assert_eq!(alert.severity, Severity::Critical);
//!
//! // The exactly-once gate for notification marking
//! let gate = Condition::Exists.and(Condition::not_true("notified"));
//! let stored = json!({"notified": false}).as_object().cloned().unwrap();
//! assert!(gate.evaluate(Some(&stored)));
//! ```

pub mod error;
pub mod serialization;
pub mod store;
pub mod types;
pub mod validation;

pub use error::*;
pub use serialization::{decode_all, StoredRecord};
pub use store::{ConditionalStore, Condition, Document, FieldUpdate, WriteOutcome, ID_FIELD};
pub use types::*;
pub use validation::*;
