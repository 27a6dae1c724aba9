//! # Core Types
//!
//! The records Coldwatch persists (readings, alerts, the lease) and the
//! derived replication snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Collection holding every temperature reading.
pub const READINGS: &str = "readings";

/// Collection holding alerts (soft-resolved, never deleted).
pub const ALERTS: &str = "alerts";

/// Collection holding lease records, one per coordination domain.
pub const LEASES: &str = "leases";

/// Kind of anomaly an alert describes.
///
/// Closed set: anything the ingestion side cannot express here is not an
/// alert Coldwatch knows how to classify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    CriticalTemperature,
    SensorOffline,
    PowerFailure,
    DoorOpen,
}

impl AlertType {
    pub const ALL: [AlertType; 4] = [
        AlertType::CriticalTemperature,
        AlertType::SensorOffline,
        AlertType::PowerFailure,
        AlertType::DoorOpen,
    ];

    /// Severity tier this alert type maps to.
    pub fn severity(self) -> Severity {
        classify_severity(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::CriticalTemperature => "CRITICAL_TEMPERATURE",
            AlertType::SensorOffline => "SENSOR_OFFLINE",
            AlertType::PowerFailure => "POWER_FAILURE",
            AlertType::DoorOpen => "DOOR_OPEN",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity tier of an alert. Only `Critical` triggers external notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
}

impl Severity {
    pub fn is_critical(&self) -> bool {
        matches!(self, Severity::Critical)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed mapping from alert type to severity.
///
/// ```rust
/// use coldwatch_core::{classify_severity, AlertType, Severity};
///
/// assert_eq!(classify_severity(AlertType::CriticalTemperature), Severity::Critical);
/// assert_eq!(classify_severity(AlertType::SensorOffline), Severity::High);
/// assert_eq!(classify_severity(AlertType::DoorOpen), Severity::Medium);
/// ```
pub fn classify_severity(alert_type: AlertType) -> Severity {
    match alert_type {
        AlertType::CriticalTemperature => Severity::Critical,
        AlertType::SensorOffline => Severity::High,
        _ => Severity::Medium,
    }
}

/// A single temperature sample. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Store-assigned identifier, empty until the first successful write
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub sensor_id: String,
    pub temperature: f64,
    pub taken_at: DateTime<Utc>,
    pub stored_at: DateTime<Utc>,
}

impl Reading {
    pub const STORED_AT_FIELD: &'static str = "stored_at";

    /// Build a reading stamped with the persistence time `stored_at = now`.
    pub fn new(sensor_id: impl Into<String>, temperature: f64, taken_at: DateTime<Utc>) -> Self {
        Self {
            id: String::new(),
            sensor_id: sensor_id.into(),
            temperature,
            taken_at,
            stored_at: Utc::now(),
        }
    }
}

/// A detected anomaly and its lifecycle flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Store-assigned identifier, empty until the first successful write
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub sensor_id: String,
    pub temperature: f64,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub notified: bool,
    #[serde(default)]
    pub notified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub const CREATED_AT_FIELD: &'static str = "created_at";
    pub const NOTIFIED_FIELD: &'static str = "notified";
    pub const NOTIFIED_AT_FIELD: &'static str = "notified_at";
    pub const RESOLVED_FIELD: &'static str = "resolved";
    pub const RESOLVED_AT_FIELD: &'static str = "resolved_at";
    pub const SEVERITY_FIELD: &'static str = "severity";

    /// Build a fresh, unnotified, unresolved alert. Severity is derived from
    /// the alert type and cannot be chosen by the caller.
    pub fn new(
        sensor_id: impl Into<String>,
        temperature: f64,
        alert_type: AlertType,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            sensor_id: sensor_id.into(),
            temperature,
            alert_type,
            severity: classify_severity(alert_type),
            message: message.into(),
            created_at: Utc::now(),
            notified: false,
            notified_at: None,
            resolved: false,
            resolved_at: None,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.severity.is_critical()
    }

    pub fn is_open(&self) -> bool {
        !self.resolved
    }
}

/// Time-bounded leadership claim for one coordination domain.
///
/// Times are stored as epoch milliseconds so the store can compare
/// `expires_at` against "now" inside a conditional write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub owner_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub acquired_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
}

impl LeaseRecord {
    pub const OWNER_FIELD: &'static str = "owner_id";
    pub const EXPIRES_AT_FIELD: &'static str = "expires_at";

    pub fn new(owner_id: impl Into<String>, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            owner_id: owner_id.into(),
            acquired_at: now,
            expires_at: expiry_after(now, ttl),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        self.owner_id == owner_id
    }
}

/// `now + ttl`, saturating instead of overflowing on absurd TTLs.
pub fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    let millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    chrono::Duration::try_milliseconds(millis)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Replication health of one logical collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicationStatus {
    #[serde(rename = "in sync")]
    InSync,
    #[serde(rename = "lagging")]
    Lagging,
    #[serde(rename = "not enabled")]
    NotEnabled,
}

impl ReplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicationStatus::InSync => "in sync",
            ReplicationStatus::Lagging => "lagging",
            ReplicationStatus::NotEnabled => "not enabled",
        }
    }
}

impl fmt::Display for ReplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time comparison of a primary collection and its replica.
/// Computed on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationSnapshot {
    pub collection: String,
    pub primary_count: usize,
    pub replica_count: Option<usize>,
    pub last_replica_write_at: Option<DateTime<Utc>>,
    pub status: ReplicationStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_severity_is_derived() {
        let alert = Alert::new("lab-1", 15.5, AlertType::CriticalTemperature, "too warm");
        assert_eq!(alert.severity, Severity::Critical);
        assert!(alert.is_critical());
        assert!(alert.is_open());
        assert!(!alert.notified);

        let alert = Alert::new("lab-1", 4.0, AlertType::PowerFailure, "mains lost");
        assert_eq!(alert.severity, Severity::Medium);
    }

    #[test]
    fn test_lease_expiry() {
        let now = Utc::now();
        let lease = LeaseRecord::new("collector-a", now, Duration::from_secs(10));
        assert!(!lease.is_expired_at(now));
        assert!(lease.is_expired_at(now + chrono::Duration::seconds(11)));
        assert!(lease.is_owned_by("collector-a"));
        assert!(!lease.is_owned_by("collector-b"));
    }

    #[test]
    fn test_expiry_saturates() {
        let now = Utc::now();
        assert_eq!(expiry_after(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_wire_names() {
        let json = serde_json::to_string(&AlertType::CriticalTemperature).unwrap();
        assert_eq!(json, "\"CRITICAL_TEMPERATURE\"");
        let json = serde_json::to_string(&ReplicationStatus::NotEnabled).unwrap();
        assert_eq!(json, "\"not enabled\"");
        assert_eq!(ReplicationStatus::InSync.to_string(), "in sync");
    }
}
