use crate::store::Document;
use crate::types::{Alert, LeaseRecord, Reading, ALERTS, LEASES, READINGS};
use crate::{CoreError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// A record type with a home collection and a JSON document encoding.
pub trait StoredRecord: Serialize + DeserializeOwned {
    /// Collection the record lives in
    const COLLECTION: &'static str;

    /// Encode the record as a store document.
    fn to_document(&self) -> Result<Document> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(CoreError::internal(format!(
                "{} did not encode as an object: {}",
                Self::COLLECTION,
                other
            ))),
        }
    }

    /// Decode a store document back into the record.
    fn from_document(document: Document) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(document))?)
    }
}

impl StoredRecord for Reading {
    const COLLECTION: &'static str = READINGS;
}

impl StoredRecord for Alert {
    const COLLECTION: &'static str = ALERTS;
}

impl StoredRecord for LeaseRecord {
    const COLLECTION: &'static str = LEASES;
}

/// Decode a batch of documents, skipping (and reporting) undecodable ones.
pub fn decode_all<T: StoredRecord>(documents: Vec<Document>) -> (Vec<T>, usize) {
    let mut skipped = 0;
    let records = documents
        .into_iter()
        .filter_map(|doc| match T::from_document(doc) {
            Ok(record) => Some(record),
            Err(_) => {
                skipped += 1;
                None
            }
        })
        .collect();
    (records, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AlertType;
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_alert_document_roundtrip_keeps_flags() {
        let mut alert = Alert::new("lab-1", 15.5, AlertType::CriticalTemperature, "too warm");
        alert.id = "a-1".to_string();
        let doc = alert.to_document().unwrap();
        assert_eq!(doc["severity"], json!("CRITICAL"));
        assert_eq!(doc["alert_type"], json!("CRITICAL_TEMPERATURE"));
        assert_eq!(doc["notified"], json!(false));

        let decoded = Alert::from_document(doc).unwrap();
        assert_eq!(decoded, alert);
    }

    #[test]
    fn test_unsaved_record_has_no_id_field() {
        let reading = Reading::new("lab-1", 4.0, Utc::now());
        let doc = reading.to_document().unwrap();
        assert!(!doc.contains_key("id"));
    }

    #[test]
    fn test_lease_times_are_millis() {
        let now = Utc::now();
        let lease = LeaseRecord::new("collector-a", now, Duration::from_millis(1500));
        let doc = lease.to_document().unwrap();
        assert_eq!(doc["expires_at"].as_i64(), Some(now.timestamp_millis() + 1500));
    }

    #[test]
    fn test_decode_all_skips_garbage() {
        let good = Reading::new("lab-1", 4.0, Utc::now()).to_document().unwrap();
        let bad = json!({"sensor_id": 12}).as_object().cloned().unwrap();
        let (readings, skipped) = decode_all::<Reading>(vec![good, bad]);
        assert_eq!(readings.len(), 1);
        assert_eq!(skipped, 1);
    }
}
