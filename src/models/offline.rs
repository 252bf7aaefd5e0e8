use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Client-side metadata attached to records captured while offline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct OfflineMeta {
    #[serde(default)]
    pub client_created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub client_lat: Option<f64>,
    #[serde(default)]
    pub client_lon: Option<f64>,
    #[serde(default)]
    #[schema(example = "batch-2024-05-01-001")]
    pub offline_batch_id: Option<String>,
    #[serde(default)]
    pub was_offline: bool,
}

impl OfflineMeta {
    /// Idempotency key; blank batch ids count as absent.
    pub fn batch_id(&self) -> Option<&str> {
        self.offline_batch_id
            .as_deref()
            .map(str::trim)
            .filter(|batch| !batch.is_empty())
    }

    /// Normalised copy stored on the row: blank batch ids become NULL and a
    /// batch id implies `was_offline`.
    pub fn normalized(&self) -> Self {
        let batch = self.batch_id().map(str::to_owned);
        Self {
            was_offline: self.was_offline || batch.is_some(),
            offline_batch_id: batch,
            ..self.clone()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// `client` section of an audit context.
    pub fn audit_payload(&self) -> Option<Value> {
        if self.is_empty() {
            return None;
        }
        Some(json!({
            "client_created_at": self.client_created_at,
            "client_lat": self.client_lat,
            "client_lon": self.client_lon,
            "offline_batch_id": self.offline_batch_id,
            "was_offline": self.was_offline,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_batch_ids_are_not_keys() {
        let meta = OfflineMeta {
            offline_batch_id: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(meta.batch_id(), None);
        assert_eq!(meta.normalized().offline_batch_id, None);
        assert!(!meta.normalized().was_offline);
    }

    #[test]
    fn batch_id_marks_the_record_offline() {
        let meta = OfflineMeta {
            offline_batch_id: Some(" b-1 ".into()),
            ..Default::default()
        };
        let stored = meta.normalized();
        assert_eq!(stored.offline_batch_id.as_deref(), Some("b-1"));
        assert!(stored.was_offline);
        assert!(OfflineMeta::default().audit_payload().is_none());
    }
}
