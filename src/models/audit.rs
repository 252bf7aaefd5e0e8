use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use super::offline::OfflineMeta;
use crate::errors::AppError;

pub(crate) const AUDIT_COLUMNS: &str = "id, actor_id, action, model, object_id, context, \
     client_created_at, client_lat, client_lon, offline_batch_id, was_offline, prev_hash, hash, created_at";

/// Append-only audit row. `context` is `{action, diff, extra?, client?}`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub model: String,
    pub object_id: String,
    #[schema(value_type = Object)]
    pub context: Value,
    #[serde(flatten)]
    pub offline: OfflineMeta,
    pub prev_hash: Option<String>,
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbAuditEntry {
    pub id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub model: String,
    pub object_id: String,
    pub context: String,
    #[sqlx(flatten)]
    pub offline: OfflineMeta,
    pub prev_hash: Option<String>,
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbAuditEntry> for AuditEntry {
    type Error = AppError;

    fn try_from(value: DbAuditEntry) -> Result<Self, Self::Error> {
        Ok(AuditEntry {
            id: value.id,
            actor_id: value.actor_id,
            action: value.action,
            model: value.model,
            object_id: value.object_id,
            context: serde_json::from_str(&value.context)?,
            offline: value.offline,
            prev_hash: value.prev_hash,
            hash: value.hash,
            created_at: value.created_at,
        })
    }
}
