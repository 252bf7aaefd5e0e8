use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::Loggable;
use crate::errors::AppResult;
use crate::models::audit::{AuditEntry, DbAuditEntry, AUDIT_COLUMNS};
use crate::models::OfflineMeta;

const UNDIFFED_FIELDS: [&str; 2] = ["created_at", "updated_at"];

/// Field-level diff `{field: {from, to}}`.
///
/// Without a `before` snapshot every field of `after` is recorded with
/// `from: null`. Timestamps are left out of update diffs.
pub fn build_diff(before: Option<&Value>, after: &Value) -> Map<String, Value> {
    let mut diff = Map::new();
    let Some(after) = after.as_object() else {
        return diff;
    };

    match before.and_then(Value::as_object) {
        None => {
            for (field, value) in after {
                diff.insert(field.clone(), json!({"from": Value::Null, "to": value}));
            }
        }
        Some(before) => {
            for (field, value) in after {
                if UNDIFFED_FIELDS.contains(&field.as_str()) {
                    continue;
                }
                let old = before.get(field).unwrap_or(&Value::Null);
                if old != value {
                    diff.insert(field.clone(), json!({"from": old, "to": value}));
                }
            }
        }
    }
    diff
}

/// One audit row waiting to be written.
#[derive(Debug, Clone)]
pub struct AuditRecord<'a> {
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub model: &'static str,
    pub object_id: Uuid,
    pub diff: Map<String, Value>,
    pub extra: Option<Value>,
    pub offline: Option<&'a OfflineMeta>,
}

impl<'a> AuditRecord<'a> {
    /// Diffs `entity` against `before`; pass `None` for creations.
    pub fn new<T: Loggable>(actor_id: Option<Uuid>, action: impl Into<String>, entity: &T, before: Option<&Value>) -> Self {
        Self {
            actor_id,
            action: action.into(),
            model: entity.resource_type().label(),
            object_id: entity.subject_id(),
            diff: build_diff(before, &entity.snapshot()),
            extra: None,
            offline: None,
        }
    }

    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = Some(extra);
        self
    }

    pub fn with_offline(mut self, offline: &'a OfflineMeta) -> Self {
        self.offline = Some(offline);
        self
    }

    fn context(&self) -> Value {
        let mut context = Map::new();
        context.insert("action".into(), Value::String(self.action.clone()));
        context.insert("diff".into(), Value::Object(self.diff.clone()));
        if let Some(extra) = &self.extra {
            context.insert("extra".into(), extra.clone());
        }
        if let Some(client) = self.offline.and_then(OfflineMeta::audit_payload) {
            context.insert("client".into(), client);
        }
        Value::Object(context)
    }
}

fn chain_hash(prev_hash: Option<&str>, payload: &str) -> String {
    let mut hasher = Sha256::new();
    if let Some(prev) = prev_hash {
        hasher.update(prev.as_bytes());
    }
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

fn canonical_payload(
    actor_id: Option<Uuid>,
    action: &str,
    model: &str,
    object_id: &str,
    context: &str,
    created_at: &str,
) -> String {
    json!({
        "actor_id": actor_id,
        "action": action,
        "model": model,
        "object_id": object_id,
        "context": context,
        "created_at": created_at,
    })
    .to_string()
}

/// Appends an audit row on the caller's connection, usually inside the
/// transition's transaction, linking it to the previous row's hash.
pub async fn record(conn: &mut SqliteConnection, entry: AuditRecord<'_>) -> AppResult<Uuid> {
    let id = Uuid::new_v4();
    let object_id = entry.object_id.to_string();
    let context = serde_json::to_string(&entry.context())?;
    let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
    let offline = entry.offline.cloned().unwrap_or_default();

    let prev_hash: Option<String> = sqlx::query_scalar("SELECT hash FROM audit_log ORDER BY rowid DESC LIMIT 1")
        .fetch_optional(&mut *conn)
        .await?;

    let payload = canonical_payload(entry.actor_id, &entry.action, entry.model, &object_id, &context, &created_at);
    let hash = chain_hash(prev_hash.as_deref(), &payload);

    sqlx::query(
        r#"
        INSERT INTO audit_log (
            id, actor_id, action, model, object_id, context,
            client_created_at, client_lat, client_lon, offline_batch_id, was_offline,
            prev_hash, hash, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(entry.actor_id)
    .bind(&entry.action)
    .bind(entry.model)
    .bind(&object_id)
    .bind(&context)
    .bind(offline.client_created_at)
    .bind(offline.client_lat)
    .bind(offline.client_lon)
    .bind(&offline.offline_batch_id)
    .bind(offline.was_offline)
    .bind(&prev_hash)
    .bind(&hash)
    .bind(&created_at)
    .execute(&mut *conn)
    .await?;

    tracing::debug!(audit_id = %id, action = %entry.action, model = entry.model, object_id = %object_id, "audit entry recorded");
    Ok(id)
}

/// Audit rows for one record, oldest first.
pub async fn history(pool: &SqlitePool, object_id: Uuid) -> AppResult<Vec<AuditEntry>> {
    let sql = format!("SELECT {AUDIT_COLUMNS} FROM audit_log WHERE object_id = ? ORDER BY rowid");
    sqlx::query_as::<_, DbAuditEntry>(&sql)
        .bind(object_id.to_string())
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(AuditEntry::try_from)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, utoipa::ToSchema)]
pub struct ChainReport {
    pub entries: usize,
    /// First row whose link or hash does not match.
    pub broken_at: Option<Uuid>,
}

#[derive(sqlx::FromRow)]
struct ChainRow {
    id: Uuid,
    actor_id: Option<Uuid>,
    action: String,
    model: String,
    object_id: String,
    context: String,
    prev_hash: Option<String>,
    hash: String,
    created_at: String,
}

/// Recomputes the hash chain over the whole audit log.
pub async fn verify_chain(pool: &SqlitePool) -> AppResult<ChainReport> {
    let rows = sqlx::query_as::<_, ChainRow>(
        "SELECT id, actor_id, action, model, object_id, context, prev_hash, hash, created_at \
         FROM audit_log ORDER BY rowid",
    )
    .fetch_all(pool)
    .await?;

    let mut previous: Option<String> = None;
    for row in &rows {
        let payload = canonical_payload(row.actor_id, &row.action, &row.model, &row.object_id, &row.context, &row.created_at);
        let intact = row.prev_hash == previous && row.hash == chain_hash(row.prev_hash.as_deref(), &payload);
        if !intact {
            tracing::warn!(audit_id = %row.id, "audit chain broken");
            return Ok(ChainReport {
                entries: rows.len(),
                broken_at: Some(row.id),
            });
        }
        previous = Some(row.hash.clone());
    }

    Ok(ChainReport {
        entries: rows.len(),
        broken_at: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creation_diff_starts_from_null() {
        let diff = build_diff(None, &json!({"status": "DRAFT", "name": "Block 3"}));
        assert_eq!(diff["status"], json!({"from": null, "to": "DRAFT"}));
        assert_eq!(diff.len(), 2);
    }

    #[test]
    fn update_diff_keeps_changed_fields_without_timestamps() {
        let before = json!({"status": "SUBMITTED", "review_comment": null, "updated_at": "a", "name": "x"});
        let after = json!({"status": "REJECTED", "review_comment": "missing data", "updated_at": "b", "name": "x"});
        let diff = build_diff(Some(&before), &after);

        assert_eq!(diff.len(), 2);
        assert_eq!(diff["status"], json!({"from": "SUBMITTED", "to": "REJECTED"}));
        assert_eq!(diff["review_comment"]["to"], json!("missing data"));
    }

    #[test]
    fn chain_hash_depends_on_predecessor() {
        let first = chain_hash(None, "payload");
        let second = chain_hash(Some(&first), "payload");
        assert_ne!(first, second);
        assert_eq!(first.len(), 64);
    }
}
