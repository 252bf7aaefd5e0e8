use serde_json::{json, Value};
use sqlx::{Executor, Sqlite, SqlitePool};
use uuid::Uuid;

use super::{ensure_source, stale_state, Effects, TransitionOutcome, Workflow};
use crate::authz::{Action, Actor, ResourceType};
use crate::errors::{AppError, AppResult};
use crate::events::Loggable;
use crate::models::object::{CreateObjectRequest, DbConstructionObject, OBJECT_COLUMNS};
use crate::models::{ConstructionObject, ObjectStatus};
use crate::utils::{required_text, utc_now};

const RESOURCE: ResourceType = ResourceType::ConstructionObject;

pub(crate) async fn fetch_object<'c, E>(executor: E, id: Uuid) -> AppResult<ConstructionObject>
where
    E: Executor<'c, Database = Sqlite>,
{
    let sql = format!("SELECT {OBJECT_COLUMNS} FROM construction_objects WHERE id = ?");
    sqlx::query_as::<_, DbConstructionObject>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| AppError::not_found("constructionobject not found"))?
        .try_into()
}

fn validate_polygon(polygon: Option<Value>) -> AppResult<Value> {
    match polygon {
        None | Some(Value::Null) => Ok(json!({})),
        Some(polygon @ Value::Object(_)) => Ok(polygon),
        Some(_) => Err(AppError::validation("polygon must be a GeoJSON object")),
    }
}

impl Workflow {
    pub async fn list_objects(&self, actor: &Actor) -> AppResult<Vec<ConstructionObject>> {
        self.guard_type(actor, RESOURCE, Action::List).await?;
        let sql = format!("SELECT {OBJECT_COLUMNS} FROM construction_objects ORDER BY created_at");
        let rows = sqlx::query_as::<_, DbConstructionObject>(&sql)
            .fetch_all(self.pool())
            .await?;
        let objects = rows
            .into_iter()
            .map(ConstructionObject::try_from)
            .collect::<AppResult<Vec<_>>>()?;
        Ok(self.scope(actor, objects))
    }

    pub async fn get_object(&self, actor: &Actor, id: Uuid) -> AppResult<ConstructionObject> {
        self.guard_type(actor, RESOURCE, Action::Retrieve).await?;
        self.visible_object(actor, id).await
    }

    /// Creates a DRAFT object inside one of the actor's own organizations.
    pub async fn create_object(&self, actor: &Actor, request: CreateObjectRequest) -> AppResult<ConstructionObject> {
        self.guard_type(actor, RESOURCE, Action::Create).await?;

        let name = required_text("name", &request.name)?;
        let polygon = validate_polygon(request.polygon)?;
        if let (Some(start), Some(end)) = (request.plan_start, request.plan_end) {
            if start > end {
                return Err(AppError::validation("plan_start must not be after plan_end"));
            }
        }

        let org_exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM organizations WHERE id = ?")
            .bind(request.org_id)
            .fetch_optional(self.pool())
            .await?;
        if org_exists.is_none() {
            return Err(AppError::not_found("organization not found"));
        }
        // The coarse role check is existential over all orgs; creation is
        // additionally pinned to the actor's own memberships.
        if !actor.is_superuser && !actor.is_member_of(request.org_id) {
            return Err(AppError::forbidden(Action::Create.as_str(), RESOURCE.model_name()));
        }

        let id = Uuid::new_v4();
        let now = utc_now();
        let mut tx = self.pool().begin().await?;
        sqlx::query(
            r#"
            INSERT INTO construction_objects (
                id, org_id, name, description, polygon, status, plan_start, plan_end,
                created_by, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(request.org_id)
        .bind(&name)
        .bind(&request.description)
        .bind(serde_json::to_string(&polygon)?)
        .bind(ObjectStatus::Draft.as_str())
        .bind(request.plan_start)
        .bind(request.plan_end)
        .bind(actor.user_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let object = fetch_object(&mut *tx, id).await?;
        self.commit(tx, actor, Effects::new(actor, "create_object", "object.created", &object, None))
            .await?;

        tracing::info!(resource = %RESOURCE, id = %id, org_id = %object.org_id, "object created");
        Ok(object)
    }

    pub async fn plan_object(&self, actor: &Actor, id: Uuid) -> AppResult<TransitionOutcome> {
        self.advance_object(
            actor,
            id,
            Action::Plan,
            &[ObjectStatus::Draft],
            ObjectStatus::Planned,
            "object.planned",
        )
        .await
    }

    pub async fn request_object_activation(&self, actor: &Actor, id: Uuid) -> AppResult<TransitionOutcome> {
        self.advance_object(
            actor,
            id,
            Action::RequestActivation,
            &[ObjectStatus::Draft, ObjectStatus::Planned],
            ObjectStatus::ActivationPending,
            "object.activation_requested",
        )
        .await
    }

    pub async fn activate_object(&self, actor: &Actor, id: Uuid) -> AppResult<TransitionOutcome> {
        self.advance_object(
            actor,
            id,
            Action::Activate,
            &[ObjectStatus::ActivationPending, ObjectStatus::Planned],
            ObjectStatus::Active,
            "object.activated",
        )
        .await
    }

    pub async fn close_object(&self, actor: &Actor, id: Uuid) -> AppResult<TransitionOutcome> {
        self.advance_object(
            actor,
            id,
            Action::Close,
            &[ObjectStatus::Active],
            ObjectStatus::Closed,
            "object.closed",
        )
        .await
    }

    async fn advance_object(
        &self,
        actor: &Actor,
        id: Uuid,
        action: Action,
        sources: &[ObjectStatus],
        target: ObjectStatus,
        kind: &str,
    ) -> AppResult<TransitionOutcome> {
        let object = fetch_object(self.pool(), id).await?;
        self.guard(actor, RESOURCE, action, &object).await?;
        self.guard_presence(actor, RESOURCE, action, &object).await?;
        ensure_source(object.status, sources, action)?;

        let now = utc_now();
        let mut tx = self.pool().begin().await?;
        let updated = if target == ObjectStatus::Active {
            sqlx::query(
                "UPDATE construction_objects SET status = ?, activated_at = ?, activated_by = ?, updated_at = ? \
                 WHERE id = ? AND status = ?",
            )
            .bind(target.as_str())
            .bind(now)
            .bind(actor.user_id)
            .bind(now)
            .bind(id)
            .bind(object.status.as_str())
            .execute(&mut *tx)
            .await?
        } else {
            sqlx::query("UPDATE construction_objects SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
                .bind(target.as_str())
                .bind(now)
                .bind(id)
                .bind(object.status.as_str())
                .execute(&mut *tx)
                .await?
        };
        if updated.rows_affected() == 0 {
            return Err(stale_state(&mut tx, "construction_objects", id, action).await);
        }

        let mut extra = None;
        if target == ObjectStatus::Active {
            let created = sqlx::query(
                "INSERT OR IGNORE INTO opening_checklists (id, object_id, data, status, created_at, updated_at) \
                 VALUES (?, ?, '{}', 'DRAFT', ?, ?)",
            )
            .bind(Uuid::new_v4())
            .bind(id)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected()
                > 0;
            extra = Some(json!({ "opening_checklist_created": created }));
        }

        let after = fetch_object(&mut *tx, id).await?;
        let before = object.snapshot();
        let mut effects = Effects::new(actor, format!("object_{action}"), kind, &after, Some(&before));
        if let Some(extra) = extra {
            effects = effects.with_extra(extra);
        }
        self.commit(tx, actor, effects).await?;

        tracing::info!(resource = %RESOURCE, id = %id, from = %object.status, to = %target, "object transition");
        Ok(TransitionOutcome::new(RESOURCE, id, action, object.status, target))
    }
}

/// Creates the missing opening checklist of every ACTIVE object.
/// Returns the ids of the objects that were repaired.
pub async fn repair_missing_checklists(pool: &SqlitePool) -> AppResult<Vec<Uuid>> {
    let orphaned: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT o.id FROM construction_objects o
        LEFT JOIN opening_checklists c ON c.object_id = o.id
        WHERE o.status = ? AND c.id IS NULL
        "#,
    )
    .bind(ObjectStatus::Active.as_str())
    .fetch_all(pool)
    .await?;

    let now = utc_now();
    let mut tx = pool.begin().await?;
    let mut repaired = Vec::with_capacity(orphaned.len());
    for object_id in orphaned {
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO opening_checklists (id, object_id, data, status, created_at, updated_at) \
             VALUES (?, ?, '{}', 'DRAFT', ?, ?)",
        )
        .bind(Uuid::new_v4())
        .bind(object_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if inserted > 0 {
            repaired.push(object_id);
        }
    }
    tx.commit().await?;

    tracing::info!(repaired = repaired.len(), "missing opening checklists repaired");
    Ok(repaired)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polygons_default_to_an_empty_object() {
        assert_eq!(validate_polygon(None).unwrap(), json!({}));
        assert_eq!(validate_polygon(Some(Value::Null)).unwrap(), json!({}));
        assert!(validate_polygon(Some(json!([1, 2]))).is_err());
        let square = json!({"type": "Polygon", "coordinates": [[[0, 0], [0, 1], [1, 1], [0, 0]]]});
        assert_eq!(validate_polygon(Some(square.clone())).unwrap(), square);
    }
}
