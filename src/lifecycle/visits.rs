use serde_json::json;
use sqlx::{Executor, Sqlite};
use uuid::Uuid;

use super::{ensure_source, Effects, TransitionOutcome, Workflow};
use crate::authz::{Action, Actor, ResourceType};
use crate::errors::{AppError, AppResult};
use crate::events::Loggable;
use crate::models::inspection::{NewVisit, VISIT_SELECT};
use crate::models::InspectionVisit;
use crate::utils::utc_now;

const RESOURCE: ResourceType = ResourceType::InspectionVisit;

pub(crate) async fn fetch_visit<'c, E>(executor: E, id: Uuid) -> AppResult<InspectionVisit>
where
    E: Executor<'c, Database = Sqlite>,
{
    let sql = format!("{VISIT_SELECT} WHERE v.id = ?");
    sqlx::query_as::<_, InspectionVisit>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| AppError::not_found("inspectionvisit not found"))
}

fn validate_coordinates(latitude: Option<f64>, longitude: Option<f64>) -> AppResult<()> {
    if latitude.is_some_and(|lat| !(-90.0..=90.0).contains(&lat)) {
        return Err(AppError::validation("latitude must be within [-90, 90]"));
    }
    if longitude.is_some_and(|lon| !(-180.0..=180.0).contains(&lon)) {
        return Err(AppError::validation("longitude must be within [-180, 180]"));
    }
    Ok(())
}

impl Workflow {
    pub async fn list_visits(&self, actor: &Actor) -> AppResult<Vec<InspectionVisit>> {
        self.guard_type(actor, RESOURCE, Action::List).await?;
        let sql = format!("{VISIT_SELECT} ORDER BY v.started_at");
        let visits = sqlx::query_as::<_, InspectionVisit>(&sql)
            .fetch_all(self.pool())
            .await?;
        Ok(self.scope(actor, visits))
    }

    /// Opens a visit for the acting inspector. Offline resubmissions with the
    /// same batch id return the stored visit and `false`.
    pub async fn start_visit(&self, actor: &Actor, new: NewVisit) -> AppResult<(InspectionVisit, bool)> {
        self.guard_type(actor, RESOURCE, Action::Create).await?;
        validate_coordinates(new.latitude, new.longitude)?;
        let object = self.visible_object(actor, new.object_id).await?;
        self.guard(actor, RESOURCE, Action::Create, &object).await?;

        let offline = new.offline.normalized();
        let id = Uuid::new_v4();
        let now = utc_now();
        let mut tx = self.pool().begin().await?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO inspection_visits (
                id, object_id, inspector_id, started_at, latitude, longitude, gps_accuracy_m, note,
                client_created_at, client_lat, client_lon, offline_batch_id, was_offline,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (offline_batch_id, inspector_id) WHERE offline_batch_id IS NOT NULL DO NOTHING
            "#,
        )
        .bind(id)
        .bind(object.id)
        .bind(actor.user_id)
        .bind(now)
        .bind(new.latitude)
        .bind(new.longitude)
        .bind(new.gps_accuracy_m)
        .bind(new.note.as_deref())
        .bind(offline.client_created_at)
        .bind(offline.client_lat)
        .bind(offline.client_lon)
        .bind(offline.offline_batch_id.as_deref())
        .bind(offline.was_offline)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            let batch = offline.batch_id().unwrap_or_default();
            let sql = format!("{VISIT_SELECT} WHERE v.offline_batch_id = ? AND v.inspector_id = ?");
            let existing = sqlx::query_as::<_, InspectionVisit>(&sql)
                .bind(batch)
                .bind(actor.user_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| AppError::internal("offline batch conflict without a stored visit"))?;
            let snapshot = existing.snapshot();
            let effects = Effects::new(actor, "replay_visit", "visit.replayed", &existing, Some(&snapshot))
                .with_extra(json!({ "offline_batch_id": batch }))
                .with_offline(&offline);
            self.commit(tx, actor, effects).await?;

            tracing::info!(resource = %RESOURCE, id = %existing.id, batch = %batch, "offline visit replayed");
            return Ok((existing, false));
        }

        let visit = fetch_visit(&mut *tx, id).await?;
        let effects = Effects::new(actor, "visit_start", "visit.started", &visit, None).with_offline(&offline);
        self.commit(tx, actor, effects).await?;

        tracing::info!(resource = %RESOURCE, id = %id, object_id = %object.id, "visit started");
        Ok((visit, true))
    }

    /// OPEN -> ENDED; only the visiting inspector may end a visit.
    pub async fn end_visit(&self, actor: &Actor, id: Uuid) -> AppResult<TransitionOutcome> {
        let visit = fetch_visit(self.pool(), id).await?;
        self.guard(actor, RESOURCE, Action::End, &visit).await?;
        if !actor.is_superuser && visit.inspector_id != actor.user_id {
            return Err(AppError::forbidden(Action::End.as_str(), RESOURCE.model_name()));
        }
        ensure_source(visit.state(), &["OPEN"], Action::End)?;

        let now = utc_now();
        let mut tx = self.pool().begin().await?;
        let updated = sqlx::query(
            "UPDATE inspection_visits SET ended_at = ?, updated_at = ? WHERE id = ? AND ended_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(AppError::invalid_transition("ENDED", Action::End.as_str()));
        }

        let after = fetch_visit(&mut *tx, id).await?;
        let before = visit.snapshot();
        self.commit(tx, actor, Effects::new(actor, "visit_end", "visit.ended", &after, Some(&before)))
            .await?;

        tracing::info!(resource = %RESOURCE, id = %id, from = visit.state(), to = after.state(), "visit ended");
        Ok(TransitionOutcome::new(RESOURCE, id, Action::End, visit.state(), after.state()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_must_be_on_the_globe() {
        assert!(validate_coordinates(None, None).is_ok());
        assert!(validate_coordinates(Some(55.75), Some(37.61)).is_ok());
        assert!(validate_coordinates(Some(91.0), None).is_err());
        assert!(validate_coordinates(None, Some(-180.5)).is_err());
    }
}
