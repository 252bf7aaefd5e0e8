use serde_json::{json, Value};
use sqlx::{Executor, Sqlite};
use uuid::Uuid;

use super::{ensure_source, stale_state, Effects, TransitionOutcome, Workflow};
use crate::authz::{Action, Actor, ResourceType};
use crate::errors::{AppError, AppResult};
use crate::events::Loggable;
use crate::models::checklist::{DbOpeningChecklist, OPENING_SELECT};
use crate::models::{ChecklistStatus, OpeningChecklist};
use crate::utils::utc_now;

const RESOURCE: ResourceType = ResourceType::OpeningChecklist;

pub(crate) async fn fetch_opening<'c, E>(executor: E, id: Uuid) -> AppResult<OpeningChecklist>
where
    E: Executor<'c, Database = Sqlite>,
{
    let sql = format!("{OPENING_SELECT} WHERE c.id = ?");
    sqlx::query_as::<_, DbOpeningChecklist>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| AppError::not_found("openingchecklist not found"))?
        .try_into()
}

impl Workflow {
    pub async fn list_opening_checklists(&self, actor: &Actor) -> AppResult<Vec<OpeningChecklist>> {
        self.guard_type(actor, RESOURCE, Action::List).await?;
        let sql = format!("{OPENING_SELECT} ORDER BY c.created_at");
        let rows = sqlx::query_as::<_, DbOpeningChecklist>(&sql)
            .fetch_all(self.pool())
            .await?;
        let checklists = rows
            .into_iter()
            .map(OpeningChecklist::try_from)
            .collect::<AppResult<Vec<_>>>()?;
        Ok(self.scope(actor, checklists))
    }

    pub async fn get_opening_checklist(&self, actor: &Actor, id: Uuid) -> AppResult<OpeningChecklist> {
        self.guard_type(actor, RESOURCE, Action::Retrieve).await?;
        let checklist = fetch_opening(self.pool(), id).await?;
        if crate::authz::is_visible(actor, &checklist, &self.config().system_wide_roles) {
            Ok(checklist)
        } else {
            Err(AppError::not_found("openingchecklist not found"))
        }
    }

    /// Replaces the checklist payload; allowed while DRAFT or REJECTED.
    pub async fn update_opening_checklist(&self, actor: &Actor, id: Uuid, data: Value) -> AppResult<TransitionOutcome> {
        if !data.is_object() {
            return Err(AppError::validation("checklist data must be a JSON object"));
        }

        let checklist = fetch_opening(self.pool(), id).await?;
        self.guard(actor, RESOURCE, Action::Update, &checklist).await?;
        ensure_source(
            checklist.status,
            &[ChecklistStatus::Draft, ChecklistStatus::Rejected],
            Action::Update,
        )?;

        let mut tx = self.pool().begin().await?;
        let updated = sqlx::query(
            "UPDATE opening_checklists SET data = ?, filled_by = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(serde_json::to_string(&data)?)
        .bind(actor.user_id)
        .bind(utc_now())
        .bind(id)
        .bind(checklist.status.as_str())
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(stale_state(&mut tx, "opening_checklists", id, Action::Update).await);
        }

        let after = fetch_opening(&mut *tx, id).await?;
        let before = checklist.snapshot();
        self.commit(
            tx,
            actor,
            Effects::new(actor, "checklist_update", "checklist.updated", &after, Some(&before)),
        )
        .await?;

        tracing::info!(resource = %RESOURCE, id = %id, status = %checklist.status, "checklist data updated");
        Ok(TransitionOutcome::new(RESOURCE, id, Action::Update, checklist.status, checklist.status))
    }

    /// DRAFT or REJECTED -> SUBMITTED. Resubmission clears the previous review.
    pub async fn submit_opening_checklist(&self, actor: &Actor, id: Uuid) -> AppResult<TransitionOutcome> {
        let checklist = fetch_opening(self.pool(), id).await?;
        self.guard(actor, RESOURCE, Action::Submit, &checklist).await?;
        ensure_source(
            checklist.status,
            &[ChecklistStatus::Draft, ChecklistStatus::Rejected],
            Action::Submit,
        )?;

        let now = utc_now();
        let mut tx = self.pool().begin().await?;
        let updated = sqlx::query(
            r#"
            UPDATE opening_checklists
            SET status = ?, submitted_at = ?, filled_by = COALESCE(filled_by, ?),
                reviewed_by = NULL, reviewed_at = NULL, review_comment = NULL, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(ChecklistStatus::Submitted.as_str())
        .bind(now)
        .bind(actor.user_id)
        .bind(now)
        .bind(id)
        .bind(checklist.status.as_str())
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(stale_state(&mut tx, "opening_checklists", id, Action::Submit).await);
        }

        self.finish_review(tx, actor, &checklist, Action::Submit, ChecklistStatus::Submitted, None)
            .await
    }

    pub async fn approve_opening_checklist(&self, actor: &Actor, id: Uuid) -> AppResult<TransitionOutcome> {
        self.review_opening_checklist(actor, id, Action::Approve, ChecklistStatus::Approved, None)
            .await
    }

    pub async fn reject_opening_checklist(
        &self,
        actor: &Actor,
        id: Uuid,
        comment: Option<String>,
    ) -> AppResult<TransitionOutcome> {
        self.review_opening_checklist(actor, id, Action::Reject, ChecklistStatus::Rejected, comment)
            .await
    }

    async fn review_opening_checklist(
        &self,
        actor: &Actor,
        id: Uuid,
        action: Action,
        target: ChecklistStatus,
        comment: Option<String>,
    ) -> AppResult<TransitionOutcome> {
        let checklist = fetch_opening(self.pool(), id).await?;
        self.guard(actor, RESOURCE, action, &checklist).await?;
        ensure_source(checklist.status, &[ChecklistStatus::Submitted], action)?;

        let now = utc_now();
        let mut tx = self.pool().begin().await?;
        let updated = sqlx::query(
            r#"
            UPDATE opening_checklists
            SET status = ?, reviewed_by = ?, reviewed_at = ?, review_comment = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(target.as_str())
        .bind(actor.user_id)
        .bind(now)
        .bind(comment.as_deref())
        .bind(now)
        .bind(id)
        .bind(checklist.status.as_str())
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(stale_state(&mut tx, "opening_checklists", id, action).await);
        }

        let extra = (action == Action::Reject).then(|| json!({ "comment": comment }));
        self.finish_review(tx, actor, &checklist, action, target, extra).await
    }

    async fn finish_review(
        &self,
        mut tx: sqlx::Transaction<'_, Sqlite>,
        actor: &Actor,
        before: &OpeningChecklist,
        action: Action,
        target: ChecklistStatus,
        extra: Option<Value>,
    ) -> AppResult<TransitionOutcome> {
        let after = fetch_opening(&mut *tx, before.id).await?;
        let snapshot = before.snapshot();
        let kind = match target {
            ChecklistStatus::Submitted => "checklist.submitted",
            ChecklistStatus::Approved => "checklist.approved",
            ChecklistStatus::Rejected => "checklist.rejected",
            ChecklistStatus::Draft => "checklist.updated",
        };
        let mut effects = Effects::new(actor, format!("checklist_{action}"), kind, &after, Some(&snapshot));
        if let Some(extra) = extra {
            effects = effects.with_extra(extra);
        }
        self.commit(tx, actor, effects).await?;

        tracing::info!(resource = %RESOURCE, id = %before.id, from = %before.status, to = %target, "checklist transition");
        Ok(TransitionOutcome::new(RESOURCE, before.id, action, before.status, target))
    }
}
