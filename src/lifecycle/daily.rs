use std::collections::BTreeMap;

use sqlx::{Executor, Sqlite};
use uuid::Uuid;

use super::{ensure_source, stale_state, Effects, TransitionOutcome, Workflow};
use crate::authz::{Action, Actor, ResourceType};
use crate::errors::{AppError, AppResult};
use crate::events::Loggable;
use crate::models::checklist::{CreateDailyChecklistRequest, DbDailyChecklist, DAILY_SELECT};
use crate::models::{DailyChecklist, DailyStatus, ItemStatus};
use crate::utils::utc_now;

const RESOURCE: ResourceType = ResourceType::DailyChecklist;

pub(crate) async fn fetch_daily<'c, E>(executor: E, id: Uuid) -> AppResult<DailyChecklist>
where
    E: Executor<'c, Database = Sqlite>,
{
    let sql = format!("{DAILY_SELECT} WHERE d.id = ?");
    sqlx::query_as::<_, DbDailyChecklist>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| AppError::not_found("dailychecklist not found"))?
        .try_into()
}

/// Every requested key starts `unset`; blank keys are rejected.
fn initial_items(keys: &[String]) -> AppResult<BTreeMap<String, ItemStatus>> {
    let mut items = BTreeMap::new();
    for key in keys {
        let key = key.trim();
        if key.is_empty() {
            return Err(AppError::validation("checklist item keys must not be blank"));
        }
        items.insert(key.to_owned(), ItemStatus::Unset);
    }
    if items.is_empty() {
        return Err(AppError::validation("a daily checklist needs at least one item"));
    }
    Ok(items)
}

/// Applies item edits; only keys already on the checklist may change.
fn merge_items(
    current: &BTreeMap<String, ItemStatus>,
    changes: BTreeMap<String, ItemStatus>,
) -> AppResult<BTreeMap<String, ItemStatus>> {
    let mut merged = current.clone();
    for (key, status) in changes {
        match merged.get_mut(&key) {
            Some(slot) => *slot = status,
            None => return Err(AppError::validation(format!("unknown checklist item: {key}"))),
        }
    }
    Ok(merged)
}

impl Workflow {
    pub async fn list_daily_checklists(&self, actor: &Actor) -> AppResult<Vec<DailyChecklist>> {
        self.guard_type(actor, RESOURCE, Action::List).await?;
        let sql = format!("{DAILY_SELECT} ORDER BY d.created_at");
        let rows = sqlx::query_as::<_, DbDailyChecklist>(&sql)
            .fetch_all(self.pool())
            .await?;
        let checklists = rows
            .into_iter()
            .map(DailyChecklist::try_from)
            .collect::<AppResult<Vec<_>>>()?;
        Ok(self.scope(actor, checklists))
    }

    pub async fn create_daily_checklist(
        &self,
        actor: &Actor,
        request: CreateDailyChecklistRequest,
    ) -> AppResult<DailyChecklist> {
        self.guard_type(actor, RESOURCE, Action::Create).await?;
        let object = self.visible_object(actor, request.object_id).await?;
        self.guard(actor, RESOURCE, Action::Create, &object).await?;
        self.guard_presence(actor, RESOURCE, Action::Create, &object).await?;
        let items = initial_items(&request.items)?;

        let id = Uuid::new_v4();
        let now = utc_now();
        let mut tx = self.pool().begin().await?;
        sqlx::query(
            "INSERT INTO daily_checklists (id, object_id, created_by, data, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(object.id)
        .bind(actor.user_id)
        .bind(serde_json::to_string(&items)?)
        .bind(DailyStatus::Draft.as_str())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let checklist = fetch_daily(&mut *tx, id).await?;
        self.commit(
            tx,
            actor,
            Effects::new(actor, "daily_checklist_create", "daily_checklist.created", &checklist, None),
        )
        .await?;

        tracing::info!(resource = %RESOURCE, id = %id, object_id = %object.id, items = checklist.data.len(), "daily checklist created");
        Ok(checklist)
    }

    /// Item edits: DRAFT only, creator only.
    pub async fn update_daily_checklist(
        &self,
        actor: &Actor,
        id: Uuid,
        changes: BTreeMap<String, ItemStatus>,
    ) -> AppResult<TransitionOutcome> {
        let checklist = fetch_daily(self.pool(), id).await?;
        self.guard(actor, RESOURCE, Action::Update, &checklist).await?;
        ensure_creator(actor, &checklist, Action::Update)?;
        ensure_source(checklist.status, &[DailyStatus::Draft], Action::Update)?;
        let merged = merge_items(&checklist.data, changes)?;

        let mut tx = self.pool().begin().await?;
        let updated = sqlx::query("UPDATE daily_checklists SET data = ?, updated_at = ? WHERE id = ? AND status = ?")
            .bind(serde_json::to_string(&merged)?)
            .bind(utc_now())
            .bind(id)
            .bind(checklist.status.as_str())
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(stale_state(&mut tx, "daily_checklists", id, Action::Update).await);
        }

        let after = fetch_daily(&mut *tx, id).await?;
        let before = checklist.snapshot();
        self.commit(
            tx,
            actor,
            Effects::new(actor, "daily_checklist_update", "daily_checklist.updated", &after, Some(&before)),
        )
        .await?;

        tracing::info!(resource = %RESOURCE, id = %id, "daily checklist items updated");
        Ok(TransitionOutcome::new(RESOURCE, id, Action::Update, checklist.status, checklist.status))
    }

    pub async fn submit_daily_checklist(&self, actor: &Actor, id: Uuid) -> AppResult<TransitionOutcome> {
        let checklist = fetch_daily(self.pool(), id).await?;
        self.guard(actor, RESOURCE, Action::Submit, &checklist).await?;
        ensure_creator(actor, &checklist, Action::Submit)?;
        ensure_source(checklist.status, &[DailyStatus::Draft], Action::Submit)?;

        let now = utc_now();
        let mut tx = self.pool().begin().await?;
        let updated = sqlx::query(
            "UPDATE daily_checklists SET status = ?, submitted_at = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(DailyStatus::PendingConfirmation.as_str())
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(checklist.status.as_str())
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(stale_state(&mut tx, "daily_checklists", id, Action::Submit).await);
        }

        let after = fetch_daily(&mut *tx, id).await?;
        let before = checklist.snapshot();
        self.commit(
            tx,
            actor,
            Effects::new(actor, "daily_checklist_submit", "daily_checklist.submitted", &after, Some(&before)),
        )
        .await?;

        tracing::info!(resource = %RESOURCE, id = %id, from = %checklist.status, to = %after.status, "daily checklist transition");
        Ok(TransitionOutcome::new(RESOURCE, id, Action::Submit, checklist.status, after.status))
    }

    pub async fn confirm_daily_checklist(&self, actor: &Actor, id: Uuid) -> AppResult<TransitionOutcome> {
        let checklist = fetch_daily(self.pool(), id).await?;
        self.guard(actor, RESOURCE, Action::Confirm, &checklist).await?;
        ensure_source(checklist.status, &[DailyStatus::PendingConfirmation], Action::Confirm)?;

        let now = utc_now();
        let mut tx = self.pool().begin().await?;
        let updated = sqlx::query(
            "UPDATE daily_checklists SET status = ?, confirmed_by = ?, confirmed_at = ?, updated_at = ? \
             WHERE id = ? AND status = ?",
        )
        .bind(DailyStatus::Approved.as_str())
        .bind(actor.user_id)
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(checklist.status.as_str())
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(stale_state(&mut tx, "daily_checklists", id, Action::Confirm).await);
        }

        let after = fetch_daily(&mut *tx, id).await?;
        let before = checklist.snapshot();
        self.commit(
            tx,
            actor,
            Effects::new(actor, "daily_checklist_confirm", "daily_checklist.confirmed", &after, Some(&before)),
        )
        .await?;

        tracing::info!(resource = %RESOURCE, id = %id, from = %checklist.status, to = %after.status, "daily checklist transition");
        Ok(TransitionOutcome::new(RESOURCE, id, Action::Confirm, checklist.status, after.status))
    }
}

fn ensure_creator(actor: &Actor, checklist: &DailyChecklist, action: Action) -> AppResult<()> {
    if actor.is_superuser || checklist.created_by == actor.user_id {
        Ok(())
    } else {
        Err(AppError::forbidden(action.as_str(), RESOURCE.model_name()))
    }
}
