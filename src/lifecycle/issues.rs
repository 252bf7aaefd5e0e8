use serde_json::json;
use sqlx::{Executor, Sqlite};
use uuid::Uuid;

use super::{ensure_source, stale_state, Effects, TransitionOutcome, Workflow};
use crate::authz::{Action, Actor, ResourceType};
use crate::errors::{AppError, AppResult};
use crate::events::Loggable;
use crate::models::issue::{DbIssue, NewIssue, Severity, ISSUE_SELECT};
use crate::models::{Issue, IssueKind, IssueStatus, OfflineMeta};
use crate::utils::{required_text, utc_now};

pub(crate) async fn fetch_issue<'c, E>(executor: E, kind: IssueKind, id: Uuid) -> AppResult<Issue>
where
    E: Executor<'c, Database = Sqlite>,
{
    let sql = format!("{ISSUE_SELECT} WHERE i.id = ? AND i.kind = ?");
    sqlx::query_as::<_, DbIssue>(&sql)
        .bind(id)
        .bind(kind.as_str())
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| AppError::not_found(format!("{} not found", kind.slug())))?
        .try_into()
}

async fn find_by_batch<'c, E>(executor: E, kind: IssueKind, batch: &str, created_by: Uuid) -> AppResult<Option<Issue>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let sql = format!("{ISSUE_SELECT} WHERE i.kind = ? AND i.offline_batch_id = ? AND i.created_by = ?");
    sqlx::query_as::<_, DbIssue>(&sql)
        .bind(kind.as_str())
        .bind(batch)
        .bind(created_by)
        .fetch_optional(executor)
        .await?
        .map(Issue::try_from)
        .transpose()
}

/// Actor and timestamp columns stamped on entering `target`.
fn stamp_columns(target: IssueStatus) -> Option<(&'static str, &'static str)> {
    match target {
        IssueStatus::PendingConfirmation => Some(("resolved_by", "resolved_at")),
        IssueStatus::Accepted | IssueStatus::Rejected => Some(("closed_by", "closed_at")),
        IssueStatus::Open | IssueStatus::InProgress => None,
    }
}

fn issue_kind(resource: ResourceType) -> AppResult<IssueKind> {
    IssueKind::from_resource(resource)
        .ok_or_else(|| AppError::validation(format!("{resource} is not an issue resource")))
}

impl Workflow {
    pub async fn list_issues(&self, actor: &Actor, kind: IssueKind) -> AppResult<Vec<Issue>> {
        self.guard_type(actor, kind.resource_type(), Action::List).await?;
        let sql = format!("{ISSUE_SELECT} WHERE i.kind = ? ORDER BY i.created_at");
        let rows = sqlx::query_as::<_, DbIssue>(&sql)
            .bind(kind.as_str())
            .fetch_all(self.pool())
            .await?;
        let issues = rows
            .into_iter()
            .map(Issue::try_from)
            .collect::<AppResult<Vec<_>>>()?;
        Ok(self.scope(actor, issues))
    }

    pub async fn get_issue(&self, actor: &Actor, kind: IssueKind, id: Uuid) -> AppResult<Issue> {
        self.guard_type(actor, kind.resource_type(), Action::Retrieve).await?;
        let issue = fetch_issue(self.pool(), kind, id).await?;
        if crate::authz::is_visible(actor, &issue, &self.config().system_wide_roles) {
            Ok(issue)
        } else {
            Err(AppError::not_found(format!("{} not found", kind.slug())))
        }
    }

    /// Records a remark or violation.
    ///
    /// With an offline batch id the insert is keyed on (kind, batch id, actor):
    /// a resubmission returns the stored row with `false` and is audited as a replay.
    pub async fn create_issue(&self, actor: &Actor, kind: IssueKind, new: NewIssue) -> AppResult<(Issue, bool)> {
        let resource = kind.resource_type();
        self.guard_type(actor, resource, Action::Create).await?;

        let category = required_text("category", &new.category)?;
        let description = required_text("description", &new.description)?;
        if kind == IssueKind::Violation && new.fixability.is_some() {
            return Err(AppError::validation("fixability only applies to remarks"));
        }

        let object = self.visible_object(actor, new.object_id).await?;
        self.guard(actor, resource, Action::Create, &object).await?;

        // A resubmitted batch answers with the stored row even if the actor
        // has left the site since.
        let offline = new.offline.normalized();
        if let Some(batch) = offline.batch_id() {
            if let Some(existing) = find_by_batch(self.pool(), kind, batch, actor.user_id).await? {
                let tx = self.pool().begin().await?;
                return self.replay_issue(tx, actor, existing, &offline).await;
            }
        }
        self.guard_presence(actor, resource, Action::Create, &object).await?;

        let id = Uuid::new_v4();
        let now = utc_now();
        let mut tx = self.pool().begin().await?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO issues (
                id, kind, object_id, category, description, severity, fixability, status,
                created_by, sla_due, latitude, longitude,
                client_created_at, client_lat, client_lon, offline_batch_id, was_offline,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (kind, offline_batch_id, created_by) WHERE offline_batch_id IS NOT NULL DO NOTHING
            "#,
        )
        .bind(id)
        .bind(kind.as_str())
        .bind(object.id)
        .bind(&category)
        .bind(&description)
        .bind(new.severity.unwrap_or(Severity::Medium).as_str())
        .bind(new.fixability.map(|f| f.as_str()))
        .bind(IssueStatus::Open.as_str())
        .bind(actor.user_id)
        .bind(new.sla_due)
        .bind(new.latitude)
        .bind(new.longitude)
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
            let existing = find_by_batch(&mut *tx, kind, batch, actor.user_id)
                .await?
                .ok_or_else(|| AppError::internal("offline batch conflict without a stored row"))?;
            return self.replay_issue(tx, actor, existing, &offline).await;
        }

        let slug = kind.slug();
        let issue = fetch_issue(&mut *tx, kind, id).await?;
        let effects = Effects::new(actor, format!("create_{slug}"), format!("{slug}.created"), &issue, None)
            .with_offline(&offline);
        self.commit(tx, actor, effects).await?;

        tracing::info!(resource = %resource, id = %id, object_id = %object.id, "issue created");
        Ok((issue, true))
    }

    async fn replay_issue(
        &self,
        tx: sqlx::Transaction<'_, Sqlite>,
        actor: &Actor,
        existing: Issue,
        offline: &OfflineMeta,
    ) -> AppResult<(Issue, bool)> {
        let slug = existing.kind.slug();
        let batch = offline.batch_id().unwrap_or_default().to_owned();
        let snapshot = existing.snapshot();
        let effects = Effects::new(
            actor,
            format!("replay_{slug}"),
            format!("{slug}.replayed"),
            &existing,
            Some(&snapshot),
        )
        .with_extra(json!({ "offline_batch_id": batch }))
        .with_offline(offline);
        self.commit(tx, actor, effects).await?;

        tracing::info!(resource = %existing.kind.resource_type(), id = %existing.id, batch = %batch, "offline issue replayed");
        Ok((existing, false))
    }

    /// OPEN -> IN_PROGRESS.
    pub async fn start_issue_work(&self, actor: &Actor, resource: ResourceType, id: Uuid) -> AppResult<TransitionOutcome> {
        self.advance_issue(
            actor,
            resource,
            id,
            Action::StartWork,
            &[IssueStatus::Open],
            IssueStatus::InProgress,
            "in_progress",
            None,
        )
        .await
    }

    pub async fn submit_issue_resolution(
        &self,
        actor: &Actor,
        resource: ResourceType,
        id: Uuid,
    ) -> AppResult<TransitionOutcome> {
        self.advance_issue(
            actor,
            resource,
            id,
            Action::SubmitResolution,
            &[IssueStatus::Open, IssueStatus::InProgress],
            IssueStatus::PendingConfirmation,
            "resolution_submitted",
            None,
        )
        .await
    }

    pub async fn confirm_issue_closure(
        &self,
        actor: &Actor,
        resource: ResourceType,
        id: Uuid,
    ) -> AppResult<TransitionOutcome> {
        self.advance_issue(
            actor,
            resource,
            id,
            Action::ConfirmClosure,
            &[IssueStatus::PendingConfirmation],
            IssueStatus::Accepted,
            "closed",
            None,
        )
        .await
    }

    /// PENDING_CONFIRMATION -> REJECTED; only when issue rejection is enabled.
    pub async fn reject_issue(
        &self,
        actor: &Actor,
        resource: ResourceType,
        id: Uuid,
        comment: Option<String>,
    ) -> AppResult<TransitionOutcome> {
        self.advance_issue(
            actor,
            resource,
            id,
            Action::Reject,
            &[IssueStatus::PendingConfirmation],
            IssueStatus::Rejected,
            "rejected",
            Some(comment),
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn advance_issue(
        &self,
        actor: &Actor,
        resource: ResourceType,
        id: Uuid,
        action: Action,
        sources: &[IssueStatus],
        target: IssueStatus,
        kind_suffix: &str,
        rejection: Option<Option<String>>,
    ) -> AppResult<TransitionOutcome> {
        let kind = issue_kind(resource)?;
        let issue = fetch_issue(self.pool(), kind, id).await?;
        self.guard(actor, resource, action, &issue).await?;
        if rejection.is_some() && !self.config().issue_reject_enabled {
            tracing::debug!(user_id = %actor.user_id, resource = %resource, "issue rejection is disabled");
            return Err(AppError::forbidden(action.as_str(), resource.model_name()));
        }
        ensure_source(issue.status, sources, action)?;

        let now = utc_now();
        let stamp = stamp_columns(target);
        let sql = match stamp {
            Some((by, at)) => {
                format!("UPDATE issues SET status = ?, {by} = ?, {at} = ?, updated_at = ? WHERE id = ? AND status = ?")
            }
            None => "UPDATE issues SET status = ?, updated_at = ? WHERE id = ? AND status = ?".to_string(),
        };

        let mut tx = self.pool().begin().await?;
        let mut query = sqlx::query(&sql).bind(target.as_str());
        if stamp.is_some() {
            query = query.bind(actor.user_id).bind(now);
        }
        let updated = query
            .bind(now)
            .bind(id)
            .bind(issue.status.as_str())
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(stale_state(&mut tx, "issues", id, action).await);
        }

        let after = fetch_issue(&mut *tx, kind, id).await?;
        let before = issue.snapshot();
        let slug = kind.slug();
        let mut effects = Effects::new(
            actor,
            format!("{slug}_{action}"),
            format!("{slug}.{kind_suffix}"),
            &after,
            Some(&before),
        );
        if let Some(comment) = rejection {
            effects = effects.with_extra(json!({ "comment": comment }));
        }
        self.commit(tx, actor, effects).await?;

        tracing::info!(resource = %resource, id = %id, from = %issue.status, to = %target, "issue transition");
        Ok(TransitionOutcome::new(resource, id, action, issue.status, target))
    }
}
