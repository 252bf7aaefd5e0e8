//! Resource lifecycle controllers.
//!
//! Every transition follows the same shape inside one transaction:
//! visibility (NotFound) -> authorization (Forbidden) -> presence ->
//! source state (InvalidStateTransition) -> compare-and-set update ->
//! audit row -> notification rows -> commit -> publish.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::{self, Action, Actor, PolicyEvaluator, ResourceType, Scoped, Target};
use crate::config::WorkflowConfig;
use crate::errors::{AppError, AppResult};
use crate::events::audit::{self, AuditRecord};
use crate::events::{notify, publish_notifications, EventBus, Loggable};
use crate::models::notification::Notification;
use crate::models::ConstructionObject;

pub mod checklists;
pub mod daily;
pub mod issues;
pub mod objects;
pub mod offline;
pub mod visits;

pub use offline::IdempotentOutcome;

/// Result of a successful transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TransitionOutcome {
    pub resource: ResourceType,
    pub id: Uuid,
    pub event: Action,
    pub previous_state: String,
    pub new_state: String,
}

impl TransitionOutcome {
    fn new(resource: ResourceType, id: Uuid, event: Action, from: impl ToString, to: impl ToString) -> Self {
        Self {
            resource,
            id,
            event,
            previous_state: from.to_string(),
            new_state: to.to_string(),
        }
    }
}

/// Side effects written in the same transaction as a state change.
pub(crate) struct Effects<'a, T: Loggable> {
    pub audit: AuditRecord<'a>,
    pub kind: String,
    pub entity: &'a T,
}

impl<'a, T: Loggable> Effects<'a, T> {
    /// Audit action and notification kind for a change of `entity`.
    pub fn new(
        actor: &Actor,
        action: impl Into<String>,
        kind: impl Into<String>,
        entity: &'a T,
        before: Option<&Value>,
    ) -> Self {
        Self {
            audit: AuditRecord::new(Some(actor.user_id), action, entity, before),
            kind: kind.into(),
            entity,
        }
    }

    pub fn with_extra(mut self, extra: Value) -> Self {
        self.audit = self.audit.with_extra(extra);
        self
    }

    pub fn with_offline(mut self, offline: &'a crate::models::OfflineMeta) -> Self {
        self.audit = self.audit.with_offline(offline);
        self
    }
}

/// The lifecycle engine. Cheap to clone; configuration is immutable.
#[derive(Clone)]
pub struct Workflow {
    pool: SqlitePool,
    evaluator: Arc<dyn PolicyEvaluator>,
    config: Arc<WorkflowConfig>,
    bus: EventBus,
}

impl Workflow {
    pub fn new(
        pool: SqlitePool,
        evaluator: Arc<dyn PolicyEvaluator>,
        config: Arc<WorkflowConfig>,
        bus: EventBus,
    ) -> Self {
        Self {
            pool,
            evaluator,
            config,
            bus,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Pure decision, no side effects.
    pub async fn authorize(
        &self,
        actor: &Actor,
        resource: ResourceType,
        action: Action,
        target: Option<&dyn Target>,
    ) -> bool {
        self.evaluator.authorize(actor, resource, action, target).await
    }

    /// Filters a candidate collection down to what the actor may see.
    pub fn scope<T: Scoped>(&self, actor: &Actor, items: Vec<T>) -> Vec<T> {
        authz::scope(actor, items, &self.config.system_wide_roles)
    }

    /// Runs the named event against a resource instance.
    pub async fn transition(
        &self,
        actor: &Actor,
        resource: ResourceType,
        id: Uuid,
        event: &str,
        extra: Value,
    ) -> AppResult<TransitionOutcome> {
        let action: Action = event.parse()?;
        match (resource, action) {
            (ResourceType::ConstructionObject, Action::Plan) => self.plan_object(actor, id).await,
            (ResourceType::ConstructionObject, Action::RequestActivation) => {
                self.request_object_activation(actor, id).await
            }
            (ResourceType::ConstructionObject, Action::Activate) => self.activate_object(actor, id).await,
            (ResourceType::ConstructionObject, Action::Close) => self.close_object(actor, id).await,

            (ResourceType::OpeningChecklist, Action::Update) => {
                let data = extra
                    .get("data")
                    .cloned()
                    .ok_or_else(|| AppError::validation("update needs a `data` object"))?;
                self.update_opening_checklist(actor, id, data).await
            }
            (ResourceType::OpeningChecklist, Action::Submit) => self.submit_opening_checklist(actor, id).await,
            (ResourceType::OpeningChecklist, Action::Approve) => self.approve_opening_checklist(actor, id).await,
            (ResourceType::OpeningChecklist, Action::Reject) => {
                self.reject_opening_checklist(actor, id, comment_of(&extra)).await
            }

            (ResourceType::DailyChecklist, Action::Update | Action::PartialUpdate) => {
                let items = extra
                    .get("items")
                    .cloned()
                    .ok_or_else(|| AppError::validation("update needs an `items` map"))?;
                let items = serde_json::from_value(items)
                    .map_err(|err| AppError::validation(format!("invalid checklist items: {err}")))?;
                self.update_daily_checklist(actor, id, items).await
            }
            (ResourceType::DailyChecklist, Action::Submit) => self.submit_daily_checklist(actor, id).await,
            (ResourceType::DailyChecklist, Action::Confirm) => self.confirm_daily_checklist(actor, id).await,

            (ResourceType::Remark | ResourceType::Violation, Action::StartWork) => {
                self.start_issue_work(actor, resource, id).await
            }
            (ResourceType::Remark | ResourceType::Violation, Action::SubmitResolution) => {
                self.submit_issue_resolution(actor, resource, id).await
            }
            (ResourceType::Remark | ResourceType::Violation, Action::ConfirmClosure) => {
                self.confirm_issue_closure(actor, resource, id).await
            }
            (ResourceType::Remark | ResourceType::Violation, Action::Reject) => {
                self.reject_issue(actor, resource, id, comment_of(&extra)).await
            }

            (ResourceType::InspectionVisit, Action::End) => self.end_visit(actor, id).await,

            _ => Err(AppError::validation(format!("{action} is not an event of {resource}"))),
        }
    }

    /// Coarse check for instance-less actions.
    pub(crate) async fn guard_type(&self, actor: &Actor, resource: ResourceType, action: Action) -> AppResult<()> {
        if self.evaluator.authorize_type(actor, resource, action).await {
            Ok(())
        } else {
            Err(AppError::forbidden(action.as_str(), resource.model_name()))
        }
    }

    /// Visibility, then both authorization phases against `target`.
    pub(crate) async fn guard<T: Scoped + Target>(
        &self,
        actor: &Actor,
        resource: ResourceType,
        action: Action,
        target: &T,
    ) -> AppResult<()> {
        if !authz::is_visible(actor, target, &self.config.system_wide_roles) {
            return Err(AppError::not_found(format!("{resource} not found")));
        }
        if self.evaluator.authorize(actor, resource, action, Some(target)).await {
            Ok(())
        } else {
            Err(AppError::forbidden(action.as_str(), resource.model_name()))
        }
    }

    /// Presence requirement for configured (resource, action) pairs.
    pub(crate) async fn guard_presence(
        &self,
        actor: &Actor,
        resource: ResourceType,
        action: Action,
        object: &ConstructionObject,
    ) -> AppResult<()> {
        if !self.config.requires_presence(resource, action) {
            return Ok(());
        }
        if authz::check_presence_guard(&self.pool, actor, object.id, &object.polygon).await? {
            Ok(())
        } else {
            Err(AppError::forbidden(action.as_str(), resource.model_name()))
        }
    }

    /// Loads a parent object the actor can see, or NotFound.
    pub(crate) async fn visible_object(&self, actor: &Actor, object_id: Uuid) -> AppResult<ConstructionObject> {
        let object = objects::fetch_object(&self.pool, object_id).await?;
        if authz::is_visible(actor, &object, &self.config.system_wide_roles) {
            Ok(object)
        } else {
            Err(AppError::not_found("constructionobject not found"))
        }
    }

    /// Writes audit and notification rows, commits, then publishes.
    pub(crate) async fn commit<T: Loggable>(
        &self,
        mut tx: Transaction<'_, Sqlite>,
        actor: &Actor,
        effects: Effects<'_, T>,
    ) -> AppResult<Vec<Notification>> {
        audit::record(&mut *tx, effects.audit).await?;
        let recipients = notify::recipients(actor.user_id, effects.entity.stakeholder());
        let notifications = notify::enqueue(
            &mut *tx,
            &recipients,
            &effects.kind,
            &effects.entity.notification_payload(),
        )
        .await?;
        tx.commit().await?;

        publish_notifications(&self.bus, actor.user_id, &notifications);
        Ok(notifications)
    }
}

/// Explains a compare-and-set miss: the row vanished or moved to another state.
pub(crate) async fn stale_state(conn: &mut SqliteConnection, table: &'static str, id: Uuid, action: Action) -> AppError {
    let current = sqlx::query_scalar::<_, String>(&format!("SELECT status FROM {table} WHERE id = ?"))
        .bind(id)
        .fetch_optional(conn)
        .await;
    match current {
        Ok(Some(status)) => AppError::invalid_transition(status, action.as_str()),
        Ok(None) => AppError::not_found(format!("{table} row {id} not found")),
        Err(err) => AppError::Database(err),
    }
}

fn comment_of(extra: &Value) -> Option<String> {
    extra
        .get("comment")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|comment| !comment.is_empty())
        .map(str::to_owned)
}

/// Source-state check shared by every controller.
pub(crate) fn ensure_source<S: PartialEq + ToString>(current: S, allowed: &[S], action: Action) -> AppResult<()> {
    if allowed.contains(&current) {
        Ok(())
    } else {
        Err(AppError::invalid_transition(current.to_string(), action.as_str()))
    }
}
