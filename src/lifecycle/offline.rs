use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use super::Workflow;
use crate::authz::{Actor, ResourceType};
use crate::errors::{AppError, AppResult};
use crate::models::inspection::NewVisit;
use crate::models::issue::NewIssue;
use crate::models::IssueKind;

/// Result of an offline-capable create: the stored record and whether this call created it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IdempotentOutcome {
    pub resource: ResourceType,
    pub id: Uuid,
    pub was_created: bool,
    #[schema(value_type = Object)]
    pub record: Value,
}

impl IdempotentOutcome {
    fn new<T: Serialize>(resource: ResourceType, id: Uuid, was_created: bool, record: &T) -> AppResult<Self> {
        Ok(Self {
            resource,
            id,
            was_created,
            record: serde_json::to_value(record)?,
        })
    }
}

fn decode<T: serde::de::DeserializeOwned>(resource: ResourceType, fields: Value) -> AppResult<T> {
    serde_json::from_value(fields).map_err(|err| AppError::validation(format!("invalid {resource} payload: {err}")))
}

impl Workflow {
    /// Creates a record, or returns the one already stored under the same
    /// `offline_batch_id` for this actor. A missing or blank batch id always creates.
    pub async fn create_or_get_idempotent(
        &self,
        actor: &Actor,
        resource: ResourceType,
        fields: Value,
    ) -> AppResult<IdempotentOutcome> {
        match resource {
            ResourceType::Remark | ResourceType::Violation => {
                let kind = IssueKind::from_resource(resource)
                    .ok_or_else(|| AppError::internal("issue resource without an issue kind"))?;
                let new: NewIssue = decode(resource, fields)?;
                let (issue, created) = self.create_issue(actor, kind, new).await?;
                IdempotentOutcome::new(resource, issue.id, created, &issue)
            }
            ResourceType::InspectionVisit => {
                let new: NewVisit = decode(resource, fields)?;
                let (visit, created) = self.start_visit(actor, new).await?;
                IdempotentOutcome::new(resource, visit.id, created, &visit)
            }
            other => Err(AppError::validation(format!("{other} does not support offline creation"))),
        }
    }
}
