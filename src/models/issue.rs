use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use super::offline::OfflineMeta;
use crate::authz::{ResourceType, Scoped, Target};
use crate::errors::AppError;
use crate::events::Loggable;

text_enum! {
    IssueKind {
        Remark => "REMARK",
        Violation => "VIOLATION",
    }
}

impl IssueKind {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            IssueKind::Remark => ResourceType::Remark,
            IssueKind::Violation => ResourceType::Violation,
        }
    }

    pub fn from_resource(resource: ResourceType) -> Option<Self> {
        match resource {
            ResourceType::Remark => Some(IssueKind::Remark),
            ResourceType::Violation => Some(IssueKind::Violation),
            _ => None,
        }
    }

    /// Prefix of audit actions and notification kinds (`remark`, `violation`).
    pub fn slug(&self) -> &'static str {
        self.resource_type().model_name()
    }
}

text_enum! {
    /// Issue lifecycle. REJECTED is only reachable when issue rejection is enabled.
    IssueStatus {
        Open => "OPEN",
        InProgress => "IN_PROGRESS",
        PendingConfirmation => "PENDING_CONFIRMATION",
        Accepted => "ACCEPTED",
        Rejected => "REJECTED",
    }
}

text_enum! {
    Severity {
        Low => "LOW",
        Medium => "MEDIUM",
        High => "HIGH",
        Critical => "CRITICAL",
    }
}

text_enum! {
    Fixability {
        Fixable => "FIXABLE",
        NonFixable => "NON_FIXABLE",
    }
}

pub(crate) const ISSUE_SELECT: &str = "SELECT i.id, i.kind, i.object_id, o.org_id, i.category, i.description, \
     i.severity, i.fixability, i.status, i.created_by, i.sla_due, i.latitude, i.longitude, \
     i.client_created_at, i.client_lat, i.client_lon, i.offline_batch_id, i.was_offline, \
     i.resolved_by, i.resolved_at, i.closed_by, i.closed_at, i.created_at, i.updated_at \
     FROM issues i JOIN construction_objects o ON o.id = i.object_id";

/// Remark or violation; both share one table and one lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Issue {
    pub id: Uuid,
    pub kind: IssueKind,
    pub object_id: Uuid,
    pub org_id: Uuid,
    pub category: String,
    pub description: String,
    pub severity: Severity,
    pub fixability: Option<Fixability>,
    pub status: IssueStatus,
    pub created_by: Uuid,
    pub sla_due: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(flatten)]
    pub offline: OfflineMeta,
    /// Set on entering PENDING_CONFIRMATION.
    pub resolved_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Set on entering ACCEPTED or REJECTED.
    pub closed_by: Option<Uuid>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbIssue {
    pub id: Uuid,
    pub kind: String,
    pub object_id: Uuid,
    pub org_id: Uuid,
    pub category: String,
    pub description: String,
    pub severity: String,
    pub fixability: Option<String>,
    pub status: String,
    pub created_by: Uuid,
    pub sla_due: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[sqlx(flatten)]
    pub offline: OfflineMeta,
    pub resolved_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub closed_by: Option<Uuid>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbIssue> for Issue {
    type Error = AppError;

    fn try_from(value: DbIssue) -> Result<Self, Self::Error> {
        Ok(Issue {
            id: value.id,
            kind: value.kind.parse()?,
            object_id: value.object_id,
            org_id: value.org_id,
            category: value.category,
            description: value.description,
            severity: value.severity.parse()?,
            fixability: value.fixability.as_deref().map(str::parse::<Fixability>).transpose()?,
            status: value.status.parse()?,
            created_by: value.created_by,
            sla_due: value.sla_due,
            latitude: value.latitude,
            longitude: value.longitude,
            offline: value.offline,
            resolved_by: value.resolved_by,
            resolved_at: value.resolved_at,
            closed_by: value.closed_by,
            closed_at: value.closed_at,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

impl Scoped for Issue {
    fn scope_key(&self) -> Uuid {
        self.id
    }

    fn object_ref(&self) -> Option<(Uuid, Uuid)> {
        Some((self.object_id, self.org_id))
    }
}

impl Target for Issue {
    fn construction_object_id(&self) -> Option<Uuid> {
        Some(self.object_id)
    }

    fn owning_org_id(&self) -> Option<Uuid> {
        Some(self.org_id)
    }
}

impl Loggable for Issue {
    fn resource_type(&self) -> ResourceType {
        self.kind.resource_type()
    }

    fn subject_id(&self) -> Uuid {
        self.id
    }

    fn repr(&self) -> String {
        format!("{}: {}", self.category, self.description.chars().take(60).collect::<String>())
    }

    fn stakeholder(&self) -> Option<Uuid> {
        Some(self.created_by)
    }
}

/// Fields of a new remark or violation.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewIssue {
    pub object_id: Uuid,
    #[schema(example = "fire_safety")]
    pub category: String,
    #[schema(example = "Extinguisher missing on floor 2")]
    pub description: String,
    pub severity: Option<Severity>,
    /// Remarks only.
    pub fixability: Option<Fixability>,
    pub sla_due: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(flatten)]
    pub offline: OfflineMeta,
}
