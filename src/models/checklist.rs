use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::{ResourceType, Scoped, Target};
use crate::errors::AppError;
use crate::events::Loggable;

text_enum! {
    /// OpeningChecklist lifecycle; REJECTED may be resubmitted.
    ChecklistStatus {
        Draft => "DRAFT",
        Submitted => "SUBMITTED",
        Approved => "APPROVED",
        Rejected => "REJECTED",
    }
}

text_enum! {
    DailyStatus {
        Draft => "DRAFT",
        PendingConfirmation => "PENDING_CONFIRMATION",
        Approved => "APPROVED",
    }
}

text_enum! {
    /// Per-item state inside a daily checklist.
    ItemStatus {
        Unset => "unset",
        Ok => "ok",
        Issue => "issue",
        NotApplicable => "not_applicable",
    }
}

pub(crate) const OPENING_SELECT: &str = "SELECT c.id, c.object_id, o.org_id, c.filled_by, c.data, c.status, \
     c.submitted_at, c.reviewed_by, c.reviewed_at, c.review_comment, c.created_at, c.updated_at \
     FROM opening_checklists c JOIN construction_objects o ON o.id = c.object_id";

pub(crate) const DAILY_SELECT: &str = "SELECT d.id, d.object_id, o.org_id, d.created_by, d.data, d.status, \
     d.submitted_at, d.confirmed_by, d.confirmed_at, d.created_at, d.updated_at \
     FROM daily_checklists d JOIN construction_objects o ON o.id = d.object_id";

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OpeningChecklist {
    pub id: Uuid,
    pub object_id: Uuid,
    pub org_id: Uuid,
    pub filled_by: Option<Uuid>,
    #[schema(value_type = Object)]
    pub data: Value,
    pub status: ChecklistStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbOpeningChecklist {
    pub id: Uuid,
    pub object_id: Uuid,
    pub org_id: Uuid,
    pub filled_by: Option<Uuid>,
    pub data: String,
    pub status: String,
    pub submitted_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbOpeningChecklist> for OpeningChecklist {
    type Error = AppError;

    fn try_from(value: DbOpeningChecklist) -> Result<Self, Self::Error> {
        Ok(OpeningChecklist {
            id: value.id,
            object_id: value.object_id,
            org_id: value.org_id,
            filled_by: value.filled_by,
            data: serde_json::from_str(&value.data)?,
            status: value.status.parse()?,
            submitted_at: value.submitted_at,
            reviewed_by: value.reviewed_by,
            reviewed_at: value.reviewed_at,
            review_comment: value.review_comment,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

impl Scoped for OpeningChecklist {
    fn scope_key(&self) -> Uuid {
        self.id
    }

    fn object_ref(&self) -> Option<(Uuid, Uuid)> {
        Some((self.object_id, self.org_id))
    }
}

impl Target for OpeningChecklist {
    fn construction_object_id(&self) -> Option<Uuid> {
        Some(self.object_id)
    }

    fn owning_org_id(&self) -> Option<Uuid> {
        Some(self.org_id)
    }
}

impl Loggable for OpeningChecklist {
    fn resource_type(&self) -> ResourceType {
        ResourceType::OpeningChecklist
    }

    fn subject_id(&self) -> Uuid {
        self.id
    }

    fn repr(&self) -> String {
        format!("Opening checklist {}", self.object_id)
    }

    fn stakeholder(&self) -> Option<Uuid> {
        self.filled_by
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DailyChecklist {
    pub id: Uuid,
    pub object_id: Uuid,
    pub org_id: Uuid,
    pub created_by: Uuid,
    pub data: BTreeMap<String, ItemStatus>,
    pub status: DailyStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub confirmed_by: Option<Uuid>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbDailyChecklist {
    pub id: Uuid,
    pub object_id: Uuid,
    pub org_id: Uuid,
    pub created_by: Uuid,
    pub data: String,
    pub status: String,
    pub submitted_at: Option<DateTime<Utc>>,
    pub confirmed_by: Option<Uuid>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbDailyChecklist> for DailyChecklist {
    type Error = AppError;

    fn try_from(value: DbDailyChecklist) -> Result<Self, Self::Error> {
        Ok(DailyChecklist {
            id: value.id,
            object_id: value.object_id,
            org_id: value.org_id,
            created_by: value.created_by,
            data: serde_json::from_str(&value.data)?,
            status: value.status.parse()?,
            submitted_at: value.submitted_at,
            confirmed_by: value.confirmed_by,
            confirmed_at: value.confirmed_at,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

impl Scoped for DailyChecklist {
    fn scope_key(&self) -> Uuid {
        self.id
    }

    fn object_ref(&self) -> Option<(Uuid, Uuid)> {
        Some((self.object_id, self.org_id))
    }
}

impl Target for DailyChecklist {
    fn construction_object_id(&self) -> Option<Uuid> {
        Some(self.object_id)
    }

    fn owning_org_id(&self) -> Option<Uuid> {
        Some(self.org_id)
    }
}

impl Loggable for DailyChecklist {
    fn resource_type(&self) -> ResourceType {
        ResourceType::DailyChecklist
    }

    fn subject_id(&self) -> Uuid {
        self.id
    }

    fn repr(&self) -> String {
        format!("Daily checklist {}", self.created_at.format("%Y-%m-%d"))
    }

    fn stakeholder(&self) -> Option<Uuid> {
        Some(self.created_by)
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct OpeningChecklistUpdate {
    #[schema(value_type = Object)]
    pub data: Value,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateDailyChecklistRequest {
    pub object_id: Uuid,
    /// Item keys; every item starts as `unset`.
    #[schema(example = json!(["fencing", "site_lighting", "ppe"]))]
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct DailyChecklistUpdate {
    pub items: BTreeMap<String, ItemStatus>,
}
