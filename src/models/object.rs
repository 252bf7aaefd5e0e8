use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::{ResourceType, Scoped, Target};
use crate::errors::AppError;
use crate::events::Loggable;

text_enum! {
    /// ConstructionObject lifecycle: DRAFT -> PLANNED -> ACTIVATION_PENDING -> ACTIVE -> CLOSED.
    ObjectStatus {
        Draft => "DRAFT",
        Planned => "PLANNED",
        ActivationPending => "ACTIVATION_PENDING",
        Active => "ACTIVE",
        Closed => "CLOSED",
    }
}

pub(crate) const OBJECT_COLUMNS: &str = "id, org_id, name, description, polygon, status, plan_start, plan_end, \
     activated_at, activated_by, created_by, created_at, updated_at";

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConstructionObject {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// GeoJSON Polygon geofence; `{}` when not drawn yet.
    #[schema(value_type = Object)]
    pub polygon: Value,
    pub status: ObjectStatus,
    pub plan_start: Option<NaiveDate>,
    pub plan_end: Option<NaiveDate>,
    pub activated_at: Option<DateTime<Utc>>,
    pub activated_by: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbConstructionObject {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub polygon: String,
    pub status: String,
    pub plan_start: Option<NaiveDate>,
    pub plan_end: Option<NaiveDate>,
    pub activated_at: Option<DateTime<Utc>>,
    pub activated_by: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbConstructionObject> for ConstructionObject {
    type Error = AppError;

    fn try_from(value: DbConstructionObject) -> Result<Self, Self::Error> {
        Ok(ConstructionObject {
            id: value.id,
            org_id: value.org_id,
            name: value.name,
            description: value.description,
            polygon: serde_json::from_str(&value.polygon)?,
            status: value.status.parse()?,
            plan_start: value.plan_start,
            plan_end: value.plan_end,
            activated_at: value.activated_at,
            activated_by: value.activated_by,
            created_by: value.created_by,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

impl Scoped for ConstructionObject {
    fn scope_key(&self) -> Uuid {
        self.id
    }

    fn org_ref(&self) -> Option<Uuid> {
        Some(self.org_id)
    }

    fn object_ref(&self) -> Option<(Uuid, Uuid)> {
        Some((self.id, self.org_id))
    }
}

impl Target for ConstructionObject {
    fn construction_object_id(&self) -> Option<Uuid> {
        Some(self.id)
    }

    fn owning_org_id(&self) -> Option<Uuid> {
        Some(self.org_id)
    }
}

impl Loggable for ConstructionObject {
    fn resource_type(&self) -> ResourceType {
        ResourceType::ConstructionObject
    }

    fn subject_id(&self) -> Uuid {
        self.id
    }

    fn repr(&self) -> String {
        self.name.clone()
    }

    fn stakeholder(&self) -> Option<Uuid> {
        self.created_by
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateObjectRequest {
    pub org_id: Uuid,
    #[schema(example = "Riverside Residential, block 3")]
    pub name: String,
    pub description: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub polygon: Option<Value>,
    pub plan_start: Option<NaiveDate>,
    pub plan_end: Option<NaiveDate>,
}
