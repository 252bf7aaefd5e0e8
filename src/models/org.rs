use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::{Role, Scoped};
use crate::errors::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, FromRow)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Scoped for Organization {
    fn scope_key(&self) -> Uuid {
        self.id
    }

    fn org_ref(&self) -> Option<Uuid> {
        Some(self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Membership {
    pub id: Uuid,
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbMembership {
    pub id: Uuid,
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbMembership> for Membership {
    type Error = AppError;

    fn try_from(value: DbMembership) -> Result<Self, Self::Error> {
        Ok(Membership {
            id: value.id,
            org_id: value.org_id,
            user_id: value.user_id,
            role: value.role.parse()?,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ObjectAssignment {
    pub id: Uuid,
    pub object_id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
    pub assigned_by: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbObjectAssignment {
    pub id: Uuid,
    pub object_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub assigned_by: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbObjectAssignment> for ObjectAssignment {
    type Error = AppError;

    fn try_from(value: DbObjectAssignment) -> Result<Self, Self::Error> {
        Ok(ObjectAssignment {
            id: value.id,
            object_id: value.object_id,
            user_id: value.user_id,
            role: value.role.parse()?,
            assigned_by: value.assigned_by,
            is_active: value.is_active,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateOrganizationRequest {
    #[schema(example = "Northside Builders")]
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct MembershipRequest {
    pub user_id: Uuid,
    #[schema(example = "FOREMAN")]
    pub role: Role,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AssignmentRequest {
    pub user_id: Uuid,
    #[schema(example = "INSPECTOR")]
    pub role: Role,
}
