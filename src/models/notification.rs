use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    #[schema(example = "object.activated")]
    pub kind: String,
    /// `{model, id, repr}`
    #[schema(value_type = Object)]
    pub payload: Value,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbNotification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub payload: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbNotification> for Notification {
    type Error = AppError;

    fn try_from(value: DbNotification) -> Result<Self, Self::Error> {
        Ok(Notification {
            id: value.id,
            user_id: value.user_id,
            kind: value.kind,
            payload: serde_json::from_str(&value.payload)?,
            is_read: value.is_read,
            created_at: value.created_at,
        })
    }
}
