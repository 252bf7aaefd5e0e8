use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use super::offline::OfflineMeta;
use crate::authz::{ResourceType, Scoped, Target};
use crate::events::Loggable;

pub(crate) const VISIT_SELECT: &str = "SELECT v.id, v.object_id, o.org_id, v.inspector_id, v.started_at, v.ended_at, \
     v.latitude, v.longitude, v.gps_accuracy_m, v.note, \
     v.client_created_at, v.client_lat, v.client_lon, v.offline_batch_id, v.was_offline, \
     v.created_at, v.updated_at \
     FROM inspection_visits v JOIN construction_objects o ON o.id = v.object_id";

/// An inspector's stay on site; open while `ended_at` is unset.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, FromRow)]
pub struct InspectionVisit {
    pub id: Uuid,
    pub object_id: Uuid,
    pub org_id: Uuid,
    pub inspector_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub gps_accuracy_m: Option<f64>,
    pub note: Option<String>,
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub offline: OfflineMeta,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InspectionVisit {
    pub fn state(&self) -> &'static str {
        if self.ended_at.is_some() {
            "ENDED"
        } else {
            "OPEN"
        }
    }
}

impl Scoped for InspectionVisit {
    fn scope_key(&self) -> Uuid {
        self.id
    }

    fn object_ref(&self) -> Option<(Uuid, Uuid)> {
        Some((self.object_id, self.org_id))
    }
}

impl Target for InspectionVisit {
    fn construction_object_id(&self) -> Option<Uuid> {
        Some(self.object_id)
    }

    fn owning_org_id(&self) -> Option<Uuid> {
        Some(self.org_id)
    }
}

impl Loggable for InspectionVisit {
    fn resource_type(&self) -> ResourceType {
        ResourceType::InspectionVisit
    }

    fn subject_id(&self) -> Uuid {
        self.id
    }

    fn repr(&self) -> String {
        format!("Visit {}", self.started_at.format("%Y-%m-%d %H:%M"))
    }

    fn stakeholder(&self) -> Option<Uuid> {
        Some(self.inspector_id)
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewVisit {
    pub object_id: Uuid,
    #[schema(example = 55.7512)]
    pub latitude: Option<f64>,
    #[schema(example = 37.6184)]
    pub longitude: Option<f64>,
    pub gps_accuracy_m: Option<f64>,
    pub note: Option<String>,
    #[serde(flatten)]
    pub offline: OfflineMeta,
}
