use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::authz::ResourceType;

/// Trait for lifecycle entities that produce audit rows and notifications.
pub trait Loggable: Serialize + Send + Sync {
    fn resource_type(&self) -> ResourceType;

    /// Primary key of the audited row.
    fn subject_id(&self) -> Uuid;

    /// Short human-readable label used in notification payloads.
    fn repr(&self) -> String;

    /// User who should hear about changes besides the actor.
    fn stakeholder(&self) -> Option<Uuid> {
        None
    }

    /// Field snapshot the audit diff is computed from.
    fn snapshot(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// `{model, id, repr}` payload carried by notifications.
    fn notification_payload(&self) -> Value {
        json!({
            "model": self.resource_type().label(),
            "id": self.subject_id(),
            "repr": self.repr(),
        })
    }
}
