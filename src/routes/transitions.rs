use axum::Json;
use serde_json::Value;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::ResourceType;
use crate::errors::AppResult;
use crate::jwt::AuthUser;
use crate::lifecycle::TransitionOutcome;

/// Runs a named lifecycle event. The optional body carries event extras
/// such as `{"comment": "..."}` for rejections.
#[utoipa::path(
    post,
    path = "/{resource}/{id}/actions/{event}",
    tag = "Transitions",
    security(("bearerAuth" = [])),
    params(
        ("resource" = String, Path, description = "Collection: objects, opening-checklists, daily-checklists, remarks, violations, visits"),
        ("id" = Uuid, Path, description = "Resource id"),
        ("event" = String, Path, description = "Event name, e.g. activate, submit, reject")
    ),
    responses(
        (status = 200, description = "Transition applied", body = TransitionOutcome),
        (status = 403, description = "Caller may not run this event"),
        (status = 404, description = "Resource not found or not visible"),
        (status = 409, description = "Event not allowed from the current state"),
        (status = 422, description = "Unknown event or invalid extras")
    )
)]
pub async fn run_transition(
    state: AppState,
    auth: AuthUser,
    resource: ResourceType,
    id: Uuid,
    event: String,
    extra: Option<Value>,
) -> AppResult<Json<TransitionOutcome>> {
    let outcome = state
        .workflow
        .transition(&auth.actor, resource, id, &event, extra.unwrap_or(Value::Null))
        .await?;
    Ok(Json(outcome))
}
