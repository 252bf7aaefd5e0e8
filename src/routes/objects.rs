use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::AppResult;
use crate::jwt::AuthUser;
use crate::models::object::CreateObjectRequest;
use crate::models::ConstructionObject;

#[utoipa::path(
    get,
    path = "/objects",
    tag = "Objects",
    security(("bearerAuth" = [])),
    responses((status = 200, description = "Objects visible to the caller", body = [ConstructionObject]))
)]
pub async fn list_objects(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<Vec<ConstructionObject>>> {
    Ok(Json(state.workflow.list_objects(&auth.actor).await?))
}

#[utoipa::path(
    post,
    path = "/objects",
    tag = "Objects",
    security(("bearerAuth" = [])),
    request_body = CreateObjectRequest,
    responses(
        (status = 201, description = "Object created in DRAFT", body = ConstructionObject),
        (status = 403, description = "Caller may not create objects in this organization"),
        (status = 404, description = "Organization not found")
    )
)]
pub async fn create_object(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<CreateObjectRequest>,
) -> AppResult<(StatusCode, Json<ConstructionObject>)> {
    let object = state.workflow.create_object(&auth.actor, payload).await?;
    Ok((StatusCode::CREATED, Json(object)))
}

#[utoipa::path(
    get,
    path = "/objects/{id}",
    tag = "Objects",
    security(("bearerAuth" = [])),
    params(("id" = Uuid, Path, description = "Object id")),
    responses(
        (status = 200, description = "Object detail", body = ConstructionObject),
        (status = 404, description = "Object not found or not visible")
    )
)]
pub async fn get_object(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ConstructionObject>> {
    Ok(Json(state.workflow.get_object(&auth.actor, id).await?))
}
