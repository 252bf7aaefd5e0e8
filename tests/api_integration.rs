mod common;

use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt; // for `oneshot`

use site_control::authz::{PermissionMatrix, Role};
use site_control::config::WorkflowConfig;
use site_control::events::init_event_bus;
use site_control::jwt::JwtConfig;
use site_control::{router, AppState};

use common::{setup, TestEnv, PASSWORD};

fn app(env: &TestEnv) -> Router {
    let (bus, _rx) = init_event_bus();
    router(AppState::new(
        env.pool.clone(),
        JwtConfig::new("test-secret", 1),
        PermissionMatrix::default(),
        WorkflowConfig::default(),
        bus,
    ))
}

async fn send(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))?,
        None => builder.body(Body::empty())?,
    };

    let resp: Response = app.clone().oneshot(req).await?;
    let status = resp.status();
    let body_bytes = body::to_bytes(resp.into_body(), usize::MAX).await?;
    let value = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes)?
    };
    Ok((status, value))
}

async fn login(app: &Router, username: &str) -> Result<String> {
    let (status, body) = send(
        app,
        "POST",
        "/auth/login",
        None,
        Some(json!({"username": username, "password": PASSWORD})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "login failed: {}", body);
    Ok(body
        .get("token")
        .and_then(|v| v.as_str())
        .context("missing token")?
        .to_string())
}

#[tokio::test]
async fn health_endpoint_reports_db_ok() -> Result<()> {
    let env = setup().await?;
    let app = app(&env);

    let (status, body) = send(&app, "GET", "/api/health", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["db_ok"], true);
    Ok(())
}

#[tokio::test]
async fn login_and_profile() -> Result<()> {
    let env = setup().await?;
    let org = env.org("Northwind").await?;
    env.member(org, "client", Role::Client).await?;
    let app = app(&env);

    let (status, body) = send(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({"username": "client", "password": "wrong"})),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let token = login(&app, "client").await?;
    let (status, profile) = send(&app, "GET", "/auth/me", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["user"]["username"], "client");
    assert_eq!(profile["memberships"][0]["role"], "CLIENT");
    assert!(profile["permissions"]
        .as_array()
        .context("permissions list")?
        .iter()
        .any(|p| p == "add_constructionobject"));

    let (status, _) = send(&app, "GET", "/auth/me", Some("not-a-token"), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&app, "GET", "/objects", None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn object_lifecycle_over_http() -> Result<()> {
    let env = setup().await?;
    let org = env.org("Northwind").await?;
    let other_org = env.org("Southwind").await?;
    env.member(org, "client", Role::Client).await?;
    env.member(other_org, "outsider", Role::Foreman).await?;
    env.tagged("inspector", Role::Inspector).await?;
    let app = app(&env);

    let client = login(&app, "client").await?;
    let inspector = login(&app, "inspector").await?;
    let outsider = login(&app, "outsider").await?;

    let (status, object) = send(
        &app,
        "POST",
        "/objects",
        Some(&client),
        Some(json!({"org_id": org, "name": "Block A"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "create failed: {}", object);
    assert_eq!(object["status"], "DRAFT");
    let id = object["id"].as_str().context("missing object id")?.to_string();

    let (status, outcome) = send(&app, "POST", &format!("/objects/{id}/actions/plan"), Some(&client), None).await?;
    assert_eq!(status, StatusCode::OK, "plan failed: {}", outcome);
    assert_eq!(outcome["previous_state"], "DRAFT");
    assert_eq!(outcome["new_state"], "PLANNED");
    assert_eq!(outcome["event"], "plan");

    let (status, _) = send(
        &app,
        "POST",
        &format!("/objects/{id}/actions/request-activation"),
        Some(&client),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "POST", &format!("/objects/{id}/actions/activate"), Some(&client), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, _) = send(&app, "POST", &format!("/objects/{id}/actions/activate"), Some(&inspector), None).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "POST", &format!("/objects/{id}/actions/activate"), Some(&inspector), None).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_state_transition");

    let (status, body) = send(&app, "POST", &format!("/objects/{id}/actions/teleport"), Some(&inspector), None).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_error");

    // Out-of-scope objects are reported as missing.
    let (status, _) = send(&app, "GET", &format!("/objects/{id}"), Some(&outsider), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, listed) = send(&app, "GET", "/objects", Some(&outsider), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed, json!([]));

    let (status, checklists) = send(&app, "GET", "/opening-checklists", Some(&client), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(checklists[0]["object_id"], id.as_str());
    assert_eq!(checklists[0]["status"], "DRAFT");
    Ok(())
}

#[tokio::test]
async fn offline_remark_replay_answers_200() -> Result<()> {
    let env = setup().await?;
    let org = env.org("Northwind").await?;
    let client_actor = env.member(org, "client", Role::Client).await?;
    let inspector_actor = env.tagged("inspector", Role::Inspector).await?;
    let object = env.active_object(&client_actor, &inspector_actor, org, "Block B").await?;
    let app = app(&env);
    let client = login(&app, "client").await?;

    let payload = json!({
        "object_id": object,
        "category": "fire_safety",
        "description": "Extinguisher missing",
        "offline_batch_id": "batch-42",
        "client_created_at": "2025-05-01T08:30:00Z"
    });

    let (status, first) = send(&app, "POST", "/remarks", Some(&client), Some(payload.clone())).await?;
    assert_eq!(status, StatusCode::CREATED, "create failed: {}", first);
    assert_eq!(first["was_offline"], true);

    let (status, second) = send(&app, "POST", "/remarks", Some(&client), Some(payload)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["id"], first["id"]);

    let (status, listed) = send(&app, "GET", "/remarks", Some(&client), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
    Ok(())
}

#[tokio::test]
async fn admin_endpoints_require_staff() -> Result<()> {
    let env = setup().await?;
    let org = env.org("Northwind").await?;
    let client_actor = env.member(org, "client", Role::Client).await?;
    env.superuser("root").await?;
    let object = env.draft_object(&client_actor, org, "Block H").await?;
    let app = app(&env);
    let client = login(&app, "client").await?;
    let root = login(&app, "root").await?;

    let new_org = json!({"name": "Eastwind"});
    let (status, _) = send(&app, "POST", "/admin/orgs", Some(&client), Some(new_org.clone())).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, created) = send(&app, "POST", "/admin/orgs", Some(&root), Some(new_org)).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["name"], "Eastwind");

    // Members only see their own organizations.
    let (status, orgs) = send(&app, "GET", "/admin/orgs", Some(&client), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(orgs.as_array().map(Vec::len), Some(1));

    let (status, report) = send(&app, "GET", "/admin/audit/verify", Some(&root), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["broken_at"], Value::Null);

    let history_uri = format!("/admin/audit/history/{object}");
    let (status, _) = send(&app, "GET", &history_uri, Some(&client), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, history) = send(&app, "GET", &history_uri, Some(&root), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history.as_array().map(Vec::len), Some(1));
    assert_eq!(history[0]["action"], "create_object");
    assert_eq!(history[0]["context"]["diff"]["status"]["to"], "DRAFT");
    Ok(())
}
