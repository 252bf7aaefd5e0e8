#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use uuid::Uuid;

use site_control::authz::{load_actor, reconcile_roles, Actor, MatrixPolicyEvaluator, PermissionMatrix, Role};
use site_control::config::WorkflowConfig;
use site_control::events::init_event_bus;
use site_control::identity;
use site_control::models::object::CreateObjectRequest;
use site_control::models::org::{CreateOrganizationRequest, MembershipRequest};
use site_control::models::user::CreateUserRequest;
use site_control::Workflow;

pub const PASSWORD: &str = "password123";

/// Temp database with migrations applied and role groups provisioned.
pub struct TestEnv {
    // Keeps the database directory alive for the test's duration.
    _dir: TempDir,
    pub pool: SqlitePool,
    pub workflow: Workflow,
    pub matrix: PermissionMatrix,
}

pub async fn setup() -> Result<TestEnv> {
    setup_with(WorkflowConfig::default(), PermissionMatrix::default()).await
}

pub async fn setup_with(config: WorkflowConfig, matrix: PermissionMatrix) -> Result<TestEnv> {
    let dir = tempdir().context("failed to create tempdir")?;
    let pool = test_pool(&dir).await?;

    reconcile_roles(&pool, &matrix).await?;

    let (bus, _rx) = init_event_bus();
    let workflow = Workflow::new(
        pool.clone(),
        Arc::new(MatrixPolicyEvaluator::new(Arc::new(matrix.clone()))),
        Arc::new(config),
        bus,
    );

    Ok(TestEnv {
        _dir: dir,
        pool,
        workflow,
        matrix,
    })
}

pub async fn test_pool(dir: &TempDir) -> Result<SqlitePool> {
    let db_path = dir.path().join("test.db");
    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator =
        sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;
    Ok(pool)
}

impl TestEnv {
    pub async fn org(&self, name: &str) -> Result<Uuid> {
        let org = identity::create_org(
            &self.pool,
            CreateOrganizationRequest {
                name: name.to_string(),
                description: None,
            },
        )
        .await?;
        Ok(org.id)
    }

    pub async fn user(&self, username: &str) -> Result<Uuid> {
        let user = identity::create_user(
            &self.pool,
            CreateUserRequest {
                username: username.to_string(),
                email: format!("{username}@example.com"),
                password: PASSWORD.to_string(),
                is_superuser: false,
                is_staff: false,
            },
        )
        .await?;
        Ok(user.id)
    }

    pub async fn superuser(&self, username: &str) -> Result<Actor> {
        let user = identity::create_user(
            &self.pool,
            CreateUserRequest {
                username: username.to_string(),
                email: format!("{username}@example.com"),
                password: PASSWORD.to_string(),
                is_superuser: true,
                is_staff: true,
            },
        )
        .await?;
        self.actor(user.id).await
    }

    /// Org member holding `role`, with that role's model permissions granted directly.
    pub async fn member(&self, org_id: Uuid, username: &str, role: Role) -> Result<Actor> {
        let user_id = self.user(username).await?;
        identity::add_membership(&self.pool, org_id, MembershipRequest { user_id, role }).await?;
        self.grant_role_permissions(user_id, role).await?;
        self.actor(user_id).await
    }

    /// User carrying `role` as a group tag; permissions come through the group.
    pub async fn tagged(&self, username: &str, role: Role) -> Result<Actor> {
        let user_id = self.user(username).await?;
        identity::add_group_role(&self.pool, user_id, role).await?;
        self.actor(user_id).await
    }

    pub async fn grant_role_permissions(&self, user_id: Uuid, role: Role) -> Result<()> {
        let codenames = self
            .matrix
            .group_permissions()
            .find(|(held, _)| *held == role)
            .map(|(_, perms)| perms.iter().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        for codename in codenames {
            identity::grant_permission(&self.pool, user_id, &codename).await?;
        }
        Ok(())
    }

    pub async fn actor(&self, user_id: Uuid) -> Result<Actor> {
        Ok(load_actor(&self.pool, user_id).await?)
    }

    pub async fn draft_object(&self, creator: &Actor, org_id: Uuid, name: &str) -> Result<Uuid> {
        let object = self
            .workflow
            .create_object(
                creator,
                CreateObjectRequest {
                    org_id,
                    name: name.to_string(),
                    description: None,
                    polygon: Some(site_polygon()),
                    plan_start: None,
                    plan_end: None,
                },
            )
            .await?;
        Ok(object.id)
    }

    /// Drives a fresh object to ACTIVE: the client plans and requests, the inspector activates.
    pub async fn active_object(&self, client: &Actor, inspector: &Actor, org_id: Uuid, name: &str) -> Result<Uuid> {
        let id = self.draft_object(client, org_id, name).await?;
        self.workflow.plan_object(client, id).await?;
        self.workflow.request_object_activation(client, id).await?;
        self.workflow.activate_object(inspector, id).await?;
        Ok(id)
    }

    pub async fn audit_actions(&self, object_id: Uuid) -> Result<Vec<String>> {
        let actions = sqlx::query_scalar("SELECT action FROM audit_log WHERE object_id = ? ORDER BY rowid")
            .bind(object_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        Ok(actions)
    }

    pub async fn audit_count(&self, action: &str) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM audit_log WHERE action = ?")
            .bind(action)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn audit_context(&self, object_id: Uuid, action: &str) -> Result<Value> {
        let raw: String = sqlx::query_scalar("SELECT context FROM audit_log WHERE object_id = ? AND action = ?")
            .bind(object_id.to_string())
            .bind(action)
            .fetch_one(&self.pool)
            .await?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// (audit rows, notification rows) across all resources.
    pub async fn side_effect_totals(&self) -> Result<(i64, i64)> {
        let audits = sqlx::query_scalar("SELECT COUNT(*) FROM audit_log")
            .fetch_one(&self.pool)
            .await?;
        let notifications = sqlx::query_scalar("SELECT COUNT(*) FROM notifications")
            .fetch_one(&self.pool)
            .await?;
        Ok((audits, notifications))
    }

    pub async fn notification_count(&self, kind: &str) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE kind = ?")
            .bind(kind)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// Square geofence around (lat 55.75, lon 37.61).
pub fn site_polygon() -> Value {
    json!({
        "type": "Polygon",
        "coordinates": [[
            [37.60, 55.74],
            [37.62, 55.74],
            [37.62, 55.76],
            [37.60, 55.76],
            [37.60, 55.74]
        ]]
    })
}

pub const ON_SITE: (f64, f64) = (55.75, 37.61);
pub const OFF_SITE: (f64, f64) = (48.85, 2.35);
