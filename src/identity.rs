//! Identity and membership administration: users, organizations,
//! memberships, object assignments, group role tags and direct grants.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::authz::Role;
use crate::errors::{AppError, AppResult};
use crate::models::org::{
    AssignmentRequest, CreateOrganizationRequest, DbMembership, DbObjectAssignment, Membership, MembershipRequest,
    ObjectAssignment, Organization,
};
use crate::models::user::{CreateUserRequest, DbUser, User, UserFlagsUpdate, UserProfile};
use crate::utils::{hash_password, required_text, utc_now};

const USER_COLUMNS: &str =
    "id, username, email, password_hash, is_superuser, is_staff, is_active, created_at, updated_at";

const ASSIGNMENT_COLUMNS: &str = "id, object_id, user_id, role, assigned_by, is_active, created_at, updated_at";

pub async fn create_user(pool: &SqlitePool, request: CreateUserRequest) -> AppResult<User> {
    let username = required_text("username", &request.username)?;
    let email = required_text("email", &request.email)?;
    if !email.contains('@') {
        return Err(AppError::validation("email must contain '@'"));
    }
    let password_hash = hash_password(&request.password)?;

    let id = Uuid::new_v4();
    let now = utc_now();
    sqlx::query(
        r#"
        INSERT INTO users (id, username, email, password_hash, is_superuser, is_staff, is_active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)
        "#,
    )
    .bind(id)
    .bind(&username)
    .bind(&email)
    .bind(password_hash)
    .bind(request.is_superuser)
    .bind(request.is_staff)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|err| AppError::from_insert(err, "username"))?;

    tracing::info!(user_id = %id, username = %username, "user created");
    fetch_user(pool, id).await
}

pub async fn find_user_by_username(pool: &SqlitePool, username: &str) -> AppResult<Option<DbUser>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?");
    Ok(sqlx::query_as::<_, DbUser>(&sql)
        .bind(username.trim())
        .fetch_optional(pool)
        .await?)
}

pub async fn fetch_user(pool: &SqlitePool, id: Uuid) -> AppResult<User> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
    sqlx::query_as::<_, DbUser>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?
        .try_into()
}

pub async fn set_flags(pool: &SqlitePool, id: Uuid, flags: UserFlagsUpdate) -> AppResult<User> {
    let updated = sqlx::query(
        r#"
        UPDATE users
        SET is_superuser = COALESCE(?, is_superuser),
            is_staff = COALESCE(?, is_staff),
            is_active = COALESCE(?, is_active),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(flags.is_superuser)
    .bind(flags.is_staff)
    .bind(flags.is_active)
    .bind(utc_now())
    .bind(id)
    .execute(pool)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(AppError::not_found("user not found"));
    }

    tracing::info!(user_id = %id, ?flags, "user flags updated");
    fetch_user(pool, id).await
}

pub async fn create_org(pool: &SqlitePool, request: CreateOrganizationRequest) -> AppResult<Organization> {
    let name = required_text("name", &request.name)?;
    let id = Uuid::new_v4();
    let now = utc_now();
    sqlx::query("INSERT INTO organizations (id, name, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?)")
        .bind(id)
        .bind(&name)
        .bind(&request.description)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(|err| AppError::from_insert(err, "organization"))?;

    tracing::info!(org_id = %id, name = %name, "organization created");
    fetch_org(pool, id).await
}

pub async fn fetch_org(pool: &SqlitePool, id: Uuid) -> AppResult<Organization> {
    sqlx::query_as::<_, Organization>(
        "SELECT id, name, description, created_at, updated_at FROM organizations WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("organization not found"))
}

pub async fn list_orgs(pool: &SqlitePool) -> AppResult<Vec<Organization>> {
    Ok(sqlx::query_as::<_, Organization>(
        "SELECT id, name, description, created_at, updated_at FROM organizations ORDER BY name",
    )
    .fetch_all(pool)
    .await?)
}

fn ensure_org_role(role: Role) -> AppResult<()> {
    if role.is_org_scoped() {
        Ok(())
    } else {
        Err(AppError::validation(format!("{role} is a group role and cannot be held through a membership")))
    }
}

pub async fn add_membership(pool: &SqlitePool, org_id: Uuid, request: MembershipRequest) -> AppResult<Membership> {
    ensure_org_role(request.role)?;
    fetch_org(pool, org_id).await?;
    fetch_user(pool, request.user_id).await?;

    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO memberships (id, org_id, user_id, role, created_at) VALUES (?, ?, ?, ?, ?)")
        .bind(id)
        .bind(org_id)
        .bind(request.user_id)
        .bind(request.role.as_str())
        .bind(utc_now())
        .execute(pool)
        .await
        .map_err(|err| AppError::from_insert(err, "membership"))?;

    tracing::info!(org_id = %org_id, user_id = %request.user_id, role = %request.role, "membership added");
    sqlx::query_as::<_, DbMembership>("SELECT id, org_id, user_id, role, created_at FROM memberships WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?
        .try_into()
}

pub async fn remove_membership(pool: &SqlitePool, org_id: Uuid, user_id: Uuid, role: Role) -> AppResult<()> {
    let removed = sqlx::query("DELETE FROM memberships WHERE org_id = ? AND user_id = ? AND role = ?")
        .bind(org_id)
        .bind(user_id)
        .bind(role.as_str())
        .execute(pool)
        .await?;
    if removed.rows_affected() == 0 {
        return Err(AppError::not_found("membership not found"));
    }
    tracing::info!(org_id = %org_id, user_id = %user_id, role = %role, "membership removed");
    Ok(())
}

pub async fn list_memberships(pool: &SqlitePool, user_id: Uuid) -> AppResult<Vec<Membership>> {
    let rows = sqlx::query_as::<_, DbMembership>(
        "SELECT id, org_id, user_id, role, created_at FROM memberships WHERE user_id = ? ORDER BY created_at",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(Membership::try_from).collect()
}

/// Assigns a user to an object; re-assigning a deactivated triple reactivates it.
pub async fn assign_to_object(
    pool: &SqlitePool,
    object_id: Uuid,
    request: AssignmentRequest,
    assigned_by: Uuid,
) -> AppResult<ObjectAssignment> {
    ensure_org_role(request.role)?;
    fetch_user(pool, request.user_id).await?;
    let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM construction_objects WHERE id = ?")
        .bind(object_id)
        .fetch_optional(pool)
        .await?;
    if exists.is_none() {
        return Err(AppError::not_found("constructionobject not found"));
    }

    let now = utc_now();
    sqlx::query(
        r#"
        INSERT INTO object_assignments (id, object_id, user_id, role, assigned_by, is_active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, 1, ?, ?)
        ON CONFLICT (object_id, user_id, role)
        DO UPDATE SET is_active = 1, assigned_by = excluded.assigned_by, updated_at = excluded.updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(object_id)
    .bind(request.user_id)
    .bind(request.role.as_str())
    .bind(assigned_by)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    tracing::info!(object_id = %object_id, user_id = %request.user_id, role = %request.role, "object assignment active");
    let sql = format!("SELECT {ASSIGNMENT_COLUMNS} FROM object_assignments WHERE object_id = ? AND user_id = ? AND role = ?");
    sqlx::query_as::<_, DbObjectAssignment>(&sql)
        .bind(object_id)
        .bind(request.user_id)
        .bind(request.role.as_str())
        .fetch_one(pool)
        .await?
        .try_into()
}

pub async fn deactivate_assignment(pool: &SqlitePool, object_id: Uuid, user_id: Uuid, role: Role) -> AppResult<()> {
    let updated = sqlx::query(
        "UPDATE object_assignments SET is_active = 0, updated_at = ? \
         WHERE object_id = ? AND user_id = ? AND role = ? AND is_active = 1",
    )
    .bind(utc_now())
    .bind(object_id)
    .bind(user_id)
    .bind(role.as_str())
    .execute(pool)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(AppError::not_found("active assignment not found"));
    }
    tracing::info!(object_id = %object_id, user_id = %user_id, role = %role, "object assignment deactivated");
    Ok(())
}

/// Adds a coarse group role tag. Returns `false` when the user already had it.
pub async fn add_group_role(pool: &SqlitePool, user_id: Uuid, role: Role) -> AppResult<bool> {
    fetch_user(pool, user_id).await?;
    let added = sqlx::query("INSERT OR IGNORE INTO user_groups (user_id, role) VALUES (?, ?)")
        .bind(user_id)
        .bind(role.as_str())
        .execute(pool)
        .await?
        .rows_affected()
        > 0;
    tracing::info!(user_id = %user_id, role = %role, added, "group role tag");
    Ok(added)
}

/// Grants a model permission codename such as `change_remark` directly to a user.
pub async fn grant_permission(pool: &SqlitePool, user_id: Uuid, codename: &str) -> AppResult<bool> {
    let codename = required_text("codename", codename)?;
    fetch_user(pool, user_id).await?;
    let granted = sqlx::query("INSERT OR IGNORE INTO user_permissions (user_id, codename) VALUES (?, ?)")
        .bind(user_id)
        .bind(&codename)
        .execute(pool)
        .await?
        .rows_affected()
        > 0;
    tracing::info!(user_id = %user_id, codename = %codename, granted, "direct permission");
    Ok(granted)
}

pub async fn profile(pool: &SqlitePool, user_id: Uuid) -> AppResult<UserProfile> {
    let user = fetch_user(pool, user_id).await?;
    let memberships = list_memberships(pool, user_id).await?;
    let actor = crate::authz::load_actor(pool, user_id).await?;

    let mut groups: Vec<Role> = actor.group_roles.into_iter().collect();
    groups.sort();
    let mut permissions: Vec<String> = actor.permissions.into_iter().collect();
    permissions.sort();

    Ok(UserProfile {
        user,
        memberships,
        groups,
        permissions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_is_not_a_membership_role() {
        assert!(ensure_org_role(Role::Foreman).is_ok());
        assert!(ensure_org_role(Role::OrgAdmin).is_ok());
        assert_eq!(ensure_org_role(Role::Admin).unwrap_err().kind(), "validation_error");
    }
}
