use std::collections::HashSet;

use sqlx::SqlitePool;
use uuid::Uuid;

use super::Role;
use crate::errors::{AppError, AppResult};

/// Actor is the authenticated user together with every grant the matrix consults.
///
/// Loaded once per request; the evaluator and the scoping functions only read it.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: Uuid,
    pub is_superuser: bool,
    pub is_staff: bool,
    pub is_active: bool,
    /// Organization memberships as (org_id, role).
    pub memberships: Vec<(Uuid, Role)>,
    /// Active object assignments as (object_id, role).
    pub assignments: Vec<(Uuid, Role)>,
    /// Coarse group role tags.
    pub group_roles: HashSet<Role>,
    /// Effective model permission codenames (direct grants plus group grants).
    pub permissions: HashSet<String>,
}

impl Actor {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            is_superuser: false,
            is_staff: false,
            is_active: true,
            memberships: Vec::new(),
            assignments: Vec::new(),
            group_roles: HashSet::new(),
            permissions: HashSet::new(),
        }
    }

    pub fn superuser(mut self) -> Self {
        self.is_superuser = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn with_membership(mut self, org_id: Uuid, role: Role) -> Self {
        self.memberships.push((org_id, role));
        self
    }

    pub fn with_assignment(mut self, object_id: Uuid, role: Role) -> Self {
        self.assignments.push((object_id, role));
        self
    }

    pub fn with_group_roles(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.group_roles.extend(roles);
        self
    }

    pub fn with_permissions<S: Into<String>>(mut self, perms: impl IntoIterator<Item = S>) -> Self {
        self.permissions.extend(perms.into_iter().map(Into::into));
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.is_active
    }

    pub fn has_permission(&self, codename: &str) -> bool {
        self.is_superuser || self.permissions.contains(codename)
    }

    /// Existential check across every organization.
    pub fn holds_membership_role(&self, roles: &[Role]) -> bool {
        self.memberships.iter().any(|(_, role)| roles.contains(role))
    }

    pub fn membership_roles_in(&self, org_id: Uuid) -> impl Iterator<Item = Role> + '_ {
        self.memberships
            .iter()
            .filter(move |(org, _)| *org == org_id)
            .map(|(_, role)| *role)
    }

    pub fn assignment_roles_on(&self, object_id: Uuid) -> impl Iterator<Item = Role> + '_ {
        self.assignments
            .iter()
            .filter(move |(object, _)| *object == object_id)
            .map(|(_, role)| *role)
    }

    pub fn is_member_of(&self, org_id: Uuid) -> bool {
        self.memberships.iter().any(|(org, _)| *org == org_id)
    }
}

/// Resolves the ownership chain of a concrete instance for instance-level checks.
///
/// Every resource type implements this explicitly instead of probing for fields.
pub trait Target: Send + Sync {
    /// Construction object the instance belongs to (the instance itself for objects).
    fn construction_object_id(&self) -> Option<Uuid>;
    /// Organization owning the instance, directly or through its object.
    fn owning_org_id(&self) -> Option<Uuid>;
}

#[derive(sqlx::FromRow)]
struct UserFlags {
    is_superuser: bool,
    is_staff: bool,
    is_active: bool,
}

fn parse_roles<'a>(rows: impl IntoIterator<Item = &'a str>, user_id: Uuid) -> Vec<Role> {
    rows.into_iter()
        .filter_map(|raw| match raw.parse::<Role>() {
            Ok(role) => Some(role),
            Err(_) => {
                tracing::warn!(user_id = %user_id, role = %raw, "ignoring unknown stored role");
                None
            }
        })
        .collect()
}

/// Loads the actor snapshot for a user id.
pub async fn load_actor(pool: &SqlitePool, user_id: Uuid) -> AppResult<Actor> {
    let flags = sqlx::query_as::<_, UserFlags>(
        "SELECT is_superuser, is_staff, is_active FROM users WHERE id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::unauthorized("unknown user"))?;

    let membership_rows: Vec<(Uuid, String)> =
        sqlx::query_as("SELECT org_id, role FROM memberships WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(pool)
            .await?;

    let assignment_rows: Vec<(Uuid, String)> = sqlx::query_as(
        "SELECT object_id, role FROM object_assignments WHERE user_id = ? AND is_active = 1",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let group_rows: Vec<String> = sqlx::query_scalar("SELECT role FROM user_groups WHERE user_id = ?")
        .bind(user_id)
        .fetch_all(pool)
        .await?;

    let permissions: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT codename FROM user_permissions WHERE user_id = ?
        UNION
        SELECT gp.codename FROM group_permissions gp
        JOIN user_groups ug ON ug.role = gp.role
        WHERE ug.user_id = ?
        "#,
    )
    .bind(user_id)
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let memberships = membership_rows
        .iter()
        .filter_map(|(org, raw)| parse_roles([raw.as_str()], user_id).pop().map(|r| (*org, r)))
        .collect();
    let assignments = assignment_rows
        .iter()
        .filter_map(|(object, raw)| parse_roles([raw.as_str()], user_id).pop().map(|r| (*object, r)))
        .collect();

    Ok(Actor {
        user_id,
        is_superuser: flags.is_superuser,
        is_staff: flags.is_staff,
        is_active: flags.is_active,
        memberships,
        assignments,
        group_roles: parse_roles(group_rows.iter().map(String::as_str), user_id)
            .into_iter()
            .collect(),
        permissions: permissions.into_iter().collect(),
    })
}
