//! Authorization module - permission matrix, scoping and presence checks
//!
//! This module implements the access-control core:
//! - Closed role set shared by memberships, object assignments and group tags
//! - Two-phase matrix evaluation (type level, then instance level)
//! - Visibility scoping by organization membership and object assignment
//! - Geofence presence confirmation for on-site actions
//! - Superuser bypass everywhere

mod evaluator;
mod matrix;
mod presence;
mod principal;
mod reconcile;
mod scoping;

pub use evaluator::{MatrixPolicyEvaluator, PolicyEvaluator};
pub use matrix::{ChecklistRolePolicy, PermissionMatrix};
pub(crate) use matrix::parse_role_list;
pub use presence::{check_presence_guard, is_on_site, point_in_polygon, Polygon};
pub use principal::{load_actor, Actor, Target};
pub use reconcile::{reconcile_roles, ReconcileReport};
pub use scoping::{is_visible, scope, visible_object_ids, visible_org_ids, Scoped};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::AppError;

/// Unit of authorization grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    OrgAdmin,
    Client,
    Foreman,
    Inspector,
    /// System-wide administrator. Granted as a group tag only, never through a membership.
    Admin,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::OrgAdmin,
        Role::Client,
        Role::Foreman,
        Role::Inspector,
        Role::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::OrgAdmin => "ORG_ADMIN",
            Role::Client => "CLIENT",
            Role::Foreman => "FOREMAN",
            Role::Inspector => "INSPECTOR",
            Role::Admin => "ADMIN",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Role::OrgAdmin => "Organization administrator",
            Role::Client => "Client",
            Role::Foreman => "Foreman",
            Role::Inspector => "Inspector",
            Role::Admin => "Administrator",
        }
    }

    /// Roles that may be held through an organization membership.
    pub fn is_org_scoped(&self) -> bool {
        !matches!(self, Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ORG_ADMIN" => Ok(Role::OrgAdmin),
            "CLIENT" => Ok(Role::Client),
            "FOREMAN" => Ok(Role::Foreman),
            "INSPECTOR" => Ok(Role::Inspector),
            "ADMIN" => Ok(Role::Admin),
            other => Err(AppError::validation(format!("unknown role: {other}"))),
        }
    }
}

/// Resource families known to the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    ConstructionObject,
    OpeningChecklist,
    DailyChecklist,
    Remark,
    Violation,
    InspectionVisit,
}

impl ResourceType {
    pub const ALL: [ResourceType; 6] = [
        ResourceType::ConstructionObject,
        ResourceType::OpeningChecklist,
        ResourceType::DailyChecklist,
        ResourceType::Remark,
        ResourceType::Violation,
        ResourceType::InspectionVisit,
    ];

    /// Model name used in permission codenames (`add_<model>`).
    pub fn model_name(&self) -> &'static str {
        match self {
            ResourceType::ConstructionObject => "constructionobject",
            ResourceType::OpeningChecklist => "openingchecklist",
            ResourceType::DailyChecklist => "dailychecklist",
            ResourceType::Remark => "remark",
            ResourceType::Violation => "violation",
            ResourceType::InspectionVisit => "inspectionvisit",
        }
    }

    /// Fully qualified model label stored in audit rows.
    pub fn label(&self) -> &'static str {
        match self {
            ResourceType::ConstructionObject => "objects.constructionobject",
            ResourceType::OpeningChecklist => "objects.openingchecklist",
            ResourceType::DailyChecklist => "objects.dailychecklist",
            ResourceType::Remark => "issues.remark",
            ResourceType::Violation => "issues.violation",
            ResourceType::InspectionVisit => "inspections.inspectionvisit",
        }
    }

    /// Path segment used by the HTTP adapter.
    pub fn collection(&self) -> &'static str {
        match self {
            ResourceType::ConstructionObject => "objects",
            ResourceType::OpeningChecklist => "opening-checklists",
            ResourceType::DailyChecklist => "daily-checklists",
            ResourceType::Remark => "remarks",
            ResourceType::Violation => "violations",
            ResourceType::InspectionVisit => "visits",
        }
    }

    pub fn from_collection(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|rt| rt.collection() == segment)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.model_name())
    }
}

impl FromStr for ResourceType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        ResourceType::ALL
            .into_iter()
            .find(|rt| rt.model_name() == s || rt.collection() == s || s.replace('_', "") == rt.model_name())
            .ok_or_else(|| AppError::validation(format!("unknown resource type: {s}")))
    }
}

/// Actions a caller can request against a resource type or instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    List,
    Retrieve,
    Create,
    Update,
    PartialUpdate,
    Destroy,
    Plan,
    RequestActivation,
    Activate,
    Close,
    Submit,
    Approve,
    Reject,
    Confirm,
    StartWork,
    SubmitResolution,
    ConfirmClosure,
    End,
}

impl Action {
    pub const ALL: [Action; 18] = [
        Action::List,
        Action::Retrieve,
        Action::Create,
        Action::Update,
        Action::PartialUpdate,
        Action::Destroy,
        Action::Plan,
        Action::RequestActivation,
        Action::Activate,
        Action::Close,
        Action::Submit,
        Action::Approve,
        Action::Reject,
        Action::Confirm,
        Action::StartWork,
        Action::SubmitResolution,
        Action::ConfirmClosure,
        Action::End,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::List => "list",
            Action::Retrieve => "retrieve",
            Action::Create => "create",
            Action::Update => "update",
            Action::PartialUpdate => "partial_update",
            Action::Destroy => "destroy",
            Action::Plan => "plan",
            Action::RequestActivation => "request_activation",
            Action::Activate => "activate",
            Action::Close => "close",
            Action::Submit => "submit",
            Action::Approve => "approve",
            Action::Reject => "reject",
            Action::Confirm => "confirm",
            Action::StartWork => "start_work",
            Action::SubmitResolution => "submit_resolution",
            Action::ConfirmClosure => "confirm_closure",
            Action::End => "end",
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, Action::List | Action::Retrieve)
    }

    /// Model permission codename a mutating action needs at the type level.
    /// Custom actions are writes and need `change_<model>`.
    pub fn required_permission(&self, resource: ResourceType) -> Option<String> {
        let verb = match self {
            Action::List | Action::Retrieve => return None,
            Action::Create => "add",
            Action::Destroy => "delete",
            _ => "change",
        };
        Some(format!("{verb}_{}", resource.model_name()))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase().replace('-', "_");
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| AppError::validation(format!("unknown action: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_codenames_follow_action_kind() {
        let rt = ResourceType::ConstructionObject;
        assert_eq!(Action::Create.required_permission(rt).as_deref(), Some("add_constructionobject"));
        assert_eq!(Action::Update.required_permission(rt).as_deref(), Some("change_constructionobject"));
        assert_eq!(Action::PartialUpdate.required_permission(rt).as_deref(), Some("change_constructionobject"));
        assert_eq!(Action::Activate.required_permission(rt).as_deref(), Some("change_constructionobject"));
        assert_eq!(Action::Destroy.required_permission(rt).as_deref(), Some("delete_constructionobject"));
        assert_eq!(Action::List.required_permission(rt), None);
    }

    #[test]
    fn roles_parse_case_insensitively() {
        assert_eq!("org_admin".parse::<Role>().unwrap(), Role::OrgAdmin);
        assert_eq!(" Inspector ".parse::<Role>().unwrap(), Role::Inspector);
        assert!("manager".parse::<Role>().is_err());
        assert!(!Role::Admin.is_org_scoped());
    }

    #[test]
    fn resource_types_resolve_from_collections() {
        assert_eq!(ResourceType::from_collection("opening-checklists"), Some(ResourceType::OpeningChecklist));
        assert_eq!("daily_checklist".parse::<ResourceType>().unwrap(), ResourceType::DailyChecklist);
        assert_eq!("request-activation".parse::<Action>().unwrap(), Action::RequestActivation);
    }
}
