use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::{Action, ResourceType, Role};
use crate::errors::{AppError, AppResult};

/// Which of the two historical role tables governs opening checklist review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecklistRolePolicy {
    /// submit: FOREMAN/ADMIN, approve/reject: ADMIN/CLIENT.
    Matrix,
    /// submit: CLIENT, approve/reject: INSPECTOR.
    Service,
}

impl ChecklistRolePolicy {
    pub fn parse(raw: &str) -> AppResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "matrix" => Ok(ChecklistRolePolicy::Matrix),
            "service" => Ok(ChecklistRolePolicy::Service),
            other => Err(AppError::configuration(format!(
                "CHECKLIST_ROLE_POLICY must be 'matrix' or 'service', got '{other}'"
            ))),
        }
    }
}

/// Immutable role/permission matrix handed to the evaluator at startup.
#[derive(Debug, Clone)]
pub struct PermissionMatrix {
    role_map: HashMap<(ResourceType, Action), Vec<Role>>,
    model_perms: BTreeMap<Role, BTreeSet<String>>,
}

const DEFAULT_CLOSURE_ROLES: [Role; 2] = [Role::Inspector, Role::Client];

fn grant(perms: &mut BTreeMap<Role, BTreeSet<String>>, role: Role, resource: ResourceType, verbs: &[&str]) {
    let model = resource.model_name();
    perms
        .entry(role)
        .or_default()
        .extend(verbs.iter().map(|verb| format!("{verb}_{model}")));
}

impl Default for PermissionMatrix {
    fn default() -> Self {
        Self::new(ChecklistRolePolicy::Matrix, &DEFAULT_CLOSURE_ROLES)
    }
}

impl PermissionMatrix {
    pub fn new(checklist_policy: ChecklistRolePolicy, closure_roles: &[Role]) -> Self {
        use Action::*;
        use ResourceType::*;
        use Role::*;

        let mut role_map = HashMap::new();

        role_map.insert((ConstructionObject, Create), vec![OrgAdmin, Foreman, Client]);
        role_map.insert((ConstructionObject, Plan), vec![Client]);
        role_map.insert((ConstructionObject, RequestActivation), vec![Client]);
        role_map.insert((ConstructionObject, Activate), vec![Inspector]);
        role_map.insert((ConstructionObject, Close), vec![Admin]);

        let (submitters, reviewers) = match checklist_policy {
            ChecklistRolePolicy::Matrix => (vec![Foreman, Admin], vec![Admin, Client]),
            ChecklistRolePolicy::Service => (vec![Client], vec![Inspector]),
        };
        role_map.insert((OpeningChecklist, Update), submitters.clone());
        role_map.insert((OpeningChecklist, Submit), submitters);
        role_map.insert((OpeningChecklist, Approve), reviewers.clone());
        role_map.insert((OpeningChecklist, Reject), reviewers);

        for action in [Create, Update, PartialUpdate, Destroy] {
            role_map.insert((DailyChecklist, action), vec![Foreman, Admin]);
        }
        role_map.insert((DailyChecklist, Submit), vec![Foreman]);
        role_map.insert((DailyChecklist, Confirm), vec![Client, Admin]);

        for issue in [Remark, Violation] {
            role_map.insert((issue, Create), vec![Client, Inspector]);
            role_map.insert((issue, StartWork), vec![Foreman]);
            role_map.insert((issue, SubmitResolution), vec![Foreman]);
            role_map.insert((issue, ConfirmClosure), closure_roles.to_vec());
            role_map.insert((issue, Reject), closure_roles.to_vec());
        }

        role_map.insert((InspectionVisit, Create), vec![Inspector]);
        role_map.insert((InspectionVisit, End), vec![Inspector]);

        let mut model_perms: BTreeMap<Role, BTreeSet<String>> = BTreeMap::new();
        let perms = &mut model_perms;

        grant(perms, OrgAdmin, ConstructionObject, &["add", "change", "view"]);
        grant(perms, OrgAdmin, OpeningChecklist, &["view"]);
        grant(perms, OrgAdmin, DailyChecklist, &["view"]);

        grant(perms, Client, ConstructionObject, &["add", "change", "delete", "view"]);
        grant(perms, Client, OpeningChecklist, &["add", "change", "view"]);
        grant(perms, Client, DailyChecklist, &["change", "view"]);
        grant(perms, Client, Remark, &["add", "change", "view"]);
        grant(perms, Client, Violation, &["change", "view"]);
        grant(perms, Client, InspectionVisit, &["view"]);

        grant(perms, Foreman, ConstructionObject, &["view"]);
        grant(perms, Foreman, OpeningChecklist, &["add", "change", "delete", "view"]);
        grant(perms, Foreman, DailyChecklist, &["add", "change", "delete", "view"]);
        grant(perms, Foreman, Remark, &["change", "view"]);
        grant(perms, Foreman, Violation, &["change", "view"]);

        grant(perms, Inspector, ConstructionObject, &["change", "view"]);
        grant(perms, Inspector, OpeningChecklist, &["add", "change", "view"]);
        grant(perms, Inspector, DailyChecklist, &["view"]);
        grant(perms, Inspector, Remark, &["change", "view"]);
        grant(perms, Inspector, Violation, &["add", "change", "view"]);
        grant(perms, Inspector, InspectionVisit, &["add", "change", "view"]);

        for resource in ResourceType::ALL {
            grant(perms, Admin, resource, &["add", "change", "delete", "view"]);
        }

        Self {
            role_map,
            model_perms,
        }
    }

    /// Builds the matrix from `CHECKLIST_ROLE_POLICY` and `ISSUE_CLOSURE_ROLES`.
    pub fn from_env() -> AppResult<Self> {
        let policy = ChecklistRolePolicy::parse(&std::env::var("CHECKLIST_ROLE_POLICY").unwrap_or_default())?;

        let closure_roles = match std::env::var("ISSUE_CLOSURE_ROLES") {
            Ok(raw) if !raw.trim().is_empty() => parse_role_list(&raw)
                .map_err(|err| AppError::configuration(format!("ISSUE_CLOSURE_ROLES: {err}")))?,
            _ => DEFAULT_CLOSURE_ROLES.to_vec(),
        };

        tracing::info!(?policy, closure_roles = ?closure_roles, "permission matrix loaded");
        Ok(Self::new(policy, &closure_roles))
    }

    /// Replaces the required roles for one (resource, action) pair.
    pub fn with_roles(mut self, resource: ResourceType, action: Action, roles: &[Role]) -> Self {
        self.role_map.insert((resource, action), roles.to_vec());
        self
    }

    /// Removes the role requirement for one (resource, action) pair.
    pub fn without_roles(mut self, resource: ResourceType, action: Action) -> Self {
        self.role_map.remove(&(resource, action));
        self
    }

    pub fn required_roles(&self, resource: ResourceType, action: Action) -> Option<&[Role]> {
        self.role_map
            .get(&(resource, action))
            .map(Vec::as_slice)
            .filter(|roles| !roles.is_empty())
    }

    /// Group role → model permission codenames, used by role reconciliation.
    pub fn group_permissions(&self) -> impl Iterator<Item = (Role, &BTreeSet<String>)> {
        self.model_perms.iter().map(|(role, perms)| (*role, perms))
    }
}

pub(crate) fn parse_role_list(raw: &str) -> AppResult<Vec<Role>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse::<Role>)
        .collect()
}
