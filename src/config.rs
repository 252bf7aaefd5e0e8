use std::collections::HashSet;

use crate::authz::{Action, ResourceType, Role};
use crate::errors::{AppError, AppResult};

/// Lifecycle switches read once at startup.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Enables the PENDING_CONFIRMATION -> REJECTED issue transition.
    pub issue_reject_enabled: bool,
    /// (resource, action) pairs that additionally need confirmed on-site presence.
    pub presence_required: HashSet<(ResourceType, Action)>,
    /// Group role tags that bypass visibility scoping.
    pub system_wide_roles: Vec<Role>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            issue_reject_enabled: false,
            presence_required: HashSet::from([(ResourceType::Violation, Action::Create)]),
            system_wide_roles: vec![Role::Admin, Role::Inspector],
        }
    }
}

impl WorkflowConfig {
    pub fn from_env() -> AppResult<Self> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("ISSUE_REJECT_ENABLED") {
            config.issue_reject_enabled = parse_bool(&raw)
                .ok_or_else(|| AppError::configuration("ISSUE_REJECT_ENABLED must be a boolean"))?;
        }

        if let Ok(raw) = std::env::var("PRESENCE_REQUIRED") {
            config.presence_required = parse_presence_list(&raw)?;
        }

        if let Ok(raw) = std::env::var("SYSTEM_WIDE_ROLES") {
            config.system_wide_roles = crate::authz::parse_role_list(&raw)
                .map_err(|err| AppError::configuration(format!("SYSTEM_WIDE_ROLES: {err}")))?;
        }

        tracing::info!(
            issue_reject_enabled = config.issue_reject_enabled,
            presence_required = config.presence_required.len(),
            system_wide_roles = ?config.system_wide_roles,
            "workflow config loaded"
        );
        Ok(config)
    }

    pub fn with_issue_reject(mut self, enabled: bool) -> Self {
        self.issue_reject_enabled = enabled;
        self
    }

    pub fn with_presence_required(mut self, pairs: impl IntoIterator<Item = (ResourceType, Action)>) -> Self {
        self.presence_required = pairs.into_iter().collect();
        self
    }

    pub fn requires_presence(&self, resource: ResourceType, action: Action) -> bool {
        self.presence_required.contains(&(resource, action))
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parses `violation.create,remark.create` style lists.
fn parse_presence_list(raw: &str) -> AppResult<HashSet<(ResourceType, Action)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| -> AppResult<(ResourceType, Action)> {
            let (resource, action) = entry
                .split_once('.')
                .ok_or_else(|| AppError::configuration(format!("PRESENCE_REQUIRED entry '{entry}' is not resource.action")))?;
            Ok((resource.parse()?, action.parse()?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_guard_violation_creation_only() {
        let config = WorkflowConfig::default();
        assert!(!config.issue_reject_enabled);
        assert!(config.requires_presence(ResourceType::Violation, Action::Create));
        assert!(!config.requires_presence(ResourceType::Remark, Action::Create));
    }

    #[test]
    fn presence_lists_parse() {
        let pairs = parse_presence_list("remark.create, visits.end").unwrap();
        assert!(pairs.contains(&(ResourceType::Remark, Action::Create)));
        assert!(pairs.contains(&(ResourceType::InspectionVisit, Action::End)));
        assert!(parse_presence_list("remark").is_err());
        assert!(parse_presence_list("").unwrap().is_empty());
    }

    #[test]
    fn booleans_accept_common_spellings() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
