use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::matrix::PermissionMatrix;
use super::principal::{Actor, Target};
use super::{Action, ResourceType, Role};

/// Policy evaluator trait for pluggable authorization logic.
///
/// Every method answers with a plain bool; callers translate `false`
/// into `AppError::Forbidden`.
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    /// Coarse check without a concrete instance (list / create).
    async fn authorize_type(&self, actor: &Actor, resource: ResourceType, action: Action) -> bool;

    /// Fine check against a concrete instance. Only meaningful after `authorize_type` passed.
    async fn authorize_instance(
        &self,
        actor: &Actor,
        resource: ResourceType,
        action: Action,
        target: &dyn Target,
    ) -> bool;

    async fn authorize(
        &self,
        actor: &Actor,
        resource: ResourceType,
        action: Action,
        target: Option<&dyn Target>,
    ) -> bool {
        if !self.authorize_type(actor, resource, action).await {
            return false;
        }
        match target {
            Some(target) => self.authorize_instance(actor, resource, action, target).await,
            None => true,
        }
    }
}

/// Matrix-backed evaluator.
///
/// Coarse phase:
/// 1. superuser -> allow
/// 2. inactive -> deny
/// 3. read-only action -> allow
/// 4. missing model permission bit -> deny
/// 5. role map entry present -> require the role in any membership or group tag
///
/// Fine phase:
/// 1. superuser / read-only / no role map entry -> allow
/// 2. active assignments on the instance's object decide alone
/// 3. membership in the owning org
/// 4. group role tags
/// 5. deny
#[derive(Debug, Clone)]
pub struct MatrixPolicyEvaluator {
    matrix: Arc<PermissionMatrix>,
}

impl Default for MatrixPolicyEvaluator {
    fn default() -> Self {
        Self::new(Arc::new(PermissionMatrix::default()))
    }
}

impl MatrixPolicyEvaluator {
    pub fn new(matrix: Arc<PermissionMatrix>) -> Self {
        Self { matrix }
    }

    pub fn matrix(&self) -> &PermissionMatrix {
        &self.matrix
    }

    fn decide(actor: &Actor, resource: ResourceType, action: Action, tier: &'static str, allowed: bool) -> bool {
        tracing::debug!(
            user_id = %actor.user_id,
            resource = %resource,
            action = %action,
            tier,
            allowed,
            "authorization decision"
        );
        allowed
    }

    fn any_group_role(actor: &Actor, required: &[Role]) -> bool {
        required.iter().any(|role| actor.group_roles.contains(role))
    }

    fn assignment_decision(actor: &Actor, object_id: Uuid, required: &[Role]) -> Option<bool> {
        let mut held = actor.assignment_roles_on(object_id).peekable();
        held.peek()?;
        Some(held.any(|role| required.contains(&role)))
    }
}

#[async_trait]
impl PolicyEvaluator for MatrixPolicyEvaluator {
    async fn authorize_type(&self, actor: &Actor, resource: ResourceType, action: Action) -> bool {
        if actor.is_superuser {
            return Self::decide(actor, resource, action, "superuser", true);
        }
        if !actor.is_authenticated() {
            return Self::decide(actor, resource, action, "inactive", false);
        }
        if action.is_read_only() {
            return Self::decide(actor, resource, action, "read", true);
        }

        if let Some(codename) = action.required_permission(resource) {
            if !actor.has_permission(&codename) {
                tracing::debug!(user_id = %actor.user_id, permission = %codename, "missing model permission");
                return Self::decide(actor, resource, action, "model_permission", false);
            }
        }

        match self.matrix.required_roles(resource, action) {
            Some(required) => {
                let allowed = actor.holds_membership_role(required) || Self::any_group_role(actor, required);
                Self::decide(actor, resource, action, "role_map", allowed)
            }
            None => Self::decide(actor, resource, action, "model_permission", true),
        }
    }

    async fn authorize_instance(
        &self,
        actor: &Actor,
        resource: ResourceType,
        action: Action,
        target: &dyn Target,
    ) -> bool {
        if actor.is_superuser {
            return Self::decide(actor, resource, action, "superuser", true);
        }
        if action.is_read_only() {
            return Self::decide(actor, resource, action, "read", true);
        }
        let Some(required) = self.matrix.required_roles(resource, action) else {
            return Self::decide(actor, resource, action, "no_role_map", true);
        };

        if let Some(object_id) = target.construction_object_id() {
            if let Some(allowed) = Self::assignment_decision(actor, object_id, required) {
                return Self::decide(actor, resource, action, "assignment", allowed);
            }
        }

        if let Some(org_id) = target.owning_org_id() {
            if actor.membership_roles_in(org_id).any(|role| required.contains(&role)) {
                return Self::decide(actor, resource, action, "membership", true);
            }
        }

        if Self::any_group_role(actor, required) {
            return Self::decide(actor, resource, action, "group", true);
        }

        Self::decide(actor, resource, action, "deny", false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Site {
        object: Uuid,
        org: Uuid,
    }

    impl Target for Site {
        fn construction_object_id(&self) -> Option<Uuid> {
            Some(self.object)
        }

        fn owning_org_id(&self) -> Option<Uuid> {
            Some(self.org)
        }
    }

    fn site() -> Site {
        Site {
            object: Uuid::new_v4(),
            org: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn superuser_bypasses_every_check() {
        let evaluator = MatrixPolicyEvaluator::default();
        let actor = Actor::new(Uuid::new_v4()).superuser();
        let target = site();

        for resource in ResourceType::ALL {
            for action in Action::ALL {
                assert!(evaluator.authorize(&actor, resource, action, None).await);
                assert!(evaluator.authorize(&actor, resource, action, Some(&target)).await);
            }
        }
    }

    #[tokio::test]
    async fn reads_need_only_an_active_account() {
        let evaluator = MatrixPolicyEvaluator::default();
        let active = Actor::new(Uuid::new_v4());
        let inactive = Actor::new(Uuid::new_v4()).inactive();

        assert!(evaluator.authorize_type(&active, ResourceType::Remark, Action::List).await);
        assert!(!evaluator.authorize_type(&inactive, ResourceType::Remark, Action::List).await);
    }

    #[tokio::test]
    async fn mutations_need_the_model_permission_bit() {
        let evaluator = MatrixPolicyEvaluator::default();
        let org = Uuid::new_v4();
        let without = Actor::new(Uuid::new_v4()).with_membership(org, Role::Client);
        let with = without.clone().with_permissions(["change_constructionobject"]);

        assert!(!evaluator.authorize_type(&without, ResourceType::ConstructionObject, Action::Plan).await);
        assert!(evaluator.authorize_type(&with, ResourceType::ConstructionObject, Action::Plan).await);
    }

    #[tokio::test]
    async fn coarse_role_check_is_existential_across_orgs() {
        let evaluator = MatrixPolicyEvaluator::default();
        let actor = Actor::new(Uuid::new_v4())
            .with_membership(Uuid::new_v4(), Role::Inspector)
            .with_permissions(["change_constructionobject"]);

        assert!(evaluator.authorize_type(&actor, ResourceType::ConstructionObject, Action::Activate).await);
        assert!(!evaluator.authorize_type(&actor, ResourceType::ConstructionObject, Action::Plan).await);
    }

    #[tokio::test]
    async fn assignment_outranks_membership() {
        let evaluator = MatrixPolicyEvaluator::default();
        let target = site();
        let actor = Actor::new(Uuid::new_v4())
            .with_membership(target.org, Role::Client)
            .with_assignment(target.object, Role::Foreman)
            .with_permissions(["change_constructionobject"]);

        // The coarse phase passes on the CLIENT membership.
        assert!(evaluator.authorize_type(&actor, ResourceType::ConstructionObject, Action::Plan).await);
        assert!(
            !evaluator
                .authorize_instance(&actor, ResourceType::ConstructionObject, Action::Plan, &target)
                .await
        );

        let member_only = Actor::new(Uuid::new_v4())
            .with_membership(target.org, Role::Client)
            .with_permissions(["change_constructionobject"]);
        assert!(
            evaluator
                .authorize(&member_only, ResourceType::ConstructionObject, Action::Plan, Some(&target))
                .await
        );
    }

    #[tokio::test]
    async fn membership_in_another_org_does_not_reach_the_instance() {
        let evaluator = MatrixPolicyEvaluator::default();
        let target = site();
        let actor = Actor::new(Uuid::new_v4())
            .with_membership(Uuid::new_v4(), Role::Foreman)
            .with_permissions(["change_dailychecklist"]);

        assert!(evaluator.authorize_type(&actor, ResourceType::DailyChecklist, Action::Submit).await);
        assert!(
            !evaluator
                .authorize_instance(&actor, ResourceType::DailyChecklist, Action::Submit, &target)
                .await
        );
    }

    #[tokio::test]
    async fn group_tags_are_the_last_fallback() {
        let evaluator = MatrixPolicyEvaluator::default();
        let target = site();
        let admin = Actor::new(Uuid::new_v4())
            .with_group_roles([Role::Admin])
            .with_permissions(["change_constructionobject"]);

        assert!(
            evaluator
                .authorize(&admin, ResourceType::ConstructionObject, Action::Close, Some(&target))
                .await
        );
    }

    #[tokio::test]
    async fn coarse_phase_reads_memberships_and_group_tags_only() {
        let evaluator = MatrixPolicyEvaluator::default();
        let target = site();

        let tagged = Actor::new(Uuid::new_v4())
            .with_group_roles([Role::Admin])
            .with_permissions(["change_constructionobject"]);
        assert!(evaluator.authorize_type(&tagged, ResourceType::ConstructionObject, Action::Close).await);

        let assigned_only = Actor::new(Uuid::new_v4())
            .with_assignment(target.object, Role::Foreman)
            .with_permissions(["change_dailychecklist"]);
        assert!(!evaluator.authorize_type(&assigned_only, ResourceType::DailyChecklist, Action::Submit).await);
    }

    #[tokio::test]
    async fn actions_without_role_entry_only_need_the_permission_bit() {
        let evaluator = MatrixPolicyEvaluator::default();
        let target = site();
        let actor = Actor::new(Uuid::new_v4()).with_permissions(["change_constructionobject"]);

        assert!(
            evaluator
                .authorize(&actor, ResourceType::ConstructionObject, Action::Update, Some(&target))
                .await
        );
    }
}
