use std::collections::HashSet;

use uuid::Uuid;

use super::principal::Actor;
use super::Role;

/// Visibility references of a listable entity.
///
/// Entities exposing neither reference pass through `scope` unfiltered.
pub trait Scoped {
    /// Stable identity used to keep scoped results duplicate-free.
    fn scope_key(&self) -> Uuid;

    /// Organization the entity belongs to directly.
    fn org_ref(&self) -> Option<Uuid> {
        None
    }

    /// Construction object the entity hangs off, with that object's owning org.
    fn object_ref(&self) -> Option<(Uuid, Uuid)> {
        None
    }
}

fn sees_everything(actor: &Actor, system_roles: &[Role]) -> bool {
    actor.is_superuser || system_roles.iter().any(|role| actor.group_roles.contains(role))
}

/// Organizations the actor may see; `None` means unrestricted.
pub fn visible_org_ids(actor: &Actor, system_roles: &[Role]) -> Option<HashSet<Uuid>> {
    if sees_everything(actor, system_roles) {
        return None;
    }
    if !actor.is_authenticated() {
        return Some(HashSet::new());
    }
    Some(actor.memberships.iter().map(|(org, _)| *org).collect())
}

/// Objects reachable through active assignments; `None` means unrestricted.
pub fn visible_object_ids(actor: &Actor, system_roles: &[Role]) -> Option<HashSet<Uuid>> {
    if sees_everything(actor, system_roles) {
        return None;
    }
    if !actor.is_authenticated() {
        return Some(HashSet::new());
    }
    Some(actor.assignments.iter().map(|(object, _)| *object).collect())
}

struct Visibility {
    orgs: HashSet<Uuid>,
    objects: HashSet<Uuid>,
}

impl Visibility {
    fn admits<T: Scoped>(&self, item: &T) -> bool {
        let org = item.org_ref();
        let object = item.object_ref();
        if org.is_none() && object.is_none() {
            return true;
        }
        if org.is_some_and(|org| self.orgs.contains(&org)) {
            return true;
        }
        match object {
            Some((object_id, owner_org)) => {
                self.objects.contains(&object_id) || self.orgs.contains(&owner_org)
            }
            None => false,
        }
    }
}

fn visibility(actor: &Actor, system_roles: &[Role]) -> Option<Visibility> {
    let orgs = visible_org_ids(actor, system_roles)?;
    let objects = visible_object_ids(actor, system_roles)?;
    Some(Visibility { orgs, objects })
}

/// Single-entity form of `scope`, used before instance-level checks.
pub fn is_visible<T: Scoped>(actor: &Actor, item: &T, system_roles: &[Role]) -> bool {
    match visibility(actor, system_roles) {
        Some(visibility) => visibility.admits(item),
        None => true,
    }
}

/// Filters a candidate collection down to what the actor may see.
pub fn scope<T: Scoped>(actor: &Actor, items: Vec<T>, system_roles: &[Role]) -> Vec<T> {
    let visibility = visibility(actor, system_roles);
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.scope_key()))
        .filter(|item| visibility.as_ref().map_or(true, |v| v.admits(item)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYSTEM: [Role; 2] = [Role::Admin, Role::Inspector];

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        id: Uuid,
        org: Option<Uuid>,
        object: Option<(Uuid, Uuid)>,
    }

    impl Scoped for Row {
        fn scope_key(&self) -> Uuid {
            self.id
        }

        fn org_ref(&self) -> Option<Uuid> {
            self.org
        }

        fn object_ref(&self) -> Option<(Uuid, Uuid)> {
            self.object
        }
    }

    fn org_row(org: Uuid) -> Row {
        Row {
            id: Uuid::new_v4(),
            org: Some(org),
            object: None,
        }
    }

    fn child_row(object: Uuid, org: Uuid) -> Row {
        Row {
            id: Uuid::new_v4(),
            org: None,
            object: Some((object, org)),
        }
    }

    #[test]
    fn members_see_only_their_orgs() {
        let (x, y) = (Uuid::new_v4(), Uuid::new_v4());
        let actor = Actor::new(Uuid::new_v4()).with_membership(x, Role::Foreman);
        let rows = vec![org_row(x), org_row(y), child_row(Uuid::new_v4(), y)];

        let visible = scope(&actor, rows.clone(), &SYSTEM);
        assert_eq!(visible, vec![rows[0].clone()]);
    }

    #[test]
    fn assignment_reveals_children_of_foreign_objects() {
        let (object, foreign_org) = (Uuid::new_v4(), Uuid::new_v4());
        let actor = Actor::new(Uuid::new_v4()).with_assignment(object, Role::Foreman);
        let rows = vec![child_row(object, foreign_org), child_row(Uuid::new_v4(), foreign_org)];

        let visible = scope(&actor, rows.clone(), &SYSTEM);
        assert_eq!(visible, vec![rows[0].clone()]);
    }

    #[test]
    fn system_roles_and_superusers_see_everything() {
        let rows = vec![org_row(Uuid::new_v4()), child_row(Uuid::new_v4(), Uuid::new_v4())];
        let inspector = Actor::new(Uuid::new_v4()).with_group_roles([Role::Inspector]);
        let root = Actor::new(Uuid::new_v4()).superuser();

        assert_eq!(scope(&inspector, rows.clone(), &SYSTEM).len(), 2);
        assert_eq!(scope(&root, rows.clone(), &[]).len(), 2);
        assert!(visible_org_ids(&root, &[]).is_none());
        assert!(scope(&inspector, rows, &[Role::Admin]).is_empty());
    }

    #[test]
    fn unreferenced_rows_pass_and_duplicates_collapse() {
        let actor = Actor::new(Uuid::new_v4());
        let loose = Row {
            id: Uuid::new_v4(),
            org: None,
            object: None,
        };

        let visible = scope(&actor, vec![loose.clone(), loose.clone()], &SYSTEM);
        assert_eq!(visible, vec![loose]);
    }
}
