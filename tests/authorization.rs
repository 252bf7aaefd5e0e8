mod common;

use anyhow::Result;
use serde_json::Value;

use site_control::authz::{Action, ResourceType, Role};
use site_control::errors::AppError;
use site_control::identity;
use site_control::models::checklist::CreateDailyChecklistRequest;
use site_control::models::org::AssignmentRequest;
use site_control::models::user::UserFlagsUpdate;

use common::setup;

#[tokio::test]
async fn foreman_of_another_org_is_denied_and_scoped_out() -> Result<()> {
    let env = setup().await?;
    let org_x = env.org("Org X").await?;
    let org_y = env.org("Org Y").await?;
    let client_y = env.member(org_y, "client_y", Role::Client).await?;
    let inspector = env.tagged("inspector", Role::Inspector).await?;
    let foreman_x = env.member(org_x, "foreman_x", Role::Foreman).await?;
    let client_x = env.member(org_x, "client_x", Role::Client).await?;

    let own = env.draft_object(&client_x, org_x, "X tower").await?;
    let foreign = env.active_object(&client_y, &inspector, org_y, "Y tower").await?;
    let foreign_object = env.workflow.get_object(&inspector, foreign).await?;
    let totals = env.side_effect_totals().await?;

    // Coarse phase passes on the FOREMAN role held somewhere...
    assert!(
        env.workflow
            .authorize(&foreman_x, ResourceType::DailyChecklist, Action::Create, None)
            .await
    );
    // ...the fine phase denies it on org Y's object.
    assert!(
        !env.workflow
            .authorize(&foreman_x, ResourceType::DailyChecklist, Action::Create, Some(&foreign_object))
            .await
    );

    let listed: Vec<_> = env
        .workflow
        .list_objects(&foreman_x)
        .await?
        .into_iter()
        .map(|object| object.id)
        .collect();
    assert_eq!(listed, vec![own]);
    assert!(env.workflow.list_opening_checklists(&foreman_x).await?.is_empty());

    // Out-of-scope instances look absent rather than forbidden.
    let err = env.workflow.get_object(&foreman_x, foreign).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)), "got {err:?}");

    let err = env
        .workflow
        .create_daily_checklist(
            &foreman_x,
            CreateDailyChecklistRequest {
                object_id: foreign,
                items: vec!["fencing".into()],
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)), "got {err:?}");

    // Nor can the foreman drive org Y's object.
    let err = env.workflow.plan_object(&foreman_x, foreign).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden { .. } | AppError::NotFound(_)), "got {err:?}");

    assert_eq!(env.side_effect_totals().await?, totals);
    Ok(())
}

#[tokio::test]
async fn assignment_decides_over_membership() -> Result<()> {
    let env = setup().await?;
    let org = env.org("Northwind").await?;
    let client = env.member(org, "client", Role::Client).await?;
    let admin = env.superuser("root").await?;

    let assigned = env.draft_object(&client, org, "Assigned").await?;
    let unassigned = env.draft_object(&client, org, "Unassigned").await?;

    identity::assign_to_object(
        &env.pool,
        assigned,
        AssignmentRequest {
            user_id: client.user_id,
            role: Role::Foreman,
        },
        admin.user_id,
    )
    .await?;
    let client = env.actor(client.user_id).await?;

    // The FOREMAN assignment alone decides on its object; CLIENT cannot plan there.
    let err = env.workflow.plan_object(&client, assigned).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden { .. }), "got {err:?}");

    // Elsewhere in the org the CLIENT membership still applies.
    env.workflow.plan_object(&client, unassigned).await?;

    identity::deactivate_assignment(&env.pool, assigned, client.user_id, Role::Foreman).await?;
    let client = env.actor(client.user_id).await?;
    env.workflow.plan_object(&client, assigned).await?;
    Ok(())
}

#[tokio::test]
async fn assignment_grants_visibility_outside_the_members_org() -> Result<()> {
    let env = setup().await?;
    let org_x = env.org("Org X").await?;
    let org_y = env.org("Org Y").await?;
    let client_y = env.member(org_y, "client_y", Role::Client).await?;
    let inspector = env.tagged("inspector", Role::Inspector).await?;
    let foreman_x = env.member(org_x, "foreman_x", Role::Foreman).await?;
    let admin = env.superuser("root").await?;
    let foreign = env.active_object(&client_y, &inspector, org_y, "Y tower").await?;

    identity::assign_to_object(
        &env.pool,
        foreign,
        AssignmentRequest {
            user_id: foreman_x.user_id,
            role: Role::Foreman,
        },
        admin.user_id,
    )
    .await?;
    let foreman_x = env.actor(foreman_x.user_id).await?;

    let listed: Vec<_> = env.workflow.list_objects(&foreman_x).await?.into_iter().map(|o| o.id).collect();
    assert_eq!(listed, vec![foreign]);

    let daily = env
        .workflow
        .create_daily_checklist(
            &foreman_x,
            CreateDailyChecklistRequest {
                object_id: foreign,
                items: vec!["fencing".into()],
            },
        )
        .await?;
    assert_eq!(daily.org_id, org_y);
    Ok(())
}

#[tokio::test]
async fn superuser_bypasses_roles_and_scoping() -> Result<()> {
    let env = setup().await?;
    let org = env.org("Northwind").await?;
    let client = env.member(org, "client", Role::Client).await?;
    let root = env.superuser("root").await?;
    let id = env.draft_object(&client, org, "Block A").await?;

    assert_eq!(env.workflow.list_objects(&root).await?.len(), 1);
    env.workflow.plan_object(&root, id).await?;
    env.workflow.request_object_activation(&root, id).await?;
    env.workflow.activate_object(&root, id).await?;
    let closed = env
        .workflow
        .transition(&root, ResourceType::ConstructionObject, id, "close", Value::Null)
        .await?;
    assert_eq!(closed.new_state, "CLOSED");
    Ok(())
}

#[tokio::test]
async fn deactivated_users_lose_every_write() -> Result<()> {
    let env = setup().await?;
    let org = env.org("Northwind").await?;
    let client = env.member(org, "client", Role::Client).await?;
    let id = env.draft_object(&client, org, "Block A").await?;

    identity::set_flags(
        &env.pool,
        client.user_id,
        UserFlagsUpdate {
            is_superuser: None,
            is_staff: None,
            is_active: Some(false),
        },
    )
    .await?;
    let client = env.actor(client.user_id).await?;

    assert!(
        !env.workflow
            .authorize(&client, ResourceType::ConstructionObject, Action::List, None)
            .await
    );
    let err = env.workflow.plan_object(&client, id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_) | AppError::Forbidden { .. }), "got {err:?}");
    Ok(())
}

#[tokio::test]
async fn unknown_events_are_validation_errors() -> Result<()> {
    let env = setup().await?;
    let org = env.org("Northwind").await?;
    let client = env.member(org, "client", Role::Client).await?;
    let id = env.draft_object(&client, org, "Block A").await?;

    let err = env
        .workflow
        .transition(&client, ResourceType::ConstructionObject, id, "teleport", Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)), "got {err:?}");

    let err = env
        .workflow
        .transition(&client, ResourceType::ConstructionObject, id, "confirm_closure", Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)), "got {err:?}");
    Ok(())
}
