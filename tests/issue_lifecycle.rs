mod common;

use anyhow::Result;
use serde_json::json;
use uuid::Uuid;

use site_control::authz::{PermissionMatrix, ResourceType, Role};
use site_control::config::WorkflowConfig;
use site_control::errors::AppError;
use site_control::models::issue::{Fixability, NewIssue, Severity};
use site_control::models::{IssueKind, IssueStatus, OfflineMeta};

use common::{setup, setup_with};

fn remark(object_id: Uuid, batch: Option<&str>) -> NewIssue {
    NewIssue {
        object_id,
        category: "fire_safety".into(),
        description: "Extinguisher missing on floor 2".into(),
        severity: Some(Severity::High),
        fixability: Some(Fixability::Fixable),
        sla_due: None,
        latitude: None,
        longitude: None,
        offline: OfflineMeta {
            offline_batch_id: batch.map(str::to_owned),
            ..OfflineMeta::default()
        },
    }
}

#[tokio::test]
async fn remark_runs_from_open_to_accepted() -> Result<()> {
    let env = setup().await?;
    let org = env.org("Northwind").await?;
    let client = env.member(org, "client", Role::Client).await?;
    let foreman = env.member(org, "foreman", Role::Foreman).await?;
    let inspector = env.tagged("inspector", Role::Inspector).await?;
    let object = env.active_object(&client, &inspector, org, "Block A").await?;

    let (issue, created) = env
        .workflow
        .create_issue(&client, IssueKind::Remark, remark(object, None))
        .await?;
    assert!(created);
    assert_eq!(issue.status, IssueStatus::Open);
    assert_eq!(issue.org_id, org);
    assert!(!issue.offline.was_offline);

    assert_eq!(issue.resolved_by, None);
    assert_eq!(issue.closed_by, None);

    let step = env.workflow.start_issue_work(&foreman, ResourceType::Remark, issue.id).await?;
    assert_eq!(step.new_state, "IN_PROGRESS");

    // Closure belongs to the closure roles, not the foreman.
    env.workflow
        .submit_issue_resolution(&foreman, ResourceType::Remark, issue.id)
        .await?;
    let resolved = env.workflow.get_issue(&client, IssueKind::Remark, issue.id).await?;
    assert_eq!(resolved.resolved_by, Some(foreman.user_id));
    assert!(resolved.resolved_at.is_some());
    assert_eq!(resolved.closed_at, None);
    let err = env
        .workflow
        .confirm_issue_closure(&foreman, ResourceType::Remark, issue.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden { .. }), "got {err:?}");

    let closed = env
        .workflow
        .transition(&client, ResourceType::Remark, issue.id, "confirm_closure", serde_json::Value::Null)
        .await?;
    assert_eq!(closed.previous_state, "PENDING_CONFIRMATION");
    assert_eq!(closed.new_state, "ACCEPTED");

    let accepted = env.workflow.get_issue(&client, IssueKind::Remark, issue.id).await?;
    assert_eq!(accepted.status, IssueStatus::Accepted);
    assert_eq!(accepted.resolved_by, Some(foreman.user_id));
    assert_eq!(accepted.closed_by, Some(client.user_id));
    assert!(accepted.closed_at.is_some());
    let context = env.audit_context(issue.id, "remark_confirm_closure").await?;
    assert_eq!(context["diff"]["closed_by"]["to"], client.user_id.to_string());

    assert_eq!(
        env.audit_actions(issue.id).await?,
        vec!["create_remark", "remark_start_work", "remark_submit_resolution", "remark_confirm_closure"]
    );
    assert_eq!(env.notification_count("remark.closed").await?, 1);

    let err = env
        .workflow
        .start_issue_work(&foreman, ResourceType::Remark, issue.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidStateTransition { .. }), "got {err:?}");
    Ok(())
}

#[tokio::test]
async fn offline_resubmission_returns_the_stored_issue() -> Result<()> {
    let env = setup().await?;
    let org = env.org("Northwind").await?;
    let client = env.member(org, "client", Role::Client).await?;
    let second_client = env.member(org, "client2", Role::Client).await?;
    let inspector = env.tagged("inspector", Role::Inspector).await?;
    let object = env.active_object(&client, &inspector, org, "Block B").await?;

    let (first, created) = env
        .workflow
        .create_issue(&client, IssueKind::Remark, remark(object, Some("batch-001")))
        .await?;
    assert!(created);
    assert!(first.offline.was_offline);
    assert_eq!(first.offline.offline_batch_id.as_deref(), Some("batch-001"));

    let (again, created) = env
        .workflow
        .create_issue(&client, IssueKind::Remark, remark(object, Some("batch-001")))
        .await?;
    assert!(!created);
    assert_eq!(again.id, first.id);

    // The key is per actor: another user's batch with the same id is a new record.
    let (foreign, created) = env
        .workflow
        .create_issue(&second_client, IssueKind::Remark, remark(object, Some("batch-001")))
        .await?;
    assert!(created);
    assert_ne!(foreign.id, first.id);

    // Blank batch ids never deduplicate.
    let (blank_a, _) = env
        .workflow
        .create_issue(&client, IssueKind::Remark, remark(object, Some("  ")))
        .await?;
    let (blank_b, _) = env
        .workflow
        .create_issue(&client, IssueKind::Remark, remark(object, Some("  ")))
        .await?;
    assert_ne!(blank_a.id, blank_b.id);

    assert_eq!(env.audit_count("create_remark").await?, 4);
    assert_eq!(env.audit_count("replay_remark").await?, 1);
    let context = env.audit_context(first.id, "replay_remark").await?;
    assert_eq!(context["extra"]["offline_batch_id"], "batch-001");
    assert_eq!(context["client"]["was_offline"], true);
    assert_eq!(env.notification_count("remark.replayed").await?, 1);

    let outcome = env
        .workflow
        .create_or_get_idempotent(
            &client,
            ResourceType::Remark,
            json!({
                "object_id": object,
                "category": "fire_safety",
                "description": "Extinguisher missing on floor 2",
                "offline_batch_id": "batch-001",
            }),
        )
        .await?;
    assert!(!outcome.was_created);
    assert_eq!(outcome.id, first.id);
    assert_eq!(outcome.record["status"], "OPEN");

    let err = env
        .workflow
        .create_or_get_idempotent(&client, ResourceType::ConstructionObject, json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)), "got {err:?}");
    Ok(())
}

#[tokio::test]
async fn issue_payloads_are_validated() -> Result<()> {
    let env = setup_with(WorkflowConfig::default().with_presence_required([]), PermissionMatrix::default()).await?;
    let org = env.org("Northwind").await?;
    let client = env.member(org, "client", Role::Client).await?;
    let inspector = env.tagged("inspector", Role::Inspector).await?;
    let object = env.active_object(&client, &inspector, org, "Block C").await?;

    let mut blank = remark(object, None);
    blank.description = "   ".into();
    let err = env.workflow.create_issue(&client, IssueKind::Remark, blank).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)), "got {err:?}");

    // Fixability is a remark-only field.
    let err = env
        .workflow
        .create_issue(&inspector, IssueKind::Violation, remark(object, None))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)), "got {err:?}");

    let mut violation = remark(object, None);
    violation.fixability = None;
    let (stored, _) = env.workflow.create_issue(&inspector, IssueKind::Violation, violation).await?;
    assert_eq!(stored.kind, IssueKind::Violation);

    // Kinds do not leak into each other's lookups.
    let err = env
        .workflow
        .get_issue(&inspector, IssueKind::Remark, stored.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)), "got {err:?}");
    Ok(())
}

#[tokio::test]
async fn issue_rejection_is_gated_by_configuration() -> Result<()> {
    for enabled in [false, true] {
        let env = setup_with(
            WorkflowConfig::default().with_issue_reject(enabled),
            PermissionMatrix::default(),
        )
        .await?;
        let org = env.org("Northwind").await?;
        let client = env.member(org, "client", Role::Client).await?;
        let foreman = env.member(org, "foreman", Role::Foreman).await?;
        let inspector = env.tagged("inspector", Role::Inspector).await?;
        let object = env.active_object(&client, &inspector, org, "Block D").await?;

        let (issue, _) = env
            .workflow
            .create_issue(&client, IssueKind::Remark, remark(object, None))
            .await?;
        env.workflow
            .submit_issue_resolution(&foreman, ResourceType::Remark, issue.id)
            .await?;

        let result = env
            .workflow
            .transition(&client, ResourceType::Remark, issue.id, "reject", json!({"comment": "still broken"}))
            .await;

        if enabled {
            assert_eq!(result?.new_state, "REJECTED");
            let stored = env.workflow.get_issue(&client, IssueKind::Remark, issue.id).await?;
            assert_eq!(stored.closed_by, Some(client.user_id));
            let context = env.audit_context(issue.id, "remark_reject").await?;
            assert_eq!(context["extra"]["comment"], "still broken");
        } else {
            let err = result.unwrap_err();
            assert!(matches!(err, AppError::Forbidden { .. }), "got {err:?}");
            let stored = env.workflow.get_issue(&client, IssueKind::Remark, issue.id).await?;
            assert_eq!(stored.status, IssueStatus::PendingConfirmation);
            assert_eq!(stored.closed_by, None);
        }
    }
    Ok(())
}
