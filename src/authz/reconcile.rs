use serde::Serialize;
use sqlx::SqlitePool;

use super::matrix::PermissionMatrix;
use super::Role;
use crate::errors::AppResult;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub groups_created: u64,
    pub permissions_granted: u64,
}

/// Provisions role groups and their model permissions from the matrix.
///
/// Only inserts what is missing; existing grants are left alone, so running it
/// repeatedly is safe.
pub async fn reconcile_roles(pool: &SqlitePool, matrix: &PermissionMatrix) -> AppResult<ReconcileReport> {
    let mut tx = pool.begin().await?;
    let mut report = ReconcileReport::default();

    for role in Role::ALL {
        report.groups_created += sqlx::query("INSERT OR IGNORE INTO role_groups (role, label) VALUES (?, ?)")
            .bind(role.as_str())
            .bind(role.label())
            .execute(&mut *tx)
            .await?
            .rows_affected();
    }

    for (role, codenames) in matrix.group_permissions() {
        for codename in codenames {
            report.permissions_granted +=
                sqlx::query("INSERT OR IGNORE INTO group_permissions (role, codename) VALUES (?, ?)")
                    .bind(role.as_str())
                    .bind(codename)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
        }
    }

    tx.commit().await?;
    tracing::info!(
        groups_created = report.groups_created,
        permissions_granted = report.permissions_granted,
        "role groups reconciled"
    );
    Ok(report)
}
