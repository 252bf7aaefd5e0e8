use chrono::Utc;
use serde_json::Value;
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::errors::AppResult;
use crate::models::notification::Notification;

/// The actor first, then the stakeholder when it is someone else.
pub fn recipients(actor_id: Uuid, stakeholder: Option<Uuid>) -> Vec<Uuid> {
    let mut users = vec![actor_id];
    if let Some(other) = stakeholder.filter(|other| *other != actor_id) {
        users.push(other);
    }
    users
}

/// Inserts one notification row per recipient on the caller's connection.
pub async fn enqueue(
    conn: &mut SqliteConnection,
    recipients: &[Uuid],
    kind: &str,
    payload: &Value,
) -> AppResult<Vec<Notification>> {
    let now = Utc::now();
    let encoded = serde_json::to_string(payload)?;
    let mut created = Vec::with_capacity(recipients.len());

    for user_id in recipients {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO notifications (id, user_id, kind, payload, is_read, created_at) VALUES (?, ?, ?, ?, 0, ?)",
        )
        .bind(id)
        .bind(user_id)
        .bind(kind)
        .bind(&encoded)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        created.push(Notification {
            id,
            user_id: *user_id,
            kind: kind.to_string(),
            payload: payload.clone(),
            is_read: false,
            created_at: now,
        });
    }

    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipients_are_deduplicated() {
        let actor = Uuid::new_v4();
        let other = Uuid::new_v4();
        assert_eq!(recipients(actor, Some(actor)), vec![actor]);
        assert_eq!(recipients(actor, Some(other)), vec![actor, other]);
        assert_eq!(recipients(actor, None), vec![actor]);
    }
}
