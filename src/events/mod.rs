use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::errors::AppResult;
use crate::models::notification::Notification;

pub mod audit;
pub mod loggable;
pub mod notify;

pub use loggable::Loggable;

pub const NOTIFICATION_EVENT: &str = "notification.committed";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent<T> {
    pub id: Uuid,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
    pub payload: T,
}

impl<T> DomainEvent<T> {
    pub fn new(name: impl Into<String>, actor_id: Option<Uuid>, subject_id: Option<Uuid>, payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            occurred_at: Utc::now(),
            actor_id,
            subject_id,
            payload,
        }
    }
}

pub type EventBus = broadcast::Sender<Value>;

pub fn init_event_bus() -> (EventBus, broadcast::Receiver<Value>) {
    broadcast::channel(1024)
}

/// Publishes notifications that were committed with a transition.
///
/// Delivery is fire and forget: the transition already succeeded, so a bus
/// without listeners is not an error.
pub fn publish_notifications(bus: &EventBus, actor_id: Uuid, notifications: &[Notification]) {
    for notification in notifications {
        let event = DomainEvent::new(NOTIFICATION_EVENT, Some(actor_id), Some(notification.id), notification);
        match serde_json::to_value(&event) {
            Ok(value) => {
                if bus.send(value).is_err() {
                    tracing::debug!(kind = %notification.kind, "no notification listener attached");
                }
            }
            Err(err) => tracing::warn!(error = %err, "failed to encode notification event"),
        }
    }
}

/// Outbound delivery channel (push, e-mail, websocket...).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> AppResult<()>;
}

/// Default sink: records deliveries in the log only.
#[derive(Debug, Clone, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, notification: &Notification) -> AppResult<()> {
        tracing::info!(
            user_id = %notification.user_id,
            kind = %notification.kind,
            payload = %notification.payload,
            "notification delivered"
        );
        Ok(())
    }
}

pub async fn start_notification_listener(mut rx: broadcast::Receiver<Value>, sink: Arc<dyn NotificationSink>) {
    tracing::info!("Notification listener started");
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "notification listener lagged behind");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let event: DomainEvent<Notification> = match serde_json::from_value(event) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, "ignoring malformed bus event");
                continue;
            }
        };
        if event.name != NOTIFICATION_EVENT {
            continue;
        }

        if let Err(err) = sink.deliver(&event.payload).await {
            tracing::warn!(
                notification_id = %event.payload.id,
                error = %err,
                "notification delivery failed"
            );
        }
    }
    tracing::info!("Notification listener stopped");
}
