/// Account lifecycle notifications
///
/// Published after the registering transaction commits. Delivery guarantees
/// belong to the publisher; the service never waits on subscribers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

pub const ACCOUNT_CREATED: &str = "AccountCreated";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountCreated {
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    /// Request id of the registration that produced the event
    pub trace_id: String,
    pub payload: AccountCreatedPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountCreatedPayload {
    pub account_id: Uuid,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl AccountCreated {
    pub fn new(
        account_id: Uuid,
        email: &str,
        created_at: DateTime<Utc>,
        trace_id: &str,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: ACCOUNT_CREATED.to_string(),
            occurred_at,
            trace_id: trace_id.to_string(),
            payload: AccountCreatedPayload {
                account_id,
                email: email.to_string(),
                created_at,
            },
        }
    }
}

pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: AccountCreated);
}

/// Fans events out to every live subscriber. Events published while no one
/// is subscribed are dropped.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<AccountCreated>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AccountCreated> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, event: AccountCreated) {
        let account_id = event.payload.account_id;
        match self.sender.send(event) {
            Ok(receivers) => {
                tracing::debug!(account_id = %account_id, receivers, "AccountCreated published")
            }
            Err(_) => tracing::debug!(account_id = %account_id, "AccountCreated had no subscribers"),
        }
    }
}

/// Logs every event until the publisher goes away
pub async fn log_account_events(mut receiver: broadcast::Receiver<AccountCreated>) {
    loop {
        match receiver.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => tracing::info!(
                    trace_id = %event.trace_id,
                    event = %json,
                    "Account event"
                ),
                Err(e) => tracing::error!(error = %e, "Failed to serialize account event"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Account event subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
