//! Registry of pending one-shot `turn_end` subscriptions.

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::ipc::connection::ConnectionHandle;

/// A pending subscription bound to a live connection.
#[derive(Debug, Clone)]
pub struct Subscription {
    /// Id carried by the event when it fires.
    pub subscription_id: String,
    /// Connection the event is pushed to.
    pub connection: ConnectionHandle,
}

/// In-memory list of pending subscriptions.
///
/// Entries leave the registry exactly once: when a broadcast takes them,
/// when their connection closes, or when the endpoint is torn down.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<Vec<Subscription>>,
}

impl SubscriptionRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription for `connection`.
    pub async fn register(&self, connection: ConnectionHandle, subscription_id: String) {
        self.entries.lock().await.push(Subscription {
            subscription_id,
            connection,
        });
    }

    /// Drop every subscription owned by `connection_id`; returns how many.
    pub async fn remove_connection(&self, connection_id: u64) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|sub| sub.connection.id() != connection_id);
        before - entries.len()
    }

    /// Snapshot and remove every subscription.
    pub async fn take_all(&self) -> Vec<Subscription> {
        std::mem::take(&mut *self.entries.lock().await)
    }

    /// Number of pending subscriptions.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether no subscription is pending.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

/// Collision-resistant subscription id for clients that did not supply one.
#[must_use]
pub fn generate_subscription_id() -> String {
    format!("sub_{}", Uuid::new_v4().simple())
}
