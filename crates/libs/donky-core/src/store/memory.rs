use crate::error::DonkyError;
use crate::notification::OutboundNotification;
use crate::store::NotificationQueueStore;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// In-memory outbound queue for tests and hosts that bring their own
/// durability. FIFO by insertion order; ties in `created_at` keep the
/// order they arrived.
#[derive(Default)]
pub struct MemoryQueueStore {
    items: Mutex<VecDeque<OutboundNotification>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationQueueStore for MemoryQueueStore {
    async fn insert(&self, notification: OutboundNotification) -> Result<(), DonkyError> {
        let mut items = self.items.lock().expect("queue mutex poisoned");
        items.retain(|existing| existing.id != notification.id);
        items.push_back(notification);
        Ok(())
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<OutboundNotification>, DonkyError> {
        let items = self.items.lock().expect("queue mutex poisoned");
        let mut batch: Vec<_> = items.iter().cloned().collect();
        batch.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        batch.truncate(limit);
        Ok(batch)
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<(), DonkyError> {
        let mut items = self.items.lock().expect("queue mutex poisoned");
        items.retain(|existing| !ids.contains(&existing.id));
        Ok(())
    }

    async fn pending_count(&self) -> Result<usize, DonkyError> {
        Ok(self.items.lock().expect("queue mutex poisoned").len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn insert_is_idempotent_per_id() {
        let store = MemoryQueueStore::new();
        let notification = OutboundNotification::new("Event", json!({ "n": 1 }));
        store.insert(notification.clone()).await.expect("insert");
        store.insert(notification).await.expect("insert again");
        assert_eq!(store.pending_count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn delete_unknown_ids_is_a_no_op() {
        let store = MemoryQueueStore::new();
        store
            .insert(OutboundNotification::new("Event", json!({})))
            .await
            .expect("insert");
        store.delete_by_ids(&["missing".to_owned()]).await.expect("delete");
        assert_eq!(store.pending_count().await.expect("count"), 1);
    }
}
