//! Durable queue of pending outbound notifications.

mod memory;
mod sqlite;

pub use memory::MemoryQueueStore;
pub use sqlite::SqliteQueueStore;

use crate::error::DonkyError;
use crate::notification::OutboundNotification;
use async_trait::async_trait;

/// Persistence contract backing the outbound queue.
///
/// The engine claims a batch with `list_pending` + `delete_by_ids` at
/// cycle start and re-inserts it on transport failure, so `delete_by_ids`
/// must remove the whole batch atomically; a partial removal would break
/// the retry invariant.
#[async_trait]
pub trait NotificationQueueStore: Send + Sync {
    async fn insert(&self, notification: OutboundNotification) -> Result<(), DonkyError>;

    /// Oldest-first batch of pending notifications, at most `limit`.
    async fn list_pending(&self, limit: usize) -> Result<Vec<OutboundNotification>, DonkyError>;

    /// Removes every listed id in one atomic step.
    async fn delete_by_ids(&self, ids: &[String]) -> Result<(), DonkyError>;

    async fn pending_count(&self) -> Result<usize, DonkyError>;
}
