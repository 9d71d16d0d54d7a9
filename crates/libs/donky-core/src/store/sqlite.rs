use crate::error::DonkyError;
use crate::notification::OutboundNotification;
use crate::store::NotificationQueueStore;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde_json::Value as JsonValue;
use std::path::Path;
use tokio::sync::Mutex;

/// Sqlite-backed outbound queue.
///
/// The connection is serialised behind an async mutex; every store call
/// is a short statement or transaction, so contention stays negligible.
pub struct SqliteQueueStore {
    conn: Mutex<Connection>,
}

impl SqliteQueueStore {
    pub fn in_memory() -> Result<Self, DonkyError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open(path: &Path) -> Result<Self, DonkyError> {
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

fn init_schema(conn: &Connection) -> Result<(), DonkyError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS outbound_notifications (
            id TEXT PRIMARY KEY,
            type TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_outbound_created
            ON outbound_notifications (created_at);",
    )?;
    Ok(())
}

fn parse_payload(raw: &str) -> JsonValue {
    serde_json::from_str(raw).unwrap_or(JsonValue::Null)
}

#[async_trait]
impl NotificationQueueStore for SqliteQueueStore {
    async fn insert(&self, notification: OutboundNotification) -> Result<(), DonkyError> {
        let payload = serde_json::to_string(&notification.payload)
            .map_err(|err| DonkyError::storage(err.to_string()))?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO outbound_notifications (id, type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                &notification.id,
                &notification.notification_type,
                payload,
                notification.created_at
            ],
        )?;
        Ok(())
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<OutboundNotification>, DonkyError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, type, payload, created_at FROM outbound_notifications
             ORDER BY created_at ASC, rowid ASC LIMIT ?1",
        )?;
        let mut rows = stmt.query(params![limit as i64])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let payload: String = row.get(2)?;
            records.push(OutboundNotification {
                id: row.get(0)?,
                notification_type: row.get(1)?,
                payload: parse_payload(&payload),
                created_at: row.get(3)?,
            });
        }
        Ok(records)
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<(), DonkyError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM outbound_notifications WHERE id = ?1")?;
            for id in ids {
                stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn pending_count(&self) -> Result<usize, DonkyError> {
        let conn = self.conn.lock().await;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM outbound_notifications", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn notification(id: &str, created_at: i64) -> OutboundNotification {
        OutboundNotification {
            id: id.to_owned(),
            notification_type: "MessageRead".to_owned(),
            payload: json!({ "messageId": id }),
            created_at,
        }
    }

    #[tokio::test]
    async fn lists_oldest_first_and_honours_limit() {
        let store = SqliteQueueStore::in_memory().expect("open");
        store.insert(notification("b", 20)).await.expect("insert");
        store.insert(notification("a", 10)).await.expect("insert");
        store.insert(notification("c", 30)).await.expect("insert");

        let batch = store.list_pending(2).await.expect("list");
        let ids: Vec<_> = batch.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[tokio::test]
    async fn batch_delete_removes_exactly_the_listed_ids() {
        let store = SqliteQueueStore::in_memory().expect("open");
        for (id, ts) in [("x", 1), ("y", 2), ("z", 3)] {
            store.insert(notification(id, ts)).await.expect("insert");
        }

        store.delete_by_ids(&["x".to_owned(), "z".to_owned()]).await.expect("delete");
        let remaining = store.list_pending(10).await.expect("list");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "y");
        assert_eq!(store.pending_count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn reinserted_batch_survives_for_the_next_cycle() {
        let store = SqliteQueueStore::in_memory().expect("open");
        store.insert(notification("n1", 5)).await.expect("insert");

        let claimed = store.list_pending(10).await.expect("list");
        store
            .delete_by_ids(&claimed.iter().map(|n| n.id.clone()).collect::<Vec<_>>())
            .await
            .expect("delete");
        assert_eq!(store.pending_count().await.expect("count"), 0);

        for item in claimed {
            store.insert(item).await.expect("reinsert");
        }
        let retried = store.list_pending(10).await.expect("list");
        assert_eq!(retried.len(), 1);
        assert_eq!(retried[0].payload["messageId"], "n1");
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("queue.db");
        {
            let store = SqliteQueueStore::open(&path).expect("open");
            store.insert(notification("durable", 7)).await.expect("insert");
        }
        let store = SqliteQueueStore::open(&path).expect("reopen");
        let pending = store.list_pending(10).await.expect("list");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "durable");
    }
}
