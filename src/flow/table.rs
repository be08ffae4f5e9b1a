//! Concurrent flow table
//!
//! Maps [`FlowKey`] to the live [`Connection`] serving it. The table is the
//! only structure mutated by multiple tasks; insert-if-absent semantics
//! guarantee at most one connection per flow even when duplicate packets
//! are dispatched concurrently.

use super::{Connection, FlowKey};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Concurrent map of active flows
#[derive(Default)]
pub struct FlowTable {
    /// Active connections keyed by flow
    entries: Mutex<HashMap<FlowKey, Arc<Connection>>>,
}

impl FlowTable {
    /// Create an empty flow table
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically return the existing connection for `key` or construct one
    /// via `factory`.
    ///
    /// The boolean is `true` when the factory ran; it runs at most once per
    /// key even under concurrent calls, because the map lock is held across
    /// the lookup and insert.
    pub async fn get_or_insert<F>(&self, key: FlowKey, factory: F) -> (Arc<Connection>, bool)
    where
        F: FnOnce() -> Arc<Connection>,
    {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.get(&key) {
            return (existing.clone(), false);
        }
        let conn = factory();
        entries.insert(key, conn.clone());
        (conn, true)
    }

    /// Look up the connection for `key`, if any
    pub async fn get(&self, key: &FlowKey) -> Option<Arc<Connection>> {
        self.entries.lock().await.get(key).cloned()
    }

    /// Delete and return the entry for `key`. Idempotent: a second call for
    /// the same key returns `None` without error.
    pub async fn remove(&self, key: &FlowKey) -> Option<Arc<Connection>> {
        self.entries.lock().await.remove(key)
    }

    /// Remove and return every tracked connection (used on engine stop)
    pub async fn drain(&self) -> Vec<Arc<Connection>> {
        self.entries.lock().await.drain().map(|(_, c)| c).collect()
    }

    /// Number of active flows
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the table holds no flows
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

impl std::fmt::Debug for FlowTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowTable").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::PAYLOAD_QUEUE_SIZE;
    use crate::packet::Protocol;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn test_key(port: u16) -> FlowKey {
        FlowKey::new(Protocol::Tcp, Ipv4Addr::new(93, 184, 216, 34), port)
    }

    fn test_connection(key: FlowKey) -> Arc<Connection> {
        let (tx, _rx) = mpsc::channel(PAYLOAD_QUEUE_SIZE);
        Arc::new(Connection::new(key, tx))
    }

    #[tokio::test]
    async fn test_get_or_insert_creates_once() {
        let table = FlowTable::new();
        let key = test_key(443);

        let (first, inserted) = table.get_or_insert(key, || test_connection(key)).await;
        assert!(inserted);

        let (second, inserted) = table.get_or_insert(key, || test_connection(key)).await;
        assert!(!inserted);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn test_factory_runs_at_most_once_under_concurrency() {
        let table = Arc::new(FlowTable::new());
        let key = test_key(443);
        let factory_runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let table = table.clone();
            let factory_runs = factory_runs.clone();
            handles.push(tokio::spawn(async move {
                table
                    .get_or_insert(key, || {
                        factory_runs.fetch_add(1, Ordering::SeqCst);
                        test_connection(key)
                    })
                    .await
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(factory_runs.load(Ordering::SeqCst), 1);
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let table = FlowTable::new();
        let key = test_key(80);

        table.get_or_insert(key, || test_connection(key)).await;

        assert!(table.remove(&key).await.is_some());
        assert!(table.remove(&key).await.is_none());
        assert!(table.remove(&key).await.is_none());
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn test_distinct_keys_coexist() {
        let table = FlowTable::new();
        for port in [80, 443, 8080] {
            let key = test_key(port);
            table.get_or_insert(key, || test_connection(key)).await;
        }
        assert_eq!(table.len().await, 3);
    }

    #[tokio::test]
    async fn test_drain_empties_table() {
        let table = FlowTable::new();
        for port in [80, 443] {
            let key = test_key(port);
            table.get_or_insert(key, || test_connection(key)).await;
        }

        let drained = table.drain().await;
        assert_eq!(drained.len(), 2);
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn test_get_finds_inserted_entry() {
        let table = FlowTable::new();
        let key = test_key(22);
        assert!(table.get(&key).await.is_none());

        table.get_or_insert(key, || test_connection(key)).await;
        assert!(table.get(&key).await.is_some());
    }
}
