use crate::core::{Snapshot, SnapshotCache};
use anyhow::Result;
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::watch;

/// Holds the latest snapshot of each node for a serving layer to stream to
/// proxies.
#[derive(Clone, Debug, Default)]
pub struct MemorySnapshotCache {
    nodes: Arc<RwLock<HashMap<String, watch::Sender<Option<Snapshot>>>>>,
}

impl MemorySnapshotCache {
    /// Watches the snapshots published for `node_id`. The receiver observes
    /// `None` until a snapshot has been set.
    pub fn watch(&self, node_id: &str) -> watch::Receiver<Option<Snapshot>> {
        if let Some(tx) = self.nodes.read().get(node_id) {
            return tx.subscribe();
        }
        self.nodes
            .write()
            .entry(node_id.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    pub fn get(&self, node_id: &str) -> Option<Snapshot> {
        self.nodes.read().get(node_id)?.borrow().clone()
    }
}

impl SnapshotCache for MemorySnapshotCache {
    fn set_snapshot(&self, node_id: &str, snapshot: Snapshot) -> Result<()> {
        let mut nodes = self.nodes.write();
        let tx = nodes
            .entry(node_id.to_string())
            .or_insert_with(|| watch::channel(None).0);

        // Watchers are not woken when the same version is set again.
        tx.send_if_modified(|current| {
            if current.as_ref().map(|s| s.version) == Some(snapshot.version) {
                return false;
            }
            *current = Some(snapshot);
            true
        });
        Ok(())
    }
}
