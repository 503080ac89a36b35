use crate::Configuration;
use anyhow::Result;
use gateway_controller_k8s_api::{Ingress, Secret};
use std::sync::Arc;

/// A versioned configuration, as handed to the serving cache.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub version: u64,
    pub configuration: Arc<Configuration>,
}

/// Builds snapshots from the cluster's current ingresses and secrets.
pub trait Configurator {
    fn generate(&self, ingresses: &[Arc<Ingress>], secrets: &[Arc<Secret>]) -> Snapshot;

    /// Identifies the proxy node that generated snapshots are published for.
    fn node_id(&self) -> &str;
}

/// Serves the latest snapshot of each node to the proxy fleet.
pub trait SnapshotCache {
    fn set_snapshot(&self, node_id: &str, snapshot: Snapshot) -> Result<()>;
}

impl<C: Configurator + ?Sized> Configurator for Arc<C> {
    fn generate(&self, ingresses: &[Arc<Ingress>], secrets: &[Arc<Secret>]) -> Snapshot {
        (**self).generate(ingresses, secrets)
    }

    fn node_id(&self) -> &str {
        (**self).node_id()
    }
}

impl<S: SnapshotCache + ?Sized> SnapshotCache for Arc<S> {
    fn set_snapshot(&self, node_id: &str, snapshot: Snapshot) -> Result<()> {
        (**self).set_snapshot(node_id, snapshot)
    }
}
