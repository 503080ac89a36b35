use crate::translate::{valid_ingress_filter, Translator};
use gateway_controller_core::{Configurator, Snapshot};
use gateway_controller_k8s_api::{Ingress, Secret};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tracing::debug;

/// Generates snapshots for a single proxy node from Kubernetes resources.
#[derive(Debug)]
pub struct KubernetesConfigurator {
    node_id: String,
    translator: Translator,
    version: AtomicU64,
}

impl KubernetesConfigurator {
    pub fn new(node_id: impl Into<String>, translator: Translator) -> Self {
        Self {
            node_id: node_id.into(),
            translator,
            version: AtomicU64::new(0),
        }
    }
}

impl Configurator for KubernetesConfigurator {
    fn generate(&self, ingresses: &[Arc<Ingress>], secrets: &[Arc<Secret>]) -> Snapshot {
        let ingresses = valid_ingress_filter(self.translator.class_filter(ingresses));
        let configuration = self.translator.translate(&ingresses, secrets);
        let version = self.version.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            version,
            ingresses = ingresses.len(),
            virtual_hosts = configuration.virtual_hosts.len(),
            clusters = configuration.clusters.len(),
            "Generated snapshot"
        );
        Snapshot {
            version,
            configuration: Arc::new(configuration),
        }
    }

    fn node_id(&self) -> &str {
        &self.node_id
    }
}
