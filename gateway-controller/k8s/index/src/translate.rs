use crate::metrics::TranslateMetrics;
use gateway_controller_core::{Cluster, Configuration, VirtualHost};
use gateway_controller_k8s_api::{
    self as k8s, annotations, tls, GoDuration, Ingress, ResourceExt, Secret,
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};
use tracing::{debug, warn};

/// Translates ingresses and TLS secrets into a proxy [`Configuration`].
///
/// Translation never fails: malformed annotations and missing secrets are
/// logged and the affected host keeps its defaults.
#[derive(Clone, Debug)]
pub struct Translator {
    ingress_classes: Vec<String>,
    metrics: TranslateMetrics,
}

/// The secret bound to a host by an ingress's TLS section.
#[derive(Clone, Debug, PartialEq, Eq)]
struct VhostSecretRef {
    secret_name: String,
    secret_namespace: String,
}

struct HostConfig {
    vhost: VirtualHost,
    cluster: Cluster,
}

// === impl Translator ===

impl Translator {
    pub fn new(ingress_classes: Vec<String>, metrics: TranslateMetrics) -> Self {
        Self {
            ingress_classes,
            metrics,
        }
    }

    /// Retains the ingresses whose class is served by this controller.
    ///
    /// The class is read from the `kubernetes.io/ingress.class` annotation,
    /// falling back to `spec.ingressClassName`.
    pub fn class_filter(&self, ingresses: &[Arc<Ingress>]) -> Vec<Arc<Ingress>> {
        let matching = ingresses
            .iter()
            .filter(|ingress| {
                ingress_class(ingress)
                    .is_some_and(|class| self.ingress_classes.iter().any(|c| c == class))
            })
            .cloned()
            .collect::<Vec<_>>();
        self.metrics.set_matching_ingresses(matching.len());
        matching
    }

    /// Builds a configuration with one virtual host and one cluster per
    /// distinct rule host.
    ///
    /// Every (ingress, load balancer endpoint, rule) contributes the endpoint
    /// as an upstream of the rule host's cluster. Annotation overrides are
    /// applied in input order, so the last contributing ingress wins.
    pub fn translate(&self, ingresses: &[Arc<Ingress>], secrets: &[Arc<Secret>]) -> Configuration {
        let mut hosts = BTreeMap::<String, HostConfig>::new();
        let mut secret_refs = HashMap::<String, VhostSecretRef>::new();

        for ingress in ingresses {
            let health_check_path = k8s::annotation(&**ingress, annotations::HEALTHCHECK_PATH);
            let timeout = timeout_override(ingress);

            for upstream in load_balancer_endpoints(ingress) {
                for host in rule_hosts(ingress) {
                    let config = hosts
                        .entry(host.to_string())
                        .or_insert_with(|| HostConfig::new(host));
                    config.cluster.hosts.push(upstream.to_string());

                    if let Some(secret_ref) = tls_secret_ref(ingress, host) {
                        secret_refs.insert(host.to_string(), secret_ref);
                    }
                    if let Some(path) = health_check_path {
                        config.cluster.health_check_path = path.to_string();
                    }
                    if let Some(timeout) = timeout {
                        config.set_timeout(timeout);
                    }
                }
            }
        }

        let mut configuration = Configuration::default();
        for (host, HostConfig { mut vhost, cluster }) in hosts {
            match secret_refs.get(&host) {
                Some(secret_ref) => inject_tls(&mut vhost, secret_ref, secrets),
                None => debug!(%host, "No TLS secret bound to host"),
            }
            configuration.virtual_hosts.push(vhost);
            configuration.clusters.push(cluster);
        }

        self.metrics.set_configuration(
            configuration.virtual_hosts.len(),
            configuration.clusters.len(),
        );
        configuration
    }
}

/// Retains the ingresses that have been assigned a load balancer endpoint and
/// route at least one host.
pub fn valid_ingress_filter(ingresses: Vec<Arc<Ingress>>) -> Vec<Arc<Ingress>> {
    ingresses
        .into_iter()
        .filter(|ingress| {
            if load_balancer_endpoints(ingress).next().is_none() {
                debug!(
                    ns = ?ingress.namespace(),
                    name = %ingress.name_any(),
                    "No load balancer hostname or IP found for ingress"
                );
                return false;
            }
            if rule_hosts(ingress).next().is_none() {
                debug!(
                    ns = ?ingress.namespace(),
                    name = %ingress.name_any(),
                    "No host found in ingress rules"
                );
                return false;
            }
            true
        })
        .collect()
}

fn ingress_class(ingress: &Ingress) -> Option<&str> {
    k8s::annotation(ingress, annotations::INGRESS_CLASS)
        .or_else(|| ingress.spec.as_ref()?.ingress_class_name.as_deref())
}

/// Returns the hostname, or else the IP, of each assigned load balancer
/// endpoint.
fn load_balancer_endpoints(ingress: &Ingress) -> impl Iterator<Item = &str> + '_ {
    ingress
        .status
        .iter()
        .flat_map(|status| status.load_balancer.iter())
        .flat_map(|lb| lb.ingress.iter().flatten())
        .filter_map(|endpoint| {
            non_empty(endpoint.hostname.as_deref()).or_else(|| non_empty(endpoint.ip.as_deref()))
        })
}

fn rule_hosts(ingress: &Ingress) -> impl Iterator<Item = &str> + '_ {
    ingress
        .spec
        .iter()
        .flat_map(|spec| spec.rules.iter().flatten())
        .filter_map(|rule| non_empty(rule.host.as_deref()))
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}

fn timeout_override(ingress: &Ingress) -> Option<Duration> {
    let value = k8s::annotation(ingress, annotations::TIMEOUT)?;
    match value.parse::<GoDuration>() {
        Ok(timeout) => {
            let timeout = timeout.non_negative();
            if timeout.is_none() {
                warn!(
                    ns = ?ingress.namespace(),
                    name = %ingress.name_any(),
                    %value,
                    "Ignoring negative timeout"
                );
            }
            timeout
        }
        Err(error) => {
            warn!(
                ns = ?ingress.namespace(),
                name = %ingress.name_any(),
                %value,
                %error,
                "Ignoring invalid timeout"
            );
            None
        }
    }
}

/// Finds the first TLS section of the ingress that lists `host`.
fn tls_secret_ref(ingress: &Ingress, host: &str) -> Option<VhostSecretRef> {
    let tls = ingress
        .spec
        .as_ref()?
        .tls
        .iter()
        .flatten()
        .find(|tls| tls.hosts.iter().flatten().any(|h| h == host))?;
    Some(VhostSecretRef {
        secret_name: tls.secret_name.clone().unwrap_or_default(),
        secret_namespace: ingress.namespace().unwrap_or_default(),
    })
}

/// Copies the certificate and key of the referenced secret onto the virtual
/// host. The material is not validated.
fn inject_tls(vhost: &mut VirtualHost, secret_ref: &VhostSecretRef, secrets: &[Arc<Secret>]) {
    let VhostSecretRef {
        secret_name,
        secret_namespace,
    } = secret_ref;

    let candidates = secrets.iter().filter(|secret| {
        secret.metadata.namespace.as_deref() == Some(secret_namespace.as_str())
            && secret.metadata.name.as_deref() == Some(secret_name.as_str())
    });
    for secret in candidates {
        let data = secret.data.as_ref();
        let cert = data.and_then(|d| d.get(tls::CERT_KEY));
        let key = data.and_then(|d| d.get(tls::PRIVATE_KEY_KEY));
        if let (Some(cert), Some(key)) = (cert, key) {
            vhost.tls_cert = String::from_utf8_lossy(&cert.0).into_owned();
            vhost.tls_key = String::from_utf8_lossy(&key.0).into_owned();
            return;
        }
        debug!(ns = %secret_namespace, name = %secret_name, "Secret is missing tls.crt or tls.key");
    }

    warn!(
        host = %vhost.host,
        ns = %secret_namespace,
        name = %secret_name,
        "No valid TLS secret found for host"
    );
}

// === impl HostConfig ===

impl HostConfig {
    fn new(host: &str) -> Self {
        Self {
            vhost: VirtualHost::new(host),
            cluster: Cluster::new(host),
        }
    }

    /// A timeout override replaces the route, per-try and cluster timeouts
    /// alike.
    fn set_timeout(&mut self, timeout: Duration) {
        self.vhost.timeout = timeout;
        self.vhost.per_try_timeout = timeout;
        self.cluster.timeout = timeout;
    }
}
