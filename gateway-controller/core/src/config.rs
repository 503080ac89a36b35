use std::time::Duration;

pub const DEFAULT_ROUTE_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_PER_TRY_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CLUSTER_TIMEOUT: Duration = Duration::from_secs(30);

/// The proxy configuration computed from a set of ingresses and secrets.
///
/// Every virtual host is paired with exactly one cluster named by its
/// `upstream_cluster`. Use [`Configuration::equals`] to compare
/// configurations irrespective of ordering.
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub virtual_hosts: Vec<VirtualHost>,
    pub clusters: Vec<Cluster>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VirtualHost {
    pub host: String,
    pub upstream_cluster: String,
    pub timeout: Duration,
    pub per_try_timeout: Duration,
    pub tls_key: String,
    pub tls_cert: String,
}

/// An upstream cluster. `hosts` is compared as a multiset.
#[derive(Clone, Debug, Eq)]
pub struct Cluster {
    pub name: String,
    pub virtual_host: String,
    pub health_check_path: String,
    pub timeout: Duration,
    pub hosts: Vec<String>,
}

// === impl Configuration ===

impl Configuration {
    /// Compares this configuration against a previously computed one,
    /// returning whether the virtual hosts and the clusters match.
    pub fn equals(&self, other: Option<&Configuration>) -> (bool, bool) {
        match other {
            None => (false, false),
            Some(other) => (
                virtual_hosts_equal(&self.virtual_hosts, &other.virtual_hosts),
                clusters_equal(&self.clusters, &other.clusters),
            ),
        }
    }

    pub fn virtual_host(&self, host: &str) -> Option<&VirtualHost> {
        self.virtual_hosts.iter().find(|v| v.host == host)
    }

    pub fn cluster(&self, name: &str) -> Option<&Cluster> {
        self.clusters.iter().find(|c| c.name == name)
    }
}

// === impl VirtualHost ===

impl VirtualHost {
    /// Derives the name of the cluster serving `host`.
    pub fn cluster_name(host: &str) -> String {
        host.replace('.', "_")
    }

    pub fn new(host: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            upstream_cluster: Self::cluster_name(&host),
            host,
            timeout: DEFAULT_ROUTE_TIMEOUT,
            per_try_timeout: DEFAULT_PER_TRY_TIMEOUT,
            tls_key: String::new(),
            tls_cert: String::new(),
        }
    }
}

// === impl Cluster ===

impl Cluster {
    pub fn new(host: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            name: VirtualHost::cluster_name(&host),
            virtual_host: host,
            health_check_path: String::new(),
            timeout: DEFAULT_CLUSTER_TIMEOUT,
            hosts: Vec::new(),
        }
    }

    fn sorted_hosts(&self) -> Vec<&str> {
        let mut hosts = self.hosts.iter().map(String::as_str).collect::<Vec<_>>();
        hosts.sort_unstable();
        hosts
    }
}

impl PartialEq for Cluster {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.timeout == other.timeout
            && self.virtual_host == other.virtual_host
            && self.health_check_path == other.health_check_path
            && self.hosts.len() == other.hosts.len()
            && self.sorted_hosts() == other.sorted_hosts()
    }
}

/// Compares two lists of virtual hosts irrespective of their order.
pub fn virtual_hosts_equal(a: &[VirtualHost], b: &[VirtualHost]) -> bool {
    sorted_equal(a, b, |v| v.host.as_str())
}

/// Compares two lists of clusters irrespective of their order.
pub fn clusters_equal(a: &[Cluster], b: &[Cluster]) -> bool {
    sorted_equal(a, b, |c| c.name.as_str())
}

fn sorted_equal<T: PartialEq>(a: &[T], b: &[T], id: impl Fn(&T) -> &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut a = a.iter().collect::<Vec<_>>();
    let mut b = b.iter().collect::<Vec<_>>();
    a.sort_by(|x, y| id(x).cmp(id(y)));
    b.sort_by(|x, y| id(x).cmp(id(y)));
    a.into_iter().zip(b).all(|(x, y)| x == y)
}
