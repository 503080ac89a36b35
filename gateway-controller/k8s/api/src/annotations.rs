//! Annotation keys read from `Ingress` resources.

/// Selects the controller responsible for an ingress.
pub const INGRESS_CLASS: &str = "kubernetes.io/ingress.class";

/// Overrides the health check path of the upstream cluster.
pub const HEALTHCHECK_PATH: &str = "yggdrasil.uswitch.com/healthcheck-path";

/// Overrides the route, per-try and cluster timeouts with a single duration.
pub const TIMEOUT: &str = "yggdrasil.uswitch.com/timeout";
