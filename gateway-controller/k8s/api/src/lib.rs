#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod annotations;
pub mod duration;
pub mod tls;

pub use self::duration::GoDuration;
pub use k8s_openapi::{
    api::{
        core::v1::Secret,
        networking::v1::{
            Ingress, IngressLoadBalancerIngress, IngressLoadBalancerStatus, IngressRule,
            IngressSpec, IngressStatus, IngressTLS,
        },
    },
    ByteString,
};
pub use kube::{
    api::{Api, ObjectMeta, ResourceExt},
    runtime::watcher,
    Client, Resource,
};

/// Returns the value of the named annotation, treating an empty value as
/// absent.
pub fn annotation<'r, R: ResourceExt>(resource: &'r R, key: &str) -> Option<&'r str> {
    resource
        .annotations()
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}
