//! Gateway controller indexes
//!
//! Watches the cluster resources that determine the proxy configuration and
//! folds them into a [`Configuration`](gateway_controller_core::Configuration):
//!
//! - Each `Ingress` whose class is served by this controller contributes its
//!   rule hosts as virtual hosts, and its load balancer endpoints as upstreams
//!   of the cluster paired with each host.
//! - Each `Secret` of type `kubernetes.io/tls` may be bound to a host by an
//!   ingress's TLS section, supplying the certificate and key served for it.
//!
//! ```text
//! [ watch ]* -> [ Aggregator<Ingress> ] --\
//!                                          >-- [ Translator ] -> Configuration
//! [ watch ]* -> [ Aggregator<Secret>  ] --/
//! ```
//!
//! An aggregator may be fed by several watches (e.g. one per cluster). It
//! emits content-free notifications; consumers re-list to observe state.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod aggregator;
mod configurator;
pub mod metrics;
pub mod translate;


pub use self::{
    aggregator::{
        AggregatedResource, Aggregator, Error, Events, IngressAggregator, Notification,
        SecretsAggregator,
    },
    configurator::KubernetesConfigurator,
    metrics::{AggregatorMetrics, TranslateMetrics},
    translate::{valid_ingress_filter, Translator},
};
