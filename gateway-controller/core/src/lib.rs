#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod config;
mod snapshot;

pub use self::{
    config::{
        clusters_equal, virtual_hosts_equal, Cluster, Configuration, VirtualHost,
        DEFAULT_CLUSTER_TIMEOUT, DEFAULT_PER_TRY_TIMEOUT, DEFAULT_ROUTE_TIMEOUT,
    },
    snapshot::{Configurator, Snapshot, SnapshotCache},
};
