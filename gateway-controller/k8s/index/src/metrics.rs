use crate::aggregator::Notification;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

/// Describes the ingresses and configuration seen by the last translation.
#[derive(Clone, Debug, Default)]
pub struct TranslateMetrics {
    matching_ingresses: Gauge,
    virtual_hosts: Gauge,
    clusters: Gauge,
}

/// Describes the watches feeding an aggregator.
#[derive(Clone, Debug, Default)]
pub struct AggregatorMetrics {
    events: Family<EventLabels, Counter>,
    sources: Gauge,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct EventLabels {
    change: &'static str,
}

// === impl TranslateMetrics ===

impl TranslateMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let matching_ingresses = Gauge::default();
        prom.register(
            "ingresses_matching",
            "Gauge of the number of ingresses matching the configured ingress classes",
            matching_ingresses.clone(),
        );

        let virtual_hosts = Gauge::default();
        prom.register(
            "virtual_hosts",
            "Gauge of the number of virtual hosts in the last configuration",
            virtual_hosts.clone(),
        );

        let clusters = Gauge::default();
        prom.register(
            "clusters",
            "Gauge of the number of clusters in the last configuration",
            clusters.clone(),
        );

        Self {
            matching_ingresses,
            virtual_hosts,
            clusters,
        }
    }

    pub(crate) fn set_matching_ingresses(&self, n: usize) {
        self.matching_ingresses.set(n as i64);
    }

    pub(crate) fn set_configuration(&self, virtual_hosts: usize, clusters: usize) {
        self.virtual_hosts.set(virtual_hosts as i64);
        self.clusters.set(clusters as i64);
    }

    pub fn matching_ingresses(&self) -> i64 {
        self.matching_ingresses.get()
    }

    pub fn virtual_hosts(&self) -> i64 {
        self.virtual_hosts.get()
    }

    pub fn clusters(&self) -> i64 {
        self.clusters.get()
    }
}

// === impl AggregatorMetrics ===

impl AggregatorMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let events = Family::default();
        prom.register(
            "events",
            "Count of changes observed across all watches",
            events.clone(),
        );

        let sources = Gauge::default();
        prom.register("sources", "Gauge of the number of watches", sources.clone());

        Self { events, sources }
    }

    pub(crate) fn observe(&self, notification: Notification) {
        self.events
            .get_or_create(&EventLabels {
                change: notification.as_str(),
            })
            .inc();
    }

    pub(crate) fn set_sources(&self, n: usize) {
        self.sources.set(n as i64);
    }

    pub fn events(&self, notification: Notification) -> u64 {
        self.events
            .get_or_create(&EventLabels {
                change: notification.as_str(),
            })
            .get()
    }

    pub fn sources(&self) -> i64 {
        self.sources.get()
    }
}
