use crate::{
    core::{Configuration, Configurator, SnapshotCache},
    index::{Events, IngressAggregator, SecretsAggregator},
};
use anyhow::{Context, Result};
use prometheus_client::{metrics::counter::Counter, registry::Registry};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, trace, warn, Instrument};

/// Publishes a new snapshot to the cache whenever the ingresses change.
///
/// Passes run one at a time on a single task. Notifications that arrive
/// while a pass is running are held by the aggregators, so a burst of changes
/// results in at least one pass after the current one completes.
pub struct Snapshotter<C, S> {
    configurator: C,
    cache: S,
    ingresses: Arc<IngressAggregator>,
    ingress_events: Events,
    secrets: Arc<SecretsAggregator>,
    secret_events: Events,
    secret_triggers: bool,
    skip_unchanged: bool,
    last: Option<Arc<Configuration>>,
    metrics: SnapshotMetrics,
}

#[derive(Clone, Debug, Default)]
pub struct SnapshotMetrics {
    published: Counter,
    failed: Counter,
    skipped: Counter,
}

// === impl Snapshotter ===

impl<C, S> Snapshotter<C, S>
where
    C: Configurator + Send + 'static,
    S: SnapshotCache + Send + 'static,
{
    pub fn new(
        configurator: C,
        cache: S,
        (ingresses, ingress_events): (Arc<IngressAggregator>, Events),
        (secrets, secret_events): (Arc<SecretsAggregator>, Events),
        metrics: SnapshotMetrics,
    ) -> Self {
        Self {
            configurator,
            cache,
            ingresses,
            ingress_events,
            secrets,
            secret_events,
            secret_triggers: false,
            skip_unchanged: false,
            last: None,
            metrics,
        }
    }

    /// When enabled, secret changes trigger a pass. Otherwise they are
    /// consumed and TLS material is only refreshed by the next ingress change.
    pub fn with_secret_triggers(mut self, enabled: bool) -> Self {
        self.secret_triggers = enabled;
        self
    }

    /// When enabled, a configuration equal to the last published one is not
    /// published again.
    pub fn with_skip_unchanged(mut self, enabled: bool) -> Self {
        self.skip_unchanged = enabled;
        self
    }

    pub fn spawn(self, shutdown: drain::Watch) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown).instrument(info_span!("snapshotter")))
    }

    async fn run(mut self, shutdown: drain::Watch) {
        let shutdown = shutdown.signaled();
        tokio::pin!(shutdown);

        // Secret notifications may be drained while the ingresses are
        // already synced, so a pass is forced once both aggregators are ready.
        let ready = {
            let ingresses = self.ingresses.clone();
            let secrets = self.secrets.clone();
            async move { tokio::try_join!(ingresses.ready(), secrets.ready()) }
        };
        tokio::pin!(ready);
        let mut synced = false;

        loop {
            let triggered = tokio::select! {
                _ = &mut shutdown => {
                    debug!("Shutdown");
                    return;
                }
                res = &mut ready, if !synced => {
                    synced = true;
                    match res {
                        Ok(_) => {
                            debug!("Aggregators synced");
                            true
                        }
                        Err(error) => {
                            debug!(%error, "Aggregators did not sync");
                            false
                        }
                    }
                }
                event = self.ingress_events.recv() => match event {
                    Some(change) => {
                        trace!(%change, "Ingress changed");
                        true
                    }
                    None => {
                        info!("Ingress notifications closed");
                        return;
                    }
                },
                event = self.secret_events.recv() => match event {
                    Some(change) => {
                        trace!(%change, "Secret changed");
                        self.secret_triggers
                    }
                    None => {
                        info!("Secret notifications closed");
                        return;
                    }
                },
            };

            if triggered {
                if let Err(error) = self.snapshot() {
                    warn!(error = %format_args!("{error:#}"), "Failed to publish snapshot");
                }
            }
        }
    }

    /// Lists both aggregators, generates a snapshot and publishes it.
    ///
    /// A failed pass is not retried; the next notification triggers another.
    pub fn snapshot(&mut self) -> Result<()> {
        let res = self.publish();
        if res.is_err() {
            self.metrics.failed.inc();
        }
        res
    }

    fn publish(&mut self) -> Result<()> {
        let ingresses = self.ingresses.list().context("failed to list ingresses")?;
        let secrets = self.secrets.list().context("failed to list secrets")?;
        let snapshot = self.configurator.generate(&ingresses, &secrets);
        let version = snapshot.version;

        if self.skip_unchanged
            && snapshot.configuration.equals(self.last.as_deref()) == (true, true)
        {
            debug!(version, "Configuration unchanged");
            self.metrics.skipped.inc();
            return Ok(());
        }

        let configuration = snapshot.configuration.clone();
        let node_id = self.configurator.node_id();
        self.cache
            .set_snapshot(node_id, snapshot)
            .with_context(|| format!("failed to set snapshot for {node_id}"))?;
        info!(
            node_id,
            version,
            virtual_hosts = configuration.virtual_hosts.len(),
            clusters = configuration.clusters.len(),
            "Published snapshot"
        );
        self.last = Some(configuration);
        self.metrics.published.inc();
        Ok(())
    }
}

// === impl SnapshotMetrics ===

impl SnapshotMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let published = Counter::default();
        prom.register(
            "published",
            "Count of snapshots published to the cache",
            published.clone(),
        );

        let failed = Counter::default();
        prom.register(
            "failed",
            "Count of snapshot passes that failed",
            failed.clone(),
        );

        let skipped = Counter::default();
        prom.register(
            "skipped",
            "Count of snapshots not published because the configuration was unchanged",
            skipped.clone(),
        );

        Self {
            published,
            failed,
            skipped,
        }
    }

    pub fn published(&self) -> u64 {
        self.published.get()
    }

    pub fn failed(&self) -> u64 {
        self.failed.get()
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.get()
    }
}
