use crate::{
    index::{
        AggregatedResource, Aggregator, AggregatorMetrics, KubernetesConfigurator,
        TranslateMetrics, Translator,
    },
    k8s::{watcher, Api, Client, Ingress, Secret},
    MemorySnapshotCache, SnapshotMetrics, Snapshotter,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use futures::prelude::*;
use kube::{
    config::{KubeConfigOptions, Kubeconfig},
    runtime::WatchStreamExt,
};
use prometheus_client::registry::Registry;
use serde::de::DeserializeOwned;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tracing::{info, info_span, warn, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "gateway", about = "An ingress controller for a fleet of edge proxies")]
pub struct Args {
    #[clap(
        long,
        default_value = "gateway=info,warn",
        env = "GATEWAY_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Comma-separated ingress classes served by this controller.
    #[clap(long, default_value = "gateway")]
    ingress_class: IngressClasses,

    /// Identifies the proxy node that snapshots are published for.
    #[clap(long, default_value = "gateway")]
    node_id: String,

    /// Kubeconfig of an additional cluster whose ingresses and secrets are
    /// aggregated with the local cluster's. May be repeated.
    #[clap(long = "kubeconfig-source")]
    kubeconfig_sources: Vec<PathBuf>,

    /// Publishes a snapshot when a TLS secret changes.
    #[clap(long)]
    snapshot_on_secret_change: bool,

    /// Does not publish snapshots whose configuration is unchanged.
    #[clap(long)]
    skip_unchanged_snapshots: bool,

    /// Seconds between resync notifications from each synced watch. Zero
    /// disables resyncs.
    #[clap(long, default_value = "60")]
    resync_interval_secs: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            ingress_class: IngressClasses(ingress_classes),
            node_id,
            kubeconfig_sources,
            snapshot_on_secret_change,
            skip_unchanged_snapshots,
            resync_interval_secs,
        } = self;

        let mut prom = <Registry>::default();
        let translate_metrics =
            TranslateMetrics::register(prom.sub_registry_with_prefix("gateway"));
        let ingress_metrics =
            AggregatorMetrics::register(prom.sub_registry_with_prefix("ingress_aggregator"));
        let secret_metrics =
            AggregatorMetrics::register(prom.sub_registry_with_prefix("secret_aggregator"));
        let snapshot_metrics =
            SnapshotMetrics::register(prom.sub_registry_with_prefix("snapshot"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let mut remotes = Vec::with_capacity(kubeconfig_sources.len());
        for path in &kubeconfig_sources {
            let client = kubeconfig_client(path).await?;
            remotes.push((path.display().to_string(), client));
        }

        // Each aggregator watches the local cluster and every remote one.
        let (mut ingresses, ingress_events) = Aggregator::<Ingress>::new(ingress_metrics);
        let (mut secrets, secret_events) = Aggregator::<Secret>::new(secret_metrics);
        ingresses.add_source(runtime.watch_all::<Ingress>(Ingress::selector()));
        secrets.add_source(runtime.watch_all::<Secret>(Secret::selector()));
        for (source, client) in remotes {
            ingresses.add_source(watch_remote::<Ingress>(client.clone(), source.clone()));
            secrets.add_source(watch_remote::<Secret>(client, source));
        }
        if resync_interval_secs > 0 {
            let period = Duration::from_secs(resync_interval_secs);
            ingresses.set_resync_period(period);
            secrets.set_resync_period(period);
        }
        let ingresses = Arc::new(ingresses);
        let secrets = Arc::new(secrets);

        info!(
            classes = ?ingress_classes,
            %node_id,
            sources = kubeconfig_sources.len() + 1,
            "Starting"
        );

        let translator = Translator::new(ingress_classes, translate_metrics);
        let snapshotter = Snapshotter::new(
            KubernetesConfigurator::new(node_id, translator),
            MemorySnapshotCache::default(),
            (ingresses.clone(), ingress_events),
            (secrets.clone(), secret_events),
            snapshot_metrics,
        )
        .with_secret_triggers(snapshot_on_secret_change)
        .with_skip_unchanged(skip_unchanged_snapshots);

        // The snapshotter consumes notifications while the aggregators sync.
        snapshotter.spawn(runtime.shutdown_handle());
        tokio::try_join!(
            ingresses
                .run(runtime.shutdown_handle())
                .instrument(info_span!("ingresses")),
            secrets
                .run(runtime.shutdown_handle())
                .instrument(info_span!("secrets")),
        )?;

        // Serve admin requests until shutdown is signaled and every task
        // holding the shutdown handle has stopped.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

#[derive(Clone, Debug)]
struct IngressClasses(Vec<String>);

impl std::str::FromStr for IngressClasses {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        let classes = s
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect::<Vec<_>>();
        if classes.is_empty() {
            bail!("at least one ingress class must be specified");
        }
        Ok(Self(classes))
    }
}

async fn kubeconfig_client(path: &Path) -> Result<Client> {
    let kubeconfig = Kubeconfig::read_from(path)
        .with_context(|| format!("failed to read kubeconfig {}", path.display()))?;
    let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .with_context(|| format!("invalid kubeconfig {}", path.display()))?;
    Client::try_from(config)
        .with_context(|| format!("failed to build client for {}", path.display()))
}

/// Watches all objects of kind `K` in a remote cluster. Watch errors are
/// logged and the watch is retried with backoff.
fn watch_remote<K>(
    client: Client,
    source: String,
) -> impl Stream<Item = watcher::Event<K>> + Send
where
    K: AggregatedResource + DeserializeOwned,
{
    watcher(Api::<K>::all(client), K::selector())
        .default_backoff()
        .filter_map(move |res| {
            future::ready(match res {
                Ok(event) => Some(event),
                Err(error) => {
                    warn!(%error, %source, kind = %K::kind(&()), "Watch failed");
                    None
                }
            })
        })
}
