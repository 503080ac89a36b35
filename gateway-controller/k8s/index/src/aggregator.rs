use crate::metrics::AggregatorMetrics;
use futures::prelude::*;
use gateway_controller_k8s_api::{tls, watcher, Ingress, Resource, ResourceExt, Secret};
use kube::runtime::reflector::{self, store::Writer, Store};
use parking_lot::Mutex;
use std::{fmt, pin::Pin, sync::Arc};
use tokio::{
    sync::mpsc,
    time::{self, Duration, Instant, Interval, MissedTickBehavior},
};
use tracing::{debug, info, info_span, trace, Instrument};

pub type IngressAggregator = Aggregator<Ingress>;

pub type SecretsAggregator = Aggregator<Secret>;

type SourceStream<K> = Pin<Box<dyn Stream<Item = watcher::Event<K>> + Send + 'static>>;

/// A resource kind that may be aggregated from several watches.
pub trait AggregatedResource:
    Resource<DynamicType = ()> + Clone + fmt::Debug + Send + Sync + 'static
{
    /// Configures the watches feeding an aggregator of this kind.
    fn selector() -> watcher::Config {
        watcher::Config::default()
    }

    /// Checks that a stored object belongs in the aggregator.
    fn validate(&self) -> Result<(), &'static str> {
        Ok(())
    }
}

/// Merges any number of watches over one resource kind into a single store.
///
/// Each source is reflected into its own store; [`Aggregator::list`] returns
/// the union of every store's contents.
pub struct Aggregator<K: AggregatedResource> {
    stores: Vec<Store<K>>,
    pending: Mutex<Vec<Source<K>>>,
    tx: mpsc::Sender<Notification>,
    resync: Option<Duration>,
    metrics: AggregatorMetrics,
}

/// Receives a notification for each change observed by an [`Aggregator`].
///
/// Notifications carry no state: the aggregator must be re-listed to
/// observe the change.
#[derive(Debug)]
pub struct Events(mpsc::Receiver<Notification>);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Notification {
    Applied,
    Deleted,
    /// A watch completed a full listing.
    Restarted,
    /// A synced watch's resync period elapsed. The store is unchanged.
    Resynced,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unexpected {kind} {namespace}/{name} in store: {reason}")]
    UnexpectedObject {
        kind: String,
        namespace: String,
        name: String,
        reason: &'static str,
    },

    #[error("{kind} watch ended before its initial listing completed")]
    SourceClosed { kind: String },

    #[error("shutdown before {kind} watches synced")]
    Shutdown { kind: String },
}

struct Source<K: AggregatedResource> {
    writer: Writer<K>,
    events: SourceStream<K>,
}

// === impl Aggregator ===

impl<K: AggregatedResource> Aggregator<K> {
    /// Notifications are handed off through a single-slot channel so that a
    /// slow consumer holds back every source's dispatch.
    const NOTIFICATION_CAPACITY: usize = 1;

    pub fn new(metrics: AggregatorMetrics) -> (Self, Events) {
        let (tx, rx) = mpsc::channel(Self::NOTIFICATION_CAPACITY);
        let aggregator = Self {
            stores: Vec::new(),
            pending: Mutex::new(Vec::new()),
            tx,
            resync: None,
            metrics,
        };
        (aggregator, Events(rx))
    }

    /// Emits a [`Notification::Resynced`] from each synced source once per
    /// `period`, so that consumers periodically re-list. Must be set before
    /// the aggregator is run.
    pub fn set_resync_period(&mut self, period: Duration) {
        self.resync = Some(period);
    }

    /// Registers a watch. Sources must be added before the aggregator is run.
    pub fn add_source<S>(&mut self, events: S)
    where
        S: Stream<Item = watcher::Event<K>> + Send + 'static,
    {
        let (store, writer) = reflector::store();
        self.stores.push(store);
        self.pending.get_mut().push(Source {
            writer,
            events: events.boxed(),
        });
        self.metrics.set_sources(self.stores.len());
    }

    /// Spawns a task per source and waits until every source has completed
    /// its initial listing.
    ///
    /// Notifications are emitted as sources sync, so the [`Events`] receiver
    /// must already be consumed when this is called.
    pub async fn run(&self, shutdown: drain::Watch) -> Result<(), Error> {
        let sources = std::mem::take(&mut *self.pending.lock());
        for (index, source) in sources.into_iter().enumerate() {
            let span = info_span!("source", kind = %K::kind(&()), index);
            tokio::spawn(
                source
                    .dispatch(
                        self.tx.clone(),
                        self.resync,
                        self.metrics.clone(),
                        shutdown.clone(),
                    )
                    .instrument(span),
            );
        }

        tokio::select! {
            res = self.ready() => res?,
            _ = shutdown.signaled() => return Err(Error::Shutdown { kind: kind::<K>() }),
        }

        info!(kind = %K::kind(&()), sources = self.stores.len(), "Synced");
        Ok(())
    }

    /// Waits until every source has completed its initial listing. Does not
    /// complete before [`Aggregator::run`] has been called.
    pub async fn ready(&self) -> Result<(), Error> {
        future::try_join_all(self.stores.iter().map(|s| s.wait_until_ready()))
            .await
            .map_err(|_| Error::SourceClosed { kind: kind::<K>() })?;
        Ok(())
    }

    /// Returns the objects of all sources, in no particular order.
    pub fn list(&self) -> Result<Vec<Arc<K>>, Error> {
        let mut objects = Vec::new();
        for store in &self.stores {
            for obj in store.state() {
                if let Err(reason) = obj.validate() {
                    return Err(Error::UnexpectedObject {
                        kind: kind::<K>(),
                        namespace: obj.namespace().unwrap_or_default(),
                        name: obj.name_any(),
                        reason,
                    });
                }
                objects.push(obj);
            }
        }
        Ok(objects)
    }
}

fn kind<K: AggregatedResource>() -> String {
    K::kind(&()).into_owned()
}

// === impl Source ===

impl<K: AggregatedResource> Source<K> {
    async fn dispatch(
        self,
        tx: mpsc::Sender<Notification>,
        resync: Option<Duration>,
        metrics: AggregatorMetrics,
        shutdown: drain::Watch,
    ) {
        let Self {
            mut writer,
            mut events,
        } = self;
        let shutdown = shutdown.signaled();
        tokio::pin!(shutdown);
        let mut resync = resync.map(|period| {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let mut synced = false;

        loop {
            let event = tokio::select! {
                _ = &mut shutdown => {
                    debug!("Shutdown");
                    return;
                }
                _ = tick(&mut resync), if synced => None,
                event = events.next() => match event {
                    Some(event) => Some(event),
                    None => {
                        info!("Watch ended");
                        return;
                    }
                },
            };

            let notification = match event {
                None => {
                    trace!("Resync");
                    Notification::Resynced
                }
                Some(event) => {
                    writer.apply_watcher_event(&event);
                    match &event {
                        watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) => {
                            trace!(ns = ?obj.namespace(), name = %obj.name_any(), "Applied");
                            Notification::Applied
                        }
                        watcher::Event::Delete(obj) => {
                            trace!(ns = ?obj.namespace(), name = %obj.name_any(), "Deleted");
                            Notification::Deleted
                        }
                        watcher::Event::InitDone => {
                            synced = true;
                            Notification::Restarted
                        }
                        watcher::Event::Init => continue,
                    }
                }
            };
            metrics.observe(notification);

            // The consumer may have gone away; the store is still maintained
            // for listing.
            tokio::select! {
                res = tx.send(notification) => if res.is_err() {
                    trace!("Notification receiver dropped");
                },
                _ = &mut shutdown => {
                    debug!("Shutdown");
                    return;
                }
            }
        }
    }
}

/// Completes at the next resync tick, or never when resync is disabled.
async fn tick(resync: &mut Option<Interval>) {
    match resync {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

// === impl Events ===

impl Events {
    /// Waits for the next change. Returns `None` once the aggregator has been
    /// dropped and all of its sources have stopped.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.0.recv().await
    }
}

// === impl Notification ===

impl Notification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Deleted => "deleted",
            Self::Restarted => "restarted",
            Self::Resynced => "resynced",
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl AggregatedResource ===

impl AggregatedResource for Ingress {}

impl AggregatedResource for Secret {
    fn selector() -> watcher::Config {
        watcher::Config::default().fields(tls::SECRET_FIELD_SELECTOR)
    }

    fn validate(&self) -> Result<(), &'static str> {
        match self.type_.as_deref() {
            Some(tls::SECRET_TYPE) => Ok(()),
            _ => Err("secret is not of type kubernetes.io/tls"),
        }
    }
}
