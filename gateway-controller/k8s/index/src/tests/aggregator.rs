use super::*;
use crate::{
    AggregatedResource, Aggregator, AggregatorMetrics, Error, Events, IngressAggregator,
    Notification, SecretsAggregator,
};
use gateway_controller_k8s_api::{watcher::Event, ResourceExt};
use tokio::{
    sync::mpsc,
    time::{self, Duration},
};
use tokio_stream::wrappers::UnboundedReceiverStream;

const TIMEOUT: Duration = Duration::from_secs(5);

fn mk_source<K>() -> (mpsc::UnboundedSender<Event<K>>, UnboundedReceiverStream<Event<K>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, UnboundedReceiverStream::new(rx))
}

fn initial_list<K: Clone>(tx: &mpsc::UnboundedSender<Event<K>>, objects: &[K]) {
    tx.send(Event::Init).expect("source must be open");
    for obj in objects {
        tx.send(Event::InitApply(obj.clone()))
            .expect("source must be open");
    }
    tx.send(Event::InitDone).expect("source must be open");
}

/// Consumes notifications in the background so that sources are never held
/// back, returning them once the aggregator's senders are gone.
fn drain_events(mut events: Events) -> tokio::task::JoinHandle<Vec<Notification>> {
    tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(n) = events.recv().await {
            seen.push(n);
        }
        seen
    })
}

fn names<K: ResourceExt>(objects: &[Arc<K>]) -> Vec<String> {
    let mut names = objects.iter().map(|o| o.name_any()).collect::<Vec<_>>();
    names.sort();
    names
}

#[tokio::test]
async fn list_is_empty_before_run() {
    let (mut aggr, _events) = IngressAggregator::new(AggregatorMetrics::default());
    let (tx, rx) = mk_source();
    aggr.add_source(rx);
    initial_list(&tx, &[mk_ingress("ns-0", "ingress-0", &[], &[])]);

    assert!(aggr.list().expect("list must succeed").is_empty());
}

#[tokio::test]
async fn merges_sources() {
    let metrics = AggregatorMetrics::default();
    let (mut aggr, events) = IngressAggregator::new(metrics.clone());
    let events = drain_events(events);

    let (tx0, rx0) = mk_source();
    let (tx1, rx1) = mk_source();
    aggr.add_source(rx0);
    aggr.add_source(rx1);
    assert_eq!(metrics.sources(), 2);

    initial_list(&tx0, &[mk_ingress("ns-0", "ingress-0", &[], &[])]);
    initial_list(
        &tx1,
        &[
            mk_ingress("ns-0", "ingress-1", &[], &[]),
            mk_ingress("ns-1", "ingress-2", &[], &[]),
        ],
    );

    let (_signal, shutdown) = drain::channel();
    time::timeout(TIMEOUT, aggr.run(shutdown))
        .await
        .expect("aggregator must sync")
        .expect("aggregator must sync");

    let ingresses = aggr.list().expect("list must succeed");
    assert_eq!(names(&ingresses), vec!["ingress-0", "ingress-1", "ingress-2"]);

    // Dropping the sources and the aggregator closes the notification channel.
    drop((tx0, tx1));
    drop(aggr);
    let seen = time::timeout(TIMEOUT, events)
        .await
        .expect("sources must stop")
        .expect("task must not panic");
    assert_eq!(
        seen.iter().filter(|n| **n == Notification::Applied).count(),
        3
    );
    assert_eq!(
        seen.iter().filter(|n| **n == Notification::Restarted).count(),
        2
    );
    assert_eq!(metrics.events(Notification::Applied), 3);
    assert_eq!(metrics.events(Notification::Restarted), 2);
    assert_eq!(metrics.events(Notification::Deleted), 0);
}

#[tokio::test]
async fn same_object_from_two_sources_is_listed_twice() {
    let (mut aggr, events) = IngressAggregator::new(AggregatorMetrics::default());
    let _events = drain_events(events);

    let ingress = mk_ingress("ns-0", "ingress-0", &[], &[]);
    let (tx0, rx0) = mk_source();
    let (tx1, rx1) = mk_source();
    aggr.add_source(rx0);
    aggr.add_source(rx1);
    initial_list(&tx0, &[ingress.clone()]);
    initial_list(&tx1, &[ingress]);

    let (_signal, shutdown) = drain::channel();
    time::timeout(TIMEOUT, aggr.run(shutdown))
        .await
        .expect("aggregator must sync")
        .expect("aggregator must sync");

    assert_eq!(aggr.list().expect("list must succeed").len(), 2);
}

#[tokio::test]
async fn notifies_changes() {
    let (mut aggr, mut events) = IngressAggregator::new(AggregatorMetrics::default());
    let (tx, rx) = mk_source();
    aggr.add_source(rx);
    initial_list(&tx, &[]);

    let (_signal, shutdown) = drain::channel();
    let (synced, restarted) = tokio::join!(
        time::timeout(TIMEOUT, aggr.run(shutdown)),
        time::timeout(TIMEOUT, events.recv()),
    );
    synced
        .expect("aggregator must sync")
        .expect("aggregator must sync");
    assert_eq!(
        restarted.expect("must be notified"),
        Some(Notification::Restarted)
    );

    let ingress = mk_ingress("ns-0", "ingress-0", &[], &[]);
    tx.send(Event::Apply(ingress.clone()))
        .expect("source must be open");
    let n = time::timeout(TIMEOUT, events.recv())
        .await
        .expect("must be notified");
    assert_eq!(n, Some(Notification::Applied));
    assert_eq!(
        names(&aggr.list().expect("list must succeed")),
        vec!["ingress-0"]
    );

    tx.send(Event::Delete(ingress)).expect("source must be open");
    let n = time::timeout(TIMEOUT, events.recv())
        .await
        .expect("must be notified");
    assert_eq!(n, Some(Notification::Deleted));
    assert!(aggr.list().expect("list must succeed").is_empty());
}

#[tokio::test]
async fn relisting_replaces_source_contents() {
    let (mut aggr, mut events) = IngressAggregator::new(AggregatorMetrics::default());
    let (tx, rx) = mk_source();
    aggr.add_source(rx);
    initial_list(
        &tx,
        &[
            mk_ingress("ns-0", "ingress-0", &[], &[]),
            mk_ingress("ns-0", "ingress-1", &[], &[]),
        ],
    );

    let (_signal, shutdown) = drain::channel();
    let consume = async {
        for _ in 0..3 {
            events.recv().await;
        }
    };
    let (synced, ()) = tokio::join!(time::timeout(TIMEOUT, aggr.run(shutdown)), consume);
    synced
        .expect("aggregator must sync")
        .expect("aggregator must sync");
    assert_eq!(aggr.list().expect("list must succeed").len(), 2);

    initial_list(&tx, &[mk_ingress("ns-0", "ingress-2", &[], &[])]);
    for expected in [Notification::Applied, Notification::Restarted] {
        let n = time::timeout(TIMEOUT, events.recv())
            .await
            .expect("must be notified");
        assert_eq!(n, Some(expected));
    }
    assert_eq!(
        names(&aggr.list().expect("list must succeed")),
        vec!["ingress-2"]
    );
}

#[tokio::test]
async fn rejects_non_tls_secrets() {
    let (mut aggr, events) = SecretsAggregator::new(AggregatorMetrics::default());
    let _events = drain_events(events);
    let (tx, rx) = mk_source();
    aggr.add_source(rx);
    initial_list(
        &tx,
        &[
            mk_tls_secret("ns-0", "cert", "cert", "key"),
            mk_secret("ns-0", "opaque", "Opaque", BTreeMap::new()),
        ],
    );

    let (_signal, shutdown) = drain::channel();
    time::timeout(TIMEOUT, aggr.run(shutdown))
        .await
        .expect("aggregator must sync")
        .expect("aggregator must sync");

    match aggr.list() {
        Err(Error::UnexpectedObject {
            namespace, name, ..
        }) => {
            assert_eq!(namespace, "ns-0");
            assert_eq!(name, "opaque");
        }
        res => panic!("unexpected result: {res:?}"),
    }
}

#[tokio::test]
async fn lists_tls_secrets() {
    let (mut aggr, events) = SecretsAggregator::new(AggregatorMetrics::default());
    let _events = drain_events(events);
    let (tx, rx) = mk_source();
    aggr.add_source(rx);
    initial_list(&tx, &[mk_tls_secret("ns-0", "cert", "cert", "key")]);

    let (_signal, shutdown) = drain::channel();
    time::timeout(TIMEOUT, aggr.run(shutdown))
        .await
        .expect("aggregator must sync")
        .expect("aggregator must sync");

    let secrets = aggr.list().expect("list must succeed");
    assert_eq!(names(&secrets), vec!["cert"]);
}

#[test]
fn secrets_are_selected_by_type() {
    assert_eq!(
        Secret::selector().field_selector.as_deref(),
        Some("type=kubernetes.io/tls")
    );
    assert_eq!(Ingress::selector().field_selector, None);
}

#[tokio::test]
async fn fails_when_source_closes_before_sync() {
    let (mut aggr, _events) = IngressAggregator::new(AggregatorMetrics::default());
    let (tx, rx) = mk_source::<Ingress>();
    aggr.add_source(rx);
    drop(tx);

    let (_signal, shutdown) = drain::channel();
    let res = time::timeout(TIMEOUT, aggr.run(shutdown))
        .await
        .expect("run must complete");
    assert!(
        matches!(res, Err(Error::SourceClosed { .. })),
        "unexpected result: {res:?}"
    );
}

#[tokio::test]
async fn stops_on_shutdown() {
    let (mut aggr, _events) = IngressAggregator::new(AggregatorMetrics::default());
    let (_tx, rx) = mk_source::<Ingress>();
    aggr.add_source(rx);

    let (signal, shutdown) = drain::channel();
    let (res, ()) = time::timeout(TIMEOUT, async {
        tokio::join!(aggr.run(shutdown), signal.drain())
    })
    .await
    .expect("shutdown must complete");
    assert!(
        matches!(res, Err(Error::Shutdown { .. })),
        "unexpected result: {res:?}"
    );
}

#[tokio::test]
async fn runs_without_sources() {
    let (aggr, _events) = Aggregator::<Ingress>::new(AggregatorMetrics::default());
    let (_signal, shutdown) = drain::channel();
    time::timeout(TIMEOUT, aggr.run(shutdown))
        .await
        .expect("run must complete")
        .expect("an aggregator without sources is synced");
    assert!(aggr.list().expect("list must succeed").is_empty());
}

#[tokio::test(start_paused = true)]
async fn resyncs_synced_sources_periodically() {
    let metrics = AggregatorMetrics::default();
    let (mut aggr, mut events) = IngressAggregator::new(metrics.clone());
    aggr.set_resync_period(Duration::from_secs(60));
    let (tx, rx) = mk_source();
    aggr.add_source(rx);
    initial_list(&tx, &[]);

    let (_signal, shutdown) = drain::channel();
    let (synced, restarted) = tokio::join!(aggr.run(shutdown), events.recv());
    synced.expect("aggregator must sync");
    assert_eq!(restarted, Some(Notification::Restarted));

    tx.send(Event::Apply(mk_ingress("ns-0", "ingress-0", &[], &[])))
        .expect("source must be open");
    assert_eq!(events.recv().await, Some(Notification::Applied));

    let start = time::Instant::now();
    for _ in 0..2 {
        let n = time::timeout(Duration::from_secs(120), events.recv())
            .await
            .expect("must resync");
        assert_eq!(n, Some(Notification::Resynced));
    }
    assert!(start.elapsed() >= Duration::from_secs(60));
    assert_eq!(metrics.events(Notification::Resynced), 2);
    assert_eq!(
        names(&aggr.list().expect("list must succeed")),
        vec!["ingress-0"]
    );
}

#[tokio::test(start_paused = true)]
async fn does_not_resync_unsynced_sources() {
    let (mut aggr, mut events) = IngressAggregator::new(AggregatorMetrics::default());
    aggr.set_resync_period(Duration::from_secs(60));
    let (_tx, rx) = mk_source::<Ingress>();
    aggr.add_source(rx);

    let (_signal, shutdown) = drain::channel();
    let run = aggr.run(shutdown);
    tokio::pin!(run);
    tokio::select! {
        res = &mut run => panic!("aggregator must not sync: {res:?}"),
        n = time::timeout(Duration::from_secs(600), events.recv()) => {
            assert!(n.is_err(), "unexpected notification: {n:?}");
        }
    }
}

#[tokio::test(start_paused = true)]
async fn resync_is_disabled_by_default() {
    let (mut aggr, mut events) = IngressAggregator::new(AggregatorMetrics::default());
    let (tx, rx) = mk_source();
    aggr.add_source(rx);
    initial_list(&tx, &[mk_ingress("ns-0", "ingress-0", &[], &[])]);

    let (_signal, shutdown) = drain::channel();
    let consume = async {
        for _ in 0..2 {
            events.recv().await;
        }
    };
    let (synced, ()) = tokio::join!(aggr.run(shutdown), consume);
    synced.expect("aggregator must sync");

    let n = time::timeout(Duration::from_secs(3600), events.recv()).await;
    assert!(n.is_err(), "unexpected notification: {n:?}");
}
