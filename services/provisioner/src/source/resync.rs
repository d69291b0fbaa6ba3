//! Cached watcher with periodic resync.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use k8s_openapi::api::core::v1::PersistentVolume;
use kube::api::Api;
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use lpv_reconcile::{ReconcileEvent, VolumeDescriptor};
use tokio::sync::{mpsc, watch as signal};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{stopped, BackgroundFeed, EventSource};
use crate::cluster::descriptor_from_pv;

/// Default interval between full re-deliveries of cached volumes.
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Event source backed by a resubscribing watcher and a local cache.
///
/// Transport failures are retried with backoff inside the watcher and never
/// end the sequence. Every cached volume is re-emitted as `Modified` once
/// per resync interval.
pub struct ResyncSource {
    feed: BackgroundFeed,
}

impl ResyncSource {
    /// Start the watcher and the resync timer.
    pub fn spawn(client: Client, interval: Duration) -> Self {
        let api: Api<PersistentVolume> = Api::all(client);
        let stream = watcher(api, watcher::Config::default()).default_backoff();
        let feed = BackgroundFeed::spawn(move |tx, stop| run(stream, interval, tx, stop));
        Self { feed }
    }
}

#[async_trait]
impl EventSource for ResyncSource {
    async fn next_event(&mut self) -> Option<ReconcileEvent> {
        self.feed.recv().await
    }

    async fn stop(&mut self) {
        self.feed.stop().await;
    }
}

async fn run<S>(
    stream: S,
    interval: Duration,
    tx: mpsc::Sender<ReconcileEvent>,
    mut stop: signal::Receiver<bool>,
) where
    S: Stream<Item = Result<watcher::Event<PersistentVolume>, watcher::Error>>,
{
    info!(interval_secs = interval.as_secs(), "Starting volume watcher");

    let mut stream = std::pin::pin!(stream);

    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut cache = ResyncCache::default();

    loop {
        let events = tokio::select! {
            _ = stopped(&mut stop) => {
                debug!("Volume watcher stopped");
                return;
            }
            _ = ticker.tick() => {
                debug!(volumes = cache.len(), "Resyncing cached volumes");
                cache.resync()
            }
            item = stream.next() => match item {
                Some(Ok(event)) => apply(&mut cache, event).into_iter().collect(),
                Some(Err(e)) => {
                    warn!(error = %e, "Volume watcher error, retrying");
                    continue;
                }
                None => {
                    warn!("Volume watcher stream ended");
                    return;
                }
            },
        };

        for event in events {
            if tx.send(event).await.is_err() {
                return;
            }
        }
    }
}

/// Fold one watcher event into the cache.
fn apply(
    cache: &mut ResyncCache,
    event: watcher::Event<PersistentVolume>,
) -> Option<ReconcileEvent> {
    match event {
        watcher::Event::Apply(pv) => Some(cache.observe(descriptor_from_pv(&pv))),
        watcher::Event::Delete(pv) => {
            let name = pv.metadata.name.unwrap_or_default();
            debug!(volume = %name, "Evicting deleted volume");
            cache.forget(&name);
            None
        }
        watcher::Event::Init => {
            cache.begin_relist();
            None
        }
        watcher::Event::InitApply(pv) => Some(cache.observe(descriptor_from_pv(&pv))),
        watcher::Event::InitDone => {
            cache.finish_relist();
            None
        }
    }
}

/// Latest descriptor per volume name.
///
/// Decides whether an observation is `Added` or `Modified` and supplies the
/// snapshot for periodic resyncs.
#[derive(Debug, Default)]
pub struct ResyncCache {
    volumes: BTreeMap<String, VolumeDescriptor>,

    /// Names seen since the current relist began.
    relisted: Option<BTreeSet<String>>,
}

impl ResyncCache {
    /// Record a descriptor. First sight of a name is `Added`.
    pub fn observe(&mut self, descriptor: VolumeDescriptor) -> ReconcileEvent {
        if let Some(relisted) = &mut self.relisted {
            relisted.insert(descriptor.name.clone());
        }

        match self
            .volumes
            .insert(descriptor.name.clone(), descriptor.clone())
        {
            Some(_) => ReconcileEvent::Modified(descriptor),
            None => ReconcileEvent::Added(descriptor),
        }
    }

    /// Drop a volume from the cache.
    pub fn forget(&mut self, name: &str) {
        self.volumes.remove(name);
    }

    /// Start a full relist. Names not observed before it finishes are evicted.
    pub fn begin_relist(&mut self) {
        self.relisted = Some(BTreeSet::new());
    }

    /// Finish a relist, evicting volumes that were not re-observed.
    pub fn finish_relist(&mut self) {
        if let Some(relisted) = self.relisted.take() {
            self.volumes.retain(|name, _| relisted.contains(name));
        }
    }

    /// Every cached volume as a `Modified` event, in name order.
    pub fn resync(&self) -> Vec<ReconcileEvent> {
        self.volumes
            .values()
            .cloned()
            .map(ReconcileEvent::Modified)
            .collect()
    }

    /// Number of cached volumes.
    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    /// Returns true if no volumes are cached.
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use futures_util::stream;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::core::ErrorResponse;

    use super::*;

    fn named(name: &str) -> VolumeDescriptor {
        VolumeDescriptor::new(name).with_local_path(format!("/mnt/{name}"))
    }

    fn pv(name: &str) -> PersistentVolume {
        PersistentVolume {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            ..PersistentVolume::default()
        }
    }

    fn names(events: &[ReconcileEvent]) -> Vec<(&'static str, String)> {
        events
            .iter()
            .map(|e| match e {
                ReconcileEvent::Added(d) | ReconcileEvent::Modified(d) => {
                    (e.kind(), d.name.clone())
                }
                ReconcileEvent::Error(reason) => (e.kind(), reason.clone()),
            })
            .collect()
    }

    #[test]
    fn test_first_sight_is_added_then_modified() {
        let mut cache = ResyncCache::default();

        assert!(matches!(cache.observe(named("a")), ReconcileEvent::Added(_)));
        assert!(matches!(
            cache.observe(named("a")),
            ReconcileEvent::Modified(_)
        ));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_resync_emits_every_volume_in_name_order() {
        let mut cache = ResyncCache::default();
        cache.observe(named("b"));
        cache.observe(named("a"));
        cache.observe(named("c"));

        let events = cache.resync();
        assert_eq!(
            names(&events),
            vec![
                ("modified", "a".to_string()),
                ("modified", "b".to_string()),
                ("modified", "c".to_string()),
            ]
        );
    }

    #[test]
    fn test_resync_carries_latest_snapshot() {
        let mut cache = ResyncCache::default();
        cache.observe(named("a"));
        cache.observe(VolumeDescriptor::new("a").with_local_path("/mnt/moved"));

        let events = cache.resync();
        assert_eq!(
            events,
            vec![ReconcileEvent::Modified(
                VolumeDescriptor::new("a").with_local_path("/mnt/moved")
            )]
        );
    }

    #[test]
    fn test_forget_evicts_from_resync() {
        let mut cache = ResyncCache::default();
        cache.observe(named("a"));
        cache.forget("a");

        assert!(cache.is_empty());
        assert!(cache.resync().is_empty());
        assert!(matches!(cache.observe(named("a")), ReconcileEvent::Added(_)));
    }

    #[test]
    fn test_relist_evicts_missing_volumes() {
        let mut cache = ResyncCache::default();
        cache.observe(named("a"));
        cache.observe(named("b"));

        cache.begin_relist();
        assert!(matches!(
            cache.observe(named("b")),
            ReconcileEvent::Modified(_)
        ));
        assert!(matches!(cache.observe(named("c")), ReconcileEvent::Added(_)));
        cache.finish_relist();

        assert_eq!(
            names(&cache.resync()),
            vec![("modified", "b".to_string()), ("modified", "c".to_string())]
        );
    }

    #[test]
    fn test_apply_watcher_events() {
        let mut cache = ResyncCache::default();

        assert!(apply(&mut cache, watcher::Event::Init).is_none());
        assert!(matches!(
            apply(&mut cache, watcher::Event::InitApply(pv("a"))),
            Some(ReconcileEvent::Added(_))
        ));
        assert!(apply(&mut cache, watcher::Event::InitDone).is_none());

        assert!(matches!(
            apply(&mut cache, watcher::Event::Apply(pv("a"))),
            Some(ReconcileEvent::Modified(_))
        ));
        assert!(apply(&mut cache, watcher::Event::Delete(pv("a"))).is_none());
        assert!(cache.is_empty());
    }

    fn spawn_over<S>(stream: S, interval: Duration) -> ResyncSource
    where
        S: Stream<Item = Result<watcher::Event<PersistentVolume>, watcher::Error>>
            + Send
            + 'static,
    {
        ResyncSource {
            feed: BackgroundFeed::spawn(move |tx, stop| run(stream, interval, tx, stop)),
        }
    }

    fn watch_failure() -> watcher::Error {
        watcher::Error::WatchError(ErrorResponse {
            status: "Failure".to_string(),
            message: "too old resource version".to_string(),
            reason: "Expired".to_string(),
            code: 410,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_watcher_errors_never_surface() {
        let items = vec![
            Ok(watcher::Event::InitApply(pv("a"))),
            Err(watch_failure()),
            Ok(watcher::Event::Apply(pv("b"))),
        ];
        let mut source = spawn_over(
            stream::iter(items).chain(stream::pending()),
            Duration::from_secs(60),
        );

        let first = source.next_event().await.unwrap();
        let second = source.next_event().await.unwrap();
        assert_eq!(
            names(&[first, second]),
            vec![("added", "a".to_string()), ("added", "b".to_string())]
        );

        source.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_reemits_cached_volumes() {
        let items = vec![
            Ok(watcher::Event::Apply(pv("b"))),
            Ok(watcher::Event::Apply(pv("a"))),
        ];
        let mut source = spawn_over(
            stream::iter(items).chain(stream::pending()),
            Duration::from_secs(60),
        );

        let mut events = Vec::new();
        for _ in 0..2 {
            events.push(source.next_event().await.unwrap());
        }
        let start = tokio::time::Instant::now();
        for _ in 0..2 {
            events.push(source.next_event().await.unwrap());
        }

        assert!(start.elapsed() >= Duration::from_secs(59));
        assert_eq!(
            names(&events),
            vec![
                ("added", "b".to_string()),
                ("added", "a".to_string()),
                ("modified", "a".to_string()),
                ("modified", "b".to_string()),
            ]
        );

        source.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_watcher_task() {
        let mut source = spawn_over(
            stream::pending::<Result<watcher::Event<PersistentVolume>, watcher::Error>>(),
            Duration::from_secs(60),
        );

        tokio::time::timeout(Duration::from_secs(1), source.stop())
            .await
            .expect("watcher task did not stop");
        assert!(source.next_event().await.is_none());
    }
}
