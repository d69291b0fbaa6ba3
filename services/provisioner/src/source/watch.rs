//! Direct watch on `PersistentVolume`s.

use std::future::Future;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use k8s_openapi::api::core::v1::PersistentVolume;
use kube::api::{Api, WatchEvent, WatchParams};
use kube::Client;
use lpv_reconcile::ReconcileEvent;
use tokio::sync::{mpsc, watch as signal};
use tracing::{debug, error, info};

use super::{stopped, BackgroundFeed, EventSource};
use crate::cluster::descriptor_from_pv;

/// Server-side timeout for one watch request, in seconds.
const WATCH_TIMEOUT_SECS: u32 = 290;

/// Resource version that replays every existing volume as `Added`.
const REPLAY_ALL: &str = "0";

/// Event source backed by a single long-lived watch.
///
/// A watch that the server closes after its timeout is reopened from the
/// last seen resource version. An error status or transport failure is
/// surfaced as one `Error` event, after which the sequence ends. Nothing
/// is replayed across that boundary.
pub struct WatchSource {
    feed: BackgroundFeed,
}

impl WatchSource {
    /// Start watching all volumes in the cluster.
    pub fn spawn(client: Client) -> Self {
        let api: Api<PersistentVolume> = Api::all(client);
        let open = move |from: String| {
            let api = api.clone();
            async move {
                let params = WatchParams::default().timeout(WATCH_TIMEOUT_SECS);
                api.watch(&params, &from).await.map(StreamExt::boxed)
            }
        };

        let feed = BackgroundFeed::spawn(move |tx, stop| forward(open, tx, stop));
        Self { feed }
    }
}

#[async_trait]
impl EventSource for WatchSource {
    async fn next_event(&mut self) -> Option<ReconcileEvent> {
        self.feed.recv().await
    }

    async fn stop(&mut self) {
        self.feed.stop().await;
    }
}

async fn forward<F, Fut, S>(
    open: F,
    tx: mpsc::Sender<ReconcileEvent>,
    mut stop: signal::Receiver<bool>,
) where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = kube::Result<S>>,
    S: Stream<Item = kube::Result<WatchEvent<PersistentVolume>>>,
{
    let outcome = tokio::select! {
        _ = stopped(&mut stop) => {
            debug!("Volume watch stopped");
            return;
        }
        outcome = pump(open, &tx) => outcome,
    };

    if let Err(reason) = outcome {
        error!(reason = %reason, "Volume watch failed");
        let _ = tx.send(ReconcileEvent::Error(reason)).await;
    }
}

/// Forward watch events until the watch fails or the consumer goes away.
///
/// `open` starts a watch at the given resource version. Returns `Ok` when
/// the receiver was dropped, `Err` with the failure reason otherwise.
async fn pump<F, Fut, S>(mut open: F, tx: &mpsc::Sender<ReconcileEvent>) -> Result<(), String>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = kube::Result<S>>,
    S: Stream<Item = kube::Result<WatchEvent<PersistentVolume>>>,
{
    let mut last_version = REPLAY_ALL.to_string();

    loop {
        info!(resource_version = %last_version, "Opening volume watch");

        let stream = open(last_version.clone())
            .await
            .map_err(|e| format!("failed to open volume watch: {e}"))?;
        let mut stream = std::pin::pin!(stream);

        while let Some(item) = stream.next().await {
            let event = match item {
                Ok(WatchEvent::Added(pv)) => {
                    remember_version(&mut last_version, &pv);
                    ReconcileEvent::Added(descriptor_from_pv(&pv))
                }
                Ok(WatchEvent::Modified(pv)) => {
                    remember_version(&mut last_version, &pv);
                    ReconcileEvent::Modified(descriptor_from_pv(&pv))
                }
                Ok(WatchEvent::Deleted(pv)) => {
                    remember_version(&mut last_version, &pv);
                    debug!(volume = ?pv.metadata.name, "Ignoring deleted volume");
                    continue;
                }
                Ok(WatchEvent::Bookmark(bookmark)) => {
                    last_version = bookmark.metadata.resource_version;
                    continue;
                }
                Ok(WatchEvent::Error(status)) => {
                    return Err(format!(
                        "watch error {}: {} ({})",
                        status.code, status.message, status.reason
                    ));
                }
                Err(e) => return Err(format!("watch transport error: {e}")),
            };

            if tx.send(event).await.is_err() {
                return Ok(());
            }
        }

        debug!(resource_version = %last_version, "Volume watch closed by server");
    }
}

fn remember_version(last_version: &mut String, pv: &PersistentVolume) {
    if let Some(version) = &pv.metadata.resource_version {
        last_version.clone_from(version);
    }
}
