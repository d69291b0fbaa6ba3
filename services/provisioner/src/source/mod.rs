//! Volume event sources.
//!
//! An [`EventSource`] yields an ordered sequence of [`ReconcileEvent`]s until
//! it is stopped or its upstream fails. Two cluster-backed implementations
//! exist, selected by [`SourceMode`]:
//!
//! - [`WatchSource`]: one long-lived watch. Any disruption surfaces as a
//!   single `Error` event and ends the sequence.
//! - [`ResyncSource`]: a cached watcher that resubscribes on its own and
//!   re-delivers every known volume on a fixed interval.
//!
//! Both run their upstream in a background task and hand events over a
//! single ordered channel, so delivery order matches observation order.

mod resync;
mod watch;

use std::future::Future;

use async_trait::async_trait;
use lpv_reconcile::ReconcileEvent;
use tokio::sync::{mpsc, watch as signal};
use tokio::task::JoinHandle;
use tracing::warn;

pub use resync::{ResyncCache, ResyncSource, DEFAULT_RESYNC_INTERVAL};
pub use watch::WatchSource;

/// Capacity of the channel between a background task and the consumer.
pub(crate) const EVENT_BUFFER: usize = 256;

/// A live feed of volume events.
#[async_trait]
pub trait EventSource: Send {
    /// Wait for the next event. `None` means the sequence has ended.
    async fn next_event(&mut self) -> Option<ReconcileEvent>;

    /// Stop the source and wait for any background work to finish.
    async fn stop(&mut self);
}

/// How volume events are received from the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SourceMode {
    /// Single watch subscription; terminal on disruption.
    #[default]
    Direct,

    /// Cached watcher with periodic resync; retries internally.
    Resync,
}

impl std::fmt::Display for SourceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Resync => write!(f, "resync"),
        }
    }
}

/// Event source fed directly through a channel.
///
/// Used when the caller already owns an event feed, and in tests.
pub struct ChannelSource {
    rx: mpsc::Receiver<ReconcileEvent>,
}

impl ChannelSource {
    /// Create a source and the sender that feeds it.
    pub fn new(capacity: usize) -> (mpsc::Sender<ReconcileEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl EventSource for ChannelSource {
    async fn next_event(&mut self) -> Option<ReconcileEvent> {
        self.rx.recv().await
    }

    async fn stop(&mut self) {
        self.rx.close();
    }
}

/// Receiving half of a source whose upstream runs in a spawned task.
pub(crate) struct BackgroundFeed {
    rx: mpsc::Receiver<ReconcileEvent>,
    stop_tx: signal::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl BackgroundFeed {
    /// Spawn `run` with the event sender and a stop signal.
    pub(crate) fn spawn<F, Fut>(run: F) -> Self
    where
        F: FnOnce(mpsc::Sender<ReconcileEvent>, signal::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let (stop_tx, stop_rx) = signal::channel(false);
        let task = tokio::spawn(run(tx, stop_rx));

        Self {
            rx,
            stop_tx,
            task: Some(task),
        }
    }

    pub(crate) async fn recv(&mut self) -> Option<ReconcileEvent> {
        self.rx.recv().await
    }

    pub(crate) async fn stop(&mut self) {
        let _ = self.stop_tx.send(true);
        self.rx.close();

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Event source task ended abnormally");
            }
        }
    }
}

/// Wait until the stop signal is raised or its sender is gone.
pub(crate) async fn stopped(stop: &mut signal::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}
