//! Reconciliation loop for local volume directories.
//!
//! The reconciler:
//! - Pulls volume events from an [`EventSource`] one at a time
//! - Skips volumes that are not local or carry no required node affinity
//! - Materializes the backing directory when the affinity selects this node
//!
//! Filesystem failures are logged and only abandon the current event. A
//! source `Error` is terminal and returned to the caller.

use std::path::{Path, PathBuf};

use lpv_reconcile::{matches, NodeIdentity, ReconcileEvent, VolumeDescriptor};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::materializer::{DirMaterializer, FilesystemError, Materialization, Materializer};
use crate::source::EventSource;

/// Terminal failures of the reconciliation loop.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The event source reported an upstream failure.
    #[error("volume event source failed: {0}")]
    Transport(String),

    /// The event source ended without reporting why.
    #[error("volume event source closed unexpectedly")]
    SourceClosed,
}

/// Lifecycle of the reconciliation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Accepting events.
    Running,

    /// Cancellation requested; no new events are accepted.
    Draining,

    /// The loop has exited and the source is stopped.
    Stopped,
}

/// What reconciling a single volume did.
#[derive(Debug)]
pub enum Disposition {
    /// Not a local volume.
    NotLocal,

    /// No required node affinity terms.
    NoConstraint,

    /// The affinity does not select this node.
    NotSelected,

    /// The backing directory is in place.
    Materialized(Materialization),

    /// Materialization failed.
    Failed(FilesystemError),
}

/// Reconciler for local volume directories on one node.
pub struct Reconciler<M = DirMaterializer> {
    /// Hostname of this node.
    identity: NodeIdentity,

    /// Root every local path is joined under.
    root: PathBuf,

    materializer: M,

    state: LoopState,
}

impl Reconciler<DirMaterializer> {
    /// Create a reconciler writing to the local filesystem.
    pub fn with_filesystem(identity: NodeIdentity, root: impl Into<PathBuf>) -> Self {
        Self::new(identity, root, DirMaterializer::new())
    }
}

impl<M: Materializer> Reconciler<M> {
    /// Create a new reconciler.
    pub fn new(identity: NodeIdentity, root: impl Into<PathBuf>, materializer: M) -> Self {
        Self {
            identity,
            root: root.into(),
            materializer,
            state: LoopState::Stopped,
        }
    }

    /// Current loop state.
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Root directory volumes are materialized under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Consume events until cancellation or a terminal source failure.
    ///
    /// `shutdown` flipping to `true`, or its sender being dropped, cancels
    /// the loop cleanly. The source is stopped on every exit path.
    pub async fn run<S>(
        &mut self,
        source: &mut S,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ReconcileError>
    where
        S: EventSource + ?Sized,
    {
        info!(
            node = %self.identity,
            root = %self.root.display(),
            "Starting reconciliation loop"
        );
        self.transition(LoopState::Running);

        let result = loop {
            if *shutdown.borrow_and_update() {
                break Ok(());
            }

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                }
                event = source.next_event() => match event {
                    Some(ReconcileEvent::Added(volume) | ReconcileEvent::Modified(volume)) => {
                        self.reconcile(&volume);
                    }
                    Some(ReconcileEvent::Error(reason)) => {
                        error!(reason = %reason, "Volume event source failed");
                        break Err(ReconcileError::Transport(reason));
                    }
                    None => {
                        error!("Volume event source closed");
                        break Err(ReconcileError::SourceClosed);
                    }
                },
            }
        };

        if result.is_ok() {
            info!("Reconciler shutting down");
            self.transition(LoopState::Draining);
        }

        source.stop().await;
        self.transition(LoopState::Stopped);

        result
    }

    /// Reconcile a single volume snapshot.
    pub fn reconcile(&self, volume: &VolumeDescriptor) -> Disposition {
        let Some(local_path) = volume.local_path.as_deref() else {
            info!(volume = %volume.name, "Not a local volume, skipping");
            return Disposition::NotLocal;
        };

        let Some(terms) = volume.required_terms.as_deref() else {
            info!(
                volume = %volume.name,
                "Volume has no required node affinity, skipping"
            );
            return Disposition::NoConstraint;
        };

        if !matches(&self.identity, terms) {
            debug!(
                volume = %volume.name,
                node = %self.identity,
                "Volume is not placed on this node"
            );
            return Disposition::NotSelected;
        }

        match self.materializer.ensure(&self.root, local_path) {
            Ok(Materialization::Created(path)) => {
                info!(
                    volume = %volume.name,
                    path = %path.display(),
                    "Created volume directory"
                );
                Disposition::Materialized(Materialization::Created(path))
            }
            Ok(Materialization::AlreadyPresent(path)) => {
                debug!(
                    volume = %volume.name,
                    path = %path.display(),
                    "Volume directory already present"
                );
                Disposition::Materialized(Materialization::AlreadyPresent(path))
            }
            Err(e) => {
                error!(
                    volume = %volume.name,
                    path = %e.path().display(),
                    error = %e,
                    "Failed to materialize volume directory"
                );
                Disposition::Failed(e)
            }
        }
    }

    fn transition(&mut self, next: LoopState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "Reconciler state change");
            self.state = next;
        }
    }
}
