//! Local PV provisioner.
//!
//! Runs on every node and makes sure each local `PersistentVolume` whose
//! required node affinity selects this node has a backing directory under
//! the mounted root filesystem.
//!
//! ## Architecture
//!
//! ```text
//! EventSource ──▶ Reconciler ──▶ placement::matches ──▶ Materializer
//! (watch/resync)   (one event       (hostname terms)      (mkdir -p 0755)
//!                   at a time)
//! ```
//!
//! Materialization is additive-only: directories are never removed, resized
//! or repaired when a volume goes away or stops matching.
//!
//! ## Modules
//!
//! - `cluster`: Kubernetes client construction and PV conversion
//! - `source`: Direct watch and cached resync event sources
//! - `materializer`: Idempotent directory creation
//! - `reconciler`: The event loop

pub mod cluster;
pub mod config;
pub mod materializer;
pub mod reconciler;
pub mod source;

// Re-export commonly used types
pub use materializer::{DirMaterializer, FilesystemError, Materialization, Materializer};
pub use reconciler::{Disposition, LoopState, ReconcileError, Reconciler};
pub use source::{ChannelSource, EventSource, ResyncSource, SourceMode, WatchSource};
