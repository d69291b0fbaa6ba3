//! Reconciliation primitives for local persistent volumes.
//!
//! This library holds the IO-free half of the provisioner:
//!
//! - **Descriptors**: immutable snapshots of cluster volumes as they arrive
//!   from the event feed ([`VolumeDescriptor`], [`ReconcileEvent`]).
//! - **Placement**: the evaluator deciding whether a volume's required
//!   node-affinity terms select this node ([`matches`]).
//!
//! # Invariants
//!
//! - Descriptors are never mutated once handed to the reconciler; a change
//!   to the same volume arrives as a fresh snapshot.
//! - Placement evaluation is deterministic given the same inputs and walks
//!   terms and expressions strictly in source order.

mod descriptor;
mod placement;

pub use descriptor::{
    IdentityError, MatchExpression, MatchOperator, NodeIdentity, PlacementTerm, ReconcileEvent,
    VolumeDescriptor,
};
pub use placement::{matches, HOSTNAME_KEY};
