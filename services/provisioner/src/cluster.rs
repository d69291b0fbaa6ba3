//! Cluster API access.
//!
//! Builds the Kubernetes client and translates `PersistentVolume` objects
//! into the descriptors the reconciler works on.

use k8s_openapi::api::core::v1::{NodeSelectorTerm, PersistentVolume};
use kube::config::{KubeConfigOptions, KubeconfigError};
use kube::{Client, Config};
use lpv_reconcile::{MatchExpression, MatchOperator, PlacementTerm, VolumeDescriptor};
use thiserror::Error;
use tracing::info;

/// Errors constructing the cluster client.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// In-cluster service account configuration was unavailable.
    #[error("failed to load in-cluster configuration: {0}")]
    InCluster(#[from] kube::config::InClusterError),

    /// The kubeconfig could not be loaded or lacks the requested context.
    #[error("failed to load kubeconfig: {0}")]
    Kubeconfig(#[from] KubeconfigError),

    /// The client could not be built from the configuration.
    #[error("failed to build cluster client: {0}")]
    Client(#[from] kube::Error),
}

/// Connect to the cluster.
///
/// With a context name the user's kubeconfig is loaded and that context is
/// selected; otherwise the in-cluster service account is used.
pub async fn connect(context: Option<&str>) -> Result<Client, ClusterError> {
    let config = match context {
        Some(context) => {
            info!(context, "Loading kubeconfig context");
            let options = KubeConfigOptions {
                context: Some(context.to_string()),
                ..KubeConfigOptions::default()
            };
            Config::from_kubeconfig(&options).await?
        }
        None => {
            info!("Using in-cluster configuration");
            Config::incluster()?
        }
    };

    Ok(Client::try_from(config)?)
}

/// Snapshot a `PersistentVolume` as a descriptor.
///
/// `required_terms` is present only when both `nodeAffinity` and its
/// `required` selector are set. `matchFields` are not modeled.
pub fn descriptor_from_pv(pv: &PersistentVolume) -> VolumeDescriptor {
    let name = pv.metadata.name.clone().unwrap_or_default();
    let spec = pv.spec.as_ref();

    let local_path = spec
        .and_then(|s| s.local.as_ref())
        .map(|local| local.path.clone());

    let required_terms = spec
        .and_then(|s| s.node_affinity.as_ref())
        .and_then(|affinity| affinity.required.as_ref())
        .map(|selector| selector.node_selector_terms.iter().map(term_from).collect());

    VolumeDescriptor {
        name,
        local_path,
        required_terms,
    }
}

fn term_from(term: &NodeSelectorTerm) -> PlacementTerm {
    let expressions = term
        .match_expressions
        .iter()
        .flatten()
        .map(|req| MatchExpression {
            key: req.key.clone(),
            operator: MatchOperator::parse(&req.operator),
            values: req.values.clone().unwrap_or_default(),
        })
        .collect();

    PlacementTerm::new(expressions)
}
