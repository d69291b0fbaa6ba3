//! Volume descriptor model.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors building a node identity.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// The hostname was empty or whitespace.
    #[error("node identity must not be empty")]
    Empty,
}

/// Hostname of the node this process is responsible for.
///
/// Immutable for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeIdentity(String);

impl NodeIdentity {
    /// Create a node identity from a hostname.
    pub fn new(hostname: impl Into<String>) -> Result<Self, IdentityError> {
        let hostname = hostname.into();
        if hostname.trim().is_empty() {
            return Err(IdentityError::Empty);
        }
        Ok(Self(hostname))
    }

    /// Get the hostname string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for NodeIdentity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Operator of a placement match expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOperator {
    /// The node value must be one of the listed values.
    In,

    /// The node value must not be one of the listed values.
    NotIn,

    /// Any other operator (`Exists`, `Gt`, ...). Carries the raw name.
    Unsupported(String),
}

impl MatchOperator {
    /// Parse an operator name as it appears on the wire.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "In" => Self::In,
            "NotIn" => Self::NotIn,
            other => Self::Unsupported(other.to_string()),
        }
    }

    /// Wire name of the operator.
    pub fn as_str(&self) -> &str {
        match self {
            Self::In => "In",
            Self::NotIn => "NotIn",
            Self::Unsupported(raw) => raw,
        }
    }
}

impl fmt::Display for MatchOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single `key <operator> values` requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchExpression {
    /// Label key the requirement applies to.
    pub key: String,

    /// Comparison operator.
    pub operator: MatchOperator,

    /// Values compared against, in source order.
    pub values: Vec<String>,
}

impl MatchExpression {
    /// Create a match expression.
    pub fn new<I, S>(key: impl Into<String>, operator: MatchOperator, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: key.into(),
            operator,
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// An ordered list of match expressions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlacementTerm {
    /// Expressions, evaluated in source order.
    pub expressions: Vec<MatchExpression>,
}

impl PlacementTerm {
    /// Create a term from its expressions.
    pub fn new(expressions: Vec<MatchExpression>) -> Self {
        Self { expressions }
    }
}

/// Snapshot of one cluster volume as observed from the event feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeDescriptor {
    /// Volume name.
    pub name: String,

    /// Path relative to the node-local root. `None` for non-local volumes.
    pub local_path: Option<String>,

    /// Required placement terms. `None` when the volume has no constraint.
    pub required_terms: Option<Vec<PlacementTerm>>,
}

impl VolumeDescriptor {
    /// Create a descriptor with no local path and no placement constraint.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            local_path: None,
            required_terms: None,
        }
    }

    /// Set the local storage path.
    pub fn with_local_path(mut self, path: impl Into<String>) -> Self {
        self.local_path = Some(path.into());
        self
    }

    /// Set the required placement terms.
    pub fn with_required_terms(mut self, terms: Vec<PlacementTerm>) -> Self {
        self.required_terms = Some(terms);
        self
    }
}

/// A change notification delivered to the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileEvent {
    /// A volume was observed for the first time.
    Added(VolumeDescriptor),

    /// A known volume changed, or was re-delivered by a resync.
    Modified(VolumeDescriptor),

    /// The upstream feed failed. Terminal for the consumer.
    Error(String),
}

impl ReconcileEvent {
    /// Short name of the event kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Added(_) => "added",
            Self::Modified(_) => "modified",
            Self::Error(_) => "error",
        }
    }
}
