//! Node placement evaluation.
//!
//! Only the hostname label is understood. Expressions on any other key are
//! skipped, which makes them behave as if satisfied.

use crate::descriptor::{MatchOperator, NodeIdentity, PlacementTerm};

/// The only label key placement evaluation understands.
pub const HOSTNAME_KEY: &str = "kubernetes.io/hostname";

/// Decide whether `terms` select the node identified by `identity`.
///
/// A single accumulator is threaded through every expression of every term
/// in source order. `In` can only set it; `NotIn` sets it and then clears it
/// when the identity is listed. Terms are not AND-ed internally nor OR-ed
/// with each other, so a later term can overturn an earlier one.
pub fn matches(identity: &NodeIdentity, terms: &[PlacementTerm]) -> bool {
    let hostname = identity.as_str();
    let mut matched = false;

    for term in terms {
        for expr in &term.expressions {
            if expr.key != HOSTNAME_KEY {
                continue;
            }

            let listed = expr.values.iter().any(|v| v == hostname);
            match expr.operator {
                MatchOperator::In => {
                    if listed {
                        matched = true;
                    }
                }
                MatchOperator::NotIn => {
                    matched = !listed;
                }
                MatchOperator::Unsupported(_) => {}
            }
        }
    }

    matched
}
