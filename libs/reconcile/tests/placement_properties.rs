//! Property tests for placement evaluation.

use lpv_reconcile::{
    matches, MatchExpression, MatchOperator, NodeIdentity, PlacementTerm, HOSTNAME_KEY,
};
use proptest::prelude::*;

fn arb_hostname() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,12}"
}

fn arb_operator() -> impl Strategy<Value = MatchOperator> {
    prop_oneof![
        Just(MatchOperator::In),
        Just(MatchOperator::NotIn),
        prop::sample::select(vec!["Exists", "DoesNotExist", "Gt", "Lt"])
            .prop_map(|op| MatchOperator::Unsupported(op.to_string())),
    ]
}

fn arb_expression(key: impl Strategy<Value = String>) -> impl Strategy<Value = MatchExpression> {
    (
        key,
        arb_operator(),
        prop::collection::vec(arb_hostname(), 0..4),
    )
        .prop_map(|(key, operator, values)| MatchExpression {
            key,
            operator,
            values,
        })
}

fn arb_hostname_expression() -> impl Strategy<Value = MatchExpression> {
    arb_expression(Just(HOSTNAME_KEY.to_string()))
}

fn arb_foreign_expression() -> impl Strategy<Value = MatchExpression> {
    arb_expression(
        prop::sample::select(vec![
            "topology.kubernetes.io/zone",
            "kubernetes.io/os",
            "node-role",
            "",
        ])
        .prop_map(String::from),
    )
}

fn arb_terms() -> impl Strategy<Value = Vec<PlacementTerm>> {
    prop::collection::vec(
        prop::collection::vec(arb_hostname_expression(), 0..4).prop_map(PlacementTerm::new),
        0..4,
    )
}

proptest! {
    /// Inserting an expression on a foreign key anywhere never changes the result.
    #[test]
    fn prop_foreign_key_never_changes_result(
        identity in arb_hostname(),
        terms in arb_terms(),
        foreign in arb_foreign_expression(),
        term_seed in any::<usize>(),
        expr_seed in any::<usize>(),
    ) {
        let identity = NodeIdentity::new(identity).unwrap();
        let expected = matches(&identity, &terms);

        let mut with_foreign = terms.clone();
        if with_foreign.is_empty() {
            with_foreign.push(PlacementTerm::default());
        }
        let t = term_seed % with_foreign.len();
        let exprs = &mut with_foreign[t].expressions;
        let e = expr_seed % (exprs.len() + 1);
        exprs.insert(e, foreign);

        prop_assert_eq!(matches(&identity, &with_foreign), expected);
    }

    /// Only the last hostname expression that is `NotIn` or a listing `In` decides.
    #[test]
    fn prop_result_decided_by_last_effective_expression(
        identity in arb_hostname(),
        terms in arb_terms(),
    ) {
        let node = NodeIdentity::new(identity.clone()).unwrap();

        let last_effective = terms
            .iter()
            .flat_map(|t| t.expressions.iter())
            .filter_map(|e| {
                let listed = e.values.contains(&identity);
                match e.operator {
                    MatchOperator::In if listed => Some(true),
                    MatchOperator::NotIn => Some(!listed),
                    _ => None,
                }
            })
            .last()
            .unwrap_or(false);

        prop_assert_eq!(matches(&node, &terms), last_effective);
    }

    /// Splitting or merging terms does not change the outcome: the accumulator is global.
    #[test]
    fn prop_term_boundaries_are_irrelevant(
        identity in arb_hostname(),
        terms in arb_terms(),
    ) {
        let node = NodeIdentity::new(identity).unwrap();
        let flattened = vec![PlacementTerm::new(
            terms.iter().flat_map(|t| t.expressions.clone()).collect(),
        )];

        prop_assert_eq!(matches(&node, &terms), matches(&node, &flattened));
    }
}
