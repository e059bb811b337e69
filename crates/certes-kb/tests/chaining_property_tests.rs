use certes_kb::{DomainData, FactStore, FactValue, Rule};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn key() -> impl Strategy<Value = String> {
    // Small key alphabet so generated rule graphs actually chain and cycle.
    proptest::string::string_regex("[a-f](\\.[a-f]){0,2}").unwrap()
}

fn value() -> impl Strategy<Value = FactValue> {
    prop_oneof![
        any::<bool>().prop_map(FactValue::Bool),
        (0u8..10).prop_map(|n| FactValue::Number(n as f64)),
        "[a-z]{0,4}".prop_map(FactValue::Text),
    ]
}

fn rules() -> impl Strategy<Value = Vec<Rule>> {
    proptest::collection::vec(
        (key(), value(), key()).prop_map(|(condition, value, conclude)| Rule {
            condition,
            value,
            conclude,
        }),
        // Strictly fewer rules than MAX_CHAIN_PASSES: any chain completes
        // within the pass cap regardless of rule order.
        0..10,
    )
}

fn facts() -> impl Strategy<Value = BTreeMap<String, FactValue>> {
    proptest::collection::btree_map(key(), value(), 0..8)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Forward chaining terminates and answers identically on repeated calls
    /// for any rule graph (cyclic ones included), because the pass cap bounds
    /// the scan and loading rejects order-dependent rule sets.
    #[test]
    fn evaluate_terminates_and_is_deterministic(
        facts in facts(),
        rules in rules(),
        query in key(),
    ) {
        let mut store = FactStore::new();
        // Conflicting generated rule sets are legitimately refused; the
        // property only concerns stores that loaded successfully.
        if store.extend("gen", DomainData { facts, rules }).is_err() {
            return Ok(());
        }

        let first = store.evaluate(&query);
        let second = store.evaluate(&query);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.found, first.value.is_some());
        prop_assert!(!first.proof.is_empty());
    }

    /// Derived values never depend on the insertion order of non-conflicting
    /// rules.
    #[test]
    fn rule_order_does_not_change_answers(
        facts in facts(),
        rules in rules(),
        query in key(),
    ) {
        let mut forward = FactStore::new();
        if forward
            .extend("gen", DomainData { facts: facts.clone(), rules: rules.clone() })
            .is_err()
        {
            return Ok(());
        }

        let mut reversed_rules = rules;
        reversed_rules.reverse();
        let mut backward = FactStore::new();
        backward
            .extend("gen", DomainData { facts, rules: reversed_rules })
            .expect("reversal cannot introduce conflicts");

        let a = forward.evaluate(&query);
        let b = backward.evaluate(&query);
        prop_assert_eq!(a.found, b.found);
        prop_assert_eq!(a.value, b.value);
    }
}
