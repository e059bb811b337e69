//! Certes fact store: symbolic propositions + forward-chaining evaluation.
//!
//! Facts are `(key, value)` pairs where the key is a normalized
//! dot-notation proposition (e.g. `finance.sp500.has_ceo`) and the value is
//! a boolean, number, or string assertion. Rules are immutable conditionals:
//! *if the condition key holds truthy, the conclusion key takes the
//! conclusion value*.
//!
//! Evaluation is deterministic by construction:
//!
//! - facts live in a `BTreeMap`, so iteration order is stable;
//! - rule sets that could conclude different values for the same key are
//!   rejected at load time ([`KbError::ConflictingRule`]), so derived values
//!   cannot depend on scan order;
//! - forward chaining runs on a private working copy and is bounded by
//!   [`MAX_CHAIN_PASSES`] full scans, so cyclic rule graphs terminate with
//!   "not found" instead of looping.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use thiserror::Error;

/// Upper bound on full rule-scan passes during forward chaining.
///
/// This is a safety bound against pathological rule graphs, not a tunable:
/// a chain that needs more passes is treated as non-resolvable.
pub const MAX_CHAIN_PASSES: usize = 10;

/// A fact value: boolean, number, or string assertion.
///
/// `#[serde(untagged)]` so domain JSON (`{"facts": {"a": true, "b": "x"}}`)
/// deserializes without wrapper tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FactValue {
    /// Truthiness used by rule conditions: `false`, `0`, and `""` are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            FactValue::Bool(b) => *b,
            FactValue::Number(n) => *n != 0.0,
            FactValue::Text(s) => !s.is_empty(),
        }
    }
}

impl fmt::Display for FactValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactValue::Bool(b) => write!(f, "{b}"),
            FactValue::Number(n) => write!(f, "{n}"),
            FactValue::Text(s) => write!(f, "{s}"),
        }
    }
}

/// A conditional rule: if `condition` holds truthy, `conclude` takes `value`.
///
/// Field names follow the domain-file wire format: `if` / `then` / `conclude`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(rename = "if")]
    pub condition: String,
    #[serde(rename = "then")]
    pub value: FactValue,
    #[serde(rename = "conclude")]
    pub conclude: String,
}

/// Outcome of a single [`FactStore::evaluate`] call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub found: bool,
    pub value: Option<FactValue>,
    /// Ordered derivation steps justifying `value` (or a diagnostic entry
    /// naming the pass count when nothing was derivable).
    pub proof: Vec<String>,
}

/// Errors surfaced while loading facts/rules into a store.
#[derive(Debug, Error)]
pub enum KbError {
    /// Two rules would conclude different values for the same key. Accepting
    /// both would make derived values depend on rule-scan order.
    #[error(
        "conflicting rules for conclusion key `{key}`: `{existing}` vs `{incoming}`"
    )]
    ConflictingRule {
        key: String,
        existing: String,
        incoming: String,
    },
}

/// Payload of one knowledge domain file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainData {
    #[serde(default)]
    pub facts: BTreeMap<String, FactValue>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// The symbolic fact store: one fact mapping + one ordered rule sequence.
///
/// Exclusively owned by one inference engine at a time; a configuration
/// switch replaces the store wholesale rather than mutating it in place.
#[derive(Debug, Clone, Default)]
pub struct FactStore {
    facts: BTreeMap<String, FactValue>,
    rules: Vec<Rule>,
    domains: BTreeSet<String>,
}

impl FactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assert a fact, overwriting any previous value for the key.
    pub fn assert(&mut self, key: impl Into<String>, value: FactValue) {
        self.facts.insert(key.into(), value);
    }

    /// Direct fact lookup; no chaining.
    pub fn lookup(&self, key: &str) -> Option<&FactValue> {
        self.facts.get(key)
    }

    /// Merge one loaded domain into the store.
    ///
    /// Rule conflicts are rejected up front: if an incoming rule concludes a
    /// different value for a key than a rule already registered (or earlier
    /// in the same batch), the whole domain is refused and the store is left
    /// unchanged. Exact duplicates are accepted idempotently.
    pub fn extend(
        &mut self,
        domain_name: &str,
        data: DomainData,
    ) -> Result<(), KbError> {
        let mut accepted: Vec<Rule> = Vec::new();
        for rule in data.rules {
            let clash = self
                .rules
                .iter()
                .chain(accepted.iter())
                .find(|r| r.conclude == rule.conclude && r.value != rule.value);
            if let Some(existing) = clash {
                return Err(KbError::ConflictingRule {
                    key: rule.conclude.clone(),
                    existing: format!(
                        "IF {} THEN {} = {}",
                        existing.condition, existing.conclude, existing.value
                    ),
                    incoming: format!(
                        "IF {} THEN {} = {}",
                        rule.condition, rule.conclude, rule.value
                    ),
                });
            }
            let duplicate = self
                .rules
                .iter()
                .chain(accepted.iter())
                .any(|r| *r == rule);
            if !duplicate {
                accepted.push(rule);
            }
        }

        self.facts.extend(data.facts);
        self.rules.extend(accepted);
        self.domains.insert(domain_name.to_string());
        Ok(())
    }

    /// Evaluate a normalized query key via direct lookup, then forward
    /// chaining over a private working copy of the fact mapping.
    pub fn evaluate(&self, key: &str) -> Evaluation {
        if let Some(value) = self.facts.get(key) {
            return Evaluation {
                found: true,
                value: Some(value.clone()),
                proof: vec![format!("Direct fact assertion: {key} = {value}")],
            };
        }

        let mut derived = self.facts.clone();
        let mut proof = Vec::new();
        let mut passes = 0;
        let mut changed = true;

        while changed && passes < MAX_CHAIN_PASSES {
            changed = false;
            passes += 1;
            for rule in &self.rules {
                let fires = derived
                    .get(&rule.condition)
                    .is_some_and(FactValue::is_truthy);
                if fires && !derived.contains_key(&rule.conclude) {
                    derived.insert(rule.conclude.clone(), rule.value.clone());
                    proof.push(format!(
                        "Rule applied: IF {} THEN {} = {}",
                        rule.condition, rule.conclude, rule.value
                    ));
                    changed = true;
                }
            }
        }

        if let Some(value) = derived.get(key) {
            proof.push(format!("Derived: {key} = {value}"));
            return Evaluation {
                found: true,
                value: Some(value.clone()),
                proof,
            };
        }

        Evaluation {
            found: false,
            value: None,
            proof: vec![format!(
                "Query `{key}` not found in the fact store after {passes} \
                 inference passes."
            )],
        }
    }

    pub fn fact_count(&self) -> usize {
        self.facts.len()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Loaded domain names, sorted.
    pub fn loaded_domains(&self) -> Vec<String> {
        self.domains.iter().cloned().collect()
    }
}
