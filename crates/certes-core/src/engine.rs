//! The inference engine: deterministic query resolution.
//!
//! Processing order is strict and every failure path short-circuits the
//! rest: normalize → domain authorization → ambiguity screen → fact-store
//! evaluation → natural-language fallback → terminal halt. All failure
//! modes are represented in the returned [`InferenceOutcome`]; `process`
//! never errors toward the caller and never retries.
//!
//! The natural-language fallback is an explicit ordered list of
//! (predicate, handler) pairs with first-match-wins semantics, so the
//! matcher order is auditable and each matcher is testable in isolation.

use certes_kb::FactStore;
use serde::{Deserialize, Serialize};

use crate::persona::{OutputFormat, PersonaConfig};

/// Markers whose presence in a normalized key denotes unresolved
/// disjunction or unknown references. Purely syntactic: the screen exists
/// to keep the engine from silently picking one of several derivations.
const AMBIGUITY_MARKERS: &[&str] = &["or.not", "maybe", "possibly", "undefined", "unknown.unknown"];

/// Result of one inference cycle. Exactly one of `answer` / `halt_reason`
/// is present, determined by `success`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceOutcome {
    pub success: bool,
    pub answer: Option<String>,
    pub proof: Vec<String>,
    pub halt_reason: Option<String>,
}

impl InferenceOutcome {
    pub fn success(answer: String, proof: Vec<String>) -> Self {
        InferenceOutcome {
            success: true,
            answer: Some(answer),
            proof,
            halt_reason: None,
        }
    }

    pub fn halt(reason: String) -> Self {
        Self::halt_with_proof(reason, Vec::new())
    }

    /// Halt that preserves an already-accumulated proof trace (e.g. the
    /// diagnostic entries from a failed fact-store evaluation).
    pub fn halt_with_proof(reason: String, proof: Vec<String>) -> Self {
        InferenceOutcome {
            success: false,
            answer: None,
            proof,
            halt_reason: Some(reason),
        }
    }
}

/// One entry of the engine's per-process query log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryLogEntry {
    pub raw: String,
    pub normalized: String,
}

/// An ordered natural-language matcher: `applies` decides on the raw
/// lowercased query; `respond` may still decline (the generic "what is X"
/// family answers only when the fact store derives the subject).
struct NlMatcher {
    applies: fn(&str) -> bool,
    respond: fn(&InferenceEngine, &str, &PersonaConfig) -> Option<InferenceOutcome>,
}

fn contains_any(q: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| q.contains(p))
}

/// Matchers are mutually exclusive by construction (disjoint phrase sets),
/// except the generic definition matcher, which is tried last.
const NL_MATCHERS: &[NlMatcher] = &[
    NlMatcher {
        applies: |q| contains_any(q, &["what is your name", "who are you", "identify yourself"]),
        respond: |_, _, persona| {
            Some(InferenceOutcome::success(
                format!(
                    "Designation: {}\nArchetype: {}\nPersona ID: {}\n\
                     Authorized Domains: {}\nEvolution Enabled: {}",
                    persona.name,
                    persona.archetype,
                    persona.persona_id,
                    persona.domains.join(", "),
                    persona.evolution_enabled
                ),
                vec!["Identity resolved from active persona configuration.".to_string()],
            ))
        },
    },
    NlMatcher {
        applies: |q| contains_any(q, &["what can you do", "list skills", "capabilities"]),
        respond: |_, _, persona| {
            Some(InferenceOutcome::success(
                format!(
                    "Enabled Skills: {}\nDisabled Skills: {}",
                    persona.skills_enabled.join(", "),
                    persona.skills_disabled.join(", ")
                ),
                vec!["Skills resolved from active persona configuration.".to_string()],
            ))
        },
    },
    NlMatcher {
        applies: |q| contains_any(q, &["constitution", "core axioms", "governing principles"]),
        respond: |_, _, persona| {
            Some(InferenceOutcome::success(
                persona.constitution.clone(),
                vec!["Constitution retrieved from immutable governing document.".to_string()],
            ))
        },
    },
    NlMatcher {
        applies: |q| contains_any(q, &["knowledge base", "how many facts", "loaded domains"]),
        respond: |engine, _, _| {
            let domains = engine.store.loaded_domains();
            Some(InferenceOutcome::success(
                format!(
                    "Loaded Domains: {}\nTotal Facts: {}\nTotal Rules: {}",
                    if domains.is_empty() {
                        "None".to_string()
                    } else {
                        domains.join(", ")
                    },
                    engine.store.fact_count(),
                    engine.store.rule_count()
                ),
                vec!["Fact store status retrieved from runtime state.".to_string()],
            ))
        },
    },
    NlMatcher {
        applies: |q| {
            ["what is ", "define ", "describe "]
                .iter()
                .any(|p| q.starts_with(p))
        },
        respond: |engine, query, _| {
            let subject = ["what is ", "define ", "describe "]
                .iter()
                .find_map(|p| query.strip_prefix(p))?
                .trim()
                .replace(' ', ".");
            let eval = engine.store.evaluate(&subject);
            if eval.found {
                Some(InferenceOutcome::success(
                    eval.value.map(|v| v.to_string()).unwrap_or_default(),
                    eval.proof,
                ))
            } else {
                None
            }
        },
    },
];

/// Resolves queries against the symbolic fact store under the constraints
/// of the active persona. Exclusively owns its [`FactStore`].
#[derive(Debug, Default)]
pub struct InferenceEngine {
    store: FactStore,
    query_log: Vec<QueryLogEntry>,
}

impl InferenceEngine {
    pub fn new(store: FactStore) -> Self {
        InferenceEngine {
            store,
            query_log: Vec::new(),
        }
    }

    pub fn store(&self) -> &FactStore {
        &self.store
    }

    /// Full query log (raw + normalized per call), for audit introspection.
    pub fn query_log(&self) -> &[QueryLogEntry] {
        &self.query_log
    }

    /// Process one query under the active persona. Strict step order; the
    /// first failing step produces the halt.
    pub fn process(&mut self, query: &str, persona: &PersonaConfig) -> InferenceOutcome {
        let normalized = normalize(query);
        self.query_log.push(QueryLogEntry {
            raw: query.to_string(),
            normalized: normalized.clone(),
        });
        tracing::debug!(raw = query, normalized = %normalized, "inference cycle");

        if let Some(detected) = domain_violation(&normalized, persona) {
            return InferenceOutcome::halt(format!(
                "DOMAIN VIOLATION: Query domain `{detected}` is not authorized for \
                 persona `{}`. Authorized domains: {:?}.",
                persona.name, persona.domains
            ));
        }

        if let Some(marker) = AMBIGUITY_MARKERS.iter().find(|m| normalized.contains(*m)) {
            return InferenceOutcome::halt(format!(
                "AMBIGUITY DETECTED: marker `{marker}` leaves no unique logical path. \
                 Explicit clarification is required before proceeding."
            ));
        }

        let eval = self.store.evaluate(&normalized);
        if let Some(value) = &eval.value {
            let answer = format_answer(&value.to_string(), query, persona.output_format);
            return InferenceOutcome::success(answer, eval.proof);
        }

        let lowered = query.trim().to_lowercase();
        for matcher in NL_MATCHERS {
            if (matcher.applies)(&lowered) {
                if let Some(outcome) = (matcher.respond)(self, &lowered, persona) {
                    return outcome;
                }
            }
        }

        InferenceOutcome::halt_with_proof(
            format!(
                "NO DERIVATION FOUND: the query `{query}` cannot be resolved under \
                 persona `{}`. Loaded domains: {:?}. Facts available: {}.",
                persona.name,
                self.store.loaded_domains(),
                self.store.fact_count()
            ),
            eval.proof,
        )
    }
}

/// Normalize raw query text to a canonical dot-notation lookup key:
/// lowercase, strip characters outside `[a-z0-9._ ]`, collapse whitespace
/// runs to single `.` separators.
pub fn normalize(query: &str) -> String {
    let lowered = query.trim().to_lowercase();
    let stripped: String = lowered
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | ' '))
        .collect();
    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(".")
}

/// Returns the detected (unauthorized) domain, or `None` when authorized.
///
/// Queries with at most two dot segments are always general/unrestricted:
/// short queries cannot be domain-scoped by design.
fn domain_violation(normalized: &str, persona: &PersonaConfig) -> Option<String> {
    if persona.domains.is_empty() {
        return None;
    }
    for domain in &persona.domains {
        let prefix = domain.to_lowercase().replace(' ', "_");
        if normalized.starts_with(&prefix) {
            return None;
        }
    }
    let segments: Vec<&str> = normalized.split('.').collect();
    if segments.len() <= 2 {
        return None;
    }
    Some(segments[0].to_string())
}

fn format_answer(value: &str, raw_query: &str, format: OutputFormat) -> String {
    match format {
        OutputFormat::PlainText => value.to_string(),
        OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
            "query": raw_query,
            "result": value,
            "status": "resolved",
        }))
        .expect("static envelope serializes"),
    }
}
