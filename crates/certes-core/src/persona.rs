//! Persona configuration: immutable value records + the loading seam.
//!
//! A persona is data, not behavior: every pipeline component receives the
//! active [`PersonaConfig`] explicitly and varies by its fields. There is no
//! trait dispatch on persona kind and no hidden global configuration.

use certes_kb::DomainData;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Output representation a persona demands for successful answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    #[default]
    #[serde(rename = "text/plain")]
    PlainText,
    #[serde(rename = "application/json")]
    Json,
}

/// Guardrail switches; each enables one governance content check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailFlags {
    #[serde(rename = "noPII", default)]
    pub no_pii: bool,
    #[serde(rename = "noFinancialAdvice", default)]
    pub no_financial_advice: bool,
    #[serde(rename = "noMedicalAdvice", default)]
    pub no_medical_advice: bool,
    #[serde(rename = "noLegalAdvice", default)]
    pub no_legal_advice: bool,
}

/// A loaded, validated persona configuration.
///
/// Immutable for its lifetime; a configuration switch replaces the whole
/// record (and the engine's fact store with it) atomically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaConfig {
    pub persona_id: String,
    pub name: String,
    pub archetype: String,
    pub description: String,
    /// Authorized knowledge domains; empty means unrestricted.
    pub domains: Vec<String>,
    pub allow_inference: bool,
    pub inference_depth: u32,
    pub skills_enabled: Vec<String>,
    pub skills_disabled: Vec<String>,
    pub output_format: OutputFormat,
    pub max_response_tokens: usize,
    pub disallowed_actions: Vec<String>,
    pub guardrails: GuardrailFlags,
    pub evolution_enabled: bool,
    /// The immutable governing-principles document. Loaded once, never
    /// overridable by any persona document.
    pub constitution: String,
}

/// Default governing-principles text used when no document is provided.
pub const DEFAULT_CONSTITUTION: &str = "\
CONSTITUTION OF CERTES
1. Primacy of Human Control: the operator's instructions govern.
2. Truthful Communication: only verifiable facts are stated.
3. Deterministic Execution: ambiguity halts processing.
4. Operational Transparency: every decision is logged and auditable.
";

impl PersonaConfig {
    /// The minimal built-in persona used when the default configuration
    /// cannot be loaded. Keeps the pipeline usable with an empty fact store.
    pub fn fallback() -> Self {
        PersonaConfig {
            persona_id: "default".to_string(),
            name: "Certes".to_string(),
            archetype: "General Assistant".to_string(),
            description: "Built-in fallback persona.".to_string(),
            domains: Vec::new(),
            allow_inference: true,
            inference_depth: 3,
            skills_enabled: vec![
                "data_query".to_string(),
                "report_generation".to_string(),
            ],
            skills_disabled: Vec::new(),
            output_format: OutputFormat::PlainText,
            max_response_tokens: 4096,
            disallowed_actions: Vec::new(),
            guardrails: GuardrailFlags {
                no_pii: true,
                ..GuardrailFlags::default()
            },
            evolution_enabled: false,
            constitution: DEFAULT_CONSTITUTION.to_string(),
        }
    }

    /// A skill is permitted when enabled and not disabled; disabled wins.
    pub fn is_skill_permitted(&self, skill: &str) -> bool {
        if self.skills_disabled.iter().any(|s| s == skill) {
            return false;
        }
        self.skills_enabled.iter().any(|s| s == skill)
    }

    pub fn is_action_permitted(&self, action: &str) -> bool {
        !self.disallowed_actions.iter().any(|a| a == action)
    }
}

/// Errors the configuration-loading collaborator can surface.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("persona `{0}` not found")]
    NotFound(String),
    #[error("persona `{id}` failed validation: {reason}")]
    Schema { id: String, reason: String },
}

/// The seam between the core and whatever loads configurations.
///
/// Implementations hand the core already-validated, in-memory structures;
/// all file/format concerns stay on their side of this trait.
pub trait ConfigSource {
    fn load_configuration(&self, id: &str) -> Result<PersonaConfig, ConfigError>;

    /// Fetch one knowledge domain's facts and rules. `None` is non-fatal:
    /// loading continues with the domains that were found.
    fn load_fact_domain(&self, domain: &str) -> Option<DomainData>;

    /// Available configuration identifiers, sorted.
    fn list_configuration_ids(&self) -> Vec<String>;
}
