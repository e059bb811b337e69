//! Persona document loading and validation.
//!
//! This crate is the configuration-loading collaborator the core pipeline
//! talks to through [`certes_core::ConfigSource`]. It owns every file and
//! format concern:
//!
//! - persona JSON documents (`<personas_dir>/<id>.json`, schema below),
//! - the immutable constitution document (built-in default when absent),
//! - knowledge domain files (`<knowledge_dir>/<domain with . -> _>.json`
//!   containing `{"facts": {...}, "rules": [...]}`).
//!
//! All loading happens at configuration-switch time; the core never does
//! I/O inside a processing cycle.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use certes_core::persona::DEFAULT_CONSTITUTION;
use certes_core::{ConfigError, ConfigSource, GuardrailFlags, OutputFormat, PersonaConfig};
use certes_kb::{DomainData, FactValue, Rule};

/// The only persona document schema version this loader accepts.
pub const SUPPORTED_SCHEMA_VERSION: &str = "1.0";

/// Errors surfaced while loading persona documents from disk.
#[derive(Debug, Error)]
pub enum PersonaLoadError {
    #[error("persona file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid persona document `{path}`: {reason}")]
    Schema { path: PathBuf, reason: String },
}

// ----------------------------------------------------------------------
// Wire schema (serde camelCase, matching the persona document format)
// ----------------------------------------------------------------------

// Unknown extra fields are tolerated; only the required sections are
// validated. Missing sections fail deserialization.
#[derive(Debug, Deserialize)]
struct PersonaDocument {
    #[serde(rename = "schemaVersion")]
    schema_version: String,
    #[serde(rename = "personaId")]
    persona_id: String,
    identity: IdentitySection,
    knowledge: KnowledgeSection,
    skills: SkillsSection,
    constraints: ConstraintsSection,
    evolution: EvolutionSection,
}

#[derive(Debug, Deserialize)]
struct IdentitySection {
    name: String,
    archetype: String,
    #[serde(default)]
    description: String,
    // Voice/tone metadata is carried by the document but not interpreted
    // by the pipeline; accept and ignore it.
    #[serde(default)]
    #[allow(dead_code)]
    voice: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct KnowledgeSection {
    domains: Vec<String>,
    #[serde(rename = "accessLevel", default)]
    #[allow(dead_code)]
    access_level: String,
    #[serde(rename = "allowInference", default)]
    allow_inference: bool,
    #[serde(rename = "inferenceDepth", default = "default_inference_depth")]
    inference_depth: u32,
}

fn default_inference_depth() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct SkillsSection {
    enabled: Vec<String>,
    disabled: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ConstraintsSection {
    #[serde(rename = "outputFormat", default)]
    output_format: OutputFormat,
    #[serde(rename = "maxResponseTokens", default = "default_max_tokens")]
    max_response_tokens: usize,
    #[serde(rename = "disallowedActions", default)]
    disallowed_actions: Vec<String>,
    #[serde(rename = "ethicalGuardrails", default)]
    ethical_guardrails: GuardrailFlags,
}

fn default_max_tokens() -> usize {
    2048
}

#[derive(Debug, Deserialize)]
struct EvolutionSection {
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct DomainFile {
    #[serde(default)]
    facts: BTreeMap<String, FactValue>,
    #[serde(default)]
    rules: Vec<Rule>,
}

// ----------------------------------------------------------------------
// Loader
// ----------------------------------------------------------------------

/// File-backed [`ConfigSource`]: personas, constitution, knowledge domains.
pub struct FilePersonaSource {
    personas_dir: PathBuf,
    knowledge_dir: PathBuf,
    constitution: String,
}

impl FilePersonaSource {
    /// The constitution is read once at construction; it cannot be
    /// overridden by any persona document afterwards.
    pub fn new(
        personas_dir: impl Into<PathBuf>,
        knowledge_dir: impl Into<PathBuf>,
        constitution_path: Option<&Path>,
    ) -> Self {
        let constitution = match constitution_path {
            Some(path) => match fs::read_to_string(path) {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "constitution unreadable; using built-in default"
                    );
                    DEFAULT_CONSTITUTION.to_string()
                }
            },
            None => DEFAULT_CONSTITUTION.to_string(),
        };
        FilePersonaSource {
            personas_dir: personas_dir.into(),
            knowledge_dir: knowledge_dir.into(),
            constitution,
        }
    }

    pub fn constitution(&self) -> &str {
        &self.constitution
    }

    fn load_document(&self, id: &str) -> Result<PersonaConfig, PersonaLoadError> {
        let path = self.personas_dir.join(format!("{id}.json"));
        if !path.exists() {
            return Err(PersonaLoadError::NotFound(path));
        }
        let text = fs::read_to_string(&path).map_err(|source| PersonaLoadError::Io {
            path: path.clone(),
            source,
        })?;
        let doc: PersonaDocument =
            serde_json::from_str(&text).map_err(|e| PersonaLoadError::Schema {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        if doc.schema_version != SUPPORTED_SCHEMA_VERSION {
            return Err(PersonaLoadError::Schema {
                path,
                reason: format!(
                    "unsupported schemaVersion `{}` (expected `{SUPPORTED_SCHEMA_VERSION}`)",
                    doc.schema_version
                ),
            });
        }

        Ok(PersonaConfig {
            persona_id: doc.persona_id,
            name: doc.identity.name,
            archetype: doc.identity.archetype,
            description: doc.identity.description,
            domains: doc.knowledge.domains,
            allow_inference: doc.knowledge.allow_inference,
            inference_depth: doc.knowledge.inference_depth,
            skills_enabled: doc.skills.enabled,
            skills_disabled: doc.skills.disabled,
            output_format: doc.constraints.output_format,
            max_response_tokens: doc.constraints.max_response_tokens,
            disallowed_actions: doc.constraints.disallowed_actions,
            guardrails: doc.constraints.ethical_guardrails,
            evolution_enabled: doc.evolution.enabled,
            constitution: self.constitution.clone(),
        })
    }
}

impl ConfigSource for FilePersonaSource {
    fn load_configuration(&self, id: &str) -> Result<PersonaConfig, ConfigError> {
        self.load_document(id).map_err(|err| match err {
            PersonaLoadError::NotFound(_) => ConfigError::NotFound(id.to_string()),
            other => ConfigError::Schema {
                id: id.to_string(),
                reason: other.to_string(),
            },
        })
    }

    fn load_fact_domain(&self, domain: &str) -> Option<DomainData> {
        let file = format!("{}.json", domain.replace('.', "_"));
        let path = self.knowledge_dir.join(file);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(_) => {
                tracing::warn!(
                    domain,
                    path = %path.display(),
                    "knowledge domain file missing"
                );
                return None;
            }
        };
        match serde_json::from_str::<DomainFile>(&text) {
            Ok(file) => Some(DomainData {
                facts: file.facts,
                rules: file.rules,
            }),
            Err(err) => {
                tracing::warn!(
                    domain,
                    path = %path.display(),
                    error = %err,
                    "knowledge domain file malformed; skipping"
                );
                None
            }
        }
    }

    fn list_configuration_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        let Ok(entries) = fs::read_dir(&self.personas_dir) else {
            return ids;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const ANALYST_DOC: &str = r#"{
        "schemaVersion": "1.0",
        "personaId": "analyst",
        "identity": {
            "name": "Analyst",
            "archetype": "Financial Analyst",
            "description": "Reads indices.",
            "voice": {"tone": "formal"}
        },
        "knowledge": {
            "domains": ["finance"],
            "accessLevel": "public_data_only",
            "allowInference": true,
            "inferenceDepth": 3
        },
        "skills": {"enabled": ["data_query"], "disabled": ["speculation"]},
        "constraints": {
            "outputFormat": "text/plain",
            "maxResponseTokens": 1024,
            "disallowedActions": ["external_api_call"],
            "ethicalGuardrails": {"noPII": true, "noFinancialAdvice": true}
        },
        "evolution": {"enabled": false}
    }"#;

    fn fixture() -> (TempDir, FilePersonaSource) {
        let dir = TempDir::new().unwrap();
        let personas = dir.path().join("personas");
        let knowledge = dir.path().join("knowledge");
        fs::create_dir_all(&personas).unwrap();
        fs::create_dir_all(&knowledge).unwrap();

        fs::write(personas.join("analyst.json"), ANALYST_DOC).unwrap();
        fs::write(
            knowledge.join("finance.json"),
            r#"{
                "facts": {"finance.sp500.is_index": true},
                "rules": [
                    {"if": "finance.sp500.is_index", "then": true,
                     "conclude": "finance.sp500.has_constituents"}
                ]
            }"#,
        )
        .unwrap();

        let source = FilePersonaSource::new(personas, knowledge, None);
        (dir, source)
    }

    #[test]
    fn loads_and_validates_persona_document() {
        let (_dir, source) = fixture();
        let persona = source.load_configuration("analyst").unwrap();
        assert_eq!(persona.persona_id, "analyst");
        assert_eq!(persona.name, "Analyst");
        assert_eq!(persona.domains, vec!["finance".to_string()]);
        assert_eq!(persona.max_response_tokens, 1024);
        assert!(persona.guardrails.no_pii);
        assert!(persona.guardrails.no_financial_advice);
        assert!(!persona.guardrails.no_medical_advice);
        assert!(!persona.is_skill_permitted("speculation"));
        assert_eq!(persona.constitution, DEFAULT_CONSTITUTION);
    }

    #[test]
    fn missing_persona_is_not_found() {
        let (_dir, source) = fixture();
        let err = source.load_configuration("ghost").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(ref id) if id == "ghost"));
    }

    #[test]
    fn malformed_json_is_schema_error() {
        let (dir, _) = fixture();
        let personas = dir.path().join("personas");
        fs::write(personas.join("broken.json"), "{not json").unwrap();
        let source =
            FilePersonaSource::new(personas, dir.path().join("knowledge"), None);
        let err = source.load_configuration("broken").unwrap_err();
        assert!(matches!(err, ConfigError::Schema { .. }));
    }

    #[test]
    fn missing_required_section_is_schema_error() {
        let (dir, _) = fixture();
        let personas = dir.path().join("personas");
        fs::write(
            personas.join("partial.json"),
            r#"{"schemaVersion": "1.0", "personaId": "partial"}"#,
        )
        .unwrap();
        let source =
            FilePersonaSource::new(personas, dir.path().join("knowledge"), None);
        assert!(source.load_configuration("partial").is_err());
    }

    #[test]
    fn wrong_schema_version_is_rejected() {
        let (dir, _) = fixture();
        let personas = dir.path().join("personas");
        fs::write(
            personas.join("v2.json"),
            ANALYST_DOC.replacen("\"1.0\"", "\"2.0\"", 1),
        )
        .unwrap();
        let source =
            FilePersonaSource::new(personas, dir.path().join("knowledge"), None);
        let err = source.load_configuration("v2").unwrap_err();
        assert!(err.to_string().contains("schemaVersion"));
    }

    #[test]
    fn domain_file_loads_facts_and_rules() {
        let (_dir, source) = fixture();
        let data = source.load_fact_domain("finance").unwrap();
        assert_eq!(data.facts.len(), 1);
        assert_eq!(data.rules.len(), 1);
        assert_eq!(data.rules[0].conclude, "finance.sp500.has_constituents");
    }

    #[test]
    fn dotted_domain_name_maps_to_underscored_file() {
        let (dir, _) = fixture();
        let knowledge = dir.path().join("knowledge");
        fs::write(knowledge.join("finance_bonds.json"), r#"{"facts": {"a": 1}}"#).unwrap();
        let source =
            FilePersonaSource::new(dir.path().join("personas"), knowledge, None);
        assert!(source.load_fact_domain("finance.bonds").is_some());
    }

    #[test]
    fn absent_domain_is_none_not_error() {
        let (_dir, source) = fixture();
        assert!(source.load_fact_domain("astrology").is_none());
    }

    #[test]
    fn list_ids_is_sorted_json_stems() {
        let (dir, _) = fixture();
        let personas = dir.path().join("personas");
        fs::write(personas.join("zeta.json"), ANALYST_DOC).unwrap();
        fs::write(personas.join("notes.txt"), "ignored").unwrap();
        let source =
            FilePersonaSource::new(personas, dir.path().join("knowledge"), None);
        assert_eq!(source.list_configuration_ids(), vec!["analyst", "zeta"]);
    }

    #[test]
    fn constitution_file_is_loaded_once() {
        let dir = TempDir::new().unwrap();
        let constitution_path = dir.path().join("constitution.md");
        fs::write(&constitution_path, "THE LAW\n").unwrap();
        let source = FilePersonaSource::new(
            dir.path().join("personas"),
            dir.path().join("knowledge"),
            Some(&constitution_path),
        );
        assert_eq!(source.constitution(), "THE LAW\n");
    }
}
