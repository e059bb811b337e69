//! The finite-state pipeline controller.
//!
//! Owns the current state, the active persona, the inference engine (and
//! with it the fact store), the governance layer, and the transition log.
//! Every query walks the same strict sequence:
//!
//! ```text
//! IDLE → LOAD_CONFIG → VALIDATE_INPUT → INFER → GOVERN → OUTPUT
//!                    ↘ (slash commands: direct OUTPUT/HALT)        ↘ HALT
//! ```
//!
//! No skips, no backward edges. HALT and OUTPUT are per-cycle terminal and
//! always return to IDLE before the next cycle; nothing leaks across cycles
//! except the active configuration and the accumulated audit history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::engine::InferenceEngine;
use crate::governance::{AuditEntry, GovernanceLayer};
use crate::persona::{ConfigError, ConfigSource, PersonaConfig};
use certes_kb::FactStore;

/// Maximum accepted input length, in characters.
pub const MAX_INPUT_CHARS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Idle,
    LoadConfig,
    ValidateInput,
    Infer,
    Govern,
    Output,
    Halt,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "IDLE",
            PipelineState::LoadConfig => "LOAD_CONFIG",
            PipelineState::ValidateInput => "VALIDATE_INPUT",
            PipelineState::Infer => "INFER",
            PipelineState::Govern => "GOVERN",
            PipelineState::Output => "OUTPUT",
            PipelineState::Halt => "HALT",
        };
        f.write_str(name)
    }
}

/// One transition-log entry. The log is append-only and retained for the
/// process lifetime; it is the controller's audit surface, independent of
/// the governance layer's own log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: PipelineState,
    pub to: PipelineState,
    pub timestamp: DateTime<Utc>,
}

/// The structured response returned for every processing cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub state: PipelineState,
    pub persona: String,
    pub answer: Option<String>,
    pub halt_reason: Option<String>,
    pub proof: Vec<String>,
    pub audit: Vec<AuditEntry>,
    pub timestamp: DateTime<Utc>,
}

impl Response {
    fn output(persona: &str, answer: String, proof: Vec<String>, audit: Vec<AuditEntry>) -> Self {
        Response {
            state: PipelineState::Output,
            persona: persona.to_string(),
            answer: Some(answer),
            halt_reason: None,
            proof,
            audit,
            timestamp: Utc::now(),
        }
    }

    fn halt(persona: &str, reason: String, proof: Vec<String>, audit: Vec<AuditEntry>) -> Self {
        Response {
            state: PipelineState::Halt,
            persona: persona.to_string(),
            answer: None,
            halt_reason: Some(reason),
            proof,
            audit,
            timestamp: Utc::now(),
        }
    }
}

/// The FSM controller: sequences every query, forbids skipping or
/// reordering steps, and logs every transition.
pub struct PipelineController {
    source: Box<dyn ConfigSource>,
    persona: PersonaConfig,
    engine: InferenceEngine,
    governance: GovernanceLayer,
    state: PipelineState,
    transitions: Vec<Transition>,
}

impl PipelineController {
    /// Build a controller and load `default_persona_id`.
    ///
    /// A load failure is recovered by the minimal built-in persona only for
    /// the id `"default"`; for any other id it is an initialization failure
    /// (the one process-fatal condition in the design).
    pub fn new(
        source: Box<dyn ConfigSource>,
        default_persona_id: &str,
    ) -> Result<Self, ConfigError> {
        let mut controller = PipelineController {
            source,
            persona: PersonaConfig::fallback(),
            engine: InferenceEngine::new(FactStore::new()),
            governance: GovernanceLayer::new(),
            state: PipelineState::Idle,
            transitions: Vec::new(),
        };

        match controller.load_persona(default_persona_id) {
            Ok(()) => {}
            Err(err) if default_persona_id == "default" => {
                tracing::warn!(
                    error = %err,
                    "default persona unavailable; using built-in fallback"
                );
                controller.persona = PersonaConfig::fallback();
                controller.engine = InferenceEngine::new(FactStore::new());
            }
            Err(err) => return Err(err),
        }
        Ok(controller)
    }

    // -------------------------------------------------------------------
    // Public interface
    // -------------------------------------------------------------------

    /// Process one input through the full pipeline. Always returns exactly
    /// one response; every failure mode is a HALT response, never an error.
    pub fn process(&mut self, input: &str) -> Response {
        self.transition(PipelineState::LoadConfig);

        let trimmed = input.trim();
        if let Some(persona_id) = trimmed.strip_prefix("/persona ") {
            return self.handle_persona_switch(persona_id.trim());
        }
        if trimmed.starts_with('/') {
            return self.handle_command(trimmed);
        }

        self.transition(PipelineState::ValidateInput);
        if trimmed.is_empty() {
            return self.halt("EMPTY INPUT: no query was provided.".to_string());
        }
        if input.chars().count() > MAX_INPUT_CHARS {
            return self.halt(format!(
                "INPUT TOO LONG: query exceeds the maximum permitted length of \
                 {MAX_INPUT_CHARS} characters."
            ));
        }

        self.transition(PipelineState::Infer);
        let inference = self.engine.process(input, &self.persona);

        self.transition(PipelineState::Govern);
        let report = self.governance.check(&inference, &self.persona);

        if !inference.success {
            self.transition(PipelineState::Halt);
            self.transition(PipelineState::Idle);
            return Response::halt(
                &self.persona.name,
                inference
                    .halt_reason
                    .unwrap_or_else(|| "HALT: unspecified reason.".to_string()),
                inference.proof,
                report.audit,
            );
        }

        if !report.passed {
            self.transition(PipelineState::Halt);
            self.transition(PipelineState::Idle);
            return Response::halt(
                &self.persona.name,
                format!("GOVERNANCE VIOLATION: {}", report.violations.join("; ")),
                inference.proof,
                report.audit,
            );
        }

        self.transition(PipelineState::Output);
        self.transition(PipelineState::Idle);
        Response::output(
            &self.persona.name,
            report.response.unwrap_or_default(),
            inference.proof,
            report.audit,
        )
    }

    pub fn active_persona(&self) -> &PersonaConfig {
        &self.persona
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Full transition history for the process lifetime.
    pub fn transition_log(&self) -> &[Transition] {
        &self.transitions
    }

    /// The governance layer's cumulative audit log.
    pub fn audit_log(&self) -> &[AuditEntry] {
        self.governance.audit_log()
    }

    pub fn available_personas(&self) -> Vec<String> {
        self.source.list_configuration_ids()
    }

    // -------------------------------------------------------------------
    // Configuration switching
    // -------------------------------------------------------------------

    /// Load a persona and its knowledge domains, replacing the active
    /// configuration and the fact store wholesale. The swap is atomic:
    /// nothing is replaced until every domain loaded cleanly.
    fn load_persona(&mut self, persona_id: &str) -> Result<(), ConfigError> {
        let persona = self.source.load_configuration(persona_id)?;

        let mut store = FactStore::new();
        for domain in &persona.domains {
            match self.source.load_fact_domain(domain) {
                Some(data) => {
                    store
                        .extend(domain, data)
                        .map_err(|e| ConfigError::Schema {
                            id: persona_id.to_string(),
                            reason: format!("domain `{domain}`: {e}"),
                        })?;
                }
                None => {
                    tracing::warn!(domain, "knowledge domain not found; continuing without it");
                }
            }
        }

        tracing::info!(
            persona = persona_id,
            facts = store.fact_count(),
            rules = store.rule_count(),
            "persona loaded"
        );
        self.persona = persona;
        self.engine = InferenceEngine::new(store);
        Ok(())
    }

    fn handle_persona_switch(&mut self, persona_id: &str) -> Response {
        match self.load_persona(persona_id) {
            Ok(()) => {
                self.transition(PipelineState::Output);
                self.transition(PipelineState::Idle);
                Response::output(
                    &self.persona.name,
                    format!(
                        "Persona switched successfully.\nActive Persona: {} ({})\n\
                         Persona ID: {}\nAuthorized Domains: {}",
                        self.persona.name,
                        self.persona.archetype,
                        self.persona.persona_id,
                        if self.persona.domains.is_empty() {
                            "General".to_string()
                        } else {
                            self.persona.domains.join(", ")
                        }
                    ),
                    vec!["Persona loaded from configuration source.".to_string()],
                    Vec::new(),
                )
            }
            Err(err) => {
                let available = self.available_personas();
                self.halt(format!(
                    "PERSONA NOT FOUND: `{persona_id}` could not be loaded ({err}). \
                     Available personas: {available:?}"
                ))
            }
        }
    }

    // -------------------------------------------------------------------
    // System commands
    // -------------------------------------------------------------------

    fn handle_command(&mut self, command: &str) -> Response {
        let answer = match command {
            "/help" => Some(HELP_TEXT.to_string()),
            "/personas" => {
                let available = self.available_personas();
                Some(if available.is_empty() {
                    "Available Personas: none found.".to_string()
                } else {
                    format!("Available Personas: {}", available.join(", "))
                })
            }
            "/status" => Some(format!(
                "Active Persona:    {} ({})\nPersona ID:        {}\n\
                 Pipeline State:    {}\nKnowledge Domains: {}\n\
                 Facts Loaded:      {}\nRules Loaded:      {}\nEvolution:         {}",
                self.persona.name,
                self.persona.archetype,
                self.persona.persona_id,
                self.state,
                {
                    let domains = self.engine.store().loaded_domains();
                    if domains.is_empty() {
                        "none loaded".to_string()
                    } else {
                        domains.join(", ")
                    }
                },
                self.engine.store().fact_count(),
                self.engine.store().rule_count(),
                if self.persona.evolution_enabled {
                    "Enabled"
                } else {
                    "Disabled"
                }
            )),
            "/audit" => Some(if self.governance.audit_log().is_empty() {
                "Audit log is empty.".to_string()
            } else {
                serde_json::to_string_pretty(self.governance.audit_log())
                    .unwrap_or_else(|e| format!("audit log serialization failed: {e}"))
            }),
            "/state" => Some(format!("Current Pipeline State: {}", self.state)),
            _ => None,
        };

        match answer {
            Some(answer) => {
                self.transition(PipelineState::Output);
                self.transition(PipelineState::Idle);
                Response::output(&self.persona.name, answer, Vec::new(), Vec::new())
            }
            None => self.halt(format!(
                "UNKNOWN COMMAND: `{command}`. Type /help for available commands."
            )),
        }
    }

    // -------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------

    fn transition(&mut self, to: PipelineState) {
        tracing::debug!(from = %self.state, to = %to, "pipeline transition");
        self.transitions.push(Transition {
            from: self.state,
            to,
            timestamp: Utc::now(),
        });
        self.state = to;
    }

    fn halt(&mut self, reason: String) -> Response {
        self.transition(PipelineState::Halt);
        self.transition(PipelineState::Idle);
        Response::halt(&self.persona.name, reason, Vec::new(), Vec::new())
    }
}

const HELP_TEXT: &str = "\
Certes — Available Commands
---------------------------
/help                  Display this help message.
/persona <id>          Switch to a different persona.
/personas              List all available personas.
/status                Display current system status.
/audit                 Display the full governance audit log.
/state                 Display the current pipeline state.
---------------------------
Any other input is processed as a query.";
