//! Certes core: the deterministic question-answering pipeline.
//!
//! Four tightly-coupled pieces make the determinism guarantee hold:
//!
//! - [`persona`] — immutable, validated configuration records plus the
//!   [`persona::ConfigSource`] seam to whatever loads them;
//! - [`engine`] — query normalization, domain authorization, ambiguity
//!   screening, forward-chaining evaluation, and a deterministic
//!   natural-language fallback;
//! - [`governance`] — an ordered battery of content checks that can only
//!   narrow or reject a candidate answer, never enrich it;
//! - [`controller`] — the finite-state machine that sequences every query
//!   through LOAD_CONFIG → VALIDATE_INPUT → INFER → GOVERN → OUTPUT (or
//!   HALT) and logs every transition.
//!
//! Identical input plus identical configuration always yields an identical
//! answer (or halt reason) and an identical audit trail. Failure is an
//! explicit HALT, never a best-effort guess, and nothing is ever retried.

pub mod controller;
pub mod engine;
pub mod governance;
pub mod persona;

pub use controller::{PipelineController, PipelineState, Response, Transition};
pub use engine::{InferenceEngine, InferenceOutcome};
pub use governance::{AuditEntry, CheckOutcome, GovernanceLayer, GovernanceReport};
pub use persona::{ConfigError, ConfigSource, GuardrailFlags, OutputFormat, PersonaConfig};
