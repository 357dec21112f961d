//! Crate-level error taxonomy.
//!
//! Component failures (classification, retrieval, generation) are recovered
//! at their own boundary and never show up here. Only faults that are allowed
//! to leave the state machine are modelled as variants.

use crate::orchestrator::Node;

#[derive(Debug, thiserror::Error)]
pub enum AdvisorError {
    /// The invocation ran more node executions than the configured ceiling.
    #[error("step limit of {limit} exceeded (last node: {last_node})")]
    StepLimitExceeded { limit: usize, last_node: Node },

    /// The rewrite LLM call failed; surfaced to the invocation boundary.
    #[error("query rewrite failed: {0}")]
    Rewrite(#[source] anyhow::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("LLM provider error: {0}")]
    Llm(String),
}

impl AdvisorError {
    /// Faults that abort the turn instead of degrading it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StepLimitExceeded { .. })
    }
}

pub type AdvisorResult<T> = std::result::Result<T, AdvisorError>;
