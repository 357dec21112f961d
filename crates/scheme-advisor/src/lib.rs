//! Welfare-scheme query routing and quality-control loop.
//!
//! A user message flows through profile extraction, keyword/LLM routing,
//! graph and passage retrieval, relevance grading with a bounded rewrite
//! cycle, and grounded answer generation. See [`orchestrator`] for the
//! state machine that ties the pieces together.

pub mod config;
pub mod error;
pub mod graph;
pub mod llm;
pub mod memory;
pub mod orchestrator;
pub mod profile;
pub mod rag;
pub mod retrieval;
pub mod search;
pub mod state;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::AdvisorConfig;
pub use error::{AdvisorError, AdvisorResult};
pub use graph::SchemeGraph;
pub use llm::{ApiProvider, GenerationConfig, LLMConfig, LLMProvider};
pub use memory::{ArchiveSink, RuleBasedSummarizer, SessionMemory, Summarizer};
pub use orchestrator::{Invocation, Node, Orchestrator};
pub use profile::{Profile, ProfileExtractor, RuleBasedProfileExtractor};
pub use retrieval::{GraphFact, KnowledgeGraphStore, Passage, Retrievers, VectorStore};
pub use search::PassageIndex;
pub use state::ConversationState;
pub use types::{GradeOutcome, RelevanceScore, Route, RoutingDecision, TargetScope, Turn, TurnRole};
