//! Query state machine
//!
//! Wiring is an explicit transition table, `(node, signal) -> next node`, so
//! the single cycle (grade -> rewrite -> both fetches -> grade) and the
//! terminal node are visible without running anything. The executor counts
//! every node execution and aborts the invocation once the configured
//! ceiling is reached.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::Instrument;

use crate::config::{AdvisorConfig, OrchestratorConfig};
use crate::error::{AdvisorError, AdvisorResult};
use crate::llm::LLMProvider;
use crate::profile::{ProfileExtractor, RuleBasedProfileExtractor};
use crate::rag::generator::{AnswerGenerator, FALLBACK_ANSWER};
use crate::rag::grader::{Grader, LlmRelevanceScorer};
use crate::rag::rewriter::QueryRewriter;
use crate::rag::router::MemoryRouter;
use crate::retrieval::{KnowledgeGraphStore, Retrievers, VectorStore};
use crate::state::ConversationState;
use crate::types::{GradeOutcome, Route, RoutingDecision};

/// Reply used when an invocation is aborted by the step ceiling.
pub const STEP_LIMIT_ANSWER: &str =
    "Sorry, I couldn't finish working on that question. Could you rephrase it or ask about one scheme at a time?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Node {
    ProfileExtract,
    Route,
    StructuredFetch,
    UnstructuredFetch,
    /// Both fetches concurrently; entered only after a rewrite.
    BothFetch,
    Grade,
    Rewrite,
    Generate,
    End,
}

impl Node {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProfileExtract => "profile_extract",
            Self::Route => "route",
            Self::StructuredFetch => "structured_fetch",
            Self::UnstructuredFetch => "unstructured_fetch",
            Self::BothFetch => "both_fetch",
            Self::Grade => "grade",
            Self::Rewrite => "rewrite",
            Self::Generate => "generate",
            Self::End => "end",
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a node reports when it finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Done,
    Routed(Route),
    Graded(GradeOutcome),
}

#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub from: Node,
    pub on: Signal,
    pub to: Node,
}

const fn edge(from: Node, on: Signal, to: Node) -> Transition {
    Transition { from, on, to }
}

pub const TRANSITIONS: &[Transition] = &[
    edge(Node::ProfileExtract, Signal::Done, Node::Route),
    edge(Node::Route, Signal::Routed(Route::VectorDb), Node::UnstructuredFetch),
    edge(Node::Route, Signal::Routed(Route::KnowledgeGraph), Node::StructuredFetch),
    edge(Node::Route, Signal::Routed(Route::Generate), Node::Generate),
    edge(Node::StructuredFetch, Signal::Done, Node::Grade),
    edge(Node::UnstructuredFetch, Signal::Done, Node::Grade),
    edge(Node::BothFetch, Signal::Done, Node::Grade),
    edge(Node::Grade, Signal::Graded(GradeOutcome::RewriteQuery), Node::Rewrite),
    edge(Node::Grade, Signal::Graded(GradeOutcome::Generate), Node::Generate),
    edge(Node::Rewrite, Signal::Done, Node::BothFetch),
    edge(Node::Generate, Signal::Done, Node::End),
];

pub const INITIAL_NODE: Node = Node::ProfileExtract;

pub fn next_node(from: Node, on: Signal) -> Option<Node> {
    TRANSITIONS
        .iter()
        .find(|t| t.from == from && t.on == on)
        .map(|t| t.to)
}

/// Result of one invocation: the final state plus the nodes that ran.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub state: ConversationState,
    pub path: Vec<Node>,
    pub routing: Option<RoutingDecision>,
}

impl Invocation {
    pub fn answer(&self) -> &str {
        self.state.final_answer().unwrap_or(FALLBACK_ANSWER)
    }
}

pub struct Orchestrator {
    profile: Arc<dyn ProfileExtractor>,
    router: MemoryRouter,
    retrievers: Retrievers,
    grader: Grader,
    rewriter: QueryRewriter,
    generator: AnswerGenerator,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        profile: Arc<dyn ProfileExtractor>,
        router: MemoryRouter,
        retrievers: Retrievers,
        grader: Grader,
        rewriter: QueryRewriter,
        generator: AnswerGenerator,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            profile,
            router,
            retrievers,
            grader,
            rewriter,
            generator,
            config,
        }
    }

    /// Standard wiring: rule-based profiles, LLM classifier chain over the
    /// primary and secondary providers, LLM scoring, rewriting and generation
    /// on the primary.
    pub fn from_config(
        config: &AdvisorConfig,
        primary: Arc<dyn LLMProvider>,
        secondary: Arc<dyn LLMProvider>,
        vector: Arc<dyn VectorStore>,
        graph: Arc<dyn KnowledgeGraphStore>,
    ) -> Self {
        Self::new(
            Arc::new(RuleBasedProfileExtractor::new()),
            MemoryRouter::with_providers(&config.router, primary.clone(), secondary),
            Retrievers::new(vector, graph, config.retrieval.clone()),
            Grader::new(Arc::new(LlmRelevanceScorer::new(primary.clone())), config.grader.clone()),
            QueryRewriter::new(primary.clone()),
            AnswerGenerator::new(primary),
            config.orchestrator.clone(),
        )
    }

    /// Run the state machine to completion. Only the step ceiling and rewrite
    /// failures escape as errors.
    pub async fn run(&self, state: ConversationState) -> AdvisorResult<Invocation> {
        let span = tracing::info_span!("invocation", id = %uuid::Uuid::new_v4());
        self.execute(state).instrument(span).await
    }

    pub async fn invoke(&self, state: ConversationState) -> AdvisorResult<ConversationState> {
        self.run(state).await.map(|inv| inv.state)
    }

    /// One user message in, one reply out. Every failure becomes bounded text.
    pub async fn respond(&self, state: ConversationState) -> String {
        match self.run(state).await {
            Ok(invocation) => invocation.answer().to_string(),
            Err(e @ AdvisorError::StepLimitExceeded { .. }) => {
                tracing::error!(error = %e, "Invocation aborted");
                STEP_LIMIT_ANSWER.to_string()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Invocation failed, replying with fallback");
                FALLBACK_ANSWER.to_string()
            }
        }
    }

    async fn execute(&self, mut state: ConversationState) -> AdvisorResult<Invocation> {
        let start = Instant::now();
        let mut node = INITIAL_NODE;
        let mut path = Vec::new();
        let mut routing = None;

        while node != Node::End {
            if path.len() >= self.config.max_steps {
                tracing::error!(limit = self.config.max_steps, node = %node, path = ?path, "Step limit exceeded");
                return Err(AdvisorError::StepLimitExceeded {
                    limit: self.config.max_steps,
                    last_node: node,
                });
            }
            path.push(node);

            let signal = self.step(node, &mut state, &mut routing).await?;
            node = match next_node(node, signal) {
                Some(next) => next,
                None => {
                    // Unreachable with a complete table; still answer the user.
                    tracing::error!(node = %node, signal = ?signal, "No transition, forcing generation");
                    if node == Node::Generate { Node::End } else { Node::Generate }
                }
            };
        }

        tracing::info!(
            steps = path.len(),
            rewrites = state.rewrite_count,
            latency_ms = start.elapsed().as_millis() as u64,
            "Invocation complete"
        );
        Ok(Invocation { state, path, routing })
    }

    async fn step(
        &self,
        node: Node,
        state: &mut ConversationState,
        routing: &mut Option<RoutingDecision>,
    ) -> AdvisorResult<Signal> {
        tracing::debug!(node = %node, "Entering node");
        let signal = match node {
            Node::ProfileExtract => {
                let extraction = self.profile.extract(state);
                state.apply_profile(extraction);
                tracing::debug!(
                    scope = state.target_scope.as_str(),
                    target = %state.target_profile.to_prompt_string(),
                    "Profile extracted"
                );
                Signal::Done
            }
            Node::Route => {
                let decision = self.router.route(state).await;
                let route = decision.route;
                *routing = Some(decision);
                Signal::Routed(route)
            }
            Node::StructuredFetch => {
                let text = self
                    .retrievers
                    .retrieve_structured(&state.question, &state.target_profile)
                    .await;
                state.structured_context = Some(text);
                Signal::Done
            }
            Node::UnstructuredFetch => {
                let text = self.retrievers.retrieve_unstructured(&state.question).await;
                state.unstructured_context = Some(text);
                Signal::Done
            }
            Node::BothFetch => {
                let (structured, unstructured) = self
                    .retrievers
                    .retrieve_both(&state.question, &state.target_profile)
                    .await;
                state.structured_context = Some(structured);
                state.unstructured_context = Some(unstructured);
                Signal::Done
            }
            Node::Grade => Signal::Graded(self.grader.grade(state).await),
            Node::Rewrite => {
                self.rewriter.rewrite(state).await.map_err(AdvisorError::Rewrite)?;
                Signal::Done
            }
            Node::Generate => {
                self.generator.generate(state).await;
                Signal::Done
            }
            Node::End => Signal::Done,
        };
        Ok(signal)
    }
}
