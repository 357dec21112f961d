//! Relevance Grader
//!
//! One scoring call rates both evidence sets, then a pure policy maps the
//! score pair to `rewrite_query` or `generate`, pruning the weaker context
//! when the other one clearly dominates. Scoring failures degrade to
//! `generate` with whatever context is present.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::GraderConfig;
use crate::llm::structured::{extract_json_number, extract_json_object, parse_strict};
use crate::llm::{ChatMessage, GenerationConfig, LLMProvider};
use crate::state::ConversationState;
use crate::types::{GradeOutcome, RelevanceScore};

/// Produces a relevance score pair for the current evidence.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    async fn score(&self, question: &str, unstructured: &str, structured: &str) -> Result<RelevanceScore>;
}

const GRADER_SYSTEM_PROMPT: &str = "You are a strict relevance evaluator.";

fn build_grader_prompt(question: &str, unstructured: &str, structured: &str) -> String {
    format!(
        "Question:\n{}\n\nVector DB Context:\n{}\n\nKnowledge Graph Context:\n{}\n\n\
         Return relevance scores between 0 and 1 for each context.\n\
         Output ONLY this JSON object, nothing else:\n\
         {{\"vector_score\": 0.0, \"graph_score\": 0.0}}",
        question, unstructured, structured
    )
}

#[derive(Deserialize)]
struct RawScore {
    vector_score: f32,
    graph_score: f32,
}

/// Both fields must be numeric; out-of-range values are clamped.
fn parse_score(raw: &str) -> Result<RelevanceScore> {
    if let Ok(parsed) = parse_strict::<RawScore>(raw) {
        return Ok(RelevanceScore::new(parsed.vector_score, parsed.graph_score));
    }

    let json_str = extract_json_object(raw);
    let vector = extract_json_number(json_str, "vector_score")
        .ok_or_else(|| anyhow!("grader output has no numeric vector_score"))?;
    let graph = extract_json_number(json_str, "graph_score")
        .ok_or_else(|| anyhow!("grader output has no numeric graph_score"))?;
    Ok(RelevanceScore::new(vector as f32, graph as f32))
}

pub struct LlmRelevanceScorer {
    provider: Arc<dyn LLMProvider>,
    config: GenerationConfig,
}

impl LlmRelevanceScorer {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            config: GenerationConfig::default().with_max_tokens(60),
        }
    }
}

#[async_trait]
impl RelevanceScorer for LlmRelevanceScorer {
    async fn score(&self, question: &str, unstructured: &str, structured: &str) -> Result<RelevanceScore> {
        let messages = [
            ChatMessage::system(GRADER_SYSTEM_PROMPT),
            ChatMessage::user(build_grader_prompt(question, unstructured, structured)),
        ];
        let raw = self
            .provider
            .chat(&messages, &self.config)
            .await
            .context("grader call failed")?;
        parse_score(&raw)
    }
}

/// Decision policy, evaluated in order. Comparisons against the accept
/// thresholds are inclusive, comparisons between the two scores strict, so
/// equal scores never prune either context.
pub fn decide(score: RelevanceScore, state: &mut ConversationState, config: &GraderConfig) -> GradeOutcome {
    if score.vector_score < config.reject_below
        && score.graph_score < config.reject_below
        && state.rewrite_count < config.max_rewrites
    {
        state.rewrite_count += 1;
        return GradeOutcome::RewriteQuery;
    }

    if score.graph_score >= config.graph_accept && score.graph_score > score.vector_score {
        state.unstructured_context = Some(String::new());
        return GradeOutcome::Generate;
    }

    if score.vector_score >= config.vector_accept && score.vector_score > score.graph_score {
        state.structured_context = Some(String::new());
        return GradeOutcome::Generate;
    }

    GradeOutcome::Generate
}

pub struct Grader {
    scorer: Arc<dyn RelevanceScorer>,
    config: GraderConfig,
}

impl Grader {
    pub fn new(scorer: Arc<dyn RelevanceScorer>, config: GraderConfig) -> Self {
        Self { scorer, config }
    }

    /// Score and apply the policy. Never fails.
    pub async fn grade(&self, state: &mut ConversationState) -> GradeOutcome {
        let start = Instant::now();
        let question = if state.question.trim().is_empty() {
            state.latest_message().unwrap_or("").to_string()
        } else {
            state.question.clone()
        };

        let scoring = self.scorer.score(&question, state.unstructured(), state.structured());
        let score = match tokio::time::timeout(Duration::from_millis(self.config.timeout_ms), scoring).await {
            Ok(Ok(score)) => score,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Grading failed, generating with available context");
                return GradeOutcome::Generate;
            }
            Err(_) => {
                tracing::warn!(timeout_ms = self.config.timeout_ms, "Grading timed out, generating with available context");
                return GradeOutcome::Generate;
            }
        };

        let outcome = decide(score, state, &self.config);
        tracing::info!(
            vector_score = score.vector_score,
            graph_score = score.graph_score,
            rewrite_count = state.rewrite_count,
            outcome = outcome.as_str(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Grader decision"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingScorer, FixedScorer, ScriptedProvider, SlowScorer};

    fn state_with_context(rewrite_count: u32) -> ConversationState {
        ConversationState {
            question: "PMEGP subsidy".into(),
            unstructured_context: Some("[PMEGP]\nSubsidy up to 35%.".into()),
            structured_context: Some("PMEGP -[PROVIDES]-> Capital Subsidy".into()),
            rewrite_count,
            ..ConversationState::default()
        }
    }

    #[test]
    fn test_both_low_triggers_rewrite() {
        let mut state = state_with_context(0);
        let outcome = decide(RelevanceScore::new(0.3, 0.2), &mut state, &GraderConfig::default());
        assert_eq!(outcome, GradeOutcome::RewriteQuery);
        assert_eq!(state.rewrite_count, 1);
    }

    #[test]
    fn test_ceiling_reached_generates_with_contexts_intact() {
        let mut state = state_with_context(2);
        let outcome = decide(RelevanceScore::new(0.3, 0.2), &mut state, &GraderConfig::default());
        assert_eq!(outcome, GradeOutcome::Generate);
        assert_eq!(state.rewrite_count, 2);
        assert!(!state.unstructured().is_empty());
        assert!(!state.structured().is_empty());
    }

    #[test]
    fn test_never_rewrites_at_ceiling() {
        for v in [0.0, 0.1, 0.2, 0.39] {
            for g in [0.0, 0.15, 0.39] {
                let mut state = state_with_context(2);
                let outcome = decide(RelevanceScore::new(v, g), &mut state, &GraderConfig::default());
                assert_eq!(outcome, GradeOutcome::Generate);
            }
        }
    }

    #[test]
    fn test_vector_dominates_clears_structured() {
        let mut state = state_with_context(0);
        let outcome = decide(RelevanceScore::new(0.65, 0.5), &mut state, &GraderConfig::default());
        assert_eq!(outcome, GradeOutcome::Generate);
        assert_eq!(state.structured(), "");
        assert!(!state.unstructured().is_empty());
    }

    #[test]
    fn test_graph_dominates_clears_unstructured() {
        let mut state = state_with_context(0);
        let outcome = decide(RelevanceScore::new(0.5, 0.7), &mut state, &GraderConfig::default());
        assert_eq!(outcome, GradeOutcome::Generate);
        assert_eq!(state.unstructured(), "");
        assert!(!state.structured().is_empty());
    }

    #[test]
    fn test_equal_scores_prune_nothing() {
        for s in [0.4, 0.6, 0.7, 0.9] {
            let mut state = state_with_context(0);
            let outcome = decide(RelevanceScore::new(s, s), &mut state, &GraderConfig::default());
            assert_eq!(outcome, GradeOutcome::Generate);
            assert!(!state.unstructured().is_empty());
            assert!(!state.structured().is_empty());
        }
    }

    #[test]
    fn test_dead_zone_keeps_both() {
        let mut state = state_with_context(0);
        let outcome = decide(RelevanceScore::new(0.55, 0.45), &mut state, &GraderConfig::default());
        assert_eq!(outcome, GradeOutcome::Generate);
        assert!(!state.unstructured().is_empty());
        assert!(!state.structured().is_empty());
    }

    #[test]
    fn test_one_low_score_does_not_rewrite() {
        let mut state = state_with_context(0);
        let outcome = decide(RelevanceScore::new(0.1, 0.5), &mut state, &GraderConfig::default());
        assert_eq!(outcome, GradeOutcome::Generate);
        assert_eq!(state.rewrite_count, 0);
    }

    #[test]
    fn test_parse_score_variants() {
        let s = parse_score(r#"{"vector_score": 0.65, "graph_score": 0.5}"#).unwrap();
        assert_eq!(s, RelevanceScore::new(0.65, 0.5));

        let s = parse_score(r#"Scores: {"vector_score": "0.2", "graph_score": 1.7}"#).unwrap();
        assert_eq!(s.vector_score, 0.2);
        assert_eq!(s.graph_score, 1.0);

        assert!(parse_score(r#"{"vector_score": "high", "graph_score": 0.1}"#).is_err());
        assert!(parse_score("both look fine").is_err());
    }

    #[tokio::test]
    async fn test_grade_applies_policy() {
        let scorer = Arc::new(FixedScorer::new(0.3, 0.2));
        let grader = Grader::new(scorer.clone(), GraderConfig::default());
        let mut state = state_with_context(0);
        assert_eq!(grader.grade(&mut state).await, GradeOutcome::RewriteQuery);
        assert_eq!(state.rewrite_count, 1);
        assert_eq!(scorer.calls(), 1);
    }

    #[tokio::test]
    async fn test_scorer_failure_generates() {
        let grader = Grader::new(Arc::new(FailingScorer), GraderConfig::default());
        let mut state = state_with_context(0);
        assert_eq!(grader.grade(&mut state).await, GradeOutcome::Generate);
        assert_eq!(state.rewrite_count, 0);
        assert!(!state.structured().is_empty());
    }

    #[tokio::test]
    async fn test_scorer_timeout_generates() {
        let config = GraderConfig {
            timeout_ms: 20,
            ..GraderConfig::default()
        };
        let grader = Grader::new(Arc::new(SlowScorer { delay_ms: 500 }), config);
        let mut state = state_with_context(0);
        assert_eq!(grader.grade(&mut state).await, GradeOutcome::Generate);
    }

    #[tokio::test]
    async fn test_llm_scorer_parses_provider_output() {
        let provider = Arc::new(ScriptedProvider::new(vec![r#"{"vector_score":0.8,"graph_score":0.1}"#]));
        let scorer = LlmRelevanceScorer::new(provider.clone());
        let score = scorer.score("q", "ctx", "").await.unwrap();
        assert_eq!(score, RelevanceScore::new(0.8, 0.1));
        assert!(provider.prompts()[0].contains("strict relevance evaluator"));
    }

    #[tokio::test]
    async fn test_malformed_llm_output_degrades_to_generate() {
        let provider = Arc::new(ScriptedProvider::new(vec!["relevant!"]));
        let grader = Grader::new(Arc::new(LlmRelevanceScorer::new(provider)), GraderConfig::default());
        let mut state = state_with_context(0);
        assert_eq!(grader.grade(&mut state).await, GradeOutcome::Generate);
    }
}
