//! In-memory fakes for every collaborator trait, shared by unit tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::llm::{GenerationConfig, LLMProvider, ProviderInfo};
use crate::memory::{ArchiveSink, Summarizer};
use crate::profile::Profile;
use crate::rag::grader::RelevanceScorer;
use crate::retrieval::{GraphFact, KnowledgeGraphStore, Passage, VectorStore};
use crate::types::{RelevanceScore, Turn};

// ---------------------------------------------------------------------------
// LLM providers
// ---------------------------------------------------------------------------

/// Replays canned responses in order and records every prompt. Fails once
/// the script is exhausted.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn generate(&self, prompt: &str, _config: &GenerationConfig) -> Result<String> {
        self.prompts.lock().push(prompt.to_string());
        self.responses
            .lock()
            .pop_front()
            .ok_or_else(|| anyhow!("script exhausted"))
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "Scripted".to_string(),
            model: "test".to_string(),
            is_local: true,
        }
    }
}

#[derive(Default)]
pub struct FailingProvider {
    calls: AtomicUsize,
}

impl FailingProvider {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LLMProvider for FailingProvider {
    async fn generate(&self, _prompt: &str, _config: &GenerationConfig) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("API error (503): service unavailable"))
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "Failing".to_string(),
            model: "test".to_string(),
            is_local: true,
        }
    }
}

/// Answers every call with the same text.
pub struct ConstantProvider {
    response: String,
    calls: AtomicUsize,
}

impl ConstantProvider {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LLMProvider for ConstantProvider {
    async fn generate(&self, _prompt: &str, _config: &GenerationConfig) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "Constant".to_string(),
            model: "test".to_string(),
            is_local: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

pub struct StaticVectorStore {
    passages: Vec<Passage>,
    ready: bool,
    calls: AtomicUsize,
}

impl StaticVectorStore {
    pub fn new(passages: Vec<Passage>) -> Self {
        Self {
            passages,
            ready: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unready() -> Self {
        Self {
            ready: false,
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorStore for StaticVectorStore {
    async fn search(&self, _query: &str, k: usize) -> Result<Vec<Passage>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.passages.iter().take(k).cloned().collect())
    }

    fn is_ready(&self) -> bool {
        self.ready
    }
}

pub struct SlowVectorStore {
    pub delay_ms: u64,
}

#[async_trait]
impl VectorStore for SlowVectorStore {
    async fn search(&self, _query: &str, _k: usize) -> Result<Vec<Passage>> {
        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        Ok(vec![Passage {
            title: "late".into(),
            text: "too late".into(),
            score: 1.0,
        }])
    }

    fn is_ready(&self) -> bool {
        true
    }
}

#[derive(Default)]
pub struct StaticGraph {
    facts: Vec<GraphFact>,
    calls: AtomicUsize,
}

impl StaticGraph {
    pub fn new(facts: Vec<GraphFact>) -> Self {
        Self {
            facts,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KnowledgeGraphStore for StaticGraph {
    async fn query(&self, _question: &str, _profile: &Profile, _max_hops: usize) -> Result<Vec<GraphFact>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.facts.clone())
    }
}

pub struct FailingGraph;

#[async_trait]
impl KnowledgeGraphStore for FailingGraph {
    async fn query(&self, _question: &str, _profile: &Profile, _max_hops: usize) -> Result<Vec<GraphFact>> {
        Err(anyhow!("connection refused"))
    }
}

// ---------------------------------------------------------------------------
// Scorers
// ---------------------------------------------------------------------------

pub struct FixedScorer {
    score: RelevanceScore,
    calls: AtomicUsize,
}

impl FixedScorer {
    pub fn new(vector_score: f32, graph_score: f32) -> Self {
        Self {
            score: RelevanceScore::new(vector_score, graph_score),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelevanceScorer for FixedScorer {
    async fn score(&self, _question: &str, _unstructured: &str, _structured: &str) -> Result<RelevanceScore> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.score)
    }
}

/// Returns scores in order, repeating the last one.
pub struct SequenceScorer {
    scores: Mutex<VecDeque<RelevanceScore>>,
}

impl SequenceScorer {
    pub fn new(scores: Vec<(f32, f32)>) -> Self {
        Self {
            scores: Mutex::new(scores.into_iter().map(|(v, g)| RelevanceScore::new(v, g)).collect()),
        }
    }
}

#[async_trait]
impl RelevanceScorer for SequenceScorer {
    async fn score(&self, _question: &str, _unstructured: &str, _structured: &str) -> Result<RelevanceScore> {
        let mut scores = self.scores.lock();
        let next = if scores.len() > 1 { scores.pop_front() } else { scores.front().copied() };
        next.ok_or_else(|| anyhow!("no scores left"))
    }
}

pub struct FailingScorer;

#[async_trait]
impl RelevanceScorer for FailingScorer {
    async fn score(&self, _question: &str, _unstructured: &str, _structured: &str) -> Result<RelevanceScore> {
        Err(anyhow!("malformed structured output"))
    }
}

pub struct SlowScorer {
    pub delay_ms: u64,
}

#[async_trait]
impl RelevanceScorer for SlowScorer {
    async fn score(&self, _question: &str, _unstructured: &str, _structured: &str) -> Result<RelevanceScore> {
        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        Ok(RelevanceScore::new(0.0, 0.0))
    }
}

// ---------------------------------------------------------------------------
// Session memory collaborators
// ---------------------------------------------------------------------------

pub struct FailingSummarizer;

#[async_trait]
impl Summarizer for FailingSummarizer {
    async fn update(&self, _old_summary: &str, _turns: &[Turn]) -> Result<String> {
        Err(anyhow!("summarizer offline"))
    }
}

#[derive(Default)]
pub struct RecordingSink {
    archived: Mutex<Vec<Turn>>,
}

impl RecordingSink {
    pub fn archived(&self) -> Vec<Turn> {
        self.archived.lock().clone()
    }
}

#[async_trait]
impl ArchiveSink for RecordingSink {
    async fn archive(&self, _session_id: &str, turns: &[Turn]) -> Result<()> {
        self.archived.lock().extend_from_slice(turns);
        Ok(())
    }
}
