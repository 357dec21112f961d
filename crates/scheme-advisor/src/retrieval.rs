//! Retrievers
//!
//! Two read-only fetch operations over the collaborator stores. Neither ever
//! fails: store errors, timeouts and unready indexes all come back as empty
//! text, which the grader then scores as low relevance.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetrievalConfig;
use crate::profile::Profile;

/// A ranked text snippet from the document index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub title: String,
    pub text: String,
    pub score: f32,
}

/// One relation from the knowledge graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphFact {
    pub subject: String,
    pub relation: String,
    pub object: String,
}

impl GraphFact {
    pub fn render(&self) -> String {
        format!("{} -[{}]-> {}", self.subject, self.relation, self.object)
    }
}

/// Document vector/text index collaborator.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Passage>>;

    /// False until the index holds at least one document.
    fn is_ready(&self) -> bool;
}

/// Knowledge graph collaborator.
#[async_trait]
pub trait KnowledgeGraphStore: Send + Sync {
    async fn query(&self, question: &str, profile: &Profile, max_hops: usize) -> Result<Vec<GraphFact>>;
}

#[derive(Clone)]
pub struct Retrievers {
    vector: Arc<dyn VectorStore>,
    graph: Arc<dyn KnowledgeGraphStore>,
    config: RetrievalConfig,
}

impl Retrievers {
    pub fn new(
        vector: Arc<dyn VectorStore>,
        graph: Arc<dyn KnowledgeGraphStore>,
        config: RetrievalConfig,
    ) -> Self {
        Self { vector, graph, config }
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    /// Top-k passages joined with blank lines, or empty.
    pub async fn retrieve_unstructured(&self, question: &str) -> String {
        if !self.vector.is_ready() {
            tracing::warn!("Vector index not ready, returning empty unstructured context");
            return String::new();
        }

        let started = std::time::Instant::now();
        match tokio::time::timeout(self.timeout(), self.vector.search(question, self.config.top_k)).await {
            Ok(Ok(passages)) => {
                tracing::info!(
                    passages = passages.len(),
                    latency_ms = started.elapsed().as_millis() as u64,
                    "Unstructured retrieval complete"
                );
                format_passages(&passages)
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Vector search failed, using empty context");
                String::new()
            }
            Err(_) => {
                tracing::warn!(timeout_ms = self.config.timeout_ms, "Vector search timed out");
                String::new()
            }
        }
    }

    /// Matched graph relations, one per line, or empty.
    pub async fn retrieve_structured(&self, question: &str, profile: &Profile) -> String {
        let started = std::time::Instant::now();
        let query = self.graph.query(question, profile, self.config.max_hops);
        match tokio::time::timeout(self.timeout(), query).await {
            Ok(Ok(facts)) => {
                tracing::info!(
                    facts = facts.len(),
                    latency_ms = started.elapsed().as_millis() as u64,
                    "Structured retrieval complete"
                );
                format_facts(&facts)
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Knowledge graph query failed, using empty context");
                String::new()
            }
            Err(_) => {
                tracing::warn!(timeout_ms = self.config.timeout_ms, "Knowledge graph query timed out");
                String::new()
            }
        }
    }

    /// Both fetches run concurrently; returns `(structured, unstructured)`
    /// once both have finished.
    pub async fn retrieve_both(&self, question: &str, profile: &Profile) -> (String, String) {
        tokio::join!(
            self.retrieve_structured(question, profile),
            self.retrieve_unstructured(question)
        )
    }
}

fn format_passages(passages: &[Passage]) -> String {
    passages
        .iter()
        .filter(|p| !p.text.trim().is_empty())
        .map(|p| {
            if p.title.is_empty() {
                p.text.trim().to_string()
            } else {
                format!("[{}]\n{}", p.title, p.text.trim())
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn format_facts(facts: &[GraphFact]) -> String {
    let mut lines: Vec<String> = Vec::with_capacity(facts.len());
    for fact in facts {
        let line = fact.render();
        if !lines.contains(&line) {
            lines.push(line);
        }
    }
    lines.join("\n")
}
