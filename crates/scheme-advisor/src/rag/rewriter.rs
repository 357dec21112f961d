//! Query Rewriting Module
//!
//! Reformulates a question that failed grading into a self-contained search
//! string, using the conversation to resolve pronouns. LLM failures are not
//! handled here; they propagate to the invocation boundary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::llm::{ChatMessage, GenerationConfig, LLMProvider};
use crate::state::ConversationState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewrittenQuery {
    pub original_query: String,
    pub rewritten_query: String,
    pub changed: bool,
}

const REWRITER_SYSTEM_PROMPT: &str = "You are a query rewriting expert. Rewrite the user's question to be \
more effective for a Knowledge Graph and Vector search.
- Resolve pronouns (he, she, it, that, them) using the chat history.
- Keep scheme names and technical terms intact.
- Remove greetings and conversational filler.
- Output ONLY the improved search string.";

fn build_rewrite_request(state: &ConversationState) -> String {
    let history = state
        .messages
        .iter()
        .map(|t| format!("{}: {}", t.label(), t.content))
        .collect::<Vec<_>>()
        .join("\n");
    let history = if history.is_empty() { "(none)".to_string() } else { history };

    format!("History:\n{}\n\nQuestion to rewrite: {}", history, state.question)
}

/// Strip the wrappers models like to add around a one-line answer.
fn clean_rewrite(raw: &str) -> String {
    let mut text = raw.trim();
    for prefix in ["Rewritten query:", "Rewritten Query:", "Improved search string:", "Query:"] {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest.trim();
        }
    }
    let first_line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    first_line.trim().trim_matches('"').trim().to_string()
}

pub struct QueryRewriter {
    provider: Arc<dyn LLMProvider>,
    config: GenerationConfig,
}

impl QueryRewriter {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            config: GenerationConfig::default().with_max_tokens(150),
        }
    }

    /// Overwrite `state.question` with the rewritten query. An empty rewrite
    /// keeps the previous question.
    pub async fn rewrite(&self, state: &mut ConversationState) -> Result<RewrittenQuery> {
        let messages = [
            ChatMessage::system(REWRITER_SYSTEM_PROMPT),
            ChatMessage::user(build_rewrite_request(state)),
        ];
        let raw = self
            .provider
            .chat(&messages, &self.config)
            .await
            .context("query rewrite call failed")?;

        let original = state.question.clone();
        let cleaned = clean_rewrite(&raw);
        let rewritten = if cleaned.is_empty() { original.clone() } else { cleaned };
        let changed = rewritten.to_lowercase() != original.to_lowercase();

        tracing::info!(original = %original, rewritten = %rewritten, changed = changed, "Query rewritten");

        state.question = rewritten.clone();
        Ok(RewrittenQuery {
            original_query: original,
            rewritten_query: rewritten,
            changed,
        })
    }
}
