//! Session memory
//!
//! A versioned value holding the rolling summary and the recent turns of one
//! session. The caller owns it, builds each invocation's input from it and
//! records the exchange afterwards; nothing here is process-global. Long
//! sessions are archived to an external sink and folded into the summary.

pub mod summarizer;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::SessionConfig;
use crate::search::PassageIndex;
use crate::state::ConversationState;
use crate::types::Turn;

pub use summarizer::RuleBasedSummarizer;

pub const INITIAL_SUMMARY: &str = "Conversation just started!";

/// Produces a replacement summary from the old one and the session turns.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn update(&self, old_summary: &str, turns: &[Turn]) -> Result<String>;
}

/// Long-term store for turns dropped from the live session.
#[async_trait]
pub trait ArchiveSink: Send + Sync {
    async fn archive(&self, session_id: &str, turns: &[Turn]) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMemory {
    pub session_id: String,
    /// Bumped on every mutation.
    pub version: u64,
    pub summary: String,
    pub turns: Vec<Turn>,
}

impl SessionMemory {
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        Self {
            session_id: format!("sess_{}", &id[..8]),
            version: 0,
            summary: INITIAL_SUMMARY.to_string(),
            turns: Vec::new(),
        }
    }

    /// Up to the last `n` turns, oldest first.
    pub fn recent(&self, n: usize) -> &[Turn] {
        &self.turns[self.turns.len().saturating_sub(n)..]
    }

    /// Input state for one invocation: the recent window plus the new message,
    /// with the summary as chat memory.
    pub fn begin_turn(&self, user_input: &str, config: &SessionConfig) -> ConversationState {
        let mut messages = self.recent(config.history_window).to_vec();
        messages.push(Turn::human(user_input));
        ConversationState::new(messages, self.summary.clone())
    }

    pub fn record_exchange(&mut self, user_input: &str, answer: &str) {
        self.turns.push(Turn::human(user_input));
        self.turns.push(Turn::ai(answer));
        self.version += 1;
    }

    pub fn needs_archive(&self, config: &SessionConfig) -> bool {
        self.turns.len() > config.max_turns_before_archive
    }

    /// Hand all but the last `keep_recent_turns` turns to the sink, refresh the
    /// summary from the whole session, then truncate. Returns the number of
    /// archived turns. A sink failure leaves the memory untouched; a
    /// summarizer failure keeps the old summary.
    pub async fn archive_and_truncate(
        &mut self,
        config: &SessionConfig,
        summarizer: &dyn Summarizer,
        sink: &dyn ArchiveSink,
    ) -> Result<usize> {
        if !self.needs_archive(config) {
            return Ok(0);
        }

        let split = self.turns.len().saturating_sub(config.keep_recent_turns);
        sink.archive(&self.session_id, &self.turns[..split])
            .await
            .context("failed to archive session turns")?;

        match summarizer.update(&self.summary, &self.turns).await {
            Ok(summary) => self.summary = summary,
            Err(e) => tracing::warn!(error = %e, "Summary update failed, keeping previous summary"),
        }

        self.turns.drain(..split);
        self.version += 1;
        tracing::info!(
            session = %self.session_id,
            archived = split,
            kept = self.turns.len(),
            version = self.version,
            "Session archived"
        );
        Ok(split)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("failed to write session file {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read session file {}", path.display()))?;
        serde_json::from_str(&content).context("invalid session file")
    }
}

impl Default for SessionMemory {
    fn default() -> Self {
        Self::new()
    }
}

/// Archived turns are stored as conversation passages, outside the evidence
/// that retrieval serves.
#[async_trait]
impl ArchiveSink for PassageIndex {
    async fn archive(&self, session_id: &str, turns: &[Turn]) -> Result<()> {
        let text = turns
            .iter()
            .map(|t| format!("{}: {}", t.label(), t.content))
            .collect::<Vec<_>>()
            .join("\n");
        self.add_conversation(&format!("conversation {}", session_id), &text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingSummarizer, RecordingSink};
    use crate::types::TurnRole;

    fn filled(exchanges: usize) -> SessionMemory {
        let mut memory = SessionMemory::new();
        for i in 0..exchanges {
            memory.record_exchange(&format!("question {}", i), &format!("answer {}", i));
        }
        memory
    }

    #[test]
    fn test_new_session_starts_with_initial_summary() {
        let memory = SessionMemory::new();
        assert_eq!(memory.summary, INITIAL_SUMMARY);
        assert_eq!(memory.version, 0);
        assert!(memory.session_id.starts_with("sess_"));
        assert!(memory.recent(4).is_empty());
    }

    #[test]
    fn test_begin_turn_uses_window_and_summary() {
        let memory = filled(3);
        let state = memory.begin_turn("Which scheme for weavers?", &SessionConfig::default());
        assert_eq!(state.messages.len(), 5);
        assert_eq!(state.messages[0].content, "question 1");
        assert_eq!(state.question, "Which scheme for weavers?");
        assert_eq!(state.chat_memory, INITIAL_SUMMARY);
        assert_eq!(state.rewrite_count, 0);
    }

    #[test]
    fn test_needs_archive_only_past_threshold() {
        let config = SessionConfig::default();
        assert!(!filled(5).needs_archive(&config));
        assert!(filled(6).needs_archive(&config));
    }

    #[tokio::test]
    async fn test_archive_keeps_recent_and_updates_summary() {
        let config = SessionConfig::default();
        let mut memory = filled(6);
        let version = memory.version;
        let sink = RecordingSink::default();

        let archived = memory
            .archive_and_truncate(&config, &RuleBasedSummarizer::new(), &sink)
            .await
            .unwrap();

        assert_eq!(archived, 8);
        assert_eq!(memory.turns.len(), 4);
        assert_eq!(memory.turns[0].content, "question 4");
        assert_eq!(memory.turns[3].role, TurnRole::Ai);
        assert_eq!(memory.version, version + 1);
        assert!(memory.summary.contains("question 5"));
        assert_eq!(sink.archived().len(), 8);
    }

    #[tokio::test]
    async fn test_archive_below_threshold_is_noop() {
        let mut memory = filled(2);
        let sink = RecordingSink::default();
        let archived = memory
            .archive_and_truncate(&SessionConfig::default(), &RuleBasedSummarizer::new(), &sink)
            .await
            .unwrap();
        assert_eq!(archived, 0);
        assert_eq!(memory.turns.len(), 4);
        assert!(sink.archived().is_empty());
    }

    #[tokio::test]
    async fn test_summarizer_failure_keeps_old_summary() {
        let mut memory = filled(6);
        let sink = RecordingSink::default();
        memory
            .archive_and_truncate(&SessionConfig::default(), &FailingSummarizer, &sink)
            .await
            .unwrap();
        assert_eq!(memory.summary, INITIAL_SUMMARY);
        assert_eq!(memory.turns.len(), 4);
    }

    #[tokio::test]
    async fn test_passage_index_archive_is_not_evidence() {
        let index = PassageIndex::in_memory(&crate::config::RetrievalConfig {
            min_chunk_size: 5,
            ..Default::default()
        })
        .unwrap();
        let turns = vec![Turn::human("Tell me about MUDRA"), Turn::ai("MUDRA gives collateral-free loans.")];
        index.archive("sess_test", &turns).await.unwrap();
        assert_eq!(index.archived_count(), 1);
        assert_eq!(index.count(), 0);
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("scheme-advisor-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("session.json");

        let memory = filled(2);
        memory.save(&path).unwrap();
        let loaded = SessionMemory::load(&path).unwrap();
        assert_eq!(loaded.session_id, memory.session_id);
        assert_eq!(loaded.turns.len(), 4);

        std::fs::remove_dir_all(&dir).ok();
    }
}
