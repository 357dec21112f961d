use serde::{Deserialize, Serialize};

use crate::profile::{Profile, ProfileExtraction};
use crate::types::{TargetScope, Turn, TurnRole};

/// The unit of work flowing through one state-machine invocation.
///
/// Owned by the orchestrator for the whole cycle and handed back to the
/// caller afterwards. Clone it before sharing across concurrent invocations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    /// Append-only within a session.
    pub messages: Vec<Turn>,
    /// Rolling summary owned by the external summarizer. Opaque here.
    pub chat_memory: String,
    pub unstructured_context: Option<String>,
    pub structured_context: Option<String>,
    /// Active query; overwritten by the rewriter.
    pub question: String,
    /// Incremented only by the grader's rewrite branch.
    pub rewrite_count: u32,
    pub user_profile: Profile,
    pub target_profile: Profile,
    pub target_scope: TargetScope,
}

impl ConversationState {
    /// Build the initial state for one invocation. The question starts as the
    /// latest human message.
    pub fn new(messages: Vec<Turn>, chat_memory: impl Into<String>) -> Self {
        let question = messages
            .iter()
            .rev()
            .find(|t| t.role == TurnRole::Human)
            .map(|t| t.content.clone())
            .unwrap_or_default();
        Self {
            messages,
            chat_memory: chat_memory.into(),
            question,
            ..Self::default()
        }
    }

    pub fn push_turn(&mut self, turn: Turn) {
        self.messages.push(turn);
    }

    /// Content of the most recent message, whatever its role.
    pub fn latest_message(&self) -> Option<&str> {
        self.messages.last().map(|t| t.content.as_str())
    }

    /// Human and AI turns only, oldest first.
    pub fn dialogue(&self) -> impl Iterator<Item = &Turn> {
        self.messages.iter().filter(|t| t.is_dialogue())
    }

    pub fn apply_profile(&mut self, extraction: ProfileExtraction) {
        self.user_profile = extraction.user_profile;
        self.target_profile = extraction.target_profile;
        self.target_scope = extraction.target_scope;
    }

    pub fn unstructured(&self) -> &str {
        self.unstructured_context.as_deref().unwrap_or("")
    }

    pub fn structured(&self) -> &str {
        self.structured_context.as_deref().unwrap_or("")
    }

    /// Text of the last AI turn, which is the answer once generation has run.
    pub fn final_answer(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|t| t.role == TurnRole::Ai)
            .map(|t| t.content.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_starts_as_latest_human_turn() {
        let state = ConversationState::new(
            vec![Turn::human("hi"), Turn::ai("hello"), Turn::human("PMEGP subsidy?")],
            "summary",
        );
        assert_eq!(state.question, "PMEGP subsidy?");
        assert_eq!(state.rewrite_count, 0);
        assert_eq!(state.chat_memory, "summary");
        assert!(state.structured_context.is_none());
    }

    #[test]
    fn test_dialogue_skips_system_turns() {
        let state = ConversationState::new(
            vec![Turn::system("rules"), Turn::human("hi"), Turn::ai("hello")],
            "",
        );
        assert_eq!(state.dialogue().count(), 2);
    }

    #[test]
    fn test_empty_state_has_empty_question() {
        let state = ConversationState::new(vec![], "");
        assert_eq!(state.question, "");
        assert_eq!(state.latest_message(), None);
        assert_eq!(state.final_answer(), None);
    }
}
