//! Rule-based rolling summary: earlier questions plus the scheme names and
//! other entities mentioned, with no LLM dependency.

use anyhow::Result;
use async_trait::async_trait;

use super::{Summarizer, INITIAL_SUMMARY};
use crate::types::{Turn, TurnRole};

const MAX_TOPICS: usize = 5;
const MAX_ENTITIES: usize = 15;

pub struct RuleBasedSummarizer;

impl RuleBasedSummarizer {
    pub fn new() -> Self {
        Self
    }

    pub fn summarize(&self, old_summary: &str, turns: &[Turn]) -> String {
        let mut topics: Vec<String> = Vec::new();
        let mut entities: Vec<String> = Vec::new();

        for turn in turns {
            if turn.role == TurnRole::Human {
                let topic: String = turn.content.chars().take(80).collect();
                let topic = topic.trim().to_string();
                if !topic.is_empty() && !topics.contains(&topic) {
                    topics.push(topic);
                }
            }

            // Capitalized words and acronyms; scheme names are mostly both
            for (i, word) in turn.content.split_whitespace().enumerate() {
                let clean = word.trim_matches(|c: char| !c.is_alphanumeric() && c != '-');
                let starts_upper = clean.chars().next().is_some_and(|c| c.is_uppercase());
                let is_acronym = clean.len() >= 3 && clean.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
                if clean.len() > 2 && starts_upper && (i > 0 || is_acronym) && !entities.iter().any(|e| e == clean) {
                    entities.push(clean.to_string());
                }
            }
        }

        // Most recent questions matter most
        if topics.len() > MAX_TOPICS {
            topics.drain(..topics.len() - MAX_TOPICS);
        }
        entities.sort();
        entities.dedup();
        entities.truncate(MAX_ENTITIES);

        let mut parts = Vec::new();
        let old = old_summary.trim();
        if !old.is_empty() && old != INITIAL_SUMMARY {
            parts.push(old.trim_end_matches('.').to_string());
        }
        if !topics.is_empty() {
            parts.push(format!("Previous questions: {}", topics.join("; ")));
        }
        if !entities.is_empty() {
            parts.push(format!("Key entities: {}", entities.join(", ")));
        }

        if parts.is_empty() {
            old_summary.to_string()
        } else {
            parts.join(". ") + "."
        }
    }
}

impl Default for RuleBasedSummarizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Summarizer for RuleBasedSummarizer {
    async fn update(&self, old_summary: &str, turns: &[Turn]) -> Result<String> {
        Ok(self.summarize(old_summary, turns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_lists_questions_and_entities() {
        let turns = vec![
            Turn::human("Tell me about PMEGP for textile units"),
            Turn::ai("PMEGP is run by KVIC and offers a capital subsidy."),
        ];
        let summary = RuleBasedSummarizer::new().summarize(INITIAL_SUMMARY, &turns);
        assert!(summary.starts_with("Previous questions: Tell me about PMEGP for textile units"));
        assert!(summary.contains("KVIC"));
        assert!(summary.contains("PMEGP"));
        assert!(!summary.contains(INITIAL_SUMMARY));
    }

    #[test]
    fn test_old_summary_is_carried_forward() {
        let turns = vec![Turn::human("what about Stand-Up India?")];
        let summary = RuleBasedSummarizer::new().summarize("Previous questions: PMEGP subsidy.", &turns);
        assert!(summary.starts_with("Previous questions: PMEGP subsidy. Previous questions: what about Stand-Up India?"));
        assert!(summary.contains("Stand-Up"));
    }

    #[test]
    fn test_nothing_to_add_keeps_old_summary() {
        let summary = RuleBasedSummarizer::new().summarize(INITIAL_SUMMARY, &[]);
        assert_eq!(summary, INITIAL_SUMMARY);
    }

    #[test]
    fn test_topics_keep_most_recent() {
        let turns: Vec<Turn> = (0..8).map(|i| Turn::human(format!("question {}", i))).collect();
        let summary = RuleBasedSummarizer::new().summarize("", &turns);
        assert!(summary.contains("question 7"));
        assert!(summary.contains("question 3"));
        assert!(!summary.contains("question 2"));
    }
}
