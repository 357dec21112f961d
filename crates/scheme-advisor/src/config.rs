use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::AdvisorError;
use crate::llm::{ApiProvider, LLMConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    pub router: RouterConfig,
    pub grader: GraderConfig,
    pub orchestrator: OrchestratorConfig,
    pub retrieval: RetrievalConfig,
    pub llm: LlmSettings,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Per-attempt timeout for the fallback classifier.
    pub classifier_timeout_ms: u64,
    /// When false, keyword misses go straight to the conservative default.
    pub llm_fallback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraderConfig {
    pub reject_below: f32,
    pub graph_accept: f32,
    pub vector_accept: f32,
    pub max_rewrites: u32,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Hard ceiling on node executions per invocation.
    pub max_steps: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub timeout_ms: u64,
    pub max_hops: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub primary: LLMConfig,
    /// Independent instance used only as the router's second attempt.
    pub secondary: LLMConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_turns_before_archive: usize,
    pub keep_recent_turns: usize,
    /// Prior turns handed to each invocation besides the new message.
    pub history_window: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            classifier_timeout_ms: 8_000,
            llm_fallback: true,
        }
    }
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            reject_below: 0.4,
            graph_accept: 0.7,
            vector_accept: 0.6,
            max_rewrites: 2,
            timeout_ms: 10_000,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        // Longest legal path is 11 node executions (two full rewrite cycles).
        Self { max_steps: 12 }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 4,
            timeout_ms: 5_000,
            max_hops: 2,
            chunk_size: 800,
            chunk_overlap: 150,
            min_chunk_size: 50,
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        let primary = LLMConfig {
            provider: ApiProvider::Groq,
            model: "llama-3.1-8b-instant".to_string(),
            max_retries: 0,
            ..LLMConfig::default()
        };
        let secondary = LLMConfig {
            max_retries: 2,
            ..primary.clone()
        };
        Self { primary, secondary }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_turns_before_archive: 10,
            keep_recent_turns: 4,
            history_window: 4,
        }
    }
}

/// Hard upper bound on rewrite cycles per invocation.
pub const MAX_REWRITES: u32 = 2;

const MIN_CHUNK_SIZE: usize = 16;

/// Node executions on the longest legal path: profile, route, fetch, grade,
/// three per rewrite cycle, then generate.
pub fn longest_path(max_rewrites: u32) -> usize {
    5 + 3 * max_rewrites as usize
}

impl AdvisorConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), AdvisorError> {
        let unit = 0.0..=1.0;
        for (name, value) in [
            ("grader.reject_below", self.grader.reject_below),
            ("grader.graph_accept", self.grader.graph_accept),
            ("grader.vector_accept", self.grader.vector_accept),
        ] {
            if !unit.contains(&value) {
                return Err(AdvisorError::Config(format!("{} must be in [0.0, 1.0]", name)));
            }
        }
        if self.grader.reject_below >= self.grader.vector_accept
            || self.grader.reject_below >= self.grader.graph_accept
        {
            return Err(AdvisorError::Config(
                "grader.reject_below must be below both accept thresholds".into(),
            ));
        }
        if self.grader.max_rewrites > MAX_REWRITES {
            return Err(AdvisorError::Config(format!(
                "grader.max_rewrites must be <= {}",
                MAX_REWRITES
            )));
        }
        let required_steps = longest_path(self.grader.max_rewrites);
        if self.orchestrator.max_steps < required_steps {
            return Err(AdvisorError::Config(format!(
                "orchestrator.max_steps must be >= {} to fit {} rewrites",
                required_steps, self.grader.max_rewrites
            )));
        }
        if self.retrieval.chunk_size < MIN_CHUNK_SIZE {
            return Err(AdvisorError::Config(format!(
                "retrieval.chunk_size must be >= {}",
                MIN_CHUNK_SIZE
            )));
        }
        if self.retrieval.top_k == 0 {
            return Err(AdvisorError::Config("retrieval.top_k must be > 0".into()));
        }
        if self.retrieval.chunk_overlap >= self.retrieval.chunk_size {
            return Err(AdvisorError::Config(
                "retrieval.chunk_overlap must be < chunk_size".into(),
            ));
        }
        if self.session.keep_recent_turns > self.session.max_turns_before_archive {
            return Err(AdvisorError::Config(
                "session.keep_recent_turns must be <= max_turns_before_archive".into(),
            ));
        }
        Ok(())
    }

    /// Load config from a JSON file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> Result<Self, AdvisorError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AdvisorError::Config(format!("Failed to read config file: {}", e)))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| AdvisorError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// `<config dir>/scheme-advisor/config.json`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("scheme-advisor").join("config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AdvisorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.grader.max_rewrites, 2);
        assert_eq!(config.llm.primary.max_retries, 0);
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let mut config = AdvisorConfig::default();
        config.grader.reject_below = 0.65;
        assert!(matches!(config.validate(), Err(AdvisorError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_step_ceiling() {
        let mut config = AdvisorConfig::default();
        config.orchestrator.max_steps = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_rewrites_above_ceiling() {
        let json = r#"{"grader":{"max_rewrites":3},"orchestrator":{"max_steps":20}}"#;
        let config: AdvisorConfig = serde_json::from_str(json).unwrap();
        assert!(matches!(config.validate(), Err(AdvisorError::Config(msg)) if msg.contains("max_rewrites")));
    }

    #[test]
    fn test_step_ceiling_must_fit_longest_path() {
        let mut config = AdvisorConfig::default();
        assert_eq!(longest_path(config.grader.max_rewrites), 11);
        config.orchestrator.max_steps = 10;
        assert!(config.validate().is_err());
        config.orchestrator.max_steps = 11;
        assert!(config.validate().is_ok());

        config.grader.max_rewrites = 0;
        config.orchestrator.max_steps = 5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_tiny_chunks() {
        let mut config = AdvisorConfig::default();
        config.retrieval.chunk_size = 2;
        config.retrieval.chunk_overlap = 0;
        assert!(matches!(config.validate(), Err(AdvisorError::Config(msg)) if msg.contains("chunk_size")));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"grader":{"max_rewrites":1},"retrieval":{"top_k":8}}"#;
        let config: AdvisorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.grader.max_rewrites, 1);
        assert_eq!(config.grader.reject_below, 0.4);
        assert_eq!(config.retrieval.top_k, 8);
        assert_eq!(config.orchestrator.max_steps, 12);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_reports_missing_file() {
        let err = AdvisorConfig::from_file(Path::new("/nonexistent/advisor.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
