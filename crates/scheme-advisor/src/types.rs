use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Conversation turns
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    Human,
    Ai,
    System,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn human(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Human,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Ai,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::System,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Human and AI turns are the only ones shown to generation prompts.
    pub fn is_dialogue(&self) -> bool {
        matches!(self.role, TurnRole::Human | TurnRole::Ai)
    }

    pub fn label(&self) -> &'static str {
        match self.role {
            TurnRole::Human => "user",
            TurnRole::Ai => "assistant",
            TurnRole::System => "system",
            TurnRole::Tool => "tool",
        }
    }
}

// ============================================================================
// Routing
// ============================================================================

/// Evidence source selected for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    VectorDb,
    KnowledgeGraph,
    Generate,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VectorDb => "vector_db",
            Self::KnowledgeGraph => "knowledge_graph",
            Self::Generate => "generate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "vector_db" => Some(Self::VectorDb),
            "knowledge_graph" => Some(Self::KnowledgeGraph),
            "generate" => Some(Self::Generate),
            _ => None,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which stage of the router produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DecisionSource {
    Keyword { tier: u8 },
    Classifier { attempt: usize },
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub route: Route,
    #[serde(default)]
    pub reasoning: String,
    pub source: DecisionSource,
}

// ============================================================================
// Grading
// ============================================================================

/// Relevance of both evidence sets, each in [0.0, 1.0].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelevanceScore {
    pub vector_score: f32,
    pub graph_score: f32,
}

impl RelevanceScore {
    pub fn new(vector_score: f32, graph_score: f32) -> Self {
        Self {
            vector_score: clamp_unit(vector_score),
            graph_score: clamp_unit(graph_score),
        }
    }
}

fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeOutcome {
    RewriteQuery,
    Generate,
}

impl GradeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RewriteQuery => "rewrite_query",
            Self::Generate => "generate",
        }
    }
}

// ============================================================================
// Target scope
// ============================================================================

/// Whom the surfaced schemes should apply to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetScope {
    #[serde(rename = "self")]
    Myself,
    Other,
    #[default]
    Generic,
}

impl TargetScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Myself => "self",
            Self::Other => "other",
            Self::Generic => "generic",
        }
    }
}
