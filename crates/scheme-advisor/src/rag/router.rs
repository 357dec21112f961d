//! Memory Router
//!
//! Picks the single evidence source for a query. Three keyword tiers are
//! checked in order, first match wins; only a message with no keyword signal
//! reaches the LLM classifier chain. Routing never fails: every error path
//! ends at `vector_db`, the grounding-preferring default.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RouterConfig;
use crate::llm::structured::{extract_json_object, extract_json_string, parse_strict};
use crate::llm::{GenerationConfig, LLMProvider};
use crate::state::ConversationState;
use crate::types::{DecisionSource, Route, RoutingDecision};

// ---------------------------------------------------------------------------
// Keyword tiers
// ---------------------------------------------------------------------------

/// Factual, financial or procedural scheme language. Must be retrieved.
pub const VECTOR_KEYWORDS: &[&str] = &[
    "scheme", "yojana", "loan", "subsidy", "benefit",
    "eligibility", "eligible", "documents", "apply",
    "application", "procedure", "guidelines",
    "interest", "repayment", "government",
];

/// Relational or profile-matching phrasing.
pub const GRAPH_KEYWORDS: &[&str] = &[
    "am i eligible", "which scheme", "best scheme",
    "for me", "based on", "depends on", "for ",
    "related to", "under which",
];

/// Greetings and acknowledgements.
pub const GREETING_KEYWORDS: &[&str] = &["hi", "hello", "hey", "thanks", "ok", "yes", "no"];

const TIERS: [(&[&str], Route); 3] = [
    (VECTOR_KEYWORDS, Route::VectorDb),
    (GRAPH_KEYWORDS, Route::KnowledgeGraph),
    (GREETING_KEYWORDS, Route::Generate),
];

/// Case-insensitive substring match over the tiers. Returns the route and the
/// 1-based tier that matched.
pub fn keyword_route(query: &str) -> Option<(Route, u8)> {
    let q = query.to_lowercase();
    TIERS
        .iter()
        .enumerate()
        .find(|(_, (keywords, _))| keywords.iter().any(|kw| q.contains(kw)))
        .map(|(i, (_, route))| (*route, i as u8 + 1))
}

// ---------------------------------------------------------------------------
// Classifier strategy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub route: Route,
    pub reasoning: String,
}

/// One backend attempt of the fallback chain.
#[async_trait]
pub trait RouteClassifier: Send + Sync {
    async fn classify(&self, query: &str) -> Result<Classification>;

    fn name(&self) -> String;
}

const CLASSIFIER_PROMPT: &str = r#"You are a deterministic routing component for a government schemes assistant.
Choose the SINGLE most appropriate route to answer the user's query safely and correctly.

Available routes:

1. vector_db
   Use when the query requires retrieving information from documents or text sources:
   - Scheme details, benefits, eligibility criteria
   - Required documents, application steps, deadlines
   - Government policies, rules, notifications, guidelines
   - Any information that must be grounded in official or indexed sources

2. knowledge_graph
   Use when the query requires structured relationships:
   - Matching user profile attributes (age, sector, income, state) to schemes
   - Dependencies between schemes, benefits, and conditions
   - Multi-step eligibility reasoning across connected entities

3. generate
   Use ONLY when the query is:
   - Conversational or clarificatory (greetings, confirmations)
   - Asking for high-level explanations without factual lookup
   - A follow-up that does NOT introduce new factual requirements

Rules:
- Choose exactly ONE route.
- Provide a brief justification (max 10 words).
- If the query involves eligibility, money, documents, or applications, do NOT choose generate.
- If uncertain, choose vector_db.
- Do NOT answer the query.

Output ONLY this JSON object, nothing else:
{"route":"vector_db|knowledge_graph|generate","reasoning":"..."}"#;

fn build_classifier_prompt(query: &str) -> String {
    format!("{}\n\nQuery: \"{}\"\nJSON:", CLASSIFIER_PROMPT, query)
}

#[derive(Deserialize)]
struct RawClassification {
    route: String,
    #[serde(default)]
    reasoning: String,
}

/// Parse `{"route":..., "reasoning":...}`. An unknown or missing route is an
/// error so the chain moves on to the next attempt.
fn parse_classification(raw: &str) -> Result<Classification> {
    let (route_str, reasoning) = match parse_strict::<RawClassification>(raw) {
        Ok(parsed) => (parsed.route, parsed.reasoning),
        Err(_) => {
            let json_str = extract_json_object(raw);
            let route = extract_json_string(json_str, "route")
                .ok_or_else(|| anyhow!("classifier output has no route field"))?;
            (route, extract_json_string(json_str, "reasoning").unwrap_or_default())
        }
    };

    let route = Route::parse(&route_str)
        .ok_or_else(|| anyhow!("classifier returned unknown route '{}'", route_str))?;
    Ok(Classification {
        route,
        reasoning: reasoning.split_whitespace().take(10).collect::<Vec<_>>().join(" "),
    })
}

/// Structured-output route classification over an LLM provider.
pub struct LlmRouteClassifier {
    provider: Arc<dyn LLMProvider>,
    config: GenerationConfig,
}

impl LlmRouteClassifier {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            config: GenerationConfig {
                temperature: 0.0,
                ..GenerationConfig::default()
            }
            .with_max_tokens(100),
        }
    }
}

#[async_trait]
impl RouteClassifier for LlmRouteClassifier {
    async fn classify(&self, query: &str) -> Result<Classification> {
        let prompt = build_classifier_prompt(query);
        let raw = self
            .provider
            .generate(&prompt, &self.config)
            .await
            .context("route classifier call failed")?;
        parse_classification(&raw)
    }

    fn name(&self) -> String {
        let info = self.provider.info();
        format!("{}/{}", info.name, info.model)
    }
}

/// Ordered classifier attempts with a per-attempt timeout and a terminal
/// `vector_db` default.
pub struct FallbackChain {
    attempts: Vec<Arc<dyn RouteClassifier>>,
    timeout: Duration,
}

impl FallbackChain {
    pub fn new(attempts: Vec<Arc<dyn RouteClassifier>>, timeout: Duration) -> Self {
        Self { attempts, timeout }
    }

    pub async fn classify(&self, query: &str) -> RoutingDecision {
        for (i, classifier) in self.attempts.iter().enumerate() {
            let attempt = i + 1;
            let start = Instant::now();
            match tokio::time::timeout(self.timeout, classifier.classify(query)).await {
                Ok(Ok(c)) => {
                    tracing::info!(
                        route = %c.route,
                        reasoning = %c.reasoning,
                        attempt = attempt,
                        backend = %classifier.name(),
                        latency_ms = start.elapsed().as_millis() as u64,
                        "LLM router decision"
                    );
                    return RoutingDecision {
                        route: c.route,
                        reasoning: c.reasoning,
                        source: DecisionSource::Classifier { attempt },
                    };
                }
                Ok(Err(e)) => {
                    tracing::warn!(attempt = attempt, backend = %classifier.name(), error = %e, "Route classifier failed");
                }
                Err(_) => {
                    tracing::warn!(
                        attempt = attempt,
                        backend = %classifier.name(),
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Route classifier timed out"
                    );
                }
            }
        }

        tracing::warn!("All route classifiers failed, defaulting to vector_db");
        RoutingDecision {
            route: Route::VectorDb,
            reasoning: "classifier unavailable, grounding-first default".to_string(),
            source: DecisionSource::Default,
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub struct MemoryRouter {
    fallback: FallbackChain,
}

impl MemoryRouter {
    pub fn new(fallback: FallbackChain) -> Self {
        Self { fallback }
    }

    /// Primary and secondary provider instances as the two chain attempts.
    /// With `llm_fallback` off the chain is empty and keyword misses go
    /// straight to the default.
    pub fn with_providers(
        config: &RouterConfig,
        primary: Arc<dyn LLMProvider>,
        secondary: Arc<dyn LLMProvider>,
    ) -> Self {
        let attempts: Vec<Arc<dyn RouteClassifier>> = if config.llm_fallback {
            vec![
                Arc::new(LlmRouteClassifier::new(primary)),
                Arc::new(LlmRouteClassifier::new(secondary)),
            ]
        } else {
            Vec::new()
        };
        Self::new(FallbackChain::new(
            attempts,
            Duration::from_millis(config.classifier_timeout_ms),
        ))
    }

    /// Route on the latest message, or the active question when there are no
    /// messages.
    pub async fn route(&self, state: &ConversationState) -> RoutingDecision {
        let query = state.latest_message().unwrap_or(&state.question);

        if let Some((route, tier)) = keyword_route(query) {
            tracing::info!(route = %route, tier = tier, "Keyword router decision");
            return RoutingDecision {
                route,
                reasoning: format!("keyword tier {}", tier),
                source: DecisionSource::Keyword { tier },
            };
        }

        tracing::debug!("No keyword signal, using LLM fallback");
        self.fallback.classify(&query.to_lowercase()).await
    }
}
