//! Decision components of the query loop: routing, grading, rewriting and
//! grounded generation.

pub mod generator;
pub mod grader;
pub mod rewriter;
pub mod router;

pub use generator::{AnswerGenerator, FALLBACK_ANSWER};
pub use grader::{decide, Grader, LlmRelevanceScorer, RelevanceScorer};
pub use rewriter::{QueryRewriter, RewrittenQuery};
pub use router::{keyword_route, FallbackChain, LlmRouteClassifier, MemoryRouter, RouteClassifier};
