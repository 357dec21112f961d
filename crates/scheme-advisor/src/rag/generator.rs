//! Grounded answer generation.
//!
//! Builds the system prompt from the surviving evidence and the target
//! profile, sends it with the human/AI turns of the conversation, and
//! post-processes the reply: at most three scheme bullets, no internal
//! routing labels. Any failure yields a fixed apology so the turn always
//! completes.

use regex::Regex;
use std::sync::{Arc, LazyLock};

use crate::llm::{ChatMessage, GenerationConfig, LLMProvider};
use crate::state::ConversationState;
use crate::types::{Turn, TurnRole};

pub const FALLBACK_ANSWER: &str = "I'm having trouble syncing my memory. Let's try that again.";

pub const MAX_SCHEMES: usize = 3;

const GENERATOR_RULES: &str = r#"You are an empathetic and careful AI assistant for Indian government schemes.

STRICT RULES:
- Keep the result in bullet points.
- Use ONLY the information explicitly provided in the context.
- Do NOT infer or assume missing details.
- If something is unclear, say so.
- Every factual claim must be grounded in the context.
- If information is insufficient, ask ONE clarifying question.

OUTPUT RULES:
- Show at most 3 schemes.
- Show ONLY schemes relevant to the target scope.
- Never display internal categories like self/other/generic.
- Do NOT explain internal reasoning or classification.
- Do NOT mention unrelated schemes.
- Prefer clarity over completeness.

SCHEME FORMAT:
• <Scheme name>
– <one line on what it offers for this beneficiary>

DOCUMENT FORMAT (two tiers):
Tier 1 - Core documents (always)
Tier 2 - May be required (soft language)

For greetings reply briefly, e.g. "Hello! I can help you find relevant Indian government schemes."

End scheme recommendations with: "Final eligibility and subsidy amounts are subject to official verification by banks and implementing agencies.""#;

fn build_system_prompt(state: &ConversationState) -> String {
    format!(
        "{}\n\nBENEFICIARY CONTEXT (Target Profile):\n{}\n\nTARGET SCOPE:\n{}\n\
         - \"self\" means schemes are for the user.\n\
         - \"other\" means schemes are for someone else.\n\n\
         STRUCTURED CONTEXT:\n{}\n\nUNSTRUCTURED CONTEXT:\n{}",
        GENERATOR_RULES,
        state.target_profile.to_prompt_string(),
        state.target_scope.as_str(),
        non_empty_or(state.structured(), "(none)"),
        non_empty_or(state.unstructured(), "(none)"),
    )
}

fn non_empty_or<'a>(text: &'a str, fallback: &'a str) -> &'a str {
    if text.trim().is_empty() { fallback } else { text }
}

/// System prompt followed by the dialogue turns only.
fn build_messages(state: &ConversationState) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(build_system_prompt(state))];
    messages.extend(state.dialogue().map(|t| match t.role {
        TurnRole::Ai => ChatMessage::assistant(t.content.clone()),
        _ => ChatMessage::user(t.content.clone()),
    }));
    if messages.len() == 1 && !state.question.trim().is_empty() {
        messages.push(ChatMessage::user(state.question.clone()));
    }
    messages
}

// ---------------------------------------------------------------------------
// Post-processing
// ---------------------------------------------------------------------------

static INTERNAL_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(vector_db|knowledge_graph|rewrite_query|target_scope|rewrite_count|structured_context|unstructured_context)\b|\b(target\s+scope|scope|category)\s*[:=]\s*(self|other|generic)\s*[.;,]?\s*$|\[(self|other|generic)\]",
    )
    .expect("internal label regex is valid")
});

static SCHEME_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i:\b(scheme|yojana|programme|program|mission|abhiyan|loan|fund)\b)|\b[A-Z]{3,}\b")
        .expect("scheme name regex is valid")
});

/// Headings that open a document checklist; bullets under them are never schemes.
static DOCUMENT_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(tier\s*[12]|documents?|papers)\b").expect("document heading regex is valid")
});

fn is_top_level_bullet(line: &str) -> bool {
    if line.starts_with(char::is_whitespace) {
        return false;
    }
    if line.starts_with('•') || line.starts_with("- ") || line.starts_with("* ") {
        return true;
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    digits > 0 && line[digits..].starts_with(". ")
}

fn is_continuation(line: &str) -> bool {
    !line.trim().is_empty() && (line.starts_with(char::is_whitespace) || line.starts_with('–'))
}

/// Keep the first `max` scheme bullets and drop later ones together with
/// their detail lines. A bullet counts as a scheme when it has a detail line
/// or names a scheme. Bullets under a document heading are left alone.
pub fn cap_scheme_bullets(text: &str, max: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut out = Vec::with_capacity(lines.len());
    let mut schemes = 0;
    let mut skipping = false;
    let mut in_documents = false;

    for (i, line) in lines.iter().enumerate() {
        if is_top_level_bullet(line) {
            let has_detail = lines.get(i + 1).is_some_and(|next| is_continuation(next));
            if !in_documents && (has_detail || SCHEME_NAME_RE.is_match(line)) {
                schemes += 1;
                skipping = schemes > max;
            } else {
                skipping = false;
            }
        } else if skipping && (is_continuation(line) || line.trim().is_empty()) {
            continue;
        } else {
            skipping = false;
            if !line.trim().is_empty() && !is_continuation(line) {
                in_documents = DOCUMENT_HEADING_RE.is_match(line);
            }
        }

        if !skipping {
            out.push(*line);
        }
    }

    if schemes > max {
        tracing::debug!(found = schemes, kept = max, "Capped scheme recommendations");
    }
    out.join("\n")
}

/// Drop lines that leak routing, grading or scope labels.
pub fn strip_internal_labels(text: &str) -> String {
    text.lines()
        .filter(|line| !INTERNAL_LABEL_RE.is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn post_process(raw: &str) -> String {
    let text = strip_internal_labels(raw.trim());
    cap_scheme_bullets(&text, MAX_SCHEMES).trim().to_string()
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

pub struct AnswerGenerator {
    provider: Arc<dyn LLMProvider>,
    config: GenerationConfig,
}

impl AnswerGenerator {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            config: GenerationConfig::default(),
        }
    }

    /// Append the answer as an AI turn and return it. Never fails.
    pub async fn generate(&self, state: &mut ConversationState) -> String {
        let messages = build_messages(state);
        let answer = match self.provider.chat(&messages, &self.config).await {
            Ok(raw) => {
                let answer = post_process(&raw);
                if answer.is_empty() {
                    tracing::warn!("Generator returned an empty answer, using fallback");
                    FALLBACK_ANSWER.to_string()
                } else {
                    answer
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Answer generation failed, using fallback");
                FALLBACK_ANSWER.to_string()
            }
        };

        tracing::info!(
            answer_chars = answer.len(),
            structured = !state.structured().is_empty(),
            unstructured = !state.unstructured().is_empty(),
            "Answer generated"
        );
        state.push_turn(Turn::ai(answer.clone()));
        answer
    }
}
