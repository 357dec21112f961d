//! Profile Extraction
//!
//! Derives a typed user/target profile and the target scope from the human
//! turns of a conversation. Runs once per invocation, before routing, and has
//! no effect on the retrieved context fields.

use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::state::ConversationState;
use crate::types::{TargetScope, Turn, TurnRole};

/// Bumped whenever a field is added to or removed from [`Profile`].
pub const PROFILE_SCHEMA_VERSION: u32 = 1;

static AGE_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?i)\b(\d{1,3})\s*(?:-\s*)?(?:years?|yrs?)\b|\baged?\s*(?:is\s*|of\s*)?(\d{1,3})\b")
        .expect("age regex is valid")
});
static AMOUNT_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?i)(₹|\brs\.?|\binr)?\s*(\d[\d,]*(?:\.\d+)?)\s*(lakhs?|lacs?|crores?|cr|thousand|k)?\b")
        .expect("amount regex is valid")
});
static SENTENCE_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"[!?;\n]+|\.(?:\s+|$)").expect("sentence regex is valid")
});

const RELATIONS: &[&str] = &[
    "mother", "father", "son", "daughter", "wife", "husband", "brother", "sister", "friend",
    "parents", "grandmother", "grandfather", "uncle", "aunt", "mom", "dad", "neighbour",
    "neighbor",
];

const FEMALE_WORDS: &[&str] = &[
    "woman", "women", "female", "girl", "lady", "widow", "mother", "mom", "daughter", "wife",
    "sister", "grandmother", "aunt",
];
const MALE_WORDS: &[&str] = &[
    "man", "men", "male", "boy", "father", "dad", "son", "husband", "brother", "grandfather",
    "uncle",
];

const FIRST_PERSON: &[&str] = &["i", "me", "my", "mine", "myself", "im"];
const THIRD_PERSON: &[&str] = &["she", "he", "her", "his", "him", "they", "their", "them", "hers"];

const STATES: &[(&str, &str)] = &[
    ("andhra pradesh", "Andhra Pradesh"),
    ("arunachal pradesh", "Arunachal Pradesh"),
    ("assam", "Assam"),
    ("bihar", "Bihar"),
    ("chhattisgarh", "Chhattisgarh"),
    ("goa", "Goa"),
    ("gujarat", "Gujarat"),
    ("haryana", "Haryana"),
    ("himachal pradesh", "Himachal Pradesh"),
    ("jharkhand", "Jharkhand"),
    ("karnataka", "Karnataka"),
    ("kerala", "Kerala"),
    ("madhya pradesh", "Madhya Pradesh"),
    ("maharashtra", "Maharashtra"),
    ("manipur", "Manipur"),
    ("meghalaya", "Meghalaya"),
    ("mizoram", "Mizoram"),
    ("nagaland", "Nagaland"),
    ("odisha", "Odisha"),
    ("punjab", "Punjab"),
    ("rajasthan", "Rajasthan"),
    ("sikkim", "Sikkim"),
    ("tamil nadu", "Tamil Nadu"),
    ("telangana", "Telangana"),
    ("tripura", "Tripura"),
    ("uttar pradesh", "Uttar Pradesh"),
    ("uttarakhand", "Uttarakhand"),
    ("west bengal", "West Bengal"),
    ("delhi", "Delhi"),
    ("jammu and kashmir", "Jammu and Kashmir"),
    ("ladakh", "Ladakh"),
    ("puducherry", "Puducherry"),
    ("chandigarh", "Chandigarh"),
];

const SECTORS: &[(&str, &str)] = &[
    ("textile", "textile"),
    ("handloom", "textile"),
    ("weaving", "textile"),
    ("weaver", "textile"),
    ("tailoring", "textile"),
    ("garment", "textile"),
    ("agriculture", "agriculture"),
    ("farming", "agriculture"),
    ("crop", "agriculture"),
    ("dairy", "dairy"),
    ("poultry", "poultry"),
    ("fishery", "fisheries"),
    ("fisheries", "fisheries"),
    ("fishing", "fisheries"),
    ("food processing", "food processing"),
    ("handicraft", "handicrafts"),
    ("pottery", "handicrafts"),
    ("manufacturing", "manufacturing"),
    ("retail", "retail"),
    ("kirana", "retail"),
    ("shop", "retail"),
    ("service", "services"),
];

const OCCUPATIONS: &[&str] = &[
    "farmer", "student", "entrepreneur", "artisan", "weaver", "street vendor", "vendor",
    "self employed", "unemployed", "labourer", "laborer", "fisherman", "tailor", "shopkeeper",
    "homemaker", "retired",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Female,
    Male,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Area {
    Rural,
    Urban,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocialCategory {
    Sc,
    St,
    Obc,
    Ews,
    Minority,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusinessStage {
    New,
    Existing,
}

/// Closed set of profile attributes. Every field is optional; absent means
/// the conversation has not mentioned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub schema_version: u32,
    pub age: Option<u32>,
    pub gender: Option<Gender>,
    pub state: Option<String>,
    pub area: Option<Area>,
    pub sector: Option<String>,
    pub occupation: Option<String>,
    pub social_category: Option<SocialCategory>,
    /// Rupees per year.
    pub annual_income: Option<u64>,
    /// Rupees.
    pub investment: Option<u64>,
    pub business_stage: Option<BusinessStage>,
    /// Relation of the beneficiary to the user, for third-party profiles.
    pub relation: Option<String>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            schema_version: PROFILE_SCHEMA_VERSION,
            age: None,
            gender: None,
            state: None,
            area: None,
            sector: None,
            occupation: None,
            social_category: None,
            annual_income: None,
            investment: None,
            business_stage: None,
            relation: None,
        }
    }
}

impl Profile {
    pub fn is_empty(&self) -> bool {
        self.attributes().is_empty()
    }

    /// Later observations win; absent fields never erase known ones.
    pub fn merge(&mut self, newer: Profile) {
        macro_rules! take {
            ($($field:ident),*) => {
                $( if newer.$field.is_some() { self.$field = newer.$field; } )*
            };
        }
        take!(
            age, gender, state, area, sector, occupation, social_category, annual_income,
            investment, business_stage, relation
        );
    }

    /// Present attributes as `(name, value)` pairs, in a stable order.
    pub fn attributes(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        if let Some(v) = self.age {
            out.push(("age", v.to_string()));
        }
        if let Some(v) = self.gender {
            out.push(("gender", format!("{:?}", v).to_lowercase()));
        }
        if let Some(v) = &self.state {
            out.push(("state", v.clone()));
        }
        if let Some(v) = self.area {
            out.push(("area", format!("{:?}", v).to_lowercase()));
        }
        if let Some(v) = &self.sector {
            out.push(("sector", v.clone()));
        }
        if let Some(v) = &self.occupation {
            out.push(("occupation", v.clone()));
        }
        if let Some(v) = self.social_category {
            out.push(("social_category", format!("{:?}", v).to_uppercase()));
        }
        if let Some(v) = self.annual_income {
            out.push(("annual_income", format_rupees(v)));
        }
        if let Some(v) = self.investment {
            out.push(("investment", format_rupees(v)));
        }
        if let Some(v) = self.business_stage {
            out.push(("business_stage", format!("{:?}", v).to_lowercase()));
        }
        if let Some(v) = &self.relation {
            out.push(("relation", v.clone()));
        }
        out
    }

    /// Terms a graph lookup can match entity names against.
    pub fn search_terms(&self) -> Vec<String> {
        let mut terms = Vec::new();
        if self.gender == Some(Gender::Female) {
            terms.push("women".to_string());
        }
        if let Some(cat) = self.social_category {
            terms.push(format!("{:?}", cat).to_lowercase());
        }
        if let Some(area) = self.area {
            terms.push(format!("{:?}", area).to_lowercase());
        }
        if self.business_stage == Some(BusinessStage::New) {
            terms.push("new enterprise".to_string());
        }
        terms.extend(self.sector.iter().cloned());
        terms.extend(self.occupation.iter().cloned());
        terms.extend(self.state.iter().map(|s| s.to_lowercase()));
        terms
    }

    /// Compact rendering for prompts. Empty profiles render as "not provided".
    pub fn to_prompt_string(&self) -> String {
        let attrs = self.attributes();
        if attrs.is_empty() {
            return "not provided".to_string();
        }
        attrs
            .into_iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn format_rupees(amount: u64) -> String {
    if amount >= 10_000_000 {
        format!("₹{:.2} crore", amount as f64 / 10_000_000.0)
    } else if amount >= 100_000 {
        format!("₹{:.2} lakh", amount as f64 / 100_000.0)
    } else {
        format!("₹{}", amount)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileExtraction {
    pub user_profile: Profile,
    pub target_profile: Profile,
    pub target_scope: TargetScope,
}

/// External collaborator contract: a pure function of conversation state.
pub trait ProfileExtractor: Send + Sync {
    fn extract(&self, state: &ConversationState) -> ProfileExtraction;
}

/// Pattern-based extractor over human turns. No LLM call.
#[derive(Debug, Default, Clone)]
pub struct RuleBasedProfileExtractor;

impl RuleBasedProfileExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract_from_turns(&self, turns: &[Turn]) -> ProfileExtraction {
        let mut user = Profile::default();
        let mut target = Profile::default();
        let mut scope: Option<TargetScope> = None;

        for turn in turns.iter().filter(|t| t.role == TurnRole::Human) {
            let mut turn_scope = None;
            let mut last_relation: Option<String> = None;
            for sentence in SENTENCE_RE.split(&turn.content) {
                let sentence = sentence.trim();
                if sentence.is_empty() {
                    continue;
                }
                let words = tokenize(sentence);
                let has = |list: &[&str]| words.iter().any(|w| list.contains(&w.as_str()));
                // "My mother is 58. She lives in Bihar." keeps talking about the mother.
                let relation = third_party_relation(&words).or_else(|| {
                    last_relation
                        .clone()
                        .filter(|_| has(THIRD_PERSON) && !has(FIRST_PERSON))
                });
                last_relation = relation.clone().or(last_relation);
                match relation {
                    Some(relation) => {
                        let mut observed = extract_sentence(sentence, &words);
                        observed.relation = Some(relation);
                        target.merge(observed);
                        turn_scope = Some(TargetScope::Other);
                    }
                    None => {
                        user.merge(extract_sentence(sentence, &words));
                        if turn_scope.is_none() && has(FIRST_PERSON) {
                            turn_scope = Some(TargetScope::Myself);
                        }
                    }
                }
            }
            if turn_scope.is_some() {
                scope = turn_scope;
            }
        }

        let target_scope = scope.unwrap_or_default();
        if target_scope != TargetScope::Other {
            target = user.clone();
        }

        ProfileExtraction {
            user_profile: user,
            target_profile: target,
            target_scope,
        }
    }
}

impl ProfileExtractor for RuleBasedProfileExtractor {
    fn extract(&self, state: &ConversationState) -> ProfileExtraction {
        self.extract_from_turns(&state.messages)
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_string())
        .collect()
}

fn third_party_relation(words: &[String]) -> Option<String> {
    for pair in words.windows(2) {
        let (first, second) = (pair[0].as_str(), pair[1].as_str());
        if (first == "my" || first == "our") && RELATIONS.contains(&second) {
            return Some(second.to_string());
        }
    }
    for pair in words.windows(2) {
        if pair[0] == "for" && (pair[1] == "him" || pair[1] == "her" || pair[1] == "them") {
            return Some("unspecified".to_string());
        }
    }
    None
}

fn extract_sentence(sentence: &str, words: &[String]) -> Profile {
    let lower = sentence.to_lowercase();
    let padded = format!(" {} ", words.join(" "));
    let mut p = Profile::default();

    if let Some(caps) = AGE_RE.captures(sentence) {
        p.age = caps
            .get(1)
            .or_else(|| caps.get(2))
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .filter(|a| (1..=120).contains(a));
    }

    if words.iter().any(|w| FEMALE_WORDS.contains(&w.as_str())) {
        p.gender = Some(Gender::Female);
    } else if words.iter().any(|w| MALE_WORDS.contains(&w.as_str())) {
        p.gender = Some(Gender::Male);
    }

    p.state = STATES
        .iter()
        .find(|(key, _)| padded.contains(&format!(" {} ", key)))
        .map(|(_, display)| display.to_string());

    if words.iter().any(|w| w == "rural" || w == "village") {
        p.area = Some(Area::Rural);
    } else if words.iter().any(|w| w == "urban" || w == "city" || w == "town") {
        p.area = Some(Area::Urban);
    }

    p.sector = SECTORS
        .iter()
        .find(|(key, _)| padded.contains(&format!(" {}", key)))
        .map(|(_, sector)| sector.to_string());

    p.occupation = OCCUPATIONS
        .iter()
        .find(|occ| padded.contains(&format!(" {}", occ)))
        .map(|occ| occ.to_string());

    p.social_category = if padded.contains(" scheduled caste") || words.iter().any(|w| w == "sc") {
        Some(SocialCategory::Sc)
    } else if padded.contains(" scheduled tribe") || words.iter().any(|w| w == "st") {
        Some(SocialCategory::St)
    } else if words.iter().any(|w| w == "obc") {
        Some(SocialCategory::Obc)
    } else if words.iter().any(|w| w == "ews") {
        Some(SocialCategory::Ews)
    } else if words.iter().any(|w| w == "minority") {
        Some(SocialCategory::Minority)
    } else {
        None
    };

    if let Some(amount) = first_amount(sentence) {
        if lower.contains("income") || lower.contains("earn") || lower.contains("salary") {
            p.annual_income = Some(amount);
        } else if lower.contains("invest") || lower.contains("capital") || lower.contains("project cost") {
            p.investment = Some(amount);
        }
    }

    if padded.contains(" start") || padded.contains(" new business") || padded.contains(" set up") {
        p.business_stage = Some(BusinessStage::New);
    } else if padded.contains(" expand") || padded.contains(" existing") || padded.contains(" running") {
        p.business_stage = Some(BusinessStage::Existing);
    }

    p
}

/// First money amount in the text. Bare numbers without a currency marker or
/// unit are ignored so ages and counts are not mistaken for rupees.
fn first_amount(text: &str) -> Option<u64> {
    for caps in AMOUNT_RE.captures_iter(text) {
        let currency = caps.get(1).is_some();
        let unit = caps.get(3).map(|m| m.as_str().to_lowercase());
        if !currency && unit.is_none() {
            continue;
        }
        let value: f64 = match caps[2].replace(',', "").parse() {
            Ok(v) => v,
            Err(_) => continue,
        };
        let multiplier = match unit.as_deref() {
            Some(u) if u.starts_with("lakh") || u.starts_with("lac") => 100_000.0,
            Some(u) if u.starts_with("crore") || u == "cr" => 10_000_000.0,
            Some("thousand") | Some("k") => 1_000.0,
            _ => 1.0,
        };
        return Some((value * multiplier).round() as u64);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(messages: &[&str]) -> ProfileExtraction {
        let turns: Vec<Turn> = messages.iter().map(|m| Turn::human(*m)).collect();
        RuleBasedProfileExtractor::new().extract_from_turns(&turns)
    }

    #[test]
    fn test_first_person_profile() {
        let out = extract(&[
            "I am a 32 years old woman from rural Uttar Pradesh starting a textile business with ₹5 lakh investment",
        ]);
        assert_eq!(out.target_scope, TargetScope::Myself);
        let p = &out.user_profile;
        assert_eq!(p.age, Some(32));
        assert_eq!(p.gender, Some(Gender::Female));
        assert_eq!(p.state.as_deref(), Some("Uttar Pradesh"));
        assert_eq!(p.area, Some(Area::Rural));
        assert_eq!(p.sector.as_deref(), Some("textile"));
        assert_eq!(p.investment, Some(500_000));
        assert_eq!(p.business_stage, Some(BusinessStage::New));
        assert_eq!(out.target_profile, out.user_profile);
    }

    #[test]
    fn test_third_party_goes_to_target() {
        let out = extract(&[
            "I live in Kerala. My mother is 60 years old and runs a dairy in a village.",
        ]);
        assert_eq!(out.target_scope, TargetScope::Other);
        assert_eq!(out.user_profile.state.as_deref(), Some("Kerala"));
        assert_eq!(out.user_profile.age, None);
        let t = &out.target_profile;
        assert_eq!(t.relation.as_deref(), Some("mother"));
        assert_eq!(t.age, Some(60));
        assert_eq!(t.gender, Some(Gender::Female));
        assert_eq!(t.sector.as_deref(), Some("dairy"));
        assert_eq!(t.area, Some(Area::Rural));
    }

    #[test]
    fn test_pronoun_follow_up_stays_with_third_party() {
        let out = extract(&["My mother is 58 years old. She lives in rural Bihar. I work in Pune."]);
        assert_eq!(out.target_scope, TargetScope::Other);
        let t = &out.target_profile;
        assert_eq!(t.age, Some(58));
        assert_eq!(t.area, Some(Area::Rural));
        assert_eq!(t.state.as_deref(), Some("Bihar"));
        assert_eq!(out.user_profile.area, None);
        assert_eq!(out.user_profile.state, None);
    }

    #[test]
    fn test_pronoun_without_earlier_relation_is_ignored() {
        let out = extract(&["She lives in a village in Assam."]);
        assert_eq!(out.target_scope, TargetScope::Generic);
        assert_eq!(out.user_profile.state.as_deref(), Some("Assam"));
        assert_eq!(out.target_profile.relation, None);
    }

    #[test]
    fn test_generic_scope_without_person_signal() {
        let out = extract(&["What documents are needed for PMEGP?"]);
        assert_eq!(out.target_scope, TargetScope::Generic);
        assert!(out.user_profile.is_empty());
    }

    #[test]
    fn test_latest_turn_scope_wins() {
        let out = extract(&["Loan for my son who is a farmer", "What can I apply for myself?"]);
        assert_eq!(out.target_scope, TargetScope::Myself);
    }

    #[test]
    fn test_bare_numbers_are_not_money() {
        assert_eq!(first_amount("I am 25 years old with 3 kids"), None);
        assert_eq!(first_amount("income is Rs 2,40,000 a year"), Some(240_000));
        assert_eq!(first_amount("around 1.5 crore"), Some(15_000_000));
        assert_eq!(first_amount("budget 50k"), Some(50_000));
    }

    #[test]
    fn test_income_vs_investment() {
        let out = extract(&["My annual income is 3 lakh. I can invest ₹80,000."]);
        assert_eq!(out.user_profile.annual_income, Some(300_000));
        assert_eq!(out.user_profile.investment, Some(80_000));
    }

    #[test]
    fn test_social_category_and_occupation() {
        let out = extract(&["I am an OBC weaver"]);
        assert_eq!(out.user_profile.social_category, Some(SocialCategory::Obc));
        assert_eq!(out.user_profile.occupation.as_deref(), Some("weaver"));
        assert_eq!(out.user_profile.sector.as_deref(), Some("textile"));
    }

    #[test]
    fn test_woman_is_not_matched_as_man() {
        let out = extract(&["I am a woman"]);
        assert_eq!(out.user_profile.gender, Some(Gender::Female));
    }

    #[test]
    fn test_merge_keeps_known_fields() {
        let mut a = Profile {
            age: Some(30),
            state: Some("Goa".into()),
            ..Profile::default()
        };
        a.merge(Profile {
            age: Some(31),
            ..Profile::default()
        });
        assert_eq!(a.age, Some(31));
        assert_eq!(a.state.as_deref(), Some("Goa"));
    }

    #[test]
    fn test_prompt_string_and_search_terms() {
        let p = Profile {
            gender: Some(Gender::Female),
            sector: Some("textile".into()),
            investment: Some(500_000),
            ..Profile::default()
        };
        assert_eq!(
            p.to_prompt_string(),
            "gender: female, sector: textile, investment: ₹5.00 lakh"
        );
        assert_eq!(p.search_terms(), vec!["women".to_string(), "textile".to_string()]);
        assert_eq!(Profile::default().to_prompt_string(), "not provided");
    }
}
