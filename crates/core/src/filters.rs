use std::collections::BTreeMap;

use crate::dataset::DatasetConfig;

/// Dimension keys used in `Turn::extracted_filters`.
pub mod dimension {
    pub const FISCAL_YEAR: &str = "fiscal_year";
    pub const QUARTER: &str = "quarter";
    pub const REGION: &str = "region";
    pub const ENTITY: &str = "entity";
    pub const METRIC: &str = "metric";
}

const REGION_TOKENS: [&str; 4] = ["north", "south", "east", "west"];

const METRIC_TOKENS: [&str; 7] =
    ["revenue", "quantity", "profit", "volume", "value", "margin", "units"];

const FOLLOWUP_KEYWORDS: [&str; 18] = [
    "what about", "same but", "also show", "compare", "versus", "only", "just", "filter", "more",
    "less", "that", "it", "them", "this", "these", "previous", "again", "too",
];

const STANDALONE_ACTIONS: [&str; 5] =
    ["list all", "show all", "get all", "display all", "show me all"];

const DIMENSION_MODIFIERS: [&str; 6] =
    ["by region", "by category", "by product", "by quarter", "by month", "by segment"];

const OVERRIDE_PHRASES: [&str; 6] =
    ["instead", "actually", "rather than", "change to", "switch to", "not "];

/// Deterministic extraction of analytic filter dimensions from query text.
/// Entity matching uses the dataset's known entity aliases, the way a catalog
/// lookup resolves product mentions.
#[derive(Clone, Debug)]
pub struct FilterExtractor {
    entities: Vec<(String, Vec<String>)>,
}

impl FilterExtractor {
    pub fn for_dataset(dataset: &DatasetConfig) -> Self {
        let entities = dataset
            .entities
            .iter()
            .map(|entity| {
                let mut names = vec![entity.canonical.to_ascii_lowercase()];
                names.extend(entity.aliases.iter().map(|alias| alias.to_ascii_lowercase()));
                (entity.canonical.clone(), names)
            })
            .collect();
        Self { entities }
    }

    pub fn extract(&self, query: &str) -> BTreeMap<String, String> {
        let normalized = query.to_ascii_lowercase();
        let tokens = tokenize(&normalized);
        let mut filters = BTreeMap::new();

        if let Some(year) = tokens.iter().find(|token| is_year_token(token)) {
            filters.insert(dimension::FISCAL_YEAR.to_string(), year.to_string());
        }
        if let Some(quarter) = tokens.iter().find(|token| is_quarter_token(token)) {
            filters.insert(dimension::QUARTER.to_string(), quarter.to_ascii_uppercase());
        }
        if let Some(region) = tokens.iter().find(|token| REGION_TOKENS.contains(&token.as_str())) {
            filters.insert(dimension::REGION.to_string(), capitalize(region));
        }
        if let Some(metric) = tokens.iter().find(|token| METRIC_TOKENS.contains(&token.as_str())) {
            filters.insert(dimension::METRIC.to_string(), metric.to_string());
        }
        if let Some(canonical) = self.match_entity(&normalized) {
            filters.insert(dimension::ENTITY.to_string(), canonical);
        }

        filters
    }

    fn match_entity(&self, normalized_query: &str) -> Option<String> {
        self.entities
            .iter()
            .find(|(_, names)| names.iter().any(|name| normalized_query.contains(name.as_str())))
            .map(|(canonical, _)| canonical.clone())
    }
}

/// Keyword/shortness heuristics classifying a query as a follow-up to prior
/// turns versus a standalone question. Queries in an empty session are never
/// follow-ups.
pub fn is_followup(query: &str, has_history: bool) -> bool {
    if !has_history {
        return false;
    }
    let normalized = query.to_ascii_lowercase();
    let word_count = normalized.split_whitespace().count();

    if DIMENSION_MODIFIERS.iter().any(|modifier| normalized.contains(modifier)) {
        return true;
    }
    if STANDALONE_ACTIONS.iter().any(|action| normalized.contains(action)) {
        return false;
    }

    let has_keyword = FOLLOWUP_KEYWORDS.iter().any(|keyword| {
        if keyword.contains(' ') {
            normalized.contains(keyword)
        } else {
            tokenize(&normalized).iter().any(|token| token == keyword)
        }
    });
    let is_short = word_count <= 4;

    has_keyword || is_short
}

/// Explicit-override language: the user is intentionally changing a
/// previously inherited dimension ("actually, 2023" / "West instead").
pub fn has_override_language(query: &str) -> bool {
    let normalized = query.to_ascii_lowercase();
    OVERRIDE_PHRASES.iter().any(|phrase| normalized.contains(phrase))
}

/// Merge inherited filters with dimensions extracted from the new query.
/// Current-query values always win; inherited keys absent from the new query
/// carry forward unchanged. Standalone queries start fresh.
pub fn resolve_filters(
    inherited: &BTreeMap<String, String>,
    current: &BTreeMap<String, String>,
    followup: bool,
) -> BTreeMap<String, String> {
    if !followup {
        return current.clone();
    }
    let mut resolved = inherited.clone();
    for (dimension, value) in current {
        resolved.insert(dimension.clone(), value.clone());
    }
    resolved
}

/// Standalone rendering of a follow-up query with its effective filter set,
/// so downstream prompting never depends on implicit conversation state.
pub fn render_resolved_query(raw_query: &str, filters: &BTreeMap<String, String>) -> String {
    if filters.is_empty() {
        return raw_query.to_string();
    }
    let rendered = filters
        .iter()
        .map(|(dimension, value)| format!("{dimension}={value}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{raw_query} [context: {rendered}]")
}

fn tokenize(normalized: &str) -> Vec<String> {
    normalized
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_string())
        .collect()
}

fn is_year_token(token: &str) -> bool {
    token.len() == 4 && token.starts_with("20") && token.chars().all(|c| c.is_ascii_digit())
}

fn is_quarter_token(token: &str) -> bool {
    matches!(token, "q1" | "q2" | "q3" | "q4")
}

fn capitalize(token: &str) -> String {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}
