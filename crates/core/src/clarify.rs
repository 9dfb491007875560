use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub ambiguous: bool,
    pub questions: Vec<String>,
}

impl Classification {
    fn clear() -> Self {
        Self::default()
    }

    fn ambiguous(questions: Vec<String>) -> Self {
        Self { ambiguous: true, questions }
    }
}

const ENTITY_WORDS: [&str; 14] = [
    "product", "products", "sales", "sale", "customer", "customers", "client", "clients", "order",
    "orders", "market", "markets", "region", "regions",
];

const METRIC_WORDS: [&str; 10] = [
    "revenue", "quantity", "profit", "count", "total", "sum", "average", "volume", "value",
    "units",
];

const ACTION_WORDS: [&str; 7] = ["show", "list", "display", "get", "find", "compare", "analyze"];

const VAGUE_FRAGMENTS: [&str; 6] =
    ["how about", "what about", "how are", "what are", "only ", "just "];

const GROUPING_ONLY: [&str; 7] = [
    "show me by",
    "show by",
    "list by",
    "break down by",
    "break it down by",
    "split by",
    "group by",
];

const TIME_WORDS: [&str; 20] = [
    "q1", "q2", "q3", "q4", "january", "february", "march", "april", "may", "june", "july",
    "august", "september", "october", "november", "december", "month", "quarter", "year", "last",
];

/// Entry-point classifier deciding "ambiguous" vs "resolvable".
///
/// Pure function of the query and the rendered context fragment: a dimension
/// missing from the query is only ambiguous when the context supplies no
/// usable default for it. Question phrasing is canned and deterministic so
/// the whole pipeline stays byte-testable.
#[derive(Clone, Debug, Default)]
pub struct ClarificationDetector;

impl ClarificationDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, query: &str, context_fragment: &str) -> Classification {
        let normalized = query.to_ascii_lowercase();
        let word_count = normalized.split_whitespace().count();
        let has_history = !context_fragment.is_empty();
        let context = context_fragment.to_ascii_lowercase();

        let has_entity = contains_any(&normalized, &ENTITY_WORDS);
        let has_metric = contains_any(&normalized, &METRIC_WORDS);
        let has_action = contains_any(&normalized, &ACTION_WORDS);

        let mut questions = Vec::new();

        // Fragment queries carry no scope of their own; without history there
        // is nothing to inherit from.
        if !has_history {
            let is_vague = VAGUE_FRAGMENTS.iter().any(|fragment| normalized.contains(fragment));
            if is_vague && word_count <= 4 && !(has_entity && has_metric && has_action) {
                questions
                    .push("What would you like to know? Please provide more details.".to_string());
            }

            if GROUPING_ONLY.iter().any(|pattern| normalized.contains(pattern))
                || (normalized.starts_with("by ") && word_count <= 3)
            {
                if !has_entity {
                    questions.push(
                        "What data would you like to see? (products, sales, customers?)"
                            .to_string(),
                    );
                }
                if !has_metric {
                    questions.push(
                        "What metric are you interested in? (revenue, quantity, count?)"
                            .to_string(),
                    );
                }
            }
        }

        // Trends need a time scope from the query or from a prior turn.
        if normalized.contains("trend") {
            let has_time = has_year_token(&normalized)
                || contains_any(&normalized, &TIME_WORDS)
                || context.contains("fiscal_year=");
            if !has_time {
                questions.push("Which time period?".to_string());
            }
        }

        if normalized.contains("performance") && !has_metric && !context.contains("metric=") {
            questions.push("Which metric (revenue, quantity, growth)?".to_string());
        }

        if (normalized.contains("top") || normalized.contains("best"))
            && !(has_entity && has_metric)
            && !context.contains("metric=")
        {
            questions
                .push("By what measure? (e.g., revenue, units sold, growth rate)".to_string());
        }

        if questions.is_empty() {
            Classification::clear()
        } else {
            questions.dedup();
            Classification::ambiguous(questions)
        }
    }
}

fn contains_any(normalized: &str, words: &[&str]) -> bool {
    normalized
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| words.contains(&token) && !token.is_empty())
}

fn has_year_token(normalized: &str) -> bool {
    normalized
        .split(|c: char| !c.is_ascii_digit())
        .any(|token| token.len() == 4 && token.starts_with("20"))
}

#[cfg(test)]
mod tests {
    use super::ClarificationDetector;

    #[test]
    fn bare_grouping_query_without_history_is_ambiguous() {
        let detector = ClarificationDetector::new();
        let classification = detector.classify("break it down by month", "");
        assert!(classification.ambiguous);
        assert!(!classification.questions.is_empty());
    }

    #[test]
    fn same_query_with_context_default_is_resolvable() {
        let detector = ClarificationDetector::new();
        let context = "Previous conversation (oldest first):\n1. Question: \"Sales in 2024\"\n   \
                       Filters: fiscal_year=2024, metric=revenue\n";
        let classification = detector.classify("break it down by month", context);
        assert!(!classification.ambiguous, "questions: {:?}", classification.questions);
    }

    #[test]
    fn trend_without_time_scope_asks_for_period() {
        let detector = ClarificationDetector::new();
        let classification = detector.classify("show me the sales revenue trend", "");
        assert!(classification.ambiguous);
        assert!(classification.questions.contains(&"Which time period?".to_string()));
    }

    #[test]
    fn trend_with_year_is_clear() {
        let detector = ClarificationDetector::new();
        let classification = detector.classify("show me the sales revenue trend for 2024", "");
        assert!(!classification.ambiguous);
    }

    #[test]
    fn top_without_measure_asks_for_one() {
        let detector = ClarificationDetector::new();
        let classification = detector.classify("top performers", "");
        assert!(classification.ambiguous);
    }

    #[test]
    fn complete_question_is_clear() {
        let detector = ClarificationDetector::new();
        let classification = detector.classify("show revenue for products by region in 2024", "");
        assert!(!classification.ambiguous, "questions: {:?}", classification.questions);
    }

    #[test]
    fn vague_fragment_without_history_is_ambiguous() {
        let detector = ClarificationDetector::new();
        assert!(detector.classify("what about south", "").ambiguous);
    }

    #[test]
    fn classifier_is_pure_and_deterministic() {
        let detector = ClarificationDetector::new();
        let first = detector.classify("top performers", "");
        let second = detector.classify("top performers", "");
        assert_eq!(first, second);
    }
}
