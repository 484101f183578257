//! Text matching helpers shared by the evaluator.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "if", "then", "else", "when", "while", "to", "of", "in",
    "on", "for", "with", "as", "by", "is", "are", "was", "were", "be", "been", "being", "it",
    "this", "that", "these", "those", "at", "from", "not",
];

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z0-9]+").expect("token regex"));
static CITATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]+)\]").expect("citation regex"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));
static NUMERIC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(?:\.\d+)?$").expect("numeric regex"));
static FIRST_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("number regex"));
// A pasted chat answer may carry "Answer: ... Citations: ... Confidence: ..."
static ANSWER_PREFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*answer\s*:\s*(.*?)(?:\r?\n|\s+citations?\s*:|\s+confidence\s*:|$)")
        .expect("answer prefix regex")
});

/// Trim, lowercase and collapse runs of whitespace
pub fn normalize_answer(text: &str) -> String {
    WHITESPACE_RE
        .replace_all(text.trim(), " ")
        .to_lowercase()
}

/// Alphanumeric tokens of the normalized text
pub fn tokens(text: &str) -> Vec<String> {
    let normalized = normalize_answer(text);
    TOKEN_RE
        .find_iter(&normalized)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Tokens without stopwords
pub fn content_tokens(text: &str) -> Vec<String> {
    tokens(text)
        .into_iter()
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Keep only what follows an `Answer:` label, if there is one
pub fn extract_answer_only(text: &str) -> String {
    let trimmed = text.trim();
    match ANSWER_PREFIX_RE.captures(trimmed) {
        Some(caps) => caps[1].trim().to_string(),
        None => trimmed.to_string(),
    }
}

/// Remove `[...]` citation markers and normalize
pub fn strip_citations(text: &str) -> String {
    normalize_answer(&CITATION_RE.replace_all(text, ""))
}

/// Citation ids written inline as `[id]`
pub fn bracket_citations(text: &str) -> Vec<String> {
    CITATION_RE
        .captures_iter(text)
        .map(|caps| caps[1].trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

/// The comparable form of a prediction: answer-only, citations stripped
pub fn prediction_text(prediction: &str) -> String {
    strip_citations(&extract_answer_only(prediction))
}

/// Case-insensitive, whitespace-normalized equality
pub fn exact_match(prediction: &str, gold: &str) -> bool {
    normalize_answer(prediction) == normalize_answer(gold)
}

/// Gold contained in the prediction, or enough gold content tokens present
pub fn fuzzy_match(prediction: &str, gold: &str, threshold: f64) -> bool {
    let p = normalize_answer(prediction);
    let g = normalize_answer(gold);
    if g.is_empty() {
        return false;
    }
    if p.contains(&g) {
        return true;
    }
    let pt: BTreeSet<String> = content_tokens(prediction).into_iter().collect();
    let gt: BTreeSet<String> = content_tokens(gold).into_iter().collect();
    if gt.is_empty() {
        return false;
    }
    let overlap = pt.intersection(&gt).count() as f64 / gt.len() as f64;
    overlap >= threshold
}

/// Lenient match for context QA where predictions carry extra words:
/// abstention phrase, numeric answers and short (1-3 token) answers.
pub fn context_lenient_match(prediction: &str, gold: &str) -> bool {
    let pred = prediction_text(prediction);
    let gold = normalize_answer(gold);
    if gold.is_empty() {
        return false;
    }

    let abstain = |s: &str| s == "not in context" || s == "not in context.";
    if abstain(gold.as_str()) {
        return abstain(pred.as_str());
    }

    if NUMERIC_RE.is_match(&gold) {
        return FIRST_NUMBER_RE
            .find(&pred)
            .is_some_and(|m| m.as_str() == gold);
    }

    let gold_tokens: Vec<&str> = gold.split(' ').collect();
    if gold_tokens.len() <= 3 {
        let lead: Vec<&str> = pred.split(' ').take(gold_tokens.len()).collect();
        return lead == gold_tokens;
    }

    pred == gold
}

/// Jaccard similarity of two token sets; two empty sets are identical
pub fn jaccard(a: &[String], b: &[String]) -> f64 {
    let sa: BTreeSet<&str> = a.iter().map(String::as_str).collect();
    let sb: BTreeSet<&str> = b.iter().map(String::as_str).collect();
    if sa.is_empty() && sb.is_empty() {
        return 1.0;
    }
    let union = sa.union(&sb).count();
    sa.intersection(&sb).count() as f64 / union as f64
}

/// Mean pairwise Jaccard over content tokens; 1.0 for fewer than two texts.
/// A pair made only of stopwords is compared on its full tokens.
pub fn mean_pairwise_jaccard(texts: &[String]) -> f64 {
    if texts.len() < 2 {
        return 1.0;
    }
    let token_sets: Vec<Vec<String>> = texts.iter().map(|t| content_tokens(t)).collect();
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..token_sets.len() {
        for j in (i + 1)..token_sets.len() {
            total += if token_sets[i].is_empty() && token_sets[j].is_empty() {
                jaccard(&tokens(&texts[i]), &tokens(&texts[j]))
            } else {
                jaccard(&token_sets[i], &token_sets[j])
            };
            pairs += 1;
        }
    }
    total / pairs as f64
}

/// Share of runs agreeing with the most common answer
pub fn majority_share(answers: &[String]) -> Option<f64> {
    if answers.is_empty() {
        return None;
    }
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for answer in answers {
        *counts.entry(answer.as_str()).or_insert(0) += 1;
    }
    let top = counts.values().copied().max().unwrap_or(0);
    Some(top as f64 / answers.len() as f64)
}

/// Share of the prediction's content tokens that appear in the context
pub fn faithfulness_proxy(prediction: &str, context: &str) -> f64 {
    let pt = content_tokens(prediction);
    if pt.is_empty() {
        return 0.0;
    }
    let ct: BTreeSet<String> = tokens(context).into_iter().collect();
    let supported = pt.iter().filter(|t| ct.contains(*t)).count();
    supported as f64 / pt.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_strip_citations_brackets() {
        assert_eq!(strip_citations("1982 [ctx:doc1]"), "1982");
        assert_eq!(strip_citations("MRR [1]"), "mrr");
        assert_eq!(bracket_citations("see [doc1] and [ doc2 ]"), strings(&["doc1", "doc2"]));
    }

    #[test]
    fn test_extract_answer_only() {
        assert_eq!(extract_answer_only("Answer: Paris\nCitations: [doc1]"), "Paris");
        assert_eq!(extract_answer_only("answer: 42 Confidence: 0.9"), "42");
        assert_eq!(extract_answer_only("  just text "), "just text");
    }

    #[test]
    fn test_exact_match_normalizes_case_and_whitespace() {
        assert!(exact_match("  New   York ", "new york"));
        assert!(!exact_match("New York City", "new york"));
    }

    #[test]
    fn test_fuzzy_match() {
        assert!(fuzzy_match("the capital is paris", "Paris", 0.8));
        assert!(fuzzy_match("mean reciprocal rank metric", "reciprocal rank mean", 0.8));
        assert!(!fuzzy_match("london", "paris", 0.8));
        assert!(!fuzzy_match("anything", "", 0.8));
    }

    #[test]
    fn test_context_lenient_match_not_in_context() {
        assert!(context_lenient_match("Not in context.", "Not in context."));
        assert!(context_lenient_match("Not in context.", "Not in context"));
        assert!(!context_lenient_match("1982", "Not in context."));
    }

    #[test]
    fn test_context_lenient_match_numeric() {
        assert!(context_lenient_match("It was founded in 1982.", "1982"));
        assert!(context_lenient_match("1982", "1982"));
        assert!(!context_lenient_match("1983", "1982"));
    }

    #[test]
    fn test_context_lenient_match_short_token() {
        assert!(context_lenient_match("MRR", "MRR"));
        assert!(context_lenient_match("MRR (Mean Reciprocal Rank)", "MRR"));
        assert!(!context_lenient_match("Recall@k", "MRR"));
    }

    #[test]
    fn test_pairwise_jaccard_bounds() {
        assert_eq!(mean_pairwise_jaccard(&strings(&["red apple", "red apple"])), 1.0);
        assert_eq!(mean_pairwise_jaccard(&strings(&["red apple", "blue sky"])), 0.0);
        assert_eq!(mean_pairwise_jaccard(&strings(&["only one"])), 1.0);
        let partial = mean_pairwise_jaccard(&strings(&["red apple", "red car"]));
        assert!((partial - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_pairwise_jaccard_stopword_only_texts() {
        assert_eq!(mean_pairwise_jaccard(&strings(&["it is", "that was"])), 0.0);
        assert_eq!(mean_pairwise_jaccard(&strings(&["it is", "It  is"])), 1.0);
        assert_eq!(mean_pairwise_jaccard(&strings(&["", ""])), 1.0);
    }

    #[test]
    fn test_majority_share() {
        assert_eq!(majority_share(&strings(&["refuse", "refuse", "comply", "refuse"])), Some(0.75));
        assert_eq!(majority_share(&[]), None);
    }

    #[test]
    fn test_faithfulness_proxy() {
        let context = "The lab was founded in 1982 by two researchers.";
        assert_eq!(faithfulness_proxy("founded 1982", context), 1.0);
        assert_eq!(faithfulness_proxy("founded in 1990", context), 0.5);
        assert_eq!(faithfulness_proxy("", context), 0.0);
    }
}
