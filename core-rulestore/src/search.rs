// =====================================================================================
// File: core-rulestore/src/search.rs
// Description: Reciprocal-rank fusion and deterministic text scoring
// =====================================================================================

use std::collections::HashMap;

use core_compliance::Rule;

/// Reciprocal-rank fusion constant
pub const RRF_K: f64 = 60.0;

/// Merge ranked result lists with reciprocal-rank fusion:
/// `score(r) = sum over lists of 1 / (k + rank_r)` with 1-based ranks.
/// Returns fused scores keyed by item id.
pub fn reciprocal_rank_fusion(rankings: &[Vec<String>], k: f64) -> HashMap<String, f64> {
    let mut fused: HashMap<String, f64> = HashMap::new();
    for ranking in rankings {
        for (index, id) in ranking.iter().enumerate() {
            let rank = (index + 1) as f64;
            *fused.entry(id.clone()).or_insert(0.0) += 1.0 / (k + rank);
        }
    }
    fused
}

/// Normalize fused scores into [0, 1] by dividing by the maximum. An empty
/// map stays empty.
pub fn normalize_scores(scores: &mut HashMap<String, f64>) {
    let max = scores.values().cloned().fold(0.0_f64, f64::max);
    if max > 0.0 {
        for value in scores.values_mut() {
            *value /= max;
        }
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(|t| t.to_string())
        .collect()
}

/// Deterministic semantic relevance proxy: token-set overlap between the
/// query and the rule's title, body, and applicability text (Jaccard).
pub fn semantic_score(query: &str, rule: &Rule) -> f64 {
    let query_tokens: Vec<String> = {
        let mut t = tokenize(query);
        t.sort_unstable();
        t.dedup();
        t
    };
    if query_tokens.is_empty() {
        return 0.0;
    }

    let rule_text = format!("{} {} {}", rule.title, rule.body, rule.applicability_text);
    let rule_tokens: Vec<String> = {
        let mut t = tokenize(&rule_text);
        t.sort_unstable();
        t.dedup();
        t
    };
    if rule_tokens.is_empty() {
        return 0.0;
    }

    let overlap = query_tokens
        .iter()
        .filter(|t| rule_tokens.binary_search(t).is_ok())
        .count() as f64;
    let union = (query_tokens.len() + rule_tokens.len()) as f64 - overlap;

    overlap / union
}

/// Keyword relevance: fraction of query terms literally present in the rule
/// body or title.
pub fn keyword_score(query: &str, rule: &Rule) -> f64 {
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        return 0.0;
    }
    let haystack = format!("{} {}", rule.title, rule.body).to_lowercase();
    let hits = query_tokens
        .iter()
        .filter(|t| haystack.contains(t.as_str()))
        .count() as f64;
    hits / query_tokens.len() as f64
}

/// Rank rules for one query under a scoring function, best first, truncated
/// to `top_k`. Zero-score rules never rank. Ties break on rule id so the
/// ordering is stable across runs.
pub fn rank_rules<'a, F>(
    query: &str,
    rules: impl Iterator<Item = &'a Rule>,
    score_fn: F,
    top_k: usize,
) -> Vec<String>
where
    F: Fn(&str, &Rule) -> f64,
{
    let mut scored: Vec<(String, f64)> = rules
        .map(|r| (r.rule_id.clone(), score_fn(query, r)))
        .filter(|(_, s)| *s > 0.0)
        .collect();
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored.truncate(top_k);
    scored.into_iter().map(|(id, _)| id).collect()
}
