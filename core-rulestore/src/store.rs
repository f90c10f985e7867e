// =====================================================================================
// File: core-rulestore/src/store.rs
// Description: In-memory rule corpus with hybrid retrieval
// =====================================================================================

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use core_compliance::{RetrievedRule, Rule, RuleSource};

use crate::search::{
    keyword_score, normalize_scores, rank_rules, reciprocal_rank_fusion, semantic_score, RRF_K,
};
use crate::{RuleStore, RuleStoreError, RuleStoreResult, SearchFilters};

/// Per-query candidates pulled from each retriever before fusion
const PER_QUERY_TOP_K: usize = 10;

/// In-memory rule corpus holding both the internal and external collections.
/// Search is hybrid: semantic and keyword rankings per query, merged with
/// reciprocal-rank fusion and filtered on metadata. Only one active version
/// per rule id is retrievable at a time.
pub struct InMemoryRuleStore {
    rules: RwLock<HashMap<String, Vec<Rule>>>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
        }
    }

    /// Seed the corpus; used at startup and by tests
    pub async fn seed(&self, rules: Vec<Rule>) -> RuleStoreResult<()> {
        for rule in rules {
            self.upsert(rule).await?;
        }
        Ok(())
    }

    async fn upsert(&self, rule: Rule) -> RuleStoreResult<()> {
        if rule.rule_id.trim().is_empty() {
            return Err(RuleStoreError::validation("rule_id", "must not be empty"));
        }
        if rule.body.trim().is_empty() {
            return Err(RuleStoreError::validation("body", "must not be empty"));
        }

        let mut rules = self.rules.write().await;
        let versions = rules.entry(rule.rule_id.clone()).or_default();

        // Idempotent by (rule_id, version): replace the matching version
        if let Some(existing) = versions.iter_mut().find(|r| r.version == rule.version) {
            *existing = rule;
            return Ok(());
        }

        // Only one active version per rule id at a time
        if rule.is_active {
            for prior in versions.iter_mut() {
                prior.is_active = false;
            }
        }
        info!(rule_id = %rule.rule_id, version = rule.version, "Rule version stored");
        versions.push(rule);
        Ok(())
    }

    async fn search(
        &self,
        source: RuleSource,
        queries: &[String],
        top_k: usize,
        filters: &SearchFilters,
    ) -> RuleStoreResult<Vec<RetrievedRule>> {
        let rules = self.rules.read().await;

        // Candidate set: filter first so rankings only see eligible rules
        let candidates: Vec<&Rule> = rules
            .values()
            .flatten()
            .filter(|r| r.source == source)
            .filter(|r| filters.matches(r))
            .collect();

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        // One semantic and one keyword ranking per query
        let mut rankings: Vec<Vec<String>> = Vec::with_capacity(queries.len() * 2);
        let mut first_query_for: HashMap<String, String> = HashMap::new();
        for query in queries {
            for ranking in [
                rank_rules(query, candidates.iter().copied(), semantic_score, PER_QUERY_TOP_K),
                rank_rules(query, candidates.iter().copied(), keyword_score, PER_QUERY_TOP_K),
            ] {
                for rule_id in &ranking {
                    first_query_for
                        .entry(rule_id.clone())
                        .or_insert_with(|| query.clone());
                }
                rankings.push(ranking);
            }
        }

        let mut fused = reciprocal_rank_fusion(&rankings, RRF_K);
        normalize_scores(&mut fused);

        // Dedup is inherent: fusion keys on rule id. Order by fused score
        // descending with a stable id tie-break, then truncate.
        let mut scored: Vec<(String, f64)> = fused.into_iter().collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(top_k);

        let by_id: HashMap<&str, &Rule> = candidates
            .iter()
            .map(|r| (r.rule_id.as_str(), *r))
            .collect();

        let retrieved: Vec<RetrievedRule> = scored
            .into_iter()
            .filter_map(|(rule_id, score)| {
                by_id.get(rule_id.as_str()).map(|rule| RetrievedRule {
                    rule: (*rule).clone(),
                    score,
                    query: first_query_for
                        .get(&rule_id)
                        .cloned()
                        .unwrap_or_default(),
                })
            })
            .collect();

        debug!(
            source = ?source,
            queries = queries.len(),
            candidates = candidates.len(),
            retrieved = retrieved.len(),
            "Hybrid rule search completed"
        );

        Ok(retrieved)
    }
}

impl Default for InMemoryRuleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn search_internal(
        &self,
        queries: &[String],
        top_k: usize,
        filters: &SearchFilters,
    ) -> RuleStoreResult<Vec<RetrievedRule>> {
        self.search(RuleSource::Internal, queries, top_k, filters)
            .await
    }

    async fn search_external(
        &self,
        queries: &[String],
        top_k: usize,
        filters: &SearchFilters,
    ) -> RuleStoreResult<Vec<RetrievedRule>> {
        self.search(RuleSource::External, queries, top_k, filters)
            .await
    }

    async fn get_rule(&self, rule_id: &str, version: u32) -> RuleStoreResult<Rule> {
        let rules = self.rules.read().await;
        rules
            .get(rule_id)
            .and_then(|versions| versions.iter().find(|r| r.version == version))
            .cloned()
            .ok_or_else(|| RuleStoreError::not_found(rule_id, version))
    }

    async fn upsert_internal(&self, mut rule: Rule) -> RuleStoreResult<()> {
        rule.source = RuleSource::Internal;
        self.upsert(rule).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use core_compliance::Severity;

    fn rule(id: &str, source: RuleSource, title: &str, body: &str) -> Rule {
        Rule {
            rule_id: id.to_string(),
            version: 1,
            source,
            regulator: "MAS".to_string(),
            jurisdictions: vec!["SG".to_string()],
            title: title.to_string(),
            body: body.to_string(),
            applicability_conditions: Vec::new(),
            applicability_text: String::new(),
            expected_evidence: Vec::new(),
            severity: Severity::High,
            effective_date: Utc::now() - chrono::Duration::days(30),
            sunset_date: None,
            is_active: true,
        }
    }

    async fn seeded_store() -> InMemoryRuleStore {
        let store = InMemoryRuleStore::new();
        store
            .seed(vec![
                rule(
                    "R-TRAVEL",
                    RuleSource::Internal,
                    "Travel rule data completeness",
                    "Cross-border wire transfers must carry complete originator and beneficiary information",
                ),
                rule(
                    "R-THRESH",
                    RuleSource::Internal,
                    "Large transaction reporting",
                    "Transactions above the reporting threshold require a currency transaction report",
                ),
                rule(
                    "R-EXT-PEP",
                    RuleSource::External,
                    "Politically exposed person screening",
                    "Enhanced due diligence applies to politically exposed persons and their close associates",
                ),
            ])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_search_returns_relevant_rules_with_scores() {
        let store = seeded_store().await;
        let filters = SearchFilters::new().with_jurisdictions(vec!["SG".to_string()]);
        let results = store
            .search_internal(
                &["cross-border wire transfer originator information".to_string()],
                30,
                &filters,
            )
            .await
            .unwrap();

        assert!(!results.is_empty());
        assert_eq!(results[0].rule.rule_id, "R-TRAVEL");
        assert!(results[0].score > 0.0 && results[0].score <= 1.0);
        // Scores are descending
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_search_respects_source_split() {
        let store = seeded_store().await;
        let filters = SearchFilters::new();
        let internal = store
            .search_internal(&["politically exposed person screening".to_string()], 30, &filters)
            .await
            .unwrap();
        assert!(internal.iter().all(|r| r.rule.rule_id != "R-EXT-PEP"));

        let external = store
            .search_external(&["politically exposed person screening".to_string()], 30, &filters)
            .await
            .unwrap();
        assert_eq!(external.len(), 1);
        assert_eq!(external[0].rule.rule_id, "R-EXT-PEP");
    }

    #[tokio::test]
    async fn test_search_filters_out_future_rules() {
        let store = seeded_store().await;
        let mut future = rule(
            "R-FUTURE",
            RuleSource::Internal,
            "Upcoming wire transfer rule",
            "Future cross-border wire transfer obligations",
        );
        future.effective_date = Utc::now() + chrono::Duration::days(30);
        store.seed(vec![future]).await.unwrap();

        let filters = SearchFilters::new().with_effective_at(Utc::now());
        let results = store
            .search_internal(&["wire transfer".to_string()], 30, &filters)
            .await
            .unwrap();
        assert!(results.iter().all(|r| r.rule.rule_id != "R-FUTURE"));
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_by_id_and_version() {
        let store = InMemoryRuleStore::new();
        let r = rule("R-1", RuleSource::Internal, "title", "body text here");
        store.upsert_internal(r.clone()).await.unwrap();
        store.upsert_internal(r.clone()).await.unwrap();

        let fetched = store.get_rule("R-1", 1).await.unwrap();
        assert_eq!(fetched.rule_id, "R-1");

        let rules = store.rules.read().await;
        assert_eq!(rules.get("R-1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_new_active_version_deactivates_prior() {
        let store = InMemoryRuleStore::new();
        let v1 = rule("R-1", RuleSource::Internal, "wire transfers", "wire transfer body");
        store.upsert_internal(v1).await.unwrap();

        let mut v2 = rule("R-1", RuleSource::Internal, "wire transfers", "wire transfer body v2");
        v2.version = 2;
        store.upsert_internal(v2).await.unwrap();

        let old = store.get_rule("R-1", 1).await.unwrap();
        assert!(!old.is_active);
        let new = store.get_rule("R-1", 2).await.unwrap();
        assert!(new.is_active);

        // Search only surfaces the active version
        let results = store
            .search_internal(&["wire transfer".to_string()], 30, &SearchFilters::new())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].rule.version, 2);
    }

    #[tokio::test]
    async fn test_get_rule_not_found() {
        let store = InMemoryRuleStore::new();
        let err = store.get_rule("R-MISSING", 1).await.unwrap_err();
        assert!(matches!(err, RuleStoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_upsert_rejects_blank_rule() {
        let store = InMemoryRuleStore::new();
        let blank = rule("", RuleSource::Internal, "t", "b");
        assert!(store.upsert_internal(blank).await.is_err());
    }

    #[tokio::test]
    async fn test_truncation_to_top_k() {
        let store = InMemoryRuleStore::new();
        let rules: Vec<Rule> = (0..40)
            .map(|i| {
                rule(
                    &format!("R-{:02}", i),
                    RuleSource::Internal,
                    "wire transfer reporting",
                    "wire transfer reporting obligations for institutions",
                )
            })
            .collect();
        store.seed(rules).await.unwrap();

        let results = store
            .search_internal(&["wire transfer reporting".to_string()], 30, &SearchFilters::new())
            .await
            .unwrap();
        // Fusion only ranks what the per-query retrievers surface; the cap
        // still bounds the output
        assert!(results.len() <= 30);
    }
}
