// =====================================================================================
// File: core-rulestore/src/remote.rs
// Description: HTTP-backed rule store client for remote corpora
// =====================================================================================

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{instrument, warn};

use core_compliance::{RetrievedRule, Rule};

use crate::{RuleStore, RuleStoreError, RuleStoreResult, SearchFilters};

/// Client for a remote rule-search backend exposing hybrid retrieval over
/// HTTP. One instance per corpus pair; transient failures are retried once
/// before surfacing.
pub struct RemoteRuleStore {
    client: Client,
    internal_endpoint: String,
    external_endpoint: String,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    queries: &'a [String],
    top_k: usize,
    filters: &'a SearchFilters,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<RetrievedRule>,
}

impl RemoteRuleStore {
    pub fn new(
        internal_endpoint: String,
        external_endpoint: String,
        timeout_seconds: u64,
        retry_attempts: u32,
    ) -> RuleStoreResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| RuleStoreError::upstream(format!("failed to build client: {}", e)))?;

        Ok(Self {
            client,
            internal_endpoint,
            external_endpoint,
            retry_attempts: retry_attempts.max(1),
        })
    }

    #[instrument(skip(self, filters), fields(endpoint = %endpoint))]
    async fn search_endpoint(
        &self,
        endpoint: &str,
        queries: &[String],
        top_k: usize,
        filters: &SearchFilters,
    ) -> RuleStoreResult<Vec<RetrievedRule>> {
        let url = format!("{}/search", endpoint);
        let request = SearchRequest {
            queries,
            top_k,
            filters,
        };

        let mut last_err = RuleStoreError::upstream("no attempt made");
        for attempt in 1..=self.retry_attempts {
            match self.execute_search(&url, &request).await {
                Ok(results) => return Ok(results),
                Err(e) if e.is_transient() && attempt < self.retry_attempts => {
                    warn!(attempt, error = %e, "Rule search attempt failed; retrying");
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    async fn execute_search(
        &self,
        url: &str,
        request: &SearchRequest<'_>,
    ) -> RuleStoreResult<Vec<RetrievedRule>> {
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| RuleStoreError::upstream(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(RuleStoreError::upstream(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(RuleStoreError::invalid_response(format!(
                "HTTP {}",
                status
            )));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| RuleStoreError::invalid_response(e.to_string()))?;
        Ok(body.results)
    }
}

#[async_trait]
impl RuleStore for RemoteRuleStore {
    async fn search_internal(
        &self,
        queries: &[String],
        top_k: usize,
        filters: &SearchFilters,
    ) -> RuleStoreResult<Vec<RetrievedRule>> {
        self.search_endpoint(&self.internal_endpoint, queries, top_k, filters)
            .await
    }

    async fn search_external(
        &self,
        queries: &[String],
        top_k: usize,
        filters: &SearchFilters,
    ) -> RuleStoreResult<Vec<RetrievedRule>> {
        self.search_endpoint(&self.external_endpoint, queries, top_k, filters)
            .await
    }

    async fn get_rule(&self, rule_id: &str, version: u32) -> RuleStoreResult<Rule> {
        let url = format!("{}/rules/{}/{}", self.internal_endpoint, rule_id, version);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RuleStoreError::upstream(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(RuleStoreError::not_found(rule_id, version)),
            status if status.is_success() => response
                .json()
                .await
                .map_err(|e| RuleStoreError::invalid_response(e.to_string())),
            status => Err(RuleStoreError::upstream(format!("HTTP {}", status))),
        }
    }

    async fn upsert_internal(&self, rule: Rule) -> RuleStoreResult<()> {
        let url = format!("{}/rules", self.internal_endpoint);
        let response = self
            .client
            .put(&url)
            .json(&rule)
            .send()
            .await
            .map_err(|e| RuleStoreError::upstream(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(RuleStoreError::upstream(format!(
                "HTTP {}",
                response.status()
            )))
        }
    }
}
