// =====================================================================================
// File: core-database/src/store.rs
// Description: Persistence port over the compliance entities
// =====================================================================================

//! The store trait consumed by the pipeline, the monitoring service, and the
//! HTTP surface, with the production PostgreSQL implementation and an
//! in-memory implementation carrying the same protocol semantics for tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use core_compliance::{
    Alert, ComplianceAnalysis, ComplianceCase, Transaction, TransactionStatus,
};

use crate::repository::{
    BeginOutcome, IntegrityViolation, PersistOutcome, PersistenceRepository,
    TransactionListFilter, TransactionRepository,
};
use crate::{DatabaseError, DatabaseResult};

/// The persistence operations the platform needs, behind a trait so the
/// pipeline and the API can be exercised without a live database.
#[async_trait]
pub trait EvaluationStore: Send + Sync {
    /// Insert a PENDING transaction if its business id is new
    async fn insert_pending(&self, transaction: &Transaction) -> DatabaseResult<bool>;

    async fn find_transaction(&self, id: Uuid) -> DatabaseResult<Option<Transaction>>;

    async fn find_transaction_by_ref(
        &self,
        transaction_ref: &str,
    ) -> DatabaseResult<Option<Transaction>>;

    /// Claim the transaction for processing (row lock + status flip)
    async fn begin_processing(&self, id: Uuid, now: DateTime<Utc>)
        -> DatabaseResult<BeginOutcome>;

    /// Terminal FAILED transition in its own committed transaction
    async fn mark_failed(&self, id: Uuid, now: DateTime<Utc>) -> DatabaseResult<()>;

    /// Integrity-monitor demotion of a COMPLETED transaction that has no
    /// analysis row. Returns whether a row changed.
    async fn demote_to_failed(&self, id: Uuid, now: DateTime<Utc>) -> DatabaseResult<bool>;

    /// Customer history snapshot for velocity features
    async fn history_window(
        &self,
        customer_id: &str,
        before: DateTime<Utc>,
        window_days: i64,
        exclude: Uuid,
    ) -> DatabaseResult<Vec<Transaction>>;

    /// The single-transaction evaluation write protocol
    async fn persist_evaluation(
        &self,
        analysis: &ComplianceAnalysis,
        alerts: &[Alert],
        case: Option<&ComplianceCase>,
        now: DateTime<Utc>,
    ) -> DatabaseResult<PersistOutcome>;

    /// Post-commit verification read
    async fn analysis_exists(&self, transaction_id: Uuid) -> DatabaseResult<bool>;

    async fn find_analysis(
        &self,
        transaction_id: Uuid,
    ) -> DatabaseResult<Option<ComplianceAnalysis>>;

    async fn alerts_for(&self, transaction_id: Uuid) -> DatabaseResult<Vec<Alert>>;

    /// Paginated listing for the API surface
    async fn list_transactions(
        &self,
        filter: &TransactionListFilter,
    ) -> DatabaseResult<Vec<Transaction>>;

    /// COMPLETED transactions missing their analysis (integrity scan)
    async fn completed_without_analysis(
        &self,
        since: DateTime<Utc>,
    ) -> DatabaseResult<Vec<IntegrityViolation>>;

    async fn count_with_status_since(
        &self,
        status: TransactionStatus,
        since: DateTime<Utc>,
    ) -> DatabaseResult<i64>;
}

/// Production store backed by the PostgreSQL repositories
pub struct PgEvaluationStore {
    transactions: TransactionRepository,
    persistence: PersistenceRepository,
}

impl PgEvaluationStore {
    pub fn new(transactions: TransactionRepository, persistence: PersistenceRepository) -> Self {
        Self {
            transactions,
            persistence,
        }
    }
}

#[async_trait]
impl EvaluationStore for PgEvaluationStore {
    async fn insert_pending(&self, transaction: &Transaction) -> DatabaseResult<bool> {
        self.transactions.insert_pending(transaction).await
    }

    async fn find_transaction(&self, id: Uuid) -> DatabaseResult<Option<Transaction>> {
        self.transactions.find_by_id(id).await
    }

    async fn find_transaction_by_ref(
        &self,
        transaction_ref: &str,
    ) -> DatabaseResult<Option<Transaction>> {
        self.transactions.find_by_ref(transaction_ref).await
    }

    async fn begin_processing(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> DatabaseResult<BeginOutcome> {
        self.transactions.begin_processing(id, now).await
    }

    async fn mark_failed(&self, id: Uuid, now: DateTime<Utc>) -> DatabaseResult<()> {
        self.transactions.mark_failed(id, now).await
    }

    async fn demote_to_failed(&self, id: Uuid, now: DateTime<Utc>) -> DatabaseResult<bool> {
        self.transactions.demote_to_failed(id, now).await
    }

    async fn history_window(
        &self,
        customer_id: &str,
        before: DateTime<Utc>,
        window_days: i64,
        exclude: Uuid,
    ) -> DatabaseResult<Vec<Transaction>> {
        self.transactions
            .history_window(customer_id, before, window_days, exclude)
            .await
    }

    async fn persist_evaluation(
        &self,
        analysis: &ComplianceAnalysis,
        alerts: &[Alert],
        case: Option<&ComplianceCase>,
        now: DateTime<Utc>,
    ) -> DatabaseResult<PersistOutcome> {
        self.persistence
            .persist_evaluation(analysis, alerts, case, now)
            .await
    }

    async fn analysis_exists(&self, transaction_id: Uuid) -> DatabaseResult<bool> {
        self.persistence.analysis_exists(transaction_id).await
    }

    async fn find_analysis(
        &self,
        transaction_id: Uuid,
    ) -> DatabaseResult<Option<ComplianceAnalysis>> {
        self.persistence.find_analysis(transaction_id).await
    }

    async fn alerts_for(&self, transaction_id: Uuid) -> DatabaseResult<Vec<Alert>> {
        self.persistence.alerts_for(transaction_id).await
    }

    async fn list_transactions(
        &self,
        filter: &TransactionListFilter,
    ) -> DatabaseResult<Vec<Transaction>> {
        self.transactions.list(filter).await
    }

    async fn completed_without_analysis(
        &self,
        since: DateTime<Utc>,
    ) -> DatabaseResult<Vec<IntegrityViolation>> {
        self.persistence.completed_without_analysis(since).await
    }

    async fn count_with_status_since(
        &self,
        status: TransactionStatus,
        since: DateTime<Utc>,
    ) -> DatabaseResult<i64> {
        self.transactions
            .count_with_status_since(status, since)
            .await
    }
}

#[derive(Default)]
struct MemoryState {
    transactions: HashMap<Uuid, Transaction>,
    analyses: HashMap<Uuid, ComplianceAnalysis>,
    alerts: HashMap<String, Alert>,
    cases: HashMap<Uuid, ComplianceCase>,
}

/// In-memory store with the same protocol semantics as the PostgreSQL
/// implementation, plus failure injection for crash-recovery tests.
pub struct MemoryEvaluationStore {
    state: Mutex<MemoryState>,
    /// Next persist call inserts the analysis, then reports an error before
    /// the status update: the window a crashing worker leaves behind
    crash_after_analysis_insert: AtomicBool,
    /// Next persist call fails outright before writing anything
    fail_next_persist: AtomicBool,
}

impl MemoryEvaluationStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            crash_after_analysis_insert: AtomicBool::new(false),
            fail_next_persist: AtomicBool::new(false),
        }
    }

    pub fn inject_crash_after_analysis_insert(&self) {
        self.crash_after_analysis_insert.store(true, Ordering::SeqCst);
    }

    pub fn inject_persist_failure(&self) {
        self.fail_next_persist.store(true, Ordering::SeqCst);
    }

    pub async fn transaction_status(&self, id: Uuid) -> Option<TransactionStatus> {
        self.state.lock().await.transactions.get(&id).map(|t| t.status)
    }

    pub async fn analysis_count(&self) -> usize {
        self.state.lock().await.analyses.len()
    }

    pub async fn alert_count(&self) -> usize {
        self.state.lock().await.alerts.len()
    }

    pub async fn case_count(&self) -> usize {
        self.state.lock().await.cases.len()
    }

    pub async fn analysis_for(&self, transaction_id: Uuid) -> Option<ComplianceAnalysis> {
        self.state.lock().await.analyses.get(&transaction_id).cloned()
    }

    /// Seed rows directly (bypasses lifecycle checks); used by tests
    pub async fn seed_transactions(&self, transactions: Vec<Transaction>) {
        let mut state = self.state.lock().await;
        for tx in transactions {
            state.transactions.insert(tx.id, tx);
        }
    }

    /// Force a status, bypassing the lifecycle guard; used by integrity
    /// tests to fabricate violation states
    pub async fn force_status(&self, id: Uuid, status: TransactionStatus) {
        let mut state = self.state.lock().await;
        if let Some(tx) = state.transactions.get_mut(&id) {
            tx.status = status;
            if status.is_terminal() {
                tx.processing_completed_at = Some(Utc::now());
            }
        }
    }
}

impl Default for MemoryEvaluationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EvaluationStore for MemoryEvaluationStore {
    async fn insert_pending(&self, transaction: &Transaction) -> DatabaseResult<bool> {
        let mut state = self.state.lock().await;
        let exists = state
            .transactions
            .values()
            .any(|t| t.transaction_ref == transaction.transaction_ref);
        if exists {
            return Ok(false);
        }
        state.transactions.insert(transaction.id, transaction.clone());
        Ok(true)
    }

    async fn find_transaction(&self, id: Uuid) -> DatabaseResult<Option<Transaction>> {
        Ok(self.state.lock().await.transactions.get(&id).cloned())
    }

    async fn find_transaction_by_ref(
        &self,
        transaction_ref: &str,
    ) -> DatabaseResult<Option<Transaction>> {
        Ok(self
            .state
            .lock()
            .await
            .transactions
            .values()
            .find(|t| t.transaction_ref == transaction_ref)
            .cloned())
    }

    async fn begin_processing(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> DatabaseResult<BeginOutcome> {
        let mut state = self.state.lock().await;
        let tx = state
            .transactions
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::NotFound(format!("transaction {}", id)))?;

        if tx.status == TransactionStatus::Completed {
            return Ok(BeginOutcome::AlreadyCompleted);
        }
        tx.status = TransactionStatus::Processing;
        tx.processing_started_at = Some(now);
        Ok(BeginOutcome::Started)
    }

    async fn mark_failed(&self, id: Uuid, now: DateTime<Utc>) -> DatabaseResult<()> {
        let mut state = self.state.lock().await;
        if let Some(tx) = state.transactions.get_mut(&id) {
            if tx.status != TransactionStatus::Completed {
                tx.status = TransactionStatus::Failed;
                tx.processing_completed_at = Some(now);
            }
        }
        Ok(())
    }

    async fn demote_to_failed(&self, id: Uuid, now: DateTime<Utc>) -> DatabaseResult<bool> {
        let mut state = self.state.lock().await;
        let has_analysis = state.analyses.contains_key(&id);
        if let Some(tx) = state.transactions.get_mut(&id) {
            if tx.status == TransactionStatus::Completed && !has_analysis {
                tx.status = TransactionStatus::Failed;
                tx.processing_completed_at = Some(now);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn history_window(
        &self,
        customer_id: &str,
        before: DateTime<Utc>,
        window_days: i64,
        exclude: Uuid,
    ) -> DatabaseResult<Vec<Transaction>> {
        let window_start = before - Duration::days(window_days);
        let mut history: Vec<Transaction> = self
            .state
            .lock()
            .await
            .transactions
            .values()
            .filter(|t| {
                t.customer_id == customer_id
                    && t.id != exclude
                    && t.booking_datetime <= before
                    && t.booking_datetime > window_start
            })
            .cloned()
            .collect();
        history.sort_by(|a, b| b.booking_datetime.cmp(&a.booking_datetime));
        Ok(history)
    }

    async fn persist_evaluation(
        &self,
        analysis: &ComplianceAnalysis,
        alerts: &[Alert],
        case: Option<&ComplianceCase>,
        now: DateTime<Utc>,
    ) -> DatabaseResult<PersistOutcome> {
        if self.fail_next_persist.swap(false, Ordering::SeqCst) {
            return Err(DatabaseError::Query("injected persist failure".to_string()));
        }

        let mut state = self.state.lock().await;

        if !state.transactions.contains_key(&analysis.transaction_id) {
            return Err(DatabaseError::NotFound(format!(
                "transaction {} missing at persist time",
                analysis.transaction_id
            )));
        }

        let already = state.analyses.contains_key(&analysis.transaction_id);
        if !already {
            state
                .analyses
                .insert(analysis.transaction_id, analysis.clone());

            if self.crash_after_analysis_insert.swap(false, Ordering::SeqCst) {
                // Simulated worker death between the analysis insert and the
                // status update. (The PostgreSQL implementation writes both
                // in one transaction; this window exists only for the
                // recovery protocol tests.)
                return Err(DatabaseError::Query(
                    "injected crash after analysis insert".to_string(),
                ));
            }

            for alert in alerts {
                state
                    .alerts
                    .entry(alert.alert_id.clone())
                    .or_insert_with(|| alert.clone());
            }
            if let Some(case) = case {
                state.cases.entry(case.id).or_insert_with(|| case.clone());
            }
        }

        if let Some(tx) = state.transactions.get_mut(&analysis.transaction_id) {
            if tx.status != TransactionStatus::Completed {
                tx.status = TransactionStatus::Completed;
                tx.processing_completed_at = Some(now);
            }
        }

        if already {
            Ok(PersistOutcome::AlreadyExists)
        } else {
            Ok(PersistOutcome::Inserted)
        }
    }

    async fn analysis_exists(&self, transaction_id: Uuid) -> DatabaseResult<bool> {
        Ok(self.state.lock().await.analyses.contains_key(&transaction_id))
    }

    async fn find_analysis(
        &self,
        transaction_id: Uuid,
    ) -> DatabaseResult<Option<ComplianceAnalysis>> {
        Ok(self.state.lock().await.analyses.get(&transaction_id).cloned())
    }

    async fn alerts_for(&self, transaction_id: Uuid) -> DatabaseResult<Vec<Alert>> {
        let state = self.state.lock().await;
        let mut alerts: Vec<Alert> = state
            .alerts
            .values()
            .filter(|a| a.transaction_id == transaction_id)
            .cloned()
            .collect();
        alerts.sort_by(|a, b| a.alert_id.cmp(&b.alert_id));
        Ok(alerts)
    }

    async fn list_transactions(
        &self,
        filter: &TransactionListFilter,
    ) -> DatabaseResult<Vec<Transaction>> {
        let state = self.state.lock().await;
        let mut rows: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .filter(|t| {
                filter
                    .customer_id
                    .as_ref()
                    .map_or(true, |c| &t.customer_id == c)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let skip = filter.skip.max(0) as usize;
        let limit = filter.limit.clamp(1, 100) as usize;
        Ok(rows.into_iter().skip(skip).take(limit).collect())
    }

    async fn completed_without_analysis(
        &self,
        since: DateTime<Utc>,
    ) -> DatabaseResult<Vec<IntegrityViolation>> {
        let state = self.state.lock().await;
        let mut violations: Vec<IntegrityViolation> = state
            .transactions
            .values()
            .filter(|t| {
                t.status == TransactionStatus::Completed
                    && t.created_at >= since
                    && !state.analyses.contains_key(&t.id)
            })
            .map(|t| IntegrityViolation {
                transaction_id: t.id,
                transaction_ref: t.transaction_ref.clone(),
                completed_at: t.processing_completed_at,
            })
            .collect();
        violations.sort_by(|a, b| a.transaction_ref.cmp(&b.transaction_ref));
        Ok(violations)
    }

    async fn count_with_status_since(
        &self,
        status: TransactionStatus,
        since: DateTime<Utc>,
    ) -> DatabaseResult<i64> {
        Ok(self
            .state
            .lock()
            .await
            .transactions
            .values()
            .filter(|t| t.status == status && t.created_at >= since)
            .count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_compliance::testutil::transaction_fixture;

    #[tokio::test]
    async fn test_memory_store_lifecycle() {
        let store = MemoryEvaluationStore::new();
        let tx = transaction_fixture();

        assert!(store.insert_pending(&tx).await.unwrap());
        // Same business id: no second row
        assert!(!store.insert_pending(&tx).await.unwrap());

        let outcome = store.begin_processing(tx.id, Utc::now()).await.unwrap();
        assert_eq!(outcome, BeginOutcome::Started);
        assert_eq!(
            store.transaction_status(tx.id).await,
            Some(TransactionStatus::Processing)
        );

        store.mark_failed(tx.id, Utc::now()).await.unwrap();
        assert_eq!(
            store.transaction_status(tx.id).await,
            Some(TransactionStatus::Failed)
        );

        // FAILED transactions can be re-claimed
        let outcome = store.begin_processing(tx.id, Utc::now()).await.unwrap();
        assert_eq!(outcome, BeginOutcome::Started);
    }

    #[tokio::test]
    async fn test_begin_processing_missing_transaction() {
        let store = MemoryEvaluationStore::new();
        let err = store
            .begin_processing(Uuid::new_v4(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_integrity_scan_finds_violations() {
        let store = MemoryEvaluationStore::new();
        let tx = transaction_fixture();
        store.insert_pending(&tx).await.unwrap();
        store.force_status(tx.id, TransactionStatus::Completed).await;

        let since = tx.created_at - Duration::hours(1);
        let violations = store.completed_without_analysis(since).await.unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].transaction_ref, tx.transaction_ref);
    }

    #[tokio::test]
    async fn test_list_transactions_filter_and_pagination() {
        let store = MemoryEvaluationStore::new();
        for i in 0..5 {
            let mut tx = transaction_fixture();
            tx.id = Uuid::new_v4();
            tx.transaction_ref = format!("TXN-{}", i);
            tx.created_at = tx.created_at + Duration::seconds(i);
            store.insert_pending(&tx).await.unwrap();
        }

        let filter = TransactionListFilter {
            status: Some(TransactionStatus::Pending),
            customer_id: None,
            skip: 1,
            limit: 2,
        };
        let page = store.list_transactions(&filter).await.unwrap();
        assert_eq!(page.len(), 2);
        // Newest first, one skipped
        assert_eq!(page[0].transaction_ref, "TXN-3");
        assert_eq!(page[1].transaction_ref, "TXN-2");
    }
}
