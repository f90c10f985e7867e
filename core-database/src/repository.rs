// =====================================================================================
// File: core-database/src/repository.rs
// Description: Repository types over the four persisted compliance entities
// =====================================================================================

use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Pool, Postgres, QueryBuilder, Row};
use std::str::FromStr;
use tracing::{debug, info, warn};
use uuid::Uuid;

use core_compliance::{
    Alert, ComplianceAnalysis, ComplianceCase, CustomerRiskRating, Transaction, TransactionStatus,
};

use crate::{DatabaseError, DatabaseResult};

/// Outcome of the pre-persist status claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginOutcome {
    /// The worker owns the evaluation; status is PROCESSING
    Started,
    /// A prior evaluation already completed; skip re-evaluation
    AlreadyCompleted,
}

/// Outcome of the evaluation persistence protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// This run inserted the analysis
    Inserted,
    /// The analysis uniqueness key fired: a prior run already persisted
    AlreadyExists,
}

/// A COMPLETED transaction missing its analysis row
#[derive(Debug, Clone, serde::Serialize)]
pub struct IntegrityViolation {
    pub transaction_id: Uuid,
    pub transaction_ref: String,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Listing filter for the transactions surface
#[derive(Debug, Clone, Default)]
pub struct TransactionListFilter {
    pub status: Option<TransactionStatus>,
    pub customer_id: Option<String>,
    pub skip: i64,
    pub limit: i64,
}

/// Repository over the transactions table
#[derive(Clone)]
pub struct TransactionRepository {
    pool: Pool<Postgres>,
}

impl TransactionRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Insert a PENDING transaction if its business id is new. Returns
    /// whether a row was written.
    pub async fn insert_pending(&self, tx: &Transaction) -> DatabaseResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO transactions (
                id, transaction_ref, amount, currency, booking_datetime, value_date,
                originator_name, originator_account, originator_country,
                beneficiary_name, beneficiary_account, beneficiary_country,
                customer_id, customer_risk_rating, channel, product,
                swift_message_type, swift_purpose_code, swift_charges,
                travel_rule_complete, is_fx, pep_indicator, sanctions_hit,
                status, created_at, processing_started_at, processing_completed_at,
                raw_payload
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28
            )
            ON CONFLICT (transaction_ref) DO NOTHING
            "#,
        )
        .bind(tx.id)
        .bind(&tx.transaction_ref)
        .bind(tx.amount)
        .bind(&tx.currency)
        .bind(tx.booking_datetime)
        .bind(tx.value_date)
        .bind(&tx.originator_name)
        .bind(&tx.originator_account)
        .bind(&tx.originator_country)
        .bind(&tx.beneficiary_name)
        .bind(&tx.beneficiary_account)
        .bind(&tx.beneficiary_country)
        .bind(&tx.customer_id)
        .bind(tx.customer_risk_rating.as_str())
        .bind(&tx.channel)
        .bind(&tx.product)
        .bind(&tx.swift_message_type)
        .bind(&tx.swift_purpose_code)
        .bind(&tx.swift_charges)
        .bind(tx.travel_rule_complete)
        .bind(tx.is_fx)
        .bind(tx.pep_indicator)
        .bind(tx.sanctions_hit)
        .bind(tx.status.as_str())
        .bind(tx.created_at)
        .bind(tx.processing_started_at)
        .bind(tx.processing_completed_at)
        .bind(Json(&tx.raw_payload))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_id(&self, id: Uuid) -> DatabaseResult<Option<Transaction>> {
        let row = sqlx::query("SELECT * FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| transaction_from_row(&r)).transpose()
    }

    pub async fn find_by_ref(&self, transaction_ref: &str) -> DatabaseResult<Option<Transaction>> {
        let row = sqlx::query("SELECT * FROM transactions WHERE transaction_ref = $1")
            .bind(transaction_ref)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| transaction_from_row(&r)).transpose()
    }

    /// Pre-persist claim: lock the row, then move it into PROCESSING. A
    /// COMPLETED transaction is reported as such instead (idempotent
    /// re-entry); PENDING, FAILED, and stale PROCESSING all restart.
    pub async fn begin_processing(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> DatabaseResult<BeginOutcome> {
        let mut db_tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status FROM transactions WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *db_tx)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("transaction {}", id)))?;

        let status: String = row.try_get("status")?;
        if status == TransactionStatus::Completed.as_str() {
            db_tx.rollback().await?;
            return Ok(BeginOutcome::AlreadyCompleted);
        }

        sqlx::query(
            "UPDATE transactions SET status = $2, processing_started_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(TransactionStatus::Processing.as_str())
        .bind(now)
        .execute(&mut *db_tx)
        .await?;

        db_tx.commit().await?;
        debug!(transaction_id = %id, "Transaction claimed for processing");
        Ok(BeginOutcome::Started)
    }

    /// Terminal FAILED transition, committed in its own transaction. Never
    /// demotes a COMPLETED transaction.
    pub async fn mark_failed(&self, id: Uuid, now: DateTime<Utc>) -> DatabaseResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET status = $2, processing_completed_at = $3
            WHERE id = $1 AND status <> 'COMPLETED'
            "#,
        )
        .bind(id)
        .bind(TransactionStatus::Failed.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!(transaction_id = %id, "FAILED transition skipped; transaction already COMPLETED");
        }
        Ok(())
    }

    /// Integrity-monitor demotion: moves a COMPLETED transaction without an
    /// analysis back to FAILED. The only sanctioned exit from a terminal
    /// state, guarded by the absence of the analysis row.
    pub async fn demote_to_failed(&self, id: Uuid, now: DateTime<Utc>) -> DatabaseResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE transactions t
            SET status = $2, processing_completed_at = $3
            WHERE t.id = $1
              AND t.status = 'COMPLETED'
              AND NOT EXISTS (
                  SELECT 1 FROM compliance_analyses a WHERE a.transaction_id = t.id
              )
            "#,
        )
        .bind(id)
        .bind(TransactionStatus::Failed.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// The customer's prior transactions in a window ending at `before`,
    /// excluding the evaluated transaction itself. Newest first.
    pub async fn history_window(
        &self,
        customer_id: &str,
        before: DateTime<Utc>,
        window_days: i64,
        exclude: Uuid,
    ) -> DatabaseResult<Vec<Transaction>> {
        let window_start = before - Duration::days(window_days);
        let rows = sqlx::query(
            r#"
            SELECT * FROM transactions
            WHERE customer_id = $1
              AND id <> $2
              AND booking_datetime <= $3
              AND booking_datetime > $4
            ORDER BY booking_datetime DESC
            LIMIT 500
            "#,
        )
        .bind(customer_id)
        .bind(exclude)
        .bind(before)
        .bind(window_start)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    /// Paginated listing for the API surface
    pub async fn list(&self, filter: &TransactionListFilter) -> DatabaseResult<Vec<Transaction>> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM transactions WHERE TRUE");
        if let Some(status) = filter.status {
            qb.push(" AND status = ");
            qb.push_bind(status.as_str());
        }
        if let Some(customer_id) = &filter.customer_id {
            qb.push(" AND customer_id = ");
            qb.push_bind(customer_id.clone());
        }
        qb.push(" ORDER BY created_at DESC LIMIT ");
        qb.push_bind(filter.limit.clamp(1, 100));
        qb.push(" OFFSET ");
        qb.push_bind(filter.skip.max(0));

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(transaction_from_row).collect()
    }

    pub async fn count_with_status_since(
        &self,
        status: TransactionStatus,
        since: DateTime<Utc>,
    ) -> DatabaseResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM transactions WHERE status = $1 AND created_at >= $2",
        )
        .bind(status.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("n")?)
    }
}

/// Repository driving the evaluation persistence protocol and the integrity
/// queries over analyses, alerts, and cases.
#[derive(Clone)]
pub struct PersistenceRepository {
    pool: Pool<Postgres>,
}

impl PersistenceRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// The single-transaction evaluation write:
    /// re-read and lock the transaction, insert the analysis (uniqueness on
    /// transaction_id), insert alerts, insert the case for Critical-band
    /// scores, flip the transaction to COMPLETED, commit, then verify the
    /// analysis by read-back. An analysis conflict means a prior run
    /// succeeded; the status update is completed and the write reports
    /// `AlreadyExists`.
    pub async fn persist_evaluation(
        &self,
        analysis: &ComplianceAnalysis,
        alerts: &[Alert],
        case: Option<&ComplianceCase>,
        now: DateTime<Utc>,
    ) -> DatabaseResult<PersistOutcome> {
        let mut db_tx = self.pool.begin().await?;

        // 1. Re-read the transaction under lock; absence is an invariant
        //    violation, not a recoverable state.
        let row = sqlx::query("SELECT status FROM transactions WHERE id = $1 FOR UPDATE")
            .bind(analysis.transaction_id)
            .fetch_optional(&mut *db_tx)
            .await?
            .ok_or_else(|| {
                DatabaseError::NotFound(format!(
                    "transaction {} missing at persist time",
                    analysis.transaction_id
                ))
            })?;
        let status: String = row.try_get("status")?;

        // 2. Insert the analysis; the unique transaction_id key detects a
        //    prior successful run.
        let inserted = sqlx::query(
            r#"
            INSERT INTO compliance_analyses (
                id, transaction_id, transaction_ref, compliance_score, risk_band,
                risk_breakdown, applicable_rules, evidence_map, control_results,
                pattern_scores, bayesian_summary, remediation_actions,
                analyst_summary, processing_time_seconds, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (transaction_id) DO NOTHING
            "#,
        )
        .bind(analysis.id)
        .bind(analysis.transaction_id)
        .bind(&analysis.transaction_ref)
        .bind(analysis.compliance_score)
        .bind(analysis.risk_band.as_str())
        .bind(Json(&analysis.risk_breakdown))
        .bind(Json(&analysis.applicable_rules))
        .bind(Json(&analysis.evidence_map))
        .bind(Json(&analysis.control_results))
        .bind(Json(&analysis.pattern_scores))
        .bind(analysis.bayesian_summary)
        .bind(Json(&analysis.remediation_actions))
        .bind(&analysis.analyst_summary)
        .bind(analysis.processing_time_seconds)
        .bind(analysis.created_at)
        .execute(&mut *db_tx)
        .await?
        .rows_affected()
            > 0;

        if inserted {
            // 3. Alerts, keyed deterministically; redelivered runs cannot
            //    duplicate them.
            for alert in alerts {
                sqlx::query(
                    r#"
                    INSERT INTO alerts (
                        alert_id, transaction_id, role, alert_type, severity, title,
                        description, context, evidence, remediation_workflow,
                        sla_deadline, status, created_at
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                    ON CONFLICT (alert_id) DO NOTHING
                    "#,
                )
                .bind(&alert.alert_id)
                .bind(alert.transaction_id)
                .bind(alert.role.as_str())
                .bind(alert.alert_type.as_str())
                .bind(alert.severity.as_str())
                .bind(&alert.title)
                .bind(&alert.description)
                .bind(Json(&alert.context))
                .bind(Json(&alert.evidence))
                .bind(Json(&alert.remediation_workflow))
                .bind(alert.sla_deadline)
                .bind(alert.status.as_str())
                .bind(alert.created_at)
                .execute(&mut *db_tx)
                .await?;
            }

            // 4. Critical-band evaluations open a case linking the alerts
            if let Some(case) = case {
                sqlx::query(
                    r#"
                    INSERT INTO cases (
                        id, case_ref, transaction_id, risk_score, evidence_refs,
                        status, created_at
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                    ON CONFLICT (case_ref) DO NOTHING
                    "#,
                )
                .bind(case.id)
                .bind(&case.case_ref)
                .bind(case.transaction_id)
                .bind(case.risk_score)
                .bind(Json(&case.evidence_refs))
                .bind(case.status.as_str())
                .bind(case.created_at)
                .execute(&mut *db_tx)
                .await?;

                for alert_id in &case.linked_alert_ids {
                    sqlx::query(
                        "INSERT INTO case_alerts (case_id, alert_id) VALUES ($1, $2)
                         ON CONFLICT DO NOTHING",
                    )
                    .bind(case.id)
                    .bind(alert_id)
                    .execute(&mut *db_tx)
                    .await?;
                }
            }
        }

        // 5. Terminal status update; skipped when already COMPLETED by the
        //    prior run this write collided with.
        if status != TransactionStatus::Completed.as_str() {
            sqlx::query(
                "UPDATE transactions SET status = $2, processing_completed_at = $3 WHERE id = $1",
            )
            .bind(analysis.transaction_id)
            .bind(TransactionStatus::Completed.as_str())
            .bind(now)
            .execute(&mut *db_tx)
            .await?;
        }

        // 6. Commit, then verify by read-back
        db_tx.commit().await?;

        if !self.analysis_exists(analysis.transaction_id).await? {
            return Err(DatabaseError::NotFound(format!(
                "compliance analysis for transaction {} absent after commit",
                analysis.transaction_id
            )));
        }

        if inserted {
            info!(
                transaction_id = %analysis.transaction_id,
                score = analysis.compliance_score,
                "Evaluation artifacts persisted"
            );
            Ok(PersistOutcome::Inserted)
        } else {
            info!(
                transaction_id = %analysis.transaction_id,
                "Analysis already persisted by a prior run; status reconciled"
            );
            Ok(PersistOutcome::AlreadyExists)
        }
    }

    pub async fn analysis_exists(&self, transaction_id: Uuid) -> DatabaseResult<bool> {
        let row =
            sqlx::query("SELECT 1 AS one FROM compliance_analyses WHERE transaction_id = $1")
                .bind(transaction_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    pub async fn find_analysis(
        &self,
        transaction_id: Uuid,
    ) -> DatabaseResult<Option<ComplianceAnalysis>> {
        let row = sqlx::query("SELECT * FROM compliance_analyses WHERE transaction_id = $1")
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| analysis_from_row(&r)).transpose()
    }

    pub async fn alerts_for(&self, transaction_id: Uuid) -> DatabaseResult<Vec<Alert>> {
        let rows =
            sqlx::query("SELECT * FROM alerts WHERE transaction_id = $1 ORDER BY alert_id")
                .bind(transaction_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(alert_from_row).collect()
    }

    /// COMPLETED transactions with no analysis row: the invariant the
    /// integrity monitor exists to catch.
    pub async fn completed_without_analysis(
        &self,
        since: DateTime<Utc>,
    ) -> DatabaseResult<Vec<IntegrityViolation>> {
        let rows = sqlx::query(
            r#"
            SELECT t.id, t.transaction_ref, t.processing_completed_at
            FROM transactions t
            LEFT JOIN compliance_analyses a ON a.transaction_id = t.id
            WHERE t.status = 'COMPLETED'
              AND t.created_at >= $1
              AND a.id IS NULL
            ORDER BY t.processing_completed_at
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(IntegrityViolation {
                    transaction_id: row.try_get("id")?,
                    transaction_ref: row.try_get("transaction_ref")?,
                    completed_at: row.try_get("processing_completed_at")?,
                })
            })
            .collect()
    }
}

fn transaction_from_row(row: &PgRow) -> DatabaseResult<Transaction> {
    let rating_text: String = row.try_get("customer_risk_rating")?;
    let status_text: String = row.try_get("status")?;
    let raw_payload: Json<serde_json::Value> = row.try_get("raw_payload")?;

    Ok(Transaction {
        id: row.try_get("id")?,
        transaction_ref: row.try_get("transaction_ref")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        booking_datetime: row.try_get("booking_datetime")?,
        value_date: row.try_get("value_date")?,
        originator_name: row.try_get("originator_name")?,
        originator_account: row.try_get("originator_account")?,
        originator_country: row.try_get("originator_country")?,
        beneficiary_name: row.try_get("beneficiary_name")?,
        beneficiary_account: row.try_get("beneficiary_account")?,
        beneficiary_country: row.try_get("beneficiary_country")?,
        customer_id: row.try_get("customer_id")?,
        customer_risk_rating: CustomerRiskRating::from_str(&rating_text)
            .map_err(DatabaseError::Decode)?,
        channel: row.try_get("channel")?,
        product: row.try_get("product")?,
        swift_message_type: row.try_get("swift_message_type")?,
        swift_purpose_code: row.try_get("swift_purpose_code")?,
        swift_charges: row.try_get("swift_charges")?,
        travel_rule_complete: row.try_get("travel_rule_complete")?,
        is_fx: row.try_get("is_fx")?,
        pep_indicator: row.try_get("pep_indicator")?,
        sanctions_hit: row.try_get("sanctions_hit")?,
        status: TransactionStatus::from_str(&status_text).map_err(DatabaseError::Decode)?,
        created_at: row.try_get("created_at")?,
        processing_started_at: row.try_get("processing_started_at")?,
        processing_completed_at: row.try_get("processing_completed_at")?,
        raw_payload: raw_payload.0,
    })
}

fn analysis_from_row(row: &PgRow) -> DatabaseResult<ComplianceAnalysis> {
    let band_text: String = row.try_get("risk_band")?;
    let risk_breakdown: Json<core_compliance::RiskBreakdown> = row.try_get("risk_breakdown")?;
    let applicable_rules: Json<Vec<core_compliance::ScoredRuleRef>> =
        row.try_get("applicable_rules")?;
    let evidence_map: Json<std::collections::HashMap<String, core_compliance::EvidenceMap>> =
        row.try_get("evidence_map")?;
    let control_results: Json<Vec<core_compliance::ControlResult>> =
        row.try_get("control_results")?;
    let pattern_scores: Json<core_compliance::PatternScores> = row.try_get("pattern_scores")?;
    let remediation_actions: Json<Vec<core_compliance::RemediationAction>> =
        row.try_get("remediation_actions")?;

    Ok(ComplianceAnalysis {
        id: row.try_get("id")?,
        transaction_id: row.try_get("transaction_id")?,
        transaction_ref: row.try_get("transaction_ref")?,
        compliance_score: row.try_get("compliance_score")?,
        risk_band: core_compliance::RiskBand::from_str(&band_text)
            .map_err(DatabaseError::Decode)?,
        risk_breakdown: risk_breakdown.0,
        applicable_rules: applicable_rules.0,
        evidence_map: evidence_map.0,
        control_results: control_results.0,
        pattern_scores: pattern_scores.0,
        bayesian_summary: row.try_get("bayesian_summary")?,
        remediation_actions: remediation_actions.0,
        analyst_summary: row.try_get("analyst_summary")?,
        processing_time_seconds: row.try_get("processing_time_seconds")?,
        created_at: row.try_get("created_at")?,
    })
}

fn alert_from_row(row: &PgRow) -> DatabaseResult<Alert> {
    let role_text: String = row.try_get("role")?;
    let type_text: String = row.try_get("alert_type")?;
    let severity_text: String = row.try_get("severity")?;
    let status_text: String = row.try_get("status")?;
    let context: Json<serde_json::Value> = row.try_get("context")?;
    let evidence: Json<serde_json::Value> = row.try_get("evidence")?;
    let workflow: Json<Vec<String>> = row.try_get("remediation_workflow")?;

    Ok(Alert {
        alert_id: row.try_get("alert_id")?,
        transaction_id: row.try_get("transaction_id")?,
        role: core_compliance::AlertRole::from_str(&role_text).map_err(DatabaseError::Decode)?,
        alert_type: core_compliance::AlertType::from_str(&type_text)
            .map_err(DatabaseError::Decode)?,
        severity: core_compliance::Severity::from_str(&severity_text)
            .map_err(DatabaseError::Decode)?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        context: context.0,
        evidence: evidence.0,
        remediation_workflow: workflow.0,
        sla_deadline: row.try_get("sla_deadline")?,
        status: core_compliance::AlertStatus::from_str(&status_text)
            .map_err(DatabaseError::Decode)?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_filter_defaults() {
        let filter = TransactionListFilter::default();
        assert!(filter.status.is_none());
        assert!(filter.customer_id.is_none());
        assert_eq!(filter.skip, 0);
        assert_eq!(filter.limit, 0);
    }

    #[test]
    fn test_begin_outcome_semantics() {
        assert_ne!(BeginOutcome::Started, BeginOutcome::AlreadyCompleted);
        assert_ne!(PersistOutcome::Inserted, PersistOutcome::AlreadyExists);
    }
}
