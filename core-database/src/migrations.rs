// =====================================================================================
// File: core-database/src/migrations.rs
// Description: Embedded schema migrations for the compliance tables
// =====================================================================================

use sqlx::{Pool, Postgres};
use tracing::info;

use crate::DatabaseError;

/// Ordered schema statements. The trigger at the end enforces at the
/// database level that a transaction can only become COMPLETED when its
/// compliance analysis row already exists.
const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id                       UUID PRIMARY KEY,
        transaction_ref          TEXT NOT NULL UNIQUE,
        amount                   DOUBLE PRECISION NOT NULL CHECK (amount >= 0),
        currency                 TEXT NOT NULL,
        booking_datetime         TIMESTAMPTZ NOT NULL,
        value_date               DATE NOT NULL,
        originator_name          TEXT NOT NULL,
        originator_account       TEXT NOT NULL,
        originator_country       TEXT NOT NULL,
        beneficiary_name         TEXT NOT NULL,
        beneficiary_account      TEXT NOT NULL,
        beneficiary_country      TEXT NOT NULL,
        customer_id              TEXT NOT NULL,
        customer_risk_rating     TEXT NOT NULL,
        channel                  TEXT,
        product                  TEXT,
        swift_message_type       TEXT,
        swift_purpose_code       TEXT,
        swift_charges            TEXT,
        travel_rule_complete     BOOLEAN NOT NULL DEFAULT FALSE,
        is_fx                    BOOLEAN NOT NULL DEFAULT FALSE,
        pep_indicator            BOOLEAN NOT NULL DEFAULT FALSE,
        sanctions_hit            BOOLEAN NOT NULL DEFAULT FALSE,
        status                   TEXT NOT NULL,
        created_at               TIMESTAMPTZ NOT NULL,
        processing_started_at    TIMESTAMPTZ,
        processing_completed_at  TIMESTAMPTZ,
        raw_payload              JSONB NOT NULL DEFAULT '{}'::jsonb
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_transactions_status ON transactions (status)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_customer ON transactions (customer_id, booking_datetime)",
    r#"
    CREATE TABLE IF NOT EXISTS compliance_analyses (
        id                        UUID PRIMARY KEY,
        transaction_id            UUID NOT NULL UNIQUE REFERENCES transactions (id),
        transaction_ref           TEXT NOT NULL,
        compliance_score          DOUBLE PRECISION NOT NULL CHECK (compliance_score BETWEEN 0 AND 100),
        risk_band                 TEXT NOT NULL,
        risk_breakdown            JSONB NOT NULL,
        applicable_rules          JSONB NOT NULL,
        evidence_map              JSONB NOT NULL,
        control_results           JSONB NOT NULL,
        pattern_scores            JSONB NOT NULL,
        bayesian_summary          DOUBLE PRECISION NOT NULL,
        remediation_actions       JSONB NOT NULL,
        analyst_summary           TEXT NOT NULL,
        processing_time_seconds   DOUBLE PRECISION NOT NULL,
        created_at                TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS alerts (
        alert_id               TEXT PRIMARY KEY,
        transaction_id         UUID NOT NULL REFERENCES transactions (id),
        role                   TEXT NOT NULL,
        alert_type             TEXT NOT NULL,
        severity               TEXT NOT NULL,
        title                  TEXT NOT NULL,
        description            TEXT NOT NULL,
        context                JSONB NOT NULL,
        evidence               JSONB NOT NULL,
        remediation_workflow   JSONB NOT NULL,
        sla_deadline           TIMESTAMPTZ NOT NULL,
        status                 TEXT NOT NULL,
        created_at             TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_alerts_transaction ON alerts (transaction_id)",
    r#"
    CREATE TABLE IF NOT EXISTS cases (
        id              UUID PRIMARY KEY,
        case_ref        TEXT NOT NULL UNIQUE,
        transaction_id  UUID NOT NULL REFERENCES transactions (id),
        risk_score      DOUBLE PRECISION NOT NULL,
        evidence_refs   JSONB NOT NULL,
        status          TEXT NOT NULL,
        created_at      TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS case_alerts (
        case_id   UUID NOT NULL REFERENCES cases (id),
        alert_id  TEXT NOT NULL REFERENCES alerts (alert_id),
        PRIMARY KEY (case_id, alert_id)
    )
    "#,
    r#"
    CREATE OR REPLACE FUNCTION enforce_completed_has_analysis() RETURNS trigger AS $$
    BEGIN
        IF NEW.status = 'COMPLETED' THEN
            IF NOT EXISTS (
                SELECT 1 FROM compliance_analyses WHERE transaction_id = NEW.id
            ) THEN
                RAISE EXCEPTION 'transaction % cannot be COMPLETED without a compliance analysis', NEW.id;
            END IF;
        END IF;
        RETURN NEW;
    END;
    $$ LANGUAGE plpgsql
    "#,
    r#"
    DROP TRIGGER IF EXISTS trg_completed_has_analysis ON transactions
    "#,
    r#"
    CREATE TRIGGER trg_completed_has_analysis
        BEFORE UPDATE OF status ON transactions
        FOR EACH ROW EXECUTE FUNCTION enforce_completed_has_analysis()
    "#,
];

/// Apply the embedded schema. Every statement is idempotent, so this is safe
/// to run at each startup.
pub async fn run_migrations(pool: &Pool<Postgres>) -> Result<(), DatabaseError> {
    info!("Applying database migrations ({} statements)", MIGRATIONS.len());
    for statement in MIGRATIONS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| DatabaseError::Migration(format!("{}: {}", e, statement.trim())))?;
    }
    info!("Database migrations applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_cover_all_entities() {
        let joined = MIGRATIONS.join("\n");
        for table in ["transactions", "compliance_analyses", "alerts", "cases", "case_alerts"] {
            assert!(joined.contains(table), "missing table {}", table);
        }
        // The 1:1 invariant is enforced in the schema itself
        assert!(joined.contains("UNIQUE REFERENCES transactions"));
        assert!(joined.contains("enforce_completed_has_analysis"));
    }
}
