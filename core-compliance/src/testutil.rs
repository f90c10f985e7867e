// =====================================================================================
// File: core-compliance/src/testutil.rs
// Description: Shared test fixtures for the compliance domain
// =====================================================================================

//! Deterministic fixtures used by unit tests across the workspace.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::types::{CustomerRiskRating, Transaction, TransactionStatus};

/// Fixed booking instant so window arithmetic in tests is exact
pub fn fixed_booking_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap()
}

/// A neutral cross-border transaction fixture (SG -> HK, 25 000 USD)
pub fn transaction_fixture() -> Transaction {
    Transaction {
        id: Uuid::new_v4(),
        transaction_ref: "TXN-2025-000123".to_string(),
        amount: 25_000.0,
        currency: "USD".to_string(),
        booking_datetime: fixed_booking_time(),
        value_date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
        originator_name: "Meridian Trading Pte Ltd".to_string(),
        originator_account: "ACC-ORIG".to_string(),
        originator_country: "SG".to_string(),
        beneficiary_name: "Harbour Logistics Ltd".to_string(),
        beneficiary_account: "ACC-BEN".to_string(),
        beneficiary_country: "HK".to_string(),
        customer_id: "CUST-0042".to_string(),
        customer_risk_rating: CustomerRiskRating::Medium,
        channel: Some("wire".to_string()),
        product: Some("cross-border-payment".to_string()),
        swift_message_type: Some("MT103".to_string()),
        swift_purpose_code: Some("GDDS".to_string()),
        swift_charges: Some("SHA".to_string()),
        travel_rule_complete: true,
        is_fx: false,
        pep_indicator: false,
        sanctions_hit: false,
        status: TransactionStatus::Pending,
        created_at: fixed_booking_time(),
        processing_started_at: None,
        processing_completed_at: None,
        raw_payload: json!({}),
    }
}

/// A history entry for the fixture customer at a given booking time
pub fn transaction_fixture_at(at: DateTime<Utc>, amount: f64) -> Transaction {
    let mut tx = transaction_fixture();
    tx.id = Uuid::new_v4();
    tx.transaction_ref = format!("TXN-HIST-{}", at.timestamp());
    tx.amount = amount;
    tx.booking_datetime = at;
    tx.value_date = at.date_naive();
    tx.originator_account = "ACC-ORIG".to_string();
    tx.beneficiary_account = "ACC-EXT-001".to_string();
    tx
}
