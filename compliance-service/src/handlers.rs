// =====================================================================================
// File: compliance-service/src/handlers.rs
// Description: Submission and query endpoints for the compliance service
// =====================================================================================

use actix_web::{get, post, web, HttpResponse, Responder};
use chrono::Utc;
use serde_json::json;
use std::str::FromStr;
use tracing::{error, info};
use validator::Validate;

use core_compliance::TransactionStatus;
use core_database::{EvaluationStore, TransactionListFilter};
use core_pipeline::{EvaluationJobPayload, EVALUATE_TRANSACTION_JOB};
use core_queue::{Job, JobQueue};
use core_rulestore::RuleStore;

use crate::models::{
    ComplianceAnalysisResponse, ListTransactionsQuery, SubmitRuleRequest,
    SubmitTransactionRequest, SubmitTransactionResponse, TransactionStatusResponse,
    TransactionSummary,
};
use crate::AppState;

/// Generic 500 that never leaks upstream error detail
fn storage_error(context: &str, err: impl std::fmt::Display) -> HttpResponse {
    error!(context, error = %err, "Storage operation failed");
    HttpResponse::InternalServerError().json(json!({ "error": "storage unavailable" }))
}

/// POST /transactions - accept a transaction and enqueue its evaluation
#[post("/transactions")]
pub async fn submit_transaction(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> impl Responder {
    let raw_payload = body.into_inner();
    let request: SubmitTransactionRequest = match serde_json::from_value(raw_payload.clone()) {
        Ok(request) => request,
        Err(e) => {
            return HttpResponse::BadRequest()
                .json(json!({ "error": format!("malformed transaction: {}", e) }))
        }
    };
    if let Err(e) = request.validate() {
        return HttpResponse::BadRequest().json(json!({ "error": e.to_string() }));
    }

    let transaction = request.into_transaction(raw_payload, Utc::now());
    let transaction_ref = transaction.transaction_ref.clone();

    if let Err(e) = state.store.insert_pending(&transaction).await {
        return storage_error("submit", e);
    }

    let job = Job::new(
        EVALUATE_TRANSACTION_JOB,
        json!(EvaluationJobPayload {
            transaction_ref: transaction_ref.clone(),
        }),
    );
    let task_id = match state.queue.enqueue(&state.queue_name, job).await {
        Ok(task_id) => task_id,
        Err(e) => return storage_error("enqueue", e),
    };

    info!(transaction_ref = %transaction_ref, task_id = %task_id, "Transaction queued");
    HttpResponse::Accepted().json(SubmitTransactionResponse {
        transaction_id: transaction_ref,
        task_id,
        status: "queued".to_string(),
    })
}

/// GET /transactions/{id}/status
#[get("/transactions/{transaction_id}/status")]
pub async fn get_transaction_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let transaction_ref = path.into_inner();

    let transaction = match state.store.find_transaction_by_ref(&transaction_ref).await {
        Ok(Some(tx)) => tx,
        Ok(None) => {
            return HttpResponse::NotFound().json(json!({ "error": "transaction not found" }))
        }
        Err(e) => return storage_error("status", e),
    };

    let analysis = match state.store.find_analysis(transaction.id).await {
        Ok(analysis) => analysis,
        Err(e) => return storage_error("status", e),
    };

    HttpResponse::Ok().json(TransactionStatusResponse {
        transaction_id: transaction.transaction_ref,
        task_status: transaction.status.as_str().to_string(),
        risk_score: analysis.as_ref().map(|a| a.compliance_score),
        risk_band: analysis.map(|a| a.risk_band.as_str().to_string()),
        message: match transaction.status {
            TransactionStatus::Failed => Some("evaluation failed".to_string()),
            _ => None,
        },
    })
}

/// GET /transactions/{id}/compliance
#[get("/transactions/{transaction_id}/compliance")]
pub async fn get_transaction_compliance(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let transaction_ref = path.into_inner();

    let transaction = match state.store.find_transaction_by_ref(&transaction_ref).await {
        Ok(Some(tx)) => tx,
        Ok(None) => {
            return HttpResponse::NotFound().json(json!({ "error": "transaction not found" }))
        }
        Err(e) => return storage_error("compliance", e),
    };

    match state.store.find_analysis(transaction.id).await {
        Ok(Some(analysis)) => {
            HttpResponse::Ok().json(ComplianceAnalysisResponse::from(analysis))
        }
        Ok(None) => HttpResponse::NotFound()
            .json(json!({ "error": "compliance analysis not available" })),
        Err(e) => storage_error("compliance", e),
    }
}

/// GET /transactions?status_filter=...&skip=...&limit=...
#[get("/transactions")]
pub async fn list_transactions(
    state: web::Data<AppState>,
    query: web::Query<ListTransactionsQuery>,
) -> impl Responder {
    let status = match &query.status_filter {
        Some(text) => match TransactionStatus::from_str(text) {
            Ok(status) => Some(status),
            Err(_) => {
                return HttpResponse::BadRequest()
                    .json(json!({ "error": format!("unknown status filter '{}'", text) }))
            }
        },
        None => None,
    };

    let filter = TransactionListFilter {
        status,
        customer_id: query.customer_id.clone(),
        skip: query.skip.max(0),
        limit: query.limit.clamp(1, 100),
    };

    match state.store.list_transactions(&filter).await {
        Ok(transactions) => {
            let rows: Vec<TransactionSummary> =
                transactions.into_iter().map(TransactionSummary::from).collect();
            HttpResponse::Ok().json(json!({
                "transactions": rows,
                "skip": filter.skip,
                "limit": filter.limit,
            }))
        }
        Err(e) => storage_error("list", e),
    }
}

/// POST /internal_rules - ingestion path for the internal corpus
#[post("/internal_rules")]
pub async fn upsert_internal_rule(
    state: web::Data<AppState>,
    body: web::Json<SubmitRuleRequest>,
) -> impl Responder {
    let request = body.into_inner();
    if let Err(e) = request.validate() {
        return HttpResponse::BadRequest().json(json!({ "error": e.to_string() }));
    }

    let rule_id = request.rule_id.clone();
    let version = request.version;
    match state.rule_store.upsert_internal(request.into()).await {
        Ok(()) => {
            info!(rule_id = %rule_id, version, "Internal rule upserted");
            HttpResponse::Ok().json(json!({
                "rule_id": rule_id,
                "version": version,
                "status": "upserted",
            }))
        }
        Err(e) => {
            error!(rule_id = %rule_id, error = %e, "Rule upsert failed");
            HttpResponse::UnprocessableEntity()
                .json(json!({ "error": "rule rejected" }))
        }
    }
}
