// =====================================================================================
// File: compliance-service/src/monitoring.rs
// Description: Persistence monitoring endpoints
// =====================================================================================

use actix_web::{get, web, HttpResponse, Responder};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use core_monitoring::IntegrityStatus;
use core_queue::JobQueue;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct IntegrityQuery {
    pub lookback_hours: Option<i64>,
}

/// GET /monitoring/persistence/integrity?lookback_hours=N
#[get("/monitoring/persistence/integrity")]
pub async fn persistence_integrity(
    state: web::Data<AppState>,
    query: web::Query<IntegrityQuery>,
) -> impl Responder {
    let lookback = query.lookback_hours.unwrap_or(24).clamp(1, 24 * 30);
    match state.monitor.scan_window(lookback).await {
        Ok(report) => HttpResponse::Ok().json(json!({
            "status": report.status,
            "lookback_hours": report.lookback_hours,
            "total_completed": report.total_completed,
            "violations": report.violations,
            "violation_details": report.violation_details,
        })),
        Err(e) => {
            error!(error = %e, "Integrity scan failed");
            HttpResponse::InternalServerError().json(json!({ "error": "scan unavailable" }))
        }
    }
}

/// GET /monitoring/persistence/health
#[get("/monitoring/persistence/health")]
pub async fn persistence_health(state: web::Data<AppState>) -> impl Responder {
    let report = match state.monitor.scan().await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Health scan failed");
            return HttpResponse::InternalServerError()
                .json(json!({ "error": "health unavailable" }));
        }
    };

    let queue_stats = state.queue.stats(&state.queue_name).await.ok();

    let total_terminal = report.total_completed + report.total_failed;
    let completion_rate = if total_terminal > 0 {
        report.total_completed as f64 / total_terminal as f64
    } else {
        1.0
    };

    let healthy = report.status == IntegrityStatus::Healthy;
    HttpResponse::Ok().json(json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "integrity": {
            "violations": report.violations,
            "total_completed": report.total_completed,
            "total_failed": report.total_failed,
            "lookback_hours": report.lookback_hours,
        },
        "processing": {
            "completion_rate": completion_rate,
        },
        "queue": queue_stats,
    }))
}

/// GET /monitoring/persistence/verify/{transaction_id}
#[get("/monitoring/persistence/verify/{transaction_id}")]
pub async fn verify_transaction(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let transaction_ref = path.into_inner();
    match state.monitor.verify_transaction(&transaction_ref).await {
        Ok(Some(verification)) => HttpResponse::Ok().json(verification),
        Ok(None) => {
            HttpResponse::NotFound().json(json!({ "error": "transaction not found" }))
        }
        Err(e) => {
            error!(error = %e, "Verification failed");
            HttpResponse::InternalServerError()
                .json(json!({ "error": "verification unavailable" }))
        }
    }
}
