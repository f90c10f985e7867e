// =====================================================================================
// File: compliance-service/tests/api_tests.rs
// Description: HTTP surface integration tests over in-memory backends
// =====================================================================================

use actix_web::{test, web, App};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use compliance_service::{configure_app, AppState};
use core_compliance::{RuleSource, Severity, TransactionStatus};
use core_database::{EvaluationStore, MemoryEvaluationStore};
use core_llm::{GatewayConfig, LlmCompletion, LlmGateway, LlmProvider, LlmRequest, LlmResult};
use core_monitoring::{BusinessMetrics, IntegrityMonitor};
use core_pipeline::{EvaluationJobProcessor, PipelineOrchestrator};
use core_queue::{InMemoryJobQueue, JobQueue, WorkerPool, WorkerPoolConfig};
use core_rulestore::{InMemoryRuleStore, RuleStore};

const QUEUE: &str = "transaction-evaluations";

struct Harness {
    store: Arc<MemoryEvaluationStore>,
    queue: Arc<InMemoryJobQueue>,
    rules: Arc<InMemoryRuleStore>,
    state: web::Data<AppState>,
}

async fn harness() -> Harness {
    let store = Arc::new(MemoryEvaluationStore::new());
    let queue = Arc::new(InMemoryJobQueue::new());
    queue.create_queue(QUEUE).await.unwrap();
    let rules = Arc::new(InMemoryRuleStore::new());

    let monitor = Arc::new(IntegrityMonitor::new(
        store.clone(),
        Arc::new(BusinessMetrics::new()),
        core_config::MonitoringConfig {
            lookback_hours: 24,
            scan_interval_secs: 3600,
            demote_violations: false,
        },
    ));

    let state = web::Data::new(AppState {
        store: store.clone(),
        queue: queue.clone(),
        rule_store: rules.clone(),
        monitor,
        queue_name: QUEUE.to_string(),
    });

    Harness {
        store,
        queue,
        rules,
        state,
    }
}

fn submission(transaction_ref: &str) -> Value {
    json!({
        "transaction_ref": transaction_ref,
        "amount": 25000.0,
        "currency": "USD",
        "booking_datetime": "2025-06-02T12:00:00Z",
        "value_date": "2025-06-02",
        "originator_name": "Meridian Trading Pte Ltd",
        "originator_account": "ACC-ORIG",
        "originator_country": "SG",
        "beneficiary_name": "Harbour Logistics Ltd",
        "beneficiary_account": "ACC-BEN",
        "beneficiary_country": "HK",
        "customer_id": "CUST-0042",
        "customer_risk_rating": "medium",
        "swift_purpose_code": "GDDS",
        "travel_rule_complete": true
    })
}

#[actix_web::test]
async fn test_submit_accepts_and_enqueues() {
    let h = harness().await;
    let app = test::init_service(
        App::new().app_data(h.state.clone()).configure(configure_app),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/transactions")
        .set_json(submission("TXN-SUBMIT-1"))
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(resp["transaction_id"], "TXN-SUBMIT-1");
    assert_eq!(resp["status"], "queued");
    assert!(resp["task_id"].as_str().is_some());

    let stats = h.queue.stats(QUEUE).await.unwrap();
    assert_eq!(stats.total_enqueued, 1);

    let stored = h
        .store
        .find_transaction_by_ref("TXN-SUBMIT-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, TransactionStatus::Pending);
    // The submitted payload is preserved verbatim
    assert_eq!(stored.raw_payload["swift_purpose_code"], "GDDS");
}

#[actix_web::test]
async fn test_submit_rejects_invalid_payload() {
    let h = harness().await;
    let app = test::init_service(
        App::new().app_data(h.state.clone()).configure(configure_app),
    )
    .await;

    let mut bad = submission("TXN-BAD");
    bad["currency"] = json!("DOLLARS");
    let req = test::TestRequest::post()
        .uri("/transactions")
        .set_json(bad)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let stats = h.queue.stats(QUEUE).await.unwrap();
    assert_eq!(stats.total_enqueued, 0);
}

#[actix_web::test]
async fn test_status_endpoints() {
    let h = harness().await;
    let app = test::init_service(
        App::new().app_data(h.state.clone()).configure(configure_app),
    )
    .await;

    // Unknown transaction
    let req = test::TestRequest::get()
        .uri("/transactions/TXN-NOPE/status")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);

    // Submitted transaction reports PENDING without risk fields
    let req = test::TestRequest::post()
        .uri("/transactions")
        .set_json(submission("TXN-STATUS-1"))
        .to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::get()
        .uri("/transactions/TXN-STATUS-1/status")
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["task_status"], "PENDING");
    assert!(resp.get("risk_score").is_none());

    // Compliance projection is a 404 until an analysis exists
    let req = test::TestRequest::get()
        .uri("/transactions/TXN-STATUS-1/compliance")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
async fn test_listing_filters_and_caps() {
    let h = harness().await;
    let app = test::init_service(
        App::new().app_data(h.state.clone()).configure(configure_app),
    )
    .await;

    for i in 0..3 {
        let req = test::TestRequest::post()
            .uri("/transactions")
            .set_json(submission(&format!("TXN-LIST-{}", i)))
            .to_request();
        test::call_service(&app, req).await;
    }

    let req = test::TestRequest::get()
        .uri("/transactions?status_filter=PENDING&limit=500")
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["transactions"].as_array().unwrap().len(), 3);
    // Limit is capped at 100
    assert_eq!(resp["limit"], 100);

    let req = test::TestRequest::get()
        .uri("/transactions?status_filter=BOGUS")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn test_internal_rule_ingestion() {
    let h = harness().await;
    let app = test::init_service(
        App::new().app_data(h.state.clone()).configure(configure_app),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/internal_rules")
        .set_json(json!({
            "rule_id": "R-API-1",
            "version": 1,
            "regulator": "MAS",
            "jurisdictions": ["SG"],
            "title": "Purpose code requirement",
            "body": "Wire transfers must carry a purpose code",
            "expected_evidence": ["swift_purpose_code"],
            "severity": "medium",
            "effective_date": "2025-01-01T00:00:00Z"
        }))
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["status"], "upserted");

    let rule = h.rules.get_rule("R-API-1", 1).await.unwrap();
    assert_eq!(rule.source, RuleSource::Internal);
    assert_eq!(rule.severity, Severity::Medium);
}

#[actix_web::test]
async fn test_monitoring_endpoints() {
    let h = harness().await;
    let app = test::init_service(
        App::new().app_data(h.state.clone()).configure(configure_app),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/transactions")
        .set_json(submission("TXN-MON-1"))
        .to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::get()
        .uri("/monitoring/persistence/integrity?lookback_hours=24")
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["status"], "healthy");
    assert_eq!(resp["violations"], 0);

    let req = test::TestRequest::get()
        .uri("/monitoring/persistence/health")
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["status"], "healthy");
    assert!(resp["queue"].is_object());

    // A PENDING transaction without an analysis is consistent
    let req = test::TestRequest::get()
        .uri("/monitoring/persistence/verify/TXN-MON-1")
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["consistent"], true);
    assert_eq!(resp["analysis_exists"], false);

    let req = test::TestRequest::get()
        .uri("/monitoring/persistence/verify/TXN-NOPE")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

/// Deterministic model stub for the end-to-end flow
struct PassProvider;

#[async_trait]
impl LlmProvider for PassProvider {
    async fn complete(&self, request: &LlmRequest) -> LlmResult<LlmCompletion> {
        let content = if request.prompt.contains("\"applies\"") {
            r#"{"applies": true, "rationale": "in scope", "confidence": 0.95}"#.to_string()
        } else if request.prompt.contains("\"compliance_score\"") {
            r#"{"status": "fail", "severity": "high", "compliance_score": 25, "rationale": "purpose code incomplete"}"#
                .to_string()
        } else {
            "Evaluation summary citing R-E2E-1.".to_string()
        };
        Ok(LlmCompletion {
            content,
            model: "stub".to_string(),
            prompt_tokens: 1,
            completion_tokens: 1,
        })
    }

    fn name(&self) -> &str {
        "pass-stub"
    }
}

#[actix_web::test]
async fn test_end_to_end_submission_through_worker() {
    let h = harness().await;

    // Seed the corpus the evaluation will retrieve from
    h.rules
        .seed(vec![core_compliance::Rule {
            rule_id: "R-E2E-1".to_string(),
            version: 1,
            source: RuleSource::Internal,
            regulator: "MAS".to_string(),
            jurisdictions: vec!["SG".to_string(), "HK".to_string()],
            title: "Cross-border transfer monitoring".to_string(),
            body: "Cross-border wire transfers require monitoring and complete information"
                .to_string(),
            applicability_conditions: Vec::new(),
            applicability_text: "Cross-border payments".to_string(),
            expected_evidence: vec!["originator_name".to_string()],
            severity: Severity::High,
            effective_date: Utc::now() - chrono::Duration::days(90),
            sunset_date: None,
            is_active: true,
        }])
        .await
        .unwrap();

    let gateway = Arc::new(LlmGateway::new(
        Arc::new(PassProvider),
        GatewayConfig::default(),
    ));
    let orchestrator = Arc::new(PipelineOrchestrator::new(
        h.store.clone(),
        h.rules.clone(),
        gateway,
        core_config::PipelineConfig {
            evaluation_deadline_secs: 30,
            applicability_rule_cap: 10,
            retrieval_cap: 30,
            history_window_days: 30,
            high_risk_country_override: None,
        },
        10,
    ));
    let processor = Arc::new(EvaluationJobProcessor::new(orchestrator, h.store.clone()));
    let workers = WorkerPool::start(
        h.queue.clone(),
        processor,
        WorkerPoolConfig::new(QUEUE, 1).with_visibility_timeout(Duration::from_secs(30)),
    );

    let app = test::init_service(
        App::new().app_data(h.state.clone()).configure(configure_app),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/transactions")
        .set_json(submission("TXN-E2E-1"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 202);

    // Wait for the worker to evaluate
    let mut completed = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let tx = h
            .store
            .find_transaction_by_ref("TXN-E2E-1")
            .await
            .unwrap()
            .unwrap();
        if tx.status == TransactionStatus::Completed {
            completed = true;
            break;
        }
    }
    workers.shutdown().await;
    assert!(completed, "evaluation did not complete in time");

    // The status endpoint now carries the risk fields
    let req = test::TestRequest::get()
        .uri("/transactions/TXN-E2E-1/status")
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["task_status"], "COMPLETED");
    let score = resp["risk_score"].as_f64().unwrap();
    assert!((0.0..=100.0).contains(&score));

    // And the compliance projection exists
    let req = test::TestRequest::get()
        .uri("/transactions/TXN-E2E-1/compliance")
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["transaction_id"], "TXN-E2E-1");
    assert!(!resp["control_results"].as_array().unwrap().is_empty());
    assert_eq!(
        resp["risk_band"],
        core_compliance::RiskBand::from_score(score).as_str()
    );
}
