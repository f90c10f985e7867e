// =====================================================================================
// File: core-pipeline/src/evaluator.rs
// Description: Per-rule applicability, evidence mapping, and control testing
// =====================================================================================

use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use core_compliance::{
    Applicability, ControlResult, ControlStatus, EvidenceMap, RetrievedRule, Rule, RuleCondition,
    Severity, Transaction,
};
use core_llm::{LlmGateway, LlmRequest};

use crate::state::{ApplicableRule, EvaluationState};
use crate::{EvaluationError, PipelineResult};

/// Applicability judgments below this confidence are discarded
const MIN_APPLICABILITY_CONFIDENCE: f64 = 0.3;

/// Per-rule evaluation: fans out LLM applicability judgments over the
/// retrieved rules (capped by fused score), computes mechanical evidence
/// maps, and fans out control tests over the applicable rules. Per-rule
/// failures drop the rule with a warning; systematic failure escalates to a
/// fatal stage error.
pub struct RuleEvaluator {
    gateway: Arc<LlmGateway>,
    /// Bounded fan-out per evaluation
    fan_out: usize,
    /// Rules carried into the LLM stages, by fused score
    rule_cap: usize,
}

impl RuleEvaluator {
    pub fn new(gateway: Arc<LlmGateway>, fan_out: usize, rule_cap: usize) -> Self {
        Self {
            gateway,
            fan_out: fan_out.max(1),
            rule_cap: rule_cap.max(1),
        }
    }

    /// Stage 3: applicability fan-out. Keeps rules the model judges
    /// applicable with adequate confidence.
    pub async fn run_applicability(&self, state: &mut EvaluationState) -> PipelineResult<()> {
        let candidates: Vec<RetrievedRule> = state
            .retrieved_rules
            .iter()
            .take(self.rule_cap)
            .cloned()
            .collect();

        let summary = state.transaction.summary_line();
        let semaphore = Arc::new(Semaphore::new(self.fan_out));
        let mut join_set: JoinSet<(usize, RetrievedRule, Result<Applicability, String>)> =
            JoinSet::new();

        for (index, retrieved) in candidates.into_iter().enumerate() {
            let gateway = Arc::clone(&self.gateway);
            let semaphore = Arc::clone(&semaphore);
            let summary = summary.clone();
            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (index, retrieved, Err("fan-out cancelled".to_string())),
                };
                let prompt = applicability_prompt(&retrieved.rule, &summary);
                let request = LlmRequest::json(prompt).with_temperature(0.0);
                let result = match gateway.complete_json(&request).await {
                    Ok(value) => parse_applicability(&value),
                    Err(e) => Err(e.to_string()),
                };
                (index, retrieved, result)
            });
        }

        let mut outcomes = Vec::new();
        let mut panics = 0usize;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!(error = %e, "Applicability task aborted");
                    panics += 1;
                }
            }
        }
        outcomes.sort_by_key(|(index, _, _)| *index);

        let mut judged = 0usize;
        let mut errored = panics;
        for (_, retrieved, result) in outcomes {
            match result {
                Ok(applicability) => {
                    judged += 1;
                    if !applicability.applies {
                        continue;
                    }
                    if applicability.confidence < MIN_APPLICABILITY_CONFIDENCE {
                        state.warn(format!(
                            "rule {} dropped: applicability confidence {:.2} below threshold",
                            retrieved.rule.rule_id, applicability.confidence
                        ));
                        continue;
                    }
                    state.applicable_rules.push(ApplicableRule {
                        retrieved,
                        applicability,
                    });
                }
                Err(message) => {
                    errored += 1;
                    state.warn(format!(
                        "rule {} dropped: applicability call failed: {}",
                        retrieved.rule.rule_id, message
                    ));
                }
            }
        }

        // Systematic failure: rules were retrieved, but no judgment at all
        // came back. A rule-less evaluation by accident is forbidden.
        if judged == 0 && errored > 0 {
            return Err(EvaluationError::stage(
                "applicability",
                "every applicability call failed",
            ));
        }

        debug!(
            applicable = state.applicable_rules.len(),
            judged, errored, "Applicability stage completed"
        );
        Ok(())
    }

    /// Stage 4: mechanical evidence mapping, no model involvement
    pub fn run_evidence(&self, state: &mut EvaluationState) {
        for applicable in &state.applicable_rules {
            let map = evidence_map_for(&applicable.retrieved.rule, &state.transaction);
            state
                .evidence_maps
                .insert(applicable.retrieved.rule.rule_id.clone(), map);
        }
        debug!(maps = state.evidence_maps.len(), "Evidence maps computed");
    }

    /// Stage 5: control-test fan-out over the applicable rules
    pub async fn run_controls(&self, state: &mut EvaluationState) -> PipelineResult<()> {
        let applicable_count = state.applicable_rules.len();
        let summary = state.transaction.summary_line();
        let semaphore = Arc::new(Semaphore::new(self.fan_out));
        let mut join_set: JoinSet<(usize, String, Result<ControlResult, String>)> = JoinSet::new();

        for (index, applicable) in state.applicable_rules.iter().enumerate() {
            let gateway = Arc::clone(&self.gateway);
            let semaphore = Arc::clone(&semaphore);
            let summary = summary.clone();
            let rule = applicable.retrieved.rule.clone();
            let evidence = state
                .evidence_maps
                .get(&rule.rule_id)
                .cloned()
                .unwrap_or_default();
            join_set.spawn(async move {
                let rule_id = rule.rule_id.clone();
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (index, rule_id, Err("fan-out cancelled".to_string())),
                };
                let prompt = control_prompt(&rule, &summary, &evidence);
                let request = LlmRequest::json(prompt).with_temperature(0.0);
                let result = match gateway.complete_json(&request).await {
                    Ok(value) => parse_control(&value, &rule),
                    Err(e) => Err(e.to_string()),
                };
                (index, rule_id, result)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(error = %e, "Control-test task aborted"),
            }
        }
        outcomes.sort_by_key(|(index, _, _)| *index);

        for (_, rule_id, result) in outcomes {
            match result {
                Ok(control) => state.control_results.push(control),
                Err(message) => state.warn(format!(
                    "rule {} dropped: control test failed: {}",
                    rule_id, message
                )),
            }
        }

        // Too many applicable obligations left untested: the analysis would
        // be hollow. Escalate instead of persisting it.
        if applicable_count > 5 && state.control_results.len() < 2 {
            return Err(EvaluationError::stage(
                "control_test",
                "fewer than 2 control tests succeeded across more than 5 applicable rules",
            ));
        }

        debug!(
            controls = state.control_results.len(),
            applicable = applicable_count,
            "Control-test stage completed"
        );
        Ok(())
    }
}

/// Classify one rule's expected evidence fields against the transaction
pub fn evidence_map_for(rule: &Rule, transaction: &Transaction) -> EvidenceMap {
    let mut map = EvidenceMap::default();

    for field in &rule.expected_evidence {
        match transaction.evidence_field(field) {
            // Unknown field names are ignored
            None => continue,
            Some(None) => map.missing.push(field.clone()),
            Some(Some(_)) => {
                let contradicted = rule
                    .applicability_conditions
                    .iter()
                    .filter(|c| c.field == *field)
                    .any(|c| condition_violated(c, transaction));
                if contradicted {
                    map.contradictory.push(field.clone());
                } else {
                    map.present.push(field.clone());
                }
            }
        }
    }

    map.present.sort();
    map.missing.sort();
    map.contradictory.sort();
    map
}

/// Whether the transaction's value for the condition's field violates the
/// declared constraint. Missing values are "missing", never contradictory.
fn condition_violated(condition: &RuleCondition, transaction: &Transaction) -> bool {
    let Some(Some(actual)) = transaction.evidence_field(&condition.field) else {
        return false;
    };

    match &condition.expected {
        Value::Bool(expected) => actual
            .parse::<bool>()
            .map(|a| a != *expected)
            .unwrap_or(false),
        Value::String(expected) => !actual.eq_ignore_ascii_case(expected),
        Value::Number(expected) => match (actual.parse::<f64>(), expected.as_f64()) {
            (Ok(a), Some(e)) => (a - e).abs() > 1e-9,
            _ => false,
        },
        _ => false,
    }
}

fn applicability_prompt(rule: &Rule, transaction_summary: &str) -> String {
    format!(
        "You are a compliance analyst. Judge whether the following rule's obligations \
         bear on the transaction.\n\n\
         RULE {} ({} severity, regulator {}):\n{}\n\n\
         APPLICABILITY CONDITIONS:\n{}\n\n\
         TRANSACTION:\n{}\n\n\
         Respond with JSON: {{\"applies\": boolean, \"rationale\": string, \
         \"confidence\": number between 0 and 1}}",
        rule.rule_id,
        rule.severity.as_str(),
        rule.regulator,
        rule.body,
        rule.applicability_text,
        transaction_summary,
    )
}

fn control_prompt(rule: &Rule, transaction_summary: &str, evidence: &EvidenceMap) -> String {
    format!(
        "You are a compliance analyst testing a control against a transaction.\n\n\
         RULE {} ({} severity):\n{}\n\n\
         TRANSACTION:\n{}\n\n\
         EVIDENCE PRESENT: {:?}\nEVIDENCE MISSING: {:?}\nEVIDENCE CONTRADICTORY: {:?}\n\n\
         Respond with JSON: {{\"status\": \"pass\"|\"fail\"|\"partial\", \
         \"severity\": \"critical\"|\"high\"|\"medium\"|\"low\", \
         \"compliance_score\": number between 0 and 100, \"rationale\": string}}",
        rule.rule_id,
        rule.severity.as_str(),
        rule.body,
        transaction_summary,
        evidence.present,
        evidence.missing,
        evidence.contradictory,
    )
}

fn parse_applicability(value: &Value) -> Result<Applicability, String> {
    let applies = value
        .get("applies")
        .and_then(Value::as_bool)
        .ok_or("missing boolean 'applies'")?;
    let confidence = value
        .get("confidence")
        .and_then(Value::as_f64)
        .ok_or("missing numeric 'confidence'")?;
    if !(0.0..=1.0).contains(&confidence) {
        return Err(format!("confidence {} outside [0, 1]", confidence));
    }
    let rationale = value
        .get("rationale")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(Applicability {
        applies,
        rationale,
        confidence,
    })
}

/// Parse and normalize a control result: the rule's declared severity always
/// replaces the model's, and scores are clamped to agree with the status
/// (fails <= 40, passes >= 70).
fn parse_control(value: &Value, rule: &Rule) -> Result<ControlResult, String> {
    let status_text = value
        .get("status")
        .and_then(Value::as_str)
        .ok_or("missing 'status'")?;
    let status = match status_text {
        "pass" => ControlStatus::Pass,
        "fail" => ControlStatus::Fail,
        "partial" => ControlStatus::Partial,
        other => return Err(format!("unknown control status '{}'", other)),
    };

    let raw_score = value
        .get("compliance_score")
        .and_then(Value::as_f64)
        .ok_or("missing numeric 'compliance_score'")?;
    let mut compliance_score = raw_score.clamp(0.0, 100.0);
    compliance_score = match status {
        ControlStatus::Fail => compliance_score.min(40.0),
        ControlStatus::Pass => compliance_score.max(70.0),
        ControlStatus::Partial => compliance_score,
    };

    // The model may disagree with the rule's severity; the rule wins
    if let Some(model_severity) = value.get("severity").and_then(Value::as_str) {
        if Severity::from_str(model_severity)
            .map(|s| s != rule.severity)
            .unwrap_or(true)
        {
            debug!(
                rule_id = %rule.rule_id,
                model_severity,
                rule_severity = rule.severity.as_str(),
                "Model severity overridden by rule severity"
            );
        }
    }

    let rationale = value
        .get("rationale")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(ControlResult {
        rule_id: rule.rule_id.clone(),
        status,
        severity: rule.severity,
        compliance_score,
        rationale,
    })
}
