//! The grounded-answer pipeline: five ordered stages over retrieved
//! fragments.
//!
//! The runner executes retrieve-normalize, context-reconstruct, analyze,
//! compliance-review and answer-compose strictly in that order for each
//! query. Stage outputs accumulate in [`PipelineContext`], which is passed
//! forward by reference and appended to exactly once per stage; no stage can
//! rewrite what an earlier one recorded. A stage failure aborts the rest of
//! the chain for that query.

pub mod analyze;
pub mod compliance;
pub mod compose;
pub mod normalize;
pub mod reconstruct;

use crate::error::PipelineError;
use crate::llm::CompletionClient;
use crate::models::{RagConfig, RetrievedFragment, StageKind, StageTimings};
use analyze::Analysis;
use compliance::{ComplianceReview, Redactor};
use compose::ComposedAnswer;
use normalize::NormalizedEvidence;
use reconstruct::Reconstruction;
use std::time::Instant;
use tracing::{debug, info};

/// Forward-only accumulation of stage outputs for one query.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub query: String,
    pub fragments: Vec<RetrievedFragment>,
    pub normalized: Option<NormalizedEvidence>,
    pub reconstruction: Option<Reconstruction>,
    pub analysis: Option<Analysis>,
    pub compliance: Option<ComplianceReview>,
}

impl PipelineContext {
    pub fn new(query: impl Into<String>, fragments: Vec<RetrievedFragment>) -> Self {
        Self {
            query: query.into(),
            fragments,
            normalized: None,
            reconstruction: None,
            analysis: None,
            compliance: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub draft: ComposedAnswer,
    pub timings: StageTimings,
    pub redaction_count: usize,
}

pub struct GroundedAnswerPipeline<L> {
    llm: L,
    redaction_enabled: bool,
    redactor: Redactor,
}

impl<L: CompletionClient> GroundedAnswerPipeline<L> {
    pub fn new(llm: L, config: &RagConfig) -> Self {
        Self {
            llm,
            redaction_enabled: config.redaction_enabled,
            redactor: Redactor::new(),
        }
    }

    pub async fn run(
        &self,
        query: &str,
        fragments: Vec<RetrievedFragment>,
    ) -> Result<PipelineOutcome, PipelineError> {
        let mut context = PipelineContext::new(query, fragments);
        let mut timings = StageTimings::default();

        info!(
            fragments = context.fragments.len(),
            "starting grounded-answer pipeline"
        );

        let started = Instant::now();
        context.normalized = Some(normalize::run(&context));
        timings.normalize_ms = started.elapsed().as_secs_f64() * 1000.0;
        debug!(stage = %StageKind::RetrieveNormalize, "stage complete");

        let started = Instant::now();
        context.reconstruction = Some(reconstruct::run(&context));
        timings.reconstruct_ms = started.elapsed().as_secs_f64() * 1000.0;
        debug!(stage = %StageKind::ContextReconstruct, "stage complete");

        let started = Instant::now();
        let analysis = analyze::run(&self.llm, &context)
            .await
            .map_err(|source| PipelineError::Stage {
                stage: StageKind::Analyze,
                source,
            })?;
        context.analysis = Some(analysis);
        timings.analyze_ms = started.elapsed().as_secs_f64() * 1000.0;
        debug!(stage = %StageKind::Analyze, "stage complete");

        let started = Instant::now();
        let review = compliance::run(&self.llm, &context, self.redaction_enabled, &self.redactor)
            .await
            .map_err(|source| PipelineError::Stage {
                stage: StageKind::ComplianceReview,
                source,
            })?;
        let redaction_count = review.redaction_count;
        context.compliance = Some(review);
        timings.compliance_ms = started.elapsed().as_secs_f64() * 1000.0;
        debug!(stage = %StageKind::ComplianceReview, "stage complete");

        let started = Instant::now();
        let draft = compose::run(&self.llm, &context, self.redaction_enabled, &self.redactor)
            .await
            .map_err(|source| PipelineError::Stage {
                stage: StageKind::AnswerCompose,
                source,
            })?;
        timings.compose_ms = started.elapsed().as_secs_f64() * 1000.0;
        debug!(stage = %StageKind::AnswerCompose, "stage complete");

        info!(
            answer_complete = draft.answer_complete,
            redaction_count, "pipeline complete"
        );

        Ok(PipelineOutcome {
            draft,
            timings,
            redaction_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::StagePrompt;
    use crate::models::RetrievedFragment;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Instant;

    /// Scripted completion client: hands out canned responses in call order
    /// and records which stage role asked, when.
    struct ScriptedLlm {
        responses: Mutex<Vec<String>>,
        calls: Mutex<Vec<(String, Instant)>>,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().rev().map(String::from).collect()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedLlm {
        async fn complete(&self, prompt: &StagePrompt) -> Result<String, LlmError> {
            self.calls
                .lock()
                .unwrap()
                .push((prompt.role.clone(), Instant::now()));
            self.responses
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| LlmError::MalformedResponse("script exhausted".to_string()))
        }
    }

    struct FailingLlm;

    #[async_trait]
    impl CompletionClient for FailingLlm {
        async fn complete(&self, _prompt: &StagePrompt) -> Result<String, LlmError> {
            Err(LlmError::Upstream {
                attempts: 3,
                details: "connection refused".to_string(),
            })
        }
    }

    fn fragment(email_id: &str, text: &str, score: f32) -> RetrievedFragment {
        RetrievedFragment {
            vector_id: format!("{email_id}_chunk_0"),
            score,
            metadata: json!({
                "email_id": email_id,
                "thread_id": "t-1",
                "subject": "renewal",
                "sender": "alice@x.com",
                "sent_at": "2024-02-01T10:00:00Z",
                "chunk_index": 0,
                "text_preview": text,
            }),
        }
    }

    fn analysis_response(answer_possible: bool, claim: &str) -> String {
        json!({
            "answer_possible": answer_possible,
            "main_findings": if claim.is_empty() {
                json!([])
            } else {
                json!([{ "claim": claim, "citation": {
                    "email_id": "m-1", "sender": "alice@x.com", "date": "2024-02-01"
                }}])
            },
            "missing_information": if answer_possible {
                json!([])
            } else {
                json!(["no discussion of the topic in the retrieved emails"])
            },
        })
        .to_string()
    }

    #[tokio::test]
    async fn stages_execute_in_order_with_monotonic_timestamps() {
        let analysis = analysis_response(true, "the renewal was approved");
        let llm = ScriptedLlm::new(vec![
            analysis.as_str(),
            r#"{"traceability_verified": true, "sensitive_flags": [], "notes": []}"#,
            r#"{"answer": "The renewal was approved.", "answer_complete": true, "confidence": "high", "limitations": []}"#,
        ]);
        let pipeline = GroundedAnswerPipeline::new(llm, &RagConfig::default());

        let outcome = pipeline
            .run("was the renewal approved?", vec![fragment("m-1", "renewal approved", 0.9)])
            .await
            .unwrap();

        let calls = pipeline.llm.calls.lock().unwrap();
        let roles: Vec<&str> = calls.iter().map(|(role, _)| role.as_str()).collect();
        assert_eq!(roles.len(), 3);
        assert!(roles[0].contains("analyst"));
        assert!(roles[1].contains("compliance"));
        assert!(roles[2].contains("assistant"));
        assert!(calls[0].1 <= calls[1].1 && calls[1].1 <= calls[2].1);

        assert!(outcome.draft.answer_complete);
        assert_eq!(outcome.draft.sources.len(), 1);
    }

    #[tokio::test]
    async fn unanswerable_queries_refuse_instead_of_fabricating() {
        // Analysis says the evidence cannot answer; composer is overridden
        // even though it claimed completeness.
        let analysis = analysis_response(false, "");
        let llm = ScriptedLlm::new(vec![
            analysis.as_str(),
            r#"{"answer": "I cannot determine this from the available emails.", "answer_complete": true, "confidence": "low", "limitations": []}"#,
        ]);
        let pipeline = GroundedAnswerPipeline::new(llm, &RagConfig::default());

        let outcome = pipeline
            .run(
                "what did we decide about the budget?",
                vec![fragment("m-1", "lunch plans for friday", 0.72)],
            )
            .await
            .unwrap();

        assert!(!outcome.draft.answer_complete);
        assert!(!outcome.draft.limitations.is_empty());
        assert!(outcome.draft.limitations[0].contains("no discussion"));
    }

    #[tokio::test]
    async fn pii_in_findings_is_redacted_before_composition() {
        let analysis = analysis_response(true, "payroll listed SSN 123-45-6789 for the contractor");
        let llm = ScriptedLlm::new(vec![
            analysis.as_str(),
            r#"{"traceability_verified": true, "sensitive_flags": [], "notes": []}"#,
            r#"{"answer": "Payroll listed [REDACTED-SSN] for the contractor.", "answer_complete": true, "confidence": "medium", "limitations": []}"#,
        ]);
        let pipeline = GroundedAnswerPipeline::new(llm, &RagConfig::default());

        let outcome = pipeline
            .run("what did payroll send?", vec![fragment("m-1", "payroll details", 0.88)])
            .await
            .unwrap();

        assert!(outcome.redaction_count >= 1);
        assert!(outcome.draft.answer_text.contains("[REDACTED-SSN]"));
        assert!(!outcome.draft.answer_text.contains("123-45-6789"));
    }

    #[tokio::test]
    async fn composer_leaking_raw_pii_is_swept() {
        // The composer ignores the redacted analysis and echoes raw digits;
        // the final sweep still scrubs them.
        let analysis = analysis_response(true, "payroll listed SSN 123-45-6789");
        let llm = ScriptedLlm::new(vec![
            analysis.as_str(),
            r#"{"traceability_verified": true, "sensitive_flags": [], "notes": []}"#,
            r#"{"answer": "The SSN was 123-45-6789.", "answer_complete": true, "confidence": "high", "limitations": []}"#,
        ]);
        let pipeline = GroundedAnswerPipeline::new(llm, &RagConfig::default());

        let outcome = pipeline
            .run("what was in the payroll mail?", vec![fragment("m-1", "payroll", 0.9)])
            .await
            .unwrap();

        assert!(!outcome.draft.answer_text.contains("123-45-6789"));
        assert!(outcome.draft.answer_text.contains("[REDACTED-SSN]"));
    }

    #[tokio::test]
    async fn stage_failure_aborts_the_remaining_stages() {
        let pipeline = GroundedAnswerPipeline::new(FailingLlm, &RagConfig::default());

        let result = pipeline
            .run("anything", vec![fragment("m-1", "text", 0.8)])
            .await;

        match result {
            Err(PipelineError::Stage { stage, .. }) => {
                assert_eq!(stage, StageKind::Analyze);
            }
            other => panic!("expected stage failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unverified_traceability_marks_the_answer_incomplete() {
        let analysis = analysis_response(true, "a decision was made");
        let llm = ScriptedLlm::new(vec![
            analysis.as_str(),
            r#"{"traceability_verified": false, "sensitive_flags": ["untraceable claim"], "notes": []}"#,
            r#"{"answer": "A decision was made.", "answer_complete": true, "confidence": "high", "limitations": []}"#,
        ]);
        let pipeline = GroundedAnswerPipeline::new(llm, &RagConfig::default());

        let outcome = pipeline
            .run("what was decided?", vec![fragment("m-1", "decision", 0.85)])
            .await
            .unwrap();

        assert!(!outcome.draft.answer_complete);
        assert!(outcome
            .draft
            .limitations
            .iter()
            .any(|limitation| limitation.contains("traced")));
    }
}
