//! Stage 5: answer-compose.
//!
//! Synthesizes the compliance-reviewed findings into the final answer. The
//! generated text is composed only from the safe analysis; sources are built
//! deterministically from the normalized evidence rather than trusted from
//! the generation call, and the final text takes one more pass through the
//! redactor so nothing the review would have redacted can leak.

use crate::error::LlmError;
use crate::llm::{parse_json_response, CompletionClient, StagePrompt};
use crate::models::{AnswerSource, Confidence};
use crate::pipeline::compliance::Redactor;
use crate::pipeline::PipelineContext;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposedAnswer {
    pub answer_text: String,
    pub answer_complete: bool,
    pub confidence: Confidence,
    pub sources: Vec<AnswerSource>,
    pub limitations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawComposed {
    #[serde(default)]
    answer: String,
    #[serde(default = "default_complete")]
    answer_complete: bool,
    #[serde(default)]
    confidence: Confidence,
    #[serde(default)]
    limitations: Vec<String>,
}

fn default_complete() -> bool {
    true
}

const INSTRUCTIONS: &str = "\
Write the final answer for the user from the compliance-reviewed analysis.\n\
Start with a direct answer, then supporting detail, then caveats. Cite \
claims as: According to the email from [sender] on [date] with subject \
'[subject]'. Never add information that is not in the analysis, never \
speculate, never fill gaps with outside knowledge. If the analysis says the \
query cannot be answered, say so plainly and explain what is missing.\n\
Respond with JSON: {\"answer\": string, \"answer_complete\": bool, \
\"confidence\": \"high\"|\"medium\"|\"low\", \"limitations\": [string]}";

pub async fn run(
    llm: &dyn CompletionClient,
    context: &PipelineContext,
    redaction_enabled: bool,
    redactor: &Redactor,
) -> Result<ComposedAnswer, LlmError> {
    let review = context.compliance.clone();
    let safe_analysis = review
        .as_ref()
        .map(|review| review.safe_analysis.clone())
        .unwrap_or_default();

    let prompt_context = format!(
        "User query: {}\n\nCompliance-reviewed analysis:\n{}\n\nCompliance flags: {}",
        context.query,
        serde_json::to_string(&safe_analysis).unwrap_or_else(|_| "{}".to_string()),
        review
            .as_ref()
            .map(|review| {
                serde_json::json!({
                    "traceability_verified": review.traceability_verified,
                    "sensitive_flags": review.sensitive_flags,
                    "redaction_count": review.redaction_count,
                })
                .to_string()
            })
            .unwrap_or_default(),
    );

    let prompt = StagePrompt::new(
        "a precise assistant answering questions about the user's own email",
        "Deliver a grounded, cited answer that admits its limits instead of \
         inventing content.",
        INSTRUCTIONS,
        prompt_context,
    );

    let raw = llm.complete(&prompt).await?;
    let parsed: RawComposed = parse_json_response(&raw).and_then(|value| {
        serde_json::from_value(value)
            .map_err(|error| LlmError::MalformedResponse(format!("answer shape: {error}")))
    })?;

    let mut answer_text = parsed.answer;
    let mut answer_complete = parsed.answer_complete;
    let mut limitations = parsed.limitations;

    // The analyst's verdict overrides an optimistic composer.
    if !safe_analysis.answer_possible {
        answer_complete = false;
        for missing in &safe_analysis.missing_information {
            if !limitations.contains(missing) {
                limitations.push(missing.clone());
            }
        }
        if limitations.is_empty() {
            limitations.push(
                "the available emails do not contain the information needed to answer this query"
                    .to_string(),
            );
        }
    }

    if let Some(review) = &review {
        if !review.traceability_verified {
            answer_complete = false;
            limitations.push("some findings could not be traced to a source email".to_string());
        }
    }

    if redaction_enabled {
        let (safe, _, swept) = redactor.redact(&answer_text);
        answer_text = safe;
        if swept > 0 {
            tracing::warn!(swept, "redacted spans surfaced in composed answer");
        }
    }

    Ok(ComposedAnswer {
        answer_text,
        answer_complete,
        confidence: parsed.confidence,
        sources: build_sources(context),
        limitations,
    })
}

/// Unique source emails from the normalized evidence, strongest match first.
fn build_sources(context: &PipelineContext) -> Vec<AnswerSource> {
    let evidence = match &context.normalized {
        Some(evidence) => evidence,
        None => return Vec::new(),
    };

    let mut best: HashMap<&str, AnswerSource> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();

    for fragment in &evidence.fragments {
        if fragment.email_id.is_empty() {
            continue;
        }

        let candidate = AnswerSource {
            email_id: fragment.email_id.clone(),
            subject: fragment.subject.clone(),
            sender: fragment.sender.clone(),
            date: fragment
                .sent_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_default(),
            relevance: fragment.score,
        };

        match best.get_mut(fragment.email_id.as_str()) {
            Some(existing) => {
                if candidate.relevance > existing.relevance {
                    existing.relevance = candidate.relevance;
                }
            }
            None => {
                order.push(fragment.email_id.as_str());
                best.insert(fragment.email_id.as_str(), candidate);
            }
        }
    }

    let mut sources: Vec<AnswerSource> = order
        .into_iter()
        .filter_map(|email_id| best.remove(email_id))
        .collect();
    sources.sort_by(|left, right| right.relevance.total_cmp(&left.relevance));
    sources.truncate(10);
    sources
}
