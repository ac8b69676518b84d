//! Stage 3: analyze. First generation call of the pipeline.

use crate::error::LlmError;
use crate::llm::{parse_json_response, CompletionClient, StagePrompt};
use crate::pipeline::PipelineContext;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Citation {
    #[serde(default)]
    pub email_id: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub date: String,
}

/// A single claim with its mandatory citation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Finding {
    #[serde(default)]
    pub claim: String,
    #[serde(default)]
    pub citation: Citation,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Analysis {
    /// False when the query cannot be addressed from the evidence. Serde
    /// default keeps this false, so a response that omits the verdict fails
    /// toward refusal rather than fabrication.
    #[serde(default)]
    pub answer_possible: bool,
    #[serde(default)]
    pub main_findings: Vec<Finding>,
    #[serde(default)]
    pub decisions: Vec<Finding>,
    #[serde(default)]
    pub action_items: Vec<Finding>,
    #[serde(default)]
    pub agreements: Vec<Finding>,
    #[serde(default)]
    pub disagreements: Vec<Finding>,
    #[serde(default)]
    pub timeline: Vec<Finding>,
    #[serde(default)]
    pub risks: Vec<Finding>,
    #[serde(default)]
    pub missing_information: Vec<String>,
}

impl Analysis {
    pub fn all_findings(&self) -> impl Iterator<Item = &Finding> {
        self.main_findings
            .iter()
            .chain(&self.decisions)
            .chain(&self.action_items)
            .chain(&self.agreements)
            .chain(&self.disagreements)
            .chain(&self.timeline)
            .chain(&self.risks)
    }

    pub fn claim_count(&self) -> usize {
        self.all_findings().count()
    }
}

const INSTRUCTIONS: &str = "\
Analyze the reconstructed email conversations to answer the user's query.\n\
Only use information from the provided emails. Cite a specific email for \
every claim (email_id, sender, date). If information is not in the emails, \
state that in missing_information instead of guessing. Set answer_possible \
to false when the query cannot be answered from these emails.\n\
Respond with JSON: {\"answer_possible\": bool, \"main_findings\": \
[{\"claim\", \"citation\": {\"email_id\", \"sender\", \"date\"}}], \
\"decisions\": [...], \"action_items\": [...], \"agreements\": [...], \
\"disagreements\": [...], \"timeline\": [...], \"risks\": [...], \
\"missing_information\": [string]}";

pub async fn run(
    llm: &dyn CompletionClient,
    context: &PipelineContext,
) -> Result<Analysis, LlmError> {
    let narrative = context
        .reconstruction
        .as_ref()
        .map(|reconstruction| reconstruction.narrative.clone())
        .unwrap_or_default();

    let stats = context.normalized.as_ref().map(|evidence| {
        json!({
            "unique_documents": evidence.unique_documents,
            "unique_threads": evidence.unique_threads,
            "top_senders": evidence.top_senders,
        })
    });

    let prompt_context = format!(
        "User query: {}\n\nEvidence summary: {}\n\nReconstructed conversations:\n{}",
        context.query,
        stats.map(|value| value.to_string()).unwrap_or_default(),
        narrative,
    );

    let prompt = StagePrompt::new(
        "a meticulous email analyst",
        "Extract decisions, action items, agreements, timelines and risks \
         from email evidence, with a citation for every claim.",
        INSTRUCTIONS,
        prompt_context,
    );

    let raw = llm.complete(&prompt).await?;
    let value = parse_json_response(&raw)?;
    serde_json::from_value(value)
        .map_err(|error| LlmError::MalformedResponse(format!("analysis shape: {error}")))
}
