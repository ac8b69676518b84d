//! Stage 1: retrieve-normalize. Pure, no generation call.

use crate::pipeline::PipelineContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A retrieved fragment flattened into the uniform record the rest of the
/// pipeline works with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedFragment {
    pub vector_id: String,
    pub score: f32,
    pub email_id: String,
    pub thread_id: Option<String>,
    pub subject: String,
    pub sender: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub chunk_index: usize,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderCount {
    pub sender: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedEvidence {
    pub fragments: Vec<NormalizedFragment>,
    pub unique_documents: Vec<String>,
    pub unique_threads: Vec<String>,
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub top_senders: Vec<SenderCount>,
}

fn metadata_str(metadata: &Value, key: &str) -> String {
    metadata
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

pub fn run(context: &PipelineContext) -> NormalizedEvidence {
    let mut fragments = Vec::with_capacity(context.fragments.len());
    let mut unique_documents = Vec::new();
    let mut unique_threads = Vec::new();
    let mut sender_counts: HashMap<String, usize> = HashMap::new();
    let mut earliest: Option<DateTime<Utc>> = None;
    let mut latest: Option<DateTime<Utc>> = None;

    for raw in &context.fragments {
        let email_id = metadata_str(&raw.metadata, "email_id");
        let thread_id = {
            let value = metadata_str(&raw.metadata, "thread_id");
            if value.is_empty() { None } else { Some(value) }
        };
        let sender = metadata_str(&raw.metadata, "sender");
        let sent_at = DateTime::parse_from_rfc3339(&metadata_str(&raw.metadata, "sent_at"))
            .ok()
            .map(|at| at.with_timezone(&Utc));
        let chunk_index = raw
            .metadata
            .get("chunk_index")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;

        if !email_id.is_empty() && !unique_documents.contains(&email_id) {
            unique_documents.push(email_id.clone());
        }
        if let Some(thread) = &thread_id {
            if !unique_threads.contains(thread) {
                unique_threads.push(thread.clone());
            }
        }
        if !sender.is_empty() {
            *sender_counts.entry(sender.clone()).or_insert(0) += 1;
        }
        if let Some(at) = sent_at {
            earliest = Some(earliest.map_or(at, |current| current.min(at)));
            latest = Some(latest.map_or(at, |current| current.max(at)));
        }

        fragments.push(NormalizedFragment {
            vector_id: raw.vector_id.clone(),
            score: raw.score,
            email_id,
            thread_id,
            subject: metadata_str(&raw.metadata, "subject"),
            sender,
            sent_at,
            chunk_index,
            text: metadata_str(&raw.metadata, "text_preview"),
        });
    }

    let mut top_senders: Vec<SenderCount> = sender_counts
        .into_iter()
        .map(|(sender, count)| SenderCount { sender, count })
        .collect();
    top_senders.sort_by(|left, right| {
        right
            .count
            .cmp(&left.count)
            .then_with(|| left.sender.cmp(&right.sender))
    });
    top_senders.truncate(5);

    NormalizedEvidence {
        fragments,
        unique_documents,
        unique_threads,
        date_range: earliest.zip(latest),
        top_senders,
    }
}
