//! Stage 2: context-reconstruct. Pure, no generation call.
//!
//! Rebuilds emails from their chunks, threads from their emails, and renders
//! a chronological narrative per thread. Only fragment content appears in the
//! output; nothing is invented here.

use crate::pipeline::normalize::NormalizedEvidence;
use crate::pipeline::PipelineContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructedEmail {
    pub email_id: String,
    pub subject: String,
    pub sender: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadView {
    pub thread_id: String,
    pub emails: Vec<ReconstructedEmail>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reconstruction {
    pub threads: Vec<ThreadView>,
    pub standalone: Vec<ReconstructedEmail>,
    pub narrative: String,
}

pub fn run(context: &PipelineContext) -> Reconstruction {
    let evidence = context
        .normalized
        .as_ref()
        .cloned()
        .unwrap_or_else(|| NormalizedEvidence {
            fragments: Vec::new(),
            unique_documents: Vec::new(),
            unique_threads: Vec::new(),
            date_range: None,
            top_senders: Vec::new(),
        });

    // Rebuild each email from its chunks in chunk order.
    let mut order: Vec<String> = Vec::new();
    let mut emails: std::collections::HashMap<String, (Option<String>, Vec<&crate::pipeline::normalize::NormalizedFragment>)> =
        std::collections::HashMap::new();

    for fragment in &evidence.fragments {
        if fragment.email_id.is_empty() {
            continue;
        }
        let entry = emails
            .entry(fragment.email_id.clone())
            .or_insert_with(|| {
                order.push(fragment.email_id.clone());
                (fragment.thread_id.clone(), Vec::new())
            });
        entry.1.push(fragment);
    }

    let mut threads: Vec<ThreadView> = Vec::new();
    let mut standalone: Vec<ReconstructedEmail> = Vec::new();

    for email_id in order {
        let (thread_id, mut fragments) = emails.remove(&email_id).unwrap_or((None, Vec::new()));
        fragments.sort_by_key(|fragment| fragment.chunk_index);

        let first = match fragments.first() {
            Some(first) => (*first).clone(),
            None => continue,
        };

        let content = fragments
            .iter()
            .map(|fragment| fragment.text.trim())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        let email = ReconstructedEmail {
            email_id,
            subject: first.subject,
            sender: first.sender,
            sent_at: first.sent_at,
            content,
        };

        match thread_id {
            Some(thread_id) => {
                if let Some(view) = threads.iter_mut().find(|view| view.thread_id == thread_id) {
                    view.emails.push(email);
                } else {
                    threads.push(ThreadView {
                        thread_id,
                        emails: vec![email],
                    });
                }
            }
            None => standalone.push(email),
        }
    }

    // Chronology inside each thread; undated mail sorts last.
    for view in &mut threads {
        view.emails.sort_by_key(|email| {
            email
                .sent_at
                .map(|at| at.timestamp())
                .unwrap_or(i64::MAX)
        });
    }
    threads.sort_by_key(|view| {
        view.emails
            .first()
            .and_then(|email| email.sent_at)
            .map(|at| at.timestamp())
            .unwrap_or(i64::MAX)
    });

    let narrative = render_narrative(&threads, &standalone);

    Reconstruction {
        threads,
        standalone,
        narrative,
    }
}

fn render_narrative(threads: &[ThreadView], standalone: &[ReconstructedEmail]) -> String {
    let mut lines = Vec::new();

    for view in threads {
        lines.push(format!("Thread {}:", view.thread_id));
        for email in &view.emails {
            lines.push(render_email(email, "  "));
        }
    }

    if !standalone.is_empty() {
        lines.push("Standalone emails:".to_string());
        for email in standalone {
            lines.push(render_email(email, "  "));
        }
    }

    lines.join("\n")
}

fn render_email(email: &ReconstructedEmail, indent: &str) -> String {
    let date = email
        .sent_at
        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "unknown date".to_string());
    format!(
        "{indent}[{date}] {} — \"{}\" ({}): {}",
        email.sender, email.subject, email.email_id, email.content
    )
}
