use crate::error::LlmError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

/// Role/goal/instruction framing for one pipeline stage call.
#[derive(Debug, Clone)]
pub struct StagePrompt {
    pub role: String,
    pub goal: String,
    pub instructions: String,
    pub context: String,
    pub temperature: f32,
}

impl StagePrompt {
    pub fn new(
        role: impl Into<String>,
        goal: impl Into<String>,
        instructions: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            goal: goal.into(),
            instructions: instructions.into(),
            context: context.into(),
            temperature: 0.2,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Text-generation collaborator used by the analyze, compliance-review and
/// answer-compose stages. Synchronous per call, with its own retry policy.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &StagePrompt) -> Result<String, LlmError>;
}

#[async_trait]
impl<T: CompletionClient + ?Sized> CompletionClient for Box<T> {
    async fn complete(&self, prompt: &StagePrompt) -> Result<String, LlmError> {
        (**self).complete(prompt).await
    }
}

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Client for an OpenAI-style chat-completions endpoint.
pub struct HttpCompletionClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: usize,
}

impl HttpCompletionClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: 4096,
        }
    }

    async fn try_complete(&self, prompt: &StagePrompt) -> Result<String, LlmError> {
        let system = format!("You are {}. {}", prompt.role, prompt.goal);
        let user = format!("{}\n\n{}", prompt.instructions, prompt.context);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "temperature": prompt.temperature,
                "max_tokens": self.max_tokens,
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": user},
                ],
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(LlmError::MalformedResponse(format!(
                "completion service returned {}",
                response.status()
            )));
        }

        let parsed: Value = response.json().await?;
        parsed
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| LlmError::MalformedResponse("missing message content".to_string()))
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, prompt: &StagePrompt) -> Result<String, LlmError> {
        let mut backoff = INITIAL_BACKOFF;
        let mut last_failure = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            match self.try_complete(prompt).await {
                Ok(text) => return Ok(text),
                Err(error) => {
                    warn!(attempt, %error, "completion request failed");
                    last_failure = error.to_string();
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
        }

        Err(LlmError::Upstream {
            attempts: MAX_ATTEMPTS,
            details: last_failure,
        })
    }
}

/// Extract the JSON object from a completion, tolerating markdown fences and
/// leading prose.
pub fn parse_json_response(raw: &str) -> Result<Value, LlmError> {
    let trimmed = raw.trim();

    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end_matches("```").trim())
        .unwrap_or(trimmed);

    if let Ok(value) = serde_json::from_str(unfenced) {
        return Ok(value);
    }

    let start = unfenced.find('{');
    let end = unfenced.rfind('}');
    if let (Some(start), Some(end)) = (start, end) {
        if start < end {
            if let Ok(value) = serde_json::from_str(&unfenced[start..=end]) {
                return Ok(value);
            }
        }
    }

    Err(LlmError::MalformedResponse(format!(
        "not valid JSON: {}",
        &trimmed.chars().take(120).collect::<String>()
    )))
}
