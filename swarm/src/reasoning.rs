//! Client for the external reasoning service. The agents only ever want one
//! thing from it: a JSON object matching the schema they asked for.

use aegis_core::telemetry;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

#[async_trait]
pub trait Reasoning: Send + Sync {
    /// Ask for a JSON object; implementations must return parsed JSON or fail.
    async fn complete_json(&self, system: &str, prompt: &str) -> Result<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    OpenRouter,
    Anthropic,
}

impl Provider {
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "openrouter" => Ok(Self::OpenRouter),
            "anthropic" => Ok(Self::Anthropic),
            other => bail!("unknown LLM provider: {other}"),
        }
    }
}

pub struct LlmClient {
    http: reqwest::Client,
    provider: Provider,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl LlmClient {
    pub fn new(provider: Provider, api_key: &str, model: &str, max_tokens: u32) -> Self {
        Self {
            http: reqwest::Client::new(),
            provider,
            api_key: api_key.to_string(),
            model: model.to_string(),
            max_tokens,
        }
    }

    async fn chat_completions(&self, base: &str, system: &str, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
        });
        let response = self
            .http
            .post(format!("{base}/chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("reasoning request failed")?
            .error_for_status()
            .context("reasoning service returned an error status")?;

        let value: Value = response.json().await.context("reading reasoning response")?;
        value["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("reasoning response missing content"))
    }

    async fn anthropic_messages(&self, system: &str, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": system,
            "messages": [{"role": "user", "content": prompt}],
        });
        let response = self
            .http
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .context("reasoning request failed")?
            .error_for_status()
            .context("reasoning service returned an error status")?;

        let value: Value = response.json().await.context("reading reasoning response")?;
        value["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("reasoning response missing content"))
    }
}

#[async_trait]
impl Reasoning for LlmClient {
    async fn complete_json(&self, system: &str, prompt: &str) -> Result<Value> {
        telemetry::REASONING_CALLS.inc();
        let raw = match self.provider {
            Provider::OpenAi => self.chat_completions("https://api.openai.com/v1", system, prompt).await,
            Provider::OpenRouter => {
                self.chat_completions("https://openrouter.ai/api/v1", system, prompt).await
            }
            Provider::Anthropic => self.anthropic_messages(system, prompt).await,
        };

        let raw = match raw {
            Ok(raw) => raw,
            Err(e) => {
                telemetry::REASONING_FAILURES.inc();
                return Err(e);
            }
        };

        match extract_json(&raw) {
            Ok(value) => Ok(value),
            Err(e) => {
                telemetry::REASONING_FAILURES.inc();
                debug!("unparseable reasoning output: {raw}");
                Err(e)
            }
        }
    }
}

/// Models wrap JSON in prose and code fences; dig the object out.
pub fn extract_json(raw: &str) -> Result<Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    let start = trimmed.find('{').ok_or_else(|| anyhow!("no JSON object in reasoning output"))?;
    let end = trimmed.rfind('}').ok_or_else(|| anyhow!("no JSON object in reasoning output"))?;
    if end <= start {
        bail!("malformed JSON in reasoning output");
    }
    serde_json::from_str(&trimmed[start..=end]).context("parsing reasoning JSON")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_json_parses() {
        let v = extract_json(r#"{"action": "enter", "base_amount": 0.1}"#).unwrap();
        assert_eq!(v["action"], "enter");
    }

    #[test]
    fn fenced_json_parses() {
        let raw = "Here is my analysis:\n```json\n{\"conviction_score\": 62, \"risk_profile\": \"medium\"}\n```\nGood luck.";
        let v = extract_json(raw).unwrap();
        assert_eq!(v["conviction_score"], 62);
    }

    #[test]
    fn prose_without_json_fails() {
        assert!(extract_json("I cannot assess this token.").is_err());
    }
}
