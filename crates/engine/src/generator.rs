//! Comment text generation.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use socialpilot_core::config::GeneratorConfig;
use socialpilot_core::{Error, Result};
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

const DEFAULT_SYSTEM_PROMPT: &str = "You write short, friendly, specific replies to social media posts. \
Reply in one or two sentences, in the language of the post, without hashtags, \
without quotation marks and without mentioning that you are an assistant.";

#[async_trait]
pub trait CommentGenerator: Send + Sync {
    /// Produce a reply for `post_text`. An empty string means "nothing to say".
    async fn generate(&self, post_text: &str, assistant_id: Option<&str>) -> Result<String>;
}

/// Replace em and en dashes with commas and tidy the spacing around them.
pub fn normalize_dashes(text: &str) -> String {
    let replaced = text.replace(&['\u{2014}', '\u{2013}'][..], ",");
    let mut out = String::with_capacity(replaced.len());
    for ch in replaced.chars() {
        if ch == ',' {
            while out.ends_with(' ') {
                out.pop();
            }
            if out.ends_with(',') {
                continue;
            }
        }
        if ch == ' ' && (out.is_empty() || out.ends_with(' ')) {
            continue;
        }
        if ch != ' ' && ch != ',' && out.ends_with(',') {
            out.push(' ');
        }
        out.push(ch);
    }
    out.trim().trim_start_matches(',').trim().to_string()
}

/// Generator backed by the OpenAI HTTP API: an assistants thread run when the
/// account has an assistant configured, chat completions otherwise.
pub struct OpenAiCommentGenerator {
    client: Client,
    config: GeneratorConfig,
    api_base: String,
}

impl OpenAiCommentGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(Error::Config(
                "generator.apiKey is not set (or export OPENAI_API_KEY)".into(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Generator(format!("failed to build HTTP client: {}", e)))?;
        let api_base = config
            .api_base
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            client,
            config,
            api_base,
        })
    }

    fn system_prompt(&self) -> &str {
        self.config
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }

    async fn call(&self, method: reqwest::Method, path: &str, body: Option<Value>, assistants: bool) -> Result<Value> {
        let url = format!("{}{}", self.api_base, path);
        let mut request = self
            .client
            .request(method, &url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json");
        if assistants {
            request = request.header("OpenAI-Beta", "assistants=v2");
        }
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::Generator(format!("request to {} failed: {}", path, e)))?;
        let status = response.status();
        let raw = response.text().await.unwrap_or_default();
        if !status.is_success() {
            warn!(status = %status, path = %path, "Generator API error");
            return Err(Error::Generator(format!("API error {}: {}", status, raw)));
        }
        serde_json::from_str(&raw)
            .map_err(|e| Error::Generator(format!("failed to parse response from {}: {}", path, e)))
    }

    async fn chat_completion(&self, post_text: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct ChatResponse {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: Message,
        }
        #[derive(Deserialize)]
        struct Message {
            content: Option<String>,
        }

        let body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": [
                {"role": "system", "content": self.system_prompt()},
                {"role": "user", "content": post_text},
            ],
        });
        info!(model = %self.config.model, "Generating comment via chat completions");
        let value = self
            .call(reqwest::Method::POST, "/chat/completions", Some(body), false)
            .await?;
        let parsed: ChatResponse = serde_json::from_value(value)
            .map_err(|e| Error::Generator(format!("unexpected chat response: {}", e)))?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    async fn assistant_run(&self, post_text: &str, assistant_id: &str) -> Result<String> {
        info!(assistant = %assistant_id, "Generating comment via assistant run");
        let body = json!({
            "assistant_id": assistant_id,
            "thread": {"messages": [{"role": "user", "content": post_text}]},
        });
        let run = self
            .call(reqwest::Method::POST, "/threads/runs", Some(body), true)
            .await?;
        let thread_id = str_field(&run, "thread_id")?;
        let run_id = str_field(&run, "id")?;

        let poll = Duration::from_millis(self.config.poll_interval_ms);
        let mut status = run.get("status").and_then(|v| v.as_str()).unwrap_or("queued").to_string();
        let mut polls = 0u32;
        while matches!(status.as_str(), "queued" | "in_progress" | "cancelling") {
            if polls >= self.config.max_polls {
                return Err(Error::Timeout(format!(
                    "assistant run {} still {} after {} polls",
                    run_id, status, polls
                )));
            }
            tokio::time::sleep(poll).await;
            polls += 1;
            let current = self
                .call(
                    reqwest::Method::GET,
                    &format!("/threads/{}/runs/{}", thread_id, run_id),
                    None,
                    true,
                )
                .await?;
            status = current
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or("failed")
                .to_string();
            debug!(run = %run_id, status = %status, polls = polls, "Assistant run status");
        }
        if status != "completed" {
            return Err(Error::Generator(format!("assistant run ended as {}", status)));
        }

        let messages = self
            .call(
                reqwest::Method::GET,
                &format!("/threads/{}/messages?order=desc&limit=1", thread_id),
                None,
                true,
            )
            .await?;
        Ok(latest_assistant_text(&messages).unwrap_or_default())
    }
}

fn str_field(value: &Value, key: &str) -> Result<String> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::Generator(format!("response is missing '{}'", key)))
}

/// Text of the newest assistant message in a thread message listing.
fn latest_assistant_text(listing: &Value) -> Option<String> {
    let messages = listing.get("data")?.as_array()?;
    let message = messages
        .iter()
        .find(|m| m.get("role").and_then(|r| r.as_str()) == Some("assistant"))?;
    let parts: Vec<&str> = message
        .get("content")?
        .as_array()?
        .iter()
        .filter_map(|c| c.get("text")?.get("value")?.as_str())
        .collect();
    Some(parts.join("\n"))
}

#[async_trait]
impl CommentGenerator for OpenAiCommentGenerator {
    async fn generate(&self, post_text: &str, assistant_id: Option<&str>) -> Result<String> {
        let raw = match assistant_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => self.assistant_run(post_text, id).await?,
            None => self.chat_completion(post_text).await?,
        };
        Ok(normalize_dashes(raw.trim().trim_matches('"')))
    }
}

/// Returns the same text for every post; used when AI generation is off.
pub struct FixedComment(pub String);

#[async_trait]
impl CommentGenerator for FixedComment {
    async fn generate(&self, _post_text: &str, _assistant_id: Option<&str>) -> Result<String> {
        Ok(normalize_dashes(self.0.trim()))
    }
}
