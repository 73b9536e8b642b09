//! Refinement client for OpenAI-compatible chat completion APIs.
//!
//! Rewrites a raw caption so it carries the trigger word. A 429 answer is
//! treated as back-pressure: the client sleeps for the advertised
//! `Retry-After` and re-sends the identical request, up to
//! [`RateLimitPolicy::max_attempts`] times.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderValue, RETRY_AFTER};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};

use super::{BackendError, Refiner};
use crate::config::RefineSettings;
use crate::core::Role;
use crate::reporter::Reporter;

const BACKEND: &str = "refinement";

/// Bounded retry behaviour for rate-limited requests
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitPolicy {
    /// Maximum number of attempts (including the first)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Wait used when the server sends no usable Retry-After
    #[serde(default = "default_retry_after")]
    pub default_retry_after_seconds: u64,

    /// Upper bound on any single wait, whatever the server asks for
    #[serde(default = "default_max_retry_after")]
    pub max_retry_after_seconds: u64,
}

fn default_max_attempts() -> u32 {
    10
}
fn default_retry_after() -> u64 {
    60
}
fn default_max_retry_after() -> u64 {
    300
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            default_retry_after_seconds: default_retry_after(),
            max_retry_after_seconds: default_max_retry_after(),
        }
    }
}

impl RateLimitPolicy {
    /// Check if another attempt is allowed after `attempt` (1-indexed) was rate limited
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// How long to wait given the server's Retry-After header, capped at
    /// `max_retry_after_seconds`
    pub fn delay(&self, retry_after: Option<&HeaderValue>) -> Duration {
        let requested = retry_after
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after)
            .unwrap_or_else(|| Duration::from_secs(self.default_retry_after_seconds));

        requested.min(Duration::from_secs(self.max_retry_after_seconds))
    }
}

/// Parse a Retry-After value given in (possibly fractional) seconds
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let seconds: f64 = value.trim().parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(seconds).ok()
}

/// Build the instruction sent ahead of the raw caption
pub fn build_prompt(trigger_word: &str, raw_caption: &str, role: Role) -> String {
    let mut prompt = format!(
        "I am providing a text file. The trigger word is \"{}\". ",
        trigger_word
    );

    match role {
        Role::Subject => prompt.push_str(
            "The trigger word refers to a character or subject in the image, such as \
             \"man\", \"boy\", \"figure\". Your task is to replace appropriate \
             subject-related words with the trigger word. ",
        ),
        Role::Style => prompt.push_str(
            "The trigger word refers to the artistic style of the image. Your task is \
             to insert the trigger word where it makes sense, especially in references \
             to the overall style, textures, or aesthetic elements. ",
        ),
    }

    prompt.push_str("\n\n");
    prompt.push_str(raw_caption);
    prompt
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions refinement client
pub struct OpenAiRefiner {
    endpoint: Url,
    api_key: String,
    model: String,
    max_tokens: u32,
    policy: RateLimitPolicy,
    client: reqwest::Client,
    reporter: Arc<dyn Reporter>,
}

impl OpenAiRefiner {
    /// Create a client from refinement settings and an API key
    pub fn new(
        settings: &RefineSettings,
        api_key: impl Into<String>,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self> {
        let base = normalize_base_url(&settings.base_url)?;
        let endpoint = base
            .join("chat/completions")
            .context("Failed to build chat completions URL")?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            endpoint,
            api_key: api_key.into(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            policy: settings.rate_limit.clone(),
            client,
            reporter,
        })
    }

    /// The resolved chat completions URL
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn complete(&self, prompt: &str) -> Result<String, BackendError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.max_tokens,
        };

        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let response = self
                .client
                .post(self.endpoint.clone())
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
                .map_err(|e| BackendError::transport(BACKEND, e))?;

            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                if !self.policy.should_retry(attempt) {
                    return Err(BackendError::RateLimited {
                        backend: BACKEND,
                        attempts: attempt,
                    });
                }

                let delay = self.policy.delay(response.headers().get(RETRY_AFTER));
                self.reporter.warn(&format!(
                    "Rate limit reached (attempt {}/{}). Retrying after {:.1}s",
                    attempt,
                    self.policy.max_attempts,
                    delay.as_secs_f64()
                ));
                tokio::time::sleep(delay).await;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(BackendError::Status {
                    backend: BACKEND,
                    status: status.as_u16(),
                    body: body.trim().to_string(),
                });
            }

            let completion: ChatResponse = response
                .json()
                .await
                .map_err(|e| BackendError::protocol(BACKEND, e.to_string()))?;

            return completion
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .map(|content| content.trim().to_string())
                .filter(|content| !content.is_empty())
                .ok_or(BackendError::Empty { backend: BACKEND });
        }
    }
}

#[async_trait]
impl Refiner for OpenAiRefiner {
    fn name(&self) -> &str {
        "openai"
    }

    async fn refine(
        &self,
        trigger_word: &str,
        raw_caption: &str,
        role: Role,
    ) -> Result<String, BackendError> {
        let prompt = build_prompt(trigger_word, raw_caption, role);

        self.complete(&prompt).await.map_err(|e| {
            self.reporter
                .error(&format!("Error refining text with {}: {}", self.name(), e));
            e
        })
    }
}

/// Parse a base URL and make sure relative joins append to it
pub(crate) fn normalize_base_url(raw: &str) -> Result<Url> {
    let with_slash = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };
    Url::parse(&with_slash).with_context(|| format!("Invalid URL: {}", raw))
}
