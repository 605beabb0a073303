//! Blocking HTTP client for an OpenAI-compatible chat-completions endpoint.
//!
//! Implements all four agent traits. Each call sends a system + user message
//! pair at temperature 0, extracts the first JSON object from the reply, and
//! validates it against the agent's response schema. A schema-invalid reply
//! gets exactly one automatic retry with a "JSON only" reminder appended.

use std::thread;
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::prompts;
use super::{
    AgentOutcome, HeadAgent, HeadOutput, ParsingAgent, ParsingOutput, RefineAgent, RefineOutput,
    RefineRequest, RoutingAgent, RoutingOutput,
};

/// Default model when `LOGLOOM_MODEL` is unset or names a retired id.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
/// Default API root when `LOGLOOM_BASE_URL` is unset.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const REQUEST_TIMEOUT_SECS: u64 = 60;
const CONNECT_TIMEOUT_SECS: u64 = 5;
const TEMPERATURE: f32 = 0.0;

/// Maximum number of retry attempts after a 429 response.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;
/// Minimum backoff between rate-limit retries (seconds).
const BASE_BACKOFF_SECS: u64 = 1;

/// Model ids that used to be accepted and now map to [`DEFAULT_MODEL`].
const DEPRECATED_MODELS: &[&str] = &["gpt-3.5-turbo", "gpt-4", "gpt-4-turbo", "gpt-4-32k"];

/// Connection settings for the LM endpoint.
#[derive(Debug, Clone)]
pub struct LmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl LmConfig {
    /// Read LM settings from the environment.
    ///
    /// Returns `None` when no credential is present (`LOGLOOM_API_KEY`, then
    /// `OPENAI_API_KEY`) — callers decide whether that is an error; in
    /// match-only mode it is not.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("LOGLOOM_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok()
            .filter(|k| !k.is_empty())?;
        let base_url = std::env::var("LOGLOOM_BASE_URL")
            .ok()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("LOGLOOM_MODEL")
            .ok()
            .filter(|m| !m.is_empty())
            .map_or_else(|| DEFAULT_MODEL.to_string(), |m| resolve_model(&m));
        Some(Self {
            api_key,
            base_url,
            model,
        })
    }
}

/// Map retired model ids onto the current default, keeping everything else.
fn resolve_model(raw: &str) -> String {
    if DEPRECATED_MODELS.contains(&raw) {
        DEFAULT_MODEL.to_string()
    } else {
        raw.to_string()
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// The production agent suite.
pub struct LmClient {
    client: reqwest::blocking::Client,
    config: LmConfig,
}

impl LmClient {
    /// Build a client with fixed request/connect timeouts.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: LmConfig) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| anyhow::anyhow!("could not build HTTP client: {e}"))?;
        Ok(Self { client, config })
    }

    /// One chat completion round-trip, with rate-limit retry.
    fn complete(&self, system: &str, user: &str) -> anyhow::Result<String> {
        with_rate_limit_retry(|| {
            let body = serde_json::json!({
                "model": self.config.model,
                "temperature": TEMPERATURE,
                "messages": [
                    { "role": "system", "content": system },
                    { "role": "user", "content": user },
                ],
            });
            let response = self
                .client
                .post(format!("{}/chat/completions", self.config.base_url))
                .bearer_auth(&self.config.api_key)
                .json(&body)
                .send()
                .context("send chat completion request")?;

            let status = response.status();
            if status.as_u16() == 429 {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(BASE_BACKOFF_SECS);
                anyhow::bail!("rate limit exceeded — try again in {retry_after}s (HTTP 429)");
            }
            if status.as_u16() == 401 || status.as_u16() == 403 {
                anyhow::bail!("authentication rejected (HTTP {status}) — check LOGLOOM_API_KEY");
            }
            if !status.is_success() {
                let text = response.text().unwrap_or_default();
                anyhow::bail!("LM endpoint returned HTTP {status}: {text}");
            }

            let parsed: ChatResponse = response.json().context("decode chat completion body")?;
            parsed
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .ok_or_else(|| anyhow::anyhow!("chat completion had no choices"))
        })
    }

    /// Run one agent call: complete, extract JSON, validate the schema, and
    /// retry once with a reminder when validation fails.
    fn request<T: DeserializeOwned>(&self, system: &str, user: &str) -> AgentOutcome<T> {
        let first = match self.complete(system, user) {
            Ok(text) => text,
            Err(e) => return transport_outcome(&e),
        };
        match parse_reply::<T>(&first) {
            Ok(value) => AgentOutcome::Success(value),
            Err(first_err) => {
                let reminder = format!("{user}\n\nRespond with a single JSON object only, no prose.");
                match self.complete(system, &reminder) {
                    Ok(text) => match parse_reply::<T>(&text) {
                        Ok(value) => AgentOutcome::Success(value),
                        Err(second_err) => AgentOutcome::Retryable {
                            issues: vec!["response failed schema validation twice".to_string()],
                            diagnostics: Some(format!("{first_err}; then {second_err}")),
                        },
                    },
                    Err(e) => transport_outcome(&e),
                }
            }
        }
    }
}

/// Map a transport error onto the outcome envelope.
///
/// Authentication failures are fatal (retrying cannot help); everything else
/// — timeouts, 5xx, exhausted rate-limit retries — is retryable.
fn transport_outcome<T>(e: &anyhow::Error) -> AgentOutcome<T> {
    let msg = format!("{e:#}");
    if msg.contains("authentication rejected") {
        AgentOutcome::Fatal(vec![msg])
    } else {
        AgentOutcome::Retryable {
            issues: vec![msg],
            diagnostics: None,
        }
    }
}

/// Execute `f` with exponential backoff plus jitter on HTTP 429 responses.
///
/// Retries up to 3 times with delays of 1 s, 2 s, 4 s (or the server's
/// `Retry-After` when larger) plus 0–500 ms of jitter so simultaneous
/// clients do not retry in lockstep.
fn with_rate_limit_retry<T, F>(mut f: F) -> anyhow::Result<T>
where
    F: FnMut() -> anyhow::Result<T>,
{
    let mut attempt = 0u32;
    loop {
        match f() {
            Ok(val) => return Ok(val),
            Err(e) => {
                if !is_rate_limited(&e) || attempt >= MAX_RATE_LIMIT_RETRIES {
                    return Err(e);
                }
                let backoff = parse_retry_after(&e)
                    .unwrap_or(0)
                    .max(BASE_BACKOFF_SECS << attempt);
                attempt += 1;
                thread::sleep(Duration::from_secs(backoff) + Duration::from_millis(jitter()));
            }
        }
    }
}

/// Pseudo-random jitter in the range 0–499 ms.
fn jitter() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    u64::from(nanos % 500)
}

fn is_rate_limited(err: &anyhow::Error) -> bool {
    err.to_string().contains("HTTP 429")
}

fn parse_retry_after(err: &anyhow::Error) -> Option<u64> {
    let msg = err.to_string();
    // Format: "rate limit exceeded — try again in Ns (HTTP 429)"
    msg.split("try again in ")
        .nth(1)?
        .split('s')
        .next()?
        .parse()
        .ok()
}

/// Pull the first JSON object out of a model reply and deserialize it.
///
/// Tolerates Markdown code fences and prose around the object.
fn parse_reply<T: DeserializeOwned>(reply: &str) -> Result<T, String> {
    let json = extract_json(reply).ok_or_else(|| "no JSON object in response".to_string())?;
    serde_json::from_str(json).map_err(|e| e.to_string())
}

fn extract_json(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&reply[start..=end])
}

impl RoutingAgent for LmClient {
    fn classify(&self, samples: &[String]) -> AgentOutcome<RoutingOutput> {
        self.request(&prompts::routing_system(), &prompts::routing_user(samples))
    }
}

impl ParsingAgent for LmClient {
    fn derive_template(&self, line: &str) -> AgentOutcome<ParsingOutput> {
        self.request(&prompts::parsing_system(), &prompts::parsing_user(line))
    }
}

impl RefineAgent for LmClient {
    fn refine(&self, request: &RefineRequest<'_>) -> AgentOutcome<RefineOutput> {
        self.request(&prompts::refine_system(), &prompts::refine_user(request))
    }
}

impl HeadAgent for LmClient {
    fn derive_head(&self, samples: &[String], previous: Option<&str>) -> AgentOutcome<HeadOutput> {
        self.request(&prompts::head_system(), &prompts::head_user(samples, previous))
    }
}
