//! C1 Inference Client — issues generation requests to a model server and parses structured
//! and streamed responses (spec.md §4.1, §6).
//!
//! Grounded on the teacher's `providers/llm/openai.rs` (reqwest client struct, JSON body,
//! "read error text on non-2xx" pattern), generalized from one endpoint to the full Ollama-shaped
//! surface and from buffered-JSON to a non-buffered NDJSON stream for `pull`.

use crate::errors::InferenceError;
use crate::model::TokenLogprob;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub seed: i64,
    pub top_p: f32,
    pub top_k: i32,
    pub repeat_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    pub num_predict: u32,
    pub num_ctx: u32,
    pub logprobs: bool,
}

impl GenerateOptions {
    /// Fixed, low-variance options for judge calls, which need a stable reading rather than
    /// creative variation (spec.md §4.5 implies a deterministic judge; no `logprobs` needed).
    pub fn deterministic() -> Self {
        Self {
            temperature: 0.0,
            seed: 0,
            top_p: 1.0,
            top_k: 1,
            repeat_penalty: 1.0,
            frequency_penalty: None,
            num_predict: 512,
            num_ctx: 4096,
            logprobs: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    logprobs: bool,
    options: GenerateOptionsWire,
}

/// Options as sent over the wire: `logprobs` is a top-level request field per spec.md §6,
/// not nested under `options`, so it is stripped out of the nested struct here.
#[derive(Debug, Clone, Serialize)]
struct GenerateOptionsWire {
    temperature: f32,
    seed: i64,
    top_p: f32,
    top_k: i32,
    repeat_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    num_predict: u32,
    num_ctx: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateResponseWire {
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    logprobs: Vec<LogprobWire>,
    #[serde(default)]
    total_duration: u64,
    #[serde(default)]
    load_duration: u64,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    prompt_eval_duration: u64,
    #[serde(default)]
    eval_count: u64,
    #[serde(default)]
    eval_duration: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct LogprobWire {
    token: String,
    logprob: f64,
    #[serde(default)]
    bytes: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct ServerTimings {
    pub total_ns: u64,
    pub load_ns: u64,
    pub prompt_eval_count: u64,
    pub prompt_eval_duration_ns: u64,
    pub eval_count: u64,
    pub eval_duration_ns: u64,
}

#[derive(Debug, Clone)]
pub struct GenerateResult {
    pub response: String,
    pub logprobs: Vec<TokenLogprob>,
    pub timings: ServerTimings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl Serialize for ChatRole {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let s = match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        };
        serializer.serialize_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ChatResult {
    pub content: String,
    pub timings: ServerTimings,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponseWire {
    message: ChatMessageWire,
    #[serde(default)]
    total_duration: u64,
    #[serde(default)]
    load_duration: u64,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    prompt_eval_duration: u64,
    #[serde(default)]
    eval_count: u64,
    #[serde(default)]
    eval_duration: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatMessageWire {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullEvent {
    pub status: String,
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub completed: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagEntry {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub digest: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ShowDetails {
    #[serde(default)]
    pub family: String,
    #[serde(default)]
    pub parameter_size: String,
    #[serde(default)]
    pub quantization_level: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ShowResponseWire {
    details: ShowDetails,
}

#[derive(Debug, Clone, Deserialize)]
struct VersionResponseWire {
    version: String,
}

/// One HTTP client per server (test server, judge server), shared via `Arc` by the orchestrator.
#[derive(Clone)]
pub struct InferenceClient {
    base_url: String,
    http: reqwest::Client,
}

impl InferenceClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Classifies a non-2xx response per spec.md §4.1: all network failures, 5xx, and empty
    /// payloads are retryable; 4xx other than 404 is not.
    fn classify_status(status: reqwest::StatusCode, body: String) -> InferenceError {
        if status.as_u16() == 404 {
            InferenceError::NotFound(body)
        } else if status.is_server_error() {
            InferenceError::Transient(format!("{status}: {body}"))
        } else if status.is_client_error() {
            InferenceError::Client(status.as_u16(), body)
        } else {
            InferenceError::Transient(format!("{status}: {body}"))
        }
    }

    pub async fn generate(
        &self,
        model: &str,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<GenerateResult, InferenceError> {
        let body = GenerateRequest {
            model,
            prompt,
            stream: false,
            logprobs: options.logprobs,
            options: GenerateOptionsWire {
                temperature: options.temperature,
                seed: options.seed,
                top_p: options.top_p,
                top_k: options.top_k,
                repeat_penalty: options.repeat_penalty,
                frequency_penalty: options.frequency_penalty,
                num_predict: options.num_predict,
                num_ctx: options.num_ctx,
            },
        };

        let resp = self
            .http
            .post(self.url("/api/generate"))
            .json(&body)
            .send()
            .await
            .map_err(|e| InferenceError::Transient(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, text));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| InferenceError::Transient(e.to_string()))?;
        if text.trim().is_empty() {
            return Err(InferenceError::Transient("empty response body".into()));
        }

        let wire: GenerateResponseWire = serde_json::from_str(&text)
            .map_err(|e| InferenceError::Transient(format!("malformed JSON: {e}")))?;

        if options.logprobs && wire.logprobs.is_empty() {
            return Err(InferenceError::Unsupported(
                "server returned no logprobs though logprobs=true was requested; \
                 upgrade the inference server to a version that supports logprobs"
                    .to_string(),
            ));
        }

        Ok(GenerateResult {
            response: wire.response,
            logprobs: wire
                .logprobs
                .into_iter()
                .map(|l| TokenLogprob {
                    token: l.token,
                    logprob: l.logprob,
                    bytes: l.bytes,
                })
                .collect(),
            timings: ServerTimings {
                total_ns: wire.total_duration,
                load_ns: wire.load_duration,
                prompt_eval_count: wire.prompt_eval_count,
                prompt_eval_duration_ns: wire.prompt_eval_duration,
                eval_count: wire.eval_count,
                eval_duration_ns: wire.eval_duration,
            },
        })
    }

    pub async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: &GenerateOptions,
        schema: Option<&serde_json::Value>,
    ) -> Result<ChatResult, InferenceError> {
        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": false,
            "options": GenerateOptionsWire {
                temperature: options.temperature,
                seed: options.seed,
                top_p: options.top_p,
                top_k: options.top_k,
                repeat_penalty: options.repeat_penalty,
                frequency_penalty: options.frequency_penalty,
                num_predict: options.num_predict,
                num_ctx: options.num_ctx,
            },
        });
        if let Some(schema) = schema {
            body["format"] = schema.clone();
        }

        let resp = self
            .http
            .post(self.url("/api/chat"))
            .json(&body)
            .send()
            .await
            .map_err(|e| InferenceError::Transient(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, text));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| InferenceError::Transient(e.to_string()))?;
        if text.trim().is_empty() {
            return Err(InferenceError::Transient("empty response body".into()));
        }

        let wire: ChatResponseWire = serde_json::from_str(&text)
            .map_err(|e| InferenceError::Transient(format!("malformed JSON: {e}")))?;

        Ok(ChatResult {
            content: wire.message.content,
            timings: ServerTimings {
                total_ns: wire.total_duration,
                load_ns: wire.load_duration,
                prompt_eval_count: wire.prompt_eval_count,
                prompt_eval_duration_ns: wire.prompt_eval_duration,
                eval_count: wire.eval_count,
                eval_duration_ns: wire.eval_duration,
            },
        })
    }

    /// A lazy, finite, non-restartable stream of NDJSON pull events. The body is consumed
    /// incrementally via `bytes_stream()` so progress is observed while the connection is live,
    /// per spec.md §4.1's "must be consumable while the HTTP connection is live" contract.
    pub async fn pull(
        &self,
        model: &str,
    ) -> Result<impl futures_util::Stream<Item = anyhow::Result<PullEvent>>, InferenceError> {
        let resp = self
            .http
            .post(self.url("/api/pull"))
            .json(&serde_json::json!({ "name": model, "stream": true }))
            .send()
            .await
            .map_err(|e| InferenceError::Transient(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, text));
        }

        Ok(ndjson_lines(resp.bytes_stream()).map(|line_result| {
            let line = line_result?;
            let event: PullEvent = serde_json::from_str(&line)
                .map_err(|e| anyhow::anyhow!("malformed pull event: {e}"))?;
            if let Some(err) = &event.error {
                return Err(anyhow::anyhow!("pull error: {err}"));
            }
            Ok(event)
        }))
    }

    pub async fn delete(&self, model: &str) -> Result<(), InferenceError> {
        let resp = self
            .http
            .delete(self.url("/api/delete"))
            .json(&serde_json::json!({ "model": model }))
            .send()
            .await
            .map_err(|e| InferenceError::Transient(e.to_string()))?;

        let status = resp.status();
        // 404 is treated as success per spec.md §6.
        if status.is_success() || status.as_u16() == 404 {
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        Err(Self::classify_status(status, text))
    }

    pub async fn list(&self) -> Result<Vec<TagEntry>, InferenceError> {
        #[derive(Deserialize)]
        struct TagsWire {
            #[serde(default)]
            models: Vec<TagEntry>,
        }

        let resp = self
            .http
            .get(self.url("/api/tags"))
            .send()
            .await
            .map_err(|e| InferenceError::Transient(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, text));
        }

        let wire: TagsWire = resp
            .json()
            .await
            .map_err(|e| InferenceError::Transient(e.to_string()))?;
        Ok(wire.models)
    }

    pub async fn show(&self, name: &str) -> Result<ShowDetails, InferenceError> {
        let resp = self
            .http
            .post(self.url("/api/show"))
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await
            .map_err(|e| InferenceError::Transient(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, text));
        }

        let wire: ShowResponseWire = resp
            .json()
            .await
            .map_err(|e| InferenceError::Transient(e.to_string()))?;
        Ok(wire.details)
    }

    pub async fn version(&self) -> Result<String, InferenceError> {
        let resp = self
            .http
            .get(self.url("/api/version"))
            .send()
            .await
            .map_err(|e| InferenceError::Transient(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, text));
        }

        let wire: VersionResponseWire = resp
            .json()
            .await
            .map_err(|e| InferenceError::Transient(e.to_string()))?;
        Ok(wire.version)
    }
}

/// Splits a byte stream on `\n` into complete lines, buffering a partial trailing line across
/// chunks. Blank lines are skipped (Ollama's NDJSON stream may emit keep-alive newlines).
///
/// Implemented with `futures_util::stream::unfold` rather than an `async fn` generator so the
/// body is forwarded to the parser incrementally as bytes arrive, not buffered end-to-end
/// (spec.md §4.1, §9 "Streaming HTTP").
fn ndjson_lines(
    byte_stream: impl futures_util::Stream<Item = reqwest::Result<bytes::Bytes>> + Unpin,
) -> impl futures_util::Stream<Item = anyhow::Result<String>> {
    struct State<S> {
        stream: S,
        buf: Vec<u8>,
        pending: std::collections::VecDeque<String>,
        done: bool,
    }

    let initial = State {
        stream: byte_stream,
        buf: Vec::new(),
        pending: std::collections::VecDeque::new(),
        done: false,
    };

    futures_util::stream::unfold(initial, |mut state| async move {
        loop {
            if let Some(line) = state.pending.pop_front() {
                return Some((Ok(line), state));
            }
            if state.done {
                return None;
            }

            match state.stream.next().await {
                Some(Ok(chunk)) => {
                    state.buf.extend_from_slice(&chunk);
                    while let Some(pos) = state.buf.iter().position(|&b| b == b'\n') {
                        let line: Vec<u8> = state.buf.drain(..=pos).collect();
                        let line = &line[..line.len() - 1];
                        if line.iter().all(|b| b.is_ascii_whitespace()) {
                            continue;
                        }
                        match std::str::from_utf8(line) {
                            Ok(s) => state.pending.push_back(s.to_string()),
                            Err(e) => return Some((Err(anyhow::anyhow!("non-utf8 line: {e}")), state)),
                        }
                    }
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(anyhow::anyhow!("stream read error: {e}")), state));
                }
                None => {
                    state.done = true;
                    if !state.buf.iter().all(|b| b.is_ascii_whitespace()) {
                        if let Ok(s) = std::str::from_utf8(&state.buf) {
                            let line = s.to_string();
                            state.buf.clear();
                            return Some((Ok(line), state));
                        }
                    }
                }
            }
        }
    })
}
