//! C5 Judge Subsystem (spec.md §4.5): compares a candidate answer against the base answer and
//! produces a `Judgment`.

pub mod parse;

use crate::cancel::CancelToken;
use crate::errors::codes;
use crate::model::Judgment;
use crate::providers::inference::{ChatMessage, ChatRole, GenerateOptions, InferenceClient};
use parse::{normalize_score, parse_judge_response};
use std::time::Duration;

const EMPTY_REASON_MAX_ATTEMPTS: u32 = 5;
const EMPTY_REASON_RETRY_DELAY: Duration = Duration::from_millis(500);

const SYSTEM_PROMPT: &str = "You are a strict similarity evaluator. You compare two candidate \
answers to the same question and report how similar they are in meaning and content. You do \
not judge correctness, style, or which answer is better, only how closely response B matches \
response A. Respond with a JSON object of the form {\"score\": <integer 1-100>, \"reason\": \
<string>} and nothing else.";

const RESPONSE_SCHEMA: &str = r#"{
  "type": "object",
  "properties": {
    "score": {"type": "integer", "minimum": 1, "maximum": 100},
    "reason": {"type": "string"}
  },
  "required": ["score", "reason"]
}"#;

#[derive(Clone)]
pub struct JudgeService {
    client: InferenceClient,
    model: String,
    ctx_size: u32,
}

impl JudgeService {
    pub fn new(client: InferenceClient, model: impl Into<String>, ctx_size: u32) -> Self {
        Self {
            client,
            model: model.into(),
            ctx_size,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn exists(&self) -> bool {
        self.client.show(&self.model).await.is_ok()
    }

    /// The judge server's reported version, persisted into the ledger's `ollamaJudgeVersion`
    /// identity field (spec.md §3, §6).
    pub async fn client_version(&self) -> anyhow::Result<String> {
        self.client.version().await.map_err(|e| anyhow::anyhow!("{e}"))
    }

    /// Scores `candidate_answer` against `base_answer`. Retries up to
    /// [`EMPTY_REASON_MAX_ATTEMPTS`] times if the parsed reason comes back empty, per spec.md
    /// §4.5's empty-reason retry rule; on final failure the judgment is persisted with an empty
    /// reason and the last raw response kept for diagnostics.
    pub async fn judge(
        &self,
        question: &str,
        base_answer: &str,
        candidate_answer: &str,
        cancel: &CancelToken,
    ) -> anyhow::Result<Judgment> {
        let prompt = build_prompt(question, base_answer, candidate_answer);
        let messages = [
            ChatMessage {
                role: ChatRole::System,
                content: SYSTEM_PROMPT.to_string(),
            },
            ChatMessage {
                role: ChatRole::User,
                content: prompt,
            },
        ];
        let schema: serde_json::Value = serde_json::from_str(RESPONSE_SCHEMA)
            .expect("judge response schema is valid JSON");
        let options = GenerateOptions {
            num_ctx: self.ctx_size,
            ..GenerateOptions::deterministic()
        };

        let mut last_raw: Option<String> = None;

        for attempt in 1..=EMPTY_REASON_MAX_ATTEMPTS {
            cancel.check()?;

            let result = self
                .client
                .chat(&self.model, &messages, &options, Some(&schema))
                .await
                .map_err(|e| {
                    anyhow::anyhow!(
                        "{}: judge model '{}' request failed: {e}",
                        codes::E_JUDGE_MISSING,
                        self.model
                    )
                })?;

            let raw = result.content;
            let parsed = parse_judge_response(&raw);
            last_raw = Some(raw.clone());

            match parsed {
                Some(p) if !p.reason.trim().is_empty() => {
                    return Ok(Judgment {
                        judge_model: self.model.clone(),
                        score: normalize_score(p.score),
                        reason: p.reason,
                        timestamp: chrono::Utc::now(),
                        raw_response: None,
                    });
                }
                Some(p) => {
                    tracing::warn!(attempt, "judge returned empty reason, retrying");
                    if attempt == EMPTY_REASON_MAX_ATTEMPTS {
                        return Ok(Judgment {
                            judge_model: self.model.clone(),
                            score: normalize_score(p.score),
                            reason: String::new(),
                            timestamp: chrono::Utc::now(),
                            raw_response: last_raw,
                        });
                    }
                }
                None => {
                    tracing::warn!(attempt, "judge response had no recoverable score, retrying");
                    if attempt == EMPTY_REASON_MAX_ATTEMPTS {
                        return Ok(Judgment {
                            judge_model: self.model.clone(),
                            score: 1,
                            reason: String::new(),
                            timestamp: chrono::Utc::now(),
                            raw_response: last_raw,
                        });
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(EMPTY_REASON_RETRY_DELAY) => {}
                _ = cancel.cancelled() => return Err(crate::errors::Cancelled.into()),
            }
        }

        unreachable!("loop always returns by the final attempt")
    }
}

fn build_prompt(question: &str, base_answer: &str, candidate_answer: &str) -> String {
    format!(
        "Question (for context only, do not evaluate correctness):\n{question}\n\n\
         --- RESPONSE A ---\n{base_answer}\n--- END RESPONSE A ---\n\n\
         --- RESPONSE B ---\n{candidate_answer}\n--- END RESPONSE B ---\n\n\
         How similar is response B to response A? Respond with the JSON object described."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_contains_delimited_markers() {
        let prompt = build_prompt("q", "a", "b");
        assert!(prompt.contains("--- RESPONSE A ---"));
        assert!(prompt.contains("--- END RESPONSE A ---"));
        assert!(prompt.contains("--- RESPONSE B ---"));
        assert!(prompt.contains("--- END RESPONSE B ---"));
    }
}
