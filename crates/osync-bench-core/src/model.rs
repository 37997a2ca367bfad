//! Data model for test suites, resolved variants, and the results ledger.

use serde::{Deserialize, Serialize};

/// Immutable input: loaded once at startup, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuite {
    pub name: String,
    #[serde(rename = "defaultNumPredict")]
    pub default_num_predict: u32,
    #[serde(rename = "defaultContextLength")]
    pub default_context_length: u32,
    pub categories: Vec<Category>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    #[serde(default, rename = "contextLength")]
    pub context_length: Option<u32>,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub prompt: String,
    #[serde(default, rename = "contextLength")]
    pub context_length: Option<u32>,
}

impl TestSuite {
    /// Total question count across all categories, used for the resume/completeness predicate.
    pub fn question_count(&self) -> usize {
        self.categories.iter().map(|c| c.questions.len()).sum()
    }

    pub fn validate(&self) -> Result<(), crate::errors::ConfigError> {
        if self.categories.is_empty() {
            return Err(crate::errors::ConfigError(format!(
                "suite '{}' has no categories",
                self.name
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for cat in &self.categories {
            for q in &cat.questions {
                let qid = stable_question_id(&cat.name, &q.id);
                if !seen.insert(qid.clone()) {
                    return Err(crate::errors::ConfigError(format!(
                        "duplicate question identifier '{}' in suite '{}'",
                        qid, self.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// `"{categoryId}-{questionId}"`, the stable identifier used to key resume/skip logic.
pub fn stable_question_id(category_id: &str, question_id: &str) -> String {
    format!("{category_id}-{question_id}")
}

/// Effective context length resolved by precedence question > category > suite.
pub fn effective_context_length(suite: &TestSuite, category: &Category, question: &Question) -> u32 {
    question
        .context_length
        .or(category.context_length)
        .unwrap_or(suite.default_context_length)
}

/// User-supplied reference to a candidate model. May contain `*` wildcards; expanded once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariantRef(pub String);

impl VariantRef {
    pub fn has_wildcard(&self) -> bool {
        self.0.contains('*')
    }
}

/// Resolved from the inference server via `show`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VariantMetadata {
    pub family: String,
    #[serde(rename = "parameterSize")]
    pub parameter_size: String,
    #[serde(rename = "quantizationLevel")]
    pub quantization_level: String,
    #[serde(rename = "sizeBytes")]
    pub size_bytes: u64,
}

/// Regex-derives a quantization label from a variant tag (e.g. `llama3:q4_k_m` -> `Q4_K_M`) for
/// servers whose `show` response omits `quantization_level` (spec.md §3).
pub fn derive_quantization_from_tag(tag: &str) -> Option<String> {
    use std::sync::OnceLock;
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        regex::Regex::new(r"(?i)(q[2-8](?:_[0-9a-z]+)*|fp16|fp32|bf16|f16|f32)")
            .expect("valid regex")
    });
    re.captures(tag)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_uppercase())
}

/// An ordered `(token, logprob, bytes?)` triple as returned by the inference server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenLogprob {
    pub token: String,
    pub logprob: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<Vec<u8>>,
}

/// Judge model identifier, similarity score, free-text reason, and diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Judgment {
    #[serde(rename = "judgeModel")]
    pub judge_model: String,
    /// Always in `[1, 100]` — see `judge::parse::normalize_score`.
    pub score: i32,
    pub reason: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "rawResponse")]
    pub raw_response: Option<String>,
}

/// Per-question record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionResult {
    #[serde(rename = "questionId")]
    pub question_id: String,
    #[serde(rename = "categoryName")]
    pub category_name: String,
    pub prompt: String,
    pub answer: String,
    #[serde(default, rename = "tokenLogprobs")]
    pub token_logprobs: Vec<TokenLogprob>,
    #[serde(rename = "promptTokensPerSecond")]
    pub prompt_tokens_per_second: f64,
    #[serde(rename = "evalTokensPerSecond")]
    pub eval_tokens_per_second: f64,
    #[serde(rename = "totalTokens")]
    pub total_tokens: u64,
    #[serde(rename = "contextLength")]
    pub context_length: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judgment: Option<Judgment>,
}

/// Per-variant aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantResult {
    pub tag: String,
    #[serde(rename = "fullName")]
    pub full_name: String,
    #[serde(rename = "sizeBytes")]
    pub size_bytes: u64,
    pub family: String,
    #[serde(rename = "parameterSize")]
    pub parameter_size: String,
    #[serde(rename = "quantizationLevel")]
    pub quantization_level: String,
    #[serde(rename = "isBase")]
    pub is_base: bool,
    #[serde(rename = "pulledOnDemand")]
    pub pulled_on_demand: bool,
    #[serde(rename = "questionResults")]
    pub question_results: Vec<QuestionResult>,
}

impl VariantResult {
    /// A variant is complete iff it has one `QuestionResult` per suite question.
    pub fn is_complete(&self, suite: &TestSuite) -> bool {
        self.question_results.len() == suite.question_count()
    }

    pub fn has_question(&self, question_id: &str) -> bool {
        self.question_results.iter().any(|q| q.question_id == question_id)
    }
}

/// Generation options snapshot, echoed into the ledger for reproducibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub seed: i64,
    #[serde(rename = "topP")]
    pub top_p: f32,
    #[serde(rename = "topK")]
    pub top_k: i32,
    #[serde(rename = "repeatPenalty")]
    pub repeat_penalty: f32,
    #[serde(default, rename = "frequencyPenalty")]
    pub frequency_penalty: Option<f32>,
}

/// The persisted root: `{model}.qc.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsLedger {
    #[serde(rename = "testSuiteName")]
    pub test_suite_name: String,
    #[serde(rename = "modelName")]
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "repositoryUrl")]
    pub repository_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "osyncVersion")]
    pub osync_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "ollamaVersion")]
    pub ollama_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "ollamaJudgeVersion")]
    pub ollama_judge_version: Option<String>,
    pub options: GenerationOptions,
    pub results: Vec<VariantResult>,
}

impl ResultsLedger {
    /// At most one `VariantResult` may be marked `isBase = true`.
    pub fn base_variant(&self) -> Option<&VariantResult> {
        self.results.iter().find(|v| v.is_base)
    }

    pub fn base_variant_mut(&mut self) -> Option<&mut VariantResult> {
        self.results.iter_mut().find(|v| v.is_base)
    }

    pub fn variant_mut(&mut self, tag: &str) -> Option<&mut VariantResult> {
        self.results.iter_mut().find(|v| v.tag == tag)
    }

    pub fn variant(&self, tag: &str) -> Option<&VariantResult> {
        self.results.iter().find(|v| v.tag == tag)
    }

    /// Self-repair: if no entry is marked base but `base_tag` is derivable, mark it.
    ///
    /// Older ledgers on disk predate the `isBase` flag; this is run once on load so the
    /// invariant "at most one base" holds without rejecting those files.
    pub fn repair_base_flag(&mut self, base_tag: &str) {
        if self.results.iter().any(|v| v.is_base) {
            return;
        }
        if let Some(v) = self.results.iter_mut().find(|v| v.tag == base_tag) {
            v.is_base = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_question_id_joins_category_and_question() {
        assert_eq!(stable_question_id("reasoning", "q1"), "reasoning-q1");
    }

    #[test]
    fn context_length_precedence_question_beats_category_beats_suite() {
        let suite = TestSuite {
            name: "s".into(),
            default_num_predict: 128,
            default_context_length: 4096,
            categories: vec![],
        };
        let category = Category {
            name: "c".into(),
            context_length: Some(8192),
            questions: vec![],
        };
        let question_override = Question {
            id: "q1".into(),
            prompt: "p".into(),
            context_length: Some(16384),
        };
        let question_no_override = Question {
            id: "q2".into(),
            prompt: "p".into(),
            context_length: None,
        };
        assert_eq!(
            effective_context_length(&suite, &category, &question_override),
            16384
        );
        assert_eq!(
            effective_context_length(&suite, &category, &question_no_override),
            8192
        );
    }

    #[test]
    fn derives_quantization_label_from_tag() {
        assert_eq!(derive_quantization_from_tag("llama3:q4_k_m"), Some("Q4_K_M".into()));
        assert_eq!(derive_quantization_from_tag("llama3:fp16"), Some("FP16".into()));
        assert_eq!(derive_quantization_from_tag("llama3:latest"), None);
    }

    #[test]
    fn variant_is_complete_iff_all_questions_present() {
        let suite = TestSuite {
            name: "s".into(),
            default_num_predict: 128,
            default_context_length: 4096,
            categories: vec![Category {
                name: "c".into(),
                context_length: None,
                questions: vec![
                    Question { id: "q1".into(), prompt: "p".into(), context_length: None },
                    Question { id: "q2".into(), prompt: "p".into(), context_length: None },
                ],
            }],
        };
        let mut variant = VariantResult {
            tag: "fp16".into(),
            full_name: "model:fp16".into(),
            size_bytes: 0,
            family: String::new(),
            parameter_size: String::new(),
            quantization_level: String::new(),
            is_base: true,
            pulled_on_demand: false,
            question_results: vec![],
        };
        assert!(!variant.is_complete(&suite));
        variant.question_results.push(QuestionResult {
            question_id: "c-q1".into(),
            category_name: "c".into(),
            prompt: "p".into(),
            answer: "a".into(),
            token_logprobs: vec![],
            prompt_tokens_per_second: 1.0,
            eval_tokens_per_second: 1.0,
            total_tokens: 1,
            context_length: 4096,
            judgment: None,
        });
        assert!(!variant.is_complete(&suite));
        variant.question_results.push(QuestionResult {
            question_id: "c-q2".into(),
            category_name: "c".into(),
            prompt: "p".into(),
            answer: "a".into(),
            token_logprobs: vec![],
            prompt_tokens_per_second: 1.0,
            eval_tokens_per_second: 1.0,
            total_tokens: 1,
            context_length: 4096,
            judgment: None,
        });
        assert!(variant.is_complete(&suite));
    }
}
