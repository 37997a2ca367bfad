//! Structured run summary (SPEC_FULL.md §10, supplemented feature).
//!
//! Mirrors the teacher's `report::console`/`report::json` split: one data structure, rendered
//! both as a human table (`report::console`) and as JSON. Formatting to HTML/PDF/Markdown stays
//! out of scope per spec.md §1.

use crate::model::ResultsLedger;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct VariantSummary {
    pub tag: String,
    #[serde(rename = "isBase")]
    pub is_base: bool,
    #[serde(rename = "questionsRun")]
    pub questions_run: usize,
    #[serde(rename = "questionsJudged")]
    pub questions_judged: usize,
    #[serde(rename = "averageScore")]
    pub average_score: Option<f64>,
    #[serde(rename = "scoreDeltaVsBase")]
    pub score_delta_vs_base: Option<f64>,
    #[serde(rename = "pulledOnDemand")]
    pub pulled_on_demand: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    #[serde(rename = "testSuiteName")]
    pub test_suite_name: String,
    #[serde(rename = "modelName")]
    pub model_name: String,
    pub variants: Vec<VariantSummary>,
}

impl RunSummary {
    /// Each `Judgment.score` is already a similarity-to-base reading in `[1, 100]`, so the base
    /// variant itself has no score delta to report; a candidate's delta is its distance from a
    /// perfect (100) match, i.e. how far its average similarity score falls short of identity
    /// with the base's answers.
    pub fn from_ledger(ledger: &ResultsLedger) -> Self {
        let variants = ledger
            .results
            .iter()
            .map(|v| {
                let average_score = average_score(v);
                let score_delta_vs_base = if v.is_base {
                    None
                } else {
                    average_score.map(|avg| avg - 100.0)
                };
                VariantSummary {
                    tag: v.tag.clone(),
                    is_base: v.is_base,
                    questions_run: v.question_results.len(),
                    questions_judged: v
                        .question_results
                        .iter()
                        .filter(|q| q.judgment.is_some())
                        .count(),
                    average_score,
                    score_delta_vs_base,
                    pulled_on_demand: v.pulled_on_demand,
                }
            })
            .collect();

        Self {
            test_suite_name: ledger.test_suite_name.clone(),
            model_name: ledger.model_name.clone(),
            variants,
        }
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn average_score(variant: &crate::model::VariantResult) -> Option<f64> {
    let scores: Vec<i32> = variant
        .question_results
        .iter()
        .filter_map(|q| q.judgment.as_ref().map(|j| j.score))
        .collect();
    if scores.is_empty() {
        return None;
    }
    Some(scores.iter().sum::<i32>() as f64 / scores.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GenerationOptions, Judgment, QuestionResult, VariantResult};
    use chrono::Utc;

    fn options() -> GenerationOptions {
        GenerationOptions {
            temperature: 0.0,
            seed: 0,
            top_p: 1.0,
            top_k: 40,
            repeat_penalty: 1.1,
            frequency_penalty: None,
        }
    }

    fn question_result(id: &str, score: Option<i32>) -> QuestionResult {
        QuestionResult {
            question_id: id.into(),
            category_name: "cat".into(),
            prompt: "p".into(),
            answer: "a".into(),
            token_logprobs: vec![],
            prompt_tokens_per_second: 1.0,
            eval_tokens_per_second: 1.0,
            total_tokens: 1,
            context_length: 4096,
            judgment: score.map(|s| Judgment {
                judge_model: "judge".into(),
                score: s,
                reason: "ok".into(),
                timestamp: Utc::now(),
                raw_response: None,
            }),
        }
    }

    #[test]
    fn computes_score_delta_against_base() {
        let ledger = ResultsLedger {
            test_suite_name: "suite".into(),
            model_name: "model".into(),
            repository_url: None,
            osync_version: None,
            ollama_version: None,
            ollama_judge_version: None,
            options: options(),
            results: vec![
                VariantResult {
                    tag: "fp16".into(),
                    full_name: "model:fp16".into(),
                    size_bytes: 1,
                    family: "llama".into(),
                    parameter_size: "8B".into(),
                    quantization_level: "FP16".into(),
                    is_base: true,
                    pulled_on_demand: false,
                    question_results: vec![question_result("c-q1", None)],
                },
                VariantResult {
                    tag: "q4_0".into(),
                    full_name: "model:q4_0".into(),
                    size_bytes: 1,
                    family: "llama".into(),
                    parameter_size: "8B".into(),
                    quantization_level: "Q4_0".into(),
                    is_base: false,
                    pulled_on_demand: false,
                    question_results: vec![question_result("c-q1", Some(80))],
                },
            ],
        };

        let summary = RunSummary::from_ledger(&ledger);
        let base = summary.variants.iter().find(|v| v.tag == "fp16").unwrap();
        assert_eq!(base.score_delta_vs_base, None);

        let q4 = summary.variants.iter().find(|v| v.tag == "q4_0").unwrap();
        assert_eq!(q4.average_score, Some(80.0));
        assert_eq!(q4.score_delta_vs_base, Some(-20.0));
    }
}
