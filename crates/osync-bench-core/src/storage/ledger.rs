//! C3 Results Ledger — load/save a versioned JSON document with an atomic write and
//! merge-on-resume (spec.md §4.3).
//!
//! Grounded on the teacher's `baseline.rs` (`Baseline::load`/`save`: JSON file round-trip via
//! `serde_json::{from_reader, to_writer_pretty}`, schema-version/suite checks before use), here
//! applied to the benchmark results ledger and given atomic temp-file-and-rename semantics
//! per spec.md §4.3's "every structural change must pass through save; saves are idempotent".

use crate::errors::{codes, LedgerError};
use crate::model::{GenerationOptions, ResultsLedger};
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct Ledger {
    path: PathBuf,
    pub doc: ResultsLedger,
}

impl Ledger {
    /// Loads an existing ledger, validating it matches the current run; or creates a fresh one.
    pub fn load_or_create(
        path: &Path,
        test_suite_name: &str,
        model_name: &str,
        base_tag: &str,
        options: GenerationOptions,
    ) -> Result<Self, LedgerError> {
        if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| LedgerError(format!("failed to read ledger {}: {}", path.display(), e)))?;
            let mut doc: ResultsLedger = serde_json::from_str(&raw)
                .map_err(|e| LedgerError(format!("failed to parse ledger JSON: {e}")))?;

            if doc.test_suite_name != test_suite_name {
                return Err(LedgerError(format!(
                    "{}: ledger test suite '{}' does not match current run '{}'",
                    codes::E_LEDGER_MISMATCH, doc.test_suite_name, test_suite_name
                )));
            }
            if doc.model_name != model_name {
                return Err(LedgerError(format!(
                    "{}: ledger model name '{}' does not match current run '{}'",
                    codes::E_LEDGER_MISMATCH, doc.model_name, model_name
                )));
            }

            doc.repair_base_flag(base_tag);

            Ok(Self {
                path: path.to_path_buf(),
                doc,
            })
        } else {
            Ok(Self {
                path: path.to_path_buf(),
                doc: ResultsLedger {
                    test_suite_name: test_suite_name.to_string(),
                    model_name: model_name.to_string(),
                    repository_url: None,
                    osync_version: None,
                    ollama_version: None,
                    ollama_judge_version: None,
                    options,
                    results: Vec::new(),
                },
            })
        }
    }

    /// Writes to a temporary sibling file and renames atomically over the final path so a crash
    /// mid-write never corrupts the previous ledger (spec.md §4.3).
    pub fn save(&self) -> Result<(), LedgerError> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        let file_name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("ledger.json");
        let tmp_path = parent.join(format!(".{file_name}.tmp"));

        let json = serde_json::to_string_pretty(&self.doc)
            .map_err(|e| LedgerError(format!("failed to serialize ledger: {e}")))?;

        {
            let mut f = std::fs::File::create(&tmp_path)
                .map_err(|e| LedgerError(format!("failed to create temp ledger file: {e}")))?;
            f.write_all(json.as_bytes())
                .map_err(|e| LedgerError(format!("failed to write temp ledger file: {e}")))?;
            f.sync_all()
                .map_err(|e| LedgerError(format!("failed to flush temp ledger file: {e}")))?;
        }

        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| LedgerError(format!("failed to rename ledger into place: {e}")))?;
        Ok(())
    }

    /// The resume predicate: a variant is complete iff it has one `QuestionResult` per suite
    /// question (spec.md §3).
    pub fn is_variant_complete(&self, tag: &str, suite_question_count: usize) -> bool {
        self.doc
            .variant(tag)
            .map(|v| v.question_results.len() == suite_question_count)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{QuestionResult, VariantResult};

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

    #[test]
    fn creates_fresh_ledger_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.qc.json");
        let ledger = Ledger::load_or_create(&path, "suite", "model", "fp16", options()).unwrap();
        assert!(ledger.doc.results.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.qc.json");
        let mut ledger = Ledger::load_or_create(&path, "suite", "model", "fp16", options()).unwrap();
        ledger.doc.results.push(VariantResult {
            tag: "fp16".into(),
            full_name: "model:fp16".into(),
            size_bytes: 123,
            family: "llama".into(),
            parameter_size: "8B".into(),
            quantization_level: "FP16".into(),
            is_base: true,
            pulled_on_demand: false,
            question_results: vec![],
        });
        ledger.save().unwrap();

        let reloaded = Ledger::load_or_create(&path, "suite", "model", "fp16", options()).unwrap();
        assert_eq!(reloaded.doc.results.len(), 1);
        assert!(reloaded.doc.base_variant().is_some());
    }

    #[test]
    fn save_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.qc.json");
        let ledger = Ledger::load_or_create(&path, "suite", "model", "fp16", options()).unwrap();
        ledger.save().unwrap();
        let first = std::fs::read_to_string(&path).unwrap();
        ledger.save().unwrap();
        let second = std::fs::read_to_string(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_mismatched_test_suite_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.qc.json");
        let ledger = Ledger::load_or_create(&path, "suite-a", "model", "fp16", options()).unwrap();
        ledger.save().unwrap();

        let err = Ledger::load_or_create(&path, "suite-b", "model", "fp16", options()).unwrap_err();
        assert!(err.0.contains("test suite"));
    }

    #[test]
    fn rejects_mismatched_model_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.qc.json");
        let ledger = Ledger::load_or_create(&path, "suite", "llama3", "fp16", options()).unwrap();
        ledger.save().unwrap();

        let err = Ledger::load_or_create(&path, "suite", "mistral", "fp16", options()).unwrap_err();
        assert!(err.0.contains("model name"));
    }

    #[test]
    fn self_repairs_missing_base_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.qc.json");
        let mut ledger = Ledger::load_or_create(&path, "suite", "model", "fp16", options()).unwrap();
        ledger.doc.results.push(VariantResult {
            tag: "fp16".into(),
            full_name: "model:fp16".into(),
            size_bytes: 1,
            family: "llama".into(),
            parameter_size: "8B".into(),
            quantization_level: "FP16".into(),
            is_base: false,
            pulled_on_demand: false,
            question_results: vec![],
        });
        ledger.save().unwrap();

        let reloaded = Ledger::load_or_create(&path, "suite", "model", "fp16", options()).unwrap();
        assert!(reloaded.doc.base_variant().is_some());
    }

    #[test]
    fn merge_on_resume_extends_question_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.qc.json");
        let mut ledger = Ledger::load_or_create(&path, "suite", "model", "fp16", options()).unwrap();
        ledger.doc.results.push(VariantResult {
            tag: "q4_0".into(),
            full_name: "model:q4_0".into(),
            size_bytes: 1,
            family: "llama".into(),
            parameter_size: "8B".into(),
            quantization_level: "Q4_0".into(),
            is_base: false,
            pulled_on_demand: false,
            question_results: vec![QuestionResult {
                question_id: "cat-q1".into(),
                category_name: "cat".into(),
                prompt: "p".into(),
                answer: "a".into(),
                token_logprobs: vec![],
                prompt_tokens_per_second: 1.0,
                eval_tokens_per_second: 1.0,
                total_tokens: 1,
                context_length: 4096,
                judgment: None,
            }],
        });

        let variant = ledger.doc.variant_mut("q4_0").unwrap();
        variant.question_results.push(QuestionResult {
            question_id: "cat-q2".into(),
            category_name: "cat".into(),
            prompt: "p2".into(),
            answer: "a2".into(),
            token_logprobs: vec![],
            prompt_tokens_per_second: 1.0,
            eval_tokens_per_second: 1.0,
            total_tokens: 1,
            context_length: 4096,
            judgment: None,
        });

        assert_eq!(ledger.doc.variant("q4_0").unwrap().question_results.len(), 2);
    }
}
