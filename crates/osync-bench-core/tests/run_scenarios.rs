//! Cross-module scenario tests for the orchestrator (spec.md §8): resume-after-kill, on-demand
//! pull gating, and incompatible-ledger abort. Pure-function behavior (judge parsing, ledger
//! merge mechanics, score normalization) is covered inline next to each module instead.

use osync_bench_core::config::{JudgeMode, RunConfig};
use osync_bench_core::{run, RunOutcome};
use serde_json::json;
use std::io::Write;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn write_suite(dir: &tempfile::TempDir, question_count: usize) -> std::path::PathBuf {
    let categories: Vec<_> = (0..question_count)
        .map(|i| {
            json!({
                "name": "reasoning",
                "questions": [{"id": format!("q{i}"), "prompt": format!("question {i}")}]
            })
        })
        .collect();
    let suite = json!({
        "name": "smoke",
        "defaultNumPredict": 64,
        "defaultContextLength": 2048,
        "categories": categories,
    });
    let path = dir.path().join("suite.json");
    let mut f = std::fs::File::create(&path).unwrap();
    write!(f, "{}", suite).unwrap();
    path
}

fn generate_response_body() -> serde_json::Value {
    json!({
        "response": "an answer",
        "done": true,
        "logprobs": [{"token": "a", "logprob": -0.1}],
        "total_duration": 1_000_000_000u64,
        "load_duration": 0,
        "prompt_eval_count": 10,
        "prompt_eval_duration": 500_000_000u64,
        "eval_count": 20,
        "eval_duration": 500_000_000u64,
    })
}

fn chat_response_body() -> serde_json::Value {
    json!({
        "message": {"content": "Hi"},
        "total_duration": 1,
        "load_duration": 0,
        "prompt_eval_count": 1,
        "prompt_eval_duration": 1,
        "eval_count": 1,
        "eval_duration": 1,
    })
}

fn base_config(suite_path: std::path::PathBuf, server_url: String, output: std::path::PathBuf) -> RunConfig {
    RunConfig {
        model_name: "llama3".to_string(),
        variants: vec!["fp16".to_string()],
        base_tag: "fp16".to_string(),
        suite_path,
        output_file: Some(output),
        server_url,
        judge: None,
        judge_mode: JudgeMode::Serial,
        judge_ctx_size: 12288,
        timeout_secs: 30,
        force: false,
        rejudge: false,
        on_demand: false,
        verbose: false,
    }
}

#[tokio::test]
async fn clean_run_with_no_judge_completes_and_persists_the_ledger() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let suite_path = write_suite(&dir, 2);
    let output = dir.path().join("llama3.qc.json");

    Mock::given(method("POST"))
        .and(path("/api/show"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "details": {"family": "llama", "parameter_size": "8B", "quantization_level": "FP16"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "llama3:fp16", "size": 123}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response_body()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(generate_response_body()))
        .mount(&server)
        .await;

    let config = base_config(suite_path, server.uri(), output.clone());
    let outcome = run(config).await;
    assert!(matches!(outcome, RunOutcome::Success), "expected Success");

    let raw = std::fs::read_to_string(&output).unwrap();
    let ledger: osync_bench_core::model::ResultsLedger = serde_json::from_str(&raw).unwrap();
    let base = ledger.base_variant().expect("base variant present");
    assert!(base.is_base);
    assert_eq!(base.question_results.len(), 2);
}

#[tokio::test]
async fn resume_skips_questions_already_recorded_in_the_ledger() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let suite_path = write_suite(&dir, 2);
    let output = dir.path().join("llama3.qc.json");

    // Pre-seed a ledger with one of the two questions already answered, simulating a prior
    // run that was killed after the first question.
    let seeded = json!({
        "testSuiteName": "smoke",
        "modelName": "llama3",
        "options": {
            "temperature": 0.0, "seed": 42, "topP": 0.9, "topK": 40, "repeatPenalty": 1.1
        },
        "results": [{
            "tag": "fp16",
            "fullName": "llama3:fp16",
            "sizeBytes": 0,
            "family": "",
            "parameterSize": "",
            "quantizationLevel": "",
            "isBase": true,
            "pulledOnDemand": false,
            "questionResults": [{
                "questionId": "reasoning-q0",
                "categoryName": "reasoning",
                "prompt": "question 0",
                "answer": "already answered",
                "tokenLogprobs": [],
                "promptTokensPerSecond": 1.0,
                "evalTokensPerSecond": 1.0,
                "totalTokens": 1,
                "contextLength": 2048
            }]
        }]
    });
    std::fs::write(&output, serde_json::to_string_pretty(&seeded).unwrap()).unwrap();

    Mock::given(method("POST"))
        .and(path("/api/show"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "details": {"family": "llama", "parameter_size": "8B", "quantization_level": "FP16"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "llama3:fp16", "size": 123}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response_body()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(generate_response_body()))
        .mount(&server)
        .await;

    let config = base_config(suite_path, server.uri(), output.clone());
    let outcome = run(config).await;
    assert!(matches!(outcome, RunOutcome::Success));

    let raw = std::fs::read_to_string(&output).unwrap();
    let ledger: osync_bench_core::model::ResultsLedger = serde_json::from_str(&raw).unwrap();
    let base = ledger.base_variant().unwrap();
    assert_eq!(base.question_results.len(), 2);
    let q0 = base
        .question_results
        .iter()
        .find(|q| q.question_id == "reasoning-q0")
        .unwrap();
    assert_eq!(q0.answer, "already answered", "resumed run must not re-generate a recorded answer");
}

#[tokio::test]
async fn missing_variant_without_on_demand_aborts_before_any_http_call() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let suite_path = write_suite(&dir, 1);
    let output = dir.path().join("llama3.qc.json");

    // No mocks registered at all: /api/show returning anything but a registered 200 means
    // `exists()` reports false, and the orchestrator must abort during pre-flight.
    Mock::given(method("POST"))
        .and(path("/api/show"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let mut config = base_config(suite_path, server.uri(), output.clone());
    config.on_demand = false;
    let outcome = run(config).await;

    match outcome {
        RunOutcome::Error(e) => {
            assert!(e.to_string().contains("E_MISSING_VARIANTS"));
        }
        other => panic!("expected a missing-variant error, got a different outcome: {}", other.exit_code()),
    }
    assert!(!output.exists(), "no ledger should be written when pre-flight aborts");
}

#[tokio::test]
async fn incompatible_ledger_test_suite_name_aborts_the_run() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let suite_path = write_suite(&dir, 1);
    let output = dir.path().join("llama3.qc.json");

    let seeded = json!({
        "testSuiteName": "a-different-suite",
        "modelName": "llama3",
        "options": {
            "temperature": 0.0, "seed": 42, "topP": 0.9, "topK": 40, "repeatPenalty": 1.1
        },
        "results": []
    });
    std::fs::write(&output, serde_json::to_string_pretty(&seeded).unwrap()).unwrap();

    let config = base_config(suite_path, server.uri(), output);
    let outcome = run(config).await;
    assert!(matches!(outcome, RunOutcome::Error(_)));
}
