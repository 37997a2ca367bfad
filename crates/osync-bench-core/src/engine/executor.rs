//! C6 Test Executor (spec.md §4.6): runs every question in a suite against one variant.
//!
//! Grounded on the teacher's `engine/runner.rs::run_test_once`/`call_llm` (timeout-wrapped
//! client call, per-question result row accumulation), generalized from a single cached call
//! into the suite-iteration and in-flight-judgment-task shape the spec requires.

use crate::cancel::CancelToken;
use crate::errors::codes;
use crate::judge::JudgeService;
use crate::model::{
    effective_context_length, stable_question_id, GenerationOptions, QuestionResult, TestSuite,
    VariantResult,
};
use crate::providers::inference::{GenerateOptions, InferenceClient};
use crate::retry::{retry, retry_default};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const PRELOAD_MAX_ATTEMPTS: u32 = 3;
const PRELOAD_BASE_DELAY: Duration = Duration::from_secs(2);

/// A judgment started the moment its question's generation returned (in-flight / parallel mode,
/// spec.md §4.6 step 5). The orchestrator awaits these after the variant loop and records the
/// returned `(question_id, Judgment)` pair onto the matching `QuestionResult`.
pub type PendingJudgment = JoinHandle<anyhow::Result<(String, crate::model::Judgment)>>;

pub struct ExecutorContext<'a> {
    pub client: &'a InferenceClient,
    pub judge: Option<&'a JudgeService>,
    pub options: &'a GenerationOptions,
    pub cancel: &'a CancelToken,
    /// When true, a judgment task is spawned per question as soon as it completes, rather than
    /// left to the serial scheduler (spec.md §4.7 "in-flight" mode).
    pub spawn_in_flight_judgments: bool,
}

/// `preload`: a trivial chat request used to verify the model is loaded and responsive before
/// spending the run's time budget on it (spec.md §4.6 preconditions).
pub async fn preload(client: &InferenceClient, model: &str, cancel: &CancelToken) -> anyhow::Result<()> {
    let options = GenerateOptions::deterministic();
    retry(
        || async {
            match client
                .chat(
                    model,
                    &[crate::providers::inference::ChatMessage {
                        role: crate::providers::inference::ChatRole::User,
                        content: "Hi".to_string(),
                    }],
                    &options,
                    None,
                )
                .await
            {
                Ok(_) => Ok(Some(())),
                Err(e) if e.is_retryable() => Ok(None),
                Err(e) => Err(anyhow::anyhow!("preload failed: {e}")),
            }
        },
        "preload",
        cancel,
        PRELOAD_MAX_ATTEMPTS,
        PRELOAD_BASE_DELAY,
    )
    .await
}

/// Runs every question in `suite` against `variant_tag`, skipping questions already present in
/// `existing_partial`. Returns the accumulated `VariantResult` and any spawned judgment tasks.
///
/// `current_partial` is updated after every question so a cancellation handler elsewhere can
/// read it and persist partial progress (spec.md §4.6: "tracked on a currentPartial pointer so
/// cancellation can flush").
pub async fn run_suite(
    ctx: &ExecutorContext<'_>,
    suite: &TestSuite,
    variant_tag: &str,
    base_variant: Option<&VariantResult>,
    mut existing_partial: Option<VariantResult>,
    current_partial: &Arc<tokio::sync::Mutex<Option<VariantResult>>>,
) -> anyhow::Result<(VariantResult, Vec<PendingJudgment>)> {
    let mut result = existing_partial.take().unwrap_or_else(|| VariantResult {
        tag: variant_tag.to_string(),
        full_name: variant_tag.to_string(),
        size_bytes: 0,
        family: String::new(),
        parameter_size: String::new(),
        quantization_level: String::new(),
        is_base: false,
        pulled_on_demand: false,
        question_results: Vec::new(),
    });

    {
        let mut guard = current_partial.lock().await;
        *guard = Some(result.clone());
    }

    let mut pending_judgments = Vec::new();
    let mut last_context_length: Option<u32> = None;

    for category in &suite.categories {
        for question in &category.questions {
            ctx.cancel.check()?;

            let qid = stable_question_id(&category.name, &question.id);
            if result.has_question(&qid) {
                continue;
            }

            let context_length = effective_context_length(suite, category, question);
            if last_context_length != Some(context_length) {
                tracing::info!(
                    variant = variant_tag,
                    question = %qid,
                    context_length,
                    "effective context length changed"
                );
                last_context_length = Some(context_length);
            }

            let options = GenerateOptions {
                temperature: ctx.options.temperature,
                seed: ctx.options.seed,
                top_p: ctx.options.top_p,
                top_k: ctx.options.top_k,
                repeat_penalty: ctx.options.repeat_penalty,
                frequency_penalty: ctx.options.frequency_penalty,
                num_predict: suite.default_num_predict,
                num_ctx: context_length,
                logprobs: true,
            };

            let prompt = question.prompt.clone();
            let client = ctx.client;
            let model = variant_tag.to_string();

            let generated = retry_default(
                || {
                    let prompt = prompt.clone();
                    let model = model.clone();
                    let options = options.clone();
                    async move {
                        match client.generate(&model, &prompt, &options).await {
                            Ok(generated) => Ok(Some(generated)),
                            Err(e) if matches!(e, crate::errors::InferenceError::Unsupported(_)) => {
                                Err(anyhow::anyhow!(
                                    "{}: {e}",
                                    codes::E_LOGPROBS_UNSUPPORTED
                                ))
                            }
                            Err(e) if e.is_retryable() => Ok(None),
                            Err(e) => Err(anyhow::anyhow!("generate failed: {e}")),
                        }
                    }
                },
                "generate",
                ctx.cancel,
            )
            .await?;

            let prompt_tps = rate(
                generated.timings.prompt_eval_count,
                generated.timings.prompt_eval_duration_ns,
            );
            let eval_tps = rate(generated.timings.eval_count, generated.timings.eval_duration_ns);

            let question_result = QuestionResult {
                question_id: qid.clone(),
                category_name: category.name.clone(),
                prompt: question.prompt.clone(),
                answer: generated.response,
                token_logprobs: generated.logprobs,
                prompt_tokens_per_second: prompt_tps,
                eval_tokens_per_second: eval_tps,
                total_tokens: generated.timings.prompt_eval_count + generated.timings.eval_count,
                context_length,
                judgment: None,
            };

            result.question_results.push(question_result.clone());
            {
                let mut guard = current_partial.lock().await;
                *guard = Some(result.clone());
            }

            if ctx.spawn_in_flight_judgments {
                if let (Some(judge), Some(base)) = (ctx.judge, base_variant) {
                    if base.tag != variant_tag {
                        if let Some(base_question) = base
                            .question_results
                            .iter()
                            .find(|q| q.question_id == qid)
                        {
                            let judge = judge.clone();
                            let question_text = question.prompt.clone();
                            let base_answer = base_question.answer.clone();
                            let candidate_answer = question_result.answer.clone();
                            let cancel = ctx.cancel.clone();
                            let qid_for_task = qid.clone();

                            pending_judgments.push(tokio::spawn(async move {
                                let judgment = judge
                                    .judge(&question_text, &base_answer, &candidate_answer, &cancel)
                                    .await?;
                                Ok((qid_for_task, judgment))
                            }));
                        }
                    }
                }
            }
        }
    }

    Ok((result, pending_judgments))
}

fn rate(count: u64, duration_ns: u64) -> f64 {
    if duration_ns == 0 {
        return 0.0;
    }
    count as f64 / (duration_ns as f64 / 1e9)
}
