//! C8 Orchestrator (spec.md §4.8): the top-level run state machine.
//!
//! Grounded on the teacher's `engine/runner.rs::run_suite` (run-id creation, per-item spawn,
//! finalize-and-persist shape), generalized one level up from "per test case" to "per variant",
//! and interleaved with C6/C7 exactly as spec.md §4.8 describes.

use crate::cancel::CancelToken;
use crate::config::{self, JudgeMode, RunConfig};
use crate::engine::executor::{self, ExecutorContext, PendingJudgment};
use crate::engine::scheduler::{self, ProgressCallback};
use crate::errors::{codes, Cancelled, Diagnostic};
use crate::judge::JudgeService;
use crate::model::{derive_quantization_from_tag, VariantMetadata, VariantResult};
use crate::providers::inference::InferenceClient;
use crate::providers::registry::RegistryClient;
use crate::storage::ledger::Ledger;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// The run's terminal state, mapping directly to spec.md §4.8/§6 exit codes.
pub enum RunOutcome {
    Success,
    Error(anyhow::Error),
    Cancelled,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Success => 0,
            RunOutcome::Error(_) => 1,
            RunOutcome::Cancelled => 2,
        }
    }
}

/// Entry point: resolves variants, verifies them, drives C6+C7 per variant, and persists the
/// ledger. Installs the cancellation trap itself so callers only need to build a `RunConfig`.
pub async fn run(config: RunConfig) -> RunOutcome {
    let cancel = CancelToken::new();
    cancel.install_trap();

    match run_inner(&config, &cancel).await {
        Ok(()) => RunOutcome::Success,
        Err(e) if e.downcast_ref::<Cancelled>().is_some() => RunOutcome::Cancelled,
        Err(e) => RunOutcome::Error(e),
    }
}

async fn run_inner(config: &RunConfig, cancel: &CancelToken) -> anyhow::Result<()> {
    let suite = config::load_suite(&config.suite_path)?;
    let timeout = Duration::from_secs(config.timeout_secs);

    let client = InferenceClient::new(&config.server_url, timeout)?;
    let http = reqwest::Client::builder().timeout(timeout).build()?;
    let registry = RegistryClient::new(client.clone(), http);

    let judge_client = match &config.judge {
        Some(j) => match &j.server_url {
            Some(url) if url != &config.server_url => Some(InferenceClient::new(url, timeout)?),
            _ => Some(client.clone()),
        },
        None => None,
    };
    let judge = config
        .judge
        .as_ref()
        .zip(judge_client)
        .map(|(j, c)| JudgeService::new(c, j.model.clone(), config.effective_judge_ctx_size() as u32));

    let mut ledger = Ledger::load_or_create(
        &config.output_path(),
        &suite.name,
        &config.model_name,
        &config.base_tag,
        config::default_generation_options(),
    )?;

    ledger.doc.osync_version = Some(env!("CARGO_PKG_VERSION").to_string());
    if let Ok(v) = client.version().await {
        ledger.doc.ollama_version = Some(v);
    }
    if let Some(judge) = &judge {
        if let Ok(v) = judge.client_version().await {
            ledger.doc.ollama_judge_version = Some(v);
        }
    }

    let variants = expand_and_dedup(&registry, &config.variants).await?;

    // Pre-verify every variant before doing any test work (spec.md §4.8 step 4).
    let mut missing = Vec::new();
    for tag in &variants {
        cancel.check()?;
        if registry.exists(tag).await {
            continue;
        }
        if config.on_demand {
            if !registry.exists_remotely(tag, config::DEFAULT_REGISTRY_URL).await.unwrap_or(false) {
                missing.push(tag.clone());
            }
        } else {
            missing.push(tag.clone());
        }
    }
    if !missing.is_empty() {
        let mut diag = Diagnostic::new(
            codes::E_MISSING_VARIANTS,
            format!("{} variant(s) not available: {}", missing.len(), missing.join(", ")),
        );
        if !config.on_demand {
            diag = diag.with_fix_step("pass --ondemand to pull missing variants before testing");
        } else {
            diag = diag.with_fix_step("check the registry reference or pull the model manually");
        }
        return Err(diag.into());
    }

    if let Some(judge) = &judge {
        cancel.check()?;
        if !judge.exists().await {
            return Err(Diagnostic::new(
                codes::E_JUDGE_MISSING,
                format!("judge model '{}' is not available on its server", judge.model()),
            )
            .into());
        }
    }

    let base_tag = ledger
        .doc
        .base_variant()
        .map(|v| v.tag.clone())
        .unwrap_or_else(|| config.base_tag.clone());

    let mut run_order = variants.clone();
    if !run_order.iter().any(|t| t == &base_tag) {
        let base_already_complete = ledger.is_variant_complete(&base_tag, suite.question_count());
        if !base_already_complete {
            run_order.insert(0, base_tag.clone());
        }
    } else if let Some(pos) = run_order.iter().position(|t| t == &base_tag) {
        let tag = run_order.remove(pos);
        run_order.insert(0, tag);
    }

    let mut judged_this_run: HashSet<String> = HashSet::new();
    let mut in_flight_pending: Vec<(String, Vec<PendingJudgment>)> = Vec::new();
    let progress: Option<ProgressCallback> = Some(Arc::new(|tag: &str, done: usize, total: usize| {
        tracing::info!(variant = tag, done, total, "judgment progress");
    }));

    for tag in &run_order {
        cancel.check()?;

        let is_base = *tag == base_tag;
        let already_complete = ledger.is_variant_complete(tag, suite.question_count());
        if already_complete && !config.force {
            tracing::info!(variant = tag, "skipping complete variant");
            continue;
        }

        let mut pulled_on_demand = false;
        let mut resolved_tag = tag.clone();

        if !registry.exists(tag).await {
            if !config.on_demand {
                // Re-verified after the pre-flight pass; should not happen, but don't silently
                // run a model that isn't there.
                tracing::warn!(variant = tag, "variant vanished between pre-flight and run, skipping");
                continue;
            }

            if let Some(partial) = ledger.doc.variant_mut(tag) {
                partial.pulled_on_demand = true;
            } else {
                ledger.doc.results.push(blank_variant(tag));
                ledger.doc.variant_mut(tag).unwrap().pulled_on_demand = true;
            }
            ledger.save()?;
            pulled_on_demand = true;

            if let Err(e) = pull_with_progress(&client, tag, cancel).await {
                tracing::warn!(variant = tag, error = %e, "pull failed, skipping variant");
                continue;
            }

            if let Ok(Some(actual)) = registry.resolve_actual_name(tag).await {
                resolved_tag = actual;
            }
        }

        let metadata = match resolve_variant_metadata(&client, &resolved_tag).await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(variant = tag, error = %e, "failed to resolve metadata, skipping");
                if pulled_on_demand {
                    let _ = client.delete(&resolved_tag).await;
                }
                continue;
            }
        };

        if !is_base {
            if let Some(base_result) = ledger.doc.base_variant() {
                if !base_result.family.is_empty()
                    && !metadata.family.is_empty()
                    && base_result.family != metadata.family
                {
                    tracing::warn!(
                        code = codes::E_FAMILY_MISMATCH,
                        variant = tag,
                        base_family = base_result.family,
                        variant_family = metadata.family,
                        "family mismatch against base, skipping variant"
                    );
                    if pulled_on_demand {
                        let _ = client.delete(&resolved_tag).await;
                    }
                    continue;
                }
                if !base_result.parameter_size.is_empty()
                    && !metadata.parameter_size.is_empty()
                    && base_result.parameter_size != metadata.parameter_size
                {
                    tracing::warn!(
                        code = codes::E_FAMILY_MISMATCH,
                        variant = tag,
                        base_parameter_size = base_result.parameter_size,
                        variant_parameter_size = metadata.parameter_size,
                        "parameter size mismatch against base, skipping variant"
                    );
                    if pulled_on_demand {
                        let _ = client.delete(&resolved_tag).await;
                    }
                    continue;
                }
            }
        }

        if let Err(e) = executor::preload(&client, &resolved_tag, cancel).await {
            tracing::warn!(variant = tag, error = %e, "preload failed, skipping variant");
            if pulled_on_demand {
                let _ = client.delete(&resolved_tag).await;
            }
            continue;
        }

        let existing_partial = ledger.doc.variant(tag).cloned();

        let base_for_run = if is_base {
            None
        } else {
            ledger.doc.base_variant().cloned()
        };

        let spawn_in_flight = matches!(config.judge_mode, JudgeMode::Parallel)
            && judge.is_some()
            && base_for_run.as_ref().map(|b| b.question_results.len() == suite.question_count()).unwrap_or(false);

        let current_partial = Arc::new(tokio::sync::Mutex::new(None));
        let generation_options = ledger.doc.options.clone();
        let ctx = ExecutorContext {
            client: &client,
            judge: judge.as_ref(),
            options: &generation_options,
            cancel,
            spawn_in_flight_judgments: spawn_in_flight,
        };

        let run_result = executor::run_suite(
            &ctx,
            &suite,
            &resolved_tag,
            base_for_run.as_ref(),
            existing_partial,
            &current_partial,
        )
        .await;

        let (mut variant_result, pending) = match run_result {
            Ok(pair) => pair,
            Err(e) if e.downcast_ref::<Cancelled>().is_some() => {
                let partial = current_partial.lock().await.clone();
                if let Some(mut partial) = partial {
                    apply_metadata(&mut partial, tag, &resolved_tag, is_base, pulled_on_demand, &metadata);
                    upsert_variant(&mut ledger, tag, partial);
                }
                ledger.save()?;
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(variant = tag, error = %e, "variant run failed, skipping");
                if pulled_on_demand {
                    let _ = client.delete(&resolved_tag).await;
                }
                continue;
            }
        };

        apply_metadata(&mut variant_result, tag, &resolved_tag, is_base, pulled_on_demand, &metadata);
        upsert_variant(&mut ledger, tag, variant_result);
        ledger.save()?;

        if let (Some(judge), Some(base)) = (&judge, &base_for_run) {
            if !is_base {
                match config.judge_mode {
                    JudgeMode::Serial => {
                        if let Some(v) = ledger.doc.variant_mut(tag) {
                            scheduler::judge_serial(v, base, judge, cancel, config.rejudge, progress.as_ref())
                                .await?;
                        }
                        ledger.save()?;
                        judged_this_run.insert(tag.clone());
                    }
                    JudgeMode::Parallel => {
                        if spawn_in_flight {
                            in_flight_pending.push((tag.clone(), pending));
                        } else if let Some(v) = ledger.doc.variant_mut(tag) {
                            scheduler::judge_parallel_per_variant(
                                v,
                                base,
                                judge,
                                cancel,
                                config.rejudge,
                                progress.as_ref(),
                            )
                            .await?;
                            ledger.save()?;
                        }
                        judged_this_run.insert(tag.clone());
                    }
                }
            }
        }

        if pulled_on_demand {
            if let Err(e) = client.delete(&resolved_tag).await {
                tracing::warn!(variant = tag, error = %e, "cleanup delete failed, will retry next run");
            } else if let Some(v) = ledger.doc.variant_mut(tag) {
                v.pulled_on_demand = false;
                ledger.save()?;
            }
        }
    }

    // Step 8: judge any previously-existing, already-complete variants this run didn't touch,
    // if the current judge model differs from what judged them before, or --rejudge was set.
    if let Some(judge) = &judge {
        let base = ledger.doc.base_variant().cloned();
        if let Some(base) = base {
            let stale_tags: Vec<String> = ledger
                .doc
                .results
                .iter()
                .filter(|v| !v.is_base && !judged_this_run.contains(&v.tag))
                .filter(|v| {
                    v.question_results
                        .iter()
                        .any(|q| scheduler::needs_judgment(q.judgment.as_ref(), judge.model(), config.rejudge))
                })
                .map(|v| v.tag.clone())
                .collect();

            for tag in stale_tags {
                cancel.check()?;
                if let Some(v) = ledger.doc.variant_mut(&tag) {
                    match config.judge_mode {
                        JudgeMode::Serial => {
                            scheduler::judge_serial(v, &base, judge, cancel, config.rejudge, progress.as_ref())
                                .await?;
                        }
                        JudgeMode::Parallel => {
                            scheduler::judge_parallel_per_variant(
                                v,
                                &base,
                                judge,
                                cancel,
                                config.rejudge,
                                progress.as_ref(),
                            )
                            .await?;
                        }
                    }
                    ledger.save()?;
                }
            }
        }
    }

    // Drain every in-flight judgment task accumulated across the run.
    for (tag, pending) in in_flight_pending {
        if let Some(v) = ledger.doc.variant_mut(&tag) {
            scheduler::drain_pending(v, pending, progress.as_ref()).await?;
        }
    }
    ledger.save()?;

    Ok(())
}

fn apply_metadata(
    result: &mut VariantResult,
    tag: &str,
    resolved_tag: &str,
    is_base: bool,
    pulled_on_demand: bool,
    metadata: &VariantMetadata,
) {
    result.tag = tag.to_string();
    result.full_name = resolved_tag.to_string();
    result.is_base = is_base;
    result.pulled_on_demand = pulled_on_demand || result.pulled_on_demand;
    result.size_bytes = metadata.size_bytes;
    result.family = metadata.family.clone();
    result.parameter_size = metadata.parameter_size.clone();
    result.quantization_level = metadata.quantization_level.clone();
}

fn upsert_variant(ledger: &mut Ledger, tag: &str, result: VariantResult) {
    if let Some(slot) = ledger.doc.variant_mut(tag) {
        *slot = result;
    } else {
        ledger.doc.results.push(result);
    }
}

fn blank_variant(tag: &str) -> VariantResult {
    VariantResult {
        tag: tag.to_string(),
        full_name: tag.to_string(),
        size_bytes: 0,
        family: String::new(),
        parameter_size: String::new(),
        quantization_level: String::new(),
        is_base: false,
        pulled_on_demand: false,
        question_results: Vec::new(),
    }
}

async fn expand_and_dedup(registry: &RegistryClient, patterns: &[String]) -> anyhow::Result<Vec<String>> {
    let mut seen_lower = HashSet::new();
    let mut out = Vec::new();
    for pattern in patterns {
        let expanded = registry.expand_pattern(pattern).await?;
        for name in expanded {
            let lower = name.to_lowercase();
            if seen_lower.insert(lower) {
                out.push(name);
            }
        }
    }
    Ok(out)
}

async fn resolve_variant_metadata(client: &InferenceClient, name: &str) -> anyhow::Result<VariantMetadata> {
    let details = client
        .show(name)
        .await
        .map_err(|e| anyhow::anyhow!("show failed for '{name}': {e}"))?;

    let size_bytes = client
        .list()
        .await
        .ok()
        .and_then(|tags| tags.into_iter().find(|t| t.name == name).map(|t| t.size))
        .unwrap_or(0);

    let quantization_level = if details.quantization_level.is_empty() {
        derive_quantization_from_tag(name).unwrap_or_default()
    } else {
        details.quantization_level
    };

    Ok(VariantMetadata {
        family: details.family,
        parameter_size: details.parameter_size,
        quantization_level,
        size_bytes,
    })
}

async fn pull_with_progress(client: &InferenceClient, model: &str, cancel: &CancelToken) -> anyhow::Result<()> {
    use futures_util::StreamExt;

    let mut stream = client
        .pull(model)
        .await
        .map_err(|e| anyhow::anyhow!("pull failed to start for '{model}': {e}"))?;

    while let Some(event) = stream.next().await {
        cancel.check()?;
        let event = event?;
        tracing::info!(
            model,
            status = %event.status,
            completed = event.completed.unwrap_or(0),
            total = event.total.unwrap_or(0),
            "pull progress"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_spec() {
        assert_eq!(RunOutcome::Success.exit_code(), 0);
        assert_eq!(RunOutcome::Error(anyhow::anyhow!("x")).exit_code(), 1);
        assert_eq!(RunOutcome::Cancelled.exit_code(), 2);
    }

    #[test]
    fn blank_variant_starts_empty_and_not_pulled() {
        let v = blank_variant("q4_0");
        assert_eq!(v.tag, "q4_0");
        assert!(!v.pulled_on_demand);
        assert!(v.question_results.is_empty());
    }
}
