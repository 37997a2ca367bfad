//! C7 Judgment Scheduler (spec.md §4.7): serial, parallel-per-variant, or in-flight modes.
//!
//! Grounded on the teacher's `engine/runner.rs::run_suite` fan-out shape (`Semaphore`-bounded
//! `tokio::spawn` per item, `JoinHandle` collection, then a join barrier), generalized from
//! per-test-case fan-out to per-question judgment fan-out, and on `enrich_judge`'s
//! "need it? call it, write it back" shape for the serial path.

use crate::cancel::CancelToken;
use crate::engine::executor::PendingJudgment;
use crate::judge::JudgeService;
use crate::model::{Judgment, VariantResult};
use std::sync::Arc;

/// Invoked as `(tag, completed, total)` after each judgment resolves. The rendering layer is
/// external (spec.md §4.7 "Progress reporting is observer-level").
pub type ProgressCallback = Arc<dyn Fn(&str, usize, usize) + Send + Sync>;

/// A judgment is needed iff there is no prior judgment, the prior judgment used a different
/// judge model, or `rejudge` is set (spec.md §4.7).
pub fn needs_judgment(existing: Option<&Judgment>, judge_model: &str, rejudge: bool) -> bool {
    if rejudge {
        return true;
    }
    match existing {
        None => true,
        Some(j) => j.judge_model != judge_model,
    }
}

/// Serial mode (the default): iterate questions sequentially, skipping those already judged by
/// the same judge model unless `rejudge` is set.
pub async fn judge_serial(
    variant: &mut VariantResult,
    base: &VariantResult,
    judge: &JudgeService,
    cancel: &CancelToken,
    rejudge: bool,
    progress: Option<&ProgressCallback>,
) -> anyhow::Result<()> {
    let total = variant.question_results.len();
    let mut completed = 0;

    for i in 0..variant.question_results.len() {
        cancel.check()?;
        let qid = variant.question_results[i].question_id.clone();
        let needed = needs_judgment(
            variant.question_results[i].judgment.as_ref(),
            judge.model(),
            rejudge,
        );
        if needed {
            if let Some(base_answer) = base
                .question_results
                .iter()
                .find(|q| q.question_id == qid)
                .map(|q| q.answer.clone())
            {
                let question_text = variant.question_results[i].prompt.clone();
                let candidate_answer = variant.question_results[i].answer.clone();
                let judgment = judge
                    .judge(&question_text, &base_answer, &candidate_answer, cancel)
                    .await?;
                variant.question_results[i].judgment = Some(judgment);
            }
        }
        completed += 1;
        if let Some(cb) = progress {
            cb(&variant.tag, completed, total);
        }
    }
    Ok(())
}

/// Parallel-per-variant mode: after generation completes for a variant, fan out every missing
/// judgment concurrently and await a common barrier (spec.md §4.7).
pub async fn judge_parallel_per_variant(
    variant: &mut VariantResult,
    base: &VariantResult,
    judge: &JudgeService,
    cancel: &CancelToken,
    rejudge: bool,
    progress: Option<&ProgressCallback>,
) -> anyhow::Result<()> {
    let total = variant.question_results.len();
    let mut handles = Vec::new();

    for (idx, qr) in variant.question_results.iter().enumerate() {
        if !needs_judgment(qr.judgment.as_ref(), judge.model(), rejudge) {
            continue;
        }
        let Some(base_answer) = base
            .question_results
            .iter()
            .find(|q| q.question_id == qr.question_id)
            .map(|q| q.answer.clone())
        else {
            continue;
        };

        let judge = judge.clone();
        let cancel = cancel.clone();
        let question_text = qr.prompt.clone();
        let candidate_answer = qr.answer.clone();
        handles.push((
            idx,
            tokio::spawn(async move {
                judge
                    .judge(&question_text, &base_answer, &candidate_answer, &cancel)
                    .await
            }),
        ));
    }

    let mut completed = total - handles.len();
    for (idx, handle) in handles {
        let judgment = handle.await.map_err(|e| anyhow::anyhow!("judgment task panicked: {e}"))??;
        variant.question_results[idx].judgment = Some(judgment);
        completed += 1;
        if let Some(cb) = progress {
            cb(&variant.tag, completed, total);
        }
    }
    Ok(())
}

/// In-flight mode: the executor has already spawned one task per question the moment its
/// generation returned (spec.md §4.6 step 5). This drains those handles and writes each
/// judgment back onto the matching `QuestionResult`, called by the orchestrator after the
/// variant's generation (and any remaining serial/parallel judging) completes.
pub async fn drain_pending(
    variant: &mut VariantResult,
    pending: Vec<PendingJudgment>,
    progress: Option<&ProgressCallback>,
) -> anyhow::Result<()> {
    let total = pending.len();
    let mut completed = 0;
    for handle in pending {
        let (qid, judgment) = handle
            .await
            .map_err(|e| anyhow::anyhow!("judgment task panicked: {e}"))??;
        if let Some(qr) = variant
            .question_results
            .iter_mut()
            .find(|q| q.question_id == qid)
        {
            qr.judgment = Some(judgment);
        }
        completed += 1;
        if let Some(cb) = progress {
            cb(&variant.tag, completed, total);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Judgment;
    use chrono::Utc;

    fn judgment(model: &str) -> Judgment {
        Judgment {
            judge_model: model.to_string(),
            score: 90,
            reason: "ok".into(),
            timestamp: Utc::now(),
            raw_response: None,
        }
    }

    #[test]
    fn needs_judgment_when_absent() {
        assert!(needs_judgment(None, "judge-a", false));
    }

    #[test]
    fn skips_when_same_judge_already_scored() {
        let j = judgment("judge-a");
        assert!(!needs_judgment(Some(&j), "judge-a", false));
    }

    #[test]
    fn rejudges_when_judge_model_changed() {
        let j = judgment("judge-a");
        assert!(needs_judgment(Some(&j), "judge-b", false));
    }

    #[test]
    fn forces_rejudge_flag() {
        let j = judgment("judge-a");
        assert!(needs_judgment(Some(&j), "judge-a", true));
    }
}
