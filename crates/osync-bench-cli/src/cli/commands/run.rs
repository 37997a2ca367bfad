use crate::cli::args::RunArgs;
use osync_bench_core::config::{JudgeMode, JudgeRef, RunConfig};
use osync_bench_core::report::{console, RunSummary};
use osync_bench_core::{run, RunOutcome};

pub async fn dispatch(args: RunArgs) -> anyhow::Result<i32> {
    let format_json = args.format_json;
    let config = build_config(args)?;
    let output_path = config.output_path();

    let outcome = run(config).await;

    if matches!(outcome, RunOutcome::Success | RunOutcome::Cancelled) {
        if let Ok(raw) = std::fs::read_to_string(&output_path) {
            if let Ok(doc) = serde_json::from_str(&raw) {
                let summary = RunSummary::from_ledger(&doc);
                if format_json {
                    println!("{}", summary.to_json()?);
                } else {
                    console::print_summary(&summary);
                }
            }
        }
    }

    if let RunOutcome::Error(e) = &outcome {
        eprintln!("fatal: {e:?}");
    }

    Ok(outcome.exit_code())
}

fn build_config(args: RunArgs) -> anyhow::Result<RunConfig> {
    let judge_mode = match args.judge_mode.as_str() {
        "serial" => JudgeMode::Serial,
        "parallel" => JudgeMode::Parallel,
        other => anyhow::bail!("unknown --judge-mode '{other}', expected serial or parallel"),
    };

    let judge = args.judge.as_deref().filter(|j| !j.is_empty()).map(parse_judge_ref);

    Ok(RunConfig {
        model_name: args.model,
        variants: args.variants,
        base_tag: args.base_tag,
        suite_path: args.suite,
        output_file: args.output,
        server_url: args.server,
        judge,
        judge_mode,
        judge_ctx_size: args.judge_ctx_size,
        timeout_secs: args.timeout,
        force: args.force,
        rejudge: args.rejudge,
        on_demand: args.on_demand,
        verbose: args.verbose,
    })
}

/// Parses a `judge` argument of the form `name` (same server as the benchmark) or
/// `url/name` (a separate judge server), per spec.md §6's "Configuration inputs".
fn parse_judge_ref(raw: &str) -> JudgeRef {
    match raw.rsplit_once('/') {
        Some((url, name)) if url.contains("://") => JudgeRef {
            server_url: Some(url.to_string()),
            model: name.to_string(),
        },
        _ => JudgeRef {
            server_url: None,
            model: raw.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_uses_the_benchmark_server() {
        let j = parse_judge_ref("llama3:fp16");
        assert!(j.server_url.is_none());
        assert_eq!(j.model, "llama3:fp16");
    }

    #[test]
    fn url_prefixed_name_targets_a_separate_server() {
        let j = parse_judge_ref("http://judge-host:11434/llama3:fp16");
        assert_eq!(j.server_url.as_deref(), Some("http://judge-host:11434"));
        assert_eq!(j.model, "llama3:fp16");
    }
}
