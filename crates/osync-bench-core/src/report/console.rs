//! Human-facing run summary, printed to stderr so stdout stays free for `--format json` output.
//! Mirrors the teacher's `report::console::print_summary` line-per-entry-plus-totals shape.

use super::summary::RunSummary;

pub fn print_summary(summary: &RunSummary) {
    eprintln!(
        "Suite: {}  Model: {}",
        summary.test_suite_name, summary.model_name
    );
    for v in &summary.variants {
        let marker = if v.is_base { " (base)" } else { "" };
        let score = v
            .average_score
            .map(|s| format!("{s:.1}"))
            .unwrap_or_else(|| "-".to_string());
        let delta = v
            .score_delta_vs_base
            .map(|d| format!("{d:+.1}"))
            .unwrap_or_else(|| "-".to_string());
        eprintln!(
            "  {}{}: {}/{} judged, avg score {} (delta {})",
            v.tag, marker, v.questions_judged, v.questions_run, score, delta
        );
    }
}
