use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "osync-bench",
    version,
    about = "Benchmark runner for comparing LLM quantization variants against a base model"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a benchmark suite across one or more model variants.
    Run(RunArgs),
    /// Check that an inference server is reachable before running a suite.
    Doctor(DoctorArgs),
}

#[derive(Parser, Clone)]
pub struct RunArgs {
    /// Model family to benchmark, e.g. "llama3".
    #[arg(long)]
    pub model: String,

    /// Comma-separated variant tags to test; wildcards allowed (e.g. "q4_*,q8_0").
    #[arg(long, value_delimiter = ',')]
    pub variants: Vec<String>,

    /// Tag treated as the reference variant all others are compared against.
    #[arg(long, default_value = "fp16")]
    pub base_tag: String,

    /// Test suite file (YAML or JSON).
    #[arg(long)]
    pub suite: PathBuf,

    /// Results ledger path. Defaults to "{model}.qc.json".
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Inference server base URL.
    #[arg(long, default_value = "http://localhost:11434", env = "OSYNC_BENCH_SERVER")]
    pub server: String,

    /// Judge model reference: "name" or "url/name". Omit to disable judging.
    #[arg(long)]
    pub judge: Option<String>,

    /// Judgment scheduling mode.
    #[arg(long, default_value = "serial")]
    pub judge_mode: String,

    /// Judge context window size; values <= 0 fall back to the default.
    #[arg(long, default_value_t = 12288)]
    pub judge_ctx_size: i64,

    /// Per-request timeout, in seconds.
    #[arg(long, default_value_t = 600)]
    pub timeout: u64,

    /// Re-run variants the ledger already considers complete.
    #[arg(long)]
    pub force: bool,

    /// Re-score every question even if a judgment from the current judge model exists.
    #[arg(long)]
    pub rejudge: bool,

    /// Pull missing variants before testing and delete them afterward.
    #[arg(long)]
    pub on_demand: bool,

    /// Emit `tracing::debug!`-level output.
    #[arg(long)]
    pub verbose: bool,

    /// Render the final summary as JSON on stdout instead of a human table on stderr.
    #[arg(long)]
    pub format_json: bool,
}

#[derive(Parser, Clone)]
pub struct DoctorArgs {
    /// Inference server base URL.
    #[arg(long, default_value = "http://localhost:11434", env = "OSYNC_BENCH_SERVER")]
    pub server: String,

    /// Render the report as JSON on stdout instead of a human summary on stderr.
    #[arg(long)]
    pub format_json: bool,
}
