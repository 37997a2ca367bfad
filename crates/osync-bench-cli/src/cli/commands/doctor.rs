use crate::cli::args::DoctorArgs;
use osync_bench_core::doctor::check_server;
use osync_bench_core::providers::inference::InferenceClient;
use std::time::Duration;

pub async fn dispatch(args: DoctorArgs) -> anyhow::Result<i32> {
    let client = InferenceClient::new(&args.server, Duration::from_secs(10))?;
    let report = check_server(&client, &args.server).await;

    if args.format_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        eprintln!("Server: {}", report.server_url);
        eprintln!("Reachable: {}", report.reachable);
        if let Some(v) = &report.version {
            eprintln!("Version: {v}");
        }
        if let Some(n) = report.model_count {
            eprintln!("Models available: {n}");
        }
        for issue in &report.issues {
            eprintln!("Issue: {issue}");
        }
    }

    Ok(if report.is_healthy() { 0 } else { 1 })
}
