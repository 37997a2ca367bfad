//! Pre-flight server reachability check (SPEC_FULL.md §10, supplemented feature).
//!
//! Mirrors the role of the teacher's `doctor` module — a lightweight diagnostic a CLI
//! collaborator can run before committing to a full benchmark — without pulling in the
//! teacher's config-file/trace/baseline-specific diagnostics, which have no analogue here.

use crate::providers::inference::InferenceClient;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct DoctorReport {
    pub server_url: String,
    pub reachable: bool,
    pub version: Option<String>,
    #[serde(rename = "modelCount")]
    pub model_count: Option<usize>,
    pub issues: Vec<String>,
}

impl DoctorReport {
    pub fn is_healthy(&self) -> bool {
        self.reachable && self.issues.is_empty()
    }
}

/// Probes `/api/version` and `/api/tags` and reports whether the server is reachable and
/// responsive, without starting any test work.
pub async fn check_server(client: &InferenceClient, server_url: &str) -> DoctorReport {
    let mut issues = Vec::new();

    let version = match client.version().await {
        Ok(v) => Some(v),
        Err(e) => {
            issues.push(format!("version check failed: {e}"));
            None
        }
    };

    let model_count = match client.list().await {
        Ok(tags) => Some(tags.len()),
        Err(e) => {
            issues.push(format!("tag listing failed: {e}"));
            None
        }
    };

    DoctorReport {
        server_url: server_url.to_string(),
        reachable: version.is_some() || model_count.is_some(),
        version,
        model_count,
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_report_has_no_issues() {
        let report = DoctorReport {
            server_url: "http://localhost:11434".into(),
            reachable: true,
            version: Some("0.1.0".into()),
            model_count: Some(3),
            issues: vec![],
        };
        assert!(report.is_healthy());
    }

    #[test]
    fn unreachable_report_is_unhealthy() {
        let report = DoctorReport {
            server_url: "http://localhost:11434".into(),
            reachable: false,
            version: None,
            model_count: None,
            issues: vec!["version check failed: transient error: connection refused".into()],
        };
        assert!(!report.is_healthy());
    }
}
