//! C2 Model Registry Client — existence checks, pull gating, and tag-pattern expansion
//! (spec.md §4.2).
//!
//! Grounded on the same reqwest-client idiom as `providers::inference`, applied to registry
//! GET/HEAD requests and to `hf.co/*` repo-file listings.

use super::inference::InferenceClient;
use regex::Regex;

pub struct RegistryClient {
    inference: InferenceClient,
    http: reqwest::Client,
}

impl RegistryClient {
    pub fn new(inference: InferenceClient, http: reqwest::Client) -> Self {
        Self { inference, http }
    }

    /// `exists(name) -> bool` via `show` (spec.md §4.2).
    pub async fn exists(&self, name: &str) -> bool {
        self.inference.show(name).await.is_ok()
    }

    /// For registry-style names (`family:tag`), HEAD the Ollama-style manifest endpoint. For
    /// `hf.co/{org}/{repo}:{tag}` references, GET the repo's file listing and look for a file
    /// matching any of the documented suffix patterns.
    pub async fn exists_remotely(&self, name: &str, registry_url: &str) -> anyhow::Result<bool> {
        if let Some(parsed) = parse_hf_reference(name) {
            return self.exists_remotely_hf(&parsed).await;
        }

        let (family, tag) = split_family_tag(name);
        let url = format!("{}/v2/{}/manifests/{}", registry_url.trim_end_matches('/'), family, tag);
        let resp = self.http.head(&url).send().await?;
        if resp.status().is_success() {
            return Ok(true);
        }
        // Some registries don't support HEAD on manifests; fall back to GET.
        let resp = self.http.get(&url).send().await?;
        Ok(resp.status().is_success())
    }

    async fn exists_remotely_hf(&self, parsed: &HfReference) -> anyhow::Result<bool> {
        let url = format!(
            "https://huggingface.co/api/models/{}/{}",
            parsed.org, parsed.repo
        );
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Ok(false);
        }
        #[derive(serde::Deserialize)]
        struct Sibling {
            rfilename: String,
        }
        #[derive(serde::Deserialize)]
        struct RepoInfo {
            #[serde(default)]
            siblings: Vec<Sibling>,
        }
        let info: RepoInfo = resp.json().await?;
        let suffixes = [
            format!("{}.", parsed.tag),
            format!("-{}.", parsed.tag),
            format!("_{}.", parsed.tag),
            format!(".{}.", parsed.tag),
        ];
        Ok(info
            .siblings
            .iter()
            .any(|s| suffixes.iter().any(|suf| s.rfilename.contains(suf.as_str()))))
    }

    /// Case-insensitive lookup against the server's tag list, because servers may canonicalize
    /// case (spec.md §4.2, boundary behavior: `"Q4_0"` resolves to `"q4_0"`).
    pub async fn resolve_actual_name(&self, requested: &str) -> anyhow::Result<Option<String>> {
        let tags = self.inference.list().await?;
        let requested_lower = requested.to_lowercase();
        Ok(tags
            .into_iter()
            .find(|t| t.name.to_lowercase() == requested_lower)
            .map(|t| t.name))
    }

    /// `*` matches any run of characters; no other metacharacters. Results are de-duplicated
    /// case-insensitively (spec.md §4.2).
    pub async fn expand_pattern(&self, pattern: &str) -> anyhow::Result<Vec<String>> {
        if !pattern.contains('*') {
            return Ok(vec![pattern.to_string()]);
        }

        let tags = self.inference.list().await?;
        let re = wildcard_to_regex(pattern);

        let mut seen_lower = std::collections::HashSet::new();
        let mut out = Vec::new();
        for tag in tags {
            if re.is_match(&tag.name) {
                let lower = tag.name.to_lowercase();
                if seen_lower.insert(lower) {
                    out.push(tag.name);
                }
            }
        }
        Ok(out)
    }
}

fn wildcard_to_regex(pattern: &str) -> Regex {
    let mut escaped = String::with_capacity(pattern.len() * 2);
    escaped.push('^');
    for part in pattern.split('*') {
        if !escaped.ends_with('^') {
            escaped.push_str(".*");
        }
        escaped.push_str(&regex::escape(part));
    }
    escaped.push('$');
    Regex::new(&escaped).expect("wildcard pattern always compiles to a valid regex")
}

fn split_family_tag(name: &str) -> (String, String) {
    match name.split_once(':') {
        Some((family, tag)) => (family.to_string(), tag.to_string()),
        None => (name.to_string(), "latest".to_string()),
    }
}

struct HfReference {
    org: String,
    repo: String,
    tag: String,
}

/// Parses `hf.co/{org}/{repo}:{tag}` references.
fn parse_hf_reference(name: &str) -> Option<HfReference> {
    let rest = name.strip_prefix("hf.co/")?;
    let (path, tag) = rest.split_once(':')?;
    let (org, repo) = path.split_once('/')?;
    Some(HfReference {
        org: org.to_string(),
        repo: repo.to_string(),
        tag: tag.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_any_run() {
        let re = wildcard_to_regex("q4_*");
        assert!(re.is_match("q4_0"));
        assert!(re.is_match("q4_k_m"));
        assert!(!re.is_match("q5_0"));
    }

    #[test]
    fn wildcard_with_no_star_is_exact() {
        let re = wildcard_to_regex("fp16");
        assert!(re.is_match("fp16"));
        assert!(!re.is_match("fp16x"));
    }

    #[test]
    fn hf_reference_parses() {
        let parsed = parse_hf_reference("hf.co/org/repo:Q4_0").unwrap();
        assert_eq!(parsed.org, "org");
        assert_eq!(parsed.repo, "repo");
        assert_eq!(parsed.tag, "Q4_0");
    }

    #[test]
    fn non_hf_reference_does_not_parse() {
        assert!(parse_hf_reference("llama3:q4_0").is_none());
    }
}
