//! Static audit of generated client-side code for runtime cross-origin fetches.
//!
//! Generated sites must pre-fetch remote data during generation and ship it as
//! a local file. A client-side `fetch("https://api.example.com/...")` is a
//! finding unless the same file also loads a local data file
//! (`.json`, `.xml`, `.csv`) that exists in the sandbox and can serve as the
//! static fallback.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::sandbox::{Sandbox, SandboxResult};

const CLIENT_EXTENSIONS: &[&str] = &["html", "htm", "js", "mjs", "jsx", "ts"];

fn remote_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?:\bfetch|\baxios(?:\.get)?|\.open\(\s*['"][A-Za-z]+['"]\s*,)\s*\(?\s*['"`](https?://[^'"`\s]+)"#,
        )
        .expect("remote call pattern is valid")
    })
}

/// Data files a script or page actually loads: `fetch(...)`, `axios(...)`,
/// `xhr.open(method, ...)`, `$.getJSON(...)` or a `src=` attribute.
fn local_load_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?:\bfetch\s*\(|\baxios(?:\.get)?\s*\(|\.open\(\s*['"][A-Za-z]+['"]\s*,|\bgetJSON\s*\(|\bsrc\s*=)\s*['"`]([^'"`\s?#]+\.(?:json|xml|csv))(?:[?#][^'"`\s]*)?['"`]"#,
        )
        .expect("local data pattern is valid")
    })
}

/// A runtime call to an external host with no local fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFinding {
    pub file: String,
    pub host: String,
    pub url: String,
}

impl std::fmt::Display for AuditFinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} fetches {} at runtime without a pre-generated local fallback",
            self.file, self.url
        )
    }
}

fn is_client_file(path: &str) -> bool {
    path.rsplit_once('.')
        .map(|(_, ext)| CLIENT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn is_local_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "0.0.0.0" | "[::1]" | "::1")
}

/// Resolve a reference made from `file` to a sandbox-relative path.
///
/// A leading `/` is the sandbox root; anything else is relative to the
/// referencing file's directory. `None` if it climbs above the root.
fn resolve_reference(file: &str, reference: &str) -> Option<String> {
    let mut parts: Vec<&str> = match reference.strip_prefix('/') {
        Some(_) => Vec::new(),
        None => file.rsplit_once('/').map(|(dir, _)| dir.split('/').collect()).unwrap_or_default(),
    };
    for segment in reference.trim_start_matches('/').split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

/// True when `source` loads at least one data file present in `available`.
fn loads_local_data(file: &str, source: &str, available: &BTreeSet<String>) -> bool {
    local_load_re()
        .captures_iter(source)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|reference| !reference.contains("://"))
        .filter_map(|reference| resolve_reference(file, reference))
        .any(|path| available.contains(&path))
}

/// Findings for one file's source text, given the sandbox's file listing.
pub fn scan_source(file: &str, source: &str, available: &BTreeSet<String>) -> Vec<AuditFinding> {
    let findings: Vec<AuditFinding> = remote_call_re()
        .captures_iter(source)
        .filter_map(|caps| {
            let url = caps.get(1)?.as_str();
            let host = url::Url::parse(url).ok()?.host_str()?.to_string();
            if is_local_host(&host) {
                return None;
            }
            Some(AuditFinding {
                file: file.to_string(),
                host,
                url: url.to_string(),
            })
        })
        .collect();

    if !findings.is_empty() && loads_local_data(file, source, available) {
        tracing::debug!("{} has a local data fallback for {} remote call(s)", file, findings.len());
        return Vec::new();
    }
    findings
}

/// Scan every client-side file in the sandbox.
pub async fn scan_sandbox(sandbox: &Sandbox) -> SandboxResult<Vec<AuditFinding>> {
    let files = sandbox.list("")?;
    let available: BTreeSet<String> = files.iter().cloned().collect();

    let mut findings = Vec::new();
    for file in files.iter().filter(|f| is_client_file(f)) {
        match sandbox.read(file).await {
            Ok(source) => findings.extend(scan_source(file, &source, &available)),
            // Non-UTF-8 or vanished between list and read; nothing to audit.
            Err(e) => tracing::debug!("Skipping {} in audit: {}", file, e),
        }
    }
    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn available(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_runtime_fetch_is_flagged() {
        let js = r#"
            async function load() {
              const resp = await fetch("https://export.arxiv.org/api/query?search_query=cat:cs.AI");
              return resp.text();
            }"#;
        let findings = scan_source("js/app.js", js, &available(&[]));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].host, "export.arxiv.org");
    }

    #[test]
    fn test_xhr_and_axios_are_flagged() {
        let js = r#"
            xhr.open("GET", 'https://api.example.com/items');
            axios.get(`https://data.example.org/feed`);"#;
        let hosts: Vec<_> = scan_source("a.js", js, &available(&[]))
            .into_iter()
            .map(|f| f.host)
            .collect();
        assert_eq!(hosts, vec!["api.example.com", "data.example.org"]);
    }

    #[test]
    fn test_loaded_local_fallback_clears_findings() {
        let js = r#"
            const data = await fetch("../data/papers.json").then(r => r.json());
            // refresh link only
            fetch("https://export.arxiv.org/api/query").catch(() => data);"#;
        assert!(scan_source("js/app.js", js, &available(&["data/papers.json"])).is_empty());
    }

    #[test]
    fn test_unrelated_data_reference_does_not_clear_findings() {
        let html = r#"<link rel="manifest" href="manifest.json">
            <script>fetch("https://export.arxiv.org/api/query").then(r => r.text())</script>"#;
        let findings = scan_source("index.html", html, &available(&["manifest.json"]));
        assert_eq!(findings.len(), 1);
    }

    #[test]
    fn test_missing_fallback_file_does_not_clear_findings() {
        let html = r#"<script>
            fetch("data/papers.json").catch(() => fetch("https://export.arxiv.org/api/query"));
        </script>"#;
        assert_eq!(scan_source("index.html", html, &available(&[])).len(), 1);
        assert!(scan_source("index.html", html, &available(&["data/papers.json"])).is_empty());
    }

    #[test]
    fn test_localhost_and_relative_are_ignored() {
        let js = r#"fetch("http://localhost:8000/api"); fetch("/api/items");"#;
        assert!(scan_source("a.js", js, &available(&[])).is_empty());
    }

    #[test]
    fn test_resolve_reference() {
        assert_eq!(resolve_reference("index.html", "data/a.json").as_deref(), Some("data/a.json"));
        assert_eq!(resolve_reference("js/app.js", "./b.json").as_deref(), Some("js/b.json"));
        assert_eq!(resolve_reference("js/app.js", "/data/c.csv").as_deref(), Some("data/c.csv"));
        assert_eq!(resolve_reference("index.html", "../x.json"), None);
    }

    #[tokio::test]
    async fn test_scan_sandbox_only_client_files() {
        let temp = tempdir().unwrap();
        let sandbox = Sandbox::create(temp.path()).unwrap();
        sandbox
            .write("generate.py", "urllib.request.urlopen('https://export.arxiv.org/api/query')")
            .await
            .unwrap();
        sandbox
            .write("index.html", "<script>fetch('https://export.arxiv.org/api/query')</script>")
            .await
            .unwrap();

        let findings = scan_sandbox(&sandbox).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].file, "index.html");
    }

    #[tokio::test]
    async fn test_scan_sandbox_accepts_generated_data_file() {
        let temp = tempdir().unwrap();
        let sandbox = Sandbox::create(temp.path()).unwrap();
        let page = r#"<script>
            fetch("data/papers.json").then(r => r.json()).then(render)
              .catch(() => fetch("https://export.arxiv.org/api/query"));
        </script>"#;
        sandbox.write("index.html", page).await.unwrap();
        assert_eq!(scan_sandbox(&sandbox).await.unwrap().len(), 1);

        sandbox.write("data/papers.json", "[]").await.unwrap();
        assert!(scan_sandbox(&sandbox).await.unwrap().is_empty());
    }
}
