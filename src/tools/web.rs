//! Web access tools: search and fetch URLs.
//!
//! Both tools report failure inside their result instead of returning an
//! error, so a flaky network never aborts the calling stage.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const USER_AGENT: &str = "Mozilla/5.0 (compatible; codegen-pipeline/0.1)";
const DEFAULT_SEARCH_URL: &str = "https://html.duckduckgo.com/html/";

const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 20;
const DEFAULT_MAX_BYTES: usize = 50_000;
const MIN_MAX_BYTES: usize = 1_000;
const MAX_MAX_BYTES: usize = 200_000;
const DEFAULT_MAX_RESULTS: usize = 5;
const MAX_RESULTS_LIMIT: usize = 10;

fn default_fetch_timeout() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

fn default_max_bytes() -> usize {
    DEFAULT_MAX_BYTES
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FetchRemoteArgs {
    pub url: String,
    #[serde(default = "default_fetch_timeout")]
    pub timeout_s: u64,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
}

impl FetchRemoteArgs {
    pub(super) fn validate(&self) -> Result<(), String> {
        let parsed = url::Url::parse(&self.url).map_err(|e| format!("invalid url: {e}"))?;
        match parsed.scheme() {
            "http" | "https" => Ok(()),
            other => Err(format!("unsupported url scheme '{other}'")),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_s.clamp(5, 60))
    }

    pub fn byte_limit(&self) -> usize {
        self.max_bytes.clamp(MIN_MAX_BYTES, MAX_MAX_BYTES)
    }
}

/// Outcome of a fetch. `status` is `None` when no HTTP response arrived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchResult {
    pub url: String,
    pub status: Option<u16>,
    pub error: String,
    pub body_text: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl FetchResult {
    fn failed(url: &str, status: Option<u16>, error: String) -> Self {
        Self {
            url: url.to_string(),
            status,
            error,
            body_text: String::new(),
            truncated: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchRemoteArgs {
    pub query: String,
    #[serde(default = "default_max_results", alias = "num_results")]
    pub max_results: usize,
}

impl SearchRemoteArgs {
    pub(super) fn validate(&self) -> Result<(), String> {
        if self.query.trim().is_empty() {
            return Err("'query' must not be empty".to_string());
        }
        Ok(())
    }

    pub fn result_limit(&self) -> usize {
        self.max_results.clamp(1, MAX_RESULTS_LIMIT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

impl SearchHit {
    fn error(message: String) -> Self {
        Self {
            title: String::new(),
            url: String::new(),
            snippet: format!("[search_remote error] {message}"),
        }
    }
}

/// Shared HTTP client for the remote-content tools.
#[derive(Debug, Clone)]
pub struct WebClient {
    client: reqwest::Client,
    search_url: String,
}

impl WebClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_search_url(DEFAULT_SEARCH_URL)
    }

    /// Point searches at a different DuckDuckGo-compatible HTML endpoint.
    pub fn with_search_url(search_url: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            search_url: search_url.to_string(),
        })
    }

    /// Fetch a URL, reading at most `max_bytes` of the body.
    pub async fn fetch(&self, args: &FetchRemoteArgs) -> FetchResult {
        let limit = args.byte_limit();

        let mut response = match self
            .client
            .get(&args.url)
            .timeout(args.timeout())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("fetch_remote {} failed: {}", args.url, e);
                return FetchResult::failed(&args.url, None, describe_request_error(&e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            return FetchResult::failed(
                &args.url,
                Some(status.as_u16()),
                format!("HTTP error: {status}"),
            );
        }

        let charset = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(charset_from_content_type);

        let mut body = Vec::new();
        let mut truncated = false;
        let mut error = String::new();
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    let remaining = limit - body.len();
                    if chunk.len() >= remaining {
                        body.extend_from_slice(&chunk[..remaining]);
                        truncated = chunk.len() > remaining;
                        break;
                    }
                    body.extend_from_slice(&chunk);
                }
                Ok(None) => break,
                Err(e) => {
                    error = format!("Body read failed: {}", describe_request_error(&e));
                    break;
                }
            }
        }

        FetchResult {
            url: args.url.clone(),
            status: Some(status.as_u16()),
            error,
            body_text: decode_body(&body, charset.as_deref()),
            truncated,
        }
    }

    /// Search the web via the DuckDuckGo HTML endpoint.
    pub async fn search(&self, args: &SearchRemoteArgs) -> Vec<SearchHit> {
        let url = format!("{}?q={}", self.search_url, urlencoding::encode(&args.query));

        let response = match self.client.get(&url).timeout(Duration::from_secs(20)).send().await {
            Ok(response) => response,
            Err(e) => return vec![SearchHit::error(describe_request_error(&e))],
        };
        if !response.status().is_success() {
            return vec![SearchHit::error(format!("HTTP error: {}", response.status()))];
        }
        let html = match response.text().await {
            Ok(html) => html,
            Err(e) => return vec![SearchHit::error(describe_request_error(&e))],
        };

        extract_ddg_results(&html, args.result_limit())
    }
}

fn describe_request_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("Request timeout: {e}")
    } else if e.is_connect() {
        format!("Connection failed: {e}")
    } else {
        format!("Request failed: {e}")
    }
}

/// `text/html; charset=ISO-8859-1` → `iso-8859-1`.
fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .filter_map(|part| part.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("charset"))
        .map(|(_, value)| value.trim().trim_matches('"').to_ascii_lowercase())
        .filter(|value| !value.is_empty())
}

/// Decode with the declared charset (any WHATWG label); unknown or missing
/// labels fall back to lossy UTF-8.
fn decode_body(bytes: &[u8], charset: Option<&str>) -> String {
    let encoding = match charset {
        None => encoding_rs::UTF_8,
        Some(label) => encoding_rs::Encoding::for_label(label.as_bytes()).unwrap_or_else(|| {
            tracing::debug!("Unknown charset {}, decoding as UTF-8", label);
            encoding_rs::UTF_8
        }),
    };
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        tracing::debug!("Body had bytes invalid for {}; replaced", encoding.name());
    }
    text.into_owned()
}

/// Extract search results from DuckDuckGo HTML.
fn extract_ddg_results(html: &str, limit: usize) -> Vec<SearchHit> {
    let mut results = Vec::new();

    for chunk in html.split("class=\"result__body\"").skip(1) {
        if results.len() >= limit {
            break;
        }

        let anchor = chunk.split("class=\"result__a\"").nth(1);

        let title = anchor
            .and_then(|s| s.split('>').nth(1))
            .and_then(|s| s.split('<').next())
            .unwrap_or("")
            .trim();

        let href = anchor
            .and_then(|s| s.split("href=\"").nth(1))
            .and_then(|s| s.split('"').next())
            .map(resolve_ddg_redirect);

        let display_url = chunk
            .split("class=\"result__url\"")
            .nth(1)
            .and_then(|s| s.split('>').nth(1))
            .and_then(|s| s.split('<').next())
            .map(|s| s.trim())
            .unwrap_or("");

        let snippet = chunk
            .split("class=\"result__snippet\"")
            .nth(1)
            .and_then(|s| s.split('>').nth(1))
            .and_then(|s| s.split('<').next())
            .unwrap_or("");

        if title.is_empty() {
            continue;
        }

        let url = match href {
            Some(href) if !href.is_empty() => href,
            _ if display_url.is_empty() => String::new(),
            _ => format!("https://{}", display_url),
        };

        results.push(SearchHit {
            title: html_decode(title),
            url,
            snippet: html_decode(snippet.trim()),
        });
    }

    results
}

/// DuckDuckGo wraps result links as `//duckduckgo.com/l/?uddg=<encoded target>`.
fn resolve_ddg_redirect(href: &str) -> String {
    let href = html_decode(href);
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.clone()
    };

    url::Url::parse(&absolute)
        .ok()
        .and_then(|parsed| {
            parsed
                .query_pairs()
                .find(|(key, _)| key == "uddg")
                .map(|(_, value)| value.into_owned())
        })
        .unwrap_or(absolute)
}

/// Basic HTML entity decoding.
fn html_decode(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charset_from_content_type() {
        assert_eq!(
            charset_from_content_type("text/html; charset=ISO-8859-1").as_deref(),
            Some("iso-8859-1")
        );
        assert_eq!(
            charset_from_content_type("application/json;charset=\"utf-8\"").as_deref(),
            Some("utf-8")
        );
        assert_eq!(charset_from_content_type("application/atom+xml"), None);
    }

    #[test]
    fn test_decode_body_charsets() {
        assert_eq!(decode_body(&[0x63, 0x61, 0x66, 0xE9], Some("iso-8859-1")), "café");
        assert_eq!(decode_body("café".as_bytes(), None), "café");
        // Unknown charset and invalid bytes both degrade instead of failing.
        assert_eq!(decode_body(&[0x61, 0xFF], Some("x-klingon")), "a\u{FFFD}");
    }

    #[test]
    fn test_decode_body_legacy_charsets() {
        assert_eq!(decode_body(&[0x80, 0x35], Some("windows-1252")), "\u{20AC}5");
        assert_eq!(decode_body(&[0xD6, 0xD0, 0xCE, 0xC4], Some("gbk")), "中文");
        assert_eq!(decode_body(&[0x82, 0xA0], Some("shift_jis")), "あ");
    }

    #[test]
    fn test_extract_ddg_results() {
        let html = r#"
            <div class="result__body">
              <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Finfo.arxiv.org%2Fhelp%2Fapi%2F&amp;rut=abc">arXiv API &amp; docs</a>
              <a class="result__url" href="x">info.arxiv.org/help/api</a>
              <a class="result__snippet" href="x">The arXiv API allows programmatic access</a>
            </div>
            <div class="result__body">
              <a class="result__a" href="">Second</a>
              <a class="result__url" href="x">example.com/second</a>
            </div>
            <div class="result__body">
              <a class="result__a" href="https://third.example">Third</a>
            </div>"#;

        let results = extract_ddg_results(html, 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "arXiv API & docs");
        assert_eq!(results[0].url, "https://info.arxiv.org/help/api/");
        assert_eq!(results[0].snippet, "The arXiv API allows programmatic access");
        assert_eq!(results[1].url, "https://example.com/second");
    }

    #[tokio::test]
    async fn test_fetch_unreachable_host_reports_error() {
        let client = WebClient::new().unwrap();
        let args = FetchRemoteArgs {
            url: "http://127.0.0.1:9/unreachable".into(),
            timeout_s: 5,
            max_bytes: 1000,
        };

        let result = client.fetch(&args).await;
        assert_eq!(result.status, None);
        assert!(!result.error.is_empty());
        assert_eq!(result.body_text, "");
    }

    #[tokio::test]
    async fn test_search_failure_embeds_error_entry() {
        let client = WebClient::with_search_url("http://127.0.0.1:9/html/").unwrap();
        let args = SearchRemoteArgs {
            query: "anything".into(),
            max_results: 3,
        };

        let hits = client.search(&args).await;
        assert_eq!(hits.len(), 1);
        assert!(hits[0].snippet.starts_with("[search_remote error]"));
    }

    #[test]
    fn test_fetch_limits_are_clamped() {
        let args = FetchRemoteArgs {
            url: "https://example.com".into(),
            timeout_s: 500,
            max_bytes: 10,
        };
        assert_eq!(args.timeout(), Duration::from_secs(60));
        assert_eq!(args.byte_limit(), MIN_MAX_BYTES);
    }
}
