//! Plain data records shared across the crawl pipeline (spec.md §3).
//!
//! These types carry no behavior beyond small, pure helpers; the engine,
//! cache client, and transformer all read and write them but none of them
//! own process-wide mutable state.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// An immutable-by-construction decomposition of an absolute or
/// protocol-relative URL. See `url_model::parse`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedUrl {
    pub scheme: Option<String>,
    pub host: Option<String>,
    pub port: u16,
    pub path: String,
    pub query: Option<String>,
    pub fragment: Option<String>,
    pub extension: Option<String>,
}

/// Content-type classification assigned to a fetched resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    Html,
    Script,
    Stylesheet,
    Image,
    Font,
    Document,
    Json,
    OtherFile,
    Redirect,
}

/// Negative transport-failure sentinels (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportFailure {
    ConnectionFailed,
    Timeout,
    ServerReset,
    SendError,
}

impl TransportFailure {
    pub fn status_code(self) -> i32 {
        match self {
            TransportFailure::ConnectionFailed => -1,
            TransportFailure::Timeout => -2,
            TransportFailure::ServerReset => -3,
            TransportFailure::SendError => -4,
        }
    }
}

/// Reasons a URL was never sent over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    MaxUrlLengthExceeded,
    QueueFull,
    OutOfScope,
    RobotsDisallowed,
    MaxVisitedUrlsReached,
}

impl SkipReason {
    pub fn status_code(&self) -> i32 {
        -6
    }
}

/// The explicit sum type spec.md §9 calls for in place of exception-driven
/// per-URL flow: `Ok(response) | TransportError(code) | Skipped(reason)`.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Ok(HttpResponse),
    TransportError(TransportFailure),
    Skipped(SkipReason),
}

impl FetchOutcome {
    pub fn status_code(&self) -> i32 {
        match self {
            FetchOutcome::Ok(resp) => resp.status_code as i32,
            FetchOutcome::TransportError(t) => t.status_code(),
            FetchOutcome::Skipped(s) => s.status_code(),
        }
    }
}

/// HTTP status codes and transport sentinels that must never be served
/// from the cache (spec.md §3 "retry set").
pub fn is_in_retry_set(status_code: i32) -> bool {
    matches!(status_code, 429 | 500 | 502 | 503) || status_code < 0
}

/// A normalized HTTP response as seen by downstream parsers. 3xx redirects
/// with a `location` header are rewritten at construction time into a
/// synthesized `text/html` body carrying a `<meta http-equiv="refresh">`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpResponse {
    pub url: String,
    pub status_code: u16,
    pub body: Vec<u8>,
    pub headers: HashMap<String, Vec<String>>,
    pub exec_time_ms: u64,
    pub loaded_from_cache: bool,
    pub skipped_reason: Option<String>,
}

impl HttpResponse {
    /// Applies the 3xx→meta-refresh synthesis rule described in spec.md §3.
    pub fn new(
        url: String,
        status_code: u16,
        body: Vec<u8>,
        mut headers: HashMap<String, Vec<String>>,
        exec_time_ms: u64,
        loaded_from_cache: bool,
    ) -> Self {
        let body = if (300..400).contains(&status_code) {
            if let Some(location) = headers.get("location").and_then(|v| v.first()) {
                let synthesized = format!(
                    "<!doctype html><html><head><meta http-equiv=\"refresh\" content=\"0;url={location}\"></head><body></body></html>"
                );
                headers.insert("content-type".to_string(), vec!["text/html".to_string()]);
                synthesized.into_bytes()
            } else {
                body
            }
        } else {
            body
        };

        Self {
            url,
            status_code,
            body,
            headers,
            exec_time_ms,
            loaded_from_cache,
            skipped_reason: None,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get("content-type")
            .and_then(|v| v.first())
            .map(|s| s.as_str())
    }
}

/// Which HTML/CSS/JS construct a `FoundUrl` was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceAttr {
    AHref,
    ImgSrc,
    LinkHref,
    ScriptSrc,
    InlineScriptSrc,
    CssUrl,
    MetaRefresh,
}

/// A URL candidate discovered while parsing a document, before scope
/// evaluation. `raw_href` is retained verbatim so the original text can be
/// located and rewritten in place later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundUrl {
    pub raw_href: String,
    pub source_url: String,
    pub source_attr: SourceAttr,
}

/// The outcome record for one fetch (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitedUrl {
    pub uq_id: u64,
    pub source_uq_id: Option<u64>,
    pub url: String,
    pub status_code: i32,
    pub request_time_ms: u64,
    pub size: usize,
    pub content_type: ResourceKind,
    pub extras: HashMap<String, String>,
    pub is_external: bool,
    pub is_allowed_for_crawling: bool,
    pub crawled_at: chrono::DateTime<chrono::Utc>,
}

/// Frontier queue entry (spec.md §3). Dedup key is `uq_id(url)`.
#[derive(Debug, Clone)]
pub struct FrontierEntry {
    pub url: String,
    pub depth: u32,
    pub source_uq_id: Option<u64>,
}

/// A stable hash of an absolute URL, used as the primary key throughout
/// Status and the frontier.
pub fn uq_id(absolute_url: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    absolute_url.hash(&mut hasher);
    hasher.finish()
}
