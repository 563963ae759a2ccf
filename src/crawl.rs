//! C4 — Crawl Engine (SPEC_FULL.md §4, component C4).
//!
//! Owns the frontier, the dedup set, and a bounded pool of worker tasks
//! pulled from a `JoinSet`. Each worker repeatedly pops a URL, runs it
//! through scope/robots/regex checks, fetches it via `http_cache`,
//! extracts further links via `content`, and — when `--offline-export-dir`
//! is set — rewrites and writes it via `rewrite`/`mirror_writer`. State
//! that used to live in module-level globals (spec.md §9) is instead
//! carried explicitly in `CrawlEngine`, shared across workers behind
//! `Arc`.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{self, CrawlConfig};
use crate::content;
use crate::http_cache::{CacheClient, Method, RequestParams};
use crate::mirror_writer::MirrorWriter;
use crate::model::{uq_id, FetchOutcome, FrontierEntry, ResourceKind, SkipReason, VisitedUrl};
use crate::robots::RobotsChecker;
use crate::rewrite;
use crate::status::{CrawlSummary, StatusStore};
use crate::url_model::{self, ParsedUrl};

struct Frontier {
    queue: Mutex<VecDeque<FrontierEntry>>,
    seen: Mutex<HashSet<u64>>,
}

impl Frontier {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            seen: Mutex::new(HashSet::new()),
        }
    }

    fn pop(&self) -> Option<FrontierEntry> {
        self.queue.lock().expect("frontier lock poisoned").pop_front()
    }

    fn len(&self) -> usize {
        self.queue.lock().expect("frontier lock poisoned").len()
    }

    /// Returns `true` if the entry was enqueued, `false` if it was
    /// already seen (pure dedup, no policy decision here).
    fn push_if_new(&self, entry: FrontierEntry) -> bool {
        let uq = uq_id(&entry.url);
        let mut seen = self.seen.lock().expect("frontier lock poisoned");
        if !seen.insert(uq) {
            return false;
        }
        drop(seen);
        self.queue.lock().expect("frontier lock poisoned").push_back(entry);
        true
    }
}

pub struct CrawlEngine {
    config: Arc<CrawlConfig>,
    cache: Arc<CacheClient>,
    robots: Arc<RobotsChecker>,
    status: Arc<StatusStore>,
    mirror: Option<Arc<MirrorWriter>>,
    initial_host: String,
    frontier: Arc<Frontier>,
    active_workers: Arc<AtomicUsize>,
}

impl CrawlEngine {
    pub fn new(config: Arc<CrawlConfig>) -> anyhow::Result<Self> {
        let cache = Arc::new(CacheClient::new(&config)?);
        let initial_parsed = url_model::parse(&config.start_url)?;
        let initial_host = initial_parsed.host.clone().unwrap_or_default();

        let mirror = config
            .offline_export_dir
            .clone()
            .map(|root| Arc::new(MirrorWriter::new(root, config.ignore_store_file_error)));

        Ok(Self {
            config,
            cache,
            robots: Arc::new(RobotsChecker::new()),
            status: Arc::new(StatusStore::new()),
            mirror,
            initial_host,
            frontier: Arc::new(Frontier::new()),
            active_workers: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn status(&self) -> &StatusStore {
        &self.status
    }

    /// Drains the frontier with `config.workers` concurrent tasks until
    /// it is empty and every in-flight fetch has settled, or `cancel` is
    /// triggered.
    pub async fn run(&self, cancel: CancellationToken) -> anyhow::Result<CrawlSummary> {
        self.status.set_final_user_agent(self.config.user_agent.clone());
        self.frontier.push_if_new(FrontierEntry {
            url: self.config.start_url.clone(),
            depth: 0,
            source_uq_id: None,
        });

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..self.config.workers {
            let frontier = Arc::clone(&self.frontier);
            let active = Arc::clone(&self.active_workers);
            let cancel = cancel.clone();
            let engine = self.clone_handles();
            tasks.spawn(async move { worker_loop(engine, frontier, active, cancel).await });
        }

        let mut first_error = None;
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                    cancel.cancel();
                }
                Err(join_err) => {
                    if first_error.is_none() {
                        first_error = Some(anyhow::anyhow!("worker task panicked: {join_err}"));
                    }
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        self.write_mirror().await?;

        Ok(self.status.summary())
    }

    /// Second pass over every fetched resource (spec.md §2's fetch-then-
    /// transform data flow): by now the frontier is fully drained, so
    /// `status.get_visited_url` can resolve links to sibling pages that
    /// were only discovered and fetched after the linking page itself was
    /// processed.
    async fn write_mirror(&self) -> anyhow::Result<()> {
        if self.mirror.is_none() {
            return Ok(());
        }
        let engine = self.clone_handles();
        for visited in self.status.all_visited_urls() {
            if !(200..400).contains(&visited.status_code) {
                continue;
            }
            let Some(body) = self.status.get_url_body(visited.uq_id) else {
                continue;
            };
            write_to_mirror(&engine, &visited.url, visited.content_type, &body).await?;
        }
        Ok(())
    }

    fn clone_handles(&self) -> EngineHandles {
        EngineHandles {
            config: Arc::clone(&self.config),
            cache: Arc::clone(&self.cache),
            robots: Arc::clone(&self.robots),
            status: Arc::clone(&self.status),
            mirror: self.mirror.clone(),
            initial_host: self.initial_host.clone(),
        }
    }
}

/// The subset of `CrawlEngine` state a worker task needs; split out so it
/// can be moved into a `'static` spawned task without cloning the whole
/// engine (the frontier and active-worker counter are shared separately).
#[derive(Clone)]
struct EngineHandles {
    config: Arc<CrawlConfig>,
    cache: Arc<CacheClient>,
    robots: Arc<RobotsChecker>,
    status: Arc<StatusStore>,
    mirror: Option<Arc<MirrorWriter>>,
    initial_host: String,
}

async fn worker_loop(
    engine: EngineHandles,
    frontier: Arc<Frontier>,
    active: Arc<AtomicUsize>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let Some(entry) = frontier.pop() else {
            if active.load(Ordering::SeqCst) == 0 {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            continue;
        };

        active.fetch_add(1, Ordering::SeqCst);
        let result = tokio::select! {
            result = process_entry(&engine, &frontier, &entry) => result,
            _ = cancel.cancelled() => Ok(()),
        };
        active.fetch_sub(1, Ordering::SeqCst);

        if let Err(err) = result {
            return Err(err);
        }
    }
}

fn in_scope(engine: &EngineHandles, host: &str, is_page: bool) -> bool {
    if host.eq_ignore_ascii_case(&engine.initial_host) {
        return true;
    }
    if is_page {
        config::host_matches_any(host, &engine.config.allowed_domain_for_crawling)
    } else {
        config::host_matches_any(host, &engine.config.allowed_domain_for_external_files)
            || config::host_matches_any(host, &engine.config.allowed_domain_for_crawling)
    }
}

fn passes_regex_filters(engine: &EngineHandles, url: &str, is_page: bool) -> bool {
    if engine.config.regex_filtering_only_for_pages && !is_page {
        return true;
    }
    if !engine.config.include_regex.is_empty()
        && !engine.config.include_regex.iter().any(|r| r.is_match(url))
    {
        return false;
    }
    if engine.config.ignore_regex.iter().any(|r| r.is_match(url)) {
        return false;
    }
    true
}

fn disabled_by_policy(engine: &EngineHandles, parsed: &ParsedUrl) -> bool {
    engine.config.disabled_kinds().matches(parsed)
}

fn record_skip(engine: &EngineHandles, url: &str, uq: u64, source_uq: Option<u64>, reason: SkipReason) {
    engine.status.add_visited_url(VisitedUrl {
        uq_id: uq,
        source_uq_id: source_uq,
        url: url.to_string(),
        status_code: reason.status_code(),
        request_time_ms: 0,
        size: 0,
        content_type: ResourceKind::OtherFile,
        extras: Default::default(),
        is_external: false,
        is_allowed_for_crawling: false,
        crawled_at: chrono::Utc::now(),
    });
}

async fn process_entry(
    engine: &EngineHandles,
    frontier: &Arc<Frontier>,
    entry: &FrontierEntry,
) -> anyhow::Result<()> {
    let uq = uq_id(&entry.url);
    if engine.status.contains(uq) {
        return Ok(());
    }

    if entry.url.len() > engine.config.max_url_length {
        record_skip(engine, &entry.url, uq, entry.source_uq_id, SkipReason::MaxUrlLengthExceeded);
        return Ok(());
    }

    let Ok(parsed) = url_model::parse(&entry.url) else {
        return Ok(());
    };
    let host = parsed.host.clone().unwrap_or_default();
    let is_page = !url_model::is_static_file(&parsed);
    let is_external = !host.eq_ignore_ascii_case(&engine.initial_host);

    if !in_scope(engine, &host, is_page)
        || !passes_regex_filters(engine, &entry.url, is_page)
        || disabled_by_policy(engine, &parsed)
    {
        record_skip(engine, &entry.url, uq, entry.source_uq_id, SkipReason::OutOfScope);
        return Ok(());
    }

    if engine.status.visited_count() >= engine.config.max_visited_urls {
        record_skip(engine, &entry.url, uq, entry.source_uq_id, SkipReason::MaxVisitedUrlsReached);
        return Ok(());
    }

    if !engine.config.ignore_robots_txt {
        let allowed = engine
            .robots
            .is_allowed(
                &engine.cache,
                parsed.scheme.as_deref().unwrap_or("https"),
                &host,
                parsed.port,
                &parsed.path,
                &engine.config.user_agent,
                engine.config.timeout,
            )
            .await;
        if !allowed {
            record_skip(engine, &entry.url, uq, entry.source_uq_id, SkipReason::RobotsDisallowed);
            return Ok(());
        }
    }

    let params = RequestParams {
        host: host.clone(),
        port: parsed.port,
        scheme: parsed.scheme.clone().unwrap_or_else(|| "https".to_string()),
        url: entry.url.clone(),
        method: Method::Get,
        timeout: engine.config.timeout,
        user_agent: engine.config.user_agent.clone(),
        accept: "text/html,application/xhtml+xml,*/*;q=0.8".to_string(),
        accept_encoding: engine.config.accept_encoding.clone(),
        origin: None,
        use_auth: engine.config.http_auth.clone(),
        forced_ip: None,
    };

    let outcome = engine.cache.request(params).await;
    let status_code = outcome.status_code();

    match outcome {
        FetchOutcome::Ok(response) => {
            let kind = content::classify(&response, &parsed);
            let body_text = || String::from_utf8_lossy(&response.body).to_string();

            engine.status.add_visited_url(VisitedUrl {
                uq_id: uq,
                source_uq_id: entry.source_uq_id,
                url: entry.url.clone(),
                status_code,
                request_time_ms: response.exec_time_ms,
                size: response.body.len(),
                content_type: kind,
                extras: Default::default(),
                is_external,
                is_allowed_for_crawling: true,
                crawled_at: chrono::Utc::now(),
            });

            match kind {
                ResourceKind::Html => {
                    let html = body_text();
                    for found in content::extract_html_urls(&html, &entry.url) {
                        if let Ok(absolute) = url_model::resolve_relative(&entry.url, &found.raw_href) {
                            enqueue(engine, frontier, absolute, entry.depth + 1, Some(uq));
                        }
                    }
                }
                ResourceKind::Stylesheet => {
                    let css = body_text();
                    for found in content::extract_css_urls(&css, &entry.url) {
                        if let Ok(absolute) = url_model::resolve_relative(&entry.url, &found.raw_href) {
                            enqueue(engine, frontier, absolute, entry.depth + 1, Some(uq));
                        }
                    }
                }
                _ => {}
            }

            if engine.mirror.is_some() {
                engine.status.set_url_body(uq, response.body);
            }
        }
        FetchOutcome::TransportError(failure) => {
            engine.status.add_visited_url(VisitedUrl {
                uq_id: uq,
                source_uq_id: entry.source_uq_id,
                url: entry.url.clone(),
                status_code: failure.status_code(),
                request_time_ms: 0,
                size: 0,
                content_type: ResourceKind::OtherFile,
                extras: Default::default(),
                is_external,
                is_allowed_for_crawling: true,
                crawled_at: chrono::Utc::now(),
            });
        }
        FetchOutcome::Skipped(reason) => {
            record_skip(engine, &entry.url, uq, entry.source_uq_id, reason);
        }
    }

    Ok(())
}

fn enqueue(engine: &EngineHandles, frontier: &Arc<Frontier>, url: String, depth: u32, source_uq: Option<u64>) {
    if frontier.len() >= engine.config.max_queue_length {
        let uq = uq_id(&url);
        record_skip(engine, &url, uq, source_uq, SkipReason::QueueFull);
        return;
    }
    frontier.push_if_new(FrontierEntry { url, depth, source_uq_id: source_uq });
}

async fn write_to_mirror(
    engine: &EngineHandles,
    url: &str,
    kind: ResourceKind,
    body: &[u8],
) -> anyhow::Result<()> {
    let Some(mirror) = &engine.mirror else {
        return Ok(());
    };

    let mirror_path = rewrite::mirror_relative_path(url, &engine.initial_host);
    let status = Arc::clone(&engine.status);
    let initial_host = engine.initial_host.clone();
    let resolve = move |absolute: &str| -> Option<PathBuf> {
        let target_uq = uq_id(absolute);
        let visited = status.get_visited_url(target_uq)?;
        if (200..400).contains(&visited.status_code) {
            Some(rewrite::mirror_relative_path(absolute, &initial_host))
        } else {
            None
        }
    };
    let disabled_kinds = engine.config.disabled_kinds();
    let disabled = move |absolute: &str| -> bool {
        url_model::parse(absolute).map(|p| disabled_kinds.matches(&p)).unwrap_or(false)
    };

    let final_bytes: Vec<u8> = match kind {
        ResourceKind::Html => {
            let html = String::from_utf8_lossy(body).to_string();
            let depth = url_model::offline_base_url_depth(url);
            let rewritten = rewrite::rewrite_html(&html, url, &mirror_path, depth, &resolve, &disabled);
            rewrite::apply_replace_rules(&rewritten, &engine.config.replace_content).into_bytes()
        }
        ResourceKind::Stylesheet => {
            let css = String::from_utf8_lossy(body).to_string();
            let rewritten = rewrite::rewrite_css(&css, url, &mirror_path, &resolve, &disabled);
            rewrite::apply_replace_rules(&rewritten, &engine.config.replace_content).into_bytes()
        }
        ResourceKind::Script => {
            let js = String::from_utf8_lossy(body).to_string();
            let rewritten = rewrite::rewrite_js(&js);
            rewrite::apply_replace_rules(&rewritten, &engine.config.replace_content).into_bytes()
        }
        _ => body.to_vec(),
    };

    mirror.write_or_notice(&mirror_path, &final_bytes).await?;
    Ok(())
}
