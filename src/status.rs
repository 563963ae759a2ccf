//! C7 — Status Store (SPEC_FULL.md §4, component C7).
//!
//! The single source of truth for "have we seen this URL" and "what did
//! we learn about it" during a crawl. Shared across workers behind an
//! `Arc`; all mutation goes through `tokio::sync::Mutex` rather than a
//! blocking lock, since callers are always inside async tasks.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::model::VisitedUrl;

/// In-memory visited-URL ledger. A file-backed variant would shard by
/// `uq_id` the same way `http_cache::CacheClient` shards by hash, but
/// nothing in this crate's scope needs the crawl state to outlive the
/// process, so only the in-memory form is implemented.
#[derive(Default)]
pub struct StatusStore {
    visited: Mutex<HashMap<u64, VisitedUrl>>,
    bodies: Mutex<HashMap<u64, Vec<u8>>>,
    final_user_agent: Mutex<Option<String>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_visited_url(&self, visited: VisitedUrl) {
        let mut guard = self.visited.lock().expect("status store lock poisoned");
        guard.insert(visited.uq_id, visited);
    }

    pub fn contains(&self, uq_id: u64) -> bool {
        self.visited.lock().expect("status store lock poisoned").contains_key(&uq_id)
    }

    pub fn get_visited_url(&self, uq_id: u64) -> Option<VisitedUrl> {
        self.visited
            .lock()
            .expect("status store lock poisoned")
            .get(&uq_id)
            .cloned()
    }

    pub fn visited_count(&self) -> usize {
        self.visited.lock().expect("status store lock poisoned").len()
    }

    pub fn all_visited_urls(&self) -> Vec<VisitedUrl> {
        self.visited
            .lock()
            .expect("status store lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn set_url_body(&self, uq_id: u64, body: Vec<u8>) {
        self.bodies.lock().expect("status store lock poisoned").insert(uq_id, body);
    }

    pub fn get_url_body(&self, uq_id: u64) -> Option<Vec<u8>> {
        self.bodies.lock().expect("status store lock poisoned").get(&uq_id).cloned()
    }

    pub fn set_final_user_agent(&self, user_agent: String) {
        *self.final_user_agent.lock().expect("status store lock poisoned") = Some(user_agent);
    }

    pub fn final_user_agent(&self) -> Option<String> {
        self.final_user_agent.lock().expect("status store lock poisoned").clone()
    }

    /// Summary counters for the end-of-crawl report: (ok, redirects,
    /// client/server errors, transport failures, skipped).
    pub fn summary(&self) -> CrawlSummary {
        let guard = self.visited.lock().expect("status store lock poisoned");
        let mut summary = CrawlSummary::default();
        for visited in guard.values() {
            summary.total += 1;
            match visited.status_code {
                200..=299 => summary.ok += 1,
                300..=399 => summary.redirects += 1,
                400..=599 => summary.http_errors += 1,
                code if code < 0 => summary.transport_failures += 1,
                _ => {}
            }
        }
        summary
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CrawlSummary {
    pub total: usize,
    pub ok: usize,
    pub redirects: usize,
    pub http_errors: usize,
    pub transport_failures: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceKind;
    use std::collections::HashMap as Map;

    fn sample(uq_id: u64, status_code: i32) -> VisitedUrl {
        VisitedUrl {
            uq_id,
            source_uq_id: None,
            url: format!("https://x.test/{uq_id}"),
            status_code,
            request_time_ms: 10,
            size: 0,
            content_type: ResourceKind::Html,
            extras: Map::new(),
            is_external: false,
            is_allowed_for_crawling: true,
            crawled_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn add_and_fetch_round_trips() {
        let store = StatusStore::new();
        store.add_visited_url(sample(1, 200));
        assert!(store.contains(1));
        assert_eq!(store.get_visited_url(1).unwrap().status_code, 200);
    }

    #[test]
    fn summary_buckets_status_codes() {
        let store = StatusStore::new();
        store.add_visited_url(sample(1, 200));
        store.add_visited_url(sample(2, 301));
        store.add_visited_url(sample(3, 500));
        store.add_visited_url(sample(4, -2));
        let summary = store.summary();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.ok, 1);
        assert_eq!(summary.redirects, 1);
        assert_eq!(summary.http_errors, 1);
        assert_eq!(summary.transport_failures, 1);
    }
}
