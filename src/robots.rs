//! Robots policy supplement (SPEC_FULL.md §4.8). Not one of the spec's
//! named components, but required by the crawl step that checks
//! `--ignore-robots-txt` before enqueueing a URL. Fetches and caches
//! `robots.txt` per host through the same `http_cache::CacheClient` used
//! for everything else, so it benefits from the same on-disk cache.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::http_cache::{CacheClient, Method, RequestParams};
use crate::model::FetchOutcome;

struct RobotsGroup {
    agents: Vec<String>,
    rules: Vec<(bool, String)>,
}

pub struct RobotsChecker {
    groups_by_host: Mutex<HashMap<String, Vec<RobotsGroup>>>,
}

impl RobotsChecker {
    pub fn new() -> Self {
        Self {
            groups_by_host: Mutex::new(HashMap::new()),
        }
    }

    pub async fn is_allowed(
        &self,
        cache: &CacheClient,
        scheme: &str,
        host: &str,
        port: u16,
        path: &str,
        user_agent: &str,
        timeout: Duration,
    ) -> bool {
        let host_key = format!("{host}:{port}");
        if !self.groups_by_host.lock().expect("robots lock poisoned").contains_key(&host_key) {
            let body = self.fetch_robots_txt(cache, scheme, host, port, user_agent, timeout).await;
            let groups = body.map(|b| parse_robots_txt(&b)).unwrap_or_default();
            self.groups_by_host
                .lock()
                .expect("robots lock poisoned")
                .insert(host_key.clone(), groups);
        }

        let guard = self.groups_by_host.lock().expect("robots lock poisoned");
        let Some(groups) = guard.get(&host_key) else {
            return true;
        };
        evaluate(groups, path, user_agent)
    }

    async fn fetch_robots_txt(
        &self,
        cache: &CacheClient,
        scheme: &str,
        host: &str,
        port: u16,
        user_agent: &str,
        timeout: Duration,
    ) -> Option<String> {
        let url = format!("{scheme}://{host}/robots.txt");
        let params = RequestParams {
            host: host.to_string(),
            port,
            scheme: scheme.to_string(),
            url,
            method: Method::Get,
            timeout,
            user_agent: user_agent.to_string(),
            accept: "text/plain,*/*".to_string(),
            accept_encoding: "identity".to_string(),
            origin: None,
            use_auth: None,
            forced_ip: None,
        };
        match cache.request(params).await {
            FetchOutcome::Ok(response) if response.status_code < 400 => {
                Some(String::from_utf8_lossy(&response.body).to_string())
            }
            _ => None,
        }
    }
}

impl Default for RobotsChecker {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_robots_txt(body: &str) -> Vec<RobotsGroup> {
    let mut groups = Vec::new();
    let mut current_agents: Vec<String> = Vec::new();
    let mut current_rules: Vec<(bool, String)> = Vec::new();
    let mut in_group = false;

    let flush = |groups: &mut Vec<RobotsGroup>, agents: &mut Vec<String>, rules: &mut Vec<(bool, String)>| {
        if !agents.is_empty() {
            groups.push(RobotsGroup {
                agents: std::mem::take(agents),
                rules: std::mem::take(rules),
            });
        }
    };

    for raw_line in body.lines() {
        let line = raw_line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim().to_string();

        match key.as_str() {
            "user-agent" => {
                if in_group && !current_rules.is_empty() {
                    flush(&mut groups, &mut current_agents, &mut current_rules);
                    in_group = false;
                }
                current_agents.push(value.to_ascii_lowercase());
                in_group = true;
            }
            "disallow" if !value.is_empty() => {
                current_rules.push((true, value));
            }
            "disallow" => {
                // Empty Disallow means "allow everything" for this group.
            }
            "allow" => {
                current_rules.push((false, value));
            }
            _ => {}
        }
    }
    flush(&mut groups, &mut current_agents, &mut current_rules);
    groups
}

fn evaluate(groups: &[RobotsGroup], path: &str, user_agent: &str) -> bool {
    let ua_lower = user_agent.to_ascii_lowercase();

    let chosen = groups
        .iter()
        .find(|g| g.agents.iter().any(|a| a != "*" && ua_lower.contains(a.as_str())))
        .or_else(|| groups.iter().find(|g| g.agents.iter().any(|a| a == "*")));

    let Some(group) = chosen else {
        return true;
    };

    let mut best: Option<(usize, bool)> = None;
    for (disallow, prefix) in &group.rules {
        if path.starts_with(prefix.as_str()) {
            let len = prefix.len();
            if best.map(|(best_len, _)| len >= best_len).unwrap_or(true) {
                best = Some((len, *disallow));
            }
        }
    }

    match best {
        Some((_, disallow)) => !disallow,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_wins() {
        let groups = parse_robots_txt(
            "User-agent: *\nDisallow: /private\nAllow: /private/public\n",
        );
        assert!(!evaluate(&groups, "/private/secret", "sitecrawl/0.1"));
        assert!(evaluate(&groups, "/private/public/page", "sitecrawl/0.1"));
        assert!(evaluate(&groups, "/other", "sitecrawl/0.1"));
    }

    #[test]
    fn specific_user_agent_group_preferred_over_wildcard() {
        let groups = parse_robots_txt(
            "User-agent: *\nDisallow: /\nUser-agent: sitecrawl\nDisallow:\n",
        );
        assert!(evaluate(&groups, "/anything", "sitecrawl/0.1"));
        assert!(!evaluate(&groups, "/anything", "some-other-bot/1.0"));
    }

    #[test]
    fn missing_robots_txt_allows_everything() {
        let groups: Vec<RobotsGroup> = Vec::new();
        assert!(evaluate(&groups, "/anything", "sitecrawl/0.1"));
    }
}
