//! Explicit crawl context (SPEC_FULL.md §2.3), replacing the global state
//! spec.md §9 calls out. Built once from `cli::CrawlArgs` and threaded
//! through the engine inside an `Arc`.

use std::path::PathBuf;

use regex::Regex;

use crate::cli::{CrawlArgs, Device};
use crate::error::CrawlError;

#[derive(Debug, Clone)]
pub struct ReplaceRule {
    pub pattern: Regex,
    pub replacement: String,
}

#[derive(Debug, Clone)]
pub struct HttpAuth {
    pub user: String,
    pub pass: String,
}

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub start_url: String,
    pub workers: usize,
    pub timeout: std::time::Duration,
    pub proxy: Option<String>,
    pub http_auth: Option<HttpAuth>,
    pub user_agent: String,
    pub accept_encoding: String,

    pub include_regex: Vec<Regex>,
    pub ignore_regex: Vec<Regex>,
    pub regex_filtering_only_for_pages: bool,
    pub ignore_robots_txt: bool,

    pub http_cache_dir: Option<PathBuf>,
    pub http_cache_compression: bool,

    pub max_queue_length: usize,
    pub max_visited_urls: usize,
    pub max_url_length: usize,

    pub offline_export_dir: Option<PathBuf>,
    pub allowed_domain_for_external_files: Vec<String>,
    pub allowed_domain_for_crawling: Vec<String>,

    pub replace_content: Vec<ReplaceRule>,

    pub disable_javascript: bool,
    pub disable_styles: bool,
    pub disable_fonts: bool,
    pub disable_images: bool,
    pub disable_files: bool,

    pub ignore_store_file_error: bool,
}

impl CrawlConfig {
    pub fn disabled_kinds(&self) -> crate::url_model::DisabledKinds {
        crate::url_model::DisabledKinds {
            javascript: self.disable_javascript,
            styles: self.disable_styles,
            fonts: self.disable_fonts,
            images: self.disable_images,
            files: self.disable_files,
        }
    }
}

fn default_user_agent(device: Device) -> String {
    let version = env!("CARGO_PKG_VERSION");
    match device {
        Device::Desktop => format!("sitecrawl/{version} (desktop)"),
        Device::Mobile => format!(
            "sitecrawl/{version} (mobile; Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X))"
        ),
        Device::Tablet => format!(
            "sitecrawl/{version} (tablet; Mozilla/5.0 (iPad; CPU OS 17_0 like Mac OS X))"
        ),
    }
}

impl CrawlConfig {
    pub fn from_args(args: CrawlArgs) -> Result<Self, CrawlError> {
        if args.workers == 0 {
            return Err(CrawlError::Config("--workers must be >= 1".to_string()));
        }
        if args.max_url_length == 0 {
            return Err(CrawlError::Config(
                "--max-url-length must be >= 1".to_string(),
            ));
        }
        if args.timeout == 0 {
            return Err(CrawlError::Config("--timeout must be >= 1".to_string()));
        }
        if args.url.len() > args.max_url_length {
            return Err(CrawlError::Config(format!(
                "--url exceeds --max-url-length ({} > {})",
                args.url.len(),
                args.max_url_length
            )));
        }
        crate::url_model::parse(&args.url)
            .map_err(|err| CrawlError::Config(format!("invalid --url: {err}")))?;

        let http_auth = match args.http_auth {
            Some(raw) => {
                let (user, pass) = raw.split_once(':').ok_or_else(|| {
                    CrawlError::Config("--http-auth must be in user:pass form".to_string())
                })?;
                Some(HttpAuth {
                    user: user.to_string(),
                    pass: pass.to_string(),
                })
            }
            None => None,
        };

        let include_regex = compile_all(&args.include_regex, "--include-regex")?;
        let ignore_regex = compile_all(&args.ignore_regex, "--ignore-regex")?;

        let http_cache_dir = if args.http_cache_dir.eq_ignore_ascii_case("off") {
            None
        } else {
            Some(PathBuf::from(args.http_cache_dir))
        };

        let replace_content = args
            .replace_content
            .iter()
            .map(|rule| parse_replace_rule(rule))
            .collect::<Result<Vec<_>, _>>()?;

        let user_agent = args
            .user_agent
            .unwrap_or_else(|| default_user_agent(args.device));

        Ok(Self {
            start_url: args.url,
            workers: args.workers,
            timeout: std::time::Duration::from_secs(args.timeout),
            proxy: args.proxy,
            http_auth,
            user_agent,
            accept_encoding: args.accept_encoding,
            include_regex,
            ignore_regex,
            regex_filtering_only_for_pages: args.regex_filtering_only_for_pages,
            ignore_robots_txt: args.ignore_robots_txt,
            http_cache_dir,
            http_cache_compression: args.http_cache_compression,
            max_queue_length: args.max_queue_length,
            max_visited_urls: args.max_visited_urls,
            max_url_length: args.max_url_length,
            offline_export_dir: args.offline_export_dir.map(PathBuf::from),
            allowed_domain_for_external_files: lowercase_all(args.allowed_domain_for_external_files),
            allowed_domain_for_crawling: lowercase_all(args.allowed_domain_for_crawling),
            replace_content,
            disable_javascript: args.disable_javascript,
            disable_styles: args.disable_styles,
            disable_fonts: args.disable_fonts,
            disable_images: args.disable_images,
            disable_files: args.disable_files,
            ignore_store_file_error: args.ignore_store_file_error,
        })
    }
}

fn lowercase_all(items: Vec<String>) -> Vec<String> {
    items.into_iter().map(|s| s.to_ascii_lowercase()).collect()
}

fn compile_all(patterns: &[String], flag: &str) -> Result<Vec<Regex>, CrawlError> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(|err| CrawlError::Config(format!("{flag} {p:?}: {err}"))))
        .collect()
}

fn parse_replace_rule(raw: &str) -> Result<ReplaceRule, CrawlError> {
    let (pattern, replacement) = raw.split_once("->").ok_or_else(|| {
        CrawlError::Config(format!(
            "--replace-content {raw:?} must be in 'pattern -> replacement' form"
        ))
    })?;
    let pattern = Regex::new(pattern.trim())
        .map_err(|err| CrawlError::Config(format!("--replace-content pattern {pattern:?}: {err}")))?;
    Ok(ReplaceRule {
        pattern,
        replacement: replacement.trim().to_string(),
    })
}

/// Host allow-list matching with `*.host`/`host.*`/`*` wildcards, used by
/// both the crawl-scope predicate and the offline transformer.
pub fn host_matches_any(host: &str, patterns: &[String]) -> bool {
    let host = host.to_ascii_lowercase();
    patterns.iter().any(|pattern| host_matches(&host, pattern))
}

fn host_matches(host: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(suffix) = pattern.strip_prefix("*.") {
        return host == suffix || host.ends_with(&format!(".{suffix}"));
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        return host == prefix || host.starts_with(&format!("{prefix}."));
    }
    host == pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_matches_any_wildcard_forms() {
        assert!(host_matches_any(
            "cdn.example.com",
            &["*.example.com".to_string()]
        ));
        assert!(host_matches_any("example.com", &["*.example.com".to_string()]));
        assert!(host_matches_any("example.io", &["example.*".to_string()]));
        assert!(host_matches_any("anything.test", &["*".to_string()]));
        assert!(!host_matches_any(
            "other.com",
            &["*.example.com".to_string()]
        ));
    }
}
