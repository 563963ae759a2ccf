//! C5 — Offline URL Transformer (SPEC_FULL.md §4, component C5).
//!
//! Computes where each crawled resource lands inside the offline mirror,
//! and rewrites every `href`/`src`/`url()` reference in HTML, CSS, and
//! inline JS so the mirror is browsable from `file://` without touching
//! the network. All rewriting is regex substitution over the original
//! bytes, the same approach `content.rs` uses to find references in the
//! first place — we never reparse into a DOM.

use std::path::{Path, PathBuf};

use md5::{Digest, Md5};

use crate::config::ReplaceRule;
use crate::content;
use crate::url_model;

const MAX_PATH_SEGMENT_LEN: usize = 100;

/// How a linked resource's host relates to the crawl's initial seed host,
/// from the point of view of the document doing the linking. This
/// decides whether both ends of a rewritten link live in the same mirror
/// subtree (a plain relative path suffices) or whether one end is nested
/// under an external-host directory (`_host/`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetDomainRelation {
    /// Linking document and target are both on the initial seed host.
    InitialSameBaseSame,
    /// Linking document is on the seed host, target is on another host.
    InitialSameBaseDifferent,
    /// Linking document is on another host, target is back on the seed host.
    InitialDifferentBaseSame,
    /// Linking document and target are both on the same non-seed host.
    InitialDifferentBaseDifferent,
}

pub fn classify_relation(initial_host: &str, source_host: &str, target_host: &str) -> TargetDomainRelation {
    let source_is_initial = hosts_equal(initial_host, source_host);
    let target_is_initial = hosts_equal(initial_host, target_host);
    match (source_is_initial, target_is_initial) {
        (true, true) => TargetDomainRelation::InitialSameBaseSame,
        (true, false) => TargetDomainRelation::InitialSameBaseDifferent,
        (false, true) => TargetDomainRelation::InitialDifferentBaseSame,
        (false, false) => TargetDomainRelation::InitialDifferentBaseDifferent,
    }
}

fn hosts_equal(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Computes the mirror-relative output path for an absolute URL.
///
/// Rules (spec.md §4.5, resolved against the worked examples in §8):
/// - a path ending in `/` (or empty) mirrors to a nested `index.html`;
/// - an extensionless non-slash path gets `.html` appended to its
///   basename directly, without nesting (`/foo` -> `/foo.html`, not
///   `/foo/index.html` — this is what keeps `offline_base_url_depth`
///   consistent between the two cases);
/// - a query string is folded into the filename as a short content
///   fingerprint so `/page?a=1` and `/page?a=2` don't collide;
/// - a host other than `initial_host` is nested under `_<host>/`;
/// - individual path segments are sanitized for the filesystem and
///   hashed down if they'd otherwise exceed a safe length.
pub fn mirror_relative_path(absolute_url: &str, initial_host: &str) -> PathBuf {
    let parsed = match url_model::parse(absolute_url) {
        Ok(p) => p,
        Err(_) => return PathBuf::from("unresolved.html"),
    };
    let host = parsed.host.clone().unwrap_or_default();

    let mut segments: Vec<String> = parsed
        .path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();

    let ends_with_slash = parsed.path.ends_with('/') || parsed.path.is_empty();

    let mut filename = if ends_with_slash {
        "index.html".to_string()
    } else {
        let last = segments.pop().unwrap_or_else(|| "index".to_string());
        if parsed.extension.is_some() {
            last
        } else {
            format!("{last}.html")
        }
    };

    if let Some(query) = &parsed.query {
        filename = insert_fingerprint(&filename, &short_hash(query));
    }

    let segments: Vec<String> = segments.iter().map(|s| sanitize_segment(s)).collect();
    filename = sanitize_segment(&filename);

    let mut path = PathBuf::new();
    if !hosts_equal(&host, initial_host) {
        path.push(format!("_{}", sanitize_segment(&host)));
    }
    for segment in &segments {
        path.push(segment);
    }
    path.push(filename);
    path
}

fn insert_fingerprint(filename: &str, hash: &str) -> String {
    match filename.rsplit_once('.') {
        Some((base, ext)) if !base.is_empty() => format!("{base}.{hash}.{ext}"),
        _ => format!("{filename}.{hash}"),
    }
}

fn short_hash(input: &str) -> String {
    let digest = Md5::digest(input.as_bytes());
    hex::encode(digest)[..10].to_string()
}

fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.len() <= MAX_PATH_SEGMENT_LEN {
        return cleaned;
    }

    let hash = short_hash(&cleaned);
    let ext = cleaned.rsplit_once('.').map(|(_, e)| e.to_string());
    match ext {
        Some(ext) if ext.len() < MAX_PATH_SEGMENT_LEN => format!("{hash}.{ext}"),
        _ => hash,
    }
}

/// The relative path (`../`-prefixed as needed) from the directory
/// containing `from_path` to `to_path`.
pub fn relative_path_between(from_path: &Path, to_path: &Path) -> String {
    let from_dir = from_path.parent().unwrap_or_else(|| Path::new(""));
    let from_components: Vec<_> = from_dir.components().collect();
    let to_components: Vec<_> = to_path.components().collect();

    let common_len = from_components
        .iter()
        .zip(to_components.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let up_count = from_components.len() - common_len;
    let mut parts: Vec<String> = Vec::with_capacity(up_count + to_components.len() - common_len);
    for _ in 0..up_count {
        parts.push("..".to_string());
    }
    for component in &to_components[common_len..] {
        parts.push(component.as_os_str().to_string_lossy().to_string());
    }

    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// Resolves a raw (possibly relative) href against its source document's
/// URL, then asks `resolve` for the target's mirror location. `resolve`
/// returns `None` when the target was never mirrored (out of scope,
/// disabled resource kind, fetch failure) — in that case the href is
/// left untouched so the link still works if the user is online.
fn resolved_replacement(
    raw_href: &str,
    source_url: &str,
    source_mirror_path: &Path,
    resolve: &dyn Fn(&str) -> Option<PathBuf>,
) -> Option<String> {
    let absolute = url_model::resolve_relative(source_url, raw_href).ok()?;
    let target_mirror_path = resolve(&absolute)?;
    Some(relative_path_between(source_mirror_path, &target_mirror_path))
}

/// Rewrites every recognized reference inside an HTML document.
/// `resolve` maps an absolute URL to its mirror-relative path, or `None`
/// if the URL isn't part of the mirror. `disabled` flags references that
/// were never fetched because a `--disable-*` flag excluded their kind —
/// those are stripped rather than left pointing at a live network URL.
pub fn rewrite_html(
    html: &str,
    source_url: &str,
    source_mirror_path: &Path,
    offline_base_depth: u32,
    resolve: &dyn Fn(&str) -> Option<PathBuf>,
    disabled: &dyn Fn(&str) -> bool,
) -> String {
    let mut out = content::attr_regex()
        .replace_all(html, |caps: &regex::Captures| {
            let full = caps.get(0).unwrap().as_str();
            let Some(raw_href) = content::first_group(caps, &[3, 4, 5]) else {
                return full.to_string();
            };
            if raw_href.is_empty() || raw_href.starts_with('#') || raw_href.starts_with("javascript:") {
                return full.to_string();
            }
            match resolved_replacement(&raw_href, source_url, source_mirror_path, resolve) {
                Some(replacement) => full.replacen(raw_href.as_str(), &replacement, 1),
                None => {
                    if is_disabled_reference(&raw_href, source_url, disabled) {
                        full.replacen(raw_href.as_str(), "", 1)
                    } else {
                        full.to_string()
                    }
                }
            }
        })
        .to_string();

    out = content::srcset_regex()
        .replace_all(&out, |caps: &regex::Captures| {
            let full = caps.get(0).unwrap().as_str();
            let Some(value) = content::first_group(caps, &[1, 2]) else {
                return full.to_string();
            };
            let rewritten: Vec<String> = value
                .split(',')
                .filter_map(|candidate| {
                    let trimmed = candidate.trim();
                    let mut parts = trimmed.splitn(2, char::is_whitespace);
                    let url_part = parts.next().unwrap_or("");
                    let descriptor = parts.next().unwrap_or("").trim();
                    if let Some(replaced) = resolved_replacement(url_part, source_url, source_mirror_path, resolve) {
                        return Some(if descriptor.is_empty() {
                            replaced
                        } else {
                            format!("{replaced} {descriptor}")
                        });
                    }
                    if is_disabled_reference(url_part, source_url, disabled) {
                        return None;
                    }
                    Some(if descriptor.is_empty() {
                        url_part.to_string()
                    } else {
                        format!("{url_part} {descriptor}")
                    })
                })
                .collect();
            full.replacen(value.as_str(), &rewritten.join(", "), 1)
        })
        .to_string();

    out = inject_offline_script(&out, offline_base_depth);
    out
}

/// Rewrites every `url(...)` reference inside a stylesheet.
pub fn rewrite_css(
    css: &str,
    source_url: &str,
    source_mirror_path: &Path,
    resolve: &dyn Fn(&str) -> Option<PathBuf>,
    disabled: &dyn Fn(&str) -> bool,
) -> String {
    content::css_url_regex()
        .replace_all(css, |caps: &regex::Captures| {
            let full = caps.get(0).unwrap().as_str();
            let Some(raw_href) = content::first_group(caps, &[1, 2, 3]) else {
                return full.to_string();
            };
            let trimmed = raw_href.trim();
            if trimmed.is_empty() || trimmed.starts_with("data:") {
                return full.to_string();
            }
            match resolved_replacement(trimmed, source_url, source_mirror_path, resolve) {
                Some(replacement) => format!("url(\"{replacement}\")"),
                None => {
                    if is_disabled_reference(trimmed, source_url, disabled) {
                        "url(\"\")".to_string()
                    } else {
                        full.to_string()
                    }
                }
            }
        })
        .to_string()
}

fn is_disabled_reference(raw_href: &str, source_url: &str, disabled: &dyn Fn(&str) -> bool) -> bool {
    match url_model::resolve_relative(source_url, raw_href) {
        Ok(absolute) => disabled(&absolute),
        Err(_) => false,
    }
}

/// Rewrites the known bundler-literal asset prefixes in an inline or
/// external script, via `content::patch_framework_js`.
pub fn rewrite_js(js: &str) -> String {
    content::patch_framework_js(js)
}

/// Injects a small script right after `<head>` that (a) exposes the
/// page's mirror depth for any bundler runtime that reads it, and (b)
/// strips client-side click handlers off anchors so offline navigation
/// falls back to plain `<a href>` behavior instead of an SPA router that
/// has no server to talk to.
fn inject_offline_script(html: &str, offline_base_depth: u32) -> String {
    let script = format!(
        "<script>window.__offlineMirrorDepth={offline_base_depth};document.addEventListener(\"DOMContentLoaded\",function(){{document.querySelectorAll(\"a[href]\").forEach(function(a){{a.replaceWith(a.cloneNode(true));}});}});</script>"
    );

    if let Some(pos) = html.to_ascii_lowercase().find("<head>") {
        let insert_at = pos + "<head>".len();
        let mut out = String::with_capacity(html.len() + script.len());
        out.push_str(&html[..insert_at]);
        out.push_str(&script);
        out.push_str(&html[insert_at..]);
        out
    } else {
        format!("{script}{html}")
    }
}

/// Applies `--replace-content` rules to a rewritten body. Rules run in
/// declaration order; each is a straight regex-replace over the whole
/// string.
pub fn apply_replace_rules(body: &str, rules: &[ReplaceRule]) -> String {
    let mut out = body.to_string();
    for rule in rules {
        out = rule.pattern.replace_all(&out, rule.replacement.as_str()).to_string();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirror_path_trailing_slash_nests_index() {
        let path = mirror_relative_path("https://x.test/foo/", "x.test");
        assert_eq!(path, PathBuf::from("foo/index.html"));
    }

    #[test]
    fn mirror_path_extensionless_appends_html_without_nesting() {
        let path = mirror_relative_path("https://x.test/foo", "x.test");
        assert_eq!(path, PathBuf::from("foo.html"));
    }

    #[test]
    fn mirror_path_query_string_gets_distinct_fingerprint() {
        let a = mirror_relative_path("https://x.test/page?p=1", "x.test");
        let b = mirror_relative_path("https://x.test/page?p=2", "x.test");
        assert_ne!(a, b);
        assert!(a.to_string_lossy().starts_with("page."));
    }

    #[test]
    fn mirror_path_external_host_nests_under_underscore_prefix() {
        let path = mirror_relative_path("https://cdn.example.com/a.png", "x.test");
        assert_eq!(path, PathBuf::from("_cdn.example.com/a.png"));
    }

    #[test]
    fn relative_path_between_same_dir() {
        let from = Path::new("a/b/page.html");
        let to = Path::new("a/b/other.html");
        assert_eq!(relative_path_between(from, to), "other.html");
    }

    #[test]
    fn relative_path_between_climbs_to_common_ancestor() {
        let from = Path::new("a/b/c/page.html");
        let to = Path::new("a/x/y.html");
        assert_eq!(relative_path_between(from, to), "../../x/y.html");
    }

    #[test]
    fn classify_relation_categories() {
        assert_eq!(
            classify_relation("x.test", "x.test", "x.test"),
            TargetDomainRelation::InitialSameBaseSame
        );
        assert_eq!(
            classify_relation("x.test", "x.test", "cdn.test"),
            TargetDomainRelation::InitialSameBaseDifferent
        );
        assert_eq!(
            classify_relation("x.test", "cdn.test", "x.test"),
            TargetDomainRelation::InitialDifferentBaseSame
        );
        assert_eq!(
            classify_relation("x.test", "cdn.test", "cdn.test"),
            TargetDomainRelation::InitialDifferentBaseDifferent
        );
    }

    #[test]
    fn rewrite_html_replaces_known_href_and_leaves_unmirrored_untouched() {
        let html = r#"<a href="/other">link</a><a href="https://offsite.test/x">off</a>"#;
        let source_mirror_path = PathBuf::from("index.html");
        let resolve = |url: &str| -> Option<PathBuf> {
            if url == "https://x.test/other" {
                Some(PathBuf::from("other.html"))
            } else {
                None
            }
        };
        let disabled = |_: &str| false;
        let out = rewrite_html(html, "https://x.test/", &source_mirror_path, 0, &resolve, &disabled);
        assert!(out.contains(r#"href="other.html""#));
        assert!(out.contains(r#"href="https://offsite.test/x""#));
        assert!(out.contains("__offlineMirrorDepth"));
    }

    #[test]
    fn rewrite_html_strips_disabled_references() {
        let html = r#"<script src="/app.js"></script>"#;
        let source_mirror_path = PathBuf::from("index.html");
        let resolve = |_: &str| -> Option<PathBuf> { None };
        let disabled = |url: &str| url == "https://x.test/app.js";
        let out = rewrite_html(html, "https://x.test/", &source_mirror_path, 0, &resolve, &disabled);
        assert!(out.contains(r#"<script src=""></script>"#));
    }

    #[test]
    fn rewrite_css_replaces_url_refs() {
        let css = ".a { background: url(\"/img/bg.png\"); }";
        let source_mirror_path = PathBuf::from("styles/site.css");
        let resolve = |url: &str| -> Option<PathBuf> {
            if url == "https://x.test/img/bg.png" {
                Some(PathBuf::from("img/bg.png"))
            } else {
                None
            }
        };
        let disabled = |_: &str| false;
        let out = rewrite_css(css, "https://x.test/styles/site.css", &source_mirror_path, &resolve, &disabled);
        assert!(out.contains("url(\"../img/bg.png\")"));
    }

    #[test]
    fn rewrite_css_strips_disabled_url_refs() {
        let css = ".a { background: url(\"/img/bg.png\"); }";
        let source_mirror_path = PathBuf::from("styles/site.css");
        let resolve = |_: &str| -> Option<PathBuf> { None };
        let disabled = |url: &str| url == "https://x.test/img/bg.png";
        let out = rewrite_css(css, "https://x.test/styles/site.css", &source_mirror_path, &resolve, &disabled);
        assert!(out.contains("url(\"\")"));
    }

    #[test]
    fn apply_replace_rules_runs_in_order() {
        let rules = vec![ReplaceRule {
            pattern: regex::Regex::new("foo").unwrap(),
            replacement: "bar".to_string(),
        }];
        assert_eq!(apply_replace_rules("foo baz", &rules), "bar baz");
    }
}
