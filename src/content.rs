//! C3 — Content Classifier & Parser (SPEC_FULL.md §4, component C3).
//!
//! Classification is content-type-header-first, falls back to the URL's
//! extension, and finally sniffs the body for an HTML prefix. Extraction
//! is tolerant regex matching rather than a strict DOM/CSS parser — this
//! mirrors how real-world crawl targets are full of malformed markup that
//! a strict parser would simply refuse to touch. Nothing in this module
//! panics or returns `Result`: a document that doesn't match a pattern
//! just yields fewer `FoundUrl`s.

use std::sync::OnceLock;

use regex::Regex;

use crate::model::{FoundUrl, HttpResponse, ResourceKind, SourceAttr};
use crate::url_model::{self, ParsedUrl};

/// Assigns a `ResourceKind` to a response: Content-Type header first, then
/// the URL's extension, then a body sniff for a bare HTML prefix.
pub fn classify(response: &HttpResponse, parsed: &ParsedUrl) -> ResourceKind {
    if (300..400).contains(&response.status_code) {
        return ResourceKind::Redirect;
    }

    if let Some(content_type) = response.content_type() {
        if let Some(kind) = classify_mime(content_type) {
            return kind;
        }
    }

    if let Some(ext) = &parsed.extension {
        if let Some(kind) = classify_extension(ext) {
            return kind;
        }
    }

    if url_model::is_image(parsed) {
        return ResourceKind::Image;
    }
    if url_model::is_font(parsed) {
        return ResourceKind::Font;
    }

    let head = lowercase_prefix(&response.body, 512);
    if head.contains("<!doctype html") || head.contains("<html") {
        return ResourceKind::Html;
    }

    if !url_model::is_static_file(parsed) {
        ResourceKind::Html
    } else {
        ResourceKind::OtherFile
    }
}

fn classify_mime(content_type: &str) -> Option<ResourceKind> {
    let base = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    match base.as_str() {
        "text/html" | "application/xhtml+xml" => Some(ResourceKind::Html),
        "text/css" => Some(ResourceKind::Stylesheet),
        "application/javascript" | "text/javascript" | "application/x-javascript"
        | "application/ecmascript" => Some(ResourceKind::Script),
        "application/json" | "application/ld+json" => Some(ResourceKind::Json),
        _ if base.starts_with("image/") => Some(ResourceKind::Image),
        _ if base.starts_with("font/")
            || base == "application/font-woff"
            || base == "application/vnd.ms-fontobject" =>
        {
            Some(ResourceKind::Font)
        }
        _ => None,
    }
}

fn classify_extension(ext: &str) -> Option<ResourceKind> {
    match ext {
        "html" | "htm" | "shtml" | "xhtml" | "php" | "phtml" | "asp" | "aspx" | "jsp" => {
            Some(ResourceKind::Html)
        }
        "css" => Some(ResourceKind::Stylesheet),
        "js" | "mjs" | "cjs" => Some(ResourceKind::Script),
        "json" => Some(ResourceKind::Json),
        _ => None,
    }
}

fn lowercase_prefix(body: &[u8], max_len: usize) -> String {
    let end = body.len().min(max_len);
    String::from_utf8_lossy(&body[..end]).trim_start().to_ascii_lowercase()
}

pub(crate) fn attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<(a|link|img|script|source|input)\b[^>]*?\b(href|src)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#)
            .expect("static regex is valid")
    })
}

pub(crate) fn srcset_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)\bsrcset\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("static regex is valid")
    })
}

pub(crate) fn meta_refresh_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?is)<meta\b[^>]*\bhttp-equiv\s*=\s*["']?refresh["']?[^>]*\bcontent\s*=\s*(?:"([^"]*)"|'([^']*)')"#,
        )
        .expect("static regex is valid")
    })
}

pub(crate) fn inline_src_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\.src\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("static regex is valid")
    })
}

pub(crate) fn css_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^)'"]*))\s*\)"#)
            .expect("static regex is valid")
    })
}

pub(crate) fn first_group(caps: &regex::Captures, groups: &[usize]) -> Option<String> {
    groups
        .iter()
        .find_map(|&i| caps.get(i))
        .map(|m| m.as_str().to_string())
}

fn source_attr_for(tag: &str, attr: &str) -> Option<SourceAttr> {
    match (tag.to_ascii_lowercase().as_str(), attr.to_ascii_lowercase().as_str()) {
        ("a", "href") => Some(SourceAttr::AHref),
        ("link", "href") => Some(SourceAttr::LinkHref),
        ("img", "src") | ("source", "src") => Some(SourceAttr::ImgSrc),
        ("script", "src") => Some(SourceAttr::ScriptSrc),
        _ => None,
    }
}

/// `<input>` only gets treated as a file reference (e.g. `type="image"`'s
/// `src`) when its value actually looks like a file path — otherwise any
/// plain form input whose value happens to be a `src` attribute would be
/// over-extracted as a URL candidate.
fn has_file_extension(value: &str) -> bool {
    let path_part = value.split(['?', '#']).next().unwrap_or(value);
    let last_segment = path_part.rsplit('/').next().unwrap_or(path_part);
    match last_segment.rsplit_once('.') {
        Some((base, ext)) => {
            !base.is_empty() && !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric())
        }
        None => false,
    }
}

/// Extracts every `href`/`src`/`srcset`/meta-refresh URL candidate from an
/// HTML document (spec.md §4.3 extraction table).
pub fn extract_html_urls(html: &str, source_url: &str) -> Vec<FoundUrl> {
    let mut found = Vec::new();

    for caps in attr_regex().captures_iter(html) {
        let tag = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let attr = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        let Some(value) = first_group(&caps, &[3, 4, 5]) else {
            continue;
        };
        if value.is_empty() || value.starts_with('#') || value.starts_with("javascript:") {
            continue;
        }
        let source_attr = if tag.eq_ignore_ascii_case("input") && attr.eq_ignore_ascii_case("src") {
            if has_file_extension(&value) {
                SourceAttr::ImgSrc
            } else {
                continue;
            }
        } else {
            let Some(source_attr) = source_attr_for(tag, attr) else {
                continue;
            };
            source_attr
        };
        found.push(FoundUrl {
            raw_href: value,
            source_url: source_url.to_string(),
            source_attr,
        });
    }

    for caps in srcset_regex().captures_iter(html) {
        let Some(value) = first_group(&caps, &[1, 2]) else {
            continue;
        };
        for candidate in value.split(',') {
            let url = candidate.trim().split_whitespace().next().unwrap_or("");
            if url.is_empty() {
                continue;
            }
            found.push(FoundUrl {
                raw_href: url.to_string(),
                source_url: source_url.to_string(),
                source_attr: SourceAttr::ImgSrc,
            });
        }
    }

    for caps in meta_refresh_regex().captures_iter(html) {
        let Some(content) = first_group(&caps, &[1, 2]) else {
            continue;
        };
        if let Some(pos) = content.to_ascii_lowercase().find("url=") {
            let target = content[pos + 4..].trim().trim_matches(|c| c == '"' || c == '\'');
            if !target.is_empty() {
                found.push(FoundUrl {
                    raw_href: target.to_string(),
                    source_url: source_url.to_string(),
                    source_attr: SourceAttr::MetaRefresh,
                });
            }
        }
    }

    for caps in inline_src_regex().captures_iter(html) {
        let Some(value) = first_group(&caps, &[1, 2]) else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        found.push(FoundUrl {
            raw_href: value,
            source_url: source_url.to_string(),
            source_attr: SourceAttr::InlineScriptSrc,
        });
    }

    found
}

/// Extracts every `url(...)` reference from a stylesheet, including
/// `@font-face` blocks (which are just another `url(...)` occurrence).
pub fn extract_css_urls(css: &str, source_url: &str) -> Vec<FoundUrl> {
    css_url_regex()
        .captures_iter(css)
        .filter_map(|caps| first_group(&caps, &[1, 2, 3]))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty() && !value.starts_with("data:"))
        .map(|value| FoundUrl {
            raw_href: value,
            source_url: source_url.to_string(),
            source_attr: SourceAttr::CssUrl,
        })
        .collect()
}

/// Known bundler-emitted literal asset-path prefixes that survive a mirror
/// relocation unmodified. Framework JS sometimes hardcodes an absolute
/// `/_next/`-style prefix that a pure href/src rewrite pass never touches
/// because it isn't inside a string literal adjacent to a recognizable
/// attribute. `patch_framework_js` rewrites just those known literals and
/// leaves everything else in the script untouched.
const FROZEN_JS_PATTERNS: &[(&str, &str)] = &[
    ("\"/_next/", "\"./_next/"),
    ("'/_next/", "'./_next/"),
    ("\"/static/", "\"./static/"),
    ("'/static/", "'./static/"),
];

pub fn patch_framework_js(js: &str) -> String {
    let mut out = js.to_string();
    for (pattern, replacement) in FROZEN_JS_PATTERNS {
        if out.contains(pattern) {
            out = out.replace(pattern, replacement);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HttpResponse;
    use std::collections::HashMap;

    fn html_response(body: &str) -> HttpResponse {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), vec!["text/html".to_string()]);
        HttpResponse::new("https://x.test/".to_string(), 200, body.as_bytes().to_vec(), headers, 0, false)
    }

    #[test]
    fn classify_prefers_content_type_header() {
        let parsed = crate::url_model::parse("https://x.test/a.bin").unwrap();
        let response = html_response("<html></html>");
        assert_eq!(classify(&response, &parsed), ResourceKind::Html);
    }

    #[test]
    fn classify_redirect_takes_priority() {
        let parsed = crate::url_model::parse("https://x.test/a").unwrap();
        let mut headers = HashMap::new();
        headers.insert("location".to_string(), vec!["https://x.test/b".to_string()]);
        let response = HttpResponse::new("https://x.test/a".to_string(), 301, Vec::new(), headers, 0, false);
        assert_eq!(classify(&response, &parsed), ResourceKind::Redirect);
    }

    #[test]
    fn extract_html_urls_covers_common_attrs() {
        let html = r#"
            <a href="/page1">one</a>
            <img src='/img.png'>
            <link href="/style.css" rel="stylesheet">
            <script src="/app.js"></script>
            <img srcset="/a1.png 1x, /a2.png 2x">
            <meta http-equiv="refresh" content="0;url=/next">
        "#;
        let found = extract_html_urls(html, "https://x.test/");
        let hrefs: Vec<&str> = found.iter().map(|f| f.raw_href.as_str()).collect();
        assert!(hrefs.contains(&"/page1"));
        assert!(hrefs.contains(&"/img.png"));
        assert!(hrefs.contains(&"/style.css"));
        assert!(hrefs.contains(&"/app.js"));
        assert!(hrefs.contains(&"/a1.png"));
        assert!(hrefs.contains(&"/a2.png"));
        assert!(hrefs.contains(&"/next"));
    }

    #[test]
    fn extract_html_urls_skips_fragments_and_js_links() {
        let html = r#"<a href="#top">top</a><a href="javascript:void(0)">go</a>"#;
        let found = extract_html_urls(html, "https://x.test/");
        assert!(found.is_empty());
    }

    #[test]
    fn extract_css_urls_handles_quotes_and_font_face() {
        let css = r#"
            .a { background: url("/bg.png"); }
            @font-face { src: url(/fonts/a.woff2) format("woff2"); }
        "#;
        let found = extract_css_urls(css, "https://x.test/style.css");
        let hrefs: Vec<&str> = found.iter().map(|f| f.raw_href.as_str()).collect();
        assert!(hrefs.contains(&"/bg.png"));
        assert!(hrefs.contains(&"/fonts/a.woff2"));
    }

    #[test]
    fn patch_framework_js_only_rewrites_known_literals() {
        let js = r#"loadChunk("/_next/static/chunk.js"); console.log("/other/path");"#;
        let patched = patch_framework_js(js);
        assert!(patched.contains("\"./_next/static/chunk.js\""));
        assert!(patched.contains("\"/other/path\""));
    }
}
