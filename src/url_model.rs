//! C1 — URL Model (SPEC_FULL.md §4, component C1).
//!
//! Parses, normalizes, classifies, and resolves URLs. Built on top of the
//! `url` crate (already the teacher's dependency for this) but layers the
//! project-specific invariants spec.md §3 requires: default-port omission,
//! `/` for an absent path, extension sniffing that falls back into the
//! query string for `?url=...png`-style proxy endpoints.

use crate::error::CrawlError;
use crate::model::ParsedUrl;

const HTML_LIKE_EXTENSIONS: &[&str] = &[
    "htm", "html", "shtml", "php", "phtml", "ashx", "xhtml", "asp", "aspx", "jsp", "jspx", "do",
    "cfm", "cgi", "pl", "rb", "erb", "gsp",
];

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "svg", "ico", "bmp", "avif", "tiff", "tif", "apng",
];

const FONT_EXTENSIONS: &[&str] = &["woff", "woff2", "ttf", "otf", "eot"];

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

/// Parses an absolute or protocol-relative URL. Protocol-relative inputs
/// (`//host/path`) are tolerated by leaving `scheme` unset.
pub fn parse(raw: &str) -> Result<ParsedUrl, CrawlError> {
    let trimmed = raw.trim();
    let is_protocol_relative = trimmed.starts_with("//");

    let parse_target = if is_protocol_relative {
        format!("https:{trimmed}")
    } else {
        trimmed.to_string()
    };

    let url = url::Url::parse(&parse_target).map_err(|source| CrawlError::UrlParse {
        raw: raw.to_string(),
        source,
    })?;

    let host = url.host_str().map(|h| h.to_ascii_lowercase());
    let scheme = if is_protocol_relative {
        None
    } else {
        Some(url.scheme().to_string())
    };

    let port = url
        .port()
        .or_else(|| default_port(url.scheme()))
        .unwrap_or(80);

    let path = if host.is_some() && url.path().is_empty() {
        "/".to_string()
    } else {
        url.path().to_string()
    };

    let query = url.query().map(|q| q.to_string());
    let fragment = url.fragment().map(|f| f.to_string());
    let extension = path_extension(&path);

    Ok(ParsedUrl {
        scheme,
        host,
        port,
        path,
        query,
        fragment,
        extension,
    })
}

fn path_extension(path: &str) -> Option<String> {
    let last_segment = path.rsplit('/').next().unwrap_or("");
    let (_, ext) = last_segment.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Serializes a `ParsedUrl` back to a full URL string, omitting default
/// ports as spec.md §3 requires.
pub fn full_url(parsed: &ParsedUrl) -> String {
    let scheme = parsed.scheme.as_deref().unwrap_or("https");
    let host = parsed.host.as_deref().unwrap_or("");

    let port_part = match default_port(scheme) {
        Some(default) if default == parsed.port => String::new(),
        _ => format!(":{}", parsed.port),
    };

    let mut out = format!("{scheme}://{host}{port_part}{}", parsed.path);
    if let Some(query) = &parsed.query {
        out.push('?');
        out.push_str(query);
    }
    if let Some(fragment) = &parsed.fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

/// Resolves `href` against `base` (an absolute URL string), implementing
/// the resolution order in spec.md §4.1: `scheme://` is absolute,
/// `//host/...` inherits the base scheme, `/path` replaces from root, and
/// any other form resolves against the base's directory. `..` segments
/// that would escape the root are silently clamped, matching the `url`
/// crate's RFC 3986 path-merge behavior.
pub fn resolve_relative(base: &str, href: &str) -> Result<String, CrawlError> {
    let href_trimmed = href.trim();

    if href_trimmed.starts_with("//") {
        let base_url = url::Url::parse(base).map_err(|source| CrawlError::UrlParse {
            raw: base.to_string(),
            source,
        })?;
        let joined = format!("{}:{}", base_url.scheme(), href_trimmed);
        let resolved = url::Url::parse(&joined).map_err(|source| CrawlError::UrlParse {
            raw: joined.clone(),
            source,
        })?;
        return Ok(resolved.to_string());
    }

    let base_url = url::Url::parse(base).map_err(|source| CrawlError::UrlParse {
        raw: base.to_string(),
        source,
    })?;
    let resolved = base_url
        .join(href_trimmed)
        .map_err(|source| CrawlError::UrlParse {
            raw: href_trimmed.to_string(),
            source,
        })?;
    Ok(resolved.to_string())
}

/// A URL is *static* if its path extension is not in the HTML-like set.
pub fn is_static_file(parsed: &ParsedUrl) -> bool {
    match &parsed.extension {
        Some(ext) => !HTML_LIKE_EXTENSIONS.contains(&ext.as_str()),
        None => false,
    }
}

pub fn is_image(parsed: &ParsedUrl) -> bool {
    matches_extension_set(parsed, IMAGE_EXTENSIONS)
}

pub fn is_font(parsed: &ParsedUrl) -> bool {
    matches_extension_set(parsed, FONT_EXTENSIONS)
}

fn matches_extension_set(parsed: &ParsedUrl, set: &[&str]) -> bool {
    parsed
        .extension
        .as_deref()
        .map(|ext| set.contains(&ext))
        .unwrap_or(false)
}

/// Which asset kinds the `--disable-*` flags exclude (spec.md §6: "skip
/// and strip from HTML"). Shared between the crawl-time fetch gate and the
/// mirror-time HTML/CSS stripping pass so both sides agree on what counts
/// as, say, a font.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledKinds {
    pub javascript: bool,
    pub styles: bool,
    pub fonts: bool,
    pub images: bool,
    pub files: bool,
}

impl DisabledKinds {
    pub fn matches(&self, parsed: &ParsedUrl) -> bool {
        if let Some(ext) = parsed.extension.as_deref() {
            if self.javascript && matches!(ext, "js" | "mjs" | "cjs") {
                return true;
            }
            if self.styles && ext == "css" {
                return true;
            }
        }
        if self.fonts && is_font(parsed) {
            return true;
        }
        if self.images && is_image(parsed) {
            return true;
        }
        if self.files && is_static_file(parsed) && !is_image(parsed) && !is_font(parsed) {
            return true;
        }
        false
    }
}

/// Estimates an extension for `url`, falling back into the query string
/// when the path itself has none — the `/_next/image?url=%2F..png` case
/// from spec.md §4.1.
pub fn estimate_extension(url: &str) -> Option<String> {
    let parsed = parse(url).ok()?;
    if let Some(ext) = parsed.extension {
        return Some(ext);
    }

    let query = parsed.query?;
    let decoded = percent_decode(&query);
    last_filename_extension_in(&decoded)
}

fn percent_decode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&input[i + 1..i + 3], 16) {
                out.push(byte as char);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}

fn last_filename_extension_in(decoded_query: &str) -> Option<String> {
    let mut best: Option<String> = None;
    for piece in decoded_query.split(|c: char| !c.is_ascii_alphanumeric() && c != '.' && c != '_' && c != '-') {
        if let Some((_, ext)) = piece.rsplit_once('.') {
            if !ext.is_empty()
                && ext.len() <= 5
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
            {
                best = Some(ext.to_ascii_lowercase());
            }
        }
    }
    best
}

/// The number of `../` levels the mirror of `url` sits below the mirror
/// root, per spec.md §4.1. A trailing `/` synthesizes `index.html`
/// (depth += 1 relative to the bare directory); a bare name like `/foo`
/// mirrors to `/foo.html` at the current depth (depth 0 at root).
pub fn offline_base_url_depth(url: &str) -> u32 {
    let Ok(parsed) = parse(url) else {
        return 0;
    };
    let ends_with_slash = parsed.path.ends_with('/');
    let segments: Vec<&str> = parsed.path.split('/').filter(|s| !s.is_empty()).collect();

    if ends_with_slash {
        segments.len() as u32
    } else {
        segments.len().saturating_sub(1) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_defaults_port_and_path() {
        let parsed = parse("https://example.com").unwrap();
        assert_eq!(parsed.port, 443);
        assert_eq!(parsed.path, "/");
    }

    #[test]
    fn parse_protocol_relative_has_no_scheme() {
        let parsed = parse("//example.com/page").unwrap();
        assert_eq!(parsed.scheme, None);
        assert_eq!(parsed.host.as_deref(), Some("example.com"));
    }

    #[test]
    fn full_url_omits_default_port() {
        let parsed = parse("https://example.com:443/a").unwrap();
        assert_eq!(full_url(&parsed), "https://example.com/a");
    }

    #[test]
    fn full_url_keeps_nondefault_port() {
        let parsed = parse("https://example.com:8443/a").unwrap();
        assert_eq!(full_url(&parsed), "https://example.com:8443/a");
    }

    #[test]
    fn is_static_file_excludes_html_like_extensions() {
        assert!(!is_static_file(&parse("https://x.test/a.html").unwrap()));
        assert!(is_static_file(&parse("https://x.test/a.png").unwrap()));
        assert!(!is_static_file(&parse("https://x.test/a").unwrap()));
    }

    #[test]
    fn resolve_relative_handles_all_forms() {
        let base = "https://example.com/dir/page.html";
        assert_eq!(
            resolve_relative(base, "https://other.test/x").unwrap(),
            "https://other.test/x"
        );
        assert_eq!(
            resolve_relative(base, "//example.com/y").unwrap(),
            "https://example.com/y"
        );
        assert_eq!(
            resolve_relative(base, "/z").unwrap(),
            "https://example.com/z"
        );
        assert_eq!(
            resolve_relative(base, "sibling.html").unwrap(),
            "https://example.com/dir/sibling.html"
        );
        assert_eq!(
            resolve_relative(base, "../up.html").unwrap(),
            "https://example.com/up.html"
        );
    }

    #[test]
    fn resolve_relative_clamps_excess_dotdot() {
        let base = "https://example.com/a/b/page.html";
        assert_eq!(
            resolve_relative(base, "../../../../../escape.html").unwrap(),
            "https://example.com/escape.html"
        );
    }

    #[test]
    fn resolve_relative_is_idempotent() {
        let base = "https://example.com/a/page.html";
        let once = resolve_relative(base, "x.html").unwrap();
        let twice = resolve_relative(base, &once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn estimate_extension_falls_back_to_query_filename() {
        let url =
            "https://nextjs.org/_next/image?url=%2F_next%2Fstatic%2Fmedia%2Fpreview.6063405a.png&w=640&q=75";
        assert_eq!(estimate_extension(url).as_deref(), Some("png"));
    }

    #[test]
    fn offline_base_url_depth_examples() {
        assert_eq!(offline_base_url_depth("https://x.test/"), 0);
        assert_eq!(offline_base_url_depth("https://x.test/foo"), 0);
        assert_eq!(offline_base_url_depth("https://x.test/foo/"), 1);
        assert_eq!(offline_base_url_depth("https://x.test/foo/bar"), 1);
        assert_eq!(offline_base_url_depth("https://x.test/foo/bar/"), 2);
    }
}
