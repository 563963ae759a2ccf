//! End-to-end crawl scenarios against a local `tiny_http` fixture server,
//! covering the worked examples in spec.md §8 without touching the real
//! network.

use std::thread;

use tokio_util::sync::CancellationToken;

use sitecrawl::cli::{CrawlArgs, Device};
use sitecrawl::config::CrawlConfig;
use sitecrawl::crawl::CrawlEngine;

fn base_args(url: String, export_dir: &std::path::Path) -> CrawlArgs {
    CrawlArgs {
        url,
        workers: 2,
        timeout: 5,
        memory_limit: "512M".to_string(),
        proxy: None,
        http_auth: None,
        user_agent: None,
        device: Device::Desktop,
        accept_encoding: "identity".to_string(),
        include_regex: vec![],
        ignore_regex: vec![],
        regex_filtering_only_for_pages: false,
        ignore_robots_txt: true,
        http_cache_dir: "off".to_string(),
        http_cache_compression: false,
        max_queue_length: 1000,
        max_visited_urls: 1000,
        max_url_length: 2083,
        offline_export_dir: Some(export_dir.to_string_lossy().to_string()),
        allowed_domain_for_external_files: vec![],
        allowed_domain_for_crawling: vec![],
        replace_content: vec![],
        disable_javascript: false,
        disable_styles: false,
        disable_fonts: false,
        disable_images: false,
        disable_files: false,
        ignore_store_file_error: false,
    }
}

fn temp_dir(label: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("sitecrawl-it-{label}-{}", std::process::id()))
}

fn respond_html(request: tiny_http::Request, body: &str) {
    let header = tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"text/html"[..]).unwrap();
    let response = tiny_http::Response::from_string(body).with_header(header);
    let _ = request.respond(response);
}

fn respond_css(request: tiny_http::Request, body: &str) {
    let header = tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"text/css"[..]).unwrap();
    let response = tiny_http::Response::from_string(body).with_header(header);
    let _ = request.respond(response);
}

fn respond_png(request: tiny_http::Request) {
    let header = tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"image/png"[..]).unwrap();
    let response = tiny_http::Response::from_data(vec![0x89, b'P', b'N', b'G']).with_header(header);
    let _ = request.respond(response);
}

#[tokio::test]
async fn crawl_differentiates_query_strings_and_follows_protocol_relative_links() {
    let export_dir = temp_dir("query-protorel");
    let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
    let port = server.server_addr().to_ip().unwrap().port();

    let handle = thread::spawn(move || {
        for _ in 0..4 {
            let Ok(request) = server.recv() else { break };
            let url = request.url().to_string();
            if url == "/" {
                let body = format!(
                    r#"<html><head></head><body>
                        <a href="/page?id=1">one</a>
                        <a href="/page?id=2">two</a>
                        <a href="//127.0.0.1:{port}/protorel">protocol relative</a>
                    </body></html>"#
                );
                respond_html(request, &body);
            } else if url.starts_with("/page") {
                respond_html(request, "<html><body>page</body></html>");
            } else if url == "/protorel" {
                respond_html(request, "<html><body>protorel</body></html>");
            } else {
                let _ = request.respond(tiny_http::Response::empty(404));
            }
        }
    });

    let args = base_args(format!("http://127.0.0.1:{port}/"), &export_dir);
    let config = std::sync::Arc::new(CrawlConfig::from_args(args).unwrap());
    let engine = CrawlEngine::new(config).unwrap();
    engine.run(CancellationToken::new()).await.unwrap();
    handle.join().unwrap();

    let index = tokio::fs::read_to_string(export_dir.join("index.html")).await.unwrap();

    // Both query variants resolved to distinct, non-colliding mirror files.
    let page_files: Vec<_> = std::fs::read_dir(&export_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with("page."))
        .collect();
    assert_eq!(page_files.len(), 2, "expected two distinct query-fingerprinted files, got {page_files:?}");

    // The protocol-relative href resolved against the page's own scheme and
    // was mirrored like any other same-host link.
    assert!(export_dir.join("protorel.html").exists());
    assert!(index.contains("protorel.html"));

    tokio::fs::remove_dir_all(&export_dir).await.ok();
}

#[tokio::test]
async fn crawl_mirrors_allowed_external_asset_host() {
    let export_dir = temp_dir("external-asset");

    let asset_server = tiny_http::Server::http("127.0.0.1:0").unwrap();
    let asset_port = asset_server.server_addr().to_ip().unwrap().port();
    let asset_handle = thread::spawn(move || {
        if let Ok(request) = asset_server.recv() {
            respond_png(request);
        }
    });

    let main_server = tiny_http::Server::http("127.0.0.1:0").unwrap();
    let main_port = main_server.server_addr().to_ip().unwrap().port();
    let main_handle = thread::spawn(move || {
        if let Ok(request) = main_server.recv() {
            let body = format!(
                r#"<html><head></head><body><img src="http://localhost:{asset_port}/logo.png"></body></html>"#
            );
            respond_html(request, &body);
        }
    });

    let mut args = base_args(format!("http://127.0.0.1:{main_port}/"), &export_dir);
    args.allowed_domain_for_external_files = vec!["localhost".to_string()];
    let config = std::sync::Arc::new(CrawlConfig::from_args(args).unwrap());
    let engine = CrawlEngine::new(config).unwrap();
    engine.run(CancellationToken::new()).await.unwrap();
    main_handle.join().unwrap();
    asset_handle.join().unwrap();

    let index = tokio::fs::read_to_string(export_dir.join("index.html")).await.unwrap();
    let external_dir = export_dir.join("_localhost");
    assert!(external_dir.join("logo.png").exists(), "external asset should be mirrored under _localhost/");
    assert!(index.contains("_localhost/logo.png"));

    tokio::fs::remove_dir_all(&export_dir).await.ok();
}

#[tokio::test]
async fn crawl_records_transport_failure_for_unreachable_host() {
    let export_dir = temp_dir("unreachable");
    // Port 1 on loopback is reserved and nothing listens there, so the
    // connection is refused immediately rather than hanging.
    let args = base_args("http://127.0.0.1:1/".to_string(), &export_dir);
    let config = std::sync::Arc::new(CrawlConfig::from_args(args).unwrap());
    let engine = CrawlEngine::new(config).unwrap();
    let summary = engine.run(CancellationToken::new()).await.unwrap();

    assert_eq!(summary.total, 1);
    assert_eq!(summary.transport_failures, 1);

    tokio::fs::remove_dir_all(&export_dir).await.ok();
}
