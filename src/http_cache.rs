//! C2 — HTTP Cache Client (SPEC_FULL.md §4, component C2).
//!
//! Single-flight HTTP GET/HEAD with timeout, optional proxy, basic-auth,
//! and a content-addressed on-disk cache. Cache writes are atomic
//! (write-to-temp, then rename), following the same pattern used
//! elsewhere in this codebase family for job/state persistence.

use std::collections::HashMap;
use std::io::{Read, Write as _};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use md5::{Digest, Md5};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::config::{CrawlConfig, HttpAuth};
use crate::model::{is_in_retry_set, FetchOutcome, HttpResponse, TransportFailure};

#[derive(Debug, Clone)]
pub struct RequestParams {
    pub host: String,
    pub port: u16,
    pub scheme: String,
    pub url: String,
    pub method: Method,
    pub timeout: Duration,
    pub user_agent: String,
    pub accept: String,
    pub accept_encoding: String,
    pub origin: Option<String>,
    pub use_auth: Option<HttpAuth>,
    pub forced_ip: Option<IpAddr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    response: HttpResponse,
}

pub struct CacheClient {
    cache_dir: Option<PathBuf>,
    compression: bool,
    client: reqwest::Client,
    proxy: Option<String>,
}

impl CacheClient {
    pub fn new(config: &CrawlConfig) -> anyhow::Result<Self> {
        let client = build_client(config.proxy.as_deref(), None)?;
        Ok(Self {
            cache_dir: config.http_cache_dir.clone(),
            compression: config.http_cache_compression,
            client,
            proxy: config.proxy.clone(),
        })
    }

    pub async fn request(&self, params: RequestParams) -> FetchOutcome {
        let bypass_cache = params.forced_ip.is_some() || params.url.contains(' ');
        let cache_key = cache_key_for(&params);

        if !bypass_cache {
            if let Some(hit) = self.read_cache(&cache_key) {
                tracing::debug!(url = %params.url, "cache hit");
                return FetchOutcome::Ok(hit);
            }
        }

        let start = Instant::now();
        let outcome = self.fetch_over_network(&params).await;
        let exec_time_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(mut response) => {
                response.exec_time_ms = exec_time_ms;
                if !is_in_retry_set(response.status_code as i32) {
                    if let Err(err) = self.write_cache(&cache_key, &response) {
                        tracing::warn!(?err, key = %cache_key, "failed to write cache entry");
                    }
                } else {
                    tracing::debug!(status = response.status_code, "response in retry set, not caching");
                }
                FetchOutcome::Ok(response)
            }
            Err(failure) => {
                tracing::debug!(url = %params.url, ?failure, "transport failure");
                FetchOutcome::TransportError(failure)
            }
        }
    }

    async fn fetch_over_network(
        &self,
        params: &RequestParams,
    ) -> Result<HttpResponse, TransportFailure> {
        let client = if let Some(ip) = params.forced_ip {
            build_client(self.proxy.as_deref(), Some((&params.host, params.port, ip)))
                .map_err(|_| TransportFailure::SendError)?
        } else {
            self.client.clone()
        };

        let url = reqwest::Url::parse(&params.url).map_err(|_| TransportFailure::SendError)?;
        let headers = build_headers(params).map_err(|_| TransportFailure::SendError)?;

        let mut builder = match params.method {
            Method::Get => client.get(url),
            Method::Head => client.head(url),
        };
        builder = builder.headers(headers).timeout(params.timeout);
        if let Some(auth) = &params.use_auth {
            builder = builder.basic_auth(&auth.user, Some(&auth.pass));
        }

        let send_result = tokio::time::timeout(params.timeout, builder.send()).await;

        let response = match send_result {
            Err(_) => return Err(TransportFailure::Timeout),
            Ok(Err(err)) => return Err(classify_send_error(&err)),
            Ok(Ok(resp)) => resp,
        };

        let status_code = response.status().as_u16();
        let headers_map = normalize_headers(response.headers());
        let final_url = response.url().to_string();

        let body_result = tokio::time::timeout(params.timeout, response.bytes()).await;
        let body = match body_result {
            Err(_) => return Err(TransportFailure::Timeout),
            Ok(Err(_)) => return Err(TransportFailure::ServerReset),
            Ok(Ok(bytes)) => bytes.to_vec(),
        };

        Ok(HttpResponse::new(
            final_url,
            status_code,
            body,
            headers_map,
            0,
            false,
        ))
    }

    fn cache_path(&self, key: &CacheKey) -> Option<PathBuf> {
        let root = self.cache_dir.as_ref()?;
        let ext = if self.compression { "cache.gz" } else { "cache" };
        let filename = match &key.extension {
            Some(e) => format!("{}.{e}.{ext}", key.hash),
            None => format!("{}.{ext}", key.hash),
        };
        Some(
            root.join(&key.host_port)
                .join(&key.shard)
                .join(filename),
        )
    }

    fn read_cache(&self, key: &CacheKey) -> Option<HttpResponse> {
        let path = self.cache_path(key)?;
        let bytes = std::fs::read(&path).ok()?;

        let decoded = if self.compression {
            let mut decoder = GzDecoder::new(bytes.as_slice());
            let mut out = Vec::new();
            match decoder.read_to_end(&mut out) {
                Ok(_) => out,
                Err(_) => {
                    tracing::debug!(key = %key.hash, "cache entry unreadable, treating as absent");
                    return None;
                }
            }
        } else {
            bytes
        };

        let entry: CacheEntry = match serde_json::from_slice(&decoded) {
            Ok(entry) => entry,
            Err(_) => {
                tracing::debug!(key = %key.hash, "cache entry corrupt, treating as absent");
                return None;
            }
        };

        if is_in_retry_set(entry.response.status_code as i32) {
            return None;
        }

        let mut response = entry.response;
        response.loaded_from_cache = true;
        Some(response)
    }

    fn write_cache(&self, key: &CacheKey, response: &HttpResponse) -> anyhow::Result<()> {
        let Some(path) = self.cache_path(key) else {
            return Ok(());
        };
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("cache path has no parent: {}", path.display()))?;
        std::fs::create_dir_all(parent)?;

        let entry = CacheEntry {
            response: response.clone(),
        };
        let serialized = serde_json::to_vec(&entry)?;

        let payload = if self.compression {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&serialized)?;
            encoder.finish()?
        } else {
            serialized
        };

        let tmp_path = path.with_extension(format!(
            "{}.tmp",
            path.extension().and_then(|e| e.to_str()).unwrap_or("cache")
        ));
        std::fs::write(&tmp_path, &payload)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}

struct CacheKey {
    host_port: String,
    shard: String,
    hash: String,
    extension: Option<String>,
}

fn cache_key_for(params: &RequestParams) -> CacheKey {
    let mut hasher = Md5::new();
    hasher.update(params.host.as_bytes());
    hasher.update(b"\0");
    hasher.update(params.port.to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(params.scheme.as_bytes());
    hasher.update(b"\0");
    hasher.update(params.url.as_bytes());
    hasher.update(b"\0");
    hasher.update(method_label(params.method).as_bytes());
    hasher.update(b"\0");
    hasher.update(params.user_agent.as_bytes());
    hasher.update(b"\0");
    hasher.update(params.accept.as_bytes());
    hasher.update(b"\0");
    hasher.update(params.accept_encoding.as_bytes());
    hasher.update(b"\0");
    hasher.update(params.origin.as_deref().unwrap_or("").as_bytes());
    let digest = hasher.finalize();
    let hash = hex::encode(digest);

    let shard = hash[..2].to_string();
    let extension = crate::url_model::estimate_extension(&params.url);

    CacheKey {
        host_port: format!("{}-{}", params.host, params.port),
        shard,
        hash,
        extension,
    }
}

fn method_label(method: Method) -> &'static str {
    match method {
        Method::Get => "GET",
        Method::Head => "HEAD",
    }
}

fn build_headers(params: &RequestParams) -> anyhow::Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        reqwest::header::USER_AGENT,
        HeaderValue::from_str(&params.user_agent)?,
    );
    headers.insert(
        reqwest::header::ACCEPT,
        HeaderValue::from_str(&params.accept)?,
    );
    headers.insert(
        reqwest::header::ACCEPT_ENCODING,
        HeaderValue::from_str(&params.accept_encoding)?,
    );
    headers.insert(
        reqwest::header::CONNECTION,
        HeaderValue::from_static("close"),
    );
    headers.insert(
        HeaderName::from_static("x-crawler-info"),
        HeaderValue::from_str(&format!("sitecrawl/{}", env!("CARGO_PKG_VERSION")))?,
    );
    if let Some(origin) = &params.origin {
        headers.insert(reqwest::header::ORIGIN, HeaderValue::from_str(origin)?);
    }
    Ok(headers)
}

fn normalize_headers(headers: &HeaderMap) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in headers.iter() {
        let key = name.as_str().to_ascii_lowercase();
        let value = value.to_str().unwrap_or_default().to_string();
        if key == "set-cookie" {
            out.entry(key).or_default().push(value);
        } else {
            let entry = out.entry(key).or_default();
            if entry.is_empty() {
                entry.push(value);
            } else {
                let joined = format!("{}, {value}", entry[0]);
                entry[0] = joined;
            }
        }
    }
    out
}

fn classify_send_error(err: &reqwest::Error) -> TransportFailure {
    if err.is_timeout() {
        TransportFailure::Timeout
    } else if err.is_connect() {
        TransportFailure::ConnectionFailed
    } else if err.is_body() || err.is_decode() {
        TransportFailure::ServerReset
    } else {
        TransportFailure::SendError
    }
}

fn build_client(
    proxy: Option<&str>,
    forced_ip: Option<(&str, u16, IpAddr)>,
) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());

    if let Some(proxy_addr) = proxy {
        let proxy_url = format!("http://{proxy_addr}");
        builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
    }

    if let Some((host, port, ip)) = forced_ip {
        builder = builder.resolve(host, SocketAddr::new(ip, port));
    }

    Ok(builder.build()?)
}

pub fn shard_dir(cache_root: &Path, host: &str, port: u16) -> PathBuf {
    cache_root.join(format!("{host}-{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_params(url: &str) -> RequestParams {
        RequestParams {
            host: "example.com".to_string(),
            port: 443,
            scheme: "https".to_string(),
            url: url.to_string(),
            method: Method::Get,
            timeout: Duration::from_secs(3),
            user_agent: "test-agent".to_string(),
            accept: "*/*".to_string(),
            accept_encoding: "gzip".to_string(),
            origin: None,
            use_auth: None,
            forced_ip: None,
        }
    }

    #[test]
    fn cache_key_is_stable_for_same_inputs() {
        let params = base_params("https://example.com/a");
        let k1 = cache_key_for(&params);
        let k2 = cache_key_for(&params);
        assert_eq!(k1.hash, k2.hash);
        assert_eq!(k1.shard, k1.hash[..2]);
    }

    #[test]
    fn cache_key_differs_on_url() {
        let a = cache_key_for(&base_params("https://example.com/a"));
        let b = cache_key_for(&base_params("https://example.com/b"));
        assert_ne!(a.hash, b.hash);
    }
}
