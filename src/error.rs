use std::path::PathBuf;

use thiserror::Error;

/// Errors a caller needs to match on programmatically. Everything else
/// (one-shot setup failures) travels as `anyhow::Error` with `.context(...)`.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse url {raw:?}: {source}")]
    UrlParse {
        raw: String,
        #[source]
        source: url::ParseError,
    },

    #[error("cache entry corrupt: {key}")]
    CacheCorrupt { key: String },
}

/// Maps an outcome of `main` to the process exit code contract in
/// SPEC_FULL.md §6: 0 success, 1 runtime failure mid-crawl, 100 invalid
/// configuration, 101 validation failure for explicit flags.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(CrawlError::Config(_)) = err.downcast_ref::<CrawlError>() {
        return 100;
    }
    1
}
