use clap::{Parser, ValueEnum};

/// Thin flag surface (SPEC_FULL.md §2.4): parses strings into
/// `config::CrawlConfig` fields. All semantic validation lives in
/// `config.rs`, not here.
#[derive(Debug, Parser)]
#[command(name = "sitecrawl", author, version, about)]
pub struct CrawlArgs {
    /// Seed URL to start crawling from.
    #[arg(long)]
    pub url: String,

    /// Parallel fetcher count.
    #[arg(long, default_value_t = 3)]
    pub workers: usize,

    /// Per-request deadline, in seconds.
    #[arg(long, default_value_t = 3)]
    pub timeout: u64,

    /// Process memory cap (e.g. `512M`, `1G`). Informational; enforced by
    /// the surrounding process supervisor, not this crate.
    #[arg(long, default_value = "512M")]
    pub memory_limit: String,

    /// Forward proxy as `host:port`.
    #[arg(long)]
    pub proxy: Option<String>,

    /// Basic-auth credential as `user:pass`.
    #[arg(long)]
    pub http_auth: Option<String>,

    /// Explicit User-Agent header. Overrides `--device`.
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Device class used to derive a default User-Agent when
    /// `--user-agent` is not given.
    #[arg(long, value_enum, default_value_t = Device::Desktop)]
    pub device: Device,

    #[arg(long, default_value = "gzip, deflate, br")]
    pub accept_encoding: String,

    /// URL include filter (repeatable).
    #[arg(long)]
    pub include_regex: Vec<String>,

    /// URL exclude filter (repeatable).
    #[arg(long)]
    pub ignore_regex: Vec<String>,

    /// When set, `--include-regex`/`--ignore-regex` apply to page URLs
    /// only; assets are always downloaded.
    #[arg(long, default_value_t = false)]
    pub regex_filtering_only_for_pages: bool,

    #[arg(long, default_value_t = false)]
    pub ignore_robots_txt: bool,

    /// Cache directory, or the literal `off` to disable caching.
    #[arg(long, default_value = "tmp/http-client-cache")]
    pub http_cache_dir: String,

    #[arg(long, default_value_t = false)]
    pub http_cache_compression: bool,

    #[arg(long, default_value_t = 9000)]
    pub max_queue_length: usize,

    #[arg(long, default_value_t = 10000)]
    pub max_visited_urls: usize,

    #[arg(long, default_value_t = 2083)]
    pub max_url_length: usize,

    /// Output directory for the offline mirror. Enables the mirror writer
    /// when set.
    #[arg(long)]
    pub offline_export_dir: Option<String>,

    /// External host allow-list for static-file downloads (repeatable,
    /// `*.host`/`host.*`/`*` wildcards).
    #[arg(long)]
    pub allowed_domain_for_external_files: Vec<String>,

    /// External host allow-list for crawling (repeatable, same wildcards).
    #[arg(long)]
    pub allowed_domain_for_crawling: Vec<String>,

    /// `pattern -> replacement` applied to HTML/CSS/JS bodies post-rewrite
    /// (repeatable).
    #[arg(long)]
    pub replace_content: Vec<String>,

    #[arg(long, default_value_t = false)]
    pub disable_javascript: bool,

    #[arg(long, default_value_t = false)]
    pub disable_styles: bool,

    #[arg(long, default_value_t = false)]
    pub disable_fonts: bool,

    #[arg(long, default_value_t = false)]
    pub disable_images: bool,

    #[arg(long, default_value_t = false)]
    pub disable_files: bool,

    /// Continue the crawl past mirror-write failures, recording a notice
    /// instead of aborting with exit code 1.
    #[arg(long, default_value_t = false)]
    pub ignore_store_file_error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Device {
    Desktop,
    Mobile,
    Tablet,
}
