//! Configuration for the proxy pool, the fetcher and the validator.

use std::path::PathBuf;
use std::time::Duration;

/// Default location of the durable proxy file.
pub const DEFAULT_STORE_PATH: &str = "working_proxies.csv";

/// Proxies used whenever the durable file is missing or unusable: the SOCKS
/// ports of a local Tor daemon and of Tor Browser.
pub const DEFAULT_FALLBACK_PROXIES: &[(&str, u16)] = &[("127.0.0.1", 9050), ("127.0.0.1", 9150)];

/// Public SOCKS5 lists used for discovery.
pub const DEFAULT_SOURCES: &[&str] = &[
    "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/socks5.txt",
    "https://raw.githubusercontent.com/monosans/proxy-list/main/proxies/socks5.txt",
    "https://raw.githubusercontent.com/ShiftyTR/Proxy-List/master/socks5.txt",
];

/// Queries used to exercise candidates against the search engine.
pub const DEFAULT_TEST_QUERIES: &[&str] = &[
    "python programming",
    "artificial intelligence",
    "technology news",
    "web development",
    "data science",
];

/// Configuration for the proxy pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Path of the durable proxy file.
    pub store_path: PathBuf,
    /// Proxies used when the durable file yields nothing.
    pub fallback: Vec<(String, u16)>,
    /// Maximum requests per second per proxy.
    pub max_requests_per_second: f64,
    /// Below this many available proxies a warning is logged on selection.
    pub low_watermark: usize,
}

impl PoolConfig {
    /// Create a new configuration builder.
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfigBuilder::new().build()
    }
}

/// Builder for `PoolConfig`.
#[derive(Default)]
pub struct PoolConfigBuilder {
    store_path: Option<PathBuf>,
    fallback: Option<Vec<(String, u16)>>,
    max_requests_per_second: Option<f64>,
    low_watermark: Option<usize>,
}

impl PoolConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the path of the durable proxy file.
    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    /// Replace the fallback list.
    pub fn fallback<H: Into<String>>(mut self, proxies: Vec<(H, u16)>) -> Self {
        self.fallback = Some(proxies.into_iter().map(|(h, p)| (h.into(), p)).collect());
        self
    }

    /// Set the maximum requests per second per proxy.
    pub fn max_requests_per_second(mut self, rps: f64) -> Self {
        self.max_requests_per_second = Some(rps);
        self
    }

    /// Set the available-proxy count below which selection warns.
    pub fn low_watermark(mut self, count: usize) -> Self {
        self.low_watermark = Some(count);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> PoolConfig {
        PoolConfig {
            store_path: self.store_path.unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH)),
            fallback: self.fallback.unwrap_or_else(|| {
                DEFAULT_FALLBACK_PROXIES
                    .iter()
                    .map(|(h, p)| (h.to_string(), *p))
                    .collect()
            }),
            max_requests_per_second: self.max_requests_per_second.unwrap_or(5.0),
            low_watermark: self.low_watermark.unwrap_or(10),
        }
    }
}

/// Configuration for the resilient fetcher.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Number of proxies tried per fetch.
    pub max_attempts: usize,
    /// Timeout of the first attempt.
    pub initial_timeout: Duration,
    /// Timeout of every later attempt, and of the size probe.
    pub retry_timeout: Duration,
    /// Bodies declared larger than this are not fetched.
    pub max_content_length: u64,
    /// Prioritized text length at which the body read stops early.
    pub content_threshold: usize,
    /// Whether to issue a HEAD size probe before the first attempt.
    pub size_probe: bool,
    /// Hosts whose challenge pages count as a proxy failure.
    pub challenge_hosts: Vec<String>,
}

impl FetchConfig {
    /// Create a new configuration builder.
    pub fn builder() -> FetchConfigBuilder {
        FetchConfigBuilder::new()
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfigBuilder::new().build()
    }
}

/// Builder for `FetchConfig`.
#[derive(Default)]
pub struct FetchConfigBuilder {
    max_attempts: Option<usize>,
    initial_timeout: Option<Duration>,
    retry_timeout: Option<Duration>,
    max_content_length: Option<u64>,
    content_threshold: Option<usize>,
    size_probe: Option<bool>,
    challenge_hosts: Option<Vec<String>>,
}

impl FetchConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of proxies tried per fetch.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Set the timeout of the first attempt.
    pub fn initial_timeout(mut self, timeout: Duration) -> Self {
        self.initial_timeout = Some(timeout);
        self
    }

    /// Set the timeout of later attempts.
    pub fn retry_timeout(mut self, timeout: Duration) -> Self {
        self.retry_timeout = Some(timeout);
        self
    }

    /// Set the declared body size above which pages are skipped.
    pub fn max_content_length(mut self, bytes: u64) -> Self {
        self.max_content_length = Some(bytes);
        self
    }

    /// Set the prioritized text length that ends the body read.
    pub fn content_threshold(mut self, chars: usize) -> Self {
        self.content_threshold = Some(chars);
        self
    }

    /// Enable or disable the HEAD size probe.
    pub fn size_probe(mut self, enabled: bool) -> Self {
        self.size_probe = Some(enabled);
        self
    }

    /// Set the hosts whose challenge pages are treated as proxy failures.
    pub fn challenge_hosts(mut self, hosts: Vec<impl Into<String>>) -> Self {
        self.challenge_hosts = Some(hosts.into_iter().map(Into::into).collect());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> FetchConfig {
        FetchConfig {
            max_attempts: self.max_attempts.unwrap_or(3).max(1),
            initial_timeout: self.initial_timeout.unwrap_or(Duration::from_secs(5)),
            retry_timeout: self.retry_timeout.unwrap_or(Duration::from_secs(3)),
            max_content_length: self.max_content_length.unwrap_or(2_000_000),
            content_threshold: self.content_threshold.unwrap_or(2000),
            size_probe: self.size_probe.unwrap_or(true),
            challenge_hosts: self
                .challenge_hosts
                .unwrap_or_else(|| vec!["duckduckgo.com".to_string()]),
        }
    }
}

/// Configuration for the offline validator.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// URLs or file paths listing candidate proxies.
    pub sources: Vec<String>,
    /// Timeout when downloading a source list.
    pub source_timeout: Duration,
    /// Search endpoint queried through every candidate.
    pub search_url: String,
    /// Queries sampled for the workload probe.
    pub test_queries: Vec<String>,
    /// Number of queries every candidate must pass.
    pub tests_per_proxy: usize,
    /// Minimum result links a probe response must contain.
    pub min_results: usize,
    /// CSS selector matching one search result link.
    pub result_selector: String,
    /// Per-request timeout of a probe.
    pub probe_timeout: Duration,
    /// Number of candidates validated concurrently.
    pub concurrency: usize,
    /// Log progress every this many tested candidates.
    pub progress_interval: usize,
    /// Where validated proxies are written.
    pub output_path: PathBuf,
}

impl ValidatorConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ValidatorConfigBuilder {
        ValidatorConfigBuilder::new()
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        ValidatorConfigBuilder::new().build()
    }
}

/// Builder for `ValidatorConfig`.
#[derive(Default)]
pub struct ValidatorConfigBuilder {
    sources: Option<Vec<String>>,
    source_timeout: Option<Duration>,
    search_url: Option<String>,
    test_queries: Option<Vec<String>>,
    tests_per_proxy: Option<usize>,
    min_results: Option<usize>,
    result_selector: Option<String>,
    probe_timeout: Option<Duration>,
    concurrency: Option<usize>,
    progress_interval: Option<usize>,
    output_path: Option<PathBuf>,
}

impl ValidatorConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the source URLs or file paths to fetch candidates from.
    pub fn sources(mut self, sources: Vec<impl Into<String>>) -> Self {
        self.sources = Some(sources.into_iter().map(Into::into).collect());
        self
    }

    pub fn source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = Some(timeout);
        self
    }

    /// Set the search endpoint used by the workload probe.
    pub fn search_url(mut self, url: impl Into<String>) -> Self {
        self.search_url = Some(url.into());
        self
    }

    pub fn test_queries(mut self, queries: Vec<impl Into<String>>) -> Self {
        self.test_queries = Some(queries.into_iter().map(Into::into).collect());
        self
    }

    pub fn tests_per_proxy(mut self, count: usize) -> Self {
        self.tests_per_proxy = Some(count);
        self
    }

    /// Set the minimum number of search results a probe must see.
    pub fn min_results(mut self, count: usize) -> Self {
        self.min_results = Some(count);
        self
    }

    pub fn result_selector(mut self, selector: impl Into<String>) -> Self {
        self.result_selector = Some(selector.into());
        self
    }

    /// Set the per-request timeout of a probe.
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = Some(timeout);
        self
    }

    /// Set the number of concurrent validations.
    pub fn concurrency(mut self, workers: usize) -> Self {
        self.concurrency = Some(workers);
        self
    }

    pub fn progress_interval(mut self, every: usize) -> Self {
        self.progress_interval = Some(every);
        self
    }

    /// Set where validated proxies are written.
    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ValidatorConfig {
        ValidatorConfig {
            sources: self
                .sources
                .unwrap_or_else(|| DEFAULT_SOURCES.iter().map(|s| s.to_string()).collect()),
            source_timeout: self.source_timeout.unwrap_or(Duration::from_secs(15)),
            search_url: self
                .search_url
                .unwrap_or_else(|| "https://html.duckduckgo.com/html/".to_string()),
            test_queries: self
                .test_queries
                .unwrap_or_else(|| DEFAULT_TEST_QUERIES.iter().map(|s| s.to_string()).collect()),
            tests_per_proxy: self.tests_per_proxy.unwrap_or(2).max(1),
            min_results: self.min_results.unwrap_or(3),
            result_selector: self
                .result_selector
                .unwrap_or_else(|| "a.result__a".to_string()),
            probe_timeout: self.probe_timeout.unwrap_or(Duration::from_secs(15)),
            concurrency: self.concurrency.unwrap_or(30).max(1),
            progress_interval: self.progress_interval.unwrap_or(10).max(1),
            output_path: self
                .output_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH)),
        }
    }
}
