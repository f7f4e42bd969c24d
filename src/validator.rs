//! Offline discovery and validation of proxies.
//!
//! Candidates are collected from public lists and each one is made to run a
//! real search through itself. Only proxies that return real results are
//! written to the durable file the pool loads at startup.

use crate::config::ValidatorConfig;
use crate::content;
use crate::error::{ProbeFailure, StoreError};
use crate::headers::browser_headers;
use crate::proxy::endpoint_url;
use crate::store::{format_row, ProxyStore};
use crate::utils;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use rand::seq::{IndexedRandom, SliceRandom};
use reqwest::Client;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// Pause between two queries through the same candidate.
const QUERY_PAUSE: Duration = Duration::from_millis(100);

/// Checks whether one candidate proxy is usable.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Returns the observed response time when the candidate passes.
    async fn probe(&self, addr: SocketAddr) -> Result<Duration, ProbeFailure>;
}

/// Probe that runs real search queries through the candidate and requires a
/// minimum number of result links in every response.
pub struct SearchProbe {
    query_urls: Vec<Url>,
    tests_per_proxy: usize,
    min_results: usize,
    result_selector: String,
    timeout: Duration,
}

impl SearchProbe {
    pub fn new(config: &ValidatorConfig) -> Result<Self, url::ParseError> {
        let query_urls = config
            .test_queries
            .iter()
            .map(|q| Url::parse_with_params(&config.search_url, &[("q", q.as_str()), ("s", "0")]))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            query_urls,
            tests_per_proxy: config.tests_per_proxy,
            min_results: config.min_results,
            result_selector: config.result_selector.clone(),
            timeout: config.probe_timeout,
        })
    }

    async fn search(&self, client: &Client, url: &Url) -> Result<Duration, ProbeFailure> {
        let start = Instant::now();
        let response = client
            .get(url.clone())
            .headers(browser_headers())
            .send()
            .await
            .map_err(|e| ProbeFailure::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeFailure::Status(status.as_u16()));
        }
        let html = response
            .text()
            .await
            .map_err(|e| ProbeFailure::Network(e.to_string()))?;
        let elapsed = start.elapsed();

        if content::is_challenge_page(&html) {
            return Err(ProbeFailure::Blocked);
        }
        let found = content::count_matches(&html, &self.result_selector).unwrap_or(0);
        if found < self.min_results {
            return Err(ProbeFailure::TooFewResults {
                found,
                required: self.min_results,
            });
        }
        Ok(elapsed)
    }
}

#[async_trait]
impl Probe for SearchProbe {
    async fn probe(&self, addr: SocketAddr) -> Result<Duration, ProbeFailure> {
        let urls: Vec<Url> = {
            let mut rng = rand::rng();
            self.query_urls
                .choose_multiple(&mut rng, self.tests_per_proxy)
                .cloned()
                .collect()
        };
        if urls.is_empty() {
            return Err(ProbeFailure::InvalidProxy("no test queries configured".into()));
        }

        let proxy = reqwest::Proxy::all(endpoint_url(addr))
            .map_err(|e| ProbeFailure::InvalidProxy(e.to_string()))?;
        let client = Client::builder()
            .proxy(proxy)
            .timeout(self.timeout)
            .build()
            .map_err(|e| ProbeFailure::InvalidProxy(e.to_string()))?;

        let mut total = Duration::ZERO;
        for (i, url) in urls.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(QUERY_PAUSE).await;
            }
            total += self.search(&client, url).await?;
        }
        Ok(total / urls.len() as u32)
    }
}

/// A candidate that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedProxy {
    pub addr: SocketAddr,
    /// Average response time over the probe's queries.
    pub latency: Duration,
}

/// Outcome of a validation batch.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub tested: usize,
    /// Passing proxies, fastest first.
    pub working: Vec<ValidatedProxy>,
    pub failed: usize,
    pub elapsed: Duration,
}

impl ValidationReport {
    /// Percentage of tested candidates that passed.
    pub fn success_rate(&self) -> f64 {
        if self.tested == 0 {
            return 0.0;
        }
        self.working.len() as f64 / self.tested as f64 * 100.0
    }
}

/// Discovers candidates, validates them concurrently and writes the
/// survivors to the durable proxy file.
pub struct Validator {
    config: ValidatorConfig,
    probe: Arc<dyn Probe>,
    store: ProxyStore,
}

impl Validator {
    /// Create a validator using [`SearchProbe`].
    pub fn new(config: ValidatorConfig) -> Result<Self, url::ParseError> {
        let probe = SearchProbe::new(&config)?;
        Ok(Self::with_probe(config, Arc::new(probe)))
    }

    pub fn with_probe(config: ValidatorConfig, probe: Arc<dyn Probe>) -> Self {
        let store = ProxyStore::new(config.output_path.clone());
        Self {
            config,
            probe,
            store,
        }
    }

    /// Collect candidates from every configured source, deduplicated and
    /// shuffled. Sources that fail are skipped.
    pub async fn discover(&self) -> Vec<SocketAddr> {
        info!("Fetching proxies from {} sources", self.config.sources.len());

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for source in &self.config.sources {
            match utils::fetch_proxies_from_source(source, self.config.source_timeout).await {
                Ok(found) => {
                    info!("Fetched {} proxies from {}", found.len(), source);
                    candidates.extend(found.into_iter().filter(|addr| seen.insert(*addr)));
                }
                Err(e) => warn!("Failed to fetch proxies from {}: {}", source, e),
            }
        }

        candidates.shuffle(&mut rand::rng());
        info!("Found {} unique candidate proxies", candidates.len());
        candidates
    }

    /// Probe every candidate with at most `concurrency` probes in flight.
    pub async fn validate(&self, candidates: Vec<SocketAddr>) -> ValidationReport {
        let mut seen = HashSet::new();
        let candidates: Vec<SocketAddr> = candidates.into_iter().filter(|a| seen.insert(*a)).collect();
        let total = candidates.len();
        info!(
            "Testing {} proxies with {} workers",
            total, self.config.concurrency
        );

        let start = Instant::now();
        let tested = Arc::new(AtomicUsize::new(0));
        let passed = Arc::new(AtomicUsize::new(0));
        let interval = self.config.progress_interval;

        let results: Vec<Option<ValidatedProxy>> = stream::iter(candidates)
            .map(|addr| {
                let probe = Arc::clone(&self.probe);
                let tested = Arc::clone(&tested);
                let passed = Arc::clone(&passed);
                let handle = tokio::spawn(async move {
                    let outcome = probe.probe(addr).await;
                    let done = tested.fetch_add(1, Ordering::Relaxed) + 1;
                    let result = match outcome {
                        Ok(latency) => {
                            passed.fetch_add(1, Ordering::Relaxed);
                            info!("Working proxy {} ({} ms)", addr, latency.as_millis());
                            Some(ValidatedProxy { addr, latency })
                        }
                        Err(e) => {
                            debug!("Rejected proxy {}: {}", addr, e);
                            None
                        }
                    };
                    if done % interval == 0 {
                        let rate = done as f64 / start.elapsed().as_secs_f64().max(f64::EPSILON);
                        info!(
                            "Progress: {}/{} tested, {} working, {:.1}/s",
                            done,
                            total,
                            passed.load(Ordering::Relaxed),
                            rate
                        );
                    }
                    result
                });
                async move {
                    match handle.await {
                        Ok(result) => result,
                        Err(e) => {
                            warn!("Validation of {} aborted: {}", addr, e);
                            None
                        }
                    }
                }
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        let mut working: Vec<ValidatedProxy> = results.into_iter().flatten().collect();
        working.sort_by_key(|p| p.latency);

        let report = ValidationReport {
            tested: total,
            failed: total - working.len(),
            working,
            elapsed: start.elapsed(),
        };
        info!(
            "Testing complete in {:.1}s: {} working, {} failed ({:.1}%)",
            report.elapsed.as_secs_f64(),
            report.working.len(),
            report.failed,
            report.success_rate()
        );
        report
    }

    /// Replace the durable file with the working proxies of `report`.
    ///
    /// An empty report leaves the existing file untouched. Returns the
    /// number of rows written.
    pub fn persist(&self, report: &ValidationReport) -> Result<usize, StoreError> {
        if report.working.is_empty() {
            warn!(
                "No working proxies found, keeping {} unchanged; the sources may be stale or the search engine may be blocking them",
                self.store.path().display()
            );
            return Ok(0);
        }

        let rows = report
            .working
            .iter()
            .map(|p| format_row(p.addr, &[p.latency.as_millis().to_string()]));
        self.store.replace(rows)?;

        info!(
            "Saved {} working proxies to {}",
            report.working.len(),
            self.store.path().display()
        );
        Ok(report.working.len())
    }

    /// Discover, validate and persist in one pass.
    pub async fn run(&self) -> Result<ValidationReport, StoreError> {
        let candidates = self.discover().await;
        if candidates.is_empty() {
            warn!("No proxies found from sources");
            return Ok(ValidationReport::default());
        }

        let report = self.validate(candidates).await;
        self.persist(&report)?;
        Ok(report)
    }
}
