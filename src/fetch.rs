//! Resilient fetching through the proxy pool.
//!
//! A fetch is a bounded loop of attempts. Every attempt picks a fresh proxy
//! from the pool and reports one of three outcomes: success, a proxy-side
//! failure that blacklists the proxy and moves on, or a content verdict that
//! ends the fetch without blaming any proxy.

use crate::config::FetchConfig;
use crate::content;
use crate::error::{FetchError, InsufficientReason};
use crate::pool::ProxyPool;
use crate::proxy::Proxy;
use crate::transport::{Page, ReadLimits, ReqwestTransport, StopCondition, Transport};

use log::{debug, info, warn};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Result of one attempt through one proxy.
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    Success(T),
    /// The proxy failed; blacklist it and try another.
    Retry(String),
    /// Stop without blaming the proxy.
    Abort(FetchError),
}

/// Attempt count and timeouts of one rotation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPlan {
    pub max_attempts: usize,
    pub initial_timeout: Duration,
    pub retry_timeout: Duration,
}

impl RetryPlan {
    pub fn timeout_for(&self, attempt: usize) -> Duration {
        if attempt <= 1 {
            self.initial_timeout
        } else {
            self.retry_timeout
        }
    }
}

/// Run `attempt` with a freshly picked proxy until it succeeds, aborts, or
/// `plan.max_attempts` proxies have failed.
pub(crate) async fn rotate<T, F, Fut>(
    pool: &ProxyPool,
    url: &str,
    plan: RetryPlan,
    mut attempt: F,
) -> Result<T, FetchError>
where
    F: FnMut(Proxy, Duration) -> Fut,
    Fut: Future<Output = AttemptOutcome<T>>,
{
    let mut last_error = String::from("no attempt made");

    for n in 1..=plan.max_attempts {
        let proxy = pool.pick_proxy().map_err(|e| FetchError::ProxyFailure {
            url: url.to_string(),
            attempts: n - 1,
            reason: e.to_string(),
        })?;
        let endpoint = proxy.url.clone();
        let timeout = plan.timeout_for(n);
        debug!(
            "Attempt {}/{} for {} via {} ({:?} timeout)",
            n, plan.max_attempts, url, endpoint, timeout
        );

        match attempt(proxy, timeout).await {
            AttemptOutcome::Success(value) => {
                if n > 1 {
                    info!("Request to {} succeeded on attempt {} via {}", url, n, endpoint);
                }
                return Ok(value);
            }
            AttemptOutcome::Retry(reason) => {
                warn!(
                    "Attempt {}/{} for {} via {} failed: {}",
                    n, plan.max_attempts, url, endpoint, reason
                );
                pool.mark_bad_async(&endpoint).await;
                last_error = reason;
            }
            AttemptOutcome::Abort(err) => return Err(err),
        }
    }

    warn!(
        "All {} proxy attempts failed for {} ({}/{} proxies available)",
        plan.max_attempts,
        url,
        pool.count_available(),
        pool.count_total()
    );
    Err(FetchError::ProxyFailure {
        url: url.to_string(),
        attempts: plan.max_attempts,
        reason: last_error,
    })
}

/// Per-call overrides of the fetch configuration.
#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    pub max_attempts: usize,
    /// Stop reading once enough prioritized text has arrived.
    pub early_stop: bool,
}

impl From<&FetchConfig> for FetchOptions {
    fn from(config: &FetchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            early_stop: true,
        }
    }
}

/// Request counters of a fetcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    pub total_requests: usize,
    pub successful: usize,
    pub failed: usize,
}

impl FetchStats {
    /// Percentage of successful requests.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.successful as f64 / self.total_requests as f64 * 100.0
    }
}

/// Fetches pages through the proxy pool.
pub struct Fetcher {
    pool: Arc<ProxyPool>,
    transport: Arc<dyn Transport>,
    config: FetchConfig,
    total: AtomicUsize,
    successful: AtomicUsize,
    failed: AtomicUsize,
}

impl Fetcher {
    /// Create a fetcher using `reqwest` over SOCKS5.
    pub fn new(pool: Arc<ProxyPool>, config: FetchConfig) -> Self {
        Self::with_transport(pool, Arc::new(ReqwestTransport::new()), config)
    }

    pub fn with_transport(
        pool: Arc<ProxyPool>,
        transport: Arc<dyn Transport>,
        config: FetchConfig,
    ) -> Self {
        Self {
            pool,
            transport,
            config,
            total: AtomicUsize::new(0),
            successful: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch the body of `url` with the configured number of attempts.
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.fetch_with(url, &FetchOptions::from(&self.config)).await
    }

    /// Fetch `url` and keep only its prioritized text.
    pub async fn fetch_content(&self, url: &str) -> Result<String, FetchError> {
        let body = self.fetch(url).await?;
        let text = content::prioritized_text(&body, self.config.content_threshold);
        if text.is_empty() {
            return Err(FetchError::InsufficientContent {
                url: url.to_string(),
                reason: InsufficientReason::Empty,
            });
        }
        Ok(text)
    }

    /// Fetch the body of `url` with explicit options.
    pub async fn fetch_with(&self, url: &str, options: &FetchOptions) -> Result<String, FetchError> {
        let parsed = Url::parse(url).map_err(|source| FetchError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;

        self.total.fetch_add(1, Ordering::Relaxed);
        let result = self.fetch_parsed(&parsed, options).await;
        match &result {
            Ok(_) => self.successful.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.failed.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    async fn fetch_parsed(&self, url: &Url, options: &FetchOptions) -> Result<String, FetchError> {
        if self.config.size_probe {
            self.check_size(url.as_str()).await?;
        }

        let threshold = self.config.content_threshold;
        let enough = move |body: &str| content::has_enough_content(body, threshold);
        let limits = ReadLimits {
            max_bytes: self.config.max_content_length,
            stop: if options.early_stop {
                Some(&enough as StopCondition<'_>)
            } else {
                None
            },
        };
        let check_challenge = self.is_challenge_host(url);
        let plan = RetryPlan {
            max_attempts: options.max_attempts.max(1),
            initial_timeout: self.config.initial_timeout,
            retry_timeout: self.config.retry_timeout,
        };

        let url = url.as_str();
        rotate(&self.pool, url, plan, move |proxy, timeout| async move {
            proxy.limiter.until_ready().await;
            let outcome = match self.transport.get(url, &proxy.url, timeout, limits).await {
                Ok(page) => self.classify(url, page, check_challenge),
                Err(e) => AttemptOutcome::Retry(e.to_string()),
            };
            if matches!(outcome, AttemptOutcome::Retry(_)) {
                self.transport.forget(&proxy.url);
            }
            outcome
        })
        .await
    }

    /// Skip pages whose declared size is over the cap. A failed probe is not
    /// held against the proxy; the attempts that follow judge it.
    async fn check_size(&self, url: &str) -> Result<(), FetchError> {
        let proxy = self.pool.pick_proxy().map_err(|e| FetchError::ProxyFailure {
            url: url.to_string(),
            attempts: 0,
            reason: e.to_string(),
        })?;
        proxy.limiter.until_ready().await;

        match self
            .transport
            .content_length(url, &proxy.url, self.config.retry_timeout)
            .await
        {
            Ok(Some(declared)) if declared > self.config.max_content_length => {
                info!("Skipping {}: declares {} bytes", url, declared);
                Err(self.too_large(url, declared))
            }
            Ok(_) => Ok(()),
            Err(e) => {
                debug!("Size probe for {} via {} failed: {}", url, proxy.url, e);
                Ok(())
            }
        }
    }

    fn classify(&self, url: &str, page: Page, check_challenge: bool) -> AttemptOutcome<String> {
        if let Some(declared) = page
            .declared_length
            .filter(|&n| n > self.config.max_content_length)
        {
            return AttemptOutcome::Abort(self.too_large(url, declared));
        }
        if !page.is_success() {
            return AttemptOutcome::Retry(format!("HTTP {}", page.status));
        }
        if check_challenge && content::is_challenge_page(&page.body) {
            return AttemptOutcome::Retry("target served a challenge page".to_string());
        }
        if page.body.trim().is_empty() {
            return AttemptOutcome::Abort(FetchError::InsufficientContent {
                url: url.to_string(),
                reason: InsufficientReason::Empty,
            });
        }
        AttemptOutcome::Success(page.body)
    }

    fn too_large(&self, url: &str, declared: u64) -> FetchError {
        FetchError::InsufficientContent {
            url: url.to_string(),
            reason: InsufficientReason::TooLarge {
                declared,
                limit: self.config.max_content_length,
            },
        }
    }

    fn is_challenge_host(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        self.config
            .challenge_hosts
            .iter()
            .any(|h| host == h || host.ends_with(&format!(".{h}")))
    }

    /// Get request counters.
    pub fn stats(&self) -> FetchStats {
        FetchStats {
            total_requests: self.total.load(Ordering::Relaxed),
            successful: self.successful.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
