//! Middleware implementation for reqwest.

use crate::config::FetchConfig;
use crate::fetch::{rotate, AttemptOutcome, RetryPlan};
use crate::pool::ProxyPool;
use crate::transport::ClientCache;

use anyhow::anyhow;
use async_trait::async_trait;
use log::{info, warn};
use reqwest_middleware::{Error, Middleware, Next, Result};
use std::sync::Arc;

/// Middleware that sends every request through a proxy from the pool,
/// blacklisting proxies that fail and retrying on another one.
///
/// A non-2xx response counts as a failure of the proxy that returned it, the
/// same as in [`crate::Fetcher`]. Once every attempt has failed the caller
/// gets an error rather than the last response.
///
/// The inner client of the `ClientWithMiddleware` is not used; each proxy has
/// its own connection-pooled client.
#[derive(Clone)]
pub struct ProxyPoolMiddleware {
    /// The proxy pool.
    pool: Arc<ProxyPool>,
    clients: Arc<ClientCache>,
    plan: RetryPlan,
}

impl ProxyPoolMiddleware {
    /// Create a new proxy pool middleware over a shared pool.
    pub fn new(pool: Arc<ProxyPool>, config: &FetchConfig) -> Self {
        let stats = pool.stats();
        info!(
            "Proxy pool middleware using {}/{} available proxies",
            stats.available, stats.total
        );
        if stats.total == 0 {
            warn!("No proxies available in pool");
        }

        Self {
            pool,
            clients: Arc::new(ClientCache::new()),
            plan: RetryPlan {
                max_attempts: config.max_attempts.max(1),
                initial_timeout: config.initial_timeout,
                retry_timeout: config.retry_timeout,
            },
        }
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }
}

#[async_trait]
impl Middleware for ProxyPoolMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        _extensions: &mut http::Extensions,
        _next: Next<'_>,
    ) -> Result<reqwest::Response> {
        if req.try_clone().is_none() {
            return Err(Error::Middleware(anyhow!(
                "Request object is not cloneable. Are you passing a streaming body?"
            )));
        }

        let url = req.url().to_string();
        let clients = Arc::clone(&self.clients);

        rotate(&self.pool, &url, self.plan, move |proxy, timeout| {
            let attempt_request = req.try_clone();
            let clients = Arc::clone(&clients);
            async move {
                let Some(mut proxied_request) = attempt_request else {
                    return AttemptOutcome::Retry("request is not cloneable".to_string());
                };
                *proxied_request.timeout_mut() = Some(timeout);

                proxy.limiter.until_ready().await;

                let client = match clients.get(&proxy.url) {
                    Ok(client) => client,
                    Err(e) => return AttemptOutcome::Retry(format!("cannot build client: {e}")),
                };

                match client.execute(proxied_request).await {
                    Ok(response) => classify_response(response),
                    Err(e) => {
                        clients.forget(&proxy.url);
                        AttemptOutcome::Retry(e.to_string())
                    }
                }
            }
        })
        .await
        .map_err(|e| Error::Middleware(anyhow!(e)))
    }
}

fn classify_response(response: reqwest::Response) -> AttemptOutcome<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        AttemptOutcome::Success(response)
    } else {
        AttemptOutcome::Retry(format!("HTTP {}", status.as_u16()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use reqwest_middleware::ClientBuilder;
    use std::time::Duration;
    use tempfile::TempDir;

    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn response(status: u16) -> reqwest::Response {
        http::Response::builder()
            .status(status)
            .body("body")
            .unwrap()
            .into()
    }

    #[test]
    fn only_success_statuses_are_accepted() {
        assert!(matches!(classify_response(response(200)), AttemptOutcome::Success(_)));
        assert!(matches!(classify_response(response(204)), AttemptOutcome::Success(_)));

        for status in [403, 404, 429, 502, 503] {
            match classify_response(response(status)) {
                AttemptOutcome::Retry(reason) => assert_eq!(reason, format!("HTTP {status}")),
                _ => panic!("HTTP {status} should rotate"),
            }
        }
    }

    #[tokio::test]
    async fn unreachable_proxies_are_blacklisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("working_proxies.csv");
        let (a, b) = (closed_port(), closed_port());
        std::fs::write(&path, format!("127.0.0.1,{a}\n127.0.0.1,{b}\n")).unwrap();
        let pool = Arc::new(ProxyPool::new(PoolConfig::builder().store_path(&path).build()));
        let config = FetchConfig::builder()
            .max_attempts(2)
            .initial_timeout(Duration::from_secs(2))
            .retry_timeout(Duration::from_secs(1))
            .build();

        let client = ClientBuilder::new(reqwest::Client::new())
            .with(ProxyPoolMiddleware::new(Arc::clone(&pool), &config))
            .build();
        let result = client.get("http://127.0.0.1:9/").send().await;

        assert!(matches!(result, Err(Error::Middleware(_))));
        assert_eq!(pool.stats().marked_bad, 2);
        assert_eq!(pool.count_available(), 0);
        let remaining = std::fs::read_to_string(&path).unwrap();
        assert!(remaining.trim().is_empty());
    }
}
