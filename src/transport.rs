//! HTTP transport through a single SOCKS5 proxy.

use crate::error::TransportError;
use crate::headers::browser_headers;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use log::debug;
use parking_lot::Mutex;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, Response};
use std::collections::HashMap;
use std::time::Duration;

/// Body size at which the early-stop condition is first evaluated. Later
/// checks happen each time the body doubles, so the total parsing work stays
/// linear in the body size.
const FIRST_STOP_CHECK: usize = 4 * 1024;

/// Predicate deciding, from the body read so far, whether reading can stop.
pub type StopCondition<'a> = &'a (dyn Fn(&str) -> bool + Send + Sync);

/// Limits applied while reading one response.
#[derive(Clone, Copy)]
pub struct ReadLimits<'a> {
    /// Responses declaring more than this are not read at all; undeclared
    /// bodies are truncated here.
    pub max_bytes: u64,
    /// Optional early-stop condition.
    pub stop: Option<StopCondition<'a>>,
}

/// A response read through a proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub status: u16,
    /// Value of the `Content-Length` header, if any.
    pub declared_length: Option<u64>,
    /// Body text; empty when the declared length exceeded the limit.
    pub body: String,
}

impl Page {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends requests through a given proxy endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Ask for the declared size of `url` without downloading the body.
    async fn content_length(
        &self,
        url: &str,
        proxy_url: &str,
        timeout: Duration,
    ) -> Result<Option<u64>, TransportError>;

    /// GET `url` through `proxy_url`.
    async fn get(
        &self,
        url: &str,
        proxy_url: &str,
        timeout: Duration,
        limits: ReadLimits<'_>,
    ) -> Result<Page, TransportError>;

    /// Drop any cached state for a proxy that failed.
    fn forget(&self, _proxy_url: &str) {}
}

/// Connection-pooled `reqwest` clients, one per proxy endpoint.
#[derive(Default)]
pub struct ClientCache {
    clients: Mutex<HashMap<String, Client>>,
}

impl ClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the client bound to `proxy_url`, building it on first use.
    pub fn get(&self, proxy_url: &str) -> Result<Client, reqwest::Error> {
        if let Some(client) = self.clients.lock().get(proxy_url) {
            return Ok(client.clone());
        }

        let client = Client::builder()
            .proxy(reqwest::Proxy::all(proxy_url)?)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(self
            .clients
            .lock()
            .entry(proxy_url.to_string())
            .or_insert(client)
            .clone())
    }

    pub fn forget(&self, proxy_url: &str) {
        self.clients.lock().remove(proxy_url);
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn declared_length(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// [`Transport`] backed by `reqwest` with the `socks` feature.
#[derive(Default)]
pub struct ReqwestTransport {
    clients: ClientCache,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn client(&self, proxy_url: &str) -> Result<Client, TransportError> {
        self.clients
            .get(proxy_url)
            .map_err(|e| TransportError::Connect(format!("invalid proxy {}: {}", proxy_url, e)))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn content_length(
        &self,
        url: &str,
        proxy_url: &str,
        timeout: Duration,
    ) -> Result<Option<u64>, TransportError> {
        let response = self
            .client(proxy_url)?
            .head(url)
            .headers(browser_headers())
            .timeout(timeout)
            .send()
            .await?;
        Ok(declared_length(&response))
    }

    async fn get(
        &self,
        url: &str,
        proxy_url: &str,
        timeout: Duration,
        limits: ReadLimits<'_>,
    ) -> Result<Page, TransportError> {
        let response = self
            .client(proxy_url)?
            .get(url)
            .headers(browser_headers())
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status().as_u16();
        let declared = declared_length(&response);
        if declared.is_some_and(|n| n > limits.max_bytes) {
            return Ok(Page {
                status,
                declared_length: declared,
                body: String::new(),
            });
        }

        let buf = read_limited(response.bytes_stream(), limits).await?;
        debug!("Read {} bytes from {}", buf.len(), url);

        Ok(Page {
            status,
            declared_length: declared,
            body: String::from_utf8_lossy(&buf).into_owned(),
        })
    }

    fn forget(&self, proxy_url: &str) {
        self.clients.forget(proxy_url);
    }
}

/// Collect a chunked body, truncating at `limits.max_bytes` and stopping once
/// `limits.stop` accepts what has been read so far.
pub(crate) async fn read_limited<S, B, E>(chunks: S, limits: ReadLimits<'_>) -> Result<Vec<u8>, E>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    let max_bytes = usize::try_from(limits.max_bytes).unwrap_or(usize::MAX);
    let mut chunks = std::pin::pin!(chunks);
    let mut buf: Vec<u8> = Vec::new();
    let mut next_check = FIRST_STOP_CHECK;

    while let Some(chunk) = chunks.next().await {
        buf.extend_from_slice(chunk?.as_ref());
        if buf.len() >= max_bytes {
            debug!("Truncating body at {} bytes", max_bytes);
            buf.truncate(max_bytes);
            break;
        }
        if let Some(stop) = limits.stop {
            if buf.len() >= next_check {
                next_check = buf.len() * 2;
                if stop(&*String::from_utf8_lossy(&buf)) {
                    debug!("Stopping read early at {} bytes", buf.len());
                    break;
                }
            }
        }
    }

    Ok(buf)
}
