//! Utility functions for proxy discovery.

use crate::proxy::parse_address;

use log::warn;
use reqwest::Client;
use std::net::SocketAddr;
use std::time::Duration;

/// Fetch and parse a list of proxies from a URL or file path.
pub(crate) async fn fetch_proxies_from_source(
    source: &str,
    timeout: Duration,
) -> Result<Vec<SocketAddr>, reqwest::Error> {
    if source.starts_with("http") {
        // Fetch from URL
        let client = Client::builder().timeout(timeout).build()?;
        let response = client.get(source).send().await?.error_for_status()?;
        let content = response.text().await?;
        Ok(parse_proxy_list(&content))
    } else {
        // Read from file
        match tokio::fs::read_to_string(source).await {
            Ok(content) => Ok(parse_proxy_list(&content)),
            Err(e) => {
                warn!("Cannot read proxy list {}: {}", source, e);
                Ok(Vec::new())
            }
        }
    }
}

/// Parse the text content to extract SOCKS5 proxy addresses.
///
/// Accepts `IP:PORT`, `[IPv6]:PORT` and `socks5://IP:PORT` lines; anything
/// else, including comments and host names, is skipped.
pub(crate) fn parse_proxy_list(content: &str) -> Vec<SocketAddr> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(parse_address)
        .collect()
}
