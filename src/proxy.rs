//! Proxy representation and status.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Scheme of every proxy managed by the pool.
pub const SCHEME: &str = "socks5";

/// Health of a proxy as seen by the current process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyStatus {
    /// The proxy may be handed out.
    Good,
    /// The proxy failed a request and is blacklisted.
    Bad,
}

/// Representation of a proxy server.
#[derive(Debug, Clone)]
pub struct Proxy {
    /// Address of the proxy.
    pub addr: SocketAddr,
    /// The endpoint URL of the proxy (e.g. "socks5://127.0.0.1:1080"), unique within a pool.
    pub url: String,
    /// The current status of the proxy.
    pub status: ProxyStatus,
    /// Rate limiter to control requests per second.
    pub limiter: Arc<DefaultDirectRateLimiter>,
}

impl Proxy {
    /// Create a new, good proxy with the given address and rate limit.
    pub fn new(addr: SocketAddr, max_rps: f64) -> Self {
        let per_second = NonZeroU32::new(max_rps.ceil() as u32).unwrap_or(NonZeroU32::MIN);
        let limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));

        Self {
            addr,
            url: endpoint_url(addr),
            status: ProxyStatus::Good,
            limiter,
        }
    }

    pub fn host(&self) -> IpAddr {
        self.addr.ip()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Convert the proxy URL to a reqwest::Proxy.
    pub fn to_reqwest_proxy(&self) -> Result<reqwest::Proxy, reqwest::Error> {
        reqwest::Proxy::all(&self.url)
    }
}

/// Compose the unique endpoint URL of a proxy address.
///
/// IPv6 hosts are bracketed, so `[::1]:1080` becomes `socks5://[::1]:1080`.
pub fn endpoint_url(addr: SocketAddr) -> String {
    format!("{SCHEME}://{addr}")
}

/// Parse a host column and a port column into a proxy address.
///
/// The host must be an IP literal; host names and port 0 are rejected.
pub fn parse_endpoint(host: &str, port: &str) -> Option<SocketAddr> {
    let host = host.trim();
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    let ip: IpAddr = host.parse().ok()?;
    let port: u16 = port.trim().parse().ok()?;
    if port == 0 {
        return None;
    }
    Some(SocketAddr::new(ip, port))
}

/// Parse `host:port`, `[v6]:port` or a full `socks5://` endpoint URL.
pub fn parse_address(value: &str) -> Option<SocketAddr> {
    let value = value.trim();
    let value = value
        .strip_prefix("socks5://")
        .or_else(|| value.strip_prefix("socks5h://"))
        .unwrap_or(value);
    let value = value.trim_end_matches('/');
    let addr: SocketAddr = value.parse().ok()?;
    if addr.port() == 0 {
        return None;
    }
    Some(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_url_is_scheme_host_port() {
        let v4 = parse_endpoint("203.0.113.7", "1080").unwrap();
        let v6 = parse_endpoint("2001:db8::1", "9050").unwrap();

        assert_eq!(endpoint_url(v4), "socks5://203.0.113.7:1080");
        assert_eq!(endpoint_url(v6), "socks5://[2001:db8::1]:9050");
    }

    #[test]
    fn parse_endpoint_rejects_bad_columns() {
        assert!(parse_endpoint("proxy.example.com", "1080").is_none());
        assert!(parse_endpoint("203.0.113.7", "0").is_none());
        assert!(parse_endpoint("203.0.113.7", "65536").is_none());
        assert!(parse_endpoint("ip", "port").is_none());
        assert_eq!(
            parse_endpoint(" [::1] ", " 1080 "),
            Some("[::1]:1080".parse().unwrap())
        );
    }

    #[test]
    fn parse_address_accepts_common_shapes() {
        let expected: SocketAddr = "198.51.100.2:4145".parse().unwrap();
        assert_eq!(parse_address("198.51.100.2:4145"), Some(expected));
        assert_eq!(parse_address("socks5://198.51.100.2:4145"), Some(expected));
        assert_eq!(parse_address("socks5://198.51.100.2:4145/"), Some(expected));
        assert_eq!(
            parse_address("[2001:db8::2]:1080"),
            Some("[2001:db8::2]:1080".parse().unwrap())
        );
        assert!(parse_address("198.51.100.2").is_none());
        assert!(parse_address("198.51.100.2:0").is_none());
    }

    #[test]
    fn new_proxy_starts_good() {
        let proxy = Proxy::new("127.0.0.1:9050".parse().unwrap(), 0.0);
        assert_eq!(proxy.status, ProxyStatus::Good);
        assert_eq!(proxy.url, "socks5://127.0.0.1:9050");
        assert_eq!(proxy.port(), 9050);
        assert!(proxy.to_reqwest_proxy().is_ok());
    }
}
