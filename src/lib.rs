//! # socks-rotor
//!
//! Resilient HTTP fetching through a rotating pool of SOCKS5 proxies.
//!
//! The pool is loaded from a durable file of validated proxies (falling back
//! to local Tor ports), every request picks a random healthy proxy, and
//! proxies that fail are blacklisted both in memory and in the file. A
//! separate validator discovers candidates from public lists and keeps only
//! those that can run real search queries.
//!
//! ```no_run
//! use socks_rotor::{FetchConfig, Fetcher, PoolConfig, ProxyPool};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), socks_rotor::FetchError> {
//! let pool = Arc::new(ProxyPool::new(PoolConfig::default()));
//! let fetcher = Fetcher::new(pool, FetchConfig::default());
//! let html = fetcher.fetch("https://example.com/").await?;
//! println!("{} bytes", html.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod content;
pub mod error;
pub mod fetch;
pub mod headers;
pub mod middleware;
pub mod pool;
pub mod proxy;
pub mod store;
pub mod transport;
mod utils;
pub mod validator;

pub use config::{
    FetchConfig, FetchConfigBuilder, PoolConfig, PoolConfigBuilder, ValidatorConfig,
    ValidatorConfigBuilder,
};
pub use error::{
    FetchError, InsufficientReason, NoProxiesAvailable, ProbeFailure, StoreError, TransportError,
};
pub use fetch::{AttemptOutcome, FetchOptions, FetchStats, Fetcher};
pub use middleware::ProxyPoolMiddleware;
pub use pool::{PoolSource, PoolStats, ProxyPool};
pub use proxy::{Proxy, ProxyStatus};
pub use store::{ProxyStore, StoreContents};
pub use transport::{Page, ReadLimits, ReqwestTransport, Transport};
pub use validator::{Probe, SearchProbe, ValidatedProxy, ValidationReport, Validator};
