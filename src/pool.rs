//! Core proxy pool implementation.

use crate::config::PoolConfig;
use crate::error::NoProxiesAvailable;
use crate::proxy::{parse_endpoint, Proxy, ProxyStatus};
use crate::store::ProxyStore;

use log::{debug, info, warn};
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Where the current pool snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolSource {
    /// The durable proxy file.
    Store,
    /// The configured fallback list.
    Fallback,
}

/// Counters describing the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub available: usize,
    pub bad: usize,
    /// Proxies marked bad since the pool was created.
    pub marked_bad: usize,
    /// Automatic resets since the pool was created.
    pub resets: usize,
    pub source: PoolSource,
}

struct Snapshot {
    proxies: Vec<Proxy>,
    index: HashMap<String, usize>,
    source: PoolSource,
}

impl Snapshot {
    fn new(addrs: impl IntoIterator<Item = SocketAddr>, config: &PoolConfig, source: PoolSource) -> Self {
        let mut proxies = Vec::new();
        let mut index = HashMap::new();
        for addr in addrs {
            let proxy = Proxy::new(addr, config.max_requests_per_second);
            if index.contains_key(&proxy.url) {
                continue;
            }
            index.insert(proxy.url.clone(), proxies.len());
            proxies.push(proxy);
        }
        Self { proxies, index, source }
    }

    fn available(&self) -> usize {
        self.proxies
            .iter()
            .filter(|p| p.status == ProxyStatus::Good)
            .count()
    }

    fn reset(&mut self) -> usize {
        let mut reclaimed = 0;
        for proxy in self.proxies.iter_mut().filter(|p| p.status == ProxyStatus::Bad) {
            proxy.status = ProxyStatus::Good;
            reclaimed += 1;
        }
        reclaimed
    }
}

/// The process-wide view of proxy health.
///
/// Selection, blacklisting, resets and reloads are serialized by a single
/// lock around the snapshot. The durable file is updated outside that lock.
pub struct ProxyPool {
    snapshot: RwLock<Snapshot>,
    store: Arc<ProxyStore>,
    /// Configuration for the pool.
    pub config: PoolConfig,
    marked_bad: AtomicUsize,
    resets: AtomicUsize,
    low_warned: AtomicBool,
}

impl ProxyPool {
    /// Create a pool from the durable file named in `config`, falling back to
    /// the configured list when the file yields nothing.
    pub fn new(config: PoolConfig) -> Self {
        let store = Arc::new(ProxyStore::new(config.store_path.clone()));
        let snapshot = Self::load(&store, &config);
        info!(
            "Proxy pool initialized with {} proxies ({:?})",
            snapshot.proxies.len(),
            snapshot.source
        );

        Self {
            snapshot: RwLock::new(snapshot),
            store,
            config,
            marked_bad: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
            low_warned: AtomicBool::new(false),
        }
    }

    fn load(store: &ProxyStore, config: &PoolConfig) -> Snapshot {
        match store.read() {
            Ok(contents) if !contents.proxies.is_empty() => {
                info!(
                    "Loaded {} proxies from {} ({} malformed, {} duplicate rows skipped)",
                    contents.proxies.len(),
                    store.path().display(),
                    contents.malformed,
                    contents.duplicates
                );
                Snapshot::new(contents.proxies, config, PoolSource::Store)
            }
            Ok(contents) => {
                warn!(
                    "No usable proxies in {} ({} malformed rows), using {} fallback proxies",
                    store.path().display(),
                    contents.malformed,
                    config.fallback.len()
                );
                Self::fallback(config)
            }
            Err(e) => {
                warn!("{}, using {} fallback proxies", e, config.fallback.len());
                Self::fallback(config)
            }
        }
    }

    fn fallback(config: &PoolConfig) -> Snapshot {
        let addrs = config.fallback.iter().filter_map(|(host, port)| {
            let addr = parse_endpoint(host, &port.to_string());
            if addr.is_none() {
                warn!("Ignoring invalid fallback proxy {}:{}", host, port);
            }
            addr
        });
        Snapshot::new(addrs, config, PoolSource::Fallback)
    }

    /// Discard all in-memory status and load the durable file again.
    ///
    /// Returns the number of proxies in the new snapshot.
    pub fn reload(&self) -> usize {
        info!("Reloading proxies from {}", self.store.path().display());
        let fresh = Self::load(&self.store, &self.config);
        let total = fresh.proxies.len();
        *self.snapshot.write() = fresh;
        self.low_warned.store(false, Ordering::Relaxed);
        info!("Reloaded {} proxies", total);
        total
    }

    /// Get a random good proxy.
    ///
    /// When every proxy is bad the whole pool is reset to good first. This
    /// fails only when the pool holds no proxy at all.
    pub fn pick_proxy(&self) -> Result<Proxy, NoProxiesAvailable> {
        {
            let snapshot = self.snapshot.read();
            if snapshot.proxies.is_empty() {
                return Err(NoProxiesAvailable);
            }
            if let Some(proxy) = self.choose(&snapshot) {
                return Ok(proxy);
            }
        }

        let mut snapshot = self.snapshot.write();
        // Another caller may have reset while we waited for the write lock.
        if snapshot.available() == 0 {
            let reclaimed = snapshot.reset();
            self.resets.fetch_add(1, Ordering::Relaxed);
            self.low_warned.store(false, Ordering::Relaxed);
            warn!("All proxies marked as bad, reset {} proxies to good", reclaimed);
        }
        self.choose(&snapshot).ok_or(NoProxiesAvailable)
    }

    fn choose(&self, snapshot: &Snapshot) -> Option<Proxy> {
        let good: Vec<&Proxy> = snapshot
            .proxies
            .iter()
            .filter(|p| p.status == ProxyStatus::Good)
            .collect();

        if good.is_empty() {
            return None;
        }

        if good.len() < self.config.low_watermark && !self.low_warned.swap(true, Ordering::Relaxed) {
            warn!(
                "Running low on proxies: {} available (threshold {}), consider running the validator",
                good.len(),
                self.config.low_watermark
            );
        }

        let idx = rand::rng().random_range(0..good.len());
        Some(good[idx].clone())
    }

    /// Reset every bad proxy to good. Returns how many were reset.
    pub fn reset(&self) -> usize {
        let reclaimed = self.snapshot.write().reset();
        self.low_warned.store(false, Ordering::Relaxed);
        reclaimed
    }

    /// Mark a proxy bad and drop its row from the durable file.
    ///
    /// Returns `true` when this call changed the proxy's status. Marking an
    /// unknown or already bad proxy does nothing. A failure to update the
    /// file is logged; the in-memory status still changes.
    ///
    /// The file is rewritten on the calling thread. Async callers should use
    /// [`ProxyPool::mark_bad_async`].
    pub fn mark_bad(&self, url: &str) -> bool {
        let Some(removal) = self.flag_bad(url) else {
            return false;
        };
        if let Some(addr) = removal {
            if let Err(e) = self.store.remove(addr) {
                warn!("Failed to remove {} from proxy file: {}", url, e);
            }
        }
        true
    }

    /// Like [`ProxyPool::mark_bad`], with the file rewrite run on tokio's
    /// blocking pool.
    pub async fn mark_bad_async(&self, url: &str) -> bool {
        let Some(removal) = self.flag_bad(url) else {
            return false;
        };
        if let Some(addr) = removal {
            let store = Arc::clone(&self.store);
            match tokio::task::spawn_blocking(move || store.remove(addr)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!("Failed to remove {} from proxy file: {}", url, e),
                Err(e) => warn!("Proxy file update for {} did not complete: {}", url, e),
            }
        }
        true
    }

    /// Flip a good proxy to bad in memory.
    ///
    /// `None` when nothing changed, otherwise the address whose row must be
    /// removed from the durable file, if any.
    fn flag_bad(&self, url: &str) -> Option<Option<SocketAddr>> {
        let mut snapshot = self.snapshot.write();
        let Some(&idx) = snapshot.index.get(url) else {
            debug!("Ignoring unknown proxy {}", url);
            return None;
        };
        let source = snapshot.source;
        let proxy = &mut snapshot.proxies[idx];
        if proxy.status == ProxyStatus::Bad {
            return None;
        }
        proxy.status = ProxyStatus::Bad;
        let addr = proxy.addr;

        warn!(
            "Proxy {} marked bad, {}/{} remaining",
            url,
            snapshot.available(),
            snapshot.proxies.len()
        );
        self.marked_bad.fetch_add(1, Ordering::Relaxed);

        Some((source == PoolSource::Store).then_some(addr))
    }

    /// Total number of proxies in the pool.
    pub fn count_total(&self) -> usize {
        self.snapshot.read().proxies.len()
    }

    /// Number of proxies currently good.
    pub fn count_available(&self) -> usize {
        self.snapshot.read().available()
    }

    /// Get statistics about the proxy pool.
    pub fn stats(&self) -> PoolStats {
        let snapshot = self.snapshot.read();
        let total = snapshot.proxies.len();
        let available = snapshot.available();
        PoolStats {
            total,
            available,
            bad: total - available,
            marked_bad: self.marked_bad.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
            source: snapshot.source,
        }
    }

    /// Status of a proxy by endpoint URL, if it is in the pool.
    pub fn status(&self, url: &str) -> Option<ProxyStatus> {
        let snapshot = self.snapshot.read();
        snapshot.index.get(url).map(|&idx| snapshot.proxies[idx].status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn pool_with(table: Option<&str>, fallback: Vec<(&str, u16)>) -> (TempDir, ProxyPool) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("working_proxies.csv");
        if let Some(table) = table {
            fs::write(&path, table).unwrap();
        }
        let config = PoolConfig::builder()
            .store_path(path)
            .fallback(fallback)
            .low_watermark(0)
            .build();
        (dir, ProxyPool::new(config))
    }

    const TABLE: &str = "ip,port,latency_ms\n\
                         203.0.113.1,1080,120\n\
                         203.0.113.2,1080,80\n\
                         \n\
                         203.0.113.1,1080,95\n\
                         not-an-ip,1080\n\
                         203.0.113.3,99999\n\
                         203.0.113.3,4145\n";

    #[test]
    fn load_counts_only_distinct_valid_rows() {
        let (_dir, pool) = pool_with(Some(TABLE), vec![("127.0.0.1", 9050)]);

        let stats = pool.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.available, 3);
        assert_eq!(stats.source, PoolSource::Store);
    }

    #[test]
    fn unusable_files_fall_back() {
        let fallback = vec![("127.0.0.1", 9050), ("127.0.0.1", 9150), ("127.0.0.1", 9050)];

        for table in [None, Some(""), Some("ip,port\ngarbage\n\n")] {
            let (_dir, pool) = pool_with(table, fallback.clone());
            assert_eq!(pool.count_total(), 2);
            assert_eq!(pool.stats().source, PoolSource::Fallback);
        }
    }

    #[test]
    fn invalid_utf8_falls_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("working_proxies.csv");
        fs::write(&path, [0xff, 0xfe, 0x00, 0x31]).unwrap();
        let pool = ProxyPool::new(
            PoolConfig::builder()
                .store_path(path)
                .fallback(vec![("127.0.0.1", 9050)])
                .build(),
        );

        assert_eq!(pool.stats().source, PoolSource::Fallback);
        assert_eq!(pool.count_total(), 1);
    }

    #[test]
    fn pick_never_returns_a_bad_proxy() {
        let (_dir, pool) = pool_with(Some(TABLE), vec![]);
        pool.mark_bad("socks5://203.0.113.1:1080");
        pool.mark_bad("socks5://203.0.113.3:4145");

        for _ in 0..50 {
            let proxy = pool.pick_proxy().unwrap();
            assert_eq!(proxy.url, "socks5://203.0.113.2:1080");
            assert_eq!(proxy.status, ProxyStatus::Good);
        }
    }

    #[test]
    fn mark_bad_removes_row_from_durable_file() {
        let (dir, pool) = pool_with(Some(TABLE), vec![]);

        assert!(pool.mark_bad("socks5://203.0.113.1:1080"));
        assert_eq!(pool.count_available(), 2);
        assert_eq!(pool.status("socks5://203.0.113.1:1080"), Some(ProxyStatus::Bad));

        let written = fs::read_to_string(dir.path().join("working_proxies.csv")).unwrap();
        assert!(!written.contains("203.0.113.1,"));

        pool.reload();
        assert_eq!(pool.count_total(), 2);
        assert!(pool.status("socks5://203.0.113.1:1080").is_none());
    }

    #[test]
    fn mark_bad_removes_first_row_of_a_bom_file() {
        let (_dir, pool) = pool_with(Some("\u{feff}203.0.113.1,1080\n203.0.113.2,1080\n"), vec![]);
        assert_eq!(pool.count_total(), 2);

        assert!(pool.mark_bad("socks5://203.0.113.1:1080"));

        assert_eq!(pool.reload(), 1);
        assert!(pool.status("socks5://203.0.113.1:1080").is_none());
    }

    #[tokio::test]
    async fn mark_bad_async_removes_row_from_durable_file() {
        let (dir, pool) = pool_with(Some(TABLE), vec![]);

        assert!(pool.mark_bad_async("socks5://203.0.113.2:1080").await);
        assert!(!pool.mark_bad_async("socks5://203.0.113.2:1080").await);

        let written = fs::read_to_string(dir.path().join("working_proxies.csv")).unwrap();
        assert!(!written.contains("203.0.113.2,"));
        assert_eq!(pool.stats().marked_bad, 1);
        assert_eq!(pool.status("socks5://203.0.113.2:1080"), Some(ProxyStatus::Bad));
    }

    #[test]
    fn mark_bad_is_idempotent() {
        let (dir, pool) = pool_with(Some(TABLE), vec![]);
        let path = dir.path().join("working_proxies.csv");

        assert!(pool.mark_bad("socks5://203.0.113.2:1080"));
        let after_first = fs::read_to_string(&path).unwrap();
        let stats_first = pool.stats();

        assert!(!pool.mark_bad("socks5://203.0.113.2:1080"));
        assert_eq!(fs::read_to_string(&path).unwrap(), after_first);
        assert_eq!(pool.stats(), stats_first);
        assert_eq!(stats_first.marked_bad, 1);
    }

    #[test]
    fn mark_bad_ignores_unknown_proxies() {
        let (_dir, pool) = pool_with(Some(TABLE), vec![]);
        assert!(!pool.mark_bad("socks5://198.51.100.9:1080"));
        assert_eq!(pool.count_available(), 3);
    }

    #[test]
    fn fallback_proxies_never_touch_the_file() {
        let (dir, pool) = pool_with(None, vec![("127.0.0.1", 9050)]);

        assert!(pool.mark_bad("socks5://127.0.0.1:9050"));
        assert!(!dir.path().join("working_proxies.csv").exists());
    }

    #[test]
    fn exhausted_pool_resets_before_picking() {
        let (_dir, pool) = pool_with(Some(TABLE), vec![]);
        for url in [
            "socks5://203.0.113.1:1080",
            "socks5://203.0.113.2:1080",
            "socks5://203.0.113.3:4145",
        ] {
            pool.mark_bad(url);
        }
        assert_eq!(pool.count_available(), 0);

        let proxy = pool.pick_proxy().unwrap();

        assert_eq!(proxy.status, ProxyStatus::Good);
        assert_eq!(pool.count_available(), 3);
        assert_eq!(pool.stats().resets, 1);
    }

    #[test]
    fn empty_pool_has_no_proxies() {
        let (_dir, pool) = pool_with(None, vec![]);

        assert_eq!(pool.count_total(), 0);
        assert!(pool.pick_proxy().is_err());
        assert_eq!(pool.stats().resets, 0);
    }

    #[test]
    fn reload_restores_bad_proxies_still_in_the_file() {
        let (_dir, pool) = pool_with(None, vec![("127.0.0.1", 9050), ("127.0.0.1", 9150)]);
        pool.mark_bad("socks5://127.0.0.1:9050");
        assert_eq!(pool.count_available(), 1);

        assert_eq!(pool.reload(), 2);
        assert_eq!(pool.count_available(), 2);
    }

    #[test]
    fn pick_is_spread_across_good_proxies() {
        let (_dir, pool) = pool_with(Some(TABLE), vec![]);
        let seen: HashSet<String> = (0..200).map(|_| pool.pick_proxy().unwrap().url).collect();
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn concurrent_marking_is_serialized() {
        let table: String = (1..=40).map(|i| format!("198.51.100.{i},1080\n")).collect();
        let (dir, pool) = pool_with(Some(&table), vec![]);
        let pool = Arc::new(pool);

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for i in (1..=40).filter(|i| i % 4 == worker) {
                        pool.mark_bad(&format!("socks5://198.51.100.{i}:1080"));
                        pool.mark_bad(&format!("socks5://198.51.100.{i}:1080"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(pool.count_available(), 0);
        assert_eq!(pool.stats().marked_bad, 40);
        let written = fs::read_to_string(dir.path().join("working_proxies.csv")).unwrap();
        assert!(written.trim().is_empty());
    }
}
