//! Fetch a page through the proxy pool.
//!
//! Usage: `cargo run --example fetch -- <url> [proxy-file]`

use socks_rotor::{FetchConfig, Fetcher, PoolConfig, ProxyPool};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let url = args.next().unwrap_or_else(|| "https://httpbin.org/ip".to_string());
    let mut pool_config = PoolConfig::builder().max_requests_per_second(3.0);
    if let Some(path) = args.next() {
        pool_config = pool_config.store_path(path);
    }

    let pool = Arc::new(ProxyPool::new(pool_config.build()));
    let stats = pool.stats();
    println!(
        "Pool: {}/{} proxies available ({:?})",
        stats.available, stats.total, stats.source
    );

    let fetcher = Fetcher::new(Arc::clone(&pool), FetchConfig::default());
    println!("Fetching {}...", url);
    match fetcher.fetch(&url).await {
        Ok(body) => {
            println!("Fetched {} bytes", body.len());
            println!("{}", body.chars().take(500).collect::<String>());
        }
        Err(e) if e.is_infrastructure_error() => println!("All proxies failed: {}", e),
        Err(e) => println!("Page not usable: {}", e),
    }

    let stats = pool.stats();
    println!(
        "Pool after fetch: {} available, {} blacklisted, {} resets",
        stats.available, stats.marked_bad, stats.resets
    );

    Ok(())
}
