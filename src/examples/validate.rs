//! Discover and validate public SOCKS5 proxies, writing the survivors to a
//! proxy file the pool can load.
//!
//! Usage: `cargo run --example validate -- [output-file] [workers]`

use socks_rotor::{Validator, ValidatorConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let mut config = ValidatorConfig::builder();
    if let Some(path) = args.next() {
        config = config.output_path(path);
    }
    if let Some(workers) = args.next() {
        config = config.concurrency(workers.parse()?);
    }
    let config = config.build();
    let output = config.output_path.clone();

    let validator = Validator::new(config)?;
    let report = validator.run().await?;

    println!(
        "Tested {} proxies in {:.1}s: {} working ({:.1}%)",
        report.tested,
        report.elapsed.as_secs_f64(),
        report.working.len(),
        report.success_rate()
    );
    for proxy in report.working.iter().take(10) {
        println!("  {} {} ms", proxy.addr, proxy.latency.as_millis());
    }
    if !report.working.is_empty() {
        println!("Saved to {}", output.display());
    }

    Ok(())
}
