//! Basic example: Discover all nearby probes
//!
//! Run with: cargo run --example discover_probes

use futures::StreamExt;
use probe_link_ble::ble::BleScanner;
use probe_link_ble::config::DiscoveryConfig;
use probe_link_ble::{DiscoveryService, Result};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("probe_link_ble=debug".parse().unwrap()),
        )
        .init();

    println!("Starting probe discovery...");
    println!("Make sure your probe is switched on!\n");

    let scanner = Arc::new(BleScanner::new().await?);
    let discovery = DiscoveryService::new(scanner.clone(), DiscoveryConfig::default());

    // Register callback for discovered probes
    let _handle = discovery.on_probe_discovered(|descriptor| {
        println!("\nDiscovered probe:");
        println!("  Serial: {}", descriptor.serial_number());
        println!("  Type: {}", descriptor.probe_type());
        let kinds: Vec<_> = descriptor
            .probe_type()
            .supported_kinds()
            .iter()
            .map(|k| k.name())
            .collect();
        println!("  Measurements: {}", kinds.join(", "));
    });

    let mut scan = discovery.scan(Duration::from_secs(10));
    let mut count = 0;
    while scan.next().await.is_some() {
        count += 1;
    }

    println!("\nScan finished: {} probe(s) found", count);
    for serial in scanner.known_serials() {
        println!("  {}", serial);
    }

    Ok(())
}
