//! Interactive console: discover, connect, battery, available, disconnect
//!
//! Run with: cargo run --example probe_console
//! Without hardware: cargo run --example probe_console -- --mock

use chrono::Local;
use futures::StreamExt;
use probe_link_ble::ble::BleScanner;
use probe_link_ble::config::ProbeLinkConfig;
use probe_link_ble::mock::{MockScanner, MockTransportFactory};
use probe_link_ble::utils::{celsius_to_kelvin, device_label, format_battery, format_measurement};
use probe_link_ble::{
    DeviceDescriptor, DiscoveryService, ProbeScanner, ProbeType, Result, SessionRegistry,
    TransportFactory,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

fn print_line(line: &str) {
    if !line.is_empty() {
        println!("{} : {}", Local::now().format("%H:%M:%S%.3f"), line);
    }
}

fn list(descriptors: &[DeviceDescriptor]) -> String {
    let labels: Vec<_> = descriptors.iter().map(|d| d.to_string()).collect();
    format!("[{}]", labels.join(", "))
}

/// Simulated probes, plus a task feeding them measurements.
fn mock_backend() -> (Arc<dyn ProbeScanner>, Arc<dyn TransportFactory>) {
    let devices = vec![
        DeviceDescriptor::new("39051234", ProbeType::T104IrBt),
        DeviceDescriptor::new("41234567", ProbeType::MfHandle),
        DeviceDescriptor::new("52345678", ProbeType::QsrHandle),
    ];

    let scanner = Arc::new(MockScanner::new(devices.clone()));
    scanner.set_interval(Duration::from_millis(200));

    let factory = Arc::new(MockTransportFactory::new());
    for (i, device) in devices.iter().enumerate() {
        factory.prepare(device.serial_number()).set_battery(95 - 10 * i as u8);
    }

    let feeder = factory.clone();
    tokio::spawn(async move {
        let mut tick = 0u32;
        loop {
            tokio::time::sleep(Duration::from_secs(2)).await;
            tick += 1;
            for device in &devices {
                let Some(transport) = feeder.transport(device.serial_number()) else {
                    continue;
                };
                for kind in device.probe_type().supported_kinds() {
                    let celsius = 20.0 + (tick % 10) as f64 * 1.5;
                    transport.emit_measurement(*kind, celsius_to_kelvin(celsius) as f32, 1);
                }
            }
        }
    });

    let scanner: Arc<dyn ProbeScanner> = scanner;
    let factory: Arc<dyn TransportFactory> = factory;
    (scanner, factory)
}

async fn ble_backend() -> Result<(Arc<dyn ProbeScanner>, Arc<dyn TransportFactory>)> {
    let scanner = Arc::new(BleScanner::new().await?);
    let factory: Arc<dyn TransportFactory> = Arc::new(scanner.transport_factory());
    let scanner: Arc<dyn ProbeScanner> = scanner;
    Ok((scanner, factory))
}

async fn connect(discovery: &DiscoveryService, registry: &SessionRegistry) {
    let devices = discovery.list_visible();
    print_line(&format!("Connection to devices: {}", list(&devices)));

    for (serial, result) in registry.create_sessions(&devices).await {
        let session = match result {
            Ok(session) => session,
            Err(e) => {
                print_line(&format!("<create {} failed: {}>", serial, e));
                continue;
            }
        };

        let descriptor = session.descriptor().clone();
        for kind in descriptor.probe_type().supported_kinds() {
            let label = descriptor.clone();
            let subscribed = session.subscribe(*kind, move |sample| {
                print_line(&format_measurement(&label, sample));
            });
            if let Err(e) = subscribed {
                print_line(&format!("<{} subscribe failed: {}>", device_label(&descriptor), e));
            }
        }

        match session.battery_level().await {
            Ok(level) => print_line(&format_battery(&descriptor, level)),
            Err(e) => print_line(&format!("<create {} battery failed: {}>", descriptor, e)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("probe_link_ble=info".parse().unwrap()),
        )
        .init();

    let use_mock = std::env::args().any(|arg| arg == "--mock");
    let config = ProbeLinkConfig::default().with_scan_duration(Duration::from_secs(3));

    let (scanner, factory) = if use_mock {
        mock_backend()
    } else {
        ble_backend().await?
    };

    let discovery = DiscoveryService::new(scanner, config.discovery.clone());
    let registry = SessionRegistry::new(factory, config.registry.clone(), config.session.clone());

    println!("Commands: discover, connect, battery, available, disconnect, quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match line.trim() {
            "discover" => {
                let devices: Vec<_> = discovery.scan_default().collect().await;
                print_line(&format!("Discovered devices: {}", list(&devices)));
            }
            "connect" => connect(&discovery, &registry).await,
            "battery" => {
                for (serial, level) in registry.battery_levels().await {
                    match (registry.get(&serial), level) {
                        (Some(session), Ok(level)) => print_line(&format!(
                            "<device {} battery: {}>",
                            device_label(session.descriptor()),
                            level
                        )),
                        (_, Err(e)) => print_line(&format!("<{} battery failed: {}>", serial, e)),
                        (None, Ok(_)) => {}
                    }
                }
            }
            "available" => {
                for (serial, available) in registry.availability().await {
                    print_line(&format!("<{} available: {}>", serial, available));
                }
            }
            "disconnect" => {
                let report = registry.disconnect_all().await;
                print_line(&format!(
                    "Devices {} disconnected!",
                    report.devices().join(", ")
                ));
                for (serial, e) in report.failed() {
                    print_line(&format!("<{} close failed: {}>", serial, e));
                }
            }
            "quit" | "exit" => break,
            "" => {}
            other => println!("Unknown command: {}", other),
        }
    }

    registry.disconnect_all().await;
    Ok(())
}
