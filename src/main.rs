use std::{net::IpAddr, path::PathBuf, time::Duration};

use anyhow::Context;
use clap::{Parser, Subcommand};
use figment::providers::Serialized;
use greeac::{derive::Property, Device, DeviceConfig};
use strum::IntoEnumIterator;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Control a Gree-protocol air conditioner on the local network
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// TOML file with the device settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Device IP address, overrides the config file
    #[arg(short, long, env = "GREEAC_ADDRESS")]
    address: Option<IpAddr>,

    /// Seconds to wait for the device to bind and report
    #[arg(short, long, default_value_t = 10)]
    timeout: u64,

    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every property once
    Status,
    /// Print every property after each status update
    Watch,
    /// Change a property, e.g. `set target-temperature 23`
    Set { property: Property, value: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = args.log_level.parse().unwrap_or(Level::INFO);
        EnvFilter::new(format!("greeac={}", level))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut figment = DeviceConfig::figment(args.config.as_deref());
    if let Some(address) = args.address {
        figment = figment.merge(Serialized::default("address", address));
    }
    let config = DeviceConfig::from_figment(figment).context("failed to load config")?;
    tracing::debug!(?config, "Config loaded");

    let device = Device::connect(config)?;
    let timeout = Duration::from_secs(args.timeout);
    tokio::time::timeout(timeout, async {
        device.wait_bound().await?;
        device.wait_status().await
    })
    .await
    .context("timed out waiting for the device")??;

    match args.command {
        Command::Status => print_properties(&device)?,
        Command::Watch => {
            let mut updates = device.subscribe();
            print_properties(&device)?;
            while updates.changed().await.is_ok() {
                print_properties(&device)?;
            }
        }
        Command::Set { property, value } => {
            let value = property.parse_value(&value)?;
            let mut updates = device.subscribe();
            updates.borrow_and_update();
            device.set_property(property, value)?;

            // The next accepted update is usually the command response
            if tokio::time::timeout(timeout, updates.changed()).await.is_err() {
                tracing::warn!("No response from the device");
            }
            print_properties(&device)?;
        }
    }

    device.shutdown().await;
    Ok(())
}

fn print_properties(device: &Device) -> anyhow::Result<()> {
    let mut properties = serde_json::Map::new();
    for property in Property::iter() {
        let value = match device.get_property(property) {
            Ok(value) => serde_json::to_value(value)?,
            Err(_) => serde_json::Value::Null,
        };
        properties.insert(property.to_string(), value);
    }
    println!("{}", serde_json::Value::Object(properties));
    Ok(())
}
