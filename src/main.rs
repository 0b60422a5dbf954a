//! Binary mqtt-lifx-bridge connects LIFX bulbs on the local network to an MQTT broker.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use mqtt_lifx_bridge::{bridge, config};

#[derive(Debug, Parser)]
#[command(about = "Bridges LIFX bulbs on the local network to an MQTT broker")]
struct Args {
    /// Path to config.json.
    #[arg(long = "config-path")]
    config_path: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = config::parse_file(&args.config_path)?;
    bridge::run(config)
}
