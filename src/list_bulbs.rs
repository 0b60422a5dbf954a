//! Binary list-bulbs lists LIFX bulbs on the local network.

use std::time::Duration;

use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use lifx_lan::{discover, Bulb};

#[derive(Debug, Parser)]
#[command(about = "Lists LIFX bulbs on the local network")]
struct Args {
    /// How long to wait for bulbs to respond, in seconds.
    #[arg(long, default_value_t = 10)]
    timeout: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let timeout = Duration::from_secs(args.timeout);

    let mut stats = Vec::new();
    for bulb in discover(timeout)? {
        let state = match bulb.state(timeout) {
            Ok(state) => state,
            Err(e) => {
                warn!("a bulb was discovered but we failed to query it: {}", e);
                continue;
            }
        };

        stats.push(format!(
            "{}:\n\tpower:      {}\n\thue:        {}°\n\tsaturation: {}%\n\tbrightness: {}%\n\tkelvin:     {}K",
            state.label,
            state.power,
            state.color.hue,
            state.color.saturation,
            state.color.brightness,
            state.color.kelvin,
        ));
    }

    stats.sort();
    println!("{}", stats.join("\n\n"));
    Ok(())
}
