//! Binary set-bulb sets power and color properties for a named LIFX bulb.

use std::time::Duration;

use anyhow::bail;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use lifx_lan::{discover, Bulb, Power, State, UdpBulb};

#[derive(Debug, Parser)]
#[command(about = "Sets power and color properties for a named LIFX bulb")]
struct Args {
    /// Label of the bulb to change.
    #[arg(long)]
    bulb: String,

    /// on or off.
    #[arg(long)]
    power: Option<Power>,

    /// 0 – 359°.
    #[arg(long)]
    hue: Option<i32>,

    /// 0 – 100%.
    #[arg(long)]
    saturation: Option<i32>,

    /// 0 – 100%.
    #[arg(long)]
    brightness: Option<i32>,

    /// 2500K – 9000K.
    #[arg(long)]
    kelvin: Option<i32>,

    /// How long to wait for bulbs to respond, in seconds.
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// How long to smooth transitions over, in milliseconds.
    #[arg(long, default_value_t = 500)]
    duration: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let timeout = Duration::from_secs(args.timeout);
    let transition = Duration::from_millis(args.duration);

    let mut found: Option<(UdpBulb, State)> = None;
    for bulb in discover(timeout)? {
        match bulb.state(timeout) {
            Ok(state) if state.label == args.bulb => {
                found = Some((bulb, state));
                break;
            }
            _ => continue,
        }
    }
    let Some((bulb, state)) = found else {
        bail!("could not find bulb {:?}", args.bulb);
    };

    let color_change = args.hue.is_some()
        || args.saturation.is_some()
        || args.brightness.is_some()
        || args.kelvin.is_some();

    let mut color = state.color;
    if let Some(hue) = args.hue {
        color.hue = hue;
    }
    if let Some(saturation) = args.saturation {
        color.saturation = saturation;
    }
    if let Some(brightness) = args.brightness {
        color.brightness = brightness;
    }
    if let Some(kelvin) = args.kelvin {
        color.kelvin = kelvin;
    }

    if color_change && args.power == Some(Power::On) {
        // Set the color first, instantly, so the bulb wakes up already showing it.
        bulb.set_color(color, Duration::ZERO, timeout)?;
        bulb.set_power(Power::On, transition, timeout)?;
    } else {
        if let Some(power) = args.power {
            bulb.set_power(power, transition, timeout)?;
        }
        if color_change {
            bulb.set_color(color, transition, timeout)?;
        }
    }

    Ok(())
}
