//! The long-running MQTT ↔ LIFX loop.
//!
//! Bulbs are looked up by label in a registry that a background discovery pass refills every
//! few minutes.  Messages arriving on a bulb's topics actuate it; its observed state is
//! periodically published back to the same topics, retained, so the bus converges on what
//! the bulbs actually show.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::Context as _;
use rumqttc::{Client, Connection, Event, MqttOptions, Packet, QoS};
use tracing::{info, warn};

use lifx_lan::{discover, Bulb, Error, Power, State, UdpBulb};

use crate::config::{self, Config, Topics};

const DISCOVER_INTERVAL: Duration = Duration::from_secs(5 * 60);
const PUBLISH_INTERVAL: Duration = Duration::from_secs(30);
const DISCOVER_TIMEOUT: Duration = Duration::from_secs(10);
const BULB_TIMEOUT: Duration = Duration::from_secs(10);
const HANDLER_TIMEOUT: Duration = Duration::from_secs(15);
const POWER_TRANSITION: Duration = Duration::from_millis(500);
const COLOR_TRANSITION: Duration = Duration::from_millis(100);

/// Bulb handles by label.  Handles are shared, since each call opens its own socket.
type Registry = Arc<Mutex<HashMap<String, Arc<UdpBulb>>>>;

/// Which of a bulb's five topics a message arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Power,
    Hue,
    Saturation,
    Brightness,
    Kelvin,
}

impl Channel {
    fn name(self) -> &'static str {
        match self {
            Channel::Power => "power",
            Channel::Hue => "hue",
            Channel::Saturation => "saturation",
            Channel::Brightness => "brightness",
            Channel::Kelvin => "kelvin",
        }
    }
}

/// Runs the bridge until the process is killed.
pub fn run(config: Config) -> anyhow::Result<()> {
    let (host, port) = config::parse_broker_uri(&config.broker_uri)
        .with_context(|| format!("bad broker URI {:?}", config.broker_uri))?;
    info!("connecting to MQTT broker {}:{}", host, port);

    let routes = routes(&config);

    let mut options = MqttOptions::new(
        format!("mqtt-lifx-bridge-{}", std::process::id()),
        host,
        port,
    );
    options.set_keep_alive(Duration::from_secs(30));
    // Room for a full round of subscriptions without the request queue filling up.
    let (client, connection) = Client::new(options, routes.len() + 10);

    let bulbs: Registry = Arc::new(Mutex::new(HashMap::new()));

    let discovery_registry = bulbs.clone();
    thread::spawn(move || loop {
        refresh_registry(&discovery_registry);
        thread::sleep(DISCOVER_INTERVAL);
    });

    let publisher = client.clone();
    let publisher_config = config.clone();
    let publisher_registry = bulbs.clone();
    thread::spawn(move || loop {
        thread::sleep(PUBLISH_INTERVAL);
        publish_all_states(&publisher, &publisher_config, &publisher_registry);
    });

    listen(connection, client, &config, &routes, &bulbs);
    Ok(())
}

/// Maps every configured topic back to its bulb label and channel.
fn routes(config: &Config) -> HashMap<String, (String, Channel)> {
    let mut routes = HashMap::new();
    for (label, topics) in &config.bulbs_by_label {
        for (topic, channel) in [
            (&topics.power, Channel::Power),
            (&topics.hue, Channel::Hue),
            (&topics.saturation, Channel::Saturation),
            (&topics.brightness, Channel::Brightness),
            (&topics.kelvin, Channel::Kelvin),
        ] {
            routes.insert(topic.clone(), (label.clone(), channel));
        }
    }
    routes
}

fn listen(
    mut connection: Connection,
    client: Client,
    config: &Config,
    routes: &HashMap<String, (String, Channel)>,
    bulbs: &Registry,
) {
    for event in connection.iter() {
        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("connected to MQTT broker {}", config.broker_uri);
                // (Re-)subscribe on every connection, so reconnects recover cleanly.
                for topic in routes.keys() {
                    if let Err(e) = client.subscribe(topic.as_str(), QoS::AtLeastOnce) {
                        warn!("failed to subscribe to {}: {}", topic, e);
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let payload = String::from_utf8_lossy(&publish.payload);
                handle_message(&client, config, routes, bulbs, &publish.topic, payload.trim());
            }
            Ok(_) => {}
            Err(e) => {
                warn!("disconnected from MQTT broker: {}", e);
                thread::sleep(Duration::from_secs(1));
            }
        }
    }
}

fn handle_message(
    client: &Client,
    config: &Config,
    routes: &HashMap<String, (String, Channel)>,
    bulbs: &Registry,
    topic: &str,
    payload: &str,
) {
    let Some((label, channel)) = routes.get(topic) else {
        return;
    };
    let Some(bulb) = bulbs.lock().unwrap().get(label).cloned() else {
        warn!("{}: could not find bulb handle", label);
        return;
    };

    if let Err(err) = actuate(&*bulb, *channel, payload) {
        // If the input was an invalid color, correct the bus: republish what the bulb
        // actually shows.
        if matches!(
            err.downcast_ref::<Error>(),
            Some(Error::InvalidColor(_))
        ) {
            if let Some(topics) = config.bulbs_by_label.get(label) {
                match bulb.state(BULB_TIMEOUT) {
                    Ok(state) => publish_state(client, topics, &state),
                    Err(e) => warn!("{}: failed to read bulb state: {}", label, e),
                }
            }
            return;
        }
        warn!("{}: {:#}", label, err);
    }
}

fn actuate(bulb: &UdpBulb, channel: Channel, payload: &str) -> anyhow::Result<()> {
    if channel == Channel::Power {
        let power: Power = payload.parse().map_err(anyhow::Error::msg)?;
        bulb.set_power(power, POWER_TRANSITION, HANDLER_TIMEOUT)?;
        return Ok(());
    }

    let value = parse_number(payload)
        .with_context(|| format!("{} must be a number, found {:?}", channel.name(), payload))?;

    let mut color = bulb
        .state(HANDLER_TIMEOUT)
        .context("failed to get bulb state")?
        .color;
    match channel {
        Channel::Hue => color.hue = value,
        Channel::Saturation => color.saturation = value,
        Channel::Brightness => color.brightness = value,
        Channel::Kelvin => color.kelvin = value,
        Channel::Power => unreachable!(),
    }
    bulb.set_color(color, COLOR_TRANSITION, HANDLER_TIMEOUT)?;
    Ok(())
}

/// Topic payloads are numbers in whatever notation the publisher liked; floats truncate.
fn parse_number(raw: &str) -> anyhow::Result<i32> {
    let float: f64 = raw.parse()?;
    Ok(float as i32)
}

/// One discovery pass: find bulbs, learn their labels, refresh the registry.
fn refresh_registry(bulbs: &Registry) {
    info!("discovering lifx bulbs");
    let found: Vec<UdpBulb> = match discover(DISCOVER_TIMEOUT) {
        Ok(found) => found.collect(),
        Err(e) => {
            warn!("failed to discover bulbs: {}", e);
            return;
        }
    };
    if found.is_empty() {
        info!("found no bulbs");
        return;
    }

    for bulb in found {
        let bulb = Arc::new(bulb);
        match bulb.state(BULB_TIMEOUT) {
            Ok(state) => {
                info!("found bulb: {}", state.label);
                bulbs.lock().unwrap().insert(state.label, bulb);
            }
            Err(e) => warn!("failed to read bulb state during discovery: {}", e),
        }
    }
}

fn publish_all_states(client: &Client, config: &Config, bulbs: &Registry) {
    for (label, topics) in &config.bulbs_by_label {
        let Some(bulb) = bulbs.lock().unwrap().get(label).cloned() else {
            continue;
        };
        match bulb.state(BULB_TIMEOUT) {
            Ok(state) => publish_state(client, topics, &state),
            Err(e) => warn!("{}: failed to read bulb state: {}", label, e),
        }
    }
}

fn publish_state(client: &Client, topics: &Topics, state: &State) {
    publish(client, &topics.power, state.power.to_string());
    publish(client, &topics.hue, state.color.hue.to_string());
    publish(client, &topics.saturation, state.color.saturation.to_string());
    publish(client, &topics.brightness, state.color.brightness.to_string());
    publish(client, &topics.kelvin, state.color.kelvin.to_string());
}

fn publish(client: &Client, topic: &str, payload: String) {
    if let Err(e) = client.publish(topic, QoS::AtLeastOnce, true, payload) {
        warn!("failed to publish to {}: {}", topic, e);
    }
}
