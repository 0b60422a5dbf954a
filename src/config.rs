//! JSON configuration for the bridge.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

/// The five topics of one bulb.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Topics {
    pub power: String,
    pub hue: String,
    pub saturation: String,
    pub brightness: String,
    pub kelvin: String,
}

/// Parsed bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub broker_uri: String,
    pub bulbs_by_label: HashMap<String, Topics>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(rename = "mqttBroker")]
    mqtt_broker: String,
    bulbs: HashMap<String, RawBulb>,
}

#[derive(Debug, Deserialize)]
struct RawBulb {
    /// Bulb label; defaults to the map key.
    #[serde(default)]
    label: String,
    topics: Topics,
}

pub fn parse_file(path: &Path) -> anyhow::Result<Config> {
    let src =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse(&src).with_context(|| format!("failed to parse {}", path.display()))
}

fn parse(src: &str) -> anyhow::Result<Config> {
    let raw: RawConfig = serde_json::from_str(src)?;

    let mut bulbs_by_label = HashMap::new();
    for (key, bulb) in raw.bulbs {
        let label = if bulb.label.is_empty() {
            key
        } else {
            bulb.label
        };
        bulbs_by_label.insert(label, bulb.topics);
    }

    Ok(Config {
        broker_uri: raw.mqtt_broker,
        bulbs_by_label,
    })
}

/// Splits a broker URI into host and port.
///
/// `mqtt://` and `tcp://` schemes are accepted and stripped; a missing port defaults to
/// 1883.
pub fn parse_broker_uri(uri: &str) -> anyhow::Result<(String, u16)> {
    let uri = uri
        .strip_prefix("mqtt://")
        .or_else(|| uri.strip_prefix("tcp://"))
        .unwrap_or(uri);

    if let Some((host, port)) = uri.rsplit_once(':') {
        let port = port
            .parse()
            .with_context(|| format!("invalid port {:?}", port))?;
        Ok((host.to_string(), port))
    } else {
        Ok((uri.to_string(), 1883))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_config() {
        let config = parse(
            r#"{
                "mqttBroker": "mqtt://broker.local:1883",
                "bulbs": {
                    "kitchen": {
                        "label": "Kitchen",
                        "topics": {
                            "power": "home/kitchen/light/power",
                            "hue": "home/kitchen/light/hue",
                            "saturation": "home/kitchen/light/saturation",
                            "brightness": "home/kitchen/light/brightness",
                            "kelvin": "home/kitchen/light/kelvin"
                        }
                    }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.broker_uri, "mqtt://broker.local:1883");
        let topics = &config.bulbs_by_label["Kitchen"];
        assert_eq!(topics.power, "home/kitchen/light/power");
        assert_eq!(topics.kelvin, "home/kitchen/light/kelvin");
    }

    #[test]
    fn label_defaults_to_the_map_key() {
        let config = parse(
            r#"{
                "mqttBroker": "broker.local",
                "bulbs": {
                    "bedside": {
                        "topics": {
                            "power": "p", "hue": "h", "saturation": "s",
                            "brightness": "b", "kelvin": "k"
                        }
                    }
                }
            }"#,
        )
        .unwrap();
        assert!(config.bulbs_by_label.contains_key("bedside"));
    }

    #[test]
    fn missing_topics_are_an_error() {
        assert!(parse(r#"{"mqttBroker": "b", "bulbs": {"x": {"topics": {"power": "p"}}}}"#).is_err());
    }

    #[test]
    fn broker_uri_with_port() {
        let (host, port) = parse_broker_uri("mqtt://192.168.1.50:1883").unwrap();
        assert_eq!(host, "192.168.1.50");
        assert_eq!(port, 1883);
    }

    #[test]
    fn broker_uri_default_port() {
        let (host, port) = parse_broker_uri("192.168.1.50").unwrap();
        assert_eq!(host, "192.168.1.50");
        assert_eq!(port, 1883);
    }

    #[test]
    fn broker_uri_tcp_scheme() {
        let (host, port) = parse_broker_uri("tcp://broker.local:8883").unwrap();
        assert_eq!(host, "broker.local");
        assert_eq!(port, 8883);
    }

    #[test]
    fn broker_uri_bad_port() {
        assert!(parse_broker_uri("broker.local:lifx").is_err());
    }
}
