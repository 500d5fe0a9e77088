//! Pure MQTT session configuration
//!
//! Turns [`SessionOptions`] into rumqttc [`MqttOptions`]: broker URL parsing,
//! TLS for `mqtts://`, credentials, keep-alive and the last will.

use crate::transport::{SessionOptions, TransportError};
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use url::Url;

/// Plain MQTT port
pub const DEFAULT_PORT: u16 = 1883;
/// MQTT over TLS port
pub const DEFAULT_TLS_PORT: u16 = 8883;

/// Largest packet accepted from the broker
const MAX_PACKET_SIZE: u32 = 256 * 1024;

/// Host and port parsed out of a broker URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Parse `mqtt://host[:port]` or `mqtts://host[:port]`
pub fn parse_broker_url(broker_url: &str) -> Result<BrokerAddress, TransportError> {
    let url =
        Url::parse(broker_url).map_err(|_| TransportError::InvalidBrokerUrl(broker_url.into()))?;

    let tls = match url.scheme() {
        "mqtt" | "tcp" => false,
        "mqtts" | "ssl" => true,
        _ => return Err(TransportError::InvalidBrokerUrl(broker_url.into())),
    };

    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| TransportError::InvalidBrokerUrl(broker_url.into()))?;
    let port = url
        .port()
        .unwrap_or(if tls { DEFAULT_TLS_PORT } else { DEFAULT_PORT });

    Ok(BrokerAddress {
        host: host.to_string(),
        port,
        tls,
    })
}

pub fn configure_mqtt_options(options: &SessionOptions) -> Result<MqttOptions, TransportError> {
    let address = parse_broker_url(&options.broker_url)?;
    let mut mqtt_options = MqttOptions::new(&options.client_id, &address.host, address.port);

    if address.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(credentials) = &options.credentials {
        mqtt_options.set_credentials(&credentials.username, &credentials.password);
    }

    mqtt_options.set_keep_alive(options.keep_alive);
    mqtt_options.set_clean_start(true);
    mqtt_options.set_max_packet_size(Some(MAX_PACKET_SIZE));

    let will = &options.last_will;
    mqtt_options.set_last_will(LastWill::new(
        &will.topic,
        will.payload.clone(),
        QoS::AtLeastOnce,
        will.retain,
        None,
    ));

    Ok(mqtt_options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Credentials, LastWill as SessionWill};
    use std::time::Duration;

    fn session(broker_url: &str) -> SessionOptions {
        SessionOptions {
            client_id: "ble2mqtt-test".to_string(),
            broker_url: broker_url.to_string(),
            credentials: None,
            keep_alive: Duration::from_secs(60),
            last_will: SessionWill {
                topic: "ble2mqtt/state/mqtt".to_string(),
                payload: br#"{"state":"offline"}"#.to_vec(),
                retain: true,
            },
        }
    }

    #[test]
    fn test_parse_broker_url_defaults() {
        let plain = parse_broker_url("mqtt://broker.local").unwrap();
        assert_eq!(plain.host, "broker.local");
        assert_eq!(plain.port, DEFAULT_PORT);
        assert!(!plain.tls);

        let tls = parse_broker_url("mqtts://broker.local").unwrap();
        assert_eq!(tls.port, DEFAULT_TLS_PORT);
        assert!(tls.tls);

        let explicit = parse_broker_url("mqtt://10.0.0.2:11883").unwrap();
        assert_eq!(explicit.port, 11883);
    }

    #[test]
    fn test_invalid_broker_url() {
        for url in ["invalid-url", "http://broker.local", "mqtt://"] {
            assert!(
                matches!(
                    parse_broker_url(url),
                    Err(TransportError::InvalidBrokerUrl(_))
                ),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn test_configure_mqtt_options() {
        let mut options = session("mqtt://localhost:1883");
        options.credentials = Some(Credentials {
            username: "bridge".to_string(),
            password: "secret".to_string(),
        });

        let mqtt_options = configure_mqtt_options(&options).unwrap();
        assert_eq!(mqtt_options.client_id(), "ble2mqtt-test");
        assert_eq!(mqtt_options.keep_alive(), Duration::from_secs(60));
        assert_eq!(
            mqtt_options.broker_address(),
            ("localhost".to_string(), 1883)
        );
    }

    #[test]
    fn test_configure_rejects_bad_url() {
        let result = configure_mqtt_options(&session("not a url"));
        assert!(matches!(result, Err(TransportError::InvalidBrokerUrl(_))));
    }
}
