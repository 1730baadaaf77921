use crate::error::MQTTError;
use rumqttc::{MqttOptions, Transport};
use url::{Host, Url};

/// Shared brokers anybody can publish to without credentials.
pub const PUBLIC_BROKERS: [&str; 5] = [
    "test.mosquitto.org",
    "broker.hivemq.com",
    "broker.emqx.io",
    "mqtt.eclipseprojects.io",
    "public.mqtthq.com",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerScheme {
    Tcp,
    Tls,
    Ws,
    Wss,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub scheme: BrokerScheme,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl BrokerAddress {
    /// Parses `scheme://host[:port][/path]`; a missing scheme means plain tcp.
    pub fn parse(url: &str) -> Result<Self, MQTTError> {
        let url = url.trim();
        let parsed = if url.contains("://") {
            Url::parse(url)
        } else {
            Url::parse(&format!("mqtt://{}", url))
        }
        .map_err(|e| MQTTError::Url(format!("invalid broker url {}: {}", url, e)))?;

        let (scheme, default_port) = match parsed.scheme() {
            "mqtt" | "tcp" => (BrokerScheme::Tcp, 1883),
            "mqtts" | "ssl" | "tls" => (BrokerScheme::Tls, 8883),
            "ws" => (BrokerScheme::Ws, 80),
            "wss" => (BrokerScheme::Wss, 443),
            other => return Err(MQTTError::Url(format!("unsupported scheme {} in {}", other, url))),
        };
        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(MQTTError::Url(
                "credentials belong in MQTT_USERNAME/MQTT_PASSWORD".to_owned(),
            ));
        }

        let host = match parsed.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_owned(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(MQTTError::Url(format!("missing host in {}", url))),
        };

        let path = match (scheme, parsed.path()) {
            (BrokerScheme::Ws | BrokerScheme::Wss, "" | "/") => "/mqtt".to_owned(),
            (_, path) => path.to_owned(),
        };

        Ok(BrokerAddress {
            scheme,
            host,
            port: parsed.port().unwrap_or(default_port),
            path,
        })
    }

    pub fn is_public(&self) -> bool {
        PUBLIC_BROKERS
            .iter()
            .any(|public| self.host.eq_ignore_ascii_case(public))
    }

    pub fn mqtt_options(&self, client_id: &str) -> MqttOptions {
        match self.scheme {
            BrokerScheme::Tcp => MqttOptions::new(client_id, &self.host, self.port),
            BrokerScheme::Tls => {
                let mut options = MqttOptions::new(client_id, &self.host, self.port);
                options.set_transport(Transport::tls_with_default_config());
                options
            }
            // websocket transports take the whole url as address
            BrokerScheme::Ws => {
                let mut options = MqttOptions::new(client_id, self.to_string(), self.port);
                options.set_transport(Transport::Ws);
                options
            }
            BrokerScheme::Wss => {
                let mut options = MqttOptions::new(client_id, self.to_string(), self.port);
                options.set_transport(Transport::wss_with_default_config());
                options
            }
        }
    }
}

impl std::fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = match self.scheme {
            BrokerScheme::Tcp => "mqtt",
            BrokerScheme::Tls => "mqtts",
            BrokerScheme::Ws => "ws",
            BrokerScheme::Wss => "wss",
        };
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}{}", scheme, self.host, self.port, self.path)
        } else {
            write!(f, "{}://{}:{}{}", scheme, self.host, self.port, self.path)
        }
    }
}
