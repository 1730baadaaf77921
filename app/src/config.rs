use crate::error::ConfigError;
use parking_lot::RwLock;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_BROKER_URL: &str = "mqtt://test.mosquitto.org:1883";
pub const DEFAULT_ALLOWED_SENSORS: &str = "SENSOR_01,ESP32_001,ESP32_002,ESP32_TEST";

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_MEMORY_MAX_READINGS: usize = 100_000;

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub struct Config {
    inner: RwLock<InnerConfig>,
    lookup: Lookup,
}

struct InnerConfig {
    broker_url: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    client_prefix: String,
    keep_alive_secs: u64,
    connect_timeout_secs: u64,
    retry_interval_ms: u64,
    legacy_moisture_topic: bool,
    allowed_sensors: Vec<String>,
    allowlist_bypasses_prefix: bool,
    ingest_queue_capacity: usize,
    database_url: Option<String>,
    db_pool_max: u32,
    memory_max_readings: usize,
    bind_addr: SocketAddr,
    log_level: String,
    otel_stdout: bool,
}

/// Connection settings handed to the MQTT client.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub broker_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_prefix: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub retry_interval: Duration,
    pub legacy_moisture_topic: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from `lookup`, which is kept for later reloads.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        let lookup: Lookup = Box::new(lookup);
        let var = |key: &str| read_var(&lookup, key);

        let keep_alive_secs = parse_or(&var, "MQTT_KEEP_ALIVE_SECS", 60)?;
        if keep_alive_secs < 5 {
            return Err(ConfigError::Invalid {
                key: "MQTT_KEEP_ALIVE_SECS",
                value: keep_alive_secs.to_string(),
            });
        }

        let ingest_queue_capacity = parse_or(&var, "INGEST_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?;
        let memory_max_readings =
            parse_or(&var, "MEMORY_MAX_READINGS", DEFAULT_MEMORY_MAX_READINGS)?;
        for (key, value) in [
            ("INGEST_QUEUE_CAPACITY", ingest_queue_capacity),
            ("MEMORY_MAX_READINGS", memory_max_readings),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    value: value.to_string(),
                });
            }
        }

        let inner = InnerConfig {
            broker_url: var("MQTT_BROKER_URL").unwrap_or_else(|| DEFAULT_BROKER_URL.to_owned()),
            mqtt_username: var("MQTT_USERNAME"),
            mqtt_password: var("MQTT_PASSWORD"),
            client_prefix: var("MQTT_CLIENT_PREFIX")
                .unwrap_or_else(|| "agriculture_dashboard".to_owned()),
            keep_alive_secs,
            connect_timeout_secs: parse_or(&var, "MQTT_CONNECT_TIMEOUT_SECS", 30)?,
            retry_interval_ms: parse_or(&var, "MQTT_RETRY_INTERVAL_MS", 5000)?,
            legacy_moisture_topic: flag_or(&var, "MQTT_LEGACY_MOISTURE_TOPIC", true)?,
            allowed_sensors: allowed_sensors_from(&var),
            allowlist_bypasses_prefix: flag_or(&var, "ALLOWLIST_BYPASSES_PREFIX", false)?,
            ingest_queue_capacity,
            database_url: var("DATABASE_URL"),
            db_pool_max: parse_or(&var, "DB_POOL_MAX", 5)?,
            memory_max_readings,
            bind_addr: parse_or(&var, "BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 8081)))?,
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_owned()),
            otel_stdout: flag_or(&var, "OTEL_STDOUT", false)?,
        };

        Ok(Config {
            inner: RwLock::new(inner),
            lookup,
        })
    }

    pub fn mqtt_settings(&self) -> MqttSettings {
        let inner = self.inner.read();
        MqttSettings {
            broker_url: inner.broker_url.clone(),
            username: inner.mqtt_username.clone(),
            password: inner.mqtt_password.clone(),
            client_prefix: inner.client_prefix.clone(),
            keep_alive: Duration::from_secs(inner.keep_alive_secs),
            connect_timeout: Duration::from_secs(inner.connect_timeout_secs),
            retry_interval: Duration::from_millis(inner.retry_interval_ms),
            legacy_moisture_topic: inner.legacy_moisture_topic,
        }
    }

    pub fn allowed_sensors(&self) -> Vec<String> {
        self.inner.read().allowed_sensors.clone()
    }

    /// Re-reads `ALLOWED_SENSORS` from the source the config was built from.
    pub fn reload_allowed_sensors(&self) -> Vec<String> {
        let sensors = allowed_sensors_from(&|key: &str| read_var(&self.lookup, key));
        self.inner.write().allowed_sensors = sensors.clone();
        sensors
    }

    pub fn allowlist_bypasses_prefix(&self) -> bool {
        self.inner.read().allowlist_bypasses_prefix
    }

    pub fn ingest_queue_capacity(&self) -> usize {
        self.inner.read().ingest_queue_capacity
    }

    pub fn memory_max_readings(&self) -> usize {
        self.inner.read().memory_max_readings
    }

    pub fn database_url(&self) -> Option<String> {
        self.inner.read().database_url.clone()
    }

    pub fn db_pool_max(&self) -> u32 {
        self.inner.read().db_pool_max
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.inner.read().bind_addr
    }

    pub fn log_level(&self) -> String {
        self.inner.read().log_level.clone()
    }

    pub fn otel_stdout(&self) -> bool {
        self.inner.read().otel_stdout
    }
}

fn read_var(lookup: &Lookup, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn allowed_sensors_from<F>(var: &F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    split_sensor_list(&var("ALLOWED_SENSORS").unwrap_or_else(|| DEFAULT_ALLOWED_SENSORS.to_owned()))
}

pub fn split_sensor_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_or<T, F>(var: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { key, value }),
    }
}

fn flag_or<F>(var: &F, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        None => Ok(default),
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid { key, value }),
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(move |key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        let mqtt = config.mqtt_settings();

        assert_eq!(DEFAULT_BROKER_URL, mqtt.broker_url);
        assert_eq!(Duration::from_secs(60), mqtt.keep_alive);
        assert_eq!(Duration::from_secs(30), mqtt.connect_timeout);
        assert_eq!(Duration::from_secs(5), mqtt.retry_interval);
        assert!(mqtt.legacy_moisture_topic);
        assert_eq!(
            vec!["SENSOR_01", "ESP32_001", "ESP32_002", "ESP32_TEST"],
            config.allowed_sensors()
        );
        assert!(!config.allowlist_bypasses_prefix());
        assert_eq!(None, config.database_url());
        assert_eq!("127.0.0.1:8081", config.bind_addr().to_string());
        assert_eq!(DEFAULT_QUEUE_CAPACITY, config.ingest_queue_capacity());
        assert_eq!(DEFAULT_MEMORY_MAX_READINGS, config.memory_max_readings());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("MQTT_BROKER_URL", "mqtts://broker.farm.local:8883"),
            ("MQTT_USERNAME", "farm"),
            ("MQTT_RETRY_INTERVAL_MS", "250"),
            ("ALLOWED_SENSORS", " FOO_001 , ,BAR_002"),
            ("ALLOWLIST_BYPASSES_PREFIX", "Yes"),
        ])
        .unwrap();
        let mqtt = config.mqtt_settings();

        assert_eq!("mqtts://broker.farm.local:8883", mqtt.broker_url);
        assert_eq!(Some("farm".to_owned()), mqtt.username);
        assert_eq!(Duration::from_millis(250), mqtt.retry_interval);
        assert_eq!(vec!["FOO_001", "BAR_002"], config.allowed_sensors());
        assert!(config.allowlist_bypasses_prefix());
    }

    #[test]
    fn test_invalid_values() {
        assert!(config_from(&[("MQTT_RETRY_INTERVAL_MS", "soon")]).is_err());
        assert!(config_from(&[("OTEL_STDOUT", "maybe")]).is_err());
        assert!(config_from(&[("MQTT_KEEP_ALIVE_SECS", "2")]).is_err());
        assert!(config_from(&[("BIND_ADDR", "localhost")]).is_err());
        assert!(config_from(&[("INGEST_QUEUE_CAPACITY", "0")]).is_err());
        assert!(config_from(&[("MEMORY_MAX_READINGS", "-5")]).is_err());
    }

    #[test]
    fn test_reload_matches_startup_for_blank_list() {
        let config = config_from(&[("ALLOWED_SENSORS", "  ")]).unwrap();
        let startup = config.allowed_sensors();

        assert_eq!(4, startup.len());
        assert_eq!(startup, config.reload_allowed_sensors());
        assert_eq!(startup, config.allowed_sensors());
    }

    #[test]
    fn test_reload_reads_own_source() {
        let source = Arc::new(Mutex::new("FOO_001".to_owned()));
        let shared = source.clone();
        let config = Config::from_lookup(move |key| {
            (key == "ALLOWED_SENSORS").then(|| shared.lock().clone())
        })
        .unwrap();
        assert_eq!(vec!["FOO_001"], config.allowed_sensors());

        *source.lock() = "BAR_002, BAZ_003".to_owned();
        assert_eq!(vec!["BAR_002", "BAZ_003"], config.reload_allowed_sensors());
        assert_eq!(vec!["BAR_002", "BAZ_003"], config.allowed_sensors());

        *source.lock() = String::new();
        assert_eq!(
            split_sensor_list(DEFAULT_ALLOWED_SENSORS),
            config.reload_allowed_sensors()
        );
    }
}
