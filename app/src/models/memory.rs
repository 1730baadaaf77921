use super::PersistenceGateway;
use crate::config::DEFAULT_MEMORY_MAX_READINGS;
use crate::error::DBError;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use soilsense_core::{NewReading, Reading, Sensor, SensorDefaults};
use std::collections::{HashMap, VecDeque};

/// Volatile [`PersistenceGateway`] with the same foreign-key rules as the
/// database. Used when no database is configured.
///
/// Keeps at most `max_readings` readings, evicting the oldest first. Ids keep
/// counting across evictions.
pub struct MemoryGateway {
    inner: Mutex<MemoryStore>,
}

struct MemoryStore {
    sensors: HashMap<String, Sensor>,
    readings: VecDeque<Reading>,
    max_readings: usize,
    last_id: i64,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::with_max_readings(DEFAULT_MEMORY_MAX_READINGS)
    }
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_readings(max_readings: usize) -> Self {
        MemoryGateway {
            inner: Mutex::new(MemoryStore {
                sensors: HashMap::new(),
                readings: VecDeque::new(),
                max_readings: max_readings.max(1),
                last_id: 0,
            }),
        }
    }

    pub fn sensor_count(&self) -> usize {
        self.inner.lock().sensors.len()
    }

    pub fn reading_count(&self) -> usize {
        self.inner.lock().readings.len()
    }

    #[cfg(test)]
    pub fn sensor(&self, sensor_id: &str) -> Option<Sensor> {
        self.inner.lock().sensors.get(sensor_id).cloned()
    }

    #[cfg(test)]
    pub fn readings(&self) -> Vec<Reading> {
        self.inner.lock().readings.iter().cloned().collect()
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn sensor_exists(&self, sensor_id: &str) -> Result<bool, DBError> {
        Ok(self.inner.lock().sensors.contains_key(sensor_id))
    }

    async fn create_sensor(
        &self,
        sensor_id: &str,
        defaults: &SensorDefaults,
    ) -> Result<(), DBError> {
        self.inner
            .lock()
            .sensors
            .entry(sensor_id.to_owned())
            .or_insert_with(|| Sensor::provisioned(sensor_id, defaults, Utc::now()));
        Ok(())
    }

    async fn insert_reading(&self, reading: &NewReading) -> Result<(), DBError> {
        let mut store = self.inner.lock();
        if !store.sensors.contains_key(&reading.sensor_id) {
            return Err(DBError::ForeignKey(reading.sensor_id.clone()));
        }
        if store.readings.len() >= store.max_readings {
            store.readings.pop_front();
        }
        store.last_id += 1;
        let id = store.last_id;
        store.readings.push_back(Reading {
            id,
            sensor_id: reading.sensor_id.clone(),
            moisture_value: reading.moisture_value,
            temperature: reading.temperature,
            humidity: reading.humidity,
            timestamp: reading.timestamp,
        });
        Ok(())
    }
}
