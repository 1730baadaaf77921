use crate::error::{AuthCheck, IngestError};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use tracing::{info, warn};


/// Namespaces whose sensors may always write.
pub const ACCEPTED_PREFIXES: [&str; 3] = ["ESP32_", "SENSOR_", "AGRI_"];

type SeedFn = Box<dyn Fn() -> Vec<String> + Send + Sync>;

/// Decides which claimed sensor identities may write data.
///
/// The broker may be public, so the sensor id in a topic is untrusted and
/// this is the only gate in front of the database. The explicit allow-list
/// is shared between ingestion and the admin api and every check reads the
/// current state.
pub struct SensorAuthorizer {
    allowed: RwLock<BTreeSet<String>>,
    seed: SeedFn,
    allowlist_bypasses_prefix: bool,
}

impl SensorAuthorizer {
    /// `seed` is called now and on every [`SensorAuthorizer::reload`].
    pub fn new<F>(seed: F, allowlist_bypasses_prefix: bool) -> Self
    where
        F: Fn() -> Vec<String> + Send + Sync + 'static,
    {
        let allowed = normalize(seed());
        SensorAuthorizer {
            allowed: RwLock::new(allowed),
            seed: Box::new(seed),
            allowlist_bypasses_prefix,
        }
    }

    pub fn has_accepted_prefix(sensor_id: &str) -> bool {
        ACCEPTED_PREFIXES
            .iter()
            .any(|prefix| sensor_id.starts_with(prefix))
    }

    pub fn is_allowed(&self, sensor_id: &str) -> bool {
        Self::has_accepted_prefix(sensor_id) || self.allowed.read().contains(sensor_id)
    }

    /// Gate applied to the topic before the payload is even parsed.
    ///
    /// Unless configured otherwise this is prefix-only, so allow-listed ids
    /// outside the accepted namespaces never reach the handlers.
    pub fn check_topic(&self, sensor_id: &str) -> Result<(), IngestError> {
        let passed = if self.allowlist_bypasses_prefix {
            self.is_allowed(sensor_id)
        } else {
            Self::has_accepted_prefix(sensor_id)
        };
        Self::verdict(passed, sensor_id, AuthCheck::TopicPrefix)
    }

    /// Gate applied by each handler.
    pub fn check_sensor(&self, sensor_id: &str) -> Result<(), IngestError> {
        Self::verdict(self.is_allowed(sensor_id), sensor_id, AuthCheck::AllowList)
    }

    /// Returns false if the id was already listed.
    pub fn add_allowed(&self, sensor_id: &str) -> bool {
        let sensor_id = sensor_id.trim();
        if sensor_id.is_empty() {
            return false;
        }
        let inserted = self.allowed.write().insert(sensor_id.to_owned());
        if inserted {
            info!(sensor_id, "Added sensor to allow-list");
        }
        if !Self::has_accepted_prefix(sensor_id) && !self.allowlist_bypasses_prefix {
            warn!(
                sensor_id,
                "Sensor has no accepted prefix, its topics are still rejected before the allow-list is consulted"
            );
        }
        inserted
    }

    /// Returns false if the id was not listed.
    pub fn remove_allowed(&self, sensor_id: &str) -> bool {
        let sensor_id = sensor_id.trim();
        let removed = self.allowed.write().remove(sensor_id);
        if removed {
            info!(sensor_id, "Removed sensor from allow-list");
        }
        removed
    }

    /// Sorted snapshot of the explicit allow-list.
    pub fn list_allowed(&self) -> Vec<String> {
        self.allowed.read().iter().cloned().collect()
    }

    /// Re-seeds the allow-list, dropping runtime additions.
    pub fn reload(&self) -> usize {
        let allowed = normalize((self.seed)());
        let count = allowed.len();
        *self.allowed.write() = allowed;
        info!(count, "Reloaded sensor allow-list");
        count
    }

    fn verdict(passed: bool, sensor_id: &str, check: AuthCheck) -> Result<(), IngestError> {
        if passed {
            Ok(())
        } else {
            Err(IngestError::UnauthorizedSensor {
                sensor_id: sensor_id.to_owned(),
                check,
            })
        }
    }
}

fn normalize(ids: Vec<String>) -> BTreeSet<String> {
    ids.into_iter()
        .map(|id| id.trim().to_owned())
        .filter(|id| !id.is_empty())
        .collect()
}
