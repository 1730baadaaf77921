use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorStatus {
    Active,
    Inactive,
}

impl SensorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorStatus::Active => "active",
            SensorStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for SensorStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorStatus {
    type Err = std::string::String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(SensorStatus::Active),
            "inactive" => Ok(SensorStatus::Inactive),
            other => Err(format!("Unknown sensor status: {}", other)),
        }
    }
}

/// A registered field sensor. `sensor_id` is assigned by the device itself
/// and never changes once the row exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub sensor_id: std::string::String,
    pub location: std::string::String,
    #[serde(rename = "type")]
    pub sensor_type: std::string::String,
    pub calibration_min: f64,
    pub calibration_max: f64,
    pub status: SensorStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sensor {
    pub fn provisioned(sensor_id: &str, defaults: &SensorDefaults, now: DateTime<Utc>) -> Self {
        Sensor {
            sensor_id: sensor_id.to_owned(),
            location: defaults.location.clone(),
            sensor_type: defaults.sensor_type.clone(),
            calibration_min: defaults.calibration_min,
            calibration_max: defaults.calibration_max,
            status: defaults.status,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Attributes given to a sensor that shows up on the broker before anybody
/// registered it by hand.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorDefaults {
    pub location: std::string::String,
    pub sensor_type: std::string::String,
    pub calibration_min: f64,
    pub calibration_max: f64,
    pub status: SensorStatus,
}

impl std::default::Default for SensorDefaults {
    fn default() -> Self {
        SensorDefaults {
            location: "Unassigned Field".to_owned(),
            sensor_type: "Soil Moisture".to_owned(),
            calibration_min: 0.0,
            calibration_max: 0.0,
            status: SensorStatus::Active,
        }
    }
}

/// A persisted moisture reading. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: i64,
    pub sensor_id: std::string::String,
    pub moisture_value: f64,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// A reading that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    pub sensor_id: std::string::String,
    pub moisture_value: f64,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub timestamp: DateTime<Utc>,
}
