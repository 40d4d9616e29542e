//! Sensor readings

use super::require_non_empty;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Kind of physical sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorType {
    Temperature,
    Pressure,
    Flow,
    Vibration,
    Current,
}

impl SensorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorType::Temperature => "temperature",
            SensorType::Pressure => "pressure",
            SensorType::Flow => "flow",
            SensorType::Vibration => "vibration",
            SensorType::Current => "current",
        }
    }
}

impl std::str::FromStr for SensorType {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "temperature" => Ok(Self::Temperature),
            "pressure" => Ok(Self::Pressure),
            "flow" => Ok(Self::Flow),
            "vibration" => Ok(Self::Vibration),
            "current" => Ok(Self::Current),
            other => Err(Error::InvalidInput(format!("unknown sensor type '{}'", other))),
        }
    }
}

/// Operational status reported alongside a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadingStatus {
    #[default]
    Ok,
    Warning,
    Error,
    Maintenance,
}

impl ReadingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingStatus::Ok => "OK",
            ReadingStatus::Warning => "WARNING",
            ReadingStatus::Error => "ERROR",
            ReadingStatus::Maintenance => "MAINTENANCE",
        }
    }
}

impl std::str::FromStr for ReadingStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "OK" => Ok(Self::Ok),
            "WARNING" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            "MAINTENANCE" => Ok(Self::Maintenance),
            other => Err(Error::InvalidInput(format!("unknown reading status '{}'", other))),
        }
    }
}

fn default_quality_score() -> f64 {
    1.0
}

/// A single sensor measurement. Append-only once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub facility_id: u32,
    pub production_line: String,
    pub sensor_id: String,
    pub sensor_type: SensorType,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub value: f64,
    pub unit: String,
    #[serde(default = "default_quality_score")]
    pub quality_score: f64,
    #[serde(default)]
    pub status: ReadingStatus,
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub operator_id: Option<String>,
    #[serde(default)]
    pub shift_id: Option<String>,
}

impl SensorReading {
    /// Reading with default quality, status, and no optional ids.
    pub fn new(
        facility_id: u32,
        production_line: impl Into<String>,
        sensor_id: impl Into<String>,
        sensor_type: SensorType,
        timestamp: i64,
        value: f64,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            facility_id,
            production_line: production_line.into(),
            sensor_id: sensor_id.into(),
            sensor_type,
            timestamp,
            value,
            unit: unit.into(),
            quality_score: default_quality_score(),
            status: ReadingStatus::Ok,
            batch_id: None,
            operator_id: None,
            shift_id: None,
        }
    }

    pub fn with_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        require_non_empty("production_line", &self.production_line)?;
        require_non_empty("sensor_id", &self.sensor_id)?;
        if !self.value.is_finite() {
            return Err(Error::InvalidInput(format!(
                "sensor {} value must be finite",
                self.sensor_id
            )));
        }
        if !(0.0..=1.0).contains(&self.quality_score) {
            return Err(Error::InvalidInput(format!(
                "sensor {} quality score {} outside [0, 1]",
                self.sensor_id, self.quality_score
            )));
        }
        Ok(())
    }

    /// Replace absent optional ids with empty-string sentinels.
    pub fn normalize(&mut self) {
        for field in [&mut self.batch_id, &mut self.operator_id, &mut self.shift_id] {
            let trimmed = field.as_deref().map(str::trim).unwrap_or("").to_string();
            *field = Some(trimmed);
        }
        self.unit = self.unit.trim().to_string();
    }

    pub fn batch_id_str(&self) -> &str {
        self.batch_id.as_deref().unwrap_or("")
    }

    pub fn operator_id_str(&self) -> &str {
        self.operator_id.as_deref().unwrap_or("")
    }

    pub fn shift_id_str(&self) -> &str {
        self.shift_id.as_deref().unwrap_or("")
    }
}
