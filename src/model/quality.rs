//! Quality inspection measurements

use super::require_non_empty;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Inspection outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityVerdict {
    Pass,
    Fail,
    Review,
}

impl QualityVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityVerdict::Pass => "PASS",
            QualityVerdict::Fail => "FAIL",
            QualityVerdict::Review => "REVIEW",
        }
    }
}

/// One quality measurement. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMeasurement {
    /// Unique id; generated at ingestion when blank
    #[serde(default)]
    pub measurement_id: String,
    pub facility_id: u32,
    pub production_line: String,
    pub batch_id: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub measurement_type: String,
    pub measured_value: f64,
    pub target_value: f64,
    pub upper_tolerance: f64,
    pub lower_tolerance: f64,
    pub verdict: QualityVerdict,
    #[serde(default)]
    pub inspector_id: String,
    #[serde(default)]
    pub equipment_id: String,
    #[serde(default)]
    pub environmental_conditions: BTreeMap<String, f64>,
    #[serde(default)]
    pub process_parameters: BTreeMap<String, f64>,
    #[serde(default)]
    pub supplier_id: String,
    #[serde(default)]
    pub material_lot: String,
}

impl QualityMeasurement {
    pub fn validate(&self) -> Result<()> {
        require_non_empty("production_line", &self.production_line)?;
        require_non_empty("batch_id", &self.batch_id)?;
        require_non_empty("measurement_type", &self.measurement_type)?;
        if self.lower_tolerance > self.upper_tolerance {
            return Err(Error::InvalidInput(format!(
                "measurement {} lower tolerance {} exceeds upper tolerance {}",
                self.measurement_id, self.lower_tolerance, self.upper_tolerance
            )));
        }
        if !self.measured_value.is_finite() {
            return Err(Error::InvalidInput("measured value must be finite".to_string()));
        }
        Ok(())
    }

    /// Whether the measured value lies inside the tolerance band.
    pub fn within_tolerance(&self) -> bool {
        self.measured_value >= self.lower_tolerance && self.measured_value <= self.upper_tolerance
    }

    /// Assign an id if blank and trim traceability fields.
    pub fn normalize(&mut self) {
        if self.measurement_id.trim().is_empty() {
            self.measurement_id = uuid::Uuid::new_v4().to_string();
        }
        for field in [
            &mut self.inspector_id,
            &mut self.equipment_id,
            &mut self.supplier_id,
            &mut self.material_lot,
        ] {
            *field = field.trim().to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measurement() -> QualityMeasurement {
        QualityMeasurement {
            measurement_id: String::new(),
            facility_id: 3,
            production_line: "line-b".into(),
            batch_id: "B-100".into(),
            timestamp: 10,
            measurement_type: "diameter".into(),
            measured_value: 10.02,
            target_value: 10.0,
            upper_tolerance: 10.05,
            lower_tolerance: 9.95,
            verdict: QualityVerdict::Pass,
            inspector_id: String::new(),
            equipment_id: " cmm-2 ".into(),
            environmental_conditions: BTreeMap::from([("humidity".to_string(), 40.0)]),
            process_parameters: BTreeMap::new(),
            supplier_id: String::new(),
            material_lot: String::new(),
        }
    }

    #[test]
    fn test_normalize_assigns_id() {
        let mut m = measurement();
        m.normalize();
        assert!(!m.measurement_id.is_empty());
        assert_eq!(m.equipment_id, "cmm-2");
    }

    #[test]
    fn test_tolerance_checks() {
        let mut m = measurement();
        assert!(m.within_tolerance());
        m.measured_value = 10.2;
        assert!(!m.within_tolerance());
        m.lower_tolerance = 11.0;
        assert!(m.validate().is_err());
    }
}
