//! Production line events

use super::require_non_empty;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Start,
    Stop,
    Pause,
    Alarm,
    Maintenance,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Start => "START",
            EventType::Stop => "STOP",
            EventType::Pause => "PAUSE",
            EventType::Alarm => "ALARM",
            EventType::Maintenance => "MAINTENANCE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl EventSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSeverity::Info => "INFO",
            EventSeverity::Warning => "WARNING",
            EventSeverity::Error => "ERROR",
            EventSeverity::Critical => "CRITICAL",
        }
    }
}

/// Resolution of an event. The only mutable part of a production event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventResolution {
    /// Epoch milliseconds
    pub resolved_at: i64,
    pub resolved_by: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionEvent {
    /// Unique id; generated at ingestion when blank
    #[serde(default)]
    pub event_id: String,
    pub facility_id: u32,
    pub production_line: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub event_type: EventType,
    pub category: String,
    pub severity: EventSeverity,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub operator_id: String,
    #[serde(default)]
    pub equipment_id: String,
    /// Seconds; present for start/stop pairs
    #[serde(default)]
    pub duration_seconds: Option<u64>,
    #[serde(default)]
    pub resolution: Option<EventResolution>,
}

impl ProductionEvent {
    pub fn validate(&self) -> Result<()> {
        require_non_empty("production_line", &self.production_line)?;
        require_non_empty("category", &self.category)?;
        if let Some(resolution) = &self.resolution {
            if resolution.resolved_at < self.timestamp {
                return Err(Error::InvalidInput(format!(
                    "event {} resolved before it occurred",
                    self.event_id
                )));
            }
        }
        Ok(())
    }

    pub fn normalize(&mut self) {
        if self.event_id.trim().is_empty() {
            self.event_id = uuid::Uuid::new_v4().to_string();
        }
        self.description = self.description.trim().to_string();
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// Record a resolution. Fails if the resolution predates the event.
    pub fn resolve(&mut self, resolution: EventResolution) -> Result<()> {
        if resolution.resolved_at < self.timestamp {
            return Err(Error::InvalidInput(format!(
                "event {} resolved before it occurred",
                self.event_id
            )));
        }
        self.resolution = Some(resolution);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alarm() -> ProductionEvent {
        ProductionEvent {
            event_id: String::new(),
            facility_id: 1,
            production_line: "line-a".into(),
            timestamp: 1_000,
            event_type: EventType::Alarm,
            category: "overheat".into(),
            severity: EventSeverity::Critical,
            description: " spindle temp high ".into(),
            operator_id: String::new(),
            equipment_id: "spindle-4".into(),
            duration_seconds: None,
            resolution: None,
        }
    }

    #[test]
    fn test_resolve_only_after_event() {
        let mut e = alarm();
        let early = EventResolution {
            resolved_at: 500,
            resolved_by: "ops".into(),
            notes: String::new(),
        };
        assert!(e.resolve(early).is_err());
        assert!(!e.is_resolved());

        let ok = EventResolution {
            resolved_at: 2_000,
            resolved_by: "ops".into(),
            notes: "coolant refilled".into(),
        };
        e.resolve(ok).unwrap();
        assert!(e.is_resolved());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(EventSeverity::Critical > EventSeverity::Warning);
    }

    #[test]
    fn test_normalize_assigns_id() {
        let mut e = alarm();
        e.normalize();
        assert!(!e.event_id.is_empty());
        assert_eq!(e.description, "spindle temp high");
    }
}
