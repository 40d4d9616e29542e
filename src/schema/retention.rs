//! Retention tiers
//!
//! Records age through hot, warm, cold, and archive volumes. Tier
//! boundaries only ever relocate data; nothing is deleted at a boundary.

use serde::{Deserialize, Serialize};

/// Storage class a record lives on, chosen by age
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageTier {
    Hot,
    Warm,
    Cold,
    Archive,
}

impl StorageTier {
    /// Volume name in the engine's tiered storage policy
    pub fn volume(&self) -> &'static str {
        match self {
            StorageTier::Hot => "hot",
            StorageTier::Warm => "warm",
            StorageTier::Cold => "cold",
            StorageTier::Archive => "archive",
        }
    }
}

impl std::fmt::Display for StorageTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.volume())
    }
}

/// Age thresholds (days since event timestamp) for moving to each tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub warm_after_days: u32,
    pub cold_after_days: u32,
    pub archive_after_days: u32,
}

impl RetentionPolicy {
    /// Sensor readings and their rollups
    pub const SENSOR: RetentionPolicy = RetentionPolicy {
        warm_after_days: 90,
        cold_after_days: 365,
        archive_after_days: 2555,
    };

    /// Quality measurements share the sensor thresholds
    pub const QUALITY: RetentionPolicy = RetentionPolicy::SENSOR;

    /// Production events are low volume and kept hot for longer audits
    pub const EVENTS: RetentionPolicy = RetentionPolicy {
        warm_after_days: 180,
        cold_after_days: 730,
        archive_after_days: 2555,
    };

    /// Tier for a record of the given age. A record is never "absent".
    pub fn tier_for_age(&self, age_days: u32) -> StorageTier {
        if age_days >= self.archive_after_days {
            StorageTier::Archive
        } else if age_days >= self.cold_after_days {
            StorageTier::Cold
        } else if age_days >= self.warm_after_days {
            StorageTier::Warm
        } else {
            StorageTier::Hot
        }
    }

    /// Move-only TTL clause for `ts_expr`.
    pub fn ttl_clause(&self, ts_expr: &str) -> String {
        [
            (self.warm_after_days, StorageTier::Warm),
            (self.cold_after_days, StorageTier::Cold),
            (self.archive_after_days, StorageTier::Archive),
        ]
        .iter()
        .map(|(days, tier)| {
            format!(
                "{} + INTERVAL {} DAY TO VOLUME '{}'",
                ts_expr,
                days,
                tier.volume()
            )
        })
        .collect::<Vec<_>>()
        .join(",\n    ")
    }
}
