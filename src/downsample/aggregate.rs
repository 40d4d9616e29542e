//! Incremental per-bucket aggregates
//!
//! Each bucket keeps count, running mean and M2 (Welford), min, max, and the
//! raw samples for quantiles. Buckets merge with Chan's parallel update so a
//! query can combine the same sensor/bucket across lines and facilities.

use super::{Granularity, QUANTILE_LEVELS};
use crate::engine::RollupPointRow;
use crate::model::{SensorReading, TimeRange};
use std::collections::{BTreeMap, HashSet};

/// Running statistics for one bucket
#[derive(Debug, Clone, PartialEq)]
pub struct BucketAggregate {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
    samples: Vec<f64>,
}

impl BucketAggregate {
    pub fn new() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            samples: Vec::new(),
        }
    }

    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.samples.push(value);
    }

    pub fn merge(&mut self, other: &BucketAggregate) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other.clone();
            return;
        }
        let total = self.count + other.count;
        let delta = other.mean - self.mean;
        self.mean += delta * other.count as f64 / total as f64;
        let weight = self.count as f64 * other.count as f64 / total as f64;
        self.m2 += other.m2 + delta * delta * weight;
        self.count = total;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.samples.extend_from_slice(&other.samples);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn avg(&self) -> f64 {
        self.mean
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    /// Population standard deviation
    pub fn stddev(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        (self.m2 / self.count as f64).max(0.0).sqrt()
    }

    /// Nearest-rank quantile
    pub fn quantile(&self, q: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let rank = (q.clamp(0.0, 1.0) * sorted.len() as f64).ceil() as usize;
        sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
    }

    pub fn quantiles(&self) -> Vec<f64> {
        QUANTILE_LEVELS.iter().map(|q| self.quantile(*q)).collect()
    }
}

impl Default for BucketAggregate {
    fn default() -> Self {
        Self::new()
    }
}

/// Grouping key of a rollup view
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RollupKey {
    pub facility_id: u32,
    pub production_line: String,
    pub sensor_id: String,
    pub bucket: i64,
}

/// One materialized view kept up to date as raw rows arrive
#[derive(Debug, Clone)]
pub struct RollupStore {
    granularity: Granularity,
    buckets: BTreeMap<RollupKey, BucketAggregate>,
}

impl RollupStore {
    pub fn new(granularity: Granularity) -> Self {
        Self {
            granularity,
            buckets: BTreeMap::new(),
        }
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn apply(&mut self, reading: &SensorReading) {
        let key = RollupKey {
            facility_id: reading.facility_id,
            production_line: reading.production_line.clone(),
            sensor_id: reading.sensor_id.clone(),
            bucket: self.granularity.bucket_start(reading.timestamp),
        };
        self.buckets.entry(key).or_default().push(reading.value);
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Buckets overlapping `range` for the given sensors, merged across
    /// facilities and lines, ordered by sensor then bucket.
    pub fn query(&self, sensor_ids: &HashSet<String>, range: TimeRange) -> Vec<RollupPointRow> {
        let first_bucket = self.granularity.bucket_start(range.start);
        let mut merged: BTreeMap<(String, i64), BucketAggregate> = BTreeMap::new();

        for (key, agg) in &self.buckets {
            if key.bucket < first_bucket || key.bucket > range.end {
                continue;
            }
            if !sensor_ids.contains(&key.sensor_id) {
                continue;
            }
            merged
                .entry((key.sensor_id.clone(), key.bucket))
                .or_default()
                .merge(agg);
        }

        merged
            .into_iter()
            .map(|((sensor_id, bucket), agg)| RollupPointRow {
                sensor_id,
                bucket,
                sample_count: agg.count(),
                avg_value: agg.avg(),
                min_value: agg.min(),
                max_value: agg.max(),
                stddev_value: agg.stddev(),
                quantiles: agg.quantiles(),
            })
            .collect()
    }

    /// Total samples across buckets starting inside `range`
    pub fn sample_count(&self, range: TimeRange) -> u64 {
        self.buckets
            .iter()
            .filter(|(key, _)| range.contains(key.bucket))
            .map(|(_, agg)| agg.count())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SensorType;

    #[test]
    fn test_bucket_statistics() {
        let mut agg = BucketAggregate::new();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            agg.push(v);
        }
        assert_eq!(agg.count(), 8);
        assert!((agg.avg() - 5.0).abs() < 1e-9);
        assert!((agg.stddev() - 2.0).abs() < 1e-9);
        assert_eq!(agg.min(), 2.0);
        assert_eq!(agg.max(), 9.0);
        assert_eq!(agg.quantile(0.5), 4.0);
        assert_eq!(agg.quantile(0.99), 9.0);
    }

    #[test]
    fn test_merge_matches_sequential() {
        let values = [1.0, 3.0, 8.0, 2.5, 6.0, 10.0];
        let mut whole = BucketAggregate::new();
        values.iter().for_each(|v| whole.push(*v));

        let mut left = BucketAggregate::new();
        let mut right = BucketAggregate::new();
        values[..2].iter().for_each(|v| left.push(*v));
        values[2..].iter().for_each(|v| right.push(*v));
        left.merge(&right);

        assert_eq!(left.count(), whole.count());
        assert!((left.avg() - whole.avg()).abs() < 1e-9);
        assert!((left.stddev() - whole.stddev()).abs() < 1e-9);
        assert_eq!(left.max(), whole.max());
    }

    #[test]
    fn test_store_groups_by_bucket() {
        let mut store = RollupStore::new(Granularity::Minute);
        for i in 0..120 {
            let reading = SensorReading::new(
                1,
                "line-a",
                "s1",
                SensorType::Pressure,
                i * 1_000,
                i as f64,
                "bar",
            );
            store.apply(&reading);
        }
        assert_eq!(store.bucket_count(), 2);

        let sensors = HashSet::from(["s1".to_string()]);
        let rows = store.query(&sensors, TimeRange::new(30_000, 60_000));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].bucket, 0);
        assert_eq!(rows[0].sample_count, 60);
        assert_eq!(rows[1].min_value, 60.0);
        assert_eq!(store.sample_count(TimeRange::new(0, 119_999)), 120);
    }
}
