//! The durable aggregate of every key-down ever recorded.
//!
//! All maps are sparse: a missing entry means zero. Bucket keys are always
//! aligned, hour buckets to the top of the local hour and day buckets to the
//! local calendar date, never raw event timestamps.

use crate::collector::types::KeyId;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Start of a local calendar hour.
pub type HourBucket = NaiveDateTime;

/// A local calendar day.
pub type DayBucket = NaiveDate;

/// Truncate a timestamp to the start of its local hour.
pub fn hour_bucket<Tz: TimeZone>(at: &DateTime<Tz>) -> HourBucket {
    let local = at.with_timezone(&Local).naive_local();
    let time = NaiveTime::from_hms_opt(local.hour(), 0, 0).unwrap_or(NaiveTime::MIN);
    local.date().and_time(time)
}

/// The local calendar day a timestamp falls on.
pub fn day_bucket<Tz: TimeZone>(at: &DateTime<Tz>) -> DayBucket {
    at.with_timezone(&Local).date_naive()
}

/// Lifetime keystroke counters, bucketed by hour and day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateStats {
    /// Every key-down ever recorded
    pub total_count: u64,
    /// Key-downs of the designated delete key
    pub total_delete_count: u64,
    /// Lifetime count per key
    pub key_frequency: BTreeMap<KeyId, u64>,
    /// Count per local hour
    pub hourly_count: BTreeMap<HourBucket, u64>,
    /// Delete-key count per local hour
    pub hourly_delete_count: BTreeMap<HourBucket, u64>,
    /// Count per local day
    pub daily_count: BTreeMap<DayBucket, u64>,
    /// Per-day breakdown by key
    pub daily_key_frequency: BTreeMap<DayBucket, BTreeMap<KeyId, u64>>,
}

impl AggregateStats {
    /// Create an empty aggregate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one key-down into every counter it touches.
    pub fn fold<Tz: TimeZone>(&mut self, key_id: KeyId, at: &DateTime<Tz>, is_delete: bool) {
        let hour = hour_bucket(at);
        let day = hour.date();

        self.total_count += 1;
        *self.key_frequency.entry(key_id).or_insert(0) += 1;
        *self.hourly_count.entry(hour).or_insert(0) += 1;
        *self.daily_count.entry(day).or_insert(0) += 1;
        *self
            .daily_key_frequency
            .entry(day)
            .or_default()
            .entry(key_id)
            .or_insert(0) += 1;

        if is_delete {
            self.total_delete_count += 1;
            *self.hourly_delete_count.entry(hour).or_insert(0) += 1;
        }
    }

    /// Whether nothing has ever been recorded.
    pub fn is_empty(&self) -> bool {
        self.total_count == 0
            && self.total_delete_count == 0
            && self.key_frequency.is_empty()
            && self.hourly_count.is_empty()
            && self.hourly_delete_count.is_empty()
            && self.daily_count.is_empty()
            && self.daily_key_frequency.is_empty()
    }

    /// Lifetime count for one key.
    pub fn count_for(&self, key_id: KeyId) -> u64 {
        self.key_frequency.get(&key_id).copied().unwrap_or(0)
    }

    /// Count for one local day.
    pub fn count_on(&self, day: DayBucket) -> u64 {
        self.daily_count.get(&day).copied().unwrap_or(0)
    }

    /// The first day anything was recorded.
    pub fn first_day(&self) -> Option<DayBucket> {
        self.daily_count.keys().next().copied()
    }

    /// Check the cross-field invariants of the aggregate.
    ///
    /// Returns the first violation found, described for logging.
    pub fn check_consistency(&self) -> Result<(), String> {
        let key_sum: u64 = self.key_frequency.values().sum();
        if key_sum != self.total_count {
            return Err(format!(
                "total_count {} != sum of key_frequency {}",
                self.total_count, key_sum
            ));
        }

        let day_sum: u64 = self.daily_count.values().sum();
        if day_sum != self.total_count {
            return Err(format!(
                "total_count {} != sum of daily_count {}",
                self.total_count, day_sum
            ));
        }

        let delete_sum: u64 = self.hourly_delete_count.values().sum();
        if delete_sum != self.total_delete_count {
            return Err(format!(
                "total_delete_count {} != sum of hourly_delete_count {}",
                self.total_delete_count, delete_sum
            ));
        }

        let mut hours_per_day: BTreeMap<DayBucket, u64> = BTreeMap::new();
        for (hour, count) in &self.hourly_count {
            if hour.minute() != 0 || hour.second() != 0 || hour.nanosecond() != 0 {
                return Err(format!("hour bucket {hour} is not aligned"));
            }
            *hours_per_day.entry(hour.date()).or_insert(0) += count;
        }
        if hours_per_day != self.daily_count {
            return Err("hourly_count does not sum to daily_count".to_string());
        }

        for (day, keys) in &self.daily_key_frequency {
            let sum: u64 = keys.values().sum();
            if sum != self.count_on(*day) {
                return Err(format!(
                    "daily_key_frequency for {day} sums to {sum}, daily_count is {}",
                    self.count_on(*day)
                ));
            }
        }

        for day in self.daily_count.keys() {
            if !self.daily_key_frequency.contains_key(day) {
                return Err(format!("daily_key_frequency is missing {day}"));
            }
        }

        Ok(())
    }

    /// Whether the cross-field invariants hold.
    pub fn is_consistent(&self) -> bool {
        self.check_consistency().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::{DELETE_KEY_ID, SPACE_KEY_ID};

    fn at(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 6, 12, h, m, 0).unwrap()
    }

    #[test]
    fn test_hour_bucket_truncates() {
        let bucket = hour_bucket(&at(9, 42));
        assert_eq!(bucket.hour(), 9);
        assert_eq!(bucket.minute(), 0);
        assert_eq!(bucket.second(), 0);
        assert_eq!(bucket.date(), NaiveDate::from_ymd_opt(2024, 6, 12).unwrap());
    }

    #[test]
    fn test_same_hour_shares_bucket() {
        let mut stats = AggregateStats::new();
        stats.fold(SPACE_KEY_ID, &at(9, 0), false);
        stats.fold(SPACE_KEY_ID, &at(9, 5), false);

        assert_eq!(stats.hourly_count.len(), 1);
        assert_eq!(stats.hourly_count.values().next(), Some(&2));
    }

    #[test]
    fn test_space_scenario() {
        let mut stats = AggregateStats::new();
        stats.fold(SPACE_KEY_ID, &at(9, 0), false);
        stats.fold(SPACE_KEY_ID, &at(9, 10), false);
        stats.fold(SPACE_KEY_ID, &at(10, 5), false);

        let day = NaiveDate::from_ymd_opt(2024, 6, 12).unwrap();
        assert_eq!(stats.hourly_count.len(), 2);
        assert_eq!(stats.hourly_count[&hour_bucket(&at(9, 0))], 2);
        assert_eq!(stats.hourly_count[&hour_bucket(&at(10, 0))], 1);
        assert_eq!(stats.daily_count.len(), 1);
        assert_eq!(stats.daily_count[&day], 3);
        assert_eq!(stats.key_frequency[&49], 3);
        assert!(stats.is_consistent());
    }

    #[test]
    fn test_delete_subset() {
        let mut stats = AggregateStats::new();
        for i in 0..10 {
            let is_delete = i % 3 == 0;
            let key = if is_delete { DELETE_KEY_ID } else { 0 };
            stats.fold(key, &at(11, i), is_delete);
        }

        assert_eq!(stats.total_count, 10);
        assert_eq!(stats.total_delete_count, 4);
        assert_eq!(stats.hourly_delete_count[&hour_bucket(&at(11, 0))], 4);
        assert!(stats.is_consistent());
    }

    #[test]
    fn test_consistency_detects_tampering() {
        let mut stats = AggregateStats::new();
        stats.fold(1, &at(8, 0), false);
        stats.total_count = 5;
        assert!(!stats.is_consistent());
    }

    #[test]
    fn test_empty_is_consistent() {
        let stats = AggregateStats::new();
        assert!(stats.is_empty());
        assert!(stats.is_consistent());
        assert_eq!(stats.count_for(49), 0);
        assert_eq!(stats.first_day(), None);
    }
}
