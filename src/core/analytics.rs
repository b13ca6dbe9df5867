//! Read-only time-range analytics over an [`AggregateStats`] snapshot.
//!
//! Everything here is derived from the day and hour buckets; nothing mutates
//! the aggregate.

use crate::collector::types::KeyId;
use crate::core::stats::{AggregateStats, DayBucket};
use chrono::{Datelike, Days, NaiveDate, Timelike};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A span of local calendar days, resolved against a given "today".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateRange {
    Today,
    /// Monday of the current week through today
    ThisWeek,
    /// First of the current month through today
    ThisMonth,
    /// The last `n` days, today included
    LastDays(u32),
    AllTime,
}

impl DateRange {
    /// Inclusive first and last day of the range.
    pub fn bounds(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        match self {
            DateRange::Today => (today, today),
            DateRange::ThisWeek => {
                let offset = today.weekday().num_days_from_monday() as u64;
                (days_before(today, offset), today)
            }
            DateRange::ThisMonth => (today.with_day(1).unwrap_or(today), today),
            DateRange::LastDays(n) => {
                let span = (*n).max(1) as u64 - 1;
                (days_before(today, span), today)
            }
            DateRange::AllTime => (NaiveDate::MIN, NaiveDate::MAX),
        }
    }

    fn contains(&self, today: NaiveDate, day: NaiveDate) -> bool {
        let (start, end) = self.bounds(today);
        day >= start && day <= end
    }
}

/// `today` minus `days`, clamped to the earliest representable date.
fn days_before(today: NaiveDate, days: u64) -> NaiveDate {
    today.checked_sub_days(Days::new(days)).unwrap_or(NaiveDate::MIN)
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateRange::Today => write!(f, "today"),
            DateRange::ThisWeek => write!(f, "this week"),
            DateRange::ThisMonth => write!(f, "this month"),
            DateRange::LastDays(n) => write!(f, "last {n} days"),
            DateRange::AllTime => write!(f, "all time"),
        }
    }
}

impl FromStr for DateRange {
    type Err = String;

    /// Accepts `today`, `week`, `month`, `all` or `<n>d`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "today" | "day" => Ok(DateRange::Today),
            "week" => Ok(DateRange::ThisWeek),
            "month" => Ok(DateRange::ThisMonth),
            "all" => Ok(DateRange::AllTime),
            other => other
                .strip_suffix('d')
                .and_then(|n| n.parse::<u32>().ok())
                .filter(|n| *n > 0)
                .map(DateRange::LastDays)
                .ok_or_else(|| format!("unknown range '{s}' (use today, week, month, all or <n>d)")),
        }
    }
}

/// Key-downs recorded within the range.
pub fn total_in(stats: &AggregateStats, range: DateRange, today: NaiveDate) -> u64 {
    let (start, end) = range.bounds(today);
    stats.daily_count.range(start..=end).map(|(_, c)| c).sum()
}

/// Delete-key presses recorded within the range.
pub fn deletes_in(stats: &AggregateStats, range: DateRange, today: NaiveDate) -> u64 {
    stats
        .hourly_delete_count
        .iter()
        .filter(|(hour, _)| range.contains(today, hour.date()))
        .map(|(_, c)| c)
        .sum()
}

/// Per-key counts within the range.
pub fn key_frequency_in(
    stats: &AggregateStats,
    range: DateRange,
    today: NaiveDate,
) -> BTreeMap<KeyId, u64> {
    let (start, end) = range.bounds(today);
    let mut merged = BTreeMap::new();
    for keys in stats.daily_key_frequency.range(start..=end).map(|(_, k)| k) {
        for (key, count) in keys {
            *merged.entry(*key).or_insert(0) += count;
        }
    }
    merged
}

/// The `n` most pressed keys, most frequent first; ties go to the lower key id.
pub fn top_keys(frequency: &BTreeMap<KeyId, u64>, n: usize) -> Vec<(KeyId, u64)> {
    let mut keys: Vec<(KeyId, u64)> = frequency.iter().map(|(k, c)| (*k, *c)).collect();
    keys.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    keys.truncate(n);
    keys
}

/// Number of distinct keys pressed on one specific day.
pub fn unique_keys_on(stats: &AggregateStats, day: DayBucket) -> usize {
    stats
        .daily_key_frequency
        .get(&day)
        .map(|keys| keys.values().filter(|c| **c > 0).count())
        .unwrap_or(0)
}

/// Key-downs per hour of one day, index 0 being midnight.
pub fn hourly_profile(stats: &AggregateStats, day: DayBucket) -> [u64; 24] {
    let mut profile = [0u64; 24];
    for (hour, count) in stats.hourly_count.iter().filter(|(h, _)| h.date() == day) {
        profile[hour.hour() as usize] += count;
    }
    profile
}

/// The hour of day with the most key-downs within the range.
pub fn peak_hour(stats: &AggregateStats, range: DateRange, today: NaiveDate) -> Option<u32> {
    let mut by_hour = [0u64; 24];
    for (hour, count) in stats
        .hourly_count
        .iter()
        .filter(|(h, _)| range.contains(today, h.date()))
    {
        by_hour[hour.hour() as usize] += count;
    }

    by_hour
        .iter()
        .enumerate()
        .filter(|(_, c)| **c > 0)
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
        .map(|(h, _)| h as u32)
}

/// The day with the most key-downs within the range.
pub fn busiest_day(
    stats: &AggregateStats,
    range: DateRange,
    today: NaiveDate,
) -> Option<(DayBucket, u64)> {
    let (start, end) = range.bounds(today);
    stats
        .daily_count
        .range(start..=end)
        .filter(|(_, c)| **c > 0)
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
        .map(|(d, c)| (*d, *c))
}

/// Mean key-downs per calendar day across the range.
///
/// For [`DateRange::AllTime`] the span starts at the first recorded day.
pub fn daily_average(stats: &AggregateStats, range: DateRange, today: NaiveDate) -> f64 {
    let (start, end) = match range {
        DateRange::AllTime => match stats.first_day() {
            Some(first) => (first, today.max(first)),
            None => return 0.0,
        },
        other => other.bounds(today),
    };

    let days = (end - start).num_days() + 1;
    if days <= 0 {
        return 0.0;
    }
    let total: u64 = stats.daily_count.range(start..=end).map(|(_, c)| c).sum();
    total as f64 / days as f64
}

/// Everything presentation needs to describe one range.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeSummary {
    pub range: DateRange,
    pub total: u64,
    pub deletes: u64,
    pub unique_keys: usize,
    pub top_keys: Vec<(KeyId, u64)>,
    pub busiest_day: Option<(DayBucket, u64)>,
    pub peak_hour: Option<u32>,
    pub daily_average: f64,
}

impl RangeSummary {
    /// Summarize `range` as seen from `today`.
    pub fn compute(stats: &AggregateStats, range: DateRange, today: NaiveDate, top: usize) -> Self {
        let frequency = key_frequency_in(stats, range, today);
        Self {
            range,
            total: total_in(stats, range, today),
            deletes: deletes_in(stats, range, today),
            unique_keys: frequency.values().filter(|c| **c > 0).count(),
            top_keys: top_keys(&frequency, top),
            busiest_day: busiest_day(stats, range, today),
            peak_hour: peak_hour(stats, range, today),
            daily_average: daily_average(stats, range, today),
        }
    }

    /// Share of key-downs that were the delete key.
    pub fn delete_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.deletes as f64 / self.total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn sample() -> AggregateStats {
        let mut stats = AggregateStats::new();
        // 2024-06-10 is a Monday
        let presses = [
            (10, 9, 0u16, false),
            (10, 9, 0, false),
            (10, 14, 51, true),
            (12, 9, 49, false),
            (12, 9, 49, false),
            (12, 9, 49, false),
            (12, 10, 0, false),
            (3, 8, 1, false),
        ];
        for (d, h, key, is_delete) in presses {
            let at = Local.with_ymd_and_hms(2024, 6, d, h, 15, 0).unwrap();
            stats.fold(key, &at, is_delete);
        }
        stats
    }

    #[test]
    fn test_range_bounds() {
        let today = day(12); // Wednesday
        assert_eq!(DateRange::Today.bounds(today), (today, today));
        assert_eq!(DateRange::ThisWeek.bounds(today), (day(10), today));
        assert_eq!(DateRange::ThisMonth.bounds(today), (day(1), today));
        assert_eq!(DateRange::LastDays(3).bounds(today), (day(10), today));
    }

    #[test]
    fn test_huge_last_days_clamps_to_earliest_date() {
        let today = day(12);
        let range: DateRange = "4000000000d".parse().unwrap();
        assert_eq!(range.bounds(today), (NaiveDate::MIN, today));

        let stats = sample();
        assert_eq!(total_in(&stats, range, today), 8);
        assert!(key_frequency_in(&stats, range, today).contains_key(&0));
        assert!(busiest_day(&stats, range, today).is_some());
        assert!(daily_average(&stats, range, today) > 0.0);
        assert_eq!(RangeSummary::compute(&stats, range, today, 3).total, 8);
    }

    #[test]
    fn test_range_parsing() {
        assert_eq!("today".parse::<DateRange>(), Ok(DateRange::Today));
        assert_eq!("Week".parse::<DateRange>(), Ok(DateRange::ThisWeek));
        assert_eq!("30d".parse::<DateRange>(), Ok(DateRange::LastDays(30)));
        assert!("0d".parse::<DateRange>().is_err());
        assert!("fortnight".parse::<DateRange>().is_err());
    }

    #[test]
    fn test_totals_by_range() {
        let stats = sample();
        let today = day(12);
        assert_eq!(total_in(&stats, DateRange::Today, today), 4);
        assert_eq!(total_in(&stats, DateRange::ThisWeek, today), 7);
        assert_eq!(total_in(&stats, DateRange::AllTime, today), 8);
        assert_eq!(deletes_in(&stats, DateRange::ThisWeek, today), 1);
        assert_eq!(deletes_in(&stats, DateRange::Today, today), 0);
    }

    #[test]
    fn test_week_key_frequency_uses_daily_breakdown() {
        let stats = sample();
        let week = key_frequency_in(&stats, DateRange::ThisWeek, day(12));
        assert_eq!(week.get(&0), Some(&3));
        assert_eq!(week.get(&49), Some(&3));
        assert_eq!(week.get(&1), None);
    }

    #[test]
    fn test_unique_keys_filter_by_day() {
        let stats = sample();
        assert_eq!(unique_keys_on(&stats, day(10)), 2);
        assert_eq!(unique_keys_on(&stats, day(12)), 2);
        assert_eq!(unique_keys_on(&stats, day(3)), 1);
        assert_eq!(unique_keys_on(&stats, day(11)), 0);
    }

    #[test]
    fn test_top_keys_ordering() {
        let stats = sample();
        let top = top_keys(&stats.key_frequency, 2);
        assert_eq!(top, vec![(0, 3), (49, 3)]);
    }

    #[test]
    fn test_hourly_profile_and_peak() {
        let stats = sample();
        let profile = hourly_profile(&stats, day(12));
        assert_eq!(profile[9], 3);
        assert_eq!(profile[10], 1);
        assert_eq!(profile.iter().sum::<u64>(), 4);
        assert_eq!(peak_hour(&stats, DateRange::ThisWeek, day(12)), Some(9));
    }

    #[test]
    fn test_summary() {
        let stats = sample();
        let summary = RangeSummary::compute(&stats, DateRange::ThisWeek, day(12), 3);
        assert_eq!(summary.total, 7);
        assert_eq!(summary.deletes, 1);
        assert_eq!(summary.unique_keys, 3);
        assert_eq!(summary.busiest_day, Some((day(12), 4)));
        assert!((summary.daily_average - 7.0 / 3.0).abs() < 1e-9);
        assert!((summary.delete_ratio() - 1.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_all_time_average_starts_at_first_day() {
        let stats = sample();
        let avg = daily_average(&stats, DateRange::AllTime, day(12));
        assert!((avg - 8.0 / 10.0).abs() < 1e-9);
        assert_eq!(daily_average(&AggregateStats::new(), DateRange::AllTime, day(12)), 0.0);
    }
}
