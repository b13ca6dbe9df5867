//! Plain-text rendering of the aggregate for exports and the CLI.

use crate::core::{display_name, AggregateStats, DateRange, RangeSummary};
use chrono::NaiveDate;
use std::fmt::Write;

const REPORT_TOP_KEYS: usize = 10;

/// Render one range summary as a block of text.
pub fn format_summary(summary: &RangeSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {} ==", summary.range);
    let _ = writeln!(out, "Keystrokes:     {}", summary.total);
    let _ = writeln!(
        out,
        "Deletes:        {} ({:.1}%)",
        summary.deletes,
        summary.delete_ratio() * 100.0
    );
    let _ = writeln!(out, "Unique keys:    {}", summary.unique_keys);
    let _ = writeln!(out, "Daily average:  {:.1}", summary.daily_average);

    if let Some((day, count)) = summary.busiest_day {
        let _ = writeln!(out, "Busiest day:    {day} ({count})");
    }
    if let Some(hour) = summary.peak_hour {
        let _ = writeln!(out, "Peak hour:      {hour:02}:00-{hour:02}:59");
    }

    if !summary.top_keys.is_empty() {
        let _ = writeln!(out, "Top keys:");
        for (rank, (key_id, count)) in summary.top_keys.iter().enumerate() {
            let _ = writeln!(out, "  {:>2}. {:<16} {}", rank + 1, display_name(*key_id), count);
        }
    }
    out
}

/// Render the full human-readable export.
pub fn render_report(stats: &AggregateStats, today: NaiveDate) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "keytally report for {today}");
    let _ = writeln!(out);
    let _ = writeln!(out, "Total keystrokes: {}", stats.total_count);
    let _ = writeln!(out, "Total deletes:    {}", stats.total_delete_count);
    if let Some(first) = stats.first_day() {
        let _ = writeln!(out, "Tracking since:   {first}");
    }

    for range in [
        DateRange::Today,
        DateRange::ThisWeek,
        DateRange::ThisMonth,
        DateRange::AllTime,
    ] {
        let _ = writeln!(out);
        out.push_str(&format_summary(&RangeSummary::compute(
            stats,
            range,
            today,
            REPORT_TOP_KEYS,
        )));
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "== daily totals ==");
    for (day, count) in &stats.daily_count {
        let _ = writeln!(out, "{day}  {count}");
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "== all keys ==");
    let mut keys: Vec<_> = stats.key_frequency.iter().collect();
    keys.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    for (key_id, count) in keys {
        let _ = writeln!(out, "{:<16} {:>4}  {}", display_name(*key_id), key_id, count);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    #[test]
    fn test_report_contents() {
        let mut stats = AggregateStats::new();
        let at = Local.with_ymd_and_hms(2024, 6, 12, 10, 5, 0).unwrap();
        for _ in 0..3 {
            stats.fold(49, &at, false);
        }
        stats.fold(51, &at, true);

        let report = render_report(&stats, NaiveDate::from_ymd_opt(2024, 6, 12).unwrap());
        assert!(report.contains("Total keystrokes: 4"));
        assert!(report.contains("Total deletes:    1"));
        assert!(report.contains("2024-06-12  4"));
        assert!(report.contains("Peak hour:      10:00-10:59"));
        assert!(report.contains("Space"));
    }

    #[test]
    fn test_empty_summary_omits_optional_lines() {
        let stats = AggregateStats::new();
        let today = NaiveDate::from_ymd_opt(2024, 6, 12).unwrap();
        let text = format_summary(&RangeSummary::compute(&stats, DateRange::Today, today, 5));
        assert!(text.contains("Keystrokes:     0"));
        assert!(!text.contains("Busiest day"));
        assert!(!text.contains("Top keys"));
    }
}
