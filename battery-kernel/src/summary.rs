//! Range checks and per-day aggregates over telemetry rows.

use crate::error::FieldError;
use crate::models::TelemetryRecord;
use serde::Serialize;
use std::collections::BTreeMap;
use time::{Date, OffsetDateTime, Time};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricSummary {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

/// `start <= end`, reported against the query parameter that is out of order.
pub fn check_range(start: OffsetDateTime, end: OffsetDateTime) -> Result<(), Vec<FieldError>> {
    if start > end {
        return Err(vec![FieldError::new(
            &["query", "start"],
            "start must be before or equal to end",
            "value_error",
        )]);
    }
    Ok(())
}

/// UTC bounds `[date 00:00, date+1 00:00)` of a calendar day. `None` for the
/// last representable date, which has no following midnight.
pub fn day_bounds(date: Date) -> Option<(OffsetDateTime, OffsetDateTime)> {
    let next = date.next_day()?;
    Some((
        date.with_time(Time::MIDNIGHT).assume_utc(),
        next.with_time(Time::MIDNIGHT).assume_utc(),
    ))
}

/// min/max/avg per metric, keyed by metric name. `None` when there are no rows.
pub fn summarize(rows: &[TelemetryRecord]) -> Option<BTreeMap<String, MetricSummary>> {
    if rows.is_empty() {
        return None;
    }

    // (min, max, sum) per metric
    let mut acc: BTreeMap<&'static str, (f64, f64, f64)> = BTreeMap::new();
    for row in rows {
        for (name, value) in row.metrics.named() {
            let entry = acc.entry(name).or_insert((f64::INFINITY, f64::NEG_INFINITY, 0.0));
            entry.0 = entry.0.min(value);
            entry.1 = entry.1.max(value);
            entry.2 += value;
        }
    }

    let count = rows.len() as f64;
    Some(
        acc.into_iter()
            .map(|(name, (min, max, sum))| {
                (name.to_string(), MetricSummary { min, max, avg: sum / count })
            })
            .collect(),
    )
}

/// Summary of the rows that fall on `date`. Rows outside the day are ignored.
pub fn daily_summary(date: Date, rows: &[TelemetryRecord]) -> Option<BTreeMap<String, MetricSummary>> {
    let (start, end) = day_bounds(date)?;
    let in_day: Vec<TelemetryRecord> = rows
        .iter()
        .filter(|r| r.timestamp >= start && r.timestamp < end)
        .cloned()
        .collect();
    summarize(&in_day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TelemetryMetrics;
    use battery_devkit::ts;
    use time::macros::date;

    fn row(at: &str, soc: f64, temp: f64) -> TelemetryRecord {
        TelemetryRecord {
            device_id: "d1".to_string(),
            timestamp: ts(at),
            metrics: TelemetryMetrics { soc_percent: soc, voltage_v: 400.0, current_a: -2.0, temp_c: temp },
        }
    }

    #[test]
    fn test_day_bounds_are_utc_midnights() {
        let (start, end) = day_bounds(date!(2025 - 01 - 15)).unwrap();
        assert_eq!(start, ts("2025-01-15T00:00:00Z"));
        assert_eq!(end, ts("2025-01-16T00:00:00Z"));
        assert!(day_bounds(Date::MAX).is_none());
    }

    #[test]
    fn test_summary_min_max_avg() {
        let rows = [
            row("2025-01-15T08:00:00Z", 90.0, 20.0),
            row("2025-01-15T12:00:00Z", 60.0, 30.0),
            row("2025-01-15T16:00:00Z", 30.0, 25.0),
        ];
        let summary = summarize(&rows).unwrap();
        assert_eq!(summary.len(), 4);
        assert_eq!(summary["soc_percent"], MetricSummary { min: 30.0, max: 90.0, avg: 60.0 });
        assert_eq!(summary["temp_c"].avg, 25.0);
        assert_eq!(summary["current_a"].min, -2.0);
    }

    #[test]
    fn test_daily_summary_excludes_next_midnight() {
        let rows = [
            row("2025-01-14T23:59:59Z", 1.0, 0.0),
            row("2025-01-15T00:00:00Z", 40.0, 0.0),
            row("2025-01-16T00:00:00Z", 99.0, 0.0),
        ];
        let summary = daily_summary(date!(2025 - 01 - 15), &rows).unwrap();
        assert_eq!(summary["soc_percent"], MetricSummary { min: 40.0, max: 40.0, avg: 40.0 });

        assert!(daily_summary(date!(2025 - 01 - 17), &rows).is_none());
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        assert!(check_range(ts("2025-01-15T10:00:00Z"), ts("2025-01-15T10:00:00Z")).is_ok());
        let errors = check_range(ts("2025-01-15T11:00:00Z"), ts("2025-01-15T10:00:00Z")).unwrap_err();
        assert_eq!(errors[0].loc, vec!["query".to_string(), "start".to_string()]);
    }
}
