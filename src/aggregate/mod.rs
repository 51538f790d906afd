//! Derived views over correlated violations: the hourly trend, the live list
//! and the dashboard statistics.

use crate::correlation::CorrelatedViolation;
use crate::utils::time::{hour_floor, SECONDS_PER_HOUR};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub mod stats;

pub use self::stats::{
    build_camera_summaries, build_dashboard_overview, build_employee_stats, CameraSummary,
    DashboardOverview, EmployeeStats, ViolatorCount,
};

/// One clock hour of the trend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourlyBucket {
    /// Unix seconds at the start of the hour
    pub hour_start: i64,
    pub violation_count: usize,
    pub distinct_cameras: Vec<String>,
    /// Identified employees only
    pub distinct_employees: Vec<String>,
}

impl HourlyBucket {
    fn empty(hour_start: i64) -> Self {
        Self {
            hour_start,
            violation_count: 0,
            distinct_cameras: Vec::new(),
            distinct_employees: Vec::new(),
        }
    }
}

#[derive(Default)]
struct BucketAccumulator {
    count: usize,
    cameras: BTreeSet<String>,
    employees: BTreeSet<String>,
}

/// Exactly `hours` buckets, newest first: the hour containing `now` and the
/// `hours - 1` hours before it. Hours without violations are present and
/// zeroed; violations outside that range are ignored.
pub fn build_hourly_trend(
    violations: &[CorrelatedViolation],
    hours: u32,
    now: f64,
) -> Vec<HourlyBucket> {
    if hours == 0 {
        return Vec::new();
    }

    let newest = hour_floor(now);
    let oldest = newest - (i64::from(hours) - 1) * SECONDS_PER_HOUR;

    let mut acc: BTreeMap<i64, BucketAccumulator> = BTreeMap::new();
    for violation in violations {
        let hour = hour_floor(violation.timestamp);
        if hour < oldest || hour > newest {
            continue;
        }
        let bucket = acc.entry(hour).or_default();
        bucket.count += 1;
        bucket.cameras.insert(violation.camera.clone());
        if violation.is_identified() {
            bucket.employees.insert(violation.employee_name.clone());
        }
    }

    (0..i64::from(hours))
        .map(|i| {
            let hour_start = newest - i * SECONDS_PER_HOUR;
            match acc.remove(&hour_start) {
                Some(bucket) => HourlyBucket {
                    hour_start,
                    violation_count: bucket.count,
                    distinct_cameras: bucket.cameras.into_iter().collect(),
                    distinct_employees: bucket.employees.into_iter().collect(),
                },
                None => HourlyBucket::empty(hour_start),
            }
        })
        .collect()
}

/// First `limit` entries of an already newest-first correlation result
pub fn build_live_list(
    correlated: &[CorrelatedViolation],
    limit: usize,
) -> Vec<CorrelatedViolation> {
    correlated.iter().take(limit).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::{MediaRefs, UNKNOWN_EMPLOYEE};

    fn violation(timestamp: f64, camera: &str, employee: &str) -> CorrelatedViolation {
        CorrelatedViolation {
            timestamp,
            camera: camera.to_string(),
            violation_id: format!("{}-{}", camera, timestamp),
            zones: Vec::new(),
            employee_name: employee.to_string(),
            confidence: 1.0,
            media_refs: MediaRefs {
                thumbnail: String::new(),
                clip: String::new(),
                snapshot: String::new(),
            },
        }
    }

    #[test]
    fn full_day_trend_has_every_hour_once() {
        let now = 1_700_000_000.0;
        let violations = vec![
            violation(now - 10.0, "A", "Alice"),
            violation(now - 5.0 * 3600.0, "B", "Bob"),
            violation(now - 30.0 * 3600.0, "A", "Alice"),
        ];

        let trend = build_hourly_trend(&violations, 24, now);

        assert_eq!(trend.len(), 24);
        assert_eq!(trend[0].hour_start, hour_floor(now));
        assert!(trend
            .windows(2)
            .all(|w| w[0].hour_start - w[1].hour_start == SECONDS_PER_HOUR));
        assert_eq!(trend.iter().map(|b| b.violation_count).sum::<usize>(), 2);
        assert_eq!(trend.iter().filter(|b| b.violation_count == 0).count(), 22);
        assert_eq!(trend[5].violation_count, 1);
        assert_eq!(trend[5].distinct_cameras, vec!["B"]);
    }

    #[test]
    fn three_hour_trend_zero_fills_older_hours() {
        let now = 3.0 * 3600.0 + 120.0;
        let violations = vec![
            violation(now - 60.0, "A", "Alice"),
            violation(now - 30.0, "B", "Alice"),
            violation(now - 10.0, "A", UNKNOWN_EMPLOYEE),
        ];

        let trend = build_hourly_trend(&violations, 3, now);

        assert_eq!(trend.len(), 3);
        assert_eq!(
            trend.iter().map(|b| b.hour_start).collect::<Vec<_>>(),
            vec![10_800, 7_200, 3_600]
        );
        assert_eq!(trend[0].violation_count, 3);
        assert_eq!(trend[0].distinct_cameras, vec!["A", "B"]);
        assert_eq!(trend[0].distinct_employees, vec!["Alice"]);
        assert_eq!(trend[1], HourlyBucket::empty(7_200));
        assert_eq!(trend[2], HourlyBucket::empty(3_600));
    }

    #[test]
    fn violations_in_the_future_are_dropped() {
        let trend = build_hourly_trend(&[violation(10_000.0, "A", "Alice")], 2, 3_700.0);
        assert!(trend.iter().all(|b| b.violation_count == 0));
        assert!(build_hourly_trend(&[], 0, 3_700.0).is_empty());
    }

    #[test]
    fn live_list_keeps_order_and_limit() {
        let correlated = vec![
            violation(3.0, "A", "Alice"),
            violation(2.0, "A", "Bob"),
            violation(1.0, "A", "Carol"),
        ];

        let live = build_live_list(&correlated, 2);

        assert_eq!(live.len(), 2);
        assert_eq!(live[0].employee_name, "Alice");
        assert_eq!(live[1].employee_name, "Bob");
        assert_eq!(build_live_list(&correlated, 10).len(), 3);
    }
}
