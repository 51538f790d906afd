use crate::correlation::CorrelatedViolation;
use crate::db::models::Detection;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

const TOP_VIOLATORS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeeStats {
    pub employee_name: String,
    pub detections: usize,
    pub cameras_visited: Vec<String>,
    pub last_seen: f64,
    pub violations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraSummary {
    pub camera: String,
    pub active_people: usize,
    pub total_detections: usize,
    pub phone_violations: usize,
    pub last_activity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolatorCount {
    pub employee_name: String,
    pub violations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardOverview {
    pub violations_today: usize,
    pub top_violators: Vec<ViolatorCount>,
    pub active_cameras: Vec<String>,
    pub generated_at: f64,
}

/// Per-employee activity from identified sightings, busiest first.
pub fn build_employee_stats(
    sightings: &[Detection],
    violations: &[CorrelatedViolation],
) -> Vec<EmployeeStats> {
    struct Acc<'a> {
        detections: usize,
        cameras: BTreeSet<&'a str>,
        last_seen: f64,
    }

    let mut per_employee: BTreeMap<&str, Acc<'_>> = BTreeMap::new();
    for sighting in sightings {
        let Some(name) = sighting.identity() else {
            continue;
        };
        let acc = per_employee.entry(name).or_insert(Acc {
            detections: 0,
            cameras: BTreeSet::new(),
            last_seen: f64::MIN,
        });
        acc.detections += 1;
        acc.cameras.insert(sighting.camera.as_str());
        acc.last_seen = acc.last_seen.max(sighting.timestamp);
    }

    let violation_counts = count_by_employee(violations);

    let mut stats: Vec<EmployeeStats> = per_employee
        .into_iter()
        .map(|(name, acc)| EmployeeStats {
            employee_name: name.to_string(),
            detections: acc.detections,
            cameras_visited: acc.cameras.into_iter().map(str::to_string).collect(),
            last_seen: acc.last_seen,
            violations: violation_counts.get(name).copied().unwrap_or(0),
        })
        .collect();

    stats.sort_by(|a, b| b.detections.cmp(&a.detections));
    stats
}

/// Activity per configured camera from `since` onward
pub fn build_camera_summaries(
    cameras: &[String],
    sightings: &[Detection],
    violations: &[CorrelatedViolation],
    since: f64,
) -> Vec<CameraSummary> {
    cameras
        .iter()
        .map(|camera| {
            let seen: Vec<&Detection> = sightings
                .iter()
                .filter(|d| &d.camera == camera && d.timestamp >= since)
                .collect();
            let phones: Vec<&CorrelatedViolation> = violations
                .iter()
                .filter(|v| &v.camera == camera && v.timestamp >= since)
                .collect();

            let people: BTreeSet<&str> = seen.iter().filter_map(|d| d.identity()).collect();
            let last_activity = seen
                .iter()
                .map(|d| d.timestamp)
                .chain(phones.iter().map(|v| v.timestamp))
                .reduce(f64::max);

            CameraSummary {
                camera: camera.clone(),
                active_people: people.len(),
                total_detections: seen.len() + phones.len(),
                phone_violations: phones.len(),
                last_activity,
            }
        })
        .collect()
}

/// Headline numbers for the dashboard. `day_start` and `hour_start` bound
/// "today" and "active" respectively.
pub fn build_dashboard_overview(
    violations: &[CorrelatedViolation],
    sightings: &[Detection],
    day_start: f64,
    hour_start: f64,
    now: f64,
) -> DashboardOverview {
    let today: Vec<CorrelatedViolation> = violations
        .iter()
        .filter(|v| v.timestamp >= day_start)
        .cloned()
        .collect();

    let mut top_violators: Vec<ViolatorCount> = count_by_employee(&today)
        .into_iter()
        .map(|(name, count)| ViolatorCount {
            employee_name: name.to_string(),
            violations: count,
        })
        .collect();
    top_violators.sort_by(|a, b| {
        b.violations
            .cmp(&a.violations)
            .then_with(|| a.employee_name.cmp(&b.employee_name))
    });
    top_violators.truncate(TOP_VIOLATORS);

    let active_cameras: BTreeSet<&str> = sightings
        .iter()
        .filter(|d| d.timestamp >= hour_start)
        .map(|d| d.camera.as_str())
        .chain(
            violations
                .iter()
                .filter(|v| v.timestamp >= hour_start)
                .map(|v| v.camera.as_str()),
        )
        .collect();

    DashboardOverview {
        violations_today: today.len(),
        top_violators,
        active_cameras: active_cameras.into_iter().map(str::to_string).collect(),
        generated_at: now,
    }
}

fn count_by_employee(violations: &[CorrelatedViolation]) -> HashMap<&str, usize> {
    let mut counts = HashMap::new();
    for violation in violations.iter().filter(|v| v.is_identified()) {
        *counts.entry(violation.employee_name.as_str()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::{attribute, DeskAssignments};
    use crate::db::models::Label;
    use crate::testing::{face, phone, sighting};

    fn violations() -> Vec<CorrelatedViolation> {
        let desks: DeskAssignments = [("desk_1", "Alice"), ("desk_2", "Bob")].into_iter().collect();
        let phones = vec![
            phone(7_300.0, "A", &["desk_1"], "p1"),
            phone(7_400.0, "A", &["desk_1"], "p2"),
            phone(7_500.0, "B", &["desk_2"], "p3"),
            phone(100.0, "B", &["desk_2"], "yesterday"),
            phone(7_600.0, "B", &[], "p4"),
        ];
        attribute(&phones, &[], &desks, 3.0)
    }

    #[test]
    fn employee_stats_ordered_by_detections() {
        let sightings = vec![
            face(7_200.0, "A", "Alice", 0.9),
            face(7_250.0, "B", "Alice", 0.9),
            sighting(7_260.0, "A", Label::Person, Some("Alice"), None),
            face(7_210.0, "B", "Bob", 0.8),
            sighting(7_270.0, "B", Label::Person, None, None),
        ];

        let stats = build_employee_stats(&sightings, &violations());

        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].employee_name, "Alice");
        assert_eq!(stats[0].detections, 3);
        assert_eq!(stats[0].cameras_visited, vec!["A", "B"]);
        assert_eq!(stats[0].last_seen, 7_260.0);
        assert_eq!(stats[0].violations, 2);
        assert_eq!(stats[1].violations, 2);
    }

    #[test]
    fn camera_summary_counts_since_cutoff() {
        let sightings = vec![
            face(7_250.0, "A", "Alice", 0.9),
            face(7_260.0, "A", "Carol", 0.9),
            face(100.0, "A", "Old", 0.9),
        ];
        let cameras = vec!["A".to_string(), "C".to_string()];

        let summaries = build_camera_summaries(&cameras, &sightings, &violations(), 7_200.0);

        assert_eq!(summaries[0].active_people, 2);
        assert_eq!(summaries[0].phone_violations, 2);
        assert_eq!(summaries[0].total_detections, 4);
        assert_eq!(summaries[0].last_activity, Some(7_400.0));
        assert_eq!(summaries[1].total_detections, 0);
        assert_eq!(summaries[1].last_activity, None);
    }

    #[test]
    fn overview_ranks_identified_violators_today() {
        let overview = build_dashboard_overview(&violations(), &[], 3_600.0, 7_200.0, 7_700.0);

        assert_eq!(overview.violations_today, 4);
        assert_eq!(
            overview.top_violators,
            vec![
                ViolatorCount { employee_name: "Alice".into(), violations: 2 },
                ViolatorCount { employee_name: "Bob".into(), violations: 1 },
            ]
        );
        assert_eq!(overview.active_cameras, vec!["A", "B"]);
        assert_eq!(overview.generated_at, 7_700.0);
    }
}
