use crate::aggregate::{DashboardOverview, HourlyBucket};
use crate::correlation::CorrelatedViolation;
use crate::utils::time::hours_ago;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Topic a live connection subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Group {
    Violations,
    Dashboard,
}

impl Display for Group {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Group::Violations => write!(f, "violations"),
            Group::Dashboard => write!(f, "dashboard"),
        }
    }
}

/// What a single connection wants to see
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberFilter {
    pub camera: Option<String>,
    pub hours: u32,
}

impl SubscriberFilter {
    pub fn new(camera: Option<String>, hours: u32) -> Self {
        Self { camera, hours }
    }

    pub fn matches(&self, violation: &CorrelatedViolation, now: f64) -> bool {
        self.camera
            .as_deref()
            .map_or(true, |camera| violation.camera == camera)
            && violation.timestamp >= hours_ago(now, self.hours)
    }

    pub fn apply(&self, violations: &[CorrelatedViolation], now: f64) -> Vec<CorrelatedViolation> {
        violations
            .iter()
            .filter(|v| self.matches(v, now))
            .cloned()
            .collect()
    }
}

/// Server -> client payloads, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubMessage {
    InitialData {
        violations: Vec<CorrelatedViolation>,
        filter: SubscriberFilter,
        timestamp: f64,
    },
    NewViolations {
        violations: Vec<CorrelatedViolation>,
        count: usize,
        timestamp: f64,
    },
    ViolationSummary {
        new_violations_count: usize,
        timestamp: f64,
    },
    FilteredData {
        violations: Vec<CorrelatedViolation>,
        filter: SubscriberFilter,
        timestamp: f64,
    },
    DashboardData {
        overview: Option<DashboardOverview>,
        hourly_trend: Vec<HourlyBucket>,
        timestamp: f64,
    },
    Pong {
        timestamp: f64,
    },
    Error {
        message: String,
    },
}

impl HubMessage {
    pub fn new_violations(violations: Vec<CorrelatedViolation>, timestamp: f64) -> Self {
        HubMessage::NewViolations {
            count: violations.len(),
            violations,
            timestamp,
        }
    }

    /// The message as one connection should receive it, or `None` when
    /// nothing in it concerns that connection.
    pub fn filtered_for(&self, filter: &SubscriberFilter) -> Option<HubMessage> {
        match self {
            HubMessage::NewViolations {
                violations,
                timestamp,
                ..
            } => {
                let kept = filter.apply(violations, *timestamp);
                if kept.is_empty() {
                    None
                } else {
                    Some(HubMessage::new_violations(kept, *timestamp))
                }
            }
            other => Some(other.clone()),
        }
    }
}

/// Client -> server commands
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    Ping,
    UpdateFilter {
        #[serde(default)]
        camera: Option<String>,
        #[serde(default)]
        hours: Option<u32>,
    },
}
