//! Attribution of anonymous phone detections to an employee.
//!
//! A phone detection is attributed to the desk owner when its primary zone is
//! an assigned desk. Otherwise the closest identified face or person sighting
//! on the same camera within the face window wins. Each phone detection yields
//! at most one [`CorrelatedViolation`].

use crate::config::Config;
use crate::db::models::{Detection, Label};
use crate::db::EventStore;
use crate::error::{bounded, Result};
use crate::utils::time::hours_ago;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub mod desk;

pub use self::desk::DeskAssignments;

pub const UNKNOWN_EMPLOYEE: &str = "Unknown";

/// Closed time interval, optionally restricted to one camera
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationWindow {
    pub start_ts: f64,
    pub end_ts: f64,
    pub camera: Option<String>,
}

impl CorrelationWindow {
    /// `[now - hours, now]`
    pub fn last_hours(now: f64, hours: u32) -> Self {
        Self {
            start_ts: hours_ago(now, hours),
            end_ts: now,
            camera: None,
        }
    }

    pub fn for_camera(mut self, camera: Option<String>) -> Self {
        self.camera = camera;
        self
    }

    pub fn contains(&self, ts: f64) -> bool {
        ts >= self.start_ts && ts <= self.end_ts
    }
}

/// Media identifiers for a violation. Turning them into URLs is left to the
/// HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRefs {
    pub thumbnail: String,
    pub clip: String,
    /// `camera/source_id`
    pub snapshot: String,
}

impl MediaRefs {
    fn for_detection(detection: &Detection) -> Self {
        Self {
            thumbnail: detection.source_id.clone(),
            clip: detection.source_id.clone(),
            snapshot: format!("{}/{}", detection.camera, detection.source_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelatedViolation {
    pub timestamp: f64,
    pub camera: String,
    /// `source_id` of the triggering phone detection
    pub violation_id: String,
    pub zones: Vec<String>,
    pub employee_name: String,
    pub confidence: f64,
    pub media_refs: MediaRefs,
}

impl CorrelatedViolation {
    pub fn is_identified(&self) -> bool {
        self.employee_name != UNKNOWN_EMPLOYEE
    }
}

pub struct CorrelationEngine {
    store: Arc<dyn EventStore>,
    desks: RwLock<Arc<DeskAssignments>>,
    face_window: f64,
    call_timeout: Duration,
}

impl CorrelationEngine {
    pub fn new(
        store: Arc<dyn EventStore>,
        desks: DeskAssignments,
        face_window: f64,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            desks: RwLock::new(Arc::new(desks)),
            face_window,
            call_timeout,
        }
    }

    pub fn from_config(store: Arc<dyn EventStore>, config: &Config) -> Result<Self> {
        let desks = DeskAssignments::from_config(&config.correlation)?;
        info!("Loaded {} desk assignments", desks.len());
        Ok(Self::new(
            store,
            desks,
            config.correlation.face_window_secs,
            config.background.call_timeout(),
        ))
    }

    /// Current desk table; cheap to clone and unaffected by later reloads
    pub fn desks(&self) -> Arc<DeskAssignments> {
        let guard = self.desks.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Swap the desk table; the next `correlate` call sees the new one
    pub fn replace_desks(&self, desks: DeskAssignments) {
        let mut guard = self.desks.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(desks);
    }

    /// Attributed violations in `window`, newest first.
    ///
    /// Any store failure fails the whole call; nothing partial is returned.
    pub async fn correlate(&self, window: &CorrelationWindow) -> Result<Vec<CorrelatedViolation>> {
        let camera = window.camera.as_deref();
        let phones = bounded(
            self.call_timeout,
            "phone detection query",
            self.store
                .query(camera, &Label::CellPhone, window.start_ts, window.end_ts),
        )
        .await?;

        if phones.is_empty() {
            return Ok(Vec::new());
        }

        // candidates for the whole window in one pass per label
        let start = window.start_ts - self.face_window;
        let end = window.end_ts + self.face_window;
        let (faces, people) = tokio::try_join!(
            bounded(
                self.call_timeout,
                "face detection query",
                self.store.query(camera, &Label::Face, start, end),
            ),
            bounded(
                self.call_timeout,
                "person detection query",
                self.store.query(camera, &Label::Person, start, end),
            ),
        )?;

        let mut candidates = faces;
        candidates.extend(people);

        let violations = attribute(&phones, &candidates, &self.desks(), self.face_window);
        debug!(
            "Correlated {} violations from {} phone and {} candidate detections",
            violations.len(),
            phones.len(),
            candidates.len()
        );
        Ok(violations)
    }
}

/// Attribute each distinct phone detection, newest first.
///
/// `candidates` may hold any labels; only identified face and person
/// detections on the phone's camera are considered.
pub fn attribute(
    phones: &[Detection],
    candidates: &[Detection],
    desks: &DeskAssignments,
    face_window: f64,
) -> Vec<CorrelatedViolation> {
    let index = CandidateIndex::build(candidates);

    let mut violations: Vec<CorrelatedViolation> = distinct_by_source(phones)
        .into_iter()
        .map(|phone| {
            let (employee_name, confidence) = match phone
                .primary_zone()
                .and_then(|zone| desks.employee_for(zone))
            {
                Some(name) => (name.to_string(), 1.0),
                None => match index.nearest(&phone.camera, phone.timestamp, face_window) {
                    Some(found) => (
                        found.identity().unwrap_or(UNKNOWN_EMPLOYEE).to_string(),
                        found.sub_label.as_ref().and_then(|s| s.score).unwrap_or(0.0),
                    ),
                    None => (UNKNOWN_EMPLOYEE.to_string(), 0.0),
                },
            };

            CorrelatedViolation {
                timestamp: phone.timestamp,
                camera: phone.camera.clone(),
                violation_id: phone.source_id.clone(),
                zones: phone.zones.clone(),
                employee_name,
                confidence,
                media_refs: MediaRefs::for_detection(phone),
            }
        })
        .collect();

    violations.sort_by(|a, b| b.timestamp.total_cmp(&a.timestamp));
    violations
}

// earliest sighting per source_id, input order otherwise preserved
fn distinct_by_source(phones: &[Detection]) -> Vec<&Detection> {
    let mut earliest: HashMap<&str, usize> = HashMap::new();
    for (i, phone) in phones.iter().enumerate() {
        earliest
            .entry(phone.source_id.as_str())
            .and_modify(|kept| {
                if phone.timestamp < phones[*kept].timestamp {
                    *kept = i;
                }
            })
            .or_insert(i);
    }

    let keep: HashSet<usize> = earliest.into_values().collect();
    phones
        .iter()
        .enumerate()
        .filter(|(i, _)| keep.contains(i))
        .map(|(_, phone)| phone)
        .collect()
}

/// Identified face/person detections per camera, sorted by timestamp
struct CandidateIndex<'a> {
    by_camera: HashMap<&'a str, Vec<&'a Detection>>,
}

impl<'a> CandidateIndex<'a> {
    fn build(candidates: &'a [Detection]) -> Self {
        let mut by_camera: HashMap<&str, Vec<&Detection>> = HashMap::new();
        for candidate in candidates {
            let person = matches!(candidate.label, Label::Face | Label::Person);
            if person && candidate.identity().is_some() {
                by_camera
                    .entry(candidate.camera.as_str())
                    .or_default()
                    .push(candidate);
            }
        }
        for list in by_camera.values_mut() {
            list.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        }
        Self { by_camera }
    }

    /// Minimal |Δt| strictly inside the window; ties go to the earlier sighting.
    fn nearest(&self, camera: &str, ts: f64, window: f64) -> Option<&'a Detection> {
        let list = self.by_camera.get(camera)?;
        let from = list.partition_point(|d| d.timestamp <= ts - window);
        list[from..]
            .iter()
            .take_while(|d| d.timestamp < ts + window)
            .copied()
            .min_by(|a, b| {
                let da = (a.timestamp - ts).abs();
                let db = (b.timestamp - ts).abs();
                da.total_cmp(&db)
                    .then_with(|| a.timestamp.total_cmp(&b.timestamp))
            })
    }
}
