use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Object class attached to a detection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Label {
    Person,
    CellPhone,
    Face,
    Other(String),
}

impl Label {
    /// Spelling used in the timeline table's `data->>'label'`
    pub fn store_name(&self) -> &str {
        match self {
            Label::Person => "person",
            Label::CellPhone => "cell phone",
            Label::Face => "face",
            Label::Other(name) => name,
        }
    }
}

impl Display for Label {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Label::Person => write!(f, "person"),
            Label::CellPhone => write!(f, "cell_phone"),
            Label::Face => write!(f, "face"),
            Label::Other(name) => write!(f, "{}", name),
        }
    }
}

impl From<&str> for Label {
    fn from(s: &str) -> Self {
        match s {
            "person" => Label::Person,
            "cell phone" | "cell_phone" => Label::CellPhone,
            "face" => Label::Face,
            other => Label::Other(other.to_string()),
        }
    }
}

impl From<String> for Label {
    fn from(s: String) -> Self {
        Label::from(s.as_str())
    }
}

impl From<Label> for String {
    fn from(label: Label) -> Self {
        label.to_string()
    }
}

/// Identity recognised on a detection, with the recogniser's score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubLabel {
    pub name: String,
    pub score: Option<f64>,
}

/// One raw sensed event, read-only to this service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Unix seconds
    pub timestamp: f64,
    pub camera: String,
    pub label: Label,
    pub sub_label: Option<SubLabel>,
    /// Zone ids, primary zone first
    pub zones: Vec<String>,
    /// Tracked object id, used for media lookup
    pub source_id: String,
}

impl Detection {
    pub fn primary_zone(&self) -> Option<&str> {
        self.zones.first().map(String::as_str)
    }

    /// Identity name if the recogniser attached one
    pub fn identity(&self) -> Option<&str> {
        self.sub_label
            .as_ref()
            .map(|s| s.name.as_str())
            .filter(|name| !name.is_empty())
    }
}

/// Timeline table row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TimelineRow {
    pub timestamp: f64,
    pub camera: String,
    pub source_id: Option<String>,
    pub data: serde_json::Value,
}

impl From<TimelineRow> for Detection {
    fn from(row: TimelineRow) -> Self {
        let label = row
            .data
            .get("label")
            .and_then(|v| v.as_str())
            .map(Label::from)
            .unwrap_or_else(|| Label::Other(String::new()));

        let zones = row
            .data
            .get("zones")
            .and_then(|v| v.as_array())
            .map(|zones| {
                zones
                    .iter()
                    .filter_map(|z| z.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            timestamp: row.timestamp,
            camera: row.camera,
            label,
            sub_label: row.data.get("sub_label").and_then(parse_sub_label),
            zones,
            source_id: row.source_id.unwrap_or_default(),
        }
    }
}

// sub_label is stored either as ["name", score] or as a bare "name"
fn parse_sub_label(value: &serde_json::Value) -> Option<SubLabel> {
    match value {
        serde_json::Value::Array(items) => {
            let name = items.first()?.as_str()?.to_string();
            let score = items.get(1).and_then(|s| {
                s.as_f64()
                    .or_else(|| s.as_str().and_then(|s| s.parse::<f64>().ok()))
            });
            Some(SubLabel { name, score })
        }
        serde_json::Value::String(name) => Some(SubLabel {
            name: name.clone(),
            score: None,
        }),
        _ => None,
    }
}
