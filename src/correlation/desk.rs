use crate::config::CorrelationConfig;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Static zone -> employee table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeskAssignments {
    desks: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct DeskFile {
    #[serde(default)]
    desks: BTreeMap<String, String>,
}

impl DeskAssignments {
    pub fn new(desks: BTreeMap<String, String>) -> Self {
        Self { desks }
    }

    /// Inline table from config, with the optional desk file merged over it.
    pub fn from_config(config: &CorrelationConfig) -> Result<Self> {
        let mut desks = config.desks.clone();
        if let Some(path) = &config.desk_assignments_file {
            desks.extend(read_desk_file(path)?);
        }
        Ok(Self { desks })
    }

    pub fn employee_for(&self, zone: &str) -> Option<&str> {
        self.desks.get(zone).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.desks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.desks.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DeskAssignments {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

fn read_desk_file(path: &Path) -> Result<BTreeMap<String, String>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read desk assignments {}: {}", path.display(), e))
    })?;
    let file: DeskFile = toml::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse desk assignments {}: {}", path.display(), e))
    })?;
    Ok(file.desks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn file_entries_override_inline_ones() {
        let path = std::env::temp_dir().join(format!("desks-{}.toml", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[desks]\ndesk_1 = \"Dana\"\ndesk_9 = \"Eve\"").unwrap();

        let config = CorrelationConfig {
            desks: [("desk_1", "Alice"), ("desk_2", "Bob")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            desk_assignments_file: Some(path.clone()),
            ..CorrelationConfig::default()
        };
        let desks = DeskAssignments::from_config(&config).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(desks.len(), 3);
        assert_eq!(desks.employee_for("desk_1"), Some("Dana"));
        assert_eq!(desks.employee_for("desk_2"), Some("Bob"));
        assert_eq!(desks.employee_for("desk_9"), Some("Eve"));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let config = CorrelationConfig {
            desk_assignments_file: Some("/nonexistent/desks.toml".into()),
            ..CorrelationConfig::default()
        };
        assert!(matches!(
            DeskAssignments::from_config(&config),
            Err(Error::Config(_))
        ));
    }
}
