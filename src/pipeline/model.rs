use std::{
    fs, io,
    path::{Path, PathBuf},
};

use hashbrown::HashSet;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// A server record as loaded from disk. Never mutated after loading.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InputRecord {
    pub id: i32,
    pub location: String,
    pub uptime: i32,
    pub load: f32,
}

/// Per-id result row. Starts with both scores at zero and both flags down;
/// each filter raises its own flag at most once.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub id: i32,
    pub location: String,
    pub uptime: i32,
    pub load: f32,
    pub reliability: f32,
    pub stability: f32,
    pub passed_accelerator: bool,
    pub passed_external: bool,
}

impl ResultRecord {
    pub fn from_input(record: &InputRecord) -> Self {
        Self {
            id: record.id,
            location: record.location.clone(),
            uptime: record.uptime,
            load: record.load,
            reliability: 0.0,
            stability: 0.0,
            passed_accelerator: false,
            passed_external: false,
        }
    }

    pub fn apply_reliability(&mut self, reliability: f32) {
        self.reliability = reliability;
        self.passed_accelerator = true;
    }

    pub fn apply_stability(&mut self, stability: f32) {
        self.stability = stability;
        self.passed_external = true;
    }

    pub fn passed_both(&self) -> bool {
        self.passed_accelerator && self.passed_external
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot open {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed record file: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("record {id} has negative uptime {uptime}")]
    NegativeUptime { id: i32, uptime: i32 },
    #[error("record id {0} appears more than once")]
    DuplicateId(i32),
}

#[derive(Deserialize)]
struct RecordFile {
    servers: Vec<InputRecord>,
}

/// Reads a `{"servers": [...]}` document. An empty list is not an error
/// here; the orchestrator decides what an empty run means.
pub fn load_records(path: impl AsRef<Path>) -> Result<Vec<InputRecord>, LoadError> {
    let path = path.as_ref();
    let json = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let records = parse_records(&json)?;
    debug!(path = %path.display(), count = records.len(), "loaded records");
    Ok(records)
}

pub fn parse_records(json: &str) -> Result<Vec<InputRecord>, LoadError> {
    let file: RecordFile = serde_json::from_str(json)?;
    let mut seen = HashSet::with_capacity(file.servers.len());
    for record in &file.servers {
        if record.uptime < 0 {
            Err(LoadError::NegativeUptime {
                id: record.id,
                uptime: record.uptime,
            })?
        }
        if !seen.insert(record.id) {
            Err(LoadError::DuplicateId(record.id))?
        }
    }
    Ok(file.servers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_server_list_in_order() {
        let json = r#"{"servers": [
            {"id": 7, "location": "Vilnius", "uptime": 1200, "load": 0.25},
            {"id": 3, "location": "Kaunas", "uptime": 0, "load": 1.5}
        ]}"#;
        let records = parse_records(json).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, 7);
        assert_eq!(records[0].location, "Vilnius");
        assert_eq!(records[1].uptime, 0);
        assert_eq!(records[1].load, 1.5);
    }

    #[test]
    fn rejects_duplicate_ids() {
        let json = r#"{"servers": [
            {"id": 1, "location": "A", "uptime": 1, "load": 0.1},
            {"id": 1, "location": "B", "uptime": 2, "load": 0.2}
        ]}"#;
        assert!(matches!(parse_records(json), Err(LoadError::DuplicateId(1))));
    }

    #[test]
    fn rejects_negative_uptime() {
        let json = r#"{"servers": [{"id": 4, "location": "A", "uptime": -5, "load": 0.1}]}"#;
        assert!(matches!(
            parse_records(json),
            Err(LoadError::NegativeUptime { id: 4, uptime: -5 })
        ));
    }

    #[test]
    fn rejects_missing_fields() {
        let json = r#"{"servers": [{"id": 4, "uptime": 5, "load": 0.1}]}"#;
        assert!(matches!(parse_records(json), Err(LoadError::Malformed(_))));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let path = std::env::temp_dir().join("tandem-model-does-not-exist.json");
        assert!(matches!(load_records(&path), Err(LoadError::Io { .. })));
    }

    #[test]
    fn fresh_result_has_no_flags() {
        let input = InputRecord {
            id: 9,
            location: "Utena".into(),
            uptime: 10,
            load: 0.5,
        };
        let result = ResultRecord::from_input(&input);

        assert_eq!(result.reliability, 0.0);
        assert_eq!(result.stability, 0.0);
        assert!(!result.passed_accelerator);
        assert!(!result.passed_external);
        assert!(!result.passed_both());
    }
}
