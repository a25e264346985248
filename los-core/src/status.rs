//! Persisted completion-state tracking and reconciliation.
//!
//! The store keeps one record per broker request id ever observed under the
//! configured tag. Records are never hard-deleted: a request that vanishes
//! from the broker is tagged `deleted`, a terminal state, so a later run
//! cannot mistake a once-seen id for a new request. A retired id that
//! reappears on the broker stays retired; the design treats id reuse as a
//! new logical entity requiring operator awareness.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("unsupported status file schema version {found} (expected {SCHEMA_VERSION})")]
    UnsupportedSchema { found: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub ratio: f64,
    pub last_update: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
}

/// Classification of broker-reported state against the persisted records.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Ids seen on the broker for the first time.
    pub new: Vec<u32>,
    /// Known active ids whose completion ratio changed.
    pub update: Vec<u32>,
    /// Known active ids that disappeared from the broker's tagged set.
    pub delete: Vec<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StatusFile {
    schema_version: u32,
    requests: Vec<PersistedRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedRecord {
    id: u32,
    #[serde(flatten)]
    record: StatusRecord,
}

#[derive(Debug)]
pub struct StatusStore {
    path: PathBuf,
    records: BTreeMap<u32, StatusRecord>,
}

impl StatusStore {
    /// Load the store at `path`; a missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self, StatusError> {
        if !path.exists() {
            return Ok(Self {
                path: path.to_path_buf(),
                records: BTreeMap::new(),
            });
        }
        let file: StatusFile = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        if file.schema_version != SCHEMA_VERSION {
            return Err(StatusError::UnsupportedSchema {
                found: file.schema_version,
            });
        }
        let records = file
            .requests
            .into_iter()
            .map(|entry| (entry.id, entry.record))
            .collect();
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    pub fn save(&self) -> Result<(), StatusError> {
        let file = StatusFile {
            schema_version: SCHEMA_VERSION,
            requests: self
                .records
                .iter()
                .map(|(id, record)| PersistedRecord {
                    id: *id,
                    record: record.clone(),
                })
                .collect(),
        };
        std::fs::write(&self.path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    pub fn record(&self, id: u32) -> Option<&StatusRecord> {
        self.records.get(&id)
    }

    /// Diff broker-reported ratios against the persisted records.
    ///
    /// Retired records are permanently excluded from the update and delete
    /// sets; a retired id reappearing on the broker is only logged.
    pub fn classify(&self, broker: &BTreeMap<u32, f64>) -> Reconciliation {
        let mut outcome = Reconciliation::default();
        for (&id, &ratio) in broker {
            match self.records.get(&id) {
                None => outcome.new.push(id),
                Some(record) if record.deleted => {
                    warn!(id, "retired request id reappeared on the broker");
                }
                Some(record) if record.ratio != ratio => outcome.update.push(id),
                Some(_) => {}
            }
        }
        for (&id, record) in &self.records {
            if !record.deleted && !broker.contains_key(&id) {
                outcome.delete.push(id);
            }
        }
        outcome
    }

    /// Apply a classification: insert new records, refresh changed ratios,
    /// and retire disappeared ids.
    pub fn apply(
        &mut self,
        broker: &BTreeMap<u32, f64>,
        outcome: &Reconciliation,
        now: DateTime<Utc>,
    ) {
        for &id in &outcome.new {
            self.records.insert(
                id,
                StatusRecord {
                    ratio: broker.get(&id).copied().unwrap_or(0.0),
                    last_update: now,
                    deleted: false,
                },
            );
        }
        for &id in &outcome.update {
            if let Some(record) = self.records.get_mut(&id)
                && let Some(&ratio) = broker.get(&id)
            {
                record.ratio = ratio;
                record.last_update = now;
            }
        }
        for &id in &outcome.delete {
            if let Some(record) = self.records.get_mut(&id) {
                record.deleted = true;
                record.last_update = now;
            }
        }
        info!(
            new = outcome.new.len(),
            updated = outcome.update.len(),
            retired = outcome.delete.len(),
            "status records reconciled"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(records: &[(u32, f64, bool)]) -> StatusStore {
        let mut map = BTreeMap::new();
        for &(id, ratio, deleted) in records {
            map.insert(
                id,
                StatusRecord {
                    ratio,
                    last_update: Utc::now(),
                    deleted,
                },
            );
        }
        StatusStore {
            path: PathBuf::from("/unused"),
            records: map,
        }
    }

    #[test]
    fn test_classification_of_new_changed_and_gone() {
        let store = store_with(&[(1, 0.5, false), (3, 1.0, false)]);
        let broker = BTreeMap::from([(1, 0.5), (2, 1.0)]);

        let outcome = store.classify(&broker);
        assert_eq!(outcome.new, vec![2]);
        assert!(outcome.update.is_empty(), "unchanged ratio is no update");
        assert_eq!(outcome.delete, vec![3]);
    }

    #[test]
    fn test_changed_ratio_is_an_update() {
        let store = store_with(&[(1, 0.5, false)]);
        let broker = BTreeMap::from([(1, 0.75)]);
        assert_eq!(store.classify(&broker).update, vec![1]);
    }

    #[test]
    fn test_retired_id_never_reclassified() {
        let mut store = store_with(&[(4, 0.5, false)]);

        // Run 1: the request disappears and gets retired.
        let broker = BTreeMap::new();
        let outcome = store.classify(&broker);
        assert_eq!(outcome.delete, vec![4]);
        store.apply(&broker, &outcome, Utc::now());
        assert!(store.record(4).unwrap().deleted);

        // Run 2: it reappears with a different ratio; still no update.
        let broker = BTreeMap::from([(4, 0.9)]);
        let outcome = store.classify(&broker);
        assert!(outcome.new.is_empty());
        assert!(outcome.update.is_empty());
        assert!(outcome.delete.is_empty());

        // Run 3: it disappears again; still not re-deleted.
        let broker = BTreeMap::new();
        assert!(store.classify(&broker).delete.is_empty());
    }

    #[test]
    fn test_apply_inserts_and_retires() {
        let mut store = store_with(&[(1, 0.5, false), (3, 1.0, false)]);
        let broker = BTreeMap::from([(1, 0.5), (2, 1.0)]);
        let outcome = store.classify(&broker);
        let now = Utc::now();
        store.apply(&broker, &outcome, now);

        assert_eq!(store.record(2).unwrap().ratio, 1.0);
        assert!(!store.record(2).unwrap().deleted);
        assert!(store.record(3).unwrap().deleted);
        assert_eq!(store.record(3).unwrap().last_update, now);
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");

        let mut store = StatusStore::load(&path).unwrap();
        let broker = BTreeMap::from([(10, 0.25), (12, 1.0)]);
        let outcome = store.classify(&broker);
        store.apply(&broker, &outcome, Utc::now());
        store.save().unwrap();

        let reloaded = StatusStore::load(&path).unwrap();
        assert_eq!(reloaded.record(10).unwrap().ratio, 0.25);
        assert_eq!(reloaded.record(12).unwrap().ratio, 1.0);
    }

    #[test]
    fn test_unsupported_schema_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        std::fs::write(&path, r#"{"schema_version": 99, "requests": []}"#).unwrap();
        assert!(matches!(
            StatusStore::load(&path),
            Err(StatusError::UnsupportedSchema { found: 99 })
        ));
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let store = StatusStore::load(Path::new("/nonexistent/status.json")).unwrap();
        assert!(store.record(1).is_none());
    }
}
