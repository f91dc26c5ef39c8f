//! Persistence of the last snapshot between runs.
//!
//! The document is a small JSON object:
//!
//! ```json
//! { "captured_at": "2026-01-05T08:00:00Z", "sections": { "Lec 1": "OPEN", "Dis 1A": "CLOSED" } }
//! ```
//!
//! Section order is preserved in both directions.

use crate::error::StateError;
use crate::types::{Section, SectionStatus, Snapshot};
use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// On-disk form of a [`Snapshot`].
#[derive(Debug, Serialize, Deserialize)]
struct PersistedSnapshot {
    #[serde(alias = "timestamp")]
    captured_at: DateTime<Utc>,
    sections: SectionMap,
}

/// Ordered `identifier -> status` map.
#[derive(Debug, Default)]
struct SectionMap(Vec<(String, SectionStatus)>);

impl Serialize for SectionMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (id, status) in &self.0 {
            map.serialize_entry(id, status)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for SectionMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SectionMapVisitor;

        impl<'de> Visitor<'de> for SectionMapVisitor {
            type Value = SectionMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of section identifiers to statuses")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((id, status)) = access.next_entry::<String, SectionStatus>()? {
                    entries.push((id, status));
                }
                Ok(SectionMap(entries))
            }
        }

        deserializer.deserialize_map(SectionMapVisitor)
    }
}

impl From<&Snapshot> for PersistedSnapshot {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            captured_at: snapshot.captured_at,
            sections: SectionMap(
                snapshot
                    .sections()
                    .iter()
                    .map(|s| (s.id.clone(), s.status))
                    .collect(),
            ),
        }
    }
}

impl From<PersistedSnapshot> for Snapshot {
    fn from(persisted: PersistedSnapshot) -> Self {
        let sections = persisted
            .sections
            .0
            .into_iter()
            .map(|(id, status)| Section::new(id, status))
            .collect();
        Snapshot::new(persisted.captured_at, sections)
    }
}

/// File-backed store for the last good snapshot.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the last snapshot.
    ///
    /// A missing, unreadable or malformed file yields `None`, the same as a first run.
    pub async fn load(&self) -> Option<Snapshot> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No previous state");
                return None;
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to read state; starting fresh"
                );
                return None;
            }
        };

        match serde_json::from_str::<PersistedSnapshot>(&content) {
            Ok(persisted) => {
                let snapshot = Snapshot::from(persisted);
                debug!(
                    path = %self.path.display(),
                    sections = snapshot.len(),
                    "Loaded previous state"
                );
                Some(snapshot)
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Malformed state file; starting fresh"
                );
                None
            }
        }
    }

    /// Writes the snapshot, creating the parent directory if needed.
    ///
    /// The file is written next to the target and renamed into place.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(&PersistedSnapshot::from(snapshot))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        debug!(path = %self.path.display(), sections = snapshot.len(), "Saved state");
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> StateError {
        StateError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}
