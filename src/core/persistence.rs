use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use glam::{Quat, Vec3};
use log::info;
use serde::{Deserialize, Serialize};

use crate::core::descriptor::{ObjectDescriptor, Pose, ResourceCost};
use crate::core::error::PlacementError;

/// One saved object. Network ids are session-scoped and never written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub type_name: String,
    pub position: Vec3,
    pub rotation: Quat,
    #[serde(default)]
    pub owner_tag: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub cost: ResourceCost,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl PersistedRecord {
    // Rejects poses that would place the object at NaN
    fn check(&self) -> Result<(), String> {
        if !self.position.is_finite() {
            return Err(format!("position of {} is not finite", self.type_name));
        }
        if !self.rotation.is_finite() || self.rotation.length_squared() < 1e-12 {
            return Err(format!("rotation of {} is not a usable quaternion", self.type_name));
        }
        Ok(())
    }
}

impl From<&ObjectDescriptor> for PersistedRecord {
    fn from(descriptor: &ObjectDescriptor) -> Self {
        Self {
            type_name: descriptor.type_name.clone(),
            position: descriptor.pose.position,
            rotation: descriptor.pose.rotation,
            owner_tag: descriptor.owner_tag.clone(),
            created_at: descriptor.created_at,
            cost: descriptor.cost.clone(),
            metadata: descriptor.metadata.clone(),
        }
    }
}

impl From<PersistedRecord> for ObjectDescriptor {
    fn from(record: PersistedRecord) -> Self {
        Self {
            type_name: record.type_name,
            pose: Pose::new(record.position, record.rotation.normalize()),
            network_id: None,
            owner_tag: record.owner_tag,
            created_at: record.created_at,
            cost: record.cost,
            metadata: record.metadata,
        }
    }
}

/// Ordered list of records, stored as a pretty JSON array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersistedSnapshot {
    pub records: Vec<PersistedRecord>,
}

impl PersistedSnapshot {
    pub fn from_descriptors<'a>(descriptors: impl IntoIterator<Item = &'a ObjectDescriptor>) -> Self {
        Self { records: descriptors.into_iter().map(PersistedRecord::from).collect() }
    }

    pub fn into_descriptors(self) -> Vec<ObjectDescriptor> {
        self.records.into_iter().map(ObjectDescriptor::from).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// File side of save/load. Authority checks and re-creation live in the
/// placement manager; this only moves snapshots to and from disk.
pub struct PersistenceStore;

impl PersistenceStore {
    /// Writes the snapshot, replacing any existing file.
    pub fn write(path: &Path, snapshot: &PersistedSnapshot) -> Result<(), PlacementError> {
        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|source| PlacementError::PersistenceFormat { path: path.to_path_buf(), source })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|source| PlacementError::PersistenceIo { path: path.to_path_buf(), source })?;
        }
        fs::write(path, json).map_err(|source| PlacementError::PersistenceIo { path: path.to_path_buf(), source })?;
        info!("Saved {} placed objects to {}", snapshot.len(), path.display());
        Ok(())
    }

    /// Reads and parses the whole file. Nothing is returned unless every
    /// record parsed.
    pub fn read(path: &Path) -> Result<PersistedSnapshot, PlacementError> {
        let json = fs::read_to_string(path)
            .map_err(|source| PlacementError::PersistenceIo { path: path.to_path_buf(), source })?;
        let snapshot: PersistedSnapshot = serde_json::from_str(&json)
            .map_err(|source| PlacementError::PersistenceFormat { path: path.to_path_buf(), source })?;
        for (index, record) in snapshot.records.iter().enumerate() {
            if let Err(problem) = record.check() {
                let source: serde_json::Error = serde::de::Error::custom(format!("record {}: {}", index, problem));
                return Err(PlacementError::PersistenceFormat { path: path.to_path_buf(), source });
            }
        }
        info!("Read {} placed objects from {}", snapshot.len(), path.display());
        Ok(snapshot)
    }
}
