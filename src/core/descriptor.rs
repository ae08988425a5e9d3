use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Transport-session-scoped identifier of a placed object
pub type NetworkId = u64;

// Unique identifier for network peers
pub type PeerId = Uuid;

// Identifies one in-flight commit between a requester and the authority
pub type RequestId = Uuid;

/// Position and orientation of a placed object in world space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    pub fn at(position: Vec3) -> Self {
        Self::new(position, Quat::IDENTITY)
    }

    // Equal within `epsilon` on every component
    pub fn approx_eq(&self, other: &Pose, epsilon: f32) -> bool {
        self.position.abs_diff_eq(other.position, epsilon)
            && (self.rotation.abs_diff_eq(other.rotation, epsilon)
                || self.rotation.abs_diff_eq(-other.rotation, epsilon))
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::at(Vec3::ZERO)
    }
}

/// Resource name to amount, e.g. `{"wood": 20, "stone": 5}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceCost(pub BTreeMap<String, u32>);

impl ResourceCost {
    pub fn free() -> Self {
        Self::default()
    }

    pub fn of(resource: &str, amount: u32) -> Self {
        Self::free().with(resource, amount)
    }

    pub fn with(mut self, resource: &str, amount: u32) -> Self {
        *self.0.entry(resource.to_string()).or_insert(0) += amount;
        self
    }

    pub fn is_free(&self) -> bool {
        self.0.values().all(|amount| *amount == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.0.iter().map(|(name, amount)| (name.as_str(), *amount))
    }
}

impl fmt::Display for ResourceCost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_free() {
            return write!(f, "free");
        }
        let parts: Vec<String> = self
            .iter()
            .map(|(name, amount)| format!("{} {}", amount, name))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// The serializable record identifying a placeable object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    pub type_name: String,
    pub pose: Pose,
    // None until the authority has created the object on the network
    pub network_id: Option<NetworkId>,
    pub owner_tag: String,
    pub created_at: DateTime<Utc>,
    pub cost: ResourceCost,
    pub metadata: BTreeMap<String, String>,
}

impl ObjectDescriptor {
    pub fn new(type_name: impl Into<String>, pose: Pose, owner_tag: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            pose,
            network_id: None,
            owner_tag: owner_tag.into(),
            created_at: Utc::now(),
            cost: ResourceCost::free(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_cost(mut self, cost: ResourceCost) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_network_id(mut self, network_id: NetworkId) -> Self {
        self.network_id = Some(network_id);
        self
    }

    pub fn is_assigned(&self) -> bool {
        self.network_id.is_some()
    }

    // Same placeable at the same spot, ignoring identity and bookkeeping
    pub fn same_placement(&self, other: &ObjectDescriptor) -> bool {
        self.type_name == other.type_name && self.pose.approx_eq(&other.pose, 1e-4)
    }
}

impl fmt::Display for ObjectDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.pose.position;
        match self.network_id {
            Some(id) => write!(f, "{}#{}@({}, {}, {})", self.type_name, id, p.x, p.y, p.z),
            None => write!(f, "{}@({}, {}, {})", self.type_name, p.x, p.y, p.z),
        }
    }
}
