use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::config::config_manager::PlacementDefaults;
use crate::core::descriptor::ResourceCost;
use crate::core::world::{CollisionVolume, LayerMask};

/// Requires a local axis of the placeable to face a world direction,
/// e.g. a ladder whose local +Z must face world forward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForcedAxis {
    pub local_axis: Vec3,
    pub world_target: Vec3,
}

impl ForcedAxis {
    pub fn up(local_axis: Vec3) -> Self {
        Self { local_axis, world_target: Vec3::Y }
    }

    pub fn forward(local_axis: Vec3) -> Self {
        Self { local_axis, world_target: Vec3::NEG_Z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacementParams {
    // Positions snap to multiples of this on every axis; <= 0 disables
    pub grid_size: f32,
    pub surface_offset: f32,
    pub snap_to_surface: bool,
    pub forced_axis: Option<ForcedAxis>,
    pub rotation_axis: Vec3,
    pub rotation_increment_deg: f32,
    pub blocking_layers: LayerMask,
    pub max_ray_distance: f32,
}

impl Default for PlacementParams {
    fn default() -> Self {
        Self::from_defaults(&PlacementDefaults::default())
    }
}

impl PlacementParams {
    pub fn from_defaults(defaults: &PlacementDefaults) -> Self {
        Self {
            grid_size: defaults.grid_size,
            surface_offset: defaults.surface_offset,
            snap_to_surface: false,
            forced_axis: None,
            rotation_axis: Vec3::Y,
            rotation_increment_deg: defaults.rotation_increment_deg,
            blocking_layers: LayerMask::default(),
            max_ray_distance: defaults.max_ray_distance,
        }
    }
}

/// Everything the cursor needs to know about one kind of placeable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceableDef {
    pub type_name: String,
    pub volume: CollisionVolume,
    pub cost: ResourceCost,
    pub params: PlacementParams,
}

impl PlaceableDef {
    pub fn new(type_name: impl Into<String>, volume: CollisionVolume) -> Self {
        Self {
            type_name: type_name.into(),
            volume,
            cost: ResourceCost::free(),
            params: PlacementParams::default(),
        }
    }

    pub fn with_cost(mut self, cost: ResourceCost) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_params(mut self, params: PlacementParams) -> Self {
        self.params = params;
        self
    }
}
