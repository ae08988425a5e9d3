use glam::{Quat, Vec3};

use crate::core::descriptor::{ObjectDescriptor, Pose};
use crate::core::error::InvalidReason;
use crate::core::world::{Ray, SpatialQuery, align_up_to};
use crate::placement::params::{PlaceableDef, PlacementParams};

/// The cursor's latest candidate pose and whether it may be committed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preview {
    pub pose: Pose,
    pub invalid: Option<InvalidReason>,
}

impl Preview {
    pub fn is_valid(&self) -> bool {
        self.invalid.is_none()
    }
}

/// What the cursor hands to the commit pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementCandidate {
    pub descriptor: ObjectDescriptor,
    // Result of the last validity check
    pub validity: Result<(), InvalidReason>,
}

/// Local-only placement preview. Nothing here touches the network.
#[derive(Debug, Clone)]
pub struct GridCursor {
    placeable: PlaceableDef,
    rotation_steps: i32,
    last: Option<Preview>,
    surface_missed: bool,
}

impl GridCursor {
    pub fn new(placeable: PlaceableDef) -> Self {
        Self { placeable, rotation_steps: 0, last: None, surface_missed: false }
    }

    pub fn placeable(&self) -> &PlaceableDef {
        &self.placeable
    }

    // Switching placeables keeps the accumulated rotation
    pub fn select(&mut self, placeable: PlaceableDef) {
        self.placeable = placeable;
        self.last = None;
        self.surface_missed = false;
    }

    // User rotation input, in increments
    pub fn rotate(&mut self, steps: i32) {
        self.rotation_steps = self.rotation_steps.wrapping_add(steps);
    }

    pub fn rotation_steps(&self) -> i32 {
        self.rotation_steps
    }

    pub fn last_preview(&self) -> Option<&Preview> {
        self.last.as_ref()
    }

    /// Recomputes the candidate pose for this tick.
    pub fn update<Q: SpatialQuery>(&mut self, ray: &Ray, world: &Q) -> Option<&Preview> {
        let params = &self.placeable.params;
        let Some(hit) = world.raycast(ray, params.max_ray_distance) else {
            self.last = None;
            self.surface_missed = true;
            return None;
        };
        self.surface_missed = false;

        let pose = Pose::new(
            snap_position(hit.point, hit.normal, params),
            compose_rotation(hit.normal, params, self.rotation_steps),
        );
        let volume = &self.placeable.volume;
        let invalid = if world.check_overlap(volume, &pose, params.blocking_layers) {
            Some(InvalidReason::Overlap)
        } else if !world.is_supported(volume, &pose) {
            Some(InvalidReason::Unsupported)
        } else {
            None
        };

        self.last = Some(Preview { pose, invalid });
        self.last.as_ref()
    }

    pub fn validity(&self) -> Result<(), InvalidReason> {
        match (&self.last, self.surface_missed) {
            (Some(preview), _) => preview.invalid.map_or(Ok(()), Err),
            (None, true) => Err(InvalidReason::NoSurface),
            (None, false) => Err(InvalidReason::NoPreview),
        }
    }

    pub fn candidate(&self, owner_tag: &str) -> PlacementCandidate {
        let pose = self.last.map(|p| p.pose).unwrap_or_default();
        let descriptor = ObjectDescriptor::new(self.placeable.type_name.clone(), pose, owner_tag)
            .with_cost(self.placeable.cost.clone());
        PlacementCandidate { descriptor, validity: self.validity() }
    }
}

/// Offsets along the surface normal, then rounds every axis to the grid.
pub fn snap_position(point: Vec3, normal: Vec3, params: &PlacementParams) -> Vec3 {
    let offset = point + normal.normalize_or_zero() * params.surface_offset;
    if params.grid_size <= 0.0 {
        return offset;
    }
    (offset / params.grid_size).round() * params.grid_size
}

/// `align * forced * user`: user increments are applied in local space first.
pub fn compose_rotation(normal: Vec3, params: &PlacementParams, steps: i32) -> Quat {
    let align = if params.snap_to_surface { align_up_to(normal) } else { Quat::IDENTITY };

    let forced = params.forced_axis.map_or(Quat::IDENTITY, |forced| {
        let from = forced.local_axis.normalize_or_zero();
        let to = forced.world_target.normalize_or_zero();
        if from == Vec3::ZERO || to == Vec3::ZERO {
            Quat::IDENTITY
        } else {
            Quat::from_rotation_arc(from, to)
        }
    });

    let axis = params.rotation_axis.normalize_or_zero();
    let user = if axis == Vec3::ZERO {
        Quat::IDENTITY
    } else {
        Quat::from_axis_angle(axis, (steps as f32 * params.rotation_increment_deg).to_radians())
    };

    (align * forced * user).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::descriptor::{NetworkId, ResourceCost};
    use crate::core::world::{Aabb, CollisionVolume, LayerMask, LocalWorld, Surface, WorldAdapter};
    use crate::placement::params::ForcedAxis;

    fn crate_def() -> PlaceableDef {
        PlaceableDef::new("crate", CollisionVolume::grounded(Vec3::splat(0.5))).with_cost(ResourceCost::of("wood", 2))
    }

    fn down_at(x: f32, z: f32) -> Ray {
        Ray::new(Vec3::new(x, 10.0, z), Vec3::NEG_Y)
    }

    #[test]
    fn position_rounds_to_grid() {
        let world = LocalWorld::flat(20.0);
        let mut cursor = GridCursor::new(crate_def());

        let preview = *cursor.update(&down_at(1.3, 2.6), &world).unwrap();
        assert!(preview.pose.position.abs_diff_eq(Vec3::new(1.0, 0.0, 3.0), 1e-5));
        assert!(preview.is_valid());
    }

    #[test]
    fn surface_offset_is_applied_before_snapping() {
        let params = PlacementParams { grid_size: 0.5, surface_offset: 0.6, ..PlacementParams::default() };
        let position = snap_position(Vec3::new(0.2, 0.0, 0.0), Vec3::Y, &params);
        assert!(position.abs_diff_eq(Vec3::new(0.0, 0.5, 0.0), 1e-5));
    }

    #[test]
    fn zero_grid_disables_snapping() {
        let params = PlacementParams { grid_size: 0.0, ..PlacementParams::default() };
        let point = Vec3::new(0.37, 0.0, -1.21);
        assert_eq!(snap_position(point, Vec3::Y, &params), point);
    }

    #[test]
    fn user_steps_rotate_about_allowed_axis() {
        let params = PlacementParams::default();
        let rotation = compose_rotation(Vec3::Y, &params, 1);
        assert!((rotation * Vec3::X).abs_diff_eq(Vec3::NEG_Z, 1e-5));
        let full_turn = compose_rotation(Vec3::Y, &params, 4);
        assert!((full_turn * Vec3::X).abs_diff_eq(Vec3::X, 1e-5));
    }

    #[test]
    fn surface_snap_aligns_up_with_normal() {
        let normal = Vec3::new(0.0, 1.0, 1.0).normalize();
        let params = PlacementParams { snap_to_surface: true, ..PlacementParams::default() };
        let rotation = compose_rotation(normal, &params, 0);
        assert!((rotation * Vec3::Y).abs_diff_eq(normal, 1e-5));
    }

    #[test]
    fn forced_axis_points_local_axis_at_target() {
        let params = PlacementParams { forced_axis: Some(ForcedAxis::up(Vec3::Z)), ..PlacementParams::default() };
        let rotation = compose_rotation(Vec3::Y, &params, 0);
        assert!((rotation * Vec3::Z).abs_diff_eq(Vec3::Y, 1e-5));
    }

    #[test]
    fn overlapping_geometry_invalidates_preview() {
        let mut world = LocalWorld::flat(20.0);
        world.add_solid(Aabb::new(Vec3::new(2.5, 0.0, -0.5), Vec3::new(3.5, 3.0, 0.5)), LayerMask::STRUCTURE);
        let mut cursor = GridCursor::new(crate_def());

        cursor.update(&down_at(3.1, 0.2), &world);
        assert_eq!(cursor.validity(), Err(InvalidReason::Overlap));
        cursor.update(&down_at(6.0, 0.0), &world);
        assert_eq!(cursor.validity(), Ok(()));
    }

    #[test]
    fn placed_objects_invalidate_preview() {
        let mut world = LocalWorld::flat(20.0);
        world.register_footprint("crate", CollisionVolume::grounded(Vec3::splat(0.5)));
        let id: NetworkId = 1;
        world.instantiate(&ObjectDescriptor::new("crate", Pose::at(Vec3::ZERO), "bob").with_network_id(id));

        let mut cursor = GridCursor::new(crate_def());
        cursor.update(&down_at(0.1, -0.2), &world);
        assert_eq!(cursor.validity(), Err(InvalidReason::Overlap));
    }

    #[test]
    fn hanging_off_an_edge_is_unsupported() {
        let mut world = LocalWorld::new();
        world.add_surface(Surface::ground(0.0, 2.0));
        let mut cursor = GridCursor::new(crate_def());

        cursor.update(&down_at(1.9, 0.0), &world);
        assert_eq!(cursor.validity(), Err(InvalidReason::Unsupported));
    }

    #[test]
    fn missing_the_world_leaves_nothing_to_commit() {
        let world = LocalWorld::flat(5.0);
        let mut cursor = GridCursor::new(crate_def());
        assert_eq!(cursor.validity(), Err(InvalidReason::NoPreview));

        assert!(cursor.update(&down_at(50.0, 0.0), &world).is_none());
        assert_eq!(cursor.candidate("alice").validity, Err(InvalidReason::NoSurface));
    }

    #[test]
    fn selecting_after_a_miss_needs_a_new_preview() {
        let world = LocalWorld::flat(5.0);
        let mut cursor = GridCursor::new(crate_def());
        cursor.update(&down_at(50.0, 0.0), &world);
        assert_eq!(cursor.validity(), Err(InvalidReason::NoSurface));

        cursor.select(crate_def().with_cost(ResourceCost::of("stone", 1)));
        assert_eq!(cursor.validity(), Err(InvalidReason::NoPreview));
    }

    #[test]
    fn candidate_carries_type_cost_and_pose() {
        let world = LocalWorld::flat(20.0);
        let mut cursor = GridCursor::new(crate_def());
        cursor.rotate(1);
        cursor.update(&down_at(4.2, 0.0), &world);

        let candidate = cursor.candidate("alice");
        assert_eq!(candidate.validity, Ok(()));
        assert_eq!(candidate.descriptor.type_name, "crate");
        assert_eq!(candidate.descriptor.owner_tag, "alice");
        assert_eq!(candidate.descriptor.cost, ResourceCost::of("wood", 2));
        assert!(candidate.descriptor.network_id.is_none());
        assert!(candidate.descriptor.pose.position.abs_diff_eq(Vec3::new(4.0, 0.0, 0.0), 1e-5));
    }
}
