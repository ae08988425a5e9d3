use std::collections::BTreeMap;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::core::descriptor::{NetworkId, ObjectDescriptor, Pose};

// Engine-side handle of an instantiated representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalHandle(pub u64);

/// Bit set of collision layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerMask(pub u32);

impl LayerMask {
    pub const NONE: LayerMask = LayerMask(0);
    pub const ALL: LayerMask = LayerMask(u32::MAX);
    pub const TERRAIN: LayerMask = LayerMask(1 << 0);
    pub const STRUCTURE: LayerMask = LayerMask(1 << 1);
    pub const PLACED: LayerMask = LayerMask(1 << 2);

    pub fn intersects(self, other: LayerMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn union(self, other: LayerMask) -> LayerMask {
        LayerMask(self.0 | other.0)
    }
}

impl Default for LayerMask {
    fn default() -> Self {
        LayerMask::STRUCTURE.union(LayerMask::PLACED)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction: direction.normalize_or_zero() }
    }

    pub fn at(&self, distance: f32) -> Vec3 {
        self.origin + self.direction * distance
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceHit {
    pub point: Vec3,
    pub normal: Vec3,
    pub distance: f32,
}

/// Box-shaped collision volume centered on the pose, expressed in local space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CollisionVolume {
    pub half_extents: Vec3,
    // Offset of the box center from the pose origin
    pub center: Vec3,
}

impl CollisionVolume {
    pub fn cuboid(half_extents: Vec3) -> Self {
        Self { half_extents, center: Vec3::ZERO }
    }

    // Box resting on the pose origin instead of centered on it
    pub fn grounded(half_extents: Vec3) -> Self {
        Self { half_extents, center: Vec3::new(0.0, half_extents.y, 0.0) }
    }

    pub fn corners(&self, pose: &Pose) -> [Vec3; 8] {
        let h = self.half_extents;
        let mut out = [Vec3::ZERO; 8];
        for (i, corner) in out.iter_mut().enumerate() {
            let local = Vec3::new(
                if i & 1 == 0 { -h.x } else { h.x },
                if i & 2 == 0 { -h.y } else { h.y },
                if i & 4 == 0 { -h.z } else { h.z },
            ) + self.center;
            *corner = pose.position + pose.rotation * local;
        }
        out
    }

    // Corners of the face that points down in local space
    pub fn footprint(&self, pose: &Pose) -> [Vec3; 4] {
        let corners = self.corners(pose);
        [corners[0], corners[1], corners[4], corners[5]]
    }

    pub fn bounds(&self, pose: &Pose) -> Aabb {
        Aabb::enclosing(&self.corners(pose))
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min: min.min(max), max: min.max(max) }
    }

    pub fn enclosing(points: &[Vec3]) -> Self {
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for p in points {
            min = min.min(*p);
            max = max.max(*p);
        }
        Self { min, max }
    }

    // Touching faces do not count as overlap
    pub fn overlaps(&self, other: &Aabb) -> bool {
        const SKIN: f32 = 1e-4;
        self.min.x < other.max.x - SKIN
            && self.max.x > other.min.x + SKIN
            && self.min.y < other.max.y - SKIN
            && self.max.y > other.min.y + SKIN
            && self.min.z < other.max.z - SKIN
            && self.max.z > other.min.z + SKIN
    }

    pub fn contains_xz(&self, point: Vec3) -> bool {
        point.x >= self.min.x && point.x <= self.max.x && point.z >= self.min.z && point.z <= self.max.z
    }
}

/// A representation found by a world scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedObject {
    pub handle: LocalHandle,
    pub descriptor: ObjectDescriptor,
}

impl ObservedObject {
    pub fn network_id(&self) -> Option<NetworkId> {
        self.descriptor.network_id
    }
}

/// Read-only physics queries the placement cursor needs.
pub trait SpatialQuery {
    fn raycast(&self, ray: &Ray, max_distance: f32) -> Option<SurfaceHit>;

    // True when the volume at `pose` intersects anything on `layers`
    fn check_overlap(&self, volume: &CollisionVolume, pose: &Pose, layers: LayerMask) -> bool;

    // True when the whole footprint rests on a valid surface
    fn is_supported(&self, volume: &CollisionVolume, pose: &Pose) -> bool;
}

/// Creates and destroys the visible/physical representation of placed objects.
pub trait WorldAdapter {
    fn instantiate(&mut self, descriptor: &ObjectDescriptor) -> LocalHandle;

    fn destroy(&mut self, handle: LocalHandle);

    fn set_pose(&mut self, handle: LocalHandle, pose: &Pose);

    // Brings a representation to rest after its owner lets go
    fn settle(&mut self, handle: LocalHandle);

    // Every live representation tagged with a network id
    fn scan(&self) -> Vec<ObservedObject>;

    fn contains(&self, handle: LocalHandle) -> bool;
}

/// Horizontal-or-tilted walkable plane bounded in the xz plane.
#[derive(Debug, Clone, PartialEq)]
pub struct Surface {
    pub point: Vec3,
    pub normal: Vec3,
    pub bounds: Aabb,
}

impl Surface {
    pub fn ground(height: f32, half_size: f32) -> Self {
        Self {
            point: Vec3::new(0.0, height, 0.0),
            normal: Vec3::Y,
            bounds: Aabb::new(
                Vec3::new(-half_size, height, -half_size),
                Vec3::new(half_size, height, half_size),
            ),
        }
    }

    fn intersect(&self, ray: &Ray) -> Option<f32> {
        let denom = self.normal.dot(ray.direction);
        if denom.abs() < 1e-6 {
            return None;
        }
        let t = (self.point - ray.origin).dot(self.normal) / denom;
        (t >= 0.0).then_some(t)
    }

    fn supports(&self, point: Vec3, tolerance: f32) -> bool {
        self.bounds.contains_xz(point) && (point - self.point).dot(self.normal).abs() <= tolerance
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Solid {
    pub bounds: Aabb,
    pub layer: LayerMask,
}

#[derive(Debug, Clone)]
struct Representation {
    descriptor: ObjectDescriptor,
    volume: CollisionVolume,
    resting: bool,
}

/// In-memory world used by headless peers and tests.
///
/// Placed objects take their collision volume from the footprint table
/// registered per type name; unknown types get a unit cube.
#[derive(Debug, Clone, Default)]
pub struct LocalWorld {
    surfaces: Vec<Surface>,
    solids: Vec<Solid>,
    footprints: BTreeMap<String, CollisionVolume>,
    objects: BTreeMap<LocalHandle, Representation>,
    next_handle: u64,
    support_tolerance: f32,
}

impl LocalWorld {
    pub fn new() -> Self {
        Self { support_tolerance: 0.05, ..Default::default() }
    }

    // Flat ground plane centered on the origin
    pub fn flat(half_size: f32) -> Self {
        let mut world = Self::new();
        world.add_surface(Surface::ground(0.0, half_size));
        world
    }

    pub fn add_surface(&mut self, surface: Surface) {
        self.surfaces.push(surface);
    }

    pub fn add_solid(&mut self, bounds: Aabb, layer: LayerMask) {
        self.solids.push(Solid { bounds, layer });
    }

    pub fn register_footprint(&mut self, type_name: &str, volume: CollisionVolume) {
        self.footprints.insert(type_name.to_string(), volume);
    }

    fn footprint_of(&self, type_name: &str) -> CollisionVolume {
        self.footprints
            .get(type_name)
            .copied()
            .unwrap_or_else(|| CollisionVolume::grounded(Vec3::splat(0.5)))
    }

    /// Spawns a representation directly, the way scripted events do,
    /// without going through replication.
    pub fn spawn_untracked(&mut self, descriptor: ObjectDescriptor) -> LocalHandle {
        self.instantiate(&descriptor)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn descriptor(&self, handle: LocalHandle) -> Option<&ObjectDescriptor> {
        self.objects.get(&handle).map(|r| &r.descriptor)
    }

    pub fn find_by_network_id(&self, network_id: NetworkId) -> Option<LocalHandle> {
        self.objects
            .iter()
            .find(|(_, r)| r.descriptor.network_id == Some(network_id))
            .map(|(handle, _)| *handle)
    }

    pub fn is_resting(&self, handle: LocalHandle) -> bool {
        self.objects.get(&handle).is_some_and(|r| r.resting)
    }

    pub fn count_of_type(&self, type_name: &str) -> usize {
        self.objects.values().filter(|r| r.descriptor.type_name == type_name).count()
    }
}

impl SpatialQuery for LocalWorld {
    fn raycast(&self, ray: &Ray, max_distance: f32) -> Option<SurfaceHit> {
        self.surfaces
            .iter()
            .filter_map(|surface| {
                let distance = surface.intersect(ray)?;
                let point = ray.at(distance);
                (distance <= max_distance && surface.bounds.contains_xz(point)).then_some(SurfaceHit {
                    point,
                    normal: surface.normal,
                    distance,
                })
            })
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }

    fn check_overlap(&self, volume: &CollisionVolume, pose: &Pose, layers: LayerMask) -> bool {
        let bounds = volume.bounds(pose);
        let hits_solid = self
            .solids
            .iter()
            .any(|solid| solid.layer.intersects(layers) && solid.bounds.overlaps(&bounds));
        if hits_solid {
            return true;
        }
        layers.intersects(LayerMask::PLACED)
            && self
                .objects
                .values()
                .any(|r| r.volume.bounds(&r.descriptor.pose).overlaps(&bounds))
    }

    fn is_supported(&self, volume: &CollisionVolume, pose: &Pose) -> bool {
        volume.footprint(pose).iter().all(|corner| {
            self.surfaces
                .iter()
                .any(|surface| surface.supports(*corner, self.support_tolerance))
        })
    }
}

impl WorldAdapter for LocalWorld {
    fn instantiate(&mut self, descriptor: &ObjectDescriptor) -> LocalHandle {
        self.next_handle += 1;
        let handle = LocalHandle(self.next_handle);
        let volume = self.footprint_of(&descriptor.type_name);
        self.objects.insert(
            handle,
            Representation { descriptor: descriptor.clone(), volume, resting: true },
        );
        handle
    }

    fn destroy(&mut self, handle: LocalHandle) {
        self.objects.remove(&handle);
    }

    fn set_pose(&mut self, handle: LocalHandle, pose: &Pose) {
        if let Some(representation) = self.objects.get_mut(&handle) {
            representation.descriptor.pose = *pose;
            representation.resting = false;
        }
    }

    fn settle(&mut self, handle: LocalHandle) {
        if let Some(representation) = self.objects.get_mut(&handle) {
            representation.resting = true;
        }
    }

    fn scan(&self) -> Vec<ObservedObject> {
        self.objects
            .iter()
            .filter(|(_, r)| r.descriptor.network_id.is_some())
            .map(|(handle, r)| ObservedObject { handle: *handle, descriptor: r.descriptor.clone() })
            .collect()
    }

    fn contains(&self, handle: LocalHandle) -> bool {
        self.objects.contains_key(&handle)
    }
}

// Rotation taking world-up onto `normal`
pub fn align_up_to(normal: Vec3) -> Quat {
    let normal = normal.normalize_or_zero();
    if normal == Vec3::ZERO {
        return Quat::IDENTITY;
    }
    Quat::from_rotation_arc(Vec3::Y, normal)
}
