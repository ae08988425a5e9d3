// godot_world.rs
use std::collections::HashMap;

use godot::classes::{Node3D, PackedScene, RigidBody3D};
use godot::prelude::*;
use log::warn;

use crate::core::descriptor::{ObjectDescriptor, Pose};
use crate::core::world::{LocalHandle, ObservedObject, WorldAdapter};

const META_NETWORK_ID: &str = "network_id";
const META_TYPE_NAME: &str = "type_name";
const META_OWNER_TAG: &str = "owner_tag";

/// Places objects as children of a scene node. Handles are Godot instance ids,
/// and the network id lives in node metadata so scans also find objects that
/// scripts spawned directly.
pub struct GodotWorld {
    root: Gd<Node3D>,
    scenes: HashMap<String, Gd<PackedScene>>,
}

impl GodotWorld {
    pub fn new(root: Gd<Node3D>) -> Self {
        Self { root, scenes: HashMap::new() }
    }

    pub fn register_scene(&mut self, type_name: &str, scene: Gd<PackedScene>) {
        self.scenes.insert(type_name.to_string(), scene);
    }

    fn node(&self, handle: LocalHandle) -> Option<Gd<Node3D>> {
        let id = InstanceId::try_from_i64(handle.0 as i64)?;
        Gd::<Node3D>::try_from_instance_id(id).ok()
    }

    fn handle_of(node: &Gd<Node3D>) -> LocalHandle {
        LocalHandle(node.instance_id().to_i64() as u64)
    }

    fn observe(node: &Gd<Node3D>) -> Option<ObservedObject> {
        if !node.has_meta(META_NETWORK_ID) {
            return None;
        }
        let network_id = node.get_meta(META_NETWORK_ID).try_to::<i64>().ok()?;
        let type_name = node.get_meta(META_TYPE_NAME).try_to::<GString>().ok()?.to_string();
        let owner_tag = node
            .get_meta(META_OWNER_TAG)
            .try_to::<GString>()
            .map(|tag| tag.to_string())
            .unwrap_or_default();

        let position = node.get_position();
        let rotation = node.get_quaternion();
        let pose = Pose::new(
            glam::Vec3::new(position.x, position.y, position.z),
            glam::Quat::from_xyzw(rotation.x, rotation.y, rotation.z, rotation.w),
        );
        let descriptor = ObjectDescriptor::new(type_name, pose, owner_tag).with_network_id(network_id as u64);
        Some(ObservedObject { handle: Self::handle_of(node), descriptor })
    }
}

fn apply_pose(node: &mut Gd<Node3D>, pose: &Pose) {
    let p = pose.position;
    let q = pose.rotation;
    node.set_position(Vector3::new(p.x, p.y, p.z));
    node.set_quaternion(Quaternion::new(q.x, q.y, q.z, q.w));
}

impl WorldAdapter for GodotWorld {
    fn instantiate(&mut self, descriptor: &ObjectDescriptor) -> LocalHandle {
        let mut node = match self.scenes.get(&descriptor.type_name) {
            Some(scene) => scene.try_instantiate_as::<Node3D>().unwrap_or_else(|| {
                warn!("Scene for {} has no Node3D root", descriptor.type_name);
                Node3D::new_alloc()
            }),
            None => {
                warn!("No scene registered for {}", descriptor.type_name);
                Node3D::new_alloc()
            }
        };

        apply_pose(&mut node, &descriptor.pose);
        if let Some(network_id) = descriptor.network_id {
            node.set_meta(META_NETWORK_ID, &(network_id as i64).to_variant());
        }
        node.set_meta(META_TYPE_NAME, &GString::from(descriptor.type_name.as_str()).to_variant());
        node.set_meta(META_OWNER_TAG, &GString::from(descriptor.owner_tag.as_str()).to_variant());
        self.root.add_child(&node);
        Self::handle_of(&node)
    }

    fn destroy(&mut self, handle: LocalHandle) {
        if let Some(mut node) = self.node(handle) {
            node.queue_free();
        }
    }

    fn set_pose(&mut self, handle: LocalHandle, pose: &Pose) {
        if let Some(mut node) = self.node(handle) {
            apply_pose(&mut node, pose);
        }
    }

    fn settle(&mut self, handle: LocalHandle) {
        let Some(node) = self.node(handle) else { return };
        if let Ok(mut body) = node.try_cast::<RigidBody3D>() {
            body.set_linear_velocity(Vector3::ZERO);
            body.set_angular_velocity(Vector3::ZERO);
            body.set_sleeping(true);
        }
    }

    fn scan(&self) -> Vec<ObservedObject> {
        self.root
            .get_children()
            .iter_shared()
            .filter_map(|child| child.try_cast::<Node3D>().ok())
            .filter(|node| !node.is_queued_for_deletion())
            .filter_map(|node| Self::observe(&node))
            .collect()
    }

    fn contains(&self, handle: LocalHandle) -> bool {
        self.node(handle).is_some_and(|node| !node.is_queued_for_deletion())
    }
}
