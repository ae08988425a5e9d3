use std::sync::{Arc, Mutex};
use std::time::Instant;

use glam::Vec3;

use crate::config::config_manager::PlacementConfiguration;
use crate::core::descriptor::ResourceCost;
use crate::core::event_bus::{EventBus, PlacementRejected};
use crate::core::inventory::ResourcePool;
use crate::core::placement_manager::PlacementManager;
use crate::core::world::{CollisionVolume, LocalWorld, Ray};
use crate::networking::loopback::{LoopbackHub, LoopbackTransport};
use crate::placement::cursor::{GridCursor, PlacementCandidate};
use crate::placement::params::PlaceableDef;

pub type TestPeer = PlacementManager<LoopbackTransport, LocalWorld, ResourcePool>;

pub fn stocked() -> ResourcePool {
    ResourcePool::new().with("wood", 100).with("stone", 100)
}

pub fn join(hub: &LoopbackHub, inventory: ResourcePool) -> TestPeer {
    PlacementManager::new(
        hub.join(),
        LocalWorld::flat(50.0),
        inventory,
        PlacementConfiguration::default(),
        Arc::new(EventBus::new()),
    )
}

/// Runs every peer's logic loop until the wire is quiet.
pub fn settle(peers: &mut [&mut TestPeer], now: Instant) {
    for _ in 0..64 {
        let handled: usize = peers.iter_mut().map(|peer| peer.update(now)).sum();
        if handled == 0 {
            return;
        }
    }
    panic!("peers never went quiet");
}

pub fn wall() -> PlaceableDef {
    PlaceableDef::new("wall", CollisionVolume::grounded(Vec3::splat(0.5))).with_cost(ResourceCost::of("wood", 8))
}

pub fn lamp() -> PlaceableDef {
    PlaceableDef::new("lamp", CollisionVolume::grounded(Vec3::splat(0.25)))
}

// Aims the cursor straight down at (x, z) on the peer's own world
pub fn aim(peer: &TestPeer, placeable: PlaceableDef, x: f32, z: f32) -> PlacementCandidate {
    let mut cursor = GridCursor::new(placeable);
    cursor.update(&Ray::new(Vec3::new(x, 10.0, z), Vec3::NEG_Y), peer.world());
    cursor.candidate("tester")
}

pub fn record_rejections(peer: &TestPeer) -> Arc<Mutex<Vec<PlacementRejected>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    peer.events().subscribe(move |event: &PlacementRejected| {
        sink.lock().unwrap().push(event.clone());
    });
    seen
}
