use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use glam::{Quat, Vec3};
use pretty_assertions::assert_eq;

use super::harness::*;
use crate::core::descriptor::{ObjectDescriptor, Pose, ResourceCost};
use crate::core::error::{InvalidReason, PlacementError};
use crate::core::event_bus::ObjectPlaced;
use crate::core::inventory::ResourcePool;
use crate::core::placement_manager::CommitOutcome;
use crate::core::world::WorldAdapter;
use crate::networking::loopback::LoopbackHub;

#[test]
fn authority_commit_replicates_to_every_peer() {
    let hub = LoopbackHub::new(1);
    let now = Instant::now();
    let mut a = join(&hub, stocked());
    let mut b = join(&hub, stocked());
    let mut c = join(&hub, stocked());
    settle(&mut [&mut a, &mut b, &mut c], now);
    assert!(a.is_authority());

    let outcome = a.commit(aim(&a, wall(), 5.2, 0.0), now).unwrap();
    assert_eq!(outcome, CommitOutcome::Created(1));
    settle(&mut [&mut a, &mut b, &mut c], now);

    for peer in [&a, &b, &c] {
        assert_eq!(peer.replica_ids(), vec![1]);
        let placed = peer.replica(1).unwrap();
        assert_eq!(placed.type_name, "wall");
        assert!(placed.pose.position.abs_diff_eq(Vec3::new(5.0, 0.0, 0.0), 1e-5));
    }
    assert_eq!(a.registry().len(), 1);
    assert!(b.registry().is_empty());
    assert_eq!(a.inventory().amount("wood"), 92);
}

#[test]
fn forwarded_commit_is_confirmed_to_the_requester() {
    let hub = LoopbackHub::new(2);
    let now = Instant::now();
    let mut a = join(&hub, stocked());
    let mut b = join(&hub, stocked());
    settle(&mut [&mut a, &mut b], now);

    let confirmed = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&confirmed);
    b.events().subscribe(move |event: &ObjectPlaced| {
        sink.lock().unwrap().push(event.confirmed_request);
    });

    let CommitOutcome::Pending(request_id) = b.commit(aim(&b, wall(), -3.0, 2.0), now).unwrap() else {
        panic!("non-authority commit must be forwarded");
    };
    assert_eq!(b.pending().len(), 1);
    assert_eq!(b.inventory().amount("wood"), 92);
    // Nothing canonical until the authority answers
    assert!(b.replica_ids().is_empty());

    settle(&mut [&mut a, &mut b], now);
    assert!(b.pending().is_empty());
    assert_eq!(b.replica_ids(), a.registry().ids());
    assert_eq!(*confirmed.lock().unwrap(), vec![Some(request_id)]);
    // The authority does not charge the requester a second time
    assert_eq!(a.inventory().amount("wood"), 100);
}

#[test]
fn invalid_placement_never_reaches_the_wire() {
    let hub = LoopbackHub::new(3);
    let now = Instant::now();
    let mut a = join(&hub, stocked());
    let mut b = join(&hub, stocked());
    settle(&mut [&mut a, &mut b], now);
    hub.clear_wire_log();
    let rejections = record_rejections(&b);

    // Off the edge of the ground plane
    let err = b.commit(aim(&b, wall(), 80.0, 0.0), now).unwrap_err();
    assert!(matches!(err, PlacementError::Validation(InvalidReason::NoSurface)));
    assert!(hub.wire_log().is_empty());
    assert_eq!(b.inventory().amount("wood"), 100);
    assert_eq!(rejections.lock().unwrap()[0].kind, "validation");
}

#[test]
fn overlapping_an_existing_object_is_refused() {
    let hub = LoopbackHub::new(4);
    let now = Instant::now();
    let mut a = join(&hub, stocked());
    settle(&mut [&mut a], now);

    a.commit(aim(&a, wall(), 0.0, 0.0), now).unwrap();
    let err = a.commit(aim(&a, wall(), 0.2, 0.1), now).unwrap_err();
    assert!(matches!(err, PlacementError::Validation(InvalidReason::Overlap)));
    assert_eq!(a.registry().len(), 1);
}

#[test]
fn unaffordable_placement_changes_nothing() {
    let hub = LoopbackHub::new(5);
    let now = Instant::now();
    let mut a = join(&hub, stocked());
    let mut b = join(&hub, ResourcePool::new().with("wood", 5));
    settle(&mut [&mut a, &mut b], now);
    hub.clear_wire_log();

    let err = b.commit(aim(&b, wall(), 2.0, 2.0), now).unwrap_err();
    assert!(matches!(err, PlacementError::Affordability { ref cost } if *cost == ResourceCost::of("wood", 8)));
    assert_eq!(b.inventory().amount("wood"), 5);
    assert!(b.pending().is_empty());
    assert!(hub.wire_log().is_empty());

    // Free placeables go through on the same budget
    assert!(b.commit(aim(&b, lamp(), 2.0, 2.0), now).is_ok());
}

#[test]
fn unanswered_commit_times_out_and_keeps_the_cost() {
    let hub = LoopbackHub::new(6);
    let now = Instant::now();
    let mut a = join(&hub, stocked());
    let mut b = join(&hub, stocked());
    settle(&mut [&mut a, &mut b], now);
    let rejections = record_rejections(&b);

    b.commit(aim(&b, wall(), 1.0, 1.0), now).unwrap();
    // The authority has not run yet when the deadline passes
    b.tick(now + Duration::from_millis(5001));
    assert!(b.pending().is_empty());
    assert_eq!(b.inventory().amount("wood"), 92);
    assert_eq!(rejections.lock().unwrap().last().unwrap().kind, "replication-timeout");

    // A late create is adopted like any other
    let later = now + Duration::from_secs(6);
    settle(&mut [&mut a, &mut b], later);
    assert_eq!(b.replica_ids(), vec![1]);
}

#[test]
fn authority_migration_recovers_untracked_objects() {
    let hub = LoopbackHub::new(7);
    let now = Instant::now();
    let mut a = join(&hub, stocked());
    let mut b = join(&hub, stocked());
    let mut c = join(&hub, stocked());
    settle(&mut [&mut a, &mut b, &mut c], now);

    a.commit(aim(&a, wall(), 5.0, 0.0), now).unwrap();
    a.commit(aim(&a, lamp(), -5.0, 0.0), now).unwrap();
    settle(&mut [&mut a, &mut b, &mut c], now);
    assert_eq!(a.registry().ids(), vec![1, 2]);

    hub.leave(a.local_peer());
    let successor = hub.authority().unwrap();
    let (heir, other) = if b.local_peer() == successor { (&mut b, &mut c) } else { (&mut c, &mut b) };

    // A scripted event spawned something the old authority never saw
    let scripted = ObjectDescriptor::new("crate", Pose::at(Vec3::new(0.0, 0.0, 8.0)), "script").with_network_id(3);
    heir.world_mut().spawn_untracked(scripted);

    settle(&mut [&mut *heir, &mut *other], now);
    assert!(heir.is_authority());
    assert_eq!(heir.registry().ids(), vec![1, 2, 3]);
    assert_eq!(heir.registry().get(3).unwrap().type_name, "crate");
    assert_eq!(other.replica_ids(), vec![1, 2, 3]);
    assert_eq!(other.world().count_of_type("crate"), 1);

    // New ids never collide with recovered ones
    let outcome = heir.commit(aim(heir, lamp(), -8.0, -8.0), now).unwrap();
    assert!(matches!(outcome, CommitOutcome::Created(id) if id > 3));
}

#[test]
fn demoted_peer_stops_writing_the_registry() {
    let hub = LoopbackHub::new(8);
    let now = Instant::now();
    let mut a = join(&hub, stocked());
    let mut b = join(&hub, stocked());
    settle(&mut [&mut a, &mut b], now);
    a.commit(aim(&a, wall(), 3.0, 3.0), now).unwrap();
    settle(&mut [&mut a, &mut b], now);

    hub.elect(b.local_peer());
    settle(&mut [&mut a, &mut b], now);
    assert!(!a.is_authority());
    assert!(a.registry().is_empty());
    assert_eq!(b.registry().ids(), vec![1]);

    let err = a.save(std::path::Path::new("unused.json")).unwrap_err();
    assert!(matches!(err, PlacementError::NotAuthority { .. }));

    // A's removal now goes through B
    a.remove_object(1).unwrap();
    settle(&mut [&mut a, &mut b], now);
    assert!(b.registry().is_empty());
    assert!(a.replica_ids().is_empty());
}

#[test]
fn late_joiner_catches_up() {
    let hub = LoopbackHub::new(9);
    let now = Instant::now();
    let mut a = join(&hub, stocked());
    settle(&mut [&mut a], now);
    a.commit(aim(&a, wall(), 1.0, 0.0), now).unwrap();
    a.commit(aim(&a, lamp(), 4.0, 0.0), now).unwrap();

    let mut d = join(&hub, stocked());
    settle(&mut [&mut a, &mut d], now);
    assert_eq!(d.replica_ids(), vec![1, 2]);
    assert_eq!(d.world().len(), 2);
}

#[test]
fn periodic_scan_publishes_scripted_spawns() {
    let hub = LoopbackHub::new(10);
    let now = Instant::now();
    let mut a = join(&hub, stocked());
    let mut b = join(&hub, stocked());
    settle(&mut [&mut a, &mut b], now);

    let scripted = ObjectDescriptor::new("crate", Pose::new(Vec3::new(-4.0, 0.0, 4.0), Quat::IDENTITY), "script")
        .with_network_id(77);
    a.world_mut().spawn_untracked(scripted);
    settle(&mut [&mut a, &mut b], now + Duration::from_millis(100));
    assert!(b.replica_ids().is_empty());

    let scans_before = a.authority().scans_run();
    settle(&mut [&mut a, &mut b], now + Duration::from_millis(3000));
    assert_eq!(a.authority().scans_run(), scans_before + 1);
    assert_eq!(a.registry().ids(), vec![77]);
    assert_eq!(b.replica_ids(), vec![77]);
}

#[test]
fn removal_destroys_everywhere() {
    let hub = LoopbackHub::new(11);
    let now = Instant::now();
    let mut a = join(&hub, stocked());
    let mut b = join(&hub, stocked());
    settle(&mut [&mut a, &mut b], now);
    a.commit(aim(&a, wall(), 2.0, -2.0), now).unwrap();
    settle(&mut [&mut a, &mut b], now);
    let handle = b.replica_handle(1).unwrap();

    a.remove_object(1).unwrap();
    settle(&mut [&mut a, &mut b], now);
    assert!(a.registry().is_empty());
    assert!(!b.world().contains(handle));

    let err = a.remove_object(1).unwrap_err();
    assert!(matches!(err, PlacementError::UnknownObject(1)));
}
