use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use lru::LruCache;
use uuid::Uuid;

use crate::config::config_manager::PlacementConfiguration;
use crate::core::authority::{AuthorityManager, AuthorityTask, AuthorityTransition, ReconcileReport};
use crate::core::descriptor::{NetworkId, ObjectDescriptor, PeerId, Pose, RequestId};
use crate::core::error::PlacementError;
use crate::core::event_bus::{
    AuthorityChanged, EventBus, ObjectPlaced, ObjectRemoved, OwnershipChanged, PlacementRejected, RegistryReconciled,
};
use crate::core::inventory::Inventory;
use crate::core::ownership::{OwnershipError, OwnershipTable};
use crate::core::persistence::{PersistedSnapshot, PersistenceStore};
use crate::core::registry::CanonicalRegistry;
use crate::core::world::{LocalHandle, WorldAdapter};
use crate::networking::message::PlacementMessage;
use crate::networking::network_manager::{Target, Transport};
use crate::networking::replication_channel::{ChannelEvent, ReplicationChannel};
use crate::placement::cursor::PlacementCandidate;
use crate::utils::error_logger::log_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    // This peer is the authority and created the object itself
    Created(NetworkId),
    // Forwarded; resolved when the authority's create arrives
    Pending(RequestId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingCommit {
    pub descriptor: ObjectDescriptor,
    pub deadline: Instant,
}

#[derive(Debug, Clone)]
struct Replica {
    handle: LocalHandle,
    descriptor: ObjectDescriptor,
}

/// One peer's side of the placement protocol.
///
/// Owns the replication channel, the local world, the requester's inventory
/// and the authority manager (and through it the canonical registry). All
/// entry points take `&mut self` and run on the peer's logic thread, so a
/// reconciliation scan never overlaps a create or remove.
pub struct PlacementManager<T: Transport, W: WorldAdapter, I: Inventory> {
    channel: ReplicationChannel<T>,
    world: W,
    inventory: I,
    authority: AuthorityManager,
    // Local representations by id, on every peer. Read-only cache unless authority.
    replicas: HashMap<NetworkId, Replica>,
    pending: HashMap<RequestId, PendingCommit>,
    tombstones: LruCache<NetworkId, ()>,
    ownership: OwnershipTable,
    events: Arc<EventBus>,
    config: PlacementConfiguration,
}

impl<T: Transport, W: WorldAdapter, I: Inventory> PlacementManager<T, W, I> {
    pub fn new(transport: T, world: W, inventory: I, config: PlacementConfiguration, events: Arc<EventBus>) -> Self {
        let capacity = NonZeroUsize::new(config.replication.tombstone_capacity).unwrap_or(NonZeroUsize::MIN);
        let local_peer = transport.local_peer();
        Self {
            channel: ReplicationChannel::new(transport),
            world,
            inventory,
            authority: AuthorityManager::new(local_peer),
            replicas: HashMap::new(),
            pending: HashMap::new(),
            tombstones: LruCache::new(capacity),
            ownership: OwnershipTable::new(),
            events,
            config,
        }
    }

    pub fn local_peer(&self) -> PeerId {
        self.authority.local_peer()
    }

    pub fn is_authority(&self) -> bool {
        self.authority.is_authority()
    }

    pub fn authority(&self) -> &AuthorityManager {
        &self.authority
    }

    pub fn registry(&self) -> &CanonicalRegistry {
        self.authority.registry()
    }

    pub fn world(&self) -> &W {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut W {
        &mut self.world
    }

    pub fn inventory(&self) -> &I {
        &self.inventory
    }

    pub fn inventory_mut(&mut self) -> &mut I {
        &mut self.inventory
    }

    pub fn channel(&self) -> &ReplicationChannel<T> {
        &self.channel
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn ownership(&self) -> &OwnershipTable {
        &self.ownership
    }

    pub fn pending(&self) -> &HashMap<RequestId, PendingCommit> {
        &self.pending
    }

    pub fn replica(&self, network_id: NetworkId) -> Option<&ObjectDescriptor> {
        self.replicas.get(&network_id).map(|r| &r.descriptor)
    }

    pub fn replica_handle(&self, network_id: NetworkId) -> Option<LocalHandle> {
        self.replicas.get(&network_id).map(|r| r.handle)
    }

    // Sorted ids of every local representation
    pub fn replica_ids(&self) -> Vec<NetworkId> {
        let mut ids: Vec<NetworkId> = self.replicas.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    // Log, remember and show a recovered failure
    fn report(&self, error: &PlacementError) {
        log_error("placement", &error.to_string());
        self.events.publish(PlacementRejected { kind: error.kind(), message: error.to_string() });
    }

    fn reported<R>(&self, result: Result<R, PlacementError>) -> Result<R, PlacementError> {
        if let Err(e) = &result {
            self.report(e);
        }
        result
    }

    fn broadcast(&mut self, message: &PlacementMessage) {
        if let Err(e) = self.channel.broadcast(message) {
            warn!("Broadcast of {} failed: {}", message.name(), e);
        }
    }

    // ------------------------------------------------------------------
    // Commit pipeline

    /// Validate, charge and create (or forward) a placement.
    pub fn commit(&mut self, candidate: PlacementCandidate, now: Instant) -> Result<CommitOutcome, PlacementError> {
        let result = self.commit_inner(candidate, now);
        self.reported(result)
    }

    fn commit_inner(&mut self, candidate: PlacementCandidate, now: Instant) -> Result<CommitOutcome, PlacementError> {
        candidate.validity.map_err(PlacementError::Validation)?;

        let mut descriptor = candidate.descriptor;
        if !self.inventory.can_afford(&descriptor.cost) {
            return Err(PlacementError::Affordability { cost: descriptor.cost });
        }
        // Spent from here on, even if the authority never answers
        self.inventory.deduct(&descriptor.cost);
        descriptor.network_id = None;

        if self.is_authority() {
            return self.authority_create(descriptor, None).map(CommitOutcome::Created);
        }

        let request_id = Uuid::new_v4();
        let deadline = now + self.config.ack_timeout();
        self.pending.insert(request_id, PendingCommit { descriptor: descriptor.clone(), deadline });
        let request = PlacementMessage::CreateRequest { request_id, descriptor };
        if let Err(e) = self.channel.send_to_authority(&request) {
            // The request stays pending and times out like any lost message
            warn!("Could not forward placement {} to the authority: {}", request_id, e);
        }
        debug!("Placement {} forwarded, waiting until {:?}", request_id, deadline);
        Ok(CommitOutcome::Pending(request_id))
    }

    fn mint_network_id(&mut self) -> NetworkId {
        loop {
            let id = self.authority.mint_id(|| self.channel.allocate_id());
            if !self.replicas.contains_key(&id) && !self.tombstones.contains(&id) {
                return id;
            }
        }
    }

    // Authority-only: instantiate, register, replicate
    fn authority_create(&mut self, mut descriptor: ObjectDescriptor, request_id: Option<RequestId>) -> Result<NetworkId, PlacementError> {
        if !self.is_authority() {
            return Err(PlacementError::NotAuthority { action: "create objects", authority: self.authority.holder() });
        }
        let network_id = self.mint_network_id();
        descriptor.network_id = Some(network_id);

        let handle = self.world.instantiate(&descriptor);
        self.authority.insert(descriptor.clone())?;
        self.replicas.insert(network_id, Replica { handle, descriptor: descriptor.clone() });
        info!("Created {}", descriptor);

        let type_name = descriptor.type_name.clone();
        self.broadcast(&PlacementMessage::Create { request_id, descriptor });

        let confirmed_request = request_id.filter(|r| self.pending.remove(r).is_some());
        self.events.publish(ObjectPlaced { network_id, type_name, confirmed_request });
        Ok(network_id)
    }

    // Every peer: adopt a replicated create, ignoring duplicates
    fn apply_create(&mut self, descriptor: ObjectDescriptor, request_id: Option<RequestId>) {
        let Some(network_id) = descriptor.network_id else {
            warn!("Ignoring create for {} without a network id", descriptor);
            return;
        };
        let confirmed_request = request_id.filter(|r| self.pending.remove(r).is_some());

        if self.replicas.contains_key(&network_id) || self.tombstones.contains(&network_id) {
            debug!("Duplicate create for {} ignored", network_id);
            // Already adopted through a sync; the requester still hears back
            if let (Some(replica), Some(_)) = (self.replicas.get(&network_id), confirmed_request) {
                let type_name = replica.descriptor.type_name.clone();
                self.events.publish(ObjectPlaced { network_id, type_name, confirmed_request });
            }
            return;
        }

        let handle = self.world.instantiate(&descriptor);
        let type_name = descriptor.type_name.clone();
        self.replicas.insert(network_id, Replica { handle, descriptor });
        self.events.publish(ObjectPlaced { network_id, type_name, confirmed_request });
    }

    /// Drops pending commits whose deadline passed. Cost is not refunded.
    fn expire_pending(&mut self, now: Instant) {
        let mut expired: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        expired.sort_unstable();

        for request_id in expired {
            if let Some(pending) = self.pending.remove(&request_id) {
                warn!("Abandoning {} after no acknowledgment", pending.descriptor);
                self.report(&PlacementError::ReplicationTimeout { request_id });
            }
        }
    }

    // ------------------------------------------------------------------
    // Removal

    /// Deletes a placed object, or asks the authority to.
    pub fn remove_object(&mut self, network_id: NetworkId) -> Result<(), PlacementError> {
        let result = if self.is_authority() {
            self.authority_remove(network_id)
        } else {
            self.channel.send_to_authority(&PlacementMessage::RemoveRequest { network_id })
        };
        self.reported(result)
    }

    fn authority_remove(&mut self, network_id: NetworkId) -> Result<(), PlacementError> {
        let registered = self.authority.remove(network_id);
        if !self.replicas.contains_key(&network_id) {
            if let Err(e) = registered {
                debug!("Remove of {} refused: {}", network_id, e);
                return Err(e);
            }
        }
        self.forget(network_id);
        self.broadcast(&PlacementMessage::Remove { network_id });
        Ok(())
    }

    // Destroy the local representation and remember the id as removed
    fn forget(&mut self, network_id: NetworkId) {
        self.tombstones.put(network_id, ());
        if let Some(replica) = self.replicas.remove(&network_id) {
            self.world.destroy(replica.handle);
            info!("Removed {}", replica.descriptor);
        }
        self.ownership.release(network_id);
        self.events.publish(ObjectRemoved { network_id });
    }

    // ------------------------------------------------------------------
    // Authority: migration, recovery and reconciliation

    fn on_authority_changed(&mut self, holder: Option<PeerId>, now: Instant) {
        let transition = self.authority.set_holder(holder, now, self.config.recovery_delay());
        self.events.publish(AuthorityChanged { holder, local_is_authority: self.is_authority() });

        if transition == AuthorityTransition::Promoted && self.config.recovery_delay().is_zero() {
            self.run_recovery(now);
        }
    }

    /// Rebuilds the registry from the world, rebroadcasts it, and starts the
    /// periodic scans.
    pub fn run_recovery(&mut self, now: Instant) {
        self.authority.cancel_recovery();
        match self.run_reconciliation(true) {
            Ok(report) => {
                info!(
                    "Recovery rebuilt the registry with {} objects ({} unknown to the previous authority)",
                    self.registry().len(),
                    report.added.len()
                );
                self.authority.start_periodic_scans(self.config.reconciliation_interval(), now);
            }
            Err(e) => self.report(&e),
        }
    }

    /// Re-derives the registry from the world. Broadcasts a sync when the
    /// scan changed anything, or always when `force_broadcast` is set.
    pub fn run_reconciliation(&mut self, force_broadcast: bool) -> Result<ReconcileReport, PlacementError> {
        let report = self.authority.reconcile(&self.world)?;

        let scanned: HashMap<NetworkId, LocalHandle> = report.handles.iter().copied().collect();
        let vanished: Vec<NetworkId> = self.replicas.keys().filter(|id| !scanned.contains_key(id)).copied().collect();
        for network_id in vanished {
            // Destroyed outside the protocol; the representation is already gone
            self.tombstones.put(network_id, ());
            self.replicas.remove(&network_id);
            self.ownership.release(network_id);
            self.events.publish(ObjectRemoved { network_id });
        }
        for descriptor in self.authority.registry().iter() {
            let Some(network_id) = descriptor.network_id else { continue };
            if let Some(&handle) = scanned.get(&network_id) {
                self.tombstones.pop(&network_id);
                self.replicas.insert(network_id, Replica { handle, descriptor: descriptor.clone() });
            }
        }

        if force_broadcast || !report.is_unchanged() {
            let descriptors = self.registry().descriptors();
            self.broadcast(&PlacementMessage::Sync { descriptors });
        }
        self.events.publish(RegistryReconciled {
            entries: self.registry().len(),
            added: report.added.len(),
            removed: report.removed.len(),
        });
        Ok(report)
    }

    // Non-authority: the authority's registry replaces the local cache wholesale
    fn apply_sync(&mut self, descriptors: Vec<ObjectDescriptor>) {
        let mut keep = HashSet::new();
        let mut added = 0;
        for descriptor in descriptors {
            let Some(network_id) = descriptor.network_id else { continue };
            keep.insert(network_id);
            self.tombstones.pop(&network_id);

            match self.replicas.get_mut(&network_id) {
                Some(replica) if replica.descriptor.type_name == descriptor.type_name => {
                    if !replica.descriptor.pose.approx_eq(&descriptor.pose, 1e-5) {
                        self.world.set_pose(replica.handle, &descriptor.pose);
                        self.world.settle(replica.handle);
                    }
                    replica.descriptor = descriptor;
                }
                Some(replica) => {
                    self.world.destroy(replica.handle);
                    replica.handle = self.world.instantiate(&descriptor);
                    replica.descriptor = descriptor;
                }
                None => {
                    let handle = self.world.instantiate(&descriptor);
                    let type_name = descriptor.type_name.clone();
                    self.replicas.insert(network_id, Replica { handle, descriptor });
                    self.events.publish(ObjectPlaced { network_id, type_name, confirmed_request: None });
                    added += 1;
                }
            }
        }

        let stale: Vec<NetworkId> = self.replicas.keys().filter(|id| !keep.contains(id)).copied().collect();
        let removed = stale.len();
        for network_id in stale {
            self.forget(network_id);
        }
        debug!("Sync applied: {} objects (+{} -{})", self.replicas.len(), added, removed);
        self.events.publish(RegistryReconciled { entries: self.replicas.len(), added, removed });
    }

    // ------------------------------------------------------------------
    // Persistence

    /// Scans, then writes every registered object to `path`. Authority only.
    pub fn save(&mut self, path: &Path) -> Result<usize, PlacementError> {
        let result = self.save_inner(path);
        self.reported(result)
    }

    fn save_inner(&mut self, path: &Path) -> Result<usize, PlacementError> {
        if !self.is_authority() {
            return Err(PlacementError::NotAuthority { action: "save", authority: self.authority.holder() });
        }
        self.run_reconciliation(false)?;
        let snapshot = PersistedSnapshot::from_descriptors(self.registry().iter());
        PersistenceStore::write(path, &snapshot)?;
        Ok(snapshot.len())
    }

    /// Re-creates every object in `path` with fresh ids. Authority only.
    /// The file is parsed completely before anything is created.
    pub fn load(&mut self, path: &Path) -> Result<Vec<NetworkId>, PlacementError> {
        let result = self.load_inner(path);
        self.reported(result)
    }

    fn load_inner(&mut self, path: &Path) -> Result<Vec<NetworkId>, PlacementError> {
        if !self.is_authority() {
            return Err(PlacementError::NotAuthority { action: "load", authority: self.authority.holder() });
        }
        let snapshot = PersistenceStore::read(path)?;
        snapshot
            .into_descriptors()
            .into_iter()
            .map(|descriptor| self.authority_create(descriptor, None))
            .collect()
    }

    // ------------------------------------------------------------------
    // Ownership

    pub fn request_ownership(&mut self, object_id: NetworkId) -> Result<(), PlacementError> {
        let result = self.request_ownership_inner(object_id);
        self.reported(result)
    }

    fn request_ownership_inner(&mut self, object_id: NetworkId) -> Result<(), PlacementError> {
        let local = self.local_peer();
        if self.is_authority() {
            return self.grant_ownership(object_id, local);
        }
        if let Some(holder) = self.ownership.holder(object_id).filter(|h| *h != local) {
            return Err(OwnershipError::Held { object_id, holder }.into());
        }
        self.channel.send_to_authority(&PlacementMessage::RequestOwnership { object_id, peer: local })
    }

    pub fn transfer_ownership(&mut self, object_id: NetworkId, to: PeerId) -> Result<(), PlacementError> {
        let result = self.transfer_ownership_inner(object_id, to);
        self.reported(result)
    }

    fn transfer_ownership_inner(&mut self, object_id: NetworkId, to: PeerId) -> Result<(), PlacementError> {
        let local = self.local_peer();
        if !self.ownership.can_mutate(object_id, local) {
            return Err(OwnershipError::NotHolder { object_id, peer: local }.into());
        }
        if self.is_authority() {
            return self.apply_transfer(object_id, local, to);
        }
        self.channel.send_to_authority(&PlacementMessage::TransferOwnership { object_id, from: local, to })
    }

    // Authority-only
    fn grant_ownership(&mut self, object_id: NetworkId, peer: PeerId) -> Result<(), PlacementError> {
        if !self.registry().contains(object_id) {
            return Err(PlacementError::UnknownObject(object_id));
        }
        let lease = self.ownership.request(object_id, peer)?;
        self.announce_holder(object_id, Some(lease.holder));
        Ok(())
    }

    // Authority-only
    fn apply_transfer(&mut self, object_id: NetworkId, from: PeerId, to: PeerId) -> Result<(), PlacementError> {
        let lease = self.ownership.transfer(object_id, from, to)?;
        if let Some(replica) = self.replicas.get(&object_id) {
            self.world.settle(replica.handle);
        }
        self.announce_holder(object_id, Some(lease.holder));
        Ok(())
    }

    fn announce_holder(&mut self, object_id: NetworkId, holder: Option<PeerId>) {
        self.broadcast(&PlacementMessage::OwnershipChanged { object_id, holder });
        self.events.publish(OwnershipChanged { object_id, holder });
    }

    // Mirror a lease change; whoever lost the object leaves it at rest
    fn apply_ownership_changed(&mut self, object_id: NetworkId, holder: Option<PeerId>) {
        let previous = self.ownership.holder(object_id);
        self.ownership.apply(object_id, holder);
        if previous.is_some() && previous != holder {
            if let Some(replica) = self.replicas.get(&object_id) {
                self.world.settle(replica.handle);
            }
        }
        self.events.publish(OwnershipChanged { object_id, holder });
    }

    fn release_leases_of(&mut self, peer: PeerId) {
        for object_id in self.ownership.release_peer(peer) {
            if let Some(replica) = self.replicas.get(&object_id) {
                self.world.settle(replica.handle);
            }
            if self.is_authority() {
                self.announce_holder(object_id, None);
            } else {
                self.events.publish(OwnershipChanged { object_id, holder: None });
            }
        }
    }

    /// Moves an object this peer holds the lease for.
    pub fn update_pose(&mut self, object_id: NetworkId, pose: Pose) -> Result<(), PlacementError> {
        let result = self.update_pose_inner(object_id, pose);
        self.reported(result)
    }

    fn update_pose_inner(&mut self, object_id: NetworkId, pose: Pose) -> Result<(), PlacementError> {
        let local = self.local_peer();
        if !self.ownership.can_mutate(object_id, local) {
            return Err(OwnershipError::NotHolder { object_id, peer: local }.into());
        }
        self.apply_pose(object_id, pose)?;
        let message = PlacementMessage::PoseUpdate { object_id, pose };
        if self.is_authority() {
            self.broadcast(&message);
            Ok(())
        } else {
            self.channel.send_to_authority(&message)
        }
    }

    fn apply_pose(&mut self, object_id: NetworkId, pose: Pose) -> Result<(), PlacementError> {
        let replica = self.replicas.get_mut(&object_id).ok_or(PlacementError::UnknownObject(object_id))?;
        replica.descriptor.pose = pose;
        self.world.set_pose(replica.handle, &pose);
        if self.authority.is_authority() {
            self.authority.update_pose(object_id, pose)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Event loop

    /// Drains the channel, applying every event. Returns how many were handled.
    pub fn process_events(&mut self, now: Instant) -> usize {
        let mut handled = 0;
        while let Some(event) = self.channel.poll() {
            handled += 1;
            match event {
                ChannelEvent::AuthorityChanged(holder) => self.on_authority_changed(holder, now),
                ChannelEvent::PeerJoined(peer) => self.on_peer_joined(peer),
                ChannelEvent::PeerLeft(peer) => {
                    info!("Peer {} left", peer);
                    self.release_leases_of(peer);
                }
                ChannelEvent::Message { from, message } => {
                    if let Err(e) = self.handle_message(from, message) {
                        self.report(&e);
                    }
                }
            }
        }
        handled
    }

    /// Fires due timers: pending timeouts, recovery and periodic scans.
    pub fn tick(&mut self, now: Instant) {
        self.expire_pending(now);
        for task in self.authority.due_tasks(now) {
            match task {
                AuthorityTask::RecoveryRoutine => self.run_recovery(now),
                AuthorityTask::ReconciliationScan => {
                    if let Err(e) = self.run_reconciliation(false) {
                        self.report(&e);
                    }
                }
            }
        }
    }

    // One logic-loop iteration
    pub fn update(&mut self, now: Instant) -> usize {
        let handled = self.process_events(now);
        self.tick(now);
        handled
    }

    // Late joiners get the whole registry and lease table
    fn on_peer_joined(&mut self, peer: PeerId) {
        if !self.is_authority() {
            return;
        }
        let descriptors = self.registry().descriptors();
        debug!("Catching up {} with {} objects", peer, descriptors.len());
        if let Err(e) = self.channel.send(Target::Peer(peer), &PlacementMessage::Sync { descriptors }) {
            warn!("Catch-up sync to {} failed: {}", peer, e);
        }
        for object_id in self.registry().ids() {
            if let Some(holder) = self.ownership.holder(object_id) {
                let message = PlacementMessage::OwnershipChanged { object_id, holder: Some(holder) };
                if let Err(e) = self.channel.send(Target::Peer(peer), &message) {
                    warn!("Catch-up lease for {} failed: {}", object_id, e);
                }
            }
        }
    }

    fn handle_message(&mut self, from: PeerId, message: PlacementMessage) -> Result<(), PlacementError> {
        if message.is_authoritative() && self.authority.holder().is_some_and(|holder| holder != from) {
            warn!("Dropping {} from {}, which is not the authority", message.name(), from);
            return Ok(());
        }

        match message {
            PlacementMessage::CreateRequest { request_id, descriptor } => {
                if self.is_authority() {
                    self.authority_create(descriptor, Some(request_id)).map(|_| ())
                } else {
                    self.forward_to_authority(PlacementMessage::CreateRequest { request_id, descriptor })
                }
            }
            PlacementMessage::Create { request_id, descriptor } => {
                self.apply_create(descriptor, request_id);
                Ok(())
            }
            PlacementMessage::Sync { descriptors } => {
                if self.is_authority() {
                    warn!("Authority ignoring sync from {}", from);
                } else {
                    self.apply_sync(descriptors);
                }
                Ok(())
            }
            PlacementMessage::RemoveRequest { network_id } => {
                if self.is_authority() {
                    self.authority_remove(network_id)
                } else {
                    self.forward_to_authority(PlacementMessage::RemoveRequest { network_id })
                }
            }
            PlacementMessage::Remove { network_id } => {
                self.forget(network_id);
                Ok(())
            }
            PlacementMessage::RequestOwnership { object_id, peer } => {
                if !self.is_authority() {
                    return self.forward_to_authority(PlacementMessage::RequestOwnership { object_id, peer });
                }
                match self.grant_ownership(object_id, peer) {
                    Err(PlacementError::Ownership(OwnershipError::Held { holder, .. })) => {
                        debug!("Ownership of {} refused to {}: held by {}", object_id, peer, holder);
                        let reply = PlacementMessage::OwnershipChanged { object_id, holder: Some(holder) };
                        self.channel.send(Target::Peer(peer), &reply)
                    }
                    other => other,
                }
            }
            PlacementMessage::TransferOwnership { object_id, from: giver, to } => {
                if !self.is_authority() {
                    return self.forward_to_authority(PlacementMessage::TransferOwnership { object_id, from: giver, to });
                }
                // `from` may be a demoted authority forwarding; the lease table checks the giver
                self.apply_transfer(object_id, giver, to)
            }
            PlacementMessage::OwnershipChanged { object_id, holder } => {
                self.apply_ownership_changed(object_id, holder);
                Ok(())
            }
            PlacementMessage::PoseUpdate { object_id, pose } => {
                if self.is_authority() {
                    if !self.ownership.can_mutate(object_id, from) {
                        self.correct_pose(from, object_id);
                        return Err(OwnershipError::NotHolder { object_id, peer: from }.into());
                    }
                    self.apply_pose(object_id, pose)?;
                    self.broadcast(&PlacementMessage::PoseUpdate { object_id, pose });
                    Ok(())
                } else if self.authority.holder() == Some(from) {
                    self.apply_pose(object_id, pose)
                } else {
                    warn!("Dropping pose update for {} from {}, which is not the authority", object_id, from);
                    Ok(())
                }
            }
        }
    }

    // The sender already moved its copy; put it back where the registry has it
    fn correct_pose(&mut self, peer: PeerId, object_id: NetworkId) {
        let Some(pose) = self.registry().get(object_id).map(|d| d.pose) else { return };
        debug!("Restoring {} on {} after a refused pose update", object_id, peer);
        if let Err(e) = self.channel.send(Target::Peer(peer), &PlacementMessage::PoseUpdate { object_id, pose }) {
            warn!("Pose correction for {} to {} failed: {}", object_id, peer, e);
        }
    }

    // Requests that reached a demoted peer go on to the current authority
    fn forward_to_authority(&mut self, message: PlacementMessage) -> Result<(), PlacementError> {
        debug!("Forwarding {} to the current authority", message.name());
        self.channel.send_to_authority(&message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::inventory::Unlimited;
    use crate::core::world::LocalWorld;
    use crate::networking::loopback::{LoopbackHub, LoopbackTransport};
    use glam::Vec3;
    use std::time::Duration;

    fn manager(hub: &LoopbackHub, config: PlacementConfiguration) -> PlacementManager<LoopbackTransport, LocalWorld, Unlimited> {
        PlacementManager::new(hub.join(), LocalWorld::flat(20.0), Unlimited, config, Arc::new(EventBus::new()))
    }

    fn tagged(id: NetworkId) -> ObjectDescriptor {
        ObjectDescriptor::new("crate", Pose::at(Vec3::new(id as f32, 0.0, 0.0)), "script").with_network_id(id)
    }

    #[test]
    fn delayed_recovery_waits_for_its_timer() {
        let mut config = PlacementConfiguration::default();
        config.authority.recovery_delay_ms = 500;
        let hub = LoopbackHub::new(1);
        let mut peer = manager(&hub, config);
        peer.world_mut().spawn_untracked(tagged(4));
        let now = Instant::now();

        peer.update(now);
        assert!(peer.is_authority());
        assert!(peer.registry().is_empty());
        assert!(peer.authority().is_scheduled(AuthorityTask::RecoveryRoutine));

        peer.update(now + Duration::from_millis(500));
        assert_eq!(peer.registry().ids(), vec![4]);
        assert!(peer.authority().is_scheduled(AuthorityTask::ReconciliationScan));
    }

    #[test]
    fn objects_destroyed_outside_the_protocol_drop_out_on_scan() {
        let hub = LoopbackHub::new(2);
        let mut peer = manager(&hub, PlacementConfiguration::default());
        let now = Instant::now();
        peer.world_mut().spawn_untracked(tagged(1));
        peer.world_mut().spawn_untracked(tagged(2));
        peer.update(now);
        assert_eq!(peer.replica_ids(), vec![1, 2]);

        let handle = peer.replica_handle(2).unwrap();
        peer.world_mut().destroy(handle);
        let report = peer.run_reconciliation(false).unwrap();
        assert_eq!(report.removed, vec![2]);
        assert_eq!(peer.replica_ids(), vec![1]);
    }

    #[test]
    fn minted_ids_skip_scanned_ones() {
        let hub = LoopbackHub::new(3);
        let mut peer = manager(&hub, PlacementConfiguration::default());
        let now = Instant::now();
        peer.world_mut().spawn_untracked(tagged(1));
        peer.update(now);

        let candidate = PlacementCandidate { descriptor: tagged(99), validity: Ok(()) };
        let outcome = peer.commit(candidate, now).unwrap();
        // The allocator's first id is taken and the caller's id is ignored
        assert_eq!(outcome, CommitOutcome::Created(2));
    }
}
