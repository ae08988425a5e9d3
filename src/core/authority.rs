use std::collections::HashSet;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::core::descriptor::{NetworkId, ObjectDescriptor, PeerId, Pose};
use crate::core::error::PlacementError;
use crate::core::registry::CanonicalRegistry;
use crate::core::scheduler::Scheduler;
use crate::core::world::{LocalHandle, WorldAdapter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityState {
    Authority,
    NonAuthority,
}

// What a holder change meant for this peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityTransition {
    Promoted,
    Demoted,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AuthorityTask {
    RecoveryRoutine,
    ReconciliationScan,
}

/// Difference between the registry before and after a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<NetworkId>,
    pub removed: Vec<NetworkId>,
    pub updated: Vec<NetworkId>,
    // Handles of every scanned representation, by id
    pub handles: Vec<(NetworkId, LocalHandle)>,
}

impl ReconcileReport {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

/// Tracks who holds authority and owns the canonical registry.
///
/// Registry mutations are refused unless this peer is the authority, so a
/// non-authority can never treat its own writes as canonical.
#[derive(Debug)]
pub struct AuthorityManager {
    local_peer: PeerId,
    holder: Option<PeerId>,
    registry: CanonicalRegistry,
    tasks: Scheduler<AuthorityTask>,
    scans_run: u64,
}

impl AuthorityManager {
    pub fn new(local_peer: PeerId) -> Self {
        Self {
            local_peer,
            holder: None,
            registry: CanonicalRegistry::new(),
            tasks: Scheduler::new(),
            scans_run: 0,
        }
    }

    pub fn local_peer(&self) -> PeerId {
        self.local_peer
    }

    pub fn holder(&self) -> Option<PeerId> {
        self.holder
    }

    pub fn state(&self) -> AuthorityState {
        if self.is_authority() { AuthorityState::Authority } else { AuthorityState::NonAuthority }
    }

    pub fn is_authority(&self) -> bool {
        self.holder == Some(self.local_peer)
    }

    pub fn registry(&self) -> &CanonicalRegistry {
        &self.registry
    }

    pub fn scans_run(&self) -> u64 {
        self.scans_run
    }

    /// Reacts to the transport's election result.
    ///
    /// Promotion clears the partial registry and arms the recovery routine;
    /// the caller runs it once `recovery_delay` elapses (immediately when zero).
    pub fn set_holder(&mut self, holder: Option<PeerId>, now: Instant, recovery_delay: Duration) -> AuthorityTransition {
        let was_authority = self.is_authority();
        self.holder = holder;
        let is_authority = self.is_authority();

        match (was_authority, is_authority) {
            (false, true) => {
                info!("Peer {} promoted to authority", self.local_peer);
                self.registry.clear();
                self.tasks.schedule_once(AuthorityTask::RecoveryRoutine, recovery_delay, now);
                AuthorityTransition::Promoted
            }
            (true, false) => {
                info!("Peer {} handed authority to {:?}", self.local_peer, holder);
                self.registry.clear();
                self.tasks.cancel(AuthorityTask::RecoveryRoutine);
                self.tasks.cancel(AuthorityTask::ReconciliationScan);
                AuthorityTransition::Demoted
            }
            _ => AuthorityTransition::Unchanged,
        }
    }

    // Periodic scans run for as long as authority is held
    pub fn start_periodic_scans(&mut self, interval: Duration, now: Instant) {
        if self.is_authority() {
            self.tasks.schedule_repeating(AuthorityTask::ReconciliationScan, interval, now);
        }
    }

    pub fn cancel_recovery(&mut self) {
        self.tasks.cancel(AuthorityTask::RecoveryRoutine);
    }

    pub fn is_scheduled(&self, task: AuthorityTask) -> bool {
        self.tasks.is_scheduled(task)
    }

    pub fn due_tasks(&mut self, now: Instant) -> Vec<AuthorityTask> {
        if !self.is_authority() {
            return Vec::new();
        }
        self.tasks.due(now)
    }

    fn require_authority(&self, action: &'static str) -> Result<(), PlacementError> {
        if self.is_authority() {
            Ok(())
        } else {
            Err(PlacementError::NotAuthority { action, authority: self.holder })
        }
    }

    /// Picks a fresh id from `allocate`, skipping any already registered.
    pub fn mint_id(&self, mut allocate: impl FnMut() -> NetworkId) -> NetworkId {
        loop {
            let id = allocate();
            if !self.registry.contains(id) {
                return id;
            }
            warn!("Allocator returned id {} which is already registered; drawing another", id);
        }
    }

    pub fn insert(&mut self, descriptor: ObjectDescriptor) -> Result<(), PlacementError> {
        self.require_authority("register objects")?;
        self.registry.upsert(descriptor).map(|_| ()).map_err(|descriptor| {
            warn!("Refusing to register {} without a network id", descriptor);
            PlacementError::Unassigned { type_name: descriptor.type_name }
        })
    }

    pub fn remove(&mut self, network_id: NetworkId) -> Result<ObjectDescriptor, PlacementError> {
        self.require_authority("remove objects")?;
        self.registry.remove(network_id).ok_or(PlacementError::UnknownObject(network_id))
    }

    pub fn update_pose(&mut self, network_id: NetworkId, pose: Pose) -> Result<(), PlacementError> {
        self.require_authority("move objects")?;
        let descriptor = self.registry.get_mut(network_id).ok_or(PlacementError::UnknownObject(network_id))?;
        descriptor.pose = pose;
        Ok(())
    }

    /// Re-derives the registry from what the world currently shows.
    ///
    /// Takes `&mut self` so no create or remove can interleave with the
    /// rebuild. When two representations carry the same id the first one
    /// scanned wins.
    pub fn reconcile<W: WorldAdapter>(&mut self, world: &W) -> Result<ReconcileReport, PlacementError> {
        self.require_authority("reconcile the registry")?;

        let mut rebuilt = CanonicalRegistry::new();
        let mut report = ReconcileReport::default();
        for observed in world.scan() {
            let Some(id) = observed.network_id() else { continue };
            if rebuilt.contains(id) {
                warn!("Two representations tagged {}; keeping the first", id);
                continue;
            }
            report.handles.push((id, observed.handle));
            // The world only knows where an object is; cost, metadata and
            // timestamps of known entries come from the registry
            let merged = match self.registry.get(id) {
                None => {
                    report.added.push(id);
                    observed.descriptor
                }
                Some(known) => {
                    if !known.same_placement(&observed.descriptor) {
                        report.updated.push(id);
                    }
                    let mut kept = known.clone();
                    kept.type_name = observed.descriptor.type_name;
                    kept.pose = observed.descriptor.pose;
                    kept
                }
            };
            // insertion cannot fail, the id was checked above
            let _ = rebuilt.upsert(merged);
        }

        let seen: HashSet<NetworkId> = rebuilt.ids().into_iter().collect();
        report.removed = self.registry.ids().into_iter().filter(|id| !seen.contains(id)).collect();

        self.registry = rebuilt;
        self.scans_run += 1;
        debug!(
            "Reconciliation scan #{}: {} entries (+{} -{} ~{})",
            self.scans_run,
            self.registry.len(),
            report.added.len(),
            report.removed.len(),
            report.updated.len()
        );
        Ok(report)
    }
}
