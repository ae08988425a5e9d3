use std::collections::HashMap;

use thiserror::Error;

use crate::core::descriptor::{NetworkId, PeerId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OwnershipError {
    #[error("object {object_id} is held by {holder}")]
    Held { object_id: NetworkId, holder: PeerId },

    #[error("{peer} does not hold object {object_id}")]
    NotHolder { object_id: NetworkId, peer: PeerId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnershipLease {
    pub object_id: NetworkId,
    pub holder: PeerId,
}

/// Transient single-holder write access to placed objects.
///
/// The authority's table decides; every other peer mirrors the
/// `OwnershipChanged` broadcasts into its own table.
#[derive(Debug, Clone, Default)]
pub struct OwnershipTable {
    leases: HashMap<NetworkId, PeerId>,
}

impl OwnershipTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holder(&self, object_id: NetworkId) -> Option<PeerId> {
        self.leases.get(&object_id).copied()
    }

    pub fn can_mutate(&self, object_id: NetworkId, peer: PeerId) -> bool {
        self.holder(object_id) == Some(peer)
    }

    /// Grants the lease if nobody holds it. Re-requesting a held lease as its
    /// holder succeeds without change.
    pub fn request(&mut self, object_id: NetworkId, peer: PeerId) -> Result<OwnershipLease, OwnershipError> {
        match self.leases.get(&object_id) {
            Some(&holder) if holder != peer => Err(OwnershipError::Held { object_id, holder }),
            _ => {
                self.leases.insert(object_id, peer);
                Ok(OwnershipLease { object_id, holder: peer })
            }
        }
    }

    pub fn transfer(&mut self, object_id: NetworkId, from: PeerId, to: PeerId) -> Result<OwnershipLease, OwnershipError> {
        if !self.can_mutate(object_id, from) {
            return Err(OwnershipError::NotHolder { object_id, peer: from });
        }
        self.leases.insert(object_id, to);
        Ok(OwnershipLease { object_id, holder: to })
    }

    pub fn release(&mut self, object_id: NetworkId) -> Option<PeerId> {
        self.leases.remove(&object_id)
    }

    // Drops every lease the peer holds, returning the freed objects
    pub fn release_peer(&mut self, peer: PeerId) -> Vec<NetworkId> {
        let mut freed: Vec<NetworkId> = self
            .leases
            .iter()
            .filter(|(_, holder)| **holder == peer)
            .map(|(id, _)| *id)
            .collect();
        freed.sort_unstable();
        for id in &freed {
            self.leases.remove(id);
        }
        freed
    }

    // Mirror an authority broadcast
    pub fn apply(&mut self, object_id: NetworkId, holder: Option<PeerId>) {
        match holder {
            Some(peer) => {
                self.leases.insert(object_id, peer);
            }
            None => {
                self.leases.remove(&object_id);
            }
        }
    }

    pub fn clear(&mut self) {
        self.leases.clear();
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn unheld_lease_is_granted() {
        let mut table = OwnershipTable::new();
        let peer = Uuid::new_v4();
        assert_eq!(table.request(1, peer), Ok(OwnershipLease { object_id: 1, holder: peer }));
        assert!(table.can_mutate(1, peer));
    }

    #[test]
    fn held_lease_is_refused_to_others() {
        let mut table = OwnershipTable::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        table.request(1, a).unwrap();
        assert_eq!(table.request(1, b), Err(OwnershipError::Held { object_id: 1, holder: a }));
        assert!(table.request(1, a).is_ok());
    }

    #[test]
    fn only_holder_can_transfer() {
        let mut table = OwnershipTable::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        table.request(1, a).unwrap();

        assert!(table.transfer(1, b, c).is_err());
        table.transfer(1, a, b).unwrap();
        assert_eq!(table.holder(1), Some(b));
        assert!(!table.can_mutate(1, a));
    }

    #[test]
    fn departing_peer_releases_everything() {
        let mut table = OwnershipTable::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        table.request(3, a).unwrap();
        table.request(1, a).unwrap();
        table.request(2, b).unwrap();

        assert_eq!(table.release_peer(a), vec![1, 3]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.holder(2), Some(b));
    }
}
