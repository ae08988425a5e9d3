use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use uuid::Uuid;

use crate::core::descriptor::{NetworkId, PeerId};
use crate::networking::network_manager::{Target, Transport, TransportError, TransportEvent};

/// One payload seen on the simulated wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRecord {
    pub from: PeerId,
    pub to: PeerId,
    pub bytes: usize,
}

struct HubState {
    // Join order
    members: Vec<PeerId>,
    inboxes: HashMap<PeerId, VecDeque<TransportEvent>>,
    authority: Option<PeerId>,
    next_id: NetworkId,
    rng: ChaCha8Rng,
    muted: HashSet<PeerId>,
    wire: Vec<WireRecord>,
}

impl HubState {
    fn push(&mut self, to: PeerId, event: TransportEvent) {
        if let Some(inbox) = self.inboxes.get_mut(&to) {
            inbox.push_back(event);
        }
    }

    fn push_all(&mut self, event: TransportEvent) {
        for peer in self.members.clone() {
            self.push(peer, event.clone());
        }
    }

    fn announce_authority(&mut self, holder: Option<PeerId>) {
        self.authority = holder;
        self.push_all(TransportEvent::AuthorityChanged(holder));
    }
}

/// In-process session connecting any number of peers.
///
/// Delivery is reliable and ordered per pair. The first peer to join holds
/// authority; when the authority leaves a successor is picked with a seeded
/// RNG, so runs are reproducible.
#[derive(Clone)]
pub struct LoopbackHub {
    state: Arc<Mutex<HubState>>,
}

impl LoopbackHub {
    pub fn new(seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                members: Vec::new(),
                inboxes: HashMap::new(),
                authority: None,
                next_id: 0,
                rng: ChaCha8Rng::seed_from_u64(seed),
                muted: HashSet::new(),
                wire: Vec::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn join(&self) -> LoopbackTransport {
        let peer = Uuid::new_v4();
        let mut state = self.state();

        let existing = state.members.clone();
        state.members.push(peer);
        state.inboxes.insert(peer, VecDeque::new());
        for other in &existing {
            state.push(*other, TransportEvent::PeerJoined(peer));
            state.push(peer, TransportEvent::PeerJoined(*other));
        }

        match state.authority {
            None => state.announce_authority(Some(peer)),
            Some(holder) => state.push(peer, TransportEvent::AuthorityChanged(Some(holder))),
        }
        info!("Peer {} joined the loopback session ({} members)", peer, state.members.len());

        LoopbackTransport { peer, hub: self.clone() }
    }

    /// Removes the peer. If it held authority a successor is elected.
    pub fn leave(&self, peer: PeerId) {
        let mut state = self.state();
        state.members.retain(|p| *p != peer);
        state.inboxes.remove(&peer);
        state.muted.remove(&peer);
        state.push_all(TransportEvent::PeerLeft(peer));

        if state.authority == Some(peer) {
            let successor = if state.members.is_empty() {
                None
            } else {
                let len = state.members.len();
                let pick = state.rng.random_range(0..len);
                Some(state.members[pick])
            };
            info!("Authority {} left; electing {:?}", peer, successor);
            state.announce_authority(successor);
        }
    }

    // Hands authority to `peer` without anyone leaving
    pub fn elect(&self, peer: PeerId) {
        let mut state = self.state();
        if state.members.contains(&peer) {
            state.announce_authority(Some(peer));
        }
    }

    /// While muted, payloads addressed to `peer` are lost in transit.
    pub fn mute(&self, peer: PeerId, muted: bool) {
        let mut state = self.state();
        if muted {
            state.muted.insert(peer);
        } else {
            state.muted.remove(&peer);
        }
    }

    pub fn authority(&self) -> Option<PeerId> {
        self.state().authority
    }

    pub fn members(&self) -> Vec<PeerId> {
        self.state().members.clone()
    }

    pub fn wire_log(&self) -> Vec<WireRecord> {
        self.state().wire.clone()
    }

    pub fn clear_wire_log(&self) {
        self.state().wire.clear();
    }

    pub fn pending(&self, peer: PeerId) -> usize {
        self.state().inboxes.get(&peer).map_or(0, VecDeque::len)
    }

    fn deliver(&self, from: PeerId, target: Target, payload: Vec<u8>) -> Result<(), TransportError> {
        let mut state = self.state();
        if !state.inboxes.contains_key(&from) {
            return Err(TransportError::Closed);
        }

        let recipients: Vec<PeerId> = match target {
            Target::Peer(peer) if state.inboxes.contains_key(&peer) => vec![peer],
            Target::Peer(peer) => return Err(TransportError::UnknownPeer(peer)),
            Target::Authority => vec![state.authority.ok_or(TransportError::NoAuthority)?],
            Target::Others => state.members.iter().copied().filter(|p| *p != from).collect(),
        };

        for to in recipients {
            state.wire.push(WireRecord { from, to, bytes: payload.len() });
            if state.muted.contains(&to) {
                debug!("Dropping {} bytes to muted peer {}", payload.len(), to);
                continue;
            }
            state.push(to, TransportEvent::DataReceived { peer_id: from, payload: payload.clone() });
        }
        Ok(())
    }
}

/// One peer's endpoint on a `LoopbackHub`.
pub struct LoopbackTransport {
    peer: PeerId,
    hub: LoopbackHub,
}

impl LoopbackTransport {
    pub fn hub(&self) -> &LoopbackHub {
        &self.hub
    }
}

impl Transport for LoopbackTransport {
    fn local_peer(&self) -> PeerId {
        self.peer
    }

    fn authority(&self) -> Option<PeerId> {
        self.hub.authority()
    }

    fn peers(&self) -> Vec<PeerId> {
        self.hub.members().into_iter().filter(|p| *p != self.peer).collect()
    }

    fn send(&mut self, target: Target, payload: Vec<u8>) -> Result<(), TransportError> {
        self.hub.deliver(self.peer, target, payload)
    }

    fn poll(&mut self) -> Option<TransportEvent> {
        self.hub.state().inboxes.get_mut(&self.peer)?.pop_front()
    }

    fn allocate_id(&mut self) -> NetworkId {
        let mut state = self.hub.state();
        state.next_id += 1;
        state.next_id
    }
}
