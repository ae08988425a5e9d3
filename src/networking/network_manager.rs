use thiserror::Error;

use crate::core::descriptor::{NetworkId, PeerId};

// Enum to represent the events a transport hands to the logic loop
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    PeerJoined(PeerId),
    PeerLeft(PeerId),
    // The election designated a new authority
    AuthorityChanged(Option<PeerId>),
    DataReceived {
        peer_id: PeerId,
        payload: Vec<u8>,
    },
}

// Where an outgoing payload goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Peer(PeerId),
    Authority,
    // Every peer except the sender
    Others,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("no authority is currently elected")]
    NoAuthority,

    #[error("peer {0} is not connected")]
    UnknownPeer(PeerId),

    #[error("transport is closed")]
    Closed,
}

/// The session layer placement runs on: reliable, per-pair ordered,
/// at-least-once delivery with a single elected authority.
pub trait Transport {
    fn local_peer(&self) -> PeerId;

    fn authority(&self) -> Option<PeerId>;

    fn is_authority(&self) -> bool {
        self.authority() == Some(self.local_peer())
    }

    fn peers(&self) -> Vec<PeerId>;

    fn send(&mut self, target: Target, payload: Vec<u8>) -> Result<(), TransportError>;

    fn poll(&mut self) -> Option<TransportEvent>;

    // Session-unique id, never handed out twice
    fn allocate_id(&mut self) -> NetworkId;
}
