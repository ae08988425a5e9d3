use log::{debug, warn};

use crate::core::descriptor::{NetworkId, PeerId};
use crate::core::error::PlacementError;
use crate::networking::message::PlacementMessage;
use crate::networking::network_manager::{Target, Transport, TransportEvent};

/// A transport event with its payload already decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    PeerJoined(PeerId),
    PeerLeft(PeerId),
    AuthorityChanged(Option<PeerId>),
    Message { from: PeerId, message: PlacementMessage },
}

/// Typed RPC boundary over a byte transport.
pub struct ReplicationChannel<T: Transport> {
    transport: T,
    sent: u64,
    dropped: u64,
}

impl<T: Transport> ReplicationChannel<T> {
    pub fn new(transport: T) -> Self {
        Self { transport, sent: 0, dropped: 0 }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn local_peer(&self) -> PeerId {
        self.transport.local_peer()
    }

    pub fn allocate_id(&mut self) -> NetworkId {
        self.transport.allocate_id()
    }

    pub fn messages_sent(&self) -> u64 {
        self.sent
    }

    // Payloads that failed to decode
    pub fn messages_dropped(&self) -> u64 {
        self.dropped
    }

    pub fn send(&mut self, target: Target, message: &PlacementMessage) -> Result<(), PlacementError> {
        let payload = message.encode()?;
        debug!("-> {:?} {} ({} bytes)", target, message.name(), payload.len());
        self.transport.send(target, payload)?;
        self.sent += 1;
        Ok(())
    }

    pub fn broadcast(&mut self, message: &PlacementMessage) -> Result<(), PlacementError> {
        self.send(Target::Others, message)
    }

    pub fn send_to_authority(&mut self, message: &PlacementMessage) -> Result<(), PlacementError> {
        self.send(Target::Authority, message)
    }

    /// Next decodable event. Undecodable payloads are logged, counted and skipped.
    pub fn poll(&mut self) -> Option<ChannelEvent> {
        loop {
            let event = match self.transport.poll()? {
                TransportEvent::PeerJoined(peer) => ChannelEvent::PeerJoined(peer),
                TransportEvent::PeerLeft(peer) => ChannelEvent::PeerLeft(peer),
                TransportEvent::AuthorityChanged(holder) => ChannelEvent::AuthorityChanged(holder),
                TransportEvent::DataReceived { peer_id, payload } => match PlacementMessage::decode(&payload) {
                    Ok(message) => ChannelEvent::Message { from: peer_id, message },
                    Err(e) => {
                        self.dropped += 1;
                        warn!("Dropping undecodable payload from {}: {}", peer_id, e);
                        continue;
                    }
                },
            };
            return Some(event);
        }
    }
}
