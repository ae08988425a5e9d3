use serde::{Deserialize, Serialize};

use crate::core::descriptor::{NetworkId, ObjectDescriptor, PeerId, Pose, RequestId};

/// Every replication RPC, decoded once at the channel boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlacementMessage {
    // Requester -> authority: please create this
    CreateRequest { request_id: RequestId, descriptor: ObjectDescriptor },

    // Authority -> all: object exists with this id
    Create { request_id: Option<RequestId>, descriptor: ObjectDescriptor },

    // Authority -> peer(s): the full registry, replaces the receiver's cache
    Sync { descriptors: Vec<ObjectDescriptor> },

    // Requester -> authority: please delete this
    RemoveRequest { network_id: NetworkId },

    // Authority -> all: object is gone
    Remove { network_id: NetworkId },

    RequestOwnership { object_id: NetworkId, peer: PeerId },

    TransferOwnership { object_id: NetworkId, from: PeerId, to: PeerId },

    // Authority -> all: lease table changed
    OwnershipChanged { object_id: NetworkId, holder: Option<PeerId> },

    // Holder -> authority, then authority -> all
    PoseUpdate { object_id: NetworkId, pose: Pose },
}

impl PlacementMessage {
    pub fn name(&self) -> &'static str {
        match self {
            PlacementMessage::CreateRequest { .. } => "CreateRequest",
            PlacementMessage::Create { .. } => "Create",
            PlacementMessage::Sync { .. } => "Sync",
            PlacementMessage::RemoveRequest { .. } => "RemoveRequest",
            PlacementMessage::Remove { .. } => "Remove",
            PlacementMessage::RequestOwnership { .. } => "RequestOwnership",
            PlacementMessage::TransferOwnership { .. } => "TransferOwnership",
            PlacementMessage::OwnershipChanged { .. } => "OwnershipChanged",
            PlacementMessage::PoseUpdate { .. } => "PoseUpdate",
        }
    }

    // Messages only the authority may originate
    pub fn is_authoritative(&self) -> bool {
        matches!(
            self,
            PlacementMessage::Create { .. }
                | PlacementMessage::Sync { .. }
                | PlacementMessage::Remove { .. }
                | PlacementMessage::OwnershipChanged { .. }
        )
    }

    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(payload)
    }
}
