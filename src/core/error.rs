use std::path::PathBuf;

use thiserror::Error;

use crate::core::descriptor::{NetworkId, PeerId, RequestId, ResourceCost};
use crate::core::ownership::OwnershipError;
use crate::networking::network_manager::TransportError;

// Why the cursor's last preview cannot be committed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    NoPreview,
    NoSurface,
    Overlap,
    Unsupported,
}

impl std::fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            InvalidReason::NoPreview => "nothing is being previewed",
            InvalidReason::NoSurface => "no surface under the cursor",
            InvalidReason::Overlap => "overlaps existing geometry",
            InvalidReason::Unsupported => "not fully resting on a surface",
        };
        f.write_str(text)
    }
}

/// Every failure the placement subsystem surfaces. None of them are fatal.
#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("cannot place here: {0}")]
    Validation(InvalidReason),

    #[error("insufficient resources: {cost} required")]
    Affordability { cost: ResourceCost },

    #[error("authority never acknowledged placement {request_id}")]
    ReplicationTimeout { request_id: RequestId },

    #[error("could not access {}: {source}", path.display())]
    PersistenceIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed placement file {}: {source}", path.display())]
    PersistenceFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("only the authority may {action} (authority is {authority:?})")]
    NotAuthority { action: &'static str, authority: Option<PeerId> },

    #[error("object {0} is not registered")]
    UnknownObject(NetworkId),

    #[error("{type_name} has no network id yet")]
    Unassigned { type_name: String },

    #[error(transparent)]
    Ownership(#[from] OwnershipError),

    #[error("undecodable replication message: {0}")]
    Codec(#[from] bincode::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl PlacementError {
    // Short tag used in logs and the error history
    pub fn kind(&self) -> &'static str {
        match self {
            PlacementError::Validation(_) => "validation",
            PlacementError::Affordability { .. } => "affordability",
            PlacementError::ReplicationTimeout { .. } => "replication-timeout",
            PlacementError::PersistenceIo { .. } => "persistence-io",
            PlacementError::PersistenceFormat { .. } => "persistence-format",
            PlacementError::NotAuthority { .. } => "not-authority",
            PlacementError::UnknownObject(_) => "unknown-object",
            PlacementError::Unassigned { .. } => "unassigned",
            PlacementError::Ownership(_) => "ownership",
            PlacementError::Codec(_) => "codec",
            PlacementError::Transport(_) => "transport",
        }
    }
}
