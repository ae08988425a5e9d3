pub mod authority;
pub mod descriptor;
pub mod error;
pub mod event_bus;
pub mod inventory;
pub mod ownership;
pub mod persistence;
pub mod placement_manager;
pub mod registry;
pub mod scheduler;
pub mod world;

pub use authority::AuthorityManager;
pub use descriptor::{NetworkId, ObjectDescriptor, PeerId, Pose, RequestId, ResourceCost};
pub use error::{InvalidReason, PlacementError};
pub use event_bus::EventBus;
pub use placement_manager::{CommitOutcome, PlacementManager};
pub use registry::CanonicalRegistry;
