pub mod loopback;
pub mod message;
pub mod network_manager;
pub mod replication_channel;

pub use loopback::{LoopbackHub, LoopbackTransport};
pub use message::PlacementMessage;
pub use network_manager::{Target, Transport, TransportError, TransportEvent};
pub use replication_channel::{ChannelEvent, ReplicationChannel};
