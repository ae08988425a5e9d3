pub mod cursor;
pub mod params;

pub use cursor::{GridCursor, PlacementCandidate, Preview};
pub use params::{ForcedAxis, PlaceableDef, PlacementParams};
