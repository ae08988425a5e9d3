pub mod config;
pub mod core;
pub mod networking;
pub mod placement;
pub mod utils;

#[cfg(feature = "godot")]
pub mod bridge;

#[cfg(test)]
mod testing;

#[cfg(feature = "godot")]
mod extension {
    use godot::prelude::*;

    // The entry point of the extension library.
    struct UbatPlacementExtension;

    #[gdextension]
    unsafe impl ExtensionLibrary for UbatPlacementExtension {}
}
