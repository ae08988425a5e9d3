mod godot_logger;
mod godot_world;

pub use godot_logger::install_logger;
pub use godot_world::GodotWorld;
