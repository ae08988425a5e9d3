// godot_logger.rs
use godot::prelude::*;
use log::{Level, LevelFilter, Log, Metadata, Record};

// Routes `log` records to the editor output panel
struct GodotLogger;

impl Log for GodotLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        match record.level() {
            Level::Error => godot_error!("[{}] {}", record.target(), record.args()),
            Level::Warn => godot_warn!("[{}] {}", record.target(), record.args()),
            _ => godot_print!("[{}] {}", record.target(), record.args()),
        }
    }

    fn flush(&self) {}
}

static LOGGER: GodotLogger = GodotLogger;

/// Installs the Godot logger once; later calls only change the level.
pub fn install_logger(level: LevelFilter) {
    if log::set_logger(&LOGGER).is_err() {
        log::debug!("Logger already installed");
    }
    log::set_max_level(level);
}
