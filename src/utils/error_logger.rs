use std::collections::VecDeque;
use std::sync::Mutex;

use once_cell::sync::Lazy;

// Maximum number of errors to keep in history
const MAX_ERROR_HISTORY: usize = 100;

// Thread-safe error log
static ERROR_LOG: Lazy<Mutex<VecDeque<String>>> =
    Lazy::new(|| Mutex::new(VecDeque::with_capacity(MAX_ERROR_HISTORY)));

/// Logs an error and keeps it in the bounded history shown to the player.
pub fn log_error(module: &str, message: &str) {
    let error_message = format!("[{}] {}", module, message);
    log::error!("{}", error_message);

    let mut history = ERROR_LOG.lock().unwrap_or_else(|e| e.into_inner());
    history.push_back(error_message);
    // Remove oldest if exceeding capacity
    while history.len() > MAX_ERROR_HISTORY {
        history.pop_front();
    }
}

pub fn get_error_history() -> Vec<String> {
    let history = ERROR_LOG.lock().unwrap_or_else(|e| e.into_inner());
    history.iter().cloned().collect()
}
