use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Timer {
    due_at: Instant,
    // Re-armed after firing when set
    period: Option<Duration>,
}

/// Keyed timers driven by explicit `due(now)` calls from the logic loop.
///
/// Each key holds at most one timer; scheduling an existing key replaces it.
#[derive(Debug, Clone)]
pub struct Scheduler<K> {
    timers: HashMap<K, Timer>,
}

impl<K> Default for Scheduler<K> {
    fn default() -> Self {
        Self { timers: HashMap::new() }
    }
}

impl<K: Copy + Eq + Hash + Ord> Scheduler<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule_once(&mut self, key: K, delay: Duration, now: Instant) {
        self.timers.insert(key, Timer { due_at: now + delay, period: None });
    }

    pub fn schedule_repeating(&mut self, key: K, period: Duration, now: Instant) {
        self.timers.insert(key, Timer { due_at: now + period, period: Some(period) });
    }

    pub fn cancel(&mut self, key: K) -> bool {
        self.timers.remove(&key).is_some()
    }

    pub fn is_scheduled(&self, key: K) -> bool {
        self.timers.contains_key(&key)
    }

    pub fn next_due(&self, key: K) -> Option<Instant> {
        self.timers.get(&key).map(|t| t.due_at)
    }

    /// Returns the keys whose timers have fired, earliest first.
    /// A repeating timer fires at most once per call, even after a long stall.
    pub fn due(&mut self, now: Instant) -> Vec<K> {
        let mut fired: Vec<(Instant, K)> = self
            .timers
            .iter()
            .filter(|(_, timer)| timer.due_at <= now)
            .map(|(key, timer)| (timer.due_at, *key))
            .collect();
        fired.sort();

        for (_, key) in &fired {
            let Some(timer) = self.timers.get_mut(key) else { continue };
            match timer.period {
                Some(period) => timer.due_at = now + period,
                None => {
                    self.timers.remove(key);
                }
            }
        }
        fired.into_iter().map(|(_, key)| key).collect()
    }
}
