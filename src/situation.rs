//! Delivery situation
//!
//! Display, charger and survival-mode notifications arrive asynchronously
//! from the platform. [`SituationMonitor`] folds them into one cached
//! [`Situation`] that the dispatcher reads per event without recomputing.

use crate::types::Situation;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

type Listener = Box<dyn Fn(Situation) + Send + Sync>;

#[derive(Default)]
struct State {
    display_off: AtomicBool,
    charger_connected: AtomicBool,
    survival_mode: AtomicBool,
    listeners: Mutex<Vec<Listener>>,
}

/// Shared handle to the current delivery situation
#[derive(Clone, Default)]
pub struct SituationMonitor {
    state: Arc<State>,
}

impl SituationMonitor {
    /// Display on, charger disconnected, not in survival mode
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached situation; survival mode takes precedence over display state
    pub fn current(&self) -> Situation {
        if self.state.survival_mode.load(Ordering::Acquire) {
            Situation::SurvivalMode
        } else if self.state.display_off.load(Ordering::Acquire) {
            Situation::LcdOff
        } else {
            Situation::LcdOn
        }
    }

    pub fn is_display_on(&self) -> bool {
        !self.state.display_off.load(Ordering::Acquire)
    }

    pub fn is_charger_connected(&self) -> bool {
        self.state.charger_connected.load(Ordering::Acquire)
    }

    /// Register a callback run after every situation change
    pub fn subscribe(&self, listener: impl Fn(Situation) + Send + Sync + 'static) {
        self.listeners().push(Box::new(listener));
    }

    fn listeners(&self) -> std::sync::MutexGuard<'_, Vec<Listener>> {
        self.state
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update(&self, flag: &AtomicBool, value: bool, what: &str) {
        let before = self.current();
        if flag.swap(value, Ordering::AcqRel) == value {
            return;
        }
        let after = self.current();
        tracing::debug!("{} changed to {}", what, value);
        if before != after {
            tracing::info!("Situation changed: {} -> {}", before, after);
            for listener in self.listeners().iter() {
                listener(after);
            }
        }
    }

    /// Display power notification
    pub fn set_display_on(&self, on: bool) {
        self.update(&self.state.display_off, !on, "display off");
    }

    /// Charger notification
    pub fn set_charger_connected(&self, connected: bool) {
        self.update(&self.state.charger_connected, connected, "charger connected");
    }

    /// Power-save notification
    pub fn set_survival_mode(&self, enabled: bool) {
        self.update(&self.state.survival_mode, enabled, "survival mode");
    }
}

impl std::fmt::Debug for SituationMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SituationMonitor")
            .field("situation", &self.current())
            .field("charger_connected", &self.is_charger_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_default_is_display_on() {
        let monitor = SituationMonitor::new();
        assert_eq!(monitor.current(), Situation::LcdOn);
        assert!(monitor.is_display_on());
    }

    #[test]
    fn test_survival_overrides_display() {
        let monitor = SituationMonitor::new();
        monitor.set_display_on(false);
        assert_eq!(monitor.current(), Situation::LcdOff);
        monitor.set_survival_mode(true);
        assert_eq!(monitor.current(), Situation::SurvivalMode);
        monitor.set_survival_mode(false);
        assert_eq!(monitor.current(), Situation::LcdOff);
    }

    #[test]
    fn test_listeners_fire_only_on_situation_change() {
        let monitor = SituationMonitor::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        monitor.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        monitor.set_display_on(true);
        monitor.set_charger_connected(true);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(monitor.is_charger_connected());

        monitor.set_display_on(false);
        monitor.set_display_on(false);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clones_share_state() {
        let monitor = SituationMonitor::new();
        let other = monitor.clone();
        other.set_display_on(false);
        assert_eq!(monitor.current(), Situation::LcdOff);
    }
}
