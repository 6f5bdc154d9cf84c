//! Host foreground tracking.
//!
//! The daemon itself has no window; whatever host-surface code is deemed
//! foreground-aware reports started/stopped units here. The controller only
//! consumes the resulting boolean and its transition stream.

use std::sync::Mutex;
use tokio::sync::watch;
use tracing::debug;

/// Counts started-but-not-stopped foreground units.
///
/// `foreground = count > 0`. Cloning shares the same counter.
#[derive(Debug, Clone)]
pub struct ForegroundGate {
    inner: std::sync::Arc<GateInner>,
}

#[derive(Debug)]
struct GateInner {
    count: Mutex<u32>,
    tx: watch::Sender<bool>,
}

impl ForegroundGate {
    /// Create a gate with no started units (background).
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            inner: std::sync::Arc::new(GateInner {
                count: Mutex::new(0),
                tx,
            }),
        }
    }

    /// Record a foreground unit starting.
    pub fn surface_started(&self) {
        let mut count = self.inner.count.lock().unwrap();
        *count += 1;
        self.publish(*count);
    }

    /// Record a foreground unit stopping. Saturates at zero.
    pub fn surface_stopped(&self) {
        let mut count = self.inner.count.lock().unwrap();
        *count = count.saturating_sub(1);
        self.publish(*count);
    }

    /// Whether any foreground unit is currently started.
    pub fn is_foreground(&self) -> bool {
        *self.inner.tx.borrow()
    }

    /// Subscribe to foreground transitions. The receiver holds the current
    /// value; only actual true/false flips wake subscribers.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.tx.subscribe()
    }

    fn publish(&self, count: u32) {
        let foreground = count > 0;
        self.inner.tx.send_if_modified(|current| {
            if *current == foreground {
                false
            } else {
                debug!("Foreground changed: {} -> {}", *current, foreground);
                *current = foreground;
                true
            }
        });
    }
}

impl Default for ForegroundGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_in_background() {
        let gate = ForegroundGate::new();
        assert!(!gate.is_foreground());
    }

    #[test]
    fn test_counter_tracks_units() {
        let gate = ForegroundGate::new();
        gate.surface_started();
        gate.surface_started();
        assert!(gate.is_foreground());

        gate.surface_stopped();
        assert!(gate.is_foreground());

        gate.surface_stopped();
        assert!(!gate.is_foreground());
    }

    #[test]
    fn test_stop_saturates_at_zero() {
        let gate = ForegroundGate::new();
        gate.surface_stopped();
        gate.surface_stopped();
        assert!(!gate.is_foreground());

        // A single start must still bring it foreground.
        gate.surface_started();
        assert!(gate.is_foreground());
    }

    #[test]
    fn test_subscribers_only_wake_on_flips() {
        let gate = ForegroundGate::new();
        let mut rx = gate.subscribe();
        rx.mark_unchanged();

        gate.surface_started();
        assert!(rx.has_changed().unwrap());
        rx.mark_unchanged();

        // Second unit: still foreground, no flip.
        gate.surface_started();
        assert!(!rx.has_changed().unwrap());
    }
}
