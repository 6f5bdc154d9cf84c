//! Display power actuation.
//!
//! Turning the panel on or off requires privileges the daemon may or may not
//! have, so the actuator is an ordered fallback chain: a dedicated helper
//! executable, the logind session brightness call, then a raw sysfs
//! backlight write. Every call walks the chain from the top; which mechanism
//! works can change at runtime (helper removed, polkit rules changed), so
//! nothing is cached across calls.

pub mod backlight;
pub mod helper;
pub mod logind;

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use backlight::{BacklightDevice, SysfsBacklight};
pub use helper::HelperCommand;
pub use logind::LogindBrightness;

/// Errors from a single power mechanism.
#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("Mechanism unavailable: {0}")]
    Unavailable(&'static str),

    #[error("Helper exited with status {0:?}")]
    HelperFailed(Option<i32>),

    #[error("DBus call failed: {0}")]
    Dbus(#[from] zbus::Error),

    #[error("Invalid brightness value: {0}")]
    InvalidBrightness(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract display power switch.
#[async_trait]
pub trait DisplayActuator: Send + Sync {
    /// Turn the display on. Returns whether any mechanism succeeded.
    async fn turn_on(&self) -> bool;

    /// Turn the display off. Returns whether any mechanism succeeded.
    async fn turn_off(&self) -> bool;

    /// Whether the display is currently powered and interactive.
    fn is_interactive(&self) -> bool;
}

/// One privileged mechanism in the fallback chain.
#[async_trait]
pub trait PowerStrategy: Send + Sync {
    /// Short mechanism name for logging.
    fn name(&self) -> &'static str;

    /// Apply the requested power state.
    async fn set_power(&self, on: bool) -> Result<(), DisplayError>;
}

/// Ordered fallback chain over [`PowerStrategy`] implementations.
///
/// The first strategy that reports success wins. All strategies are
/// attempted in order on every call.
pub struct PowerChain {
    strategies: Vec<Box<dyn PowerStrategy>>,
    backlight: Option<Arc<BacklightDevice>>,
    last_commanded_on: AtomicBool,
    dry_run: bool,
}

impl PowerChain {
    pub fn new(
        strategies: Vec<Box<dyn PowerStrategy>>,
        backlight: Option<Arc<BacklightDevice>>,
        dry_run: bool,
    ) -> Self {
        Self {
            strategies,
            backlight,
            last_commanded_on: AtomicBool::new(true),
            dry_run,
        }
    }

    async fn set_power(&self, on: bool) -> bool {
        let target = if on { "on" } else { "off" };

        if self.dry_run {
            info!("[DRY RUN] Would turn display {}", target);
            self.last_commanded_on.store(on, Ordering::Relaxed);
            return true;
        }

        for strategy in &self.strategies {
            match strategy.set_power(on).await {
                Ok(()) => {
                    debug!("Display {} via {}", target, strategy.name());
                    self.last_commanded_on.store(on, Ordering::Relaxed);
                    return true;
                }
                Err(e) => {
                    debug!("Display {} via {} failed: {}", target, strategy.name(), e);
                }
            }
        }

        warn!("No mechanism could turn the display {}", target);
        false
    }
}

#[async_trait]
impl DisplayActuator for PowerChain {
    async fn turn_on(&self) -> bool {
        self.set_power(true).await
    }

    async fn turn_off(&self) -> bool {
        self.set_power(false).await
    }

    fn is_interactive(&self) -> bool {
        // Prefer the hardware's answer over our own bookkeeping: the display
        // may have been toggled by something other than this process.
        match &self.backlight {
            Some(device) => device.is_lit(),
            None => self.last_commanded_on.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingStrategy {
        name: &'static str,
        fail: bool,
        calls: Arc<Mutex<Vec<(&'static str, bool)>>>,
    }

    #[async_trait]
    impl PowerStrategy for RecordingStrategy {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn set_power(&self, on: bool) -> Result<(), DisplayError> {
            self.calls.lock().unwrap().push((self.name, on));
            if self.fail {
                Err(DisplayError::Unavailable(self.name))
            } else {
                Ok(())
            }
        }
    }

    fn chain_of(
        specs: &[(&'static str, bool)],
    ) -> (PowerChain, Arc<Mutex<Vec<(&'static str, bool)>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let strategies: Vec<Box<dyn PowerStrategy>> = specs
            .iter()
            .map(|&(name, fail)| {
                Box::new(RecordingStrategy {
                    name,
                    fail,
                    calls: calls.clone(),
                }) as Box<dyn PowerStrategy>
            })
            .collect();
        (PowerChain::new(strategies, None, false), calls)
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let (chain, calls) = chain_of(&[("helper", false), ("logind", false)]);
        assert!(chain.turn_off().await);
        assert_eq!(calls.lock().unwrap().as_slice(), &[("helper", false)]);
    }

    #[tokio::test]
    async fn test_falls_through_failures_in_order() {
        let (chain, calls) = chain_of(&[("helper", true), ("logind", true), ("backlight", false)]);
        assert!(chain.turn_on().await);
        assert_eq!(
            calls.lock().unwrap().as_slice(),
            &[("helper", true), ("logind", true), ("backlight", true)]
        );
    }

    #[tokio::test]
    async fn test_no_caching_across_calls() {
        // A mechanism that failed once is still tried first next time.
        let (chain, calls) = chain_of(&[("helper", true), ("backlight", false)]);
        assert!(chain.turn_off().await);
        assert!(chain.turn_on().await);
        let recorded = calls.lock().unwrap();
        assert_eq!(
            recorded.as_slice(),
            &[
                ("helper", false),
                ("backlight", false),
                ("helper", true),
                ("backlight", true)
            ]
        );
    }

    #[tokio::test]
    async fn test_all_fail_reports_false() {
        let (chain, _) = chain_of(&[("helper", true), ("backlight", true)]);
        assert!(chain.is_interactive());
        assert!(!chain.turn_off().await);
        // Tracked state is only updated on success.
        assert!(chain.is_interactive());
    }

    #[tokio::test]
    async fn test_tracked_interactive_state() {
        let (chain, _) = chain_of(&[("helper", false)]);
        assert!(chain.is_interactive());
        chain.turn_off().await;
        assert!(!chain.is_interactive());
        chain.turn_on().await;
        assert!(chain.is_interactive());
    }

    #[tokio::test]
    async fn test_dry_run_skips_strategies() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let strategies: Vec<Box<dyn PowerStrategy>> = vec![Box::new(RecordingStrategy {
            name: "helper",
            fail: false,
            calls: calls.clone(),
        })];
        let chain = PowerChain::new(strategies, None, true);
        assert!(chain.turn_off().await);
        assert!(calls.lock().unwrap().is_empty());
    }
}
