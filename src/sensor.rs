//! Ambient light and proximity sensing.
//!
//! Two independent reading streams sit behind one [`SensorSource`] handle.
//! [`SensorFusion`] starts and stops the streams lazily from the feature
//! switches and forwards readings into the controller's event channel. The
//! underlying handle is reference-counted: it is only released once the last
//! consumer stops.

pub mod iio;

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use iio::IioSensorSource;

/// Errors from sensor plumbing.
#[derive(Error, Debug)]
pub enum SensorError {
    #[error("Sensor not available: {0}")]
    Unavailable(&'static str),

    #[error("Unparseable reading: {0}")]
    BadReading(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A reading delivered to the controller loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorEvent {
    /// Ambient light level in lux.
    Light(f32),

    /// Proximity distance against the sensor's maximum range.
    Proximity { distance: f32, max_range: f32 },
}

/// Shared handle over the physical sensors.
///
/// `start`/`stop` are idempotent; readings are published on watch channels
/// that always hold the latest value.
pub trait SensorSource: Send + Sync {
    /// Whether a light sensor is present.
    fn light_available(&self) -> bool;

    /// Whether a proximity sensor is present.
    fn proximity_available(&self) -> bool;

    /// The proximity reading treated as "nothing near".
    fn proximity_max_range(&self) -> f32;

    /// Begin delivering readings. No-op while already started.
    fn start(&self);

    /// Stop delivering readings. No-op while not started.
    fn stop(&self);

    /// Subscribe to light readings.
    fn light(&self) -> watch::Receiver<f32>;

    /// Subscribe to proximity readings.
    fn proximity(&self) -> watch::Receiver<f32>;
}

/// Starts and stops sensor consumption to match the enabled features.
///
/// Owns one forwarder task per active path; each forwards readings from the
/// source's watch channel into the controller's event channel.
pub struct SensorFusion {
    source: Arc<dyn SensorSource>,
    events: mpsc::Sender<SensorEvent>,
    light_task: Option<JoinHandle<()>>,
    motion_task: Option<JoinHandle<()>>,
    warned_no_light: bool,
    warned_no_proximity: bool,
}

impl SensorFusion {
    pub fn new(source: Arc<dyn SensorSource>, events: mpsc::Sender<SensorEvent>) -> Self {
        Self {
            source,
            events,
            light_task: None,
            motion_task: None,
            warned_no_light: false,
            warned_no_proximity: false,
        }
    }

    /// Align running sensor paths with the feature switches.
    pub fn reconcile(&mut self, dark_off_enabled: bool, motion_on_enabled: bool) {
        if dark_off_enabled {
            self.start_light();
        } else {
            self.stop_light();
        }

        if motion_on_enabled {
            self.start_motion();
        } else {
            self.stop_motion();
        }
    }

    /// Stop both paths and release the source handle.
    pub fn stop_all(&mut self) {
        self.stop_light();
        self.stop_motion();
    }

    /// Which paths are currently running, as (light, motion). Test hook.
    pub fn active(&self) -> (bool, bool) {
        (self.light_task.is_some(), self.motion_task.is_some())
    }

    fn start_light(&mut self) {
        if self.light_task.is_some() {
            return;
        }
        if !self.source.light_available() {
            if !self.warned_no_light {
                warn!("Light sensor not available, dark-off disabled");
                self.warned_no_light = true;
            }
            return;
        }

        self.source.start();

        let mut rx = self.source.light();
        rx.mark_unchanged();
        let events = self.events.clone();
        self.light_task = Some(tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let lux = *rx.borrow_and_update();
                if events.send(SensorEvent::Light(lux)).await.is_err() {
                    break;
                }
            }
        }));
        debug!("Light path started");
    }

    fn stop_light(&mut self) {
        if let Some(task) = self.light_task.take() {
            task.abort();
            debug!("Light path stopped");
        }
        self.release_source_if_unused();
    }

    fn start_motion(&mut self) {
        if self.motion_task.is_some() {
            return;
        }
        if !self.source.proximity_available() {
            if !self.warned_no_proximity {
                warn!("Proximity sensor not available, motion-on disabled");
                self.warned_no_proximity = true;
            }
            return;
        }

        self.source.start();

        let mut rx = self.source.proximity();
        rx.mark_unchanged();
        let max_range = self.source.proximity_max_range();
        let events = self.events.clone();
        self.motion_task = Some(tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let distance = *rx.borrow_and_update();
                let event = SensorEvent::Proximity {
                    distance,
                    max_range,
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
        }));
        debug!("Proximity path started");
    }

    fn stop_motion(&mut self) {
        if let Some(task) = self.motion_task.take() {
            task.abort();
            debug!("Proximity path stopped");
        }
        self.release_source_if_unused();
    }

    /// The handle stays up while any consumer still needs it.
    fn release_source_if_unused(&self) {
        if self.light_task.is_none() && self.motion_task.is_none() {
            self.source.stop();
        }
    }
}
