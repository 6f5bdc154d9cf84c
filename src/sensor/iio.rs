//! Industrial-I/O sysfs sensor source.
//!
//! Reads ambient light and proximity values from the kernel's iio sysfs
//! interface by polling. Light sensors expose either a processed
//! `in_illuminance_input` in lux or a raw reading plus scale; proximity
//! sensors expose `in_proximity_raw`.

use super::SensorSource;
use crate::config::SensorConfig;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Polling sensor source over iio sysfs device directories.
pub struct IioSensorSource {
    light: Option<LightChannel>,
    proximity_path: Option<PathBuf>,
    proximity_max_range: f32,
    poll_interval: Duration,
    light_tx: watch::Sender<f32>,
    proximity_tx: watch::Sender<f32>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
struct LightChannel {
    path: PathBuf,
    scale: f32,
}

impl IioSensorSource {
    /// Scan the configured base directory for light and proximity channels.
    pub fn detect(config: &SensorConfig) -> Self {
        let mut light = None;
        let mut proximity_path = None;

        if let Ok(entries) = std::fs::read_dir(&config.iio_base_dir) {
            for entry in entries.flatten() {
                let dir = entry.path();
                if light.is_none() {
                    light = detect_light_channel(&dir);
                }
                if proximity_path.is_none() {
                    let candidate = dir.join("in_proximity_raw");
                    if candidate.exists() {
                        info!("Proximity sensor: {}", candidate.display());
                        proximity_path = Some(candidate);
                    }
                }
            }
        }

        if light.is_none() {
            debug!("No iio light channel under {}", config.iio_base_dir.display());
        }
        if proximity_path.is_none() {
            debug!(
                "No iio proximity channel under {}",
                config.iio_base_dir.display()
            );
        }

        Self {
            light,
            proximity_path,
            proximity_max_range: config.proximity_max_range,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            light_tx: watch::channel(0.0).0,
            proximity_tx: watch::channel(0.0).0,
            poll_task: Mutex::new(None),
        }
    }
}

impl SensorSource for IioSensorSource {
    fn light_available(&self) -> bool {
        self.light.is_some()
    }

    fn proximity_available(&self) -> bool {
        self.proximity_path.is_some()
    }

    fn proximity_max_range(&self) -> f32 {
        self.proximity_max_range
    }

    fn start(&self) {
        let mut task = self.poll_task.lock().unwrap();
        if task.is_some() {
            return;
        }

        let light = self.light.clone();
        let proximity_path = self.proximity_path.clone();
        let light_tx = self.light_tx.clone();
        let proximity_tx = self.proximity_tx.clone();
        let interval = self.poll_interval;

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                if let Some(channel) = &light {
                    match read_value(&channel.path).await {
                        Ok(raw) => {
                            let lux = raw * channel.scale;
                            trace!("Light reading: {} lux", lux);
                            light_tx.send_replace(lux);
                        }
                        Err(e) => warn!("Light read failed: {}", e),
                    }
                }

                if let Some(path) = &proximity_path {
                    match read_value(path).await {
                        Ok(distance) => {
                            trace!("Proximity reading: {}", distance);
                            proximity_tx.send_replace(distance);
                        }
                        Err(e) => warn!("Proximity read failed: {}", e),
                    }
                }
            }
        }));
        debug!("iio polling started (every {:?})", interval);
    }

    fn stop(&self) {
        if let Some(task) = self.poll_task.lock().unwrap().take() {
            task.abort();
            debug!("iio polling stopped");
        }
    }

    fn light(&self) -> watch::Receiver<f32> {
        self.light_tx.subscribe()
    }

    fn proximity(&self) -> watch::Receiver<f32> {
        self.proximity_tx.subscribe()
    }
}

/// Find a light channel in a device directory: processed lux if exposed,
/// else raw with its scale applied.
fn detect_light_channel(dir: &Path) -> Option<LightChannel> {
    let processed = dir.join("in_illuminance_input");
    if processed.exists() {
        info!("Light sensor: {}", processed.display());
        return Some(LightChannel {
            path: processed,
            scale: 1.0,
        });
    }

    let raw = dir.join("in_illuminance_raw");
    if raw.exists() {
        let scale = std::fs::read_to_string(dir.join("in_illuminance_scale"))
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(1.0);
        info!("Light sensor: {} (scale {})", raw.display(), scale);
        return Some(LightChannel { path: raw, scale });
    }

    None
}

async fn read_value(path: &Path) -> Result<f32, super::SensorError> {
    let raw = tokio::fs::read_to_string(path).await?;
    raw.trim()
        .parse()
        .map_err(|_| super::SensorError::BadReading(raw.trim().to_string()))
}
