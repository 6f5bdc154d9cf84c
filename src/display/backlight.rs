//! Raw sysfs backlight access.
//!
//! Last-resort power mechanism and the shared brightness bookkeeping for
//! every brightness-based strategy: the pre-off value is snapshotted once
//! and restored exactly, so a dark/light cycle never changes the visible
//! brightness level.

use super::{DisplayError, PowerStrategy};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// A backlight device directory under /sys/class/backlight.
pub struct BacklightDevice {
    dir: PathBuf,
    max_brightness: u32,
    saved: Mutex<Option<u32>>,
}

impl BacklightDevice {
    /// Open a specific device directory.
    pub fn open(dir: PathBuf) -> Result<Arc<Self>, DisplayError> {
        let max_raw = std::fs::read_to_string(dir.join("max_brightness"))?;
        let max_brightness = parse_brightness(&max_raw)?;
        info!(
            "Backlight device {} (max brightness {})",
            dir.display(),
            max_brightness
        );
        Ok(Arc::new(Self {
            dir,
            max_brightness,
            saved: Mutex::new(None),
        }))
    }

    /// Scan a base directory for the first usable backlight device.
    pub fn detect(base: &Path) -> Option<Arc<Self>> {
        let entries = match std::fs::read_dir(base) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot scan {} for backlights: {}", base.display(), e);
                return None;
            }
        };

        for entry in entries.flatten() {
            let dir = entry.path();
            if dir.join("brightness").exists() && dir.join("max_brightness").exists() {
                match Self::open(dir) {
                    Ok(device) => return Some(device),
                    Err(e) => warn!("Skipping backlight candidate: {}", e),
                }
            }
        }

        None
    }

    /// Device name as known to the kernel (the directory basename).
    pub fn name(&self) -> String {
        self.dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Current brightness. Prefers `actual_brightness` where exposed.
    pub fn brightness(&self) -> Result<u32, DisplayError> {
        let actual = self.dir.join("actual_brightness");
        let path = if actual.exists() {
            actual
        } else {
            self.dir.join("brightness")
        };
        parse_brightness(&std::fs::read_to_string(path)?)
    }

    /// Whether the panel is currently lit.
    pub fn is_lit(&self) -> bool {
        self.brightness().map(|b| b > 0).unwrap_or(true)
    }

    /// Record the current brightness so the next power-on restores it.
    /// A reading of zero never overwrites a previous snapshot.
    pub fn snapshot_before_off(&self) {
        match self.brightness() {
            Ok(value) if value > 0 => {
                *self.saved.lock().unwrap() = Some(value);
                debug!("Saved pre-off brightness {}", value);
            }
            Ok(_) => {}
            Err(e) => warn!("Could not read brightness for snapshot: {}", e),
        }
    }

    /// The value power-on should write: the snapshot if one exists, else the
    /// device-reported maximum.
    pub fn restore_value(&self) -> u32 {
        self.saved.lock().unwrap().unwrap_or(self.max_brightness)
    }

    /// Write a brightness value to the device.
    pub async fn write_brightness(&self, value: u32) -> Result<(), DisplayError> {
        tokio::fs::write(self.dir.join("brightness"), value.to_string()).await?;
        Ok(())
    }
}

fn parse_brightness(raw: &str) -> Result<u32, DisplayError> {
    raw.trim()
        .parse()
        .map_err(|_| DisplayError::InvalidBrightness(raw.trim().to_string()))
}

/// Direct sysfs brightness write, the final fallback.
pub struct SysfsBacklight {
    device: Arc<BacklightDevice>,
}

impl SysfsBacklight {
    pub fn new(device: Arc<BacklightDevice>) -> Self {
        Self { device }
    }
}

#[async_trait]
impl PowerStrategy for SysfsBacklight {
    fn name(&self) -> &'static str {
        "backlight"
    }

    async fn set_power(&self, on: bool) -> Result<(), DisplayError> {
        if on {
            self.device.write_brightness(self.device.restore_value()).await
        } else {
            self.device.snapshot_before_off();
            self.device.write_brightness(0).await
        }
    }
}
