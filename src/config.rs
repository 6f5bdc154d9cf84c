//! Configuration loading and the runtime settings feed for saverd.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::watch;

/// Content URL used when the built-in wallpaper override is enabled.
pub const BUILTIN_WALLPAPER_URL: &str = "file:///usr/share/saverd/wallpaper.html";

/// Allowed range for the idle timeout, in seconds.
const TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 10..=3600;

/// Screensaver behavior settings.
///
/// A value snapshot: the feed replaces the whole struct on every change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreensaverSettings {
    /// Master switch.
    pub enabled: bool,

    /// Content URL handed opaquely to the screensaver viewer.
    pub screensaver_url: String,

    /// When true, the screensaver may only show while `gate_visible` is true.
    pub gate_enabled: bool,

    /// External visibility flag consulted while `gate_enabled` is set.
    pub gate_visible: bool,

    /// Replace `screensaver_url` with the bundled wallpaper page.
    pub builtin_wallpaper: bool,

    /// Idle duration before the screensaver may show (10..=3600).
    pub timeout_seconds: u64,

    /// Turn the display off when ambient light drops to near-darkness.
    pub dark_off_enabled: bool,

    /// Suspend all screensaver activity while the host is backgrounded.
    pub background_pause_enabled: bool,

    /// Wake the display when the proximity sensor reports something near.
    pub motion_on_enabled: bool,
}

impl Default for ScreensaverSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            screensaver_url: String::new(),
            gate_enabled: false,
            gate_visible: false,
            builtin_wallpaper: false,
            timeout_seconds: 300,
            dark_off_enabled: false,
            background_pause_enabled: false,
            motion_on_enabled: false,
        }
    }
}

impl ScreensaverSettings {
    /// The content URL the viewer should actually display.
    pub fn effective_url(&self) -> &str {
        if self.builtin_wallpaper {
            BUILTIN_WALLPAPER_URL
        } else {
            &self.screensaver_url
        }
    }

    /// True when the external visibility gate permits showing.
    pub fn gate_satisfied(&self) -> bool {
        !self.gate_enabled || self.gate_visible
    }

    /// Clamp out-of-range values to their allowed bounds.
    fn sanitize(mut self) -> Self {
        self.timeout_seconds = self
            .timeout_seconds
            .clamp(*TIMEOUT_RANGE.start(), *TIMEOUT_RANGE.end());
        self
    }
}

/// Display power actuation settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Privileged helper executable invoked as `<helper> on|off`.
    pub helper_command: Option<PathBuf>,

    /// Backlight device directory. Autodetected under
    /// /sys/class/backlight when unset.
    pub backlight_device: Option<PathBuf>,
}

/// Screensaver viewer process settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Command line used to present the screensaver surface.
    /// Occurrences of `{url}` are replaced with the content URL.
    pub show_command: Vec<String>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            show_command: vec![
                "chromium".to_string(),
                "--kiosk".to_string(),
                "{url}".to_string(),
            ],
        }
    }
}

/// Sensor polling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Base directory scanned for industrial-I/O sensor devices.
    pub iio_base_dir: PathBuf,

    /// Sensor poll interval in milliseconds.
    pub poll_interval_ms: u64,

    /// Proximity reading treated as the sensor's maximum range.
    pub proximity_max_range: f32,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            iio_base_dir: PathBuf::from("/sys/bus/iio/devices"),
            poll_interval_ms: 500,
            proximity_max_range: 5.0,
        }
    }
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub screensaver: ScreensaverSettings,
    pub display: DisplayConfig,
    pub viewer: ViewerConfig,
    pub sensors: SensorConfig,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.screensaver = config.screensaver.sanitize();
        Ok(config)
    }

    /// Load configuration from the default path, or return defaults if not found.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            return Self::load(p);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let default_path = config_dir.join("saverd").join("config.toml");
            if default_path.exists() {
                return Self::load(&default_path);
            }
        }

        Ok(Self::default())
    }
}

/// Distinct-until-changed stream of [`ScreensaverSettings`] snapshots.
///
/// The controller reads the current snapshot at start and then observes
/// changes; publishers (config reload, remote gate updates) push whole
/// replacement snapshots.
#[derive(Debug)]
pub struct SettingsFeed {
    tx: watch::Sender<ScreensaverSettings>,
}

impl SettingsFeed {
    /// Create a feed seeded with an initial snapshot.
    pub fn new(initial: ScreensaverSettings) -> Self {
        let (tx, _) = watch::channel(initial.sanitize());
        Self { tx }
    }

    /// The latest published snapshot.
    pub fn current(&self) -> ScreensaverSettings {
        self.tx.borrow().clone()
    }

    /// Publish a new snapshot. Identical snapshots are dropped so
    /// subscribers only wake on real changes.
    pub fn publish(&self, settings: ScreensaverSettings) {
        let settings = settings.sanitize();
        self.tx.send_if_modified(|current| {
            if *current == settings {
                false
            } else {
                *current = settings;
                true
            }
        });
    }

    /// Subscribe to change notifications. The receiver always holds the
    /// latest snapshot, even before the first change.
    pub fn subscribe(&self) -> watch::Receiver<ScreensaverSettings> {
        self.tx.subscribe()
    }
}
