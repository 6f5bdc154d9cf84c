//! saverd - idle screensaver and display power control.
//!
//! A background controller fuses elapsed-idle time, ambient light and
//! proximity readings into two decisions: whether the screensaver surface
//! should be visible, and whether the display should be powered off because
//! the room went dark. Everything around those decisions (the viewer
//! process, the privileged display toggles, the sensors) sits behind narrow
//! actuator and source traits.

pub mod config;
pub mod controller;
pub mod display;
pub mod lifecycle;
pub mod screensaver;
pub mod sensor;
pub mod wakelock;

pub use config::{Config, ScreensaverSettings, SettingsFeed};
pub use controller::IdleController;
pub use lifecycle::ForegroundGate;
