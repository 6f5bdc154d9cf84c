//! saverd - user daemon for idle screensaver and display power control.
//!
//! Shows a screensaver surface after an idle timeout, turns the display off
//! in darkness and back on when light or motion returns.

use saverd::config::{Config, SettingsFeed};
use saverd::controller::IdleController;
use saverd::display::{
    BacklightDevice, DisplayActuator, HelperCommand, LogindBrightness, PowerChain, PowerStrategy,
    SysfsBacklight,
};
use saverd::lifecycle::ForegroundGate;
use saverd::screensaver::ViewerScreensaver;
use saverd::sensor::{IioSensorSource, SensorSource};
use saverd::wakelock::KernelWakeLock;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Idle screensaver and display power daemon.
///
/// Watches idle time, ambient light and proximity and drives a screensaver
/// viewer plus the display backlight.
#[derive(Parser, Debug)]
#[command(name = "saverd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable dry-run mode (log actuator calls instead of executing them).
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Run in probe mode: print a few sensor readings, then exit.
    #[arg(long)]
    probe: bool,

    /// Number of readings to capture in probe mode.
    #[arg(long, default_value = "5")]
    probe_count: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!("saverd v{} starting", env!("CARGO_PKG_VERSION"));

    let config =
        Config::load_or_default(args.config.as_deref()).context("Failed to load configuration")?;

    info!("Configuration loaded (dry_run={})", args.dry_run);

    let source = Arc::new(IioSensorSource::detect(&config.sensors));

    if args.probe {
        return run_probe(&*source, args.probe_count).await;
    }

    run_daemon(config, source, args).await
}

/// Initialize logging with the specified level.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(format!("saverd={level}"))
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Invalid log level")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    Ok(())
}

/// Probe mode: print a few sensor readings and exit.
async fn run_probe(source: &dyn SensorSource, count: usize) -> Result<()> {
    info!(
        "Probe mode: light={}, proximity={} (max range {})",
        source.light_available(),
        source.proximity_available(),
        source.proximity_max_range()
    );

    if !source.light_available() && !source.proximity_available() {
        anyhow::bail!("No sensors detected");
    }

    source.start();
    let mut light = source.light();
    let mut proximity = source.proximity();
    light.mark_unchanged();
    proximity.mark_unchanged();

    let mut captured = 0;
    while captured < count {
        let reading = tokio::time::timeout(Duration::from_secs(30), async {
            tokio::select! {
                changed = light.changed() => changed.map(|()| format!("light: {} lux", *light.borrow_and_update())),
                changed = proximity.changed() => changed.map(|()| format!("proximity: {}", *proximity.borrow_and_update())),
            }
        })
        .await;

        match reading {
            Ok(Ok(line)) => {
                captured += 1;
                println!("[{captured}] {line}");
            }
            Ok(Err(_)) => {
                error!("Sensor stream ended");
                break;
            }
            Err(_) => {
                warn!("Timeout waiting for sensor readings");
                break;
            }
        }
    }

    source.stop();
    info!("Probe complete, captured {} readings", captured);
    Ok(())
}

/// Run the daemon: start the controller and service signals until asked to
/// exit.
async fn run_daemon(config: Config, source: Arc<IioSensorSource>, args: Args) -> Result<()> {
    let backlight = match &config.display.backlight_device {
        Some(dir) => Some(BacklightDevice::open(dir.clone()).context("Configured backlight")?),
        None => BacklightDevice::detect(std::path::Path::new("/sys/class/backlight")),
    };

    let mut strategies: Vec<Box<dyn PowerStrategy>> = Vec::new();
    if let Some(helper) = &config.display.helper_command {
        strategies.push(Box::new(HelperCommand::new(helper.clone())));
    }
    if let Some(device) = &backlight {
        strategies.push(Box::new(LogindBrightness::new(device.clone())));
        strategies.push(Box::new(SysfsBacklight::new(device.clone())));
    }
    if strategies.is_empty() {
        warn!("No display power mechanism available; dark-off will be ineffective");
    }

    let display: Arc<dyn DisplayActuator> =
        Arc::new(PowerChain::new(strategies, backlight, args.dry_run));
    let screensaver = Arc::new(ViewerScreensaver::new(
        config.viewer.show_command.clone(),
        args.dry_run,
    ));
    let wake_lock = Arc::new(KernelWakeLock::new("saverd_dark"));

    // The daemon counts as its own foreground unit until told otherwise.
    let gate = ForegroundGate::new();
    gate.surface_started();

    let feed = SettingsFeed::new(config.screensaver.clone());

    let controller = IdleController::new(
        display,
        screensaver,
        wake_lock,
        source,
        gate.clone(),
    );
    controller
        .start(&feed)
        .context("Failed to start idle controller")?;

    info!("Daemon started");

    let mut reload = signal(SignalKind::hangup()).context("Installing SIGHUP handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("Installing SIGTERM handler")?;
    let mut fg_on = signal(SignalKind::user_defined1()).context("Installing SIGUSR1 handler")?;
    let mut fg_off = signal(SignalKind::user_defined2()).context("Installing SIGUSR2 handler")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            _ = terminate.recv() => {
                info!("SIGTERM received, shutting down");
                break;
            }
            _ = reload.recv() => {
                match Config::load_or_default(args.config.as_deref()) {
                    Ok(new_config) => {
                        info!("Configuration reloaded");
                        feed.publish(new_config.screensaver);
                    }
                    Err(e) => error!("Config reload failed: {e:#}"),
                }
            }
            _ = fg_on.recv() => {
                debug!("SIGUSR1: foreground unit started");
                gate.surface_started();
            }
            _ = fg_off.recv() => {
                debug!("SIGUSR2: foreground unit stopped");
                gate.surface_stopped();
            }
        }
    }

    controller.stop().await;
    info!("Daemon stopped");
    Ok(())
}
