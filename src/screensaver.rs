//! Screensaver surface control.
//!
//! The surface is an external viewer process (a kiosk browser, mpv, an
//! image slideshow) launched from a configurable command template. Pause and
//! resume map to SIGSTOP/SIGCONT so the viewer keeps its state across a
//! dark-off interval; content updates swap the process in place.

use async_trait::async_trait;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, info, warn};

/// Errors from viewer process control.
#[derive(Error, Debug)]
pub enum ViewerError {
    #[error("Viewer command is empty")]
    EmptyCommand,

    #[error("No viewer process is running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract screensaver surface.
#[async_trait]
pub trait ScreensaverActuator: Send + Sync {
    /// Present the surface showing `content`.
    async fn show(&self, content: &str) -> Result<(), ViewerError>;

    /// Swap the displayed content without a hide/show transition.
    async fn update_content(&self, content: &str) -> Result<(), ViewerError>;

    /// Tear the surface down.
    async fn hide(&self) -> Result<(), ViewerError>;

    /// Freeze the surface, keeping its state.
    async fn pause(&self) -> Result<(), ViewerError>;

    /// Unfreeze a paused surface.
    async fn resume(&self) -> Result<(), ViewerError>;
}

/// Screensaver surface backed by a spawned viewer process.
pub struct ViewerScreensaver {
    command: Vec<String>,
    dry_run: bool,
    child: Mutex<Option<Child>>,
}

impl ViewerScreensaver {
    pub fn new(command: Vec<String>, dry_run: bool) -> Self {
        Self {
            command,
            dry_run,
            child: Mutex::new(None),
        }
    }

    /// Whether a viewer process is currently tracked. Test hook.
    pub async fn has_viewer(&self) -> bool {
        self.child.lock().await.is_some()
    }

    async fn spawn(&self, content: &str) -> Result<Child, ViewerError> {
        let argv = build_command(&self.command, content)?;
        debug!("Spawning viewer: {}", argv.join(" "));

        let child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(child)
    }

    async fn terminate(&self, mut child: Child) {
        if let Err(e) = signal_child(&child, libc::SIGTERM) {
            warn!("Could not signal viewer: {}", e);
        }

        // Give it a moment to exit cleanly before forcing the issue.
        match tokio::time::timeout(Duration::from_secs(2), child.wait()).await {
            Ok(Ok(status)) => debug!("Viewer exited: {}", status),
            Ok(Err(e)) => warn!("Waiting for viewer failed: {}", e),
            Err(_) => {
                warn!("Viewer ignored SIGTERM, killing");
                let _ = child.kill().await;
            }
        }
    }

    async fn signal_running(&self, sig: libc::c_int) -> Result<(), ViewerError> {
        let guard = self.child.lock().await;
        let child = guard.as_ref().ok_or(ViewerError::NotRunning)?;
        signal_child(child, sig)
    }
}

#[async_trait]
impl ScreensaverActuator for ViewerScreensaver {
    async fn show(&self, content: &str) -> Result<(), ViewerError> {
        if self.dry_run {
            info!("[DRY RUN] Would show screensaver at {}", content);
            return Ok(());
        }

        let mut guard = self.child.lock().await;
        // A lingering process means a previous hide failed; replace it.
        if let Some(old) = guard.take() {
            self.terminate(old).await;
        }
        *guard = Some(self.spawn(content).await?);
        Ok(())
    }

    async fn update_content(&self, content: &str) -> Result<(), ViewerError> {
        if self.dry_run {
            info!("[DRY RUN] Would update screensaver to {}", content);
            return Ok(());
        }

        let mut guard = self.child.lock().await;
        let Some(old) = guard.take() else {
            return Err(ViewerError::NotRunning);
        };
        self.terminate(old).await;
        *guard = Some(self.spawn(content).await?);
        Ok(())
    }

    async fn hide(&self) -> Result<(), ViewerError> {
        if self.dry_run {
            info!("[DRY RUN] Would hide screensaver");
            return Ok(());
        }

        let mut guard = self.child.lock().await;
        match guard.take() {
            Some(child) => {
                self.terminate(child).await;
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn pause(&self) -> Result<(), ViewerError> {
        if self.dry_run {
            info!("[DRY RUN] Would pause screensaver");
            return Ok(());
        }
        self.signal_running(libc::SIGSTOP).await
    }

    async fn resume(&self) -> Result<(), ViewerError> {
        if self.dry_run {
            info!("[DRY RUN] Would resume screensaver");
            return Ok(());
        }
        self.signal_running(libc::SIGCONT).await
    }
}

/// Substitute the content URL into the command template.
fn build_command(template: &[String], content: &str) -> Result<Vec<String>, ViewerError> {
    if template.is_empty() {
        return Err(ViewerError::EmptyCommand);
    }
    Ok(template
        .iter()
        .map(|arg| arg.replace("{url}", content))
        .collect())
}

/// Send a signal to the viewer process.
fn signal_child(child: &Child, sig: libc::c_int) -> Result<(), ViewerError> {
    let pid = child.id().ok_or(ViewerError::NotRunning)?;
    // Safe cast: pids fit i32 on Linux.
    let rc = unsafe { libc::kill(pid as libc::pid_t, sig) };
    if rc == 0 {
        Ok(())
    } else {
        Err(ViewerError::Io(std::io::Error::last_os_error()))
    }
}
