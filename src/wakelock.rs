//! CPU wake-lock handling for the dark-off path.
//!
//! While the display is forced off by the light sensor the CPU must keep
//! running so the sensor can wake it back up. Acquire and release are both
//! idempotent; every acquire carries a hard timeout after which the lock
//! self-releases.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Abstract wake-lock handle.
#[async_trait]
pub trait WakeLock: Send + Sync {
    /// Acquire the lock with a hard expiry. No-op while already held.
    async fn acquire(&self, timeout: Duration);

    /// Release the lock. No-op while not held.
    async fn release(&self);

    /// Whether the lock is currently held.
    fn is_held(&self) -> bool;
}

/// Kernel wake lock backed by `/sys/power/wake_lock` / `wake_unlock`.
///
/// Writing the lock name to the lock file holds the CPU awake until the same
/// name is written to the unlock file. A background task releases the lock
/// when the acquire timeout expires.
#[derive(Clone)]
pub struct KernelWakeLock {
    inner: Arc<LockInner>,
}

struct LockInner {
    name: String,
    lock_path: PathBuf,
    unlock_path: PathBuf,
    held: Mutex<HeldState>,
}

#[derive(Default)]
struct HeldState {
    held: bool,
    expiry: Option<JoinHandle<()>>,
}

impl KernelWakeLock {
    /// Wake lock using the standard kernel sysfs paths.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_paths(
            name,
            PathBuf::from("/sys/power/wake_lock"),
            PathBuf::from("/sys/power/wake_unlock"),
        )
    }

    /// Wake lock with explicit control file paths.
    pub fn with_paths(name: impl Into<String>, lock_path: PathBuf, unlock_path: PathBuf) -> Self {
        Self {
            inner: Arc::new(LockInner {
                name: name.into(),
                lock_path,
                unlock_path,
                held: Mutex::new(HeldState::default()),
            }),
        }
    }
}

impl LockInner {
    async fn write_control(&self, path: &PathBuf) {
        if let Err(e) = tokio::fs::write(path, &self.name).await {
            warn!("Wake lock write to {} failed: {}", path.display(), e);
        }
    }

    async fn release(&self) {
        {
            let mut state = self.held.lock().unwrap();
            if !state.held {
                return;
            }
            state.held = false;
            if let Some(expiry) = state.expiry.take() {
                expiry.abort();
            }
        }

        self.write_control(&self.unlock_path).await;
        debug!("Wake lock '{}' released", self.name);
    }
}

#[async_trait]
impl WakeLock for KernelWakeLock {
    async fn acquire(&self, timeout: Duration) {
        {
            let mut state = self.inner.held.lock().unwrap();
            if state.held {
                return;
            }
            state.held = true;
        }

        self.inner.write_control(&self.inner.lock_path).await;
        debug!(
            "Wake lock '{}' acquired (expires in {:?})",
            self.inner.name, timeout
        );

        // Safety net: the lock must never outlive its timeout even if the
        // matching release is lost.
        let inner = Arc::downgrade(&self.inner);
        let expiry = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(lock) = inner.upgrade() {
                warn!("Wake lock '{}' hit its expiry, releasing", lock.name);
                lock.release().await;
            }
        });

        let mut state = self.inner.held.lock().unwrap();
        if let Some(old) = state.expiry.replace(expiry) {
            old.abort();
        }
    }

    async fn release(&self) {
        self.inner.release().await;
    }

    fn is_held(&self) -> bool {
        self.inner.held.lock().unwrap().held
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_lock(dir: &tempfile::TempDir) -> KernelWakeLock {
        KernelWakeLock::with_paths(
            "saverd_dark",
            dir.path().join("wake_lock"),
            dir.path().join("wake_unlock"),
        )
    }

    #[tokio::test]
    async fn test_acquire_release_idempotent() {
        let dir = tempdir().unwrap();
        let lock = test_lock(&dir);

        assert!(!lock.is_held());
        lock.acquire(Duration::from_secs(60)).await;
        lock.acquire(Duration::from_secs(60)).await;
        assert!(lock.is_held());

        lock.release().await;
        assert!(!lock.is_held());
        lock.release().await;
        assert!(!lock.is_held());
    }

    #[tokio::test]
    async fn test_acquire_writes_name() {
        let dir = tempdir().unwrap();
        let lock = test_lock(&dir);

        lock.acquire(Duration::from_secs(60)).await;
        let written = std::fs::read_to_string(dir.path().join("wake_lock")).unwrap();
        assert_eq!(written, "saverd_dark");

        lock.release().await;
        let written = std::fs::read_to_string(dir.path().join("wake_unlock")).unwrap();
        assert_eq!(written, "saverd_dark");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_releases() {
        let dir = tempdir().unwrap();
        let lock = test_lock(&dir);

        lock.acquire(Duration::from_secs(30)).await;
        assert!(lock.is_held());

        tokio::time::sleep(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;
        assert!(!lock.is_held());
    }
}
