//! Display power via the systemd-logind session `DBus` interface.
//!
//! logind lets the session owner set backlight brightness without extra
//! privileges (`org.freedesktop.login1.Session.SetBrightness`), which makes
//! it the IPC fallback when no helper executable is configured or working.

use super::backlight::BacklightDevice;
use super::{DisplayError, PowerStrategy};
use async_trait::async_trait;
use std::env;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use zbus::Connection;

const LOGIND_SERVICE: &str = "org.freedesktop.login1";
const LOGIND_PATH: &str = "/org/freedesktop/login1";
const MANAGER_INTERFACE: &str = "org.freedesktop.login1.Manager";
const SESSION_INTERFACE: &str = "org.freedesktop.login1.Session";
const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// Brightness control through the logind session object.
pub struct LogindBrightness {
    device: Arc<BacklightDevice>,
    session: Mutex<Option<(Connection, String)>>,
}

impl LogindBrightness {
    pub fn new(device: Arc<BacklightDevice>) -> Self {
        Self {
            device,
            session: Mutex::new(None),
        }
    }

    /// Connect to the system bus and resolve the session path, reusing an
    /// established connection on later calls.
    async fn session(&self) -> Result<(Connection, String), DisplayError> {
        let mut cached = self.session.lock().await;
        if let Some((conn, path)) = cached.as_ref() {
            return Ok((conn.clone(), path.clone()));
        }

        let conn = Connection::system().await?;
        let path = resolve_session_path(&conn).await?;
        info!("Resolved logind session path: {}", path);

        *cached = Some((conn.clone(), path.clone()));
        Ok((conn, path))
    }
}

#[async_trait]
impl PowerStrategy for LogindBrightness {
    fn name(&self) -> &'static str {
        "logind"
    }

    async fn set_power(&self, on: bool) -> Result<(), DisplayError> {
        let value = if on {
            self.device.restore_value()
        } else {
            self.device.snapshot_before_off();
            0
        };

        let (conn, path) = self.session().await?;
        let proxy = zbus::Proxy::new(&conn, LOGIND_SERVICE, path.as_str(), SESSION_INTERFACE)
            .await?;

        proxy
            .call::<_, _, ()>("SetBrightness", &("backlight", self.device.name(), value))
            .await?;

        debug!("logind SetBrightness({}) ok", value);
        Ok(())
    }
}

/// Resolve the session object path for the current session.
async fn resolve_session_path(conn: &Connection) -> Result<String, DisplayError> {
    // First try XDG_SESSION_ID if available
    if let Ok(session_id) = env::var("XDG_SESSION_ID") {
        debug!("Using XDG_SESSION_ID: {}", session_id);

        let proxy = zbus::Proxy::new(conn, LOGIND_SERVICE, LOGIND_PATH, MANAGER_INTERFACE).await?;
        let path: zbus::zvariant::OwnedObjectPath = proxy.call("GetSession", &(&session_id,)).await?;
        return Ok(path.to_string());
    }

    // Fall back to the magic session aliases, probing each with a property
    // read.
    debug!("XDG_SESSION_ID not set, trying session aliases");

    let self_path = format!("{LOGIND_PATH}/session/self");
    if session_exists(conn, &self_path).await {
        return Ok(self_path);
    }

    let auto_path = format!("{LOGIND_PATH}/session/auto");
    if session_exists(conn, &auto_path).await {
        return Ok(auto_path);
    }

    Err(DisplayError::Unavailable("no logind session"))
}

/// Check a session path by reading its Active property.
async fn session_exists(conn: &Connection, path: &str) -> bool {
    let Ok(proxy) = zbus::Proxy::new(conn, LOGIND_SERVICE, path, PROPERTIES_INTERFACE).await else {
        return false;
    };

    proxy
        .call::<_, _, zbus::zvariant::OwnedValue>("Get", &(SESSION_INTERFACE, "Active"))
        .await
        .is_ok()
}
