//! Privileged helper-executable power mechanism.
//!
//! The first mechanism in the chain: a small setuid or sudo-wrapped binary
//! that knows how to switch the panel, invoked as `<helper> on|off`.

use super::{DisplayError, PowerStrategy};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::trace;

pub struct HelperCommand {
    program: PathBuf,
}

impl HelperCommand {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }
}

#[async_trait]
impl PowerStrategy for HelperCommand {
    fn name(&self) -> &'static str {
        "helper"
    }

    async fn set_power(&self, on: bool) -> Result<(), DisplayError> {
        let arg = if on { "on" } else { "off" };
        trace!("Running {} {}", self.program.display(), arg);

        let status = Command::new(&self.program)
            .arg(arg)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;

        if status.success() {
            Ok(())
        } else {
            Err(DisplayError::HelperFailed(status.code()))
        }
    }
}
