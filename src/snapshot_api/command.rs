use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{AppSnapshot, SnapshotSource, parse_snapshots};

/// Runs a user supplied command line and reads snapshots from its stdout.
pub struct CommandSource {
    command_line: String,
}

impl CommandSource {
    pub fn new(command_line: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
        }
    }

    fn build_command(&self) -> Command {
        #[cfg(windows)]
        let mut command = {
            let mut command = Command::new("cmd");
            command.arg("/C").arg(&self.command_line);
            command
        };
        #[cfg(not(windows))]
        let mut command = {
            let mut command = Command::new("sh");
            command.arg("-c").arg(&self.command_line);
            command
        };
        // An abandoned fetch must not leave the provider running.
        command.kill_on_drop(true);
        command
    }
}

#[async_trait]
impl SnapshotSource for CommandSource {
    async fn fetch(&mut self) -> Result<Vec<AppSnapshot>> {
        debug!("Running snapshot command {:?}", self.command_line);
        let output = self
            .build_command()
            .output()
            .await
            .with_context(|| format!("Couldn't run {:?}", self.command_line))?;

        if !output.status.success() {
            bail!(
                "Snapshot command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        parse_snapshots(&String::from_utf8_lossy(&output.stdout))
    }
}
