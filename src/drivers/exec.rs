//! External command execution
//!
//! Every backend-management operation goes through [`CommandRunner`], which
//! captures stdout and surfaces non-zero exit as an error instead of a
//! process-fatal failure. Tests substitute a scripted implementation.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info};

/// `(script, args) -> (stdout, error)` port for backend-management commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, script: &str, args: &[&str]) -> Result<String>;
}

pub type CommandRunnerRef = Arc<dyn CommandRunner>;

/// Production runner shelling out via tokio's process support.
#[derive(Debug, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, script: &str, args: &[&str]) -> Result<String> {
        info!("Command: {} {}", script, args.join(" "));

        let output = tokio::process::Command::new(script)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::BackendExecution {
                command: script.to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let reason = if stderr.is_empty() {
                output.status.to_string()
            } else {
                stderr
            };
            error!("Command {} failed: {}", script, reason);
            return Err(Error::BackendExecution {
                command: format!("{} {}", script, args.join(" ")),
                reason,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        debug!("Command result:\n{}", stdout);
        Ok(stdout)
    }
}
