//! Terminal-multiplexer control.
//!
//! Sessions run their agent inside a named, detached tmux session so the
//! process survives independently of any client connection and commands
//! can be injected asynchronously. The registry stays authoritative for
//! session bookkeeping; [`TerminalApi::list`] only feeds health reporting.

use std::path::Path;
use std::process::Output;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::process::Command;

/// Control surface over named terminal execution contexts.
#[async_trait]
pub trait TerminalApi: Send + Sync {
    /// Create a new detached context rooted at `work_dir`. Fails if a
    /// context with the same name already exists; callers kill first.
    async fn create(&self, name: &str, work_dir: &Path) -> Result<()>;

    /// Remove the named context. A no-op when absent; failures are
    /// logged, never returned.
    async fn kill(&self, name: &str);

    /// Names of the currently live contexts. Empty when the multiplexer
    /// server is not running.
    async fn list(&self) -> Vec<String>;

    /// Inject key input into the named context.
    async fn send_keys(&self, name: &str, keys: &[&str]) -> Result<()>;
}

/// tmux-backed implementation of [`TerminalApi`].
#[derive(Debug, Default, Clone)]
pub struct TmuxController;

impl TmuxController {
    pub fn new() -> Self {
        Self
    }

    async fn run_tmux(args: &[&str]) -> Result<Output> {
        Command::new("tmux")
            .args(args)
            .output()
            .await
            .with_context(|| format!("running tmux {}", args.first().copied().unwrap_or("")))
    }
}

#[async_trait]
impl TerminalApi for TmuxController {
    async fn create(&self, name: &str, work_dir: &Path) -> Result<()> {
        let dir = work_dir.to_string_lossy();
        let output =
            Self::run_tmux(&["new-session", "-d", "-s", name, "-c", dir.as_ref()]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("tmux new-session for '{name}' failed: {}", stderr.trim());
        }
        info!("Created terminal session {name}");
        Ok(())
    }

    async fn kill(&self, name: &str) {
        match Self::run_tmux(&["kill-session", "-t", name]).await {
            Ok(output) if output.status.success() => {
                info!("Killed terminal session {name}");
            }
            Ok(_) => {
                debug!("Terminal session {name} not present");
            }
            Err(err) => {
                warn!("Could not kill terminal session {name}: {err:?}");
            }
        }
    }

    async fn list(&self) -> Vec<String> {
        match Self::run_tmux(&["list-sessions", "-F", "#{session_name}"]).await {
            Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
                .lines()
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    async fn send_keys(&self, name: &str, keys: &[&str]) -> Result<()> {
        let mut args = vec!["send-keys", "-t", name];
        args.extend_from_slice(keys);

        let output = Self::run_tmux(&args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("tmux send-keys to '{name}' failed: {}", stderr.trim());
        }
        Ok(())
    }
}
