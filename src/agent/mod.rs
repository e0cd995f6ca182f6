//! Agent process supervision.
//!
//! Launches the agent binary inside a terminal session: composes the
//! startup command line, injects it, and drives the best-effort
//! confirmation handshake for the unattended-operation prompt.

pub mod config;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{debug, info};

use crate::tmux::TerminalApi;

/// Delayed key injections that accept the unattended-operation
/// confirmation prompt. The prompt defaults to "decline", so the selection
/// is moved down and then confirmed. This is a fixed-delay heuristic, not
/// an acknowledgment protocol: an agent that starts unusually fast or slow
/// can miss it, and delivery failures are swallowed.
pub const CONFIRM_SEQUENCE: &[(Duration, &str)] = &[
    (Duration::from_secs(3), "Down"),
    (Duration::from_millis(500), "Enter"),
];

/// What to launch and where.
#[derive(Debug)]
pub struct LaunchSpec<'a> {
    /// Terminal session name.
    pub terminal: &'a str,
    /// Workspace the agent starts in.
    pub work_dir: &'a Path,
    /// Environment exported before the agent starts.
    pub env_vars: &'a HashMap<String, String>,
    /// Startup prompt. Ignored when `resume_session_id` is set.
    pub initial_prompt: Option<&'a str>,
    /// Prior conversation to resume.
    pub resume_session_id: Option<&'a str>,
}

/// Launches the agent binary inside terminal sessions.
pub struct AgentLauncher {
    terminals: Arc<dyn TerminalApi>,
    binary: String,
}

impl AgentLauncher {
    pub fn new(terminals: Arc<dyn TerminalApi>, binary: impl Into<String>) -> Self {
        Self {
            terminals,
            binary: binary.into(),
        }
    }

    /// Kill any stale context with the same name, create a fresh one, and
    /// start the agent in it.
    pub async fn launch(&self, spec: LaunchSpec<'_>) -> Result<()> {
        self.terminals.kill(spec.terminal).await;
        self.terminals.create(spec.terminal, spec.work_dir).await?;

        let command = self.startup_line(&spec);
        self.terminals
            .send_keys(spec.terminal, &[&command, "Enter"])
            .await?;
        info!("Started agent in terminal session {}", spec.terminal);

        self.spawn_confirm_sequence(spec.terminal.to_string());
        Ok(())
    }

    /// The single command line injected into the fresh terminal session:
    /// environment exports, a directory change, and the agent invocation
    /// with the unattended-operation flag plus exactly one of a resume
    /// flag or a prompt argument. Every user-controlled fragment is
    /// shell-quoted.
    fn startup_line(&self, spec: &LaunchSpec<'_>) -> String {
        let mut parts = Vec::new();

        let mut keys: Vec<&String> = spec.env_vars.keys().collect();
        keys.sort();
        for key in keys {
            parts.push(format!("export {key}={}", shell_quote(&spec.env_vars[key])));
        }

        parts.push(format!(
            "cd {}",
            shell_quote(&spec.work_dir.to_string_lossy())
        ));

        let mut agent = format!("{} --dangerously-skip-permissions", self.binary);
        if let Some(resume) = spec.resume_session_id {
            agent.push_str(" --resume ");
            agent.push_str(&shell_quote(resume));
        } else if let Some(prompt) = spec.initial_prompt {
            agent.push(' ');
            agent.push_str(&shell_quote(prompt));
        }
        parts.push(agent);

        parts.join(" && ")
    }

    /// Run [`CONFIRM_SEQUENCE`] against the terminal in a detached task.
    /// Best-effort: a failed injection ends the sequence quietly.
    fn spawn_confirm_sequence(&self, terminal: String) {
        let terminals = self.terminals.clone();
        tokio::spawn(async move {
            for &(delay, key) in CONFIRM_SEQUENCE {
                tokio::time::sleep(delay).await;
                if let Err(err) = terminals.send_keys(&terminal, &[key]).await {
                    debug!("Confirmation key {key} for {terminal} not delivered: {err:#}");
                    return;
                }
            }
            debug!("Accepted unattended-operation prompt for {terminal}");
        });
    }
}

/// Quote a string for the POSIX shell running inside the terminal session.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
