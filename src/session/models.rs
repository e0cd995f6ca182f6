//! Session data models.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Creation pipeline is in flight (repository synced, agent not yet up).
    Starting,
    /// Agent process launched in its terminal session.
    Running,
    /// Reserved; no transition currently assigns it.
    Stable,
    /// Creation failed; the record stays visible until killed or reaped.
    Error,
    /// Terminal state; the record is removed from the registry.
    Stopped,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Starting => write!(f, "starting"),
            SessionStatus::Running => write!(f, "running"),
            SessionStatus::Stable => write!(f, "stable"),
            SessionStatus::Error => write!(f, "error"),
            SessionStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// One tracked instance of a synchronized repository plus a launched agent
/// process and its lifecycle state.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    /// Unique session ID (UUID v4), immutable after creation.
    pub id: String,
    /// Human-readable project name derived from the repository URL.
    pub project: String,
    /// Source repository URL.
    pub repo_url: String,
    /// Branch the workspace tracks.
    pub branch: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Name of the terminal-multiplexer session hosting the agent.
    pub terminal: String,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Last observed activity; `None` until the agent launches.
    pub last_activity: Option<DateTime<Utc>>,
    /// Absolute path of the synchronized repository clone.
    pub work_dir: PathBuf,
    /// Admission slot held while admitted.
    #[serde(skip)]
    pub slot: Option<usize>,
}

impl Session {
    /// The instant idle time is measured from.
    pub fn idle_reference(&self) -> DateTime<Utc> {
        self.last_activity.unwrap_or(self.created_at)
    }
}

/// Agent configuration payload materialized into the workspace before launch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfigPayload {
    /// MCP server definitions, written verbatim to `mcp.json`.
    #[serde(default)]
    pub mcp: Option<serde_json::Value>,
    /// Settings document, merged key-by-key into any existing one.
    #[serde(default)]
    pub settings: Option<serde_json::Value>,
    /// Permission lists, merged into the settings document.
    #[serde(default)]
    pub permissions: Option<PermissionsConfig>,
}

/// Allow/deny permission lists for the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionsConfig {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

/// Request to create a new session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// Repository to synchronize (HTTPS or SSH git URL).
    pub repo_url: String,
    /// Branch to check out; defaults to `main`.
    #[serde(default)]
    pub branch: Option<String>,
    /// Configuration artifacts to materialize before launch.
    #[serde(default)]
    pub agent_config: Option<AgentConfigPayload>,
    /// Environment variables exported in the agent's terminal session.
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
    /// Prompt handed to the agent on startup. Ignored when
    /// `resume_session_id` is set.
    #[serde(default)]
    pub initial_prompt: Option<String>,
    /// Prior agent conversation to resume.
    #[serde(default)]
    pub resume_session_id: Option<String>,
    /// Base64-encoded JSONL transcript backing `resume_session_id`.
    #[serde(default)]
    pub session_data: Option<String>,
    /// Base64-encoded diff of uncommitted changes to replay onto the clone.
    #[serde(default)]
    pub diff_patch: Option<String>,
    /// Base64-encoded override markdown document.
    #[serde(default)]
    pub agent_md: Option<String>,
}

/// Summary row returned by session listings.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub project: String,
    pub status: SessionStatus,
    pub terminal: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            project: session.project.clone(),
            status: session.status,
            terminal: session.terminal.clone(),
            created_at: session.created_at,
            last_activity: session.last_activity,
        }
    }
}

/// Detail view of a single session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionDetails {
    #[serde(flatten)]
    pub summary: SessionSummary,
    pub repo_url: String,
    pub branch: String,
    pub work_dir: PathBuf,
}

impl From<&Session> for SessionDetails {
    fn from(session: &Session) -> Self {
        Self {
            summary: SessionSummary::from(session),
            repo_url: session.repo_url.clone(),
            branch: session.branch.clone(),
            work_dir: session.work_dir.clone(),
        }
    }
}
