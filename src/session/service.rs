//! Session orchestration.
//!
//! Drives the end-to-end creation pipeline (validate, synchronize the
//! repository, materialize configuration, admit, launch), explicit
//! teardown, commit-and-push requests, and the idle-session reaper.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::agent::{self, AgentLauncher, LaunchSpec};
use crate::git::{GitApi, PushOutcome};
use crate::tmux::TerminalApi;

use super::error::{SessionError, SessionResult};
use super::models::{
    CreateSessionRequest, Session, SessionDetails, SessionStatus, SessionSummary,
};
use super::registry::SessionRegistry;
use super::slots::SlotPool;

static REPO_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(https?://\S+|git@[^\s:]+:\S+|ssh://\S+)$").expect("valid repo URL pattern")
});
static ENV_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid env key pattern"));
static BRANCH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/-]*$").expect("valid branch pattern"));
static RESUME_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid resume id pattern"));

/// Session service configuration.
#[derive(Debug, Clone)]
pub struct SessionServiceConfig {
    /// Maximum number of concurrently admitted sessions.
    pub max_sessions: usize,
    /// Idle time after which a session is evicted.
    pub idle_timeout: chrono::Duration,
    /// How often the reaper scans the registry.
    pub reap_interval: std::time::Duration,
    /// Agent binary started inside each terminal session.
    pub agent_binary: String,
    /// Agent state directory holding per-project transcripts.
    pub agent_data_dir: PathBuf,
    /// Prefix for terminal session names.
    pub terminal_prefix: String,
}

impl Default for SessionServiceConfig {
    fn default() -> Self {
        Self {
            max_sessions: 16,
            idle_timeout: chrono::Duration::hours(24),
            reap_interval: std::time::Duration::from_secs(3600),
            agent_binary: "claude".to_string(),
            agent_data_dir: PathBuf::from(".claude"),
            terminal_prefix: "claude".to_string(),
        }
    }
}

/// Service managing the session lifecycle.
pub struct SessionService {
    registry: SessionRegistry,
    slots: SlotPool,
    git: Arc<dyn GitApi>,
    terminals: Arc<dyn TerminalApi>,
    launcher: AgentLauncher,
    config: SessionServiceConfig,
}

impl SessionService {
    pub fn new(
        git: Arc<dyn GitApi>,
        terminals: Arc<dyn TerminalApi>,
        config: SessionServiceConfig,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(),
            slots: SlotPool::new(config.max_sessions),
            launcher: AgentLauncher::new(terminals.clone(), config.agent_binary.clone()),
            git,
            terminals,
            config,
        }
    }

    /// Run the creation pipeline and return the resulting session.
    ///
    /// The record is registered with status `starting` before admission and
    /// launch, so concurrent lookups observe it immediately. On admission
    /// or launch failure it stays registered in `error` state until killed
    /// or reaped.
    pub async fn create_session(&self, request: CreateSessionRequest) -> SessionResult<Session> {
        validate_request(&request)?;

        info!("Creating session for {}", request.repo_url);
        let work_dir = self
            .git
            .sync_to_local(&request.repo_url, request.branch.as_deref())
            .await?;

        self.materialize_config(&work_dir, &request).await?;

        let id = Uuid::new_v4().to_string();
        let terminal = format!("{}-{}", self.config.terminal_prefix, &id[..8]);
        let session = Session {
            id: id.clone(),
            project: crate::git::project_name(&request.repo_url),
            repo_url: request.repo_url.clone(),
            branch: request
                .branch
                .clone()
                .unwrap_or_else(|| "main".to_string()),
            status: SessionStatus::Starting,
            terminal: terminal.clone(),
            created_at: Utc::now(),
            last_activity: None,
            work_dir: work_dir.clone(),
            slot: None,
        };
        self.registry.insert(session.clone()).await;

        let Some(slot) = self.slots.allocate().await else {
            self.registry
                .update(&id, |s| s.status = SessionStatus::Error)
                .await;
            warn!(
                "Session {id} rejected: all {} slots in use",
                self.config.max_sessions
            );
            return Err(SessionError::ResourceExhausted {
                limit: self.config.max_sessions,
            });
        };

        let launch = self
            .launcher
            .launch(LaunchSpec {
                terminal: &terminal,
                work_dir: &work_dir,
                env_vars: &request.env_vars,
                initial_prompt: request.initial_prompt.as_deref(),
                resume_session_id: request.resume_session_id.as_deref(),
            })
            .await;

        match launch {
            Ok(()) => {
                let now = Utc::now();
                self.registry
                    .update(&id, |s| {
                        s.status = SessionStatus::Running;
                        s.last_activity = Some(now);
                        s.slot = Some(slot);
                    })
                    .await;
                info!("Session {id} running in terminal {terminal}");

                let mut created = session;
                created.status = SessionStatus::Running;
                created.last_activity = Some(now);
                created.slot = Some(slot);
                Ok(created)
            }
            Err(err) => {
                self.slots.release(slot).await;
                self.registry
                    .update(&id, |s| s.status = SessionStatus::Error)
                    .await;
                error!("Failed to launch session {id}: {err:?}");
                Err(SessionError::Tool(err))
            }
        }
    }

    /// Materialize optional configuration artifacts into the workspace, in
    /// fixed order. Diff-patch and transcript problems are logged and
    /// absorbed; the remaining artifacts fail the pipeline on error.
    async fn materialize_config(
        &self,
        work_dir: &Path,
        request: &CreateSessionRequest,
    ) -> SessionResult<()> {
        if let Some(payload) = &request.agent_config {
            agent::config::apply_agent_config(work_dir, payload)?;
        }

        if let Some(encoded) = &request.agent_md {
            let content = agent::config::decode_base64(encoded)
                .map_err(|err| SessionError::Validation(format!("agent_md: {err:#}")))?;
            agent::config::write_override_markdown(work_dir, &content)?;
        }

        if let Some(encoded) = &request.diff_patch {
            match agent::config::decode_base64(encoded)
                .and_then(|bytes| String::from_utf8(bytes).map_err(Into::into))
            {
                Ok(patch) => {
                    if let Err(err) = self.git.apply_diff_patch(work_dir, &patch).await {
                        warn!("Diff patch not applied: {err:?}");
                    }
                }
                Err(err) => warn!("Ignoring undecodable diff patch: {err:#}"),
            }
        }

        if let Some(encoded) = &request.session_data {
            match &request.resume_session_id {
                Some(resume_id) => match agent::config::decode_base64(encoded) {
                    Ok(jsonl) => {
                        if let Err(err) = agent::config::write_transcript(
                            &self.config.agent_data_dir,
                            work_dir,
                            resume_id,
                            &jsonl,
                        ) {
                            warn!("Could not write resumable transcript: {err:?}");
                        }
                    }
                    Err(err) => warn!("Ignoring undecodable session transcript: {err:#}"),
                },
                None => warn!("Session transcript provided without resume_session_id, skipping"),
            }
        }

        Ok(())
    }

    pub async fn get_session(&self, id: &str) -> Option<SessionDetails> {
        self.registry.get(id).await.map(|s| SessionDetails::from(&s))
    }

    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        self.registry
            .list()
            .await
            .iter()
            .map(SessionSummary::from)
            .collect()
    }

    pub async fn session_count(&self) -> usize {
        self.registry.count().await
    }

    /// Live terminal session names, for health reporting only. The
    /// registry stays authoritative for session bookkeeping.
    pub async fn live_terminals(&self) -> Vec<String> {
        self.terminals.list().await
    }

    /// Record an explicit activity signal, deferring idle eviction.
    pub async fn touch_activity(&self, id: &str) -> SessionResult<()> {
        let now = Utc::now();
        if self
            .registry
            .update(id, |s| s.last_activity = Some(now))
            .await
        {
            Ok(())
        } else {
            Err(SessionError::NotFound(id.to_string()))
        }
    }

    /// Tear a session down: terminal killed (best effort), slot released,
    /// record removed. Killing an unknown ID is `NotFound`; killing twice
    /// is therefore `NotFound` the second time.
    pub async fn kill_session(&self, id: &str) -> SessionResult<Session> {
        // Removing first claims the record atomically, so a concurrent
        // kill or reap of the same session cannot release its slot twice.
        let Some(mut session) = self.registry.remove(id).await else {
            return Err(SessionError::NotFound(id.to_string()));
        };

        info!("Killing session {id}");
        self.terminals.kill(&session.terminal).await;
        if let Some(slot) = session.slot.take() {
            self.slots.release(slot).await;
        }

        session.status = SessionStatus::Stopped;
        Ok(session)
    }

    /// Commit and push pending workspace changes. A missing message gets a
    /// generated one embedding the session ID and timestamp.
    pub async fn push_session(
        &self,
        id: &str,
        message: Option<&str>,
    ) -> SessionResult<PushOutcome> {
        let Some(session) = self.registry.get(id).await else {
            return Err(SessionError::NotFound(id.to_string()));
        };

        let message = match message {
            Some(message) => message.to_string(),
            None => format!(
                "Agent session {id} - auto-commit on {}",
                Utc::now().to_rfc3339()
            ),
        };

        Ok(self
            .git
            .commit_and_push(&session.work_dir, &message, "origin")
            .await?)
    }

    /// Evict sessions idle longer than the configured timeout, measured
    /// against `now` (injected so eviction boundaries are testable).
    /// A session exactly at the boundary survives. One failed eviction
    /// does not stop the scan.
    pub async fn reap_idle_sessions(&self, now: DateTime<Utc>) -> usize {
        let mut evicted = 0;

        for session in self.registry.list().await {
            let idle = now - session.idle_reference();
            if idle <= self.config.idle_timeout {
                continue;
            }

            info!(
                "Session {} idle for {} minutes, evicting",
                session.id,
                idle.num_minutes()
            );
            match self.kill_session(&session.id).await {
                Ok(_) => evicted += 1,
                // Lost the race against an explicit kill; already gone.
                Err(SessionError::NotFound(_)) => {}
                Err(err) => {
                    warn!("Failed to evict idle session {}: {err:?}", session.id);
                }
            }
        }

        evicted
    }

    /// Background reaper task. Aborted on shutdown via the returned handle.
    pub fn start_idle_reaper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        info!(
            "Starting idle session reaper (check every {:?}, timeout {}h)",
            self.config.reap_interval,
            self.config.idle_timeout.num_hours()
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.reap_interval);
            loop {
                ticker.tick().await;
                let evicted = self.reap_idle_sessions(Utc::now()).await;
                if evicted > 0 {
                    info!("Evicted {evicted} idle session(s)");
                }
            }
        })
    }

    /// Stop every tracked session. Used during graceful shutdown.
    pub async fn stop_all_sessions(&self) -> usize {
        let mut stopped = 0;
        for session in self.registry.list().await {
            match self.kill_session(&session.id).await {
                Ok(_) => stopped += 1,
                Err(err) => {
                    warn!(
                        "Failed to stop session {} during shutdown: {err:?}",
                        session.id
                    );
                }
            }
        }
        stopped
    }
}

fn validate_request(request: &CreateSessionRequest) -> SessionResult<()> {
    if request.repo_url.trim().is_empty() {
        return Err(SessionError::Validation("repo_url is required".to_string()));
    }
    if !REPO_URL_RE.is_match(&request.repo_url) {
        return Err(SessionError::Validation(
            "repo_url must be an HTTPS or SSH git URL".to_string(),
        ));
    }

    if let Some(branch) = &request.branch {
        if !BRANCH_RE.is_match(branch) || branch.contains("..") {
            return Err(SessionError::Validation(format!(
                "invalid branch name: {branch}"
            )));
        }
    }

    for key in request.env_vars.keys() {
        if !ENV_KEY_RE.is_match(key) {
            return Err(SessionError::Validation(format!(
                "invalid environment variable name: {key}"
            )));
        }
    }

    if let Some(resume_id) = &request.resume_session_id {
        if !RESUME_ID_RE.is_match(resume_id) {
            return Err(SessionError::Validation(format!(
                "invalid resume_session_id: {resume_id}"
            )));
        }
    }

    Ok(())
}
