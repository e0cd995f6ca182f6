//! Repository synchronization over the git command line.
//!
//! Clones or updates remote repositories into a deterministic directory per
//! repository, commits and pushes workspace changes back, and replays diff
//! patches. Every git invocation is a structured argument-list subprocess
//! with an explicit timeout; shell-string composition is never used.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::process::Command;
use uuid::Uuid;

/// Outcome of a commit-and-push request. The two flags are independent: a
/// commit that lands followed by a push that fails reports
/// `committed: true, pushed: false`.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PushOutcome {
    pub committed: bool,
    pub pushed: bool,
}

/// Repository synchronization interface used by the session orchestrator.
#[async_trait]
pub trait GitApi: Send + Sync {
    /// Clone the repository, or update the existing clone, and return the
    /// working directory.
    async fn sync_to_local(&self, repo_url: &str, branch: Option<&str>) -> Result<PathBuf>;

    /// Stage, commit and push all pending changes. A clean tree returns
    /// `{false, false}` without running any further git command.
    async fn commit_and_push(
        &self,
        work_dir: &Path,
        message: &str,
        remote: &str,
    ) -> Result<PushOutcome>;

    /// Apply a unified diff to the working tree, falling back to a 3-way
    /// merge. Apply failures are logged, never raised.
    async fn apply_diff_patch(&self, work_dir: &Path, patch: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct GitSyncConfig {
    /// Directory that holds one clone per distinct repository.
    pub projects_dir: PathBuf,
    /// Timeout for `git clone`.
    pub clone_timeout: Duration,
    /// Timeout for every other git command.
    pub command_timeout: Duration,
}

/// Git-CLI backed implementation of [`GitApi`].
#[derive(Debug, Clone)]
pub struct GitSync {
    config: GitSyncConfig,
}

impl GitSync {
    pub fn new(config: GitSyncConfig) -> Self {
        Self { config }
    }

    /// Working directory for a repository URL. A pure function of the URL:
    /// the same URL always maps to the same path, distinct org/repo pairs
    /// never collide.
    pub fn work_dir_for(&self, repo_url: &str) -> PathBuf {
        self.config.projects_dir.join(project_name(repo_url))
    }

    async fn run_git(&self, args: &[&str], cwd: Option<&Path>, timeout: Duration) -> Result<String> {
        let mut cmd = Command::new("git");
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let verb = args.first().copied().unwrap_or("git");
        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| anyhow!("git {verb} timed out after {timeout:?}"))?
            .with_context(|| format!("running git {verb}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git {verb} failed ({}): {}", output.status, stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn push_current_branch(&self, work_dir: &Path, remote: &str) -> Result<()> {
        let branch = self
            .run_git(
                &["branch", "--show-current"],
                Some(work_dir),
                self.config.command_timeout,
            )
            .await?
            .trim()
            .to_string();
        if branch.is_empty() {
            bail!("working tree is not on a branch");
        }

        self.run_git(
            &["push", remote, branch.as_str()],
            Some(work_dir),
            self.config.command_timeout,
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl GitApi for GitSync {
    async fn sync_to_local(&self, repo_url: &str, branch: Option<&str>) -> Result<PathBuf> {
        let work_dir = self.work_dir_for(repo_url);

        if work_dir.exists() {
            info!(
                "Repository exists, updating {} from {repo_url}",
                work_dir.display()
            );
            self.run_git(
                &["fetch", "--all"],
                Some(&work_dir),
                self.config.command_timeout,
            )
            .await
            .context("fetching remote refs")?;

            if let Some(branch) = branch {
                self.run_git(
                    &["checkout", branch],
                    Some(&work_dir),
                    self.config.command_timeout,
                )
                .await
                .with_context(|| format!("checking out branch {branch}"))?;
            }

            self.run_git(&["pull"], Some(&work_dir), self.config.command_timeout)
                .await
                .context("pulling latest changes")?;
        } else {
            info!("Cloning {repo_url} into {}", work_dir.display());
            tokio::fs::create_dir_all(&self.config.projects_dir)
                .await
                .with_context(|| {
                    format!(
                        "creating projects directory {}",
                        self.config.projects_dir.display()
                    )
                })?;

            let dir = work_dir.to_string_lossy().into_owned();
            let mut args = vec!["clone"];
            if let Some(branch) = branch {
                args.extend(["-b", branch]);
            }
            args.push(repo_url);
            args.push(dir.as_str());

            self.run_git(&args, None, self.config.clone_timeout)
                .await
                .context("cloning repository")?;
        }

        Ok(work_dir)
    }

    async fn commit_and_push(
        &self,
        work_dir: &Path,
        message: &str,
        remote: &str,
    ) -> Result<PushOutcome> {
        let status = self
            .run_git(
                &["status", "--porcelain"],
                Some(work_dir),
                self.config.command_timeout,
            )
            .await
            .context("checking working tree status")?;

        if status.trim().is_empty() {
            info!("No changes to commit in {}", work_dir.display());
            return Ok(PushOutcome::default());
        }

        self.run_git(&["add", "-A"], Some(work_dir), self.config.command_timeout)
            .await
            .context("staging changes")?;
        self.run_git(
            &["commit", "-m", message],
            Some(work_dir),
            self.config.command_timeout,
        )
        .await
        .context("committing changes")?;

        let mut outcome = PushOutcome {
            committed: true,
            pushed: false,
        };

        match self.push_current_branch(work_dir, remote).await {
            Ok(()) => {
                outcome.pushed = true;
                info!("Committed and pushed changes in {}", work_dir.display());
            }
            Err(err) => {
                warn!(
                    "Commit landed but push to {remote} failed for {}: {err:?}",
                    work_dir.display()
                );
            }
        }

        Ok(outcome)
    }

    async fn apply_diff_patch(&self, work_dir: &Path, patch: &str) -> Result<()> {
        if patch.trim().is_empty() {
            debug!("Empty diff patch, nothing to apply");
            return Ok(());
        }

        let patch_file = work_dir.join(format!(".pending-{}.patch", Uuid::new_v4()));
        tokio::fs::write(&patch_file, patch)
            .await
            .with_context(|| format!("writing patch file {}", patch_file.display()))?;

        let file_arg = patch_file.to_string_lossy().into_owned();
        let applied = match self
            .run_git(
                &["apply", file_arg.as_str()],
                Some(work_dir),
                self.config.command_timeout,
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(direct) => {
                debug!("Direct apply failed ({direct:#}), retrying with 3-way merge");
                self.run_git(
                    &["apply", "--3way", file_arg.as_str()],
                    Some(work_dir),
                    self.config.command_timeout,
                )
                .await
                .map(|_| ())
            }
        };

        if let Err(err) = applied {
            warn!(
                "Diff patch did not apply cleanly in {}: {err:?}",
                work_dir.display()
            );
        } else {
            info!("Applied diff patch in {}", work_dir.display());
        }

        if let Err(err) = tokio::fs::remove_file(&patch_file).await {
            warn!(
                "Could not remove patch file {}: {err}",
                patch_file.display()
            );
        }

        Ok(())
    }
}

/// Derive a project name from a git URL as `<org>-<repo>`.
///
/// Handles the usual shapes: `https://github.com/org/repo.git`,
/// `git@github.com:org/repo.git`, `ssh://git@host/org/repo`, with or
/// without the `.git` suffix.
pub fn project_name(repo_url: &str) -> String {
    let trimmed = repo_url.trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);

    let segments: Vec<&str> = trimmed
        .split(['/', ':'])
        .filter(|s| !s.is_empty())
        .collect();

    let name = match segments.as_slice() {
        [] => "unknown".to_string(),
        [repo] => (*repo).to_string(),
        [.., org, repo] => format!("{org}-{repo}"),
    };

    // Anything outside the safe set collapses to '-' so the name is always
    // usable as a directory component.
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_name_joins_org_and_repo() {
        assert_eq!(
            project_name("https://github.com/acme/app.git"),
            "acme-app"
        );
        assert_eq!(project_name("https://github.com/acme/app"), "acme-app");
        assert_eq!(project_name("git@github.com:acme/app.git"), "acme-app");
        assert_eq!(
            project_name("ssh://git@github.com/acme/app.git"),
            "acme-app"
        );
    }

    #[test]
    fn project_name_is_deterministic_per_url() {
        let url = "https://github.com/acme/app.git";
        assert_eq!(project_name(url), project_name(url));
        assert_ne!(
            project_name("https://github.com/acme/app.git"),
            project_name("https://github.com/other/app.git")
        );
    }

    #[test]
    fn project_name_handles_degenerate_urls() {
        assert_eq!(project_name(""), "unknown");
        assert_eq!(project_name("repo"), "repo");
        assert_eq!(project_name("https://github.com/acme/we ird"), "acme-we-ird");
    }

    #[test]
    fn work_dir_is_a_pure_function_of_the_url() {
        let sync = GitSync::new(GitSyncConfig {
            projects_dir: "/projects".into(),
            clone_timeout: Duration::from_secs(120),
            command_timeout: Duration::from_secs(60),
        });
        assert_eq!(
            sync.work_dir_for("https://github.com/acme/app.git"),
            PathBuf::from("/projects/acme-app")
        );
        assert_eq!(
            sync.work_dir_for("https://github.com/acme/app.git"),
            sync.work_dir_for("git@github.com:acme/app.git")
        );
    }

    #[test]
    fn push_outcome_defaults_to_nothing_done() {
        let outcome = PushOutcome::default();
        assert!(!outcome.committed);
        assert!(!outcome.pushed);
    }

    async fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    async fn init_repo(dir: &Path) -> bool {
        for args in [
            vec!["init", "-b", "main"],
            vec!["config", "user.email", "ci@example.com"],
            vec!["config", "user.name", "ci"],
        ] {
            let ok = Command::new("git")
                .args(&args)
                .current_dir(dir)
                .output()
                .await
                .map(|o| o.status.success())
                .unwrap_or(false);
            if !ok {
                return false;
            }
        }
        true
    }

    fn test_sync(projects_dir: &Path) -> GitSync {
        GitSync::new(GitSyncConfig {
            projects_dir: projects_dir.to_path_buf(),
            clone_timeout: Duration::from_secs(60),
            command_timeout: Duration::from_secs(30),
        })
    }

    #[tokio::test]
    async fn commit_and_push_is_a_no_op_on_a_clean_tree() {
        if !git_available().await {
            eprintln!("git not available, skipping");
            return;
        }

        let tmp = tempfile::tempdir().unwrap();
        if !init_repo(tmp.path()).await {
            eprintln!("git init -b main unsupported, skipping");
            return;
        }

        let sync = test_sync(tmp.path());
        let outcome = sync
            .commit_and_push(tmp.path(), "unused", "origin")
            .await
            .unwrap();
        assert!(!outcome.committed);
        assert!(!outcome.pushed);
    }

    #[tokio::test]
    async fn commit_without_reachable_remote_still_reports_committed() {
        if !git_available().await {
            eprintln!("git not available, skipping");
            return;
        }

        let tmp = tempfile::tempdir().unwrap();
        if !init_repo(tmp.path()).await {
            eprintln!("git init -b main unsupported, skipping");
            return;
        }
        std::fs::write(tmp.path().join("notes.txt"), "changed").unwrap();

        let sync = test_sync(tmp.path());
        let outcome = sync
            .commit_and_push(tmp.path(), "save notes", "origin")
            .await
            .unwrap();
        assert!(outcome.committed);
        assert!(!outcome.pushed);
    }

    #[tokio::test]
    async fn whitespace_patch_applies_as_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let sync = test_sync(tmp.path());

        // Not a git repository: any git invocation would fail, so success
        // here means none happened.
        sync.apply_diff_patch(tmp.path(), "   \n\t\n").await.unwrap();
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unappliable_patch_is_absorbed_and_temp_file_removed() {
        if !git_available().await {
            eprintln!("git not available, skipping");
            return;
        }

        let tmp = tempfile::tempdir().unwrap();
        if !init_repo(tmp.path()).await {
            eprintln!("git init -b main unsupported, skipping");
            return;
        }

        let sync = test_sync(tmp.path());
        sync.apply_diff_patch(tmp.path(), "this is not a diff")
            .await
            .unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".patch"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn second_sync_of_the_same_url_reuses_the_clone() {
        if !git_available().await {
            eprintln!("git not available, skipping");
            return;
        }

        let tmp = tempfile::tempdir().unwrap();
        let origin = tmp.path().join("origin");
        std::fs::create_dir_all(&origin).unwrap();
        if !init_repo(&origin).await {
            eprintln!("git init -b main unsupported, skipping");
            return;
        }
        std::fs::write(origin.join("README.md"), "hello").unwrap();
        for args in [vec!["add", "-A"], vec!["commit", "-m", "init"]] {
            let ok = Command::new("git")
                .args(&args)
                .current_dir(&origin)
                .output()
                .await
                .map(|o| o.status.success())
                .unwrap_or(false);
            assert!(ok);
        }

        let sync = test_sync(&tmp.path().join("projects"));
        let url = origin.to_string_lossy().into_owned();

        let first = sync.sync_to_local(&url, None).await.unwrap();
        assert!(first.join("README.md").exists());

        let marker = first.join(".git").join("teleport-marker");
        std::fs::write(&marker, "kept").unwrap();

        let second = sync.sync_to_local(&url, None).await.unwrap();
        assert_eq!(first, second);
        // The marker survives, so the second call updated in place rather
        // than re-cloning.
        assert!(marker.exists());
    }
}
