//! End-to-end API tests over the router, with fake git and terminal
//! backends standing in for the real subprocess-driven implementations.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{Value, json};

use teleport::api::{AppState, create_router};
use teleport::git::{GitApi, PushOutcome, project_name};
use teleport::session::{SessionService, SessionServiceConfig};
use teleport::tmux::TerminalApi;

#[derive(Default)]
struct FakeTerminal {
    live: Mutex<Vec<String>>,
}

#[async_trait]
impl TerminalApi for FakeTerminal {
    async fn create(&self, name: &str, _work_dir: &Path) -> Result<()> {
        self.live.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn kill(&self, name: &str) {
        self.live.lock().unwrap().retain(|n| n != name);
    }

    async fn list(&self) -> Vec<String> {
        self.live.lock().unwrap().clone()
    }

    async fn send_keys(&self, _name: &str, _keys: &[&str]) -> Result<()> {
        Ok(())
    }
}

struct FakeGit {
    root: PathBuf,
    syncs: Mutex<Vec<String>>,
    pushes: Mutex<Vec<(PathBuf, String)>>,
}

impl FakeGit {
    fn new(root: PathBuf) -> Self {
        Self {
            root,
            syncs: Mutex::new(Vec::new()),
            pushes: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl GitApi for FakeGit {
    async fn sync_to_local(&self, repo_url: &str, _branch: Option<&str>) -> Result<PathBuf> {
        self.syncs.lock().unwrap().push(repo_url.to_string());
        Ok(self.root.join(project_name(repo_url)))
    }

    async fn commit_and_push(
        &self,
        work_dir: &Path,
        message: &str,
        _remote: &str,
    ) -> Result<PushOutcome> {
        self.pushes
            .lock()
            .unwrap()
            .push((work_dir.to_path_buf(), message.to_string()));
        // Clean working tree
        Ok(PushOutcome::default())
    }

    async fn apply_diff_patch(&self, _work_dir: &Path, _patch: &str) -> Result<()> {
        Ok(())
    }
}

struct TestApp {
    server: TestServer,
    git: Arc<FakeGit>,
    _tmp: tempfile::TempDir,
}

fn test_app() -> TestApp {
    test_app_with_max_sessions(8)
}

fn test_app_with_max_sessions(max_sessions: usize) -> TestApp {
    let tmp = tempfile::tempdir().unwrap();
    let git = Arc::new(FakeGit::new(tmp.path().join("projects")));
    let terminals = Arc::new(FakeTerminal::default());

    let config = SessionServiceConfig {
        max_sessions,
        agent_data_dir: tmp.path().join("agent-data"),
        ..Default::default()
    };
    let sessions = Arc::new(SessionService::new(git.clone(), terminals, config));
    let server = TestServer::new(create_router(AppState::new(sessions))).unwrap();

    TestApp {
        server,
        git,
        _tmp: tmp,
    }
}

#[tokio::test]
async fn teleport_creates_a_running_session() {
    let app = test_app();

    let res = app
        .server
        .post("/teleport")
        .json(&json!({ "repo_url": "https://github.com/acme/app.git" }))
        .await;
    assert_eq!(res.status_code(), StatusCode::CREATED);

    let body: Value = res.json();
    assert_eq!(body["status"], "running");
    assert!(body["session_id"].as_str().unwrap().len() > 8);
    assert!(body["terminal"].as_str().unwrap().starts_with("claude-"));
    assert!(body["work_dir"].as_str().unwrap().ends_with("acme-app"));
}

#[tokio::test]
async fn repeated_teleports_reuse_the_work_dir() {
    let app = test_app();
    let request = json!({ "repo_url": "https://github.com/acme/app.git" });

    let first: Value = app.server.post("/teleport").json(&request).await.json();
    let second: Value = app.server.post("/teleport").json(&request).await.json();

    assert_eq!(first["work_dir"], second["work_dir"]);
    assert_ne!(first["session_id"], second["session_id"]);
    assert_eq!(app.git.syncs.lock().unwrap().len(), 2);

    let listed: Value = app.server.get("/sessions").await.json();
    assert_eq!(listed["sessions"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn missing_or_malformed_repo_url_is_rejected() {
    let app = test_app();

    let res = app.server.post("/teleport").json(&json!({})).await;
    // Serde rejects the body before the handler runs.
    assert_eq!(res.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

    let res = app
        .server
        .post("/teleport")
        .json(&json!({ "repo_url": "" }))
        .await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);

    let res = app
        .server
        .post("/teleport")
        .json(&json!({ "repo_url": "ftp://example.com/repo.git" }))
        .await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = res.json();
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn session_detail_exposes_provenance() {
    let app = test_app();

    let created: Value = app
        .server
        .post("/teleport")
        .json(&json!({
            "repo_url": "git@github.com:acme/app.git",
            "branch": "feature/login"
        }))
        .await
        .json();
    let id = created["session_id"].as_str().unwrap();

    let details: Value = app.server.get(&format!("/sessions/{id}")).await.json();
    assert_eq!(details["repo_url"], "git@github.com:acme/app.git");
    assert_eq!(details["branch"], "feature/login");
    assert_eq!(details["project"], "acme-app");
    assert_eq!(details["status"], "running");

    let res = app.server.get("/sessions/nope").await;
    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_is_idempotent_from_the_clients_view() {
    let app = test_app();

    let res = app.server.delete("/sessions/nope").await;
    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);

    let created: Value = app
        .server
        .post("/teleport")
        .json(&json!({ "repo_url": "https://github.com/acme/app.git" }))
        .await
        .json();
    let id = created["session_id"].as_str().unwrap();

    let res = app.server.delete(&format!("/sessions/{id}")).await;
    assert_eq!(res.status_code(), StatusCode::NO_CONTENT);

    let res = app.server.delete(&format!("/sessions/{id}")).await;
    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);

    let listed: Value = app.server.get("/sessions").await.json();
    assert!(listed["sessions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn push_with_clean_tree_reports_nothing_done() {
    let app = test_app();

    let created: Value = app
        .server
        .post("/teleport")
        .json(&json!({ "repo_url": "https://github.com/acme/app.git" }))
        .await
        .json();
    let id = created["session_id"].as_str().unwrap();

    let res = app.server.post(&format!("/sessions/{id}/push")).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    let body: Value = res.json();
    assert_eq!(body["committed"], false);
    assert_eq!(body["pushed"], false);

    // The generated commit message embeds the session id.
    assert!(app.git.pushes.lock().unwrap()[0].1.contains(id));

    let res = app.server.post("/sessions/nope/push").await;
    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn push_accepts_a_custom_message() {
    let app = test_app();

    let created: Value = app
        .server
        .post("/teleport")
        .json(&json!({ "repo_url": "https://github.com/acme/app.git" }))
        .await
        .json();
    let id = created["session_id"].as_str().unwrap();

    let res = app
        .server
        .post(&format!("/sessions/{id}/push"))
        .json(&json!({ "message": "checkpoint before refactor" }))
        .await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(
        app.git.pushes.lock().unwrap()[0].1,
        "checkpoint before refactor"
    );
}

#[tokio::test]
async fn exhausted_admission_returns_service_unavailable() {
    let app = test_app_with_max_sessions(1);

    let res = app
        .server
        .post("/teleport")
        .json(&json!({ "repo_url": "https://github.com/acme/one.git" }))
        .await;
    assert_eq!(res.status_code(), StatusCode::CREATED);

    let res = app
        .server
        .post("/teleport")
        .json(&json!({ "repo_url": "https://github.com/acme/two.git" }))
        .await;
    assert_eq!(res.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = res.json();
    assert_eq!(body["code"], "SERVICE_UNAVAILABLE");

    // The failed attempt stays observable in error state.
    let listed: Value = app.server.get("/sessions").await.json();
    let statuses: Vec<&str> = listed["sessions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["status"].as_str().unwrap())
        .collect();
    assert!(statuses.contains(&"running"));
    assert!(statuses.contains(&"error"));
}

#[tokio::test]
async fn activity_touch_updates_last_activity() {
    let app = test_app();

    let created: Value = app
        .server
        .post("/teleport")
        .json(&json!({ "repo_url": "https://github.com/acme/app.git" }))
        .await
        .json();
    let id = created["session_id"].as_str().unwrap();

    let res = app.server.post(&format!("/sessions/{id}/activity")).await;
    assert_eq!(res.status_code(), StatusCode::NO_CONTENT);

    let res = app.server.post("/sessions/nope/activity").await;
    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_reports_session_and_terminal_counts() {
    let app = test_app();

    let health: Value = app.server.get("/health").await.json();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["sessions"]["active"], 0);
    assert_eq!(health["sessions"]["terminals"], 0);

    app.server
        .post("/teleport")
        .json(&json!({ "repo_url": "https://github.com/acme/app.git" }))
        .await;

    let health: Value = app.server.get("/health").await.json();
    assert_eq!(health["sessions"]["active"], 1);
    assert_eq!(health["sessions"]["terminals"], 1);

    let ready: Value = app.server.get("/health/ready").await.json();
    assert_eq!(ready["ready"], true);
    let live: Value = app.server.get("/health/live").await.json();
    assert_eq!(live["alive"], true);
}

#[tokio::test]
async fn root_lists_the_endpoint_index() {
    let app = test_app();

    let index: Value = app.server.get("/").await.json();
    assert_eq!(index["name"], "teleport");
    assert!(index["endpoints"]["POST /teleport"].is_string());
}

#[tokio::test]
async fn invalid_env_var_names_are_rejected() {
    let app = test_app();

    let res = app
        .server
        .post("/teleport")
        .json(&json!({
            "repo_url": "https://github.com/acme/app.git",
            "env_vars": { "BAD NAME": "x" }
        }))
        .await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
}
