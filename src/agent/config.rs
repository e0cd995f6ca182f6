//! Workspace configuration artifacts.
//!
//! Materializes the optional per-session configuration into the
//! synchronized working tree before the agent starts: MCP server
//! definitions, settings and permissions (merged into any existing
//! settings document), the override markdown document, and resumable
//! conversation transcripts.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::{info, warn};
use serde_json::{Map, Value};

use crate::session::AgentConfigPayload;

/// Hidden directory inside the working tree holding agent configuration.
pub const CONFIG_DIR: &str = ".claude";
/// Override document written at the working-tree root.
pub const OVERRIDE_FILE: &str = "CLAUDE.md";

/// Decode a base64 request payload.
pub fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(encoded.trim())
        .context("decoding base64 payload")
}

/// Write MCP config, settings and permissions into the workspace, in that
/// order. Settings merge key-by-key into any existing document (incoming
/// keys win); permissions merge under the `permissions` key.
pub fn apply_agent_config(work_dir: &Path, payload: &AgentConfigPayload) -> Result<()> {
    let config_dir = work_dir.join(CONFIG_DIR);
    fs::create_dir_all(&config_dir)
        .with_context(|| format!("creating {}", config_dir.display()))?;

    if let Some(mcp) = &payload.mcp {
        let path = config_dir.join("mcp.json");
        fs::write(&path, serde_json::to_string_pretty(mcp)?)
            .with_context(|| format!("writing {}", path.display()))?;
        info!("Applied MCP server config");
    }

    if let Some(settings) = &payload.settings {
        match settings {
            Value::Object(incoming) => {
                merge_settings(&config_dir, |doc| {
                    for (key, value) in incoming {
                        doc.insert(key.clone(), value.clone());
                    }
                })?;
                info!("Applied settings");
            }
            _ => warn!("Settings payload is not a JSON object, skipping"),
        }
    }

    if let Some(permissions) = &payload.permissions {
        let value = serde_json::to_value(permissions)?;
        merge_settings(&config_dir, |doc| {
            doc.insert("permissions".to_string(), value);
        })?;
        info!("Applied permissions");
    }

    Ok(())
}

/// Overwrite the override markdown document unconditionally.
pub fn write_override_markdown(work_dir: &Path, content: &[u8]) -> Result<()> {
    let path = work_dir.join(OVERRIDE_FILE);
    fs::write(&path, content).with_context(|| format!("writing {}", path.display()))?;
    info!("Applied override document");
    Ok(())
}

/// Deterministic transcript location for a workspace: the agent resolves
/// conversations from a per-project directory named after the workspace
/// path with separators flattened.
pub fn transcript_path(
    agent_data_dir: &Path,
    work_dir: &Path,
    resume_session_id: &str,
) -> PathBuf {
    let key: String = work_dir
        .to_string_lossy()
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '.') { '-' } else { c })
        .collect();
    agent_data_dir
        .join("projects")
        .join(key)
        .join(format!("{resume_session_id}.jsonl"))
}

/// Write a resumable conversation transcript where the agent will look for
/// it on `--resume`.
pub fn write_transcript(
    agent_data_dir: &Path,
    work_dir: &Path,
    resume_session_id: &str,
    jsonl: &[u8],
) -> Result<PathBuf> {
    let path = transcript_path(agent_data_dir, work_dir, resume_session_id);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(&path, jsonl).with_context(|| format!("writing {}", path.display()))?;
    info!("Wrote resumable transcript to {}", path.display());
    Ok(path)
}

fn merge_settings(config_dir: &Path, apply: impl FnOnce(&mut Map<String, Value>)) -> Result<()> {
    let path = config_dir.join("settings.json");
    let mut doc = read_settings(&path);
    apply(&mut doc);
    fs::write(&path, serde_json::to_string_pretty(&Value::Object(doc))?)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn read_settings(path: &Path) -> Map<String, Value> {
    match fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                warn!(
                    "Existing {} is not a JSON object, replacing it",
                    path.display()
                );
                Map::new()
            }
        },
        Err(_) => Map::new(),
    }
}
