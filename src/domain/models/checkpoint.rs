//! Data contracts written by the external checkpoint engine.
//!
//! The harness only reads these documents. Field names follow the engine's
//! JSON; unknown fields are ignored so newer engine versions keep decoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::{HarnessError, HarnessResult};

/// File name of every metadata document under the checkpoint tree.
pub const METADATA_FILE: &str = "metadata.json";

/// Token counters recorded per session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub output_tokens: u64,
    pub api_call_count: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.cache_creation_tokens + self.cache_read_tokens + self.output_tokens
    }
}

/// Line attribution counters between agent and human edits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attribution {
    pub agent_lines: u64,
    pub human_added: u64,
    pub human_modified: u64,
    pub human_removed: u64,
    pub total_committed: u64,
    pub agent_percentage: f64,
}

/// Paths of the per-session documents referenced by a checkpoint summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionFiles {
    pub metadata: String,
    pub transcript: String,
    pub context: String,
    pub prompt: String,
}

/// Top-level `metadata.json` of one checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointSummary {
    pub version: u32,
    pub checkpoint_id: String,
    pub strategy: String,
    pub branch: Option<String>,
    pub checkpoints_count: u32,
    pub files_touched: Vec<String>,
    pub sessions: Vec<SessionFiles>,
    pub token_usage: Option<TokenUsage>,
}

/// Per-session `metadata.json` stored under `<checkpoint>/<index>/`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionMetadata {
    pub version: u32,
    pub checkpoint_id: String,
    pub session_id: String,
    pub strategy: String,
    pub created_at: Option<DateTime<Utc>>,
    pub agent: Option<String>,
    pub files_touched: Vec<String>,
    pub token_usage: Option<TokenUsage>,
    pub initial_attribution: Option<Attribution>,
}

/// Live session-state file the engine keeps while a session is running.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub session_id: String,
    pub phase: String,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        self.phase.eq_ignore_ascii_case("active")
    }
}

/// Two-level sharded directory of a checkpoint id: `ab/cdef0123`.
pub fn checkpoint_dir(checkpoint_id: &str) -> HarnessResult<String> {
    let valid = checkpoint_id.len() > 2 && checkpoint_id.chars().all(|c| c.is_ascii_hexdigit());
    if !valid {
        return Err(HarnessError::Metadata {
            location: checkpoint_id.to_string(),
            reason: "checkpoint id must be more than two hex characters".to_string(),
        });
    }
    let (shard, rest) = checkpoint_id.split_at(2);
    Ok(format!("{shard}/{rest}"))
}

/// Path of a checkpoint's summary document inside the checkpoint tree.
pub fn checkpoint_metadata_path(checkpoint_id: &str) -> HarnessResult<String> {
    Ok(format!("{}/{METADATA_FILE}", checkpoint_dir(checkpoint_id)?))
}

/// Path of one session's metadata document inside the checkpoint tree.
pub fn session_metadata_path(checkpoint_id: &str, session_index: usize) -> HarnessResult<String> {
    Ok(format!(
        "{}/{session_index}/{METADATA_FILE}",
        checkpoint_dir(checkpoint_id)?
    ))
}

/// Recover a checkpoint id from a tree path like `ab/cdef0123/metadata.json`.
///
/// Returns `None` for session-level documents and unrelated files.
pub fn checkpoint_id_from_path(path: &str) -> Option<String> {
    let mut parts = path.split('/');
    let shard = parts.next()?;
    let rest = parts.next()?;
    let file = parts.next()?;
    if parts.next().is_some() || file != METADATA_FILE || shard.len() != 2 {
        return None;
    }
    let id = format!("{shard}{rest}");
    id.chars().all(|c| c.is_ascii_hexdigit()).then_some(id)
}
