//! Read-only access to the checkpoint metadata tree.

use serde::de::DeserializeOwned;
use tracing::debug;

use super::repo_state::RepoState;
use crate::domain::errors::{HarnessError, HarnessResult};
use crate::domain::models::checkpoint::{
    checkpoint_id_from_path, checkpoint_metadata_path, session_metadata_path,
};
use crate::domain::models::{CheckpointSummary, SessionMetadata};

/// Looks up checkpoint documents under a ref's tree via `ls-tree` and `show`.
#[derive(Debug, Clone, Copy)]
pub struct CheckpointReader<'a> {
    repo: &'a RepoState,
    ref_name: &'a str,
}

impl<'a> CheckpointReader<'a> {
    pub(crate) const fn new(repo: &'a RepoState, ref_name: &'a str) -> Self {
        Self { repo, ref_name }
    }

    pub const fn ref_name(&self) -> &str {
        self.ref_name
    }

    /// Checkpoint ids present in the tree, sorted. Empty when the ref is absent.
    pub async fn list(&self) -> HarnessResult<Vec<String>> {
        if self.repo.rev_parse(self.ref_name).await?.is_none() {
            return Ok(Vec::new());
        }
        let listing = self
            .repo
            .git(&["ls-tree", "-r", "--name-only", self.ref_name])
            .await?;
        let mut ids: Vec<String> = listing.lines().filter_map(checkpoint_id_from_path).collect();
        ids.sort();
        ids.dedup();
        debug!(ref_name = self.ref_name, count = ids.len(), "listed checkpoints");
        Ok(ids)
    }

    /// Raw blob at `path` in the ref's tree.
    pub async fn read_blob(&self, path: &str) -> HarnessResult<String> {
        let spec = format!("{}:{path}", self.ref_name);
        self.repo.git(&["show", spec.as_str()]).await
    }

    pub async fn summary(&self, checkpoint_id: &str) -> HarnessResult<CheckpointSummary> {
        self.decode(&checkpoint_metadata_path(checkpoint_id)?).await
    }

    pub async fn session(&self, checkpoint_id: &str, index: usize) -> HarnessResult<SessionMetadata> {
        self.decode(&session_metadata_path(checkpoint_id, index)?)
            .await
    }

    /// Every session recorded in a checkpoint, in index order.
    pub async fn sessions(&self, checkpoint_id: &str) -> HarnessResult<Vec<SessionMetadata>> {
        let summary = self.summary(checkpoint_id).await?;
        let mut sessions = Vec::with_capacity(summary.sessions.len());
        for index in 0..summary.sessions.len() {
            sessions.push(self.session(checkpoint_id, index).await?);
        }
        Ok(sessions)
    }

    async fn decode<T: DeserializeOwned>(&self, path: &str) -> HarnessResult<T> {
        let text = self.read_blob(path).await?;
        serde_json::from_str(&text).map_err(|e| HarnessError::Metadata {
            location: format!("{}:{path}", self.ref_name),
            reason: e.to_string(),
        })
    }
}
