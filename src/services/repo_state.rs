//! Ephemeral git repositories with recorded baselines.
//!
//! Every test gets its own repository. At creation the starting commit and the
//! checkpoint ref's starting value are recorded; convergence checks compare
//! against those baselines rather than absolute state.

use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::checkpoint_reader::CheckpointReader;
use super::convergence::{poll_until, poll_until_changed};
use crate::domain::errors::{HarnessError, HarnessResult};
use crate::domain::models::{display_command, CheckpointConfig, HarnessConfig, SessionState};

/// One test's isolated working tree.
#[derive(Debug)]
pub struct RepoState {
    dir: Option<TempDir>,
    path: PathBuf,
    start_head: String,
    start_checkpoint: Option<String>,
    checkpoints: CheckpointConfig,
    poll_interval: Duration,
    keep_on_failure: bool,
    keep_always: bool,
}

impl RepoState {
    /// Initialize a repository with one commit, run configured setup commands,
    /// then record the baselines.
    #[instrument(skip(config))]
    pub async fn create(config: &HarnessConfig) -> HarnessResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix("e2e-repo-")
            .tempdir()
            .map_err(|e| HarnessError::io(std::env::temp_dir(), e))?;
        let path = dir.path().to_path_buf();

        let mut repo = Self {
            dir: Some(dir),
            path,
            start_head: String::new(),
            start_checkpoint: None,
            checkpoints: config.checkpoints.clone(),
            poll_interval: config.timeouts.poll_interval(),
            keep_on_failure: config.repo.keep_on_failure,
            keep_always: config.repo.keep_always,
        };

        repo.git(&["init", "-q"]).await?;
        repo.git(&["config", "user.email", "e2e@checkpoint-harness.test"]).await?;
        repo.git(&["config", "user.name", "E2E Harness"]).await?;
        repo.git(&["config", "commit.gpgsign", "false"]).await?;
        repo.write_file("README.md", "# e2e test repository\n").await?;
        repo.commit_all("initial commit").await?;

        for command in &config.repo.setup_commands {
            repo.run_setup_command(command).await?;
        }

        repo.start_head = repo.head().await?;
        repo.start_checkpoint = repo.checkpoint_head().await?;
        info!(
            path = %repo.path.display(),
            start_head = %repo.start_head,
            start_checkpoint = ?repo.start_checkpoint,
            "test repository ready"
        );
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Commit the repository started at, after setup commands.
    pub fn start_head(&self) -> &str {
        &self.start_head
    }

    /// Value of the checkpoint ref at setup, `None` if it did not exist.
    pub fn start_checkpoint(&self) -> Option<&str> {
        self.start_checkpoint.as_deref()
    }

    pub fn checkpoint_config(&self) -> &CheckpointConfig {
        &self.checkpoints
    }

    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn checkpoints(&self) -> CheckpointReader<'_> {
        CheckpointReader::new(self, &self.checkpoints.ref_name)
    }

    async fn run_setup_command(&self, command: &[String]) -> HarnessResult<()> {
        let Some((program, args)) = command.split_first() else {
            return Ok(());
        };
        let rendered = display_command(program, args);
        let output = Command::new(program)
            .args(args)
            .current_dir(&self.path)
            .output()
            .await
            .map_err(|source| HarnessError::Spawn {
                command: rendered.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(HarnessError::setup(format!(
                "`{rendered}` failed in {}: {}{}",
                self.path.display(),
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        debug!(command = %rendered, "setup command finished");
        Ok(())
    }

    async fn raw_git(&self, args: &[&str]) -> HarnessResult<(String, Output)> {
        let rendered = format!("git -C {} {}", self.path.display(), args.join(" "));
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.path)
            .output()
            .await
            .map_err(|source| HarnessError::Spawn {
                command: rendered.clone(),
                source,
            })?;
        Ok((rendered, output))
    }

    /// Run git in the repository and return trimmed stdout.
    pub async fn git(&self, args: &[&str]) -> HarnessResult<String> {
        let (command, output) = self.raw_git(args).await?;
        if !output.status.success() {
            return Err(HarnessError::Git {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Resolve a revision, `None` when it does not exist.
    pub async fn rev_parse(&self, rev: &str) -> HarnessResult<Option<String>> {
        let (command, output) = self.raw_git(&["rev-parse", "--verify", "--quiet", rev]).await?;
        if output.status.success() {
            return Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()));
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.is_empty() {
            Ok(None)
        } else {
            Err(HarnessError::Git { command, stderr })
        }
    }

    pub async fn head(&self) -> HarnessResult<String> {
        self.git(&["rev-parse", "HEAD"]).await
    }

    /// Current value of the checkpoint ref.
    pub async fn checkpoint_head(&self) -> HarnessResult<Option<String>> {
        self.rev_parse(&self.checkpoints.ref_name).await
    }

    /// Write a file relative to the repository root, creating parents.
    pub async fn write_file(&self, relative: &str, contents: &str) -> HarnessResult<PathBuf> {
        let target = self.path.join(relative);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| HarnessError::io(parent, e))?;
        }
        tokio::fs::write(&target, contents)
            .await
            .map_err(|e| HarnessError::io(&target, e))?;
        Ok(target)
    }

    /// Stage everything and commit, returning the new HEAD.
    pub async fn commit_all(&self, message: &str) -> HarnessResult<String> {
        self.git(&["add", "-A"]).await?;
        self.git(&["commit", "-q", "-m", message]).await?;
        self.head().await
    }

    /// Local branches whose name starts with `prefix`, excluding the checkpoint ref.
    pub async fn branches_with_prefix(&self, prefix: &str) -> HarnessResult<Vec<String>> {
        let listing = self
            .git(&["for-each-ref", "--format=%(refname)", "refs/heads"])
            .await?;
        Ok(listing
            .lines()
            .filter(|r| *r != self.checkpoints.ref_name)
            .filter_map(|r| r.strip_prefix("refs/heads/"))
            .filter(|name| name.starts_with(prefix))
            .map(str::to_string)
            .collect())
    }

    /// Transient per-session shadow branches currently present.
    pub async fn shadow_branches(&self) -> HarnessResult<Vec<String>> {
        self.branches_with_prefix(&self.checkpoints.shadow_branch_prefix)
            .await
    }

    /// Session-state files the engine keeps under the git directory.
    pub async fn session_states(&self) -> HarnessResult<Vec<(PathBuf, HarnessResult<SessionState>)>> {
        let git_dir = PathBuf::from(self.git(&["rev-parse", "--absolute-git-dir"]).await?);
        let dir = git_dir.join(&self.checkpoints.session_state_dir);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(HarnessError::io(dir, e)),
        };

        let mut states = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| HarnessError::io(&dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let state = match tokio::fs::read_to_string(&path).await {
                Ok(text) => serde_json::from_str::<SessionState>(&text).map_err(|e| HarnessError::Metadata {
                    location: path.display().to_string(),
                    reason: e.to_string(),
                }),
                Err(e) => Err(HarnessError::io(&path, e)),
            };
            states.push((path, state));
        }
        states.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(states)
    }

    /// Wait until the checkpoint ref differs from `from` and return its new value.
    ///
    /// Pass the value observed after the previous action to wait for the next
    /// checkpoint rather than any checkpoint.
    #[instrument(skip(self), fields(ref_name = %self.checkpoints.ref_name))]
    pub async fn wait_for_checkpoint_advance(
        &self,
        from: Option<&str>,
        timeout: Duration,
    ) -> HarnessResult<String> {
        let baseline = from.map(str::to_string);
        let target = format!(
            "ref {} to move from {}",
            self.checkpoints.ref_name,
            from.unwrap_or("<absent>")
        );
        let advanced = poll_until_changed(&target, &baseline, timeout, self.poll_interval, || {
            self.checkpoint_head()
        })
        .await?;
        // None here means the ref was deleted after existing
        advanced.ok_or_else(|| HarnessError::setup(format!("{target}: ref disappeared")))
    }

    /// Wait for the first checkpoint recorded after setup.
    pub async fn wait_for_new_checkpoint(&self, timeout: Duration) -> HarnessResult<String> {
        self.wait_for_checkpoint_advance(self.start_checkpoint.as_deref(), timeout)
            .await
    }

    /// Wait until `relative` exists in the working tree.
    pub async fn wait_for_file(&self, relative: &str, timeout: Duration) -> HarnessResult<PathBuf> {
        let path = self.path.join(relative);
        let target = format!("file {} to exist", path.display());
        let watched = &path;
        poll_until(
            &target,
            timeout,
            self.poll_interval,
            move || async move {
                Ok::<_, HarnessError>(tokio::fs::try_exists(watched).await.unwrap_or(false))
            },
            |exists| *exists,
        )
        .await?;
        Ok(path)
    }

    /// Wait until no session-state file reports an active phase.
    ///
    /// Unreadable state files count as active, since the engine may be
    /// midway through rewriting them.
    pub async fn wait_for_sessions_idle(&self, timeout: Duration) -> HarnessResult<()> {
        let target = format!(
            "sessions under {} to leave the active phase",
            self.checkpoints.session_state_dir
        );
        poll_until(
            &target,
            timeout,
            self.poll_interval,
            move || async move {
                let states = self.session_states().await?;
                Ok::<_, HarnessError>(states
                    .into_iter()
                    .filter(|(_, state)| state.as_ref().map_or(true, SessionState::is_active))
                    .map(|(path, _)| path.display().to_string())
                    .collect::<Vec<_>>())
            },
            Vec::is_empty,
        )
        .await?;
        Ok(())
    }

    /// Wait until every shadow branch has been condensed away.
    pub async fn wait_for_shadow_branches_cleared(&self, timeout: Duration) -> HarnessResult<()> {
        let target = format!(
            "branches {}* to be removed",
            self.checkpoints.shadow_branch_prefix
        );
        poll_until(
            &target,
            timeout,
            self.poll_interval,
            || self.shadow_branches(),
            Vec::is_empty,
        )
        .await?;
        Ok(())
    }

    /// End of test. Preserves the tree when configured to, otherwise removes it.
    ///
    /// Returns the preserved path. Removal failures are only logged.
    pub fn finish(mut self, passed: bool) -> Option<PathBuf> {
        let dir = self.dir.take()?;
        if self.keep_always || (!passed && self.keep_on_failure) {
            let path = dir.keep();
            info!(path = %path.display(), passed, "preserving test repository");
            return Some(path);
        }
        if let Err(e) = dir.close() {
            warn!(path = %self.path.display(), error = %e, "failed to remove test repository");
        }
        None
    }
}
