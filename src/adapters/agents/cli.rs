//! Plumbing shared by the CLI-backed agents.

use std::path::Path;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::errors::{HarnessError, HarnessResult};
use crate::domain::ports::{CloseHook, Session, SessionStart};
use crate::infrastructure::process::{EnvPolicy, ProcessDriver, ProcessSpec};
use crate::infrastructure::tmux::TmuxSession;
use crate::services::dialog::DialogPlan;

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(30);

/// Check once per process that `binary --version` succeeds.
pub(crate) async fn verify_binary(
    agent: &str,
    binary: &str,
    driver: &ProcessDriver,
    verified: &OnceCell<String>,
) -> HarnessResult<()> {
    verified
        .get_or_try_init(|| async {
            let spec = ProcessSpec::new(binary, std::env::temp_dir()).args(["--version"]);
            let output = driver
                .run_with_timeout(&spec, &CancellationToken::new(), Some(VERSION_CHECK_TIMEOUT))
                .await
                .map_err(|e| HarnessError::Bootstrap {
                    agent: agent.to_string(),
                    reason: e.to_string(),
                })?;
            let version = output.stdout.trim().to_string();
            info!(agent, binary, %version, "agent binary verified");
            Ok::<_, HarnessError>(version)
        })
        .await
        .map(|_| ())
}

/// Unique tmux session name for one agent session.
pub(crate) fn session_name(agent: &str) -> String {
    format!("e2e-{agent}-{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
}

/// Launch `program` in tmux and drive it through `plan` to its ready prompt.
///
/// `on_close` is attached before the dialog loop so it runs on every exit path.
pub(crate) async fn launch_session(
    agent: &str,
    workdir: &Path,
    env: &EnvPolicy,
    program: &str,
    args: &[String],
    plan: &DialogPlan,
    on_close: Option<CloseHook>,
) -> HarnessResult<SessionStart> {
    let session = TmuxSession::start(session_name(agent), workdir, env, program, args).await?;
    if let Some(hook) = on_close {
        session.on_close(hook);
    }

    if let Err(e) = plan.dismiss(&session).await {
        if let Err(close_err) = session.close().await {
            warn!(agent, error = %close_err, "failed to close session after setup failure");
        }
        return Err(e);
    }
    Ok(SessionStart::Ready(Box::new(session)))
}
