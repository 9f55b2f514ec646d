//! Named session supervision
//!
//! A session is a detachable process group identified by the service name.
//! `TmuxSupervisor` survives the harness process, so a crashed run leaves a
//! session that the next `start` will find and kill. `ChildSupervisor` keeps
//! the processes as children of the harness and kills them on drop.

use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use super::LifecycleError;

/// Launches, detects and kills named sessions
#[async_trait]
pub trait SessionSupervisor: Send + Sync {
    /// Mechanism name for logs
    fn name(&self) -> &str;

    /// Whether a live session with this name exists
    async fn exists(&self, session: &str) -> Result<bool, LifecycleError>;

    /// Start `command` in a new detached session
    async fn launch(&self, session: &str, command: &str) -> Result<(), LifecycleError>;

    /// Kill the session. Returns `false` if there was nothing to kill.
    async fn terminate(&self, session: &str) -> Result<bool, LifecycleError>;
}

// ============================================================================
// tmux
// ============================================================================

/// Sessions hosted by a tmux server
#[derive(Debug, Clone)]
pub struct TmuxSupervisor {
    program: String,
}

impl TmuxSupervisor {
    /// Use `tmux` from `PATH`
    pub fn new() -> Self {
        Self {
            program: "tmux".into(),
        }
    }

    async fn tmux(&self, args: &[&str]) -> Result<std::process::Output, LifecycleError> {
        Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| LifecycleError::Spawn {
                command: format!("{} {}", self.program, args.join(" ")),
                source,
            })
    }
}

impl Default for TmuxSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionSupervisor for TmuxSupervisor {
    fn name(&self) -> &str {
        "tmux"
    }

    async fn exists(&self, session: &str) -> Result<bool, LifecycleError> {
        // `=` forces an exact name match instead of prefix matching.
        let target = format!("={session}");
        Ok(self.tmux(&["has-session", "-t", &target]).await?.status.success())
    }

    async fn launch(&self, session: &str, command: &str) -> Result<(), LifecycleError> {
        let output = self
            .tmux(&["new-session", "-d", "-s", session, command])
            .await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(LifecycleError::Launch {
                session: session.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn terminate(&self, session: &str) -> Result<bool, LifecycleError> {
        let target = format!("={session}");
        let output = self.tmux(&["kill-session", "-t", &target]).await?;
        if !output.status.success() {
            tracing::debug!(
                session,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "No session to kill"
            );
        }
        Ok(output.status.success())
    }
}

// ============================================================================
// Child processes
// ============================================================================

/// Sessions as child processes of the harness
#[derive(Debug, Default)]
pub struct ChildSupervisor {
    sessions: Mutex<HashMap<String, Child>>,
}

impl ChildSupervisor {
    /// Create an empty supervisor
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionSupervisor for ChildSupervisor {
    fn name(&self) -> &str {
        "process"
    }

    async fn exists(&self, session: &str) -> Result<bool, LifecycleError> {
        let mut sessions = self.sessions.lock().await;
        let Some(child) = sessions.get_mut(session) else {
            return Ok(false);
        };
        match child.try_wait()? {
            Some(status) => {
                tracing::debug!(session, %status, "Session process already exited");
                sessions.remove(session);
                Ok(false)
            }
            None => Ok(true),
        }
    }

    async fn launch(&self, session: &str, command: &str) -> Result<(), LifecycleError> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(session) {
            return Err(LifecycleError::Launch {
                session: session.to_string(),
                message: "session already exists".into(),
            });
        }
        // `exec` so the kill reaches the service itself, not a wrapping shell.
        let child = Command::new("sh")
            .arg("-c")
            .arg(format!("exec {command}"))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LifecycleError::Spawn {
                command: command.to_string(),
                source,
            })?;
        sessions.insert(session.to_string(), child);
        Ok(())
    }

    async fn terminate(&self, session: &str) -> Result<bool, LifecycleError> {
        let child = self.sessions.lock().await.remove(session);
        match child {
            Some(mut child) => {
                if child.try_wait()?.is_none() {
                    child.kill().await?;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Run a one-shot shell command (auxiliary stores, stop hooks)
pub async fn run_shell(command: &str) -> Result<ExitStatus, LifecycleError> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| LifecycleError::Spawn {
            command: command.to_string(),
            source,
        })?;
    if !output.status.success() {
        tracing::debug!(
            command,
            status = %output.status,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "Shell command failed"
        );
    }
    Ok(output.status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_child_session_roundtrip() {
        let supervisor = ChildSupervisor::new();
        assert!(!supervisor.exists("svc").await.unwrap());

        supervisor.launch("svc", "sleep 30").await.unwrap();
        assert!(supervisor.exists("svc").await.unwrap());

        assert!(supervisor.terminate("svc").await.unwrap());
        assert!(!supervisor.exists("svc").await.unwrap());
    }

    #[tokio::test]
    async fn test_child_terminate_missing_session_is_tolerated() {
        let supervisor = ChildSupervisor::new();
        assert!(!supervisor.terminate("nothing").await.unwrap());
    }

    #[tokio::test]
    async fn test_child_duplicate_launch_rejected() {
        let supervisor = ChildSupervisor::new();
        supervisor.launch("svc", "sleep 30").await.unwrap();
        let err = supervisor.launch("svc", "sleep 30").await.unwrap_err();
        assert!(matches!(err, LifecycleError::Launch { .. }));
        supervisor.terminate("svc").await.unwrap();
    }

    #[tokio::test]
    async fn test_exited_child_is_not_live() {
        let supervisor = ChildSupervisor::new();
        supervisor.launch("svc", "true").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert!(!supervisor.exists("svc").await.unwrap());
    }

    #[tokio::test]
    async fn test_run_shell_reports_status() {
        assert!(run_shell("exit 0").await.unwrap().success());
        assert_eq!(run_shell("exit 4").await.unwrap().code(), Some(4));
    }
}
