//! Detached worker process launcher.

use std::{
    fs::OpenOptions,
    path::PathBuf,
    process::Stdio,
};

use async_trait::async_trait;
use command_group::AsyncCommandGroup;
use pollchat_core::{LaunchError, Launcher, SpawnSpec};

use crate::command::{CommandBuildError, CommandBuilder};

/// Launches workers in their own process group.
///
/// The worker gets a null stdin and stdout, so the host never waits on a pipe
/// inherited by the worker, and the parent can exit as soon as the spawn
/// returns. Worker stderr is appended to the log file when one is set.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    builder: CommandBuilder,
    log_path: Option<PathBuf>,
}

impl ProcessLauncher {
    #[must_use]
    pub const fn new(builder: CommandBuilder) -> Self {
        Self {
            builder,
            log_path: None,
        }
    }

    /// Append worker stderr to `path`.
    #[must_use]
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    fn stderr(&self) -> Stdio {
        let Some(path) = &self.log_path else {
            return Stdio::null();
        };
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Stdio::from(file),
            Err(e) => {
                tracing::warn!(path = %path.display(), "Cannot open worker log: {e}");
                Stdio::null()
            }
        }
    }
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self::new(CommandBuilder::current_exe())
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn spawn(&self, spec: &SpawnSpec) -> Result<u32, LaunchError> {
        let parts = self.builder.build(spec).map_err(|e| match e {
            CommandBuildError::CurrentExe(err) => LaunchError::ExecutableNotFound(err.to_string()),
            other @ CommandBuildError::EmptyCommand => LaunchError::SpawnFailed(other.to_string()),
        })?;

        let mut command = tokio::process::Command::new(&parts.program);
        command
            .args(&parts.args)
            .envs(parts.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(self.stderr())
            .kill_on_drop(false);

        let child = command.group_spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| LaunchError::SpawnFailed("worker exited before reporting a pid".to_string()))?;

        tracing::info!(pid, program = %parts.program.display(), "Spawned worker");
        Ok(pid)
    }
}

/// Best-effort SIGTERM to the worker's process group.
///
/// Returns whether the signal was delivered.
#[cfg(unix)]
#[must_use]
pub fn terminate(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    // 0 and 1 would address our own group or init.
    if pid <= 1 {
        return false;
    }
    // SAFETY: kill(2) has no memory-safety preconditions; a negative pid
    // addresses the process group the worker leads.
    #[allow(unsafe_code)]
    let result = unsafe { libc::kill(-pid, libc::SIGTERM) };
    if result != 0 {
        tracing::debug!(pid, "Worker group not signalled: {}", std::io::Error::last_os_error());
    }
    result == 0
}

/// Best-effort termination is unavailable off Unix.
#[cfg(not(unix))]
#[must_use]
pub fn terminate(_pid: u32) -> bool {
    false
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_reports_pid_and_logs_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("worker.log");
        let launcher = ProcessLauncher::new(
            CommandBuilder::current_exe()
                .override_base("/bin/sh")
                .params(["-c", "echo from-worker >&2"]),
        )
        .with_log_file(&log);

        let pid = tokio_test::block_on(launcher.spawn(&SpawnSpec::new())).unwrap();
        assert!(pid > 0);

        for _ in 0..100 {
            if std::fs::read_to_string(&log).unwrap_or_default().contains("from-worker") {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        panic!("worker stderr never reached the log file");
    }

    #[test]
    fn test_missing_program_is_an_error() {
        let launcher = ProcessLauncher::new(
            CommandBuilder::current_exe().override_base("/nonexistent/pollchat-worker"),
        );
        let err = tokio_test::block_on(launcher.spawn(&SpawnSpec::new())).unwrap_err();
        assert!(matches!(err, LaunchError::Io(_)));
    }

    #[cfg(target_os = "linux")]
    fn exited(pid: u32) -> bool {
        // A reaped process is gone; an unreaped one is a zombie.
        std::fs::read_to_string(format!("/proc/{pid}/stat")).map_or(true, |stat| {
            stat.rsplit_once(')')
                .is_some_and(|(_, rest)| rest.trim_start().starts_with('Z'))
        })
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_terminate_signals_worker_group() {
        let launcher = ProcessLauncher::new(
            CommandBuilder::current_exe()
                .override_base("/bin/sh")
                .params(["-c", "sleep 30 & wait"]),
        );
        let pid = tokio_test::block_on(launcher.spawn(&SpawnSpec::new())).unwrap();
        assert!(!exited(pid));

        assert!(terminate(pid));
        for _ in 0..100 {
            if exited(pid) {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        panic!("worker {pid} survived SIGTERM");
    }

    #[test]
    fn test_terminate_refuses_reserved_pids() {
        assert!(!terminate(0));
        assert!(!terminate(1));
    }
}
