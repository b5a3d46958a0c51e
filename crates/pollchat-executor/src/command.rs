//! Worker command building.

use std::path::PathBuf;

use pollchat_core::{Generation, SpawnSpec};
use thiserror::Error;

/// Environment marker selecting worker mode.
pub const WORKER_MODE_ENV: &str = "POLLCHAT_MODE";
/// Value of [`WORKER_MODE_ENV`] that selects worker mode.
pub const WORKER_MODE_VALUE: &str = "worker";
/// Flag equivalent of the worker mode marker.
pub const WORKER_FLAG: &str = "--stream";
/// Environment variable carrying the turn generation to the worker.
pub const GENERATION_ENV: &str = "POLLCHAT_GENERATION";

/// Spawn spec re-running the current program as the worker for `generation`.
#[must_use]
pub fn worker_spec(generation: Generation) -> SpawnSpec {
    SpawnSpec::new()
        .arg(WORKER_FLAG)
        .env(WORKER_MODE_ENV, WORKER_MODE_VALUE)
        .env(GENERATION_ENV, generation.to_string())
}

/// Command build error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("Cannot locate the current executable: {0}")]
    CurrentExe(#[source] std::io::Error),
    #[error("Base command is empty")]
    EmptyCommand,
}

/// Resolved command parts (program + args + env).
#[derive(Debug, Clone)]
pub struct CommandParts {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// Builder for the worker command line.
///
/// Without a base the command re-executes the running binary.
#[derive(Debug, Clone, Default)]
pub struct CommandBuilder {
    /// Executable overriding the running binary.
    pub base: Option<PathBuf>,
    /// Parameters placed before the spawn spec's own arguments.
    pub params: Vec<String>,
}

impl CommandBuilder {
    /// Builder re-executing the running binary.
    #[must_use]
    pub fn current_exe() -> Self {
        Self::default()
    }

    /// Override the base command.
    #[must_use]
    pub fn override_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Extend parameters.
    #[must_use]
    pub fn params<I>(mut self, params: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.params.extend(params.into_iter().map(Into::into));
        self
    }

    /// Build the command for a spawn spec.
    ///
    /// # Errors
    /// Returns error if the base is empty or the running binary cannot be located.
    pub fn build(&self, spec: &SpawnSpec) -> Result<CommandParts, CommandBuildError> {
        let program = match &self.base {
            Some(base) if base.as_os_str().is_empty() => {
                return Err(CommandBuildError::EmptyCommand);
            }
            Some(base) => base.clone(),
            None => std::env::current_exe().map_err(CommandBuildError::CurrentExe)?,
        };

        let mut args = self.params.clone();
        args.extend(spec.args.iter().cloned());

        Ok(CommandParts {
            program,
            args,
            env: spec.env.clone(),
        })
    }
}
