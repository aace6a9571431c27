//! Child processes owned by the agent: the game and the media streamers.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// How long a terminated process gets to exit before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(3);

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to terminate process: {0}")]
    Terminate(#[from] std::io::Error),
}

/// A program to run, with its arguments and working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl LaunchCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// A running child process the agent is responsible for stopping.
#[async_trait]
pub trait ManagedProcess: Send + Sync + std::fmt::Debug {
    fn id(&self) -> Option<u32>;

    /// Stop the process. Calling this on an already exited process is not
    /// an error.
    async fn terminate(&mut self) -> Result<(), ProcessError>;
}

pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, command: &LaunchCommand) -> Result<Box<dyn ManagedProcess>, ProcessError>;
}

/// Launches real OS processes through `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsProcessLauncher;

impl ProcessLauncher for OsProcessLauncher {
    fn launch(&self, command: &LaunchCommand) -> Result<Box<dyn ManagedProcess>, ProcessError> {
        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: command.program.display().to_string(),
            source,
        })?;
        tracing::info!(
            program = %command.program.display(),
            pid = child.id(),
            "process started"
        );
        Ok(Box::new(OsProcess { child }))
    }
}

#[derive(Debug)]
pub struct OsProcess {
    child: tokio::process::Child,
}

#[async_trait]
impl ManagedProcess for OsProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn terminate(&mut self) -> Result<(), ProcessError> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }

        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                // SAFETY: pid belongs to our un-reaped child, so it cannot have
                // been recycled.
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGTERM);
                }
                if let Ok(status) = tokio::time::timeout(TERMINATE_GRACE, self.child.wait()).await {
                    tracing::debug!(pid, ?status, "process exited after SIGTERM");
                    return Ok(());
                }
                tracing::warn!(pid, "process ignored SIGTERM, killing");
            }
        }

        // On Windows this is TerminateProcess.
        self.child.kill().await?;
        Ok(())
    }
}
