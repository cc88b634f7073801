//! Spawning commands and tracking them in the registry
//!
//! Every child leads its own process group, so signaling `-pid` reaches the
//! command and anything it forks (a `bash -c` wrapper and its server, say).

use crate::registry::{ProcessRecord, Registry, RegistryError};
use crate::service::ServiceKey;
use std::io::{self, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use thiserror::Error;
use tracing::{debug, info, warn};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

/// Errors from running or starting a command
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Cannot run an empty command")]
    EmptyCommand,

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: io::Error,
    },

    #[error("Failed waiting for {program}: {source}")]
    Wait {
        program: String,
        source: io::Error,
    },

    #[error("{program} exited with {status}")]
    ExitStatus { program: String, status: ExitStatus },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// A process started in the background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedProcess {
    pub record: ProcessRecord,
}

impl StartedProcess {
    pub fn pid(&self) -> u32 {
        self.record.pid
    }
}

/// Argument vector that runs `cmd` through bash.
pub fn shell_command(cmd: &str) -> Vec<String> {
    vec!["bash".to_string(), "-c".to_string(), cmd.to_string()]
}

/// Spawns commands and keeps the registry in sync with them.
#[derive(Debug, Clone)]
pub struct Runner {
    registry: Registry,
}

impl Runner {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run a command to completion, copying its output into the writers.
    ///
    /// The registry tracks the process while it runs; its record is removed
    /// afterwards whether or not the command succeeded.
    pub fn run_with_io(
        &self,
        argv: &[String],
        cwd: &Path,
        stdout: &mut (dyn Write + Send),
        stderr: &mut (dyn Write + Send),
    ) -> Result<(), RunError> {
        let (program, mut child) = spawn(argv, cwd, Stdio::piped(), Stdio::piped())?;
        let record = self.track(&program, &child);

        let child_stdout = child.stdout.take();
        let child_stderr = child.stderr.take();
        std::thread::scope(|scope| {
            if let Some(mut out) = child_stdout {
                scope.spawn(move || copy_output(&mut out, stdout));
            }
            if let Some(mut err) = child_stderr {
                scope.spawn(move || copy_output(&mut err, stderr));
            }
        });

        let waited = child.wait();
        if let Err(e) = self.registry.remove(&record) {
            warn!(pid = record.pid, error = %e, "failed to remove finished process from registry");
        }

        let status = waited.map_err(|source| RunError::Wait {
            program: program.clone(),
            source,
        })?;
        debug!(%program, %status, "command finished");
        if status.success() {
            Ok(())
        } else {
            Err(RunError::ExitStatus { program, status })
        }
    }

    /// Start a command in the background with the given stdio.
    pub fn start_with_io(
        &self,
        argv: &[String],
        cwd: &Path,
        stdout: Stdio,
        stderr: Stdio,
    ) -> Result<StartedProcess, RunError> {
        let (program, child) = spawn(argv, cwd, stdout, stderr)?;
        let record = self.track(&program, &child);
        reap_in_background(program, child);
        Ok(StartedProcess { record })
    }

    /// Start a command in the background, sending its output to a fresh log
    /// file for `key`.
    pub fn start_with_logs(
        &self,
        argv: &[String],
        cwd: &Path,
        key: &ServiceKey,
    ) -> Result<StartedProcess, RunError> {
        let log = self.registry.open_fresh_log(key)?;
        let log_path = self.registry.log_path(key);
        let log_err = log
            .try_clone()
            .map_err(|e| RegistryError::io(&log_path, e))?;
        let started = self.start_with_io(argv, cwd, Stdio::from(log), Stdio::from(log_err))?;
        info!(pid = started.pid(), %key, log = %log_path.display(), "started process");
        Ok(started)
    }

    /// Record a freshly spawned child. Bookkeeping failures are logged; the
    /// child keeps running.
    fn track(&self, program: &str, child: &Child) -> ProcessRecord {
        let record = ProcessRecord::started(child.id(), program);
        if let Err(e) = self.registry.add(record.clone()) {
            warn!(pid = record.pid, %program, error = %e, "failed to add process to registry");
        }
        record
    }
}

fn spawn(
    argv: &[String],
    cwd: &Path,
    stdout: Stdio,
    stderr: Stdio,
) -> Result<(String, Child), RunError> {
    let (bin, args) = argv.split_first().ok_or(RunError::EmptyCommand)?;
    let program = argv.join(" ");

    let mut cmd = Command::new(bin);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr);

    #[cfg(unix)]
    cmd.process_group(0);

    let child = cmd.spawn().map_err(|source| RunError::Spawn {
        program: program.clone(),
        source,
    })?;
    debug!(pid = child.id(), %program, cwd = %cwd.display(), "spawned");
    Ok((program, child))
}

fn copy_output(from: &mut impl io::Read, to: &mut (dyn Write + Send)) {
    if let Err(e) = io::copy(from, to).and_then(|_| to.flush()) {
        debug!(error = %e, "stopped copying child output");
    }
}

/// Wait on the child from a detached thread so that it does not linger as a
/// zombie after it exits.
fn reap_in_background(program: String, mut child: Child) {
    let pid = child.id();
    let spawned = std::thread::Builder::new()
        .name(format!("pets-reap-{pid}"))
        .spawn(move || match child.wait() {
            Ok(status) => info!(pid, %program, %status, "process exited"),
            Err(e) => warn!(pid, %program, error = %e, "failed waiting for process"),
        });
    if let Err(e) = spawned {
        warn!(pid, error = %e, "failed to spawn reaper thread");
    }
}
