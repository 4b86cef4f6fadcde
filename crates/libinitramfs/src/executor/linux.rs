//! Implements Executor trait for Linux systems
use std::any::Any;
use std::process::{Command, Stdio};

use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use procfs::process::all_processes;

use super::{CommandOutput, Executor, ExecutorError};

#[derive(Clone, Default)]
pub struct LinuxExecutor;

/// Process state letter the kernel reports for an exited, unreaped process.
const ZOMBIE: char = 'Z';

impl LinuxExecutor {
    /// Collects the exit status of every background child that has finished.
    /// Nothing else waits on them once `spawn` returns.
    fn reap_children() {
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) | Err(_) => break,
                Ok(status) => tracing::trace!(?status, "reaped background process"),
            }
        }
    }

    /// Pids of live processes whose command name is `name`.
    fn pids_named(name: &str) -> Vec<i32> {
        Self::reap_children();
        let processes = match all_processes() {
            Ok(processes) => processes,
            Err(err) => {
                tracing::warn!(?err, "failed to list processes");
                return Vec::new();
            }
        };

        processes
            .filter_map(|p| p.ok())
            .filter_map(|p| match p.stat() {
                Ok(stat) if is_live(&stat.comm, stat.state, name) => Some(p.pid),
                _ => None,
            })
            .collect()
    }
}

fn is_live(comm: &str, state: char, name: &str) -> bool {
    comm == name && state != ZOMBIE
}

impl Executor for LinuxExecutor {
    fn as_any(&self) -> &dyn Any {
        self
    }

    #[tracing::instrument(level = "debug", skip(self))]
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, ExecutorError> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| {
                tracing::error!(?err, program, "failed to execute");
                ExecutorError::Spawn {
                    program: program.to_owned(),
                    err,
                }
            })?;

        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if !result.success() {
            tracing::debug!(program, code = ?result.code, stderr = result.stderr.trim(), "helper exited unsuccessfully");
        }

        Ok(result)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    fn run_interactive(
        &self,
        program: &str,
        args: &[&str],
    ) -> Result<Option<i32>, ExecutorError> {
        let status = Command::new(program).args(args).status().map_err(|err| {
            tracing::error!(?err, program, "failed to execute");
            ExecutorError::Spawn {
                program: program.to_owned(),
                err,
            }
        })?;

        Ok(status.code())
    }

    fn spawn(&self, program: &str, args: &[&str]) -> Result<u32, ExecutorError> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| ExecutorError::Spawn {
                program: program.to_owned(),
                err,
            })?;

        tracing::debug!(program, pid = child.id(), "started background process");
        Ok(child.id())
    }

    fn available(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }

    fn is_running(&self, name: &str) -> bool {
        !Self::pids_named(name).is_empty()
    }

    fn terminate(&self, name: &str) {
        for pid in Self::pids_named(name) {
            if let Err(errno) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                tracing::warn!(?errno, pid, name, "failed to terminate process");
            }
        }
    }
}
