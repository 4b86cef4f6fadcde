use std::any::Any;

use super::linux::LinuxExecutor;
use super::test::TestHelperExecutor;
use super::{CommandOutput, ExecutorError};

/// Synchronous access to helper programs and to the process table.
pub trait Executor {
    fn as_any(&self) -> &dyn Any;
    /// Runs `program` to completion and captures its output. A non-zero
    /// exit status is not an error; callers inspect `CommandOutput`.
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, ExecutorError>;
    /// Runs `program` to completion on the console, for helpers that prompt
    /// the user. Returns the exit code, `None` if it was killed by a signal.
    fn run_interactive(
        &self,
        program: &str,
        args: &[&str],
    ) -> Result<Option<i32>, ExecutorError>;
    /// Starts `program` in the background and returns its pid.
    fn spawn(&self, program: &str, args: &[&str]) -> Result<u32, ExecutorError>;
    /// Whether `program` can be found on `PATH`.
    fn available(&self, program: &str) -> bool;
    /// Whether a process named `name` is alive.
    fn is_running(&self, name: &str) -> bool;
    /// Sends SIGTERM to every process named `name`.
    fn terminate(&self, name: &str);
}

#[derive(Clone, Copy)]
pub enum ExecutorType {
    Linux,
    Test,
}

impl Default for ExecutorType {
    fn default() -> Self {
        if cfg!(test) {
            ExecutorType::Test
        } else {
            ExecutorType::Linux
        }
    }
}

impl ExecutorType {
    pub fn create_executor(&self) -> Box<dyn Executor> {
        match self {
            ExecutorType::Linux => Box::new(LinuxExecutor),
            ExecutorType::Test => Box::<TestHelperExecutor>::default(),
        }
    }
}

pub fn create_executor() -> Box<dyn Executor> {
    ExecutorType::default().create_executor()
}
