//! Runs the external helper programs the pipeline drives (blkid, kpartx,
//! parted, cryptsetup, the filesystem grow tools and friends).

#[allow(clippy::module_inception)]
pub mod executor;
pub mod linux;
pub mod test;

pub use executor::{create_executor, Executor, ExecutorType};

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("failed to execute {program}: {err}")]
    Spawn {
        program: String,
        err: std::io::Error,
    },
    #[error("{program} is not installed")]
    NotFound { program: String },
}

/// Captured result of a finished helper process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn ok(stdout: &str) -> Self {
        CommandOutput {
            code: Some(0),
            stdout: stdout.to_owned(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: &str) -> Self {
        CommandOutput {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_owned(),
        }
    }
}
