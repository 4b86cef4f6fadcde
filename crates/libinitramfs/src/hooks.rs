use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::executor::{Executor, ExecutorError};

pub const HOOKS_DIR: &str = "/hooks";

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("failed to read hook directory {path:?}: {err}")]
    ReadDir { path: PathBuf, err: std::io::Error },
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error("hook {hook:?} failed. Non-zero return code. {code:?}")]
    Failed { hook: PathBuf, code: Option<i32> },
}

/// Runs every executable file in `dir` in name order. A failing hook is
/// logged and the next one still runs; a missing directory means no hooks.
pub fn run_hooks(dir: &Path, executor: &dyn Executor) -> Result<(), HookError> {
    let hooks = match find_hooks(dir) {
        Ok(hooks) => hooks,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => {
            return Err(HookError::ReadDir {
                path: dir.to_path_buf(),
                err,
            })
        }
    };

    for hook in hooks {
        tracing::info!(?hook, "running hook");
        if let Err(err) = run_hook(&hook, executor) {
            tracing::warn!(?hook, %err, "hook failed");
        }
    }

    Ok(())
}

fn run_hook(hook: &Path, executor: &dyn Executor) -> Result<(), HookError> {
    let output = executor.run(&hook.to_string_lossy(), &[])?;
    match output.code {
        Some(0) => Ok(()),
        code => Err(HookError::Failed {
            hook: hook.to_path_buf(),
            code,
        }),
    }
}

fn find_hooks(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut hooks = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_file() && metadata.permissions().mode() & 0o111 != 0 {
            hooks.push(entry.path());
        }
    }
    hooks.sort();
    Ok(hooks)
}
