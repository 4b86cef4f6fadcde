//! Contains a wrapper of syscalls for unit tests
//! This provides a uniform interface for the rest of the pipeline
//! to mount, unmount and touch the files early boot depends on

pub mod linux;
#[allow(clippy::module_inception)]
pub mod syscall;

pub use syscall::Syscall;

#[derive(Debug, thiserror::Error)]
pub enum SyscallError {
    #[error("mount failed: {errno}")]
    MountFailed {
        mount_source: Option<std::path::PathBuf>,
        mount_target: std::path::PathBuf,
        fstype: Option<String>,
        flags: nix::mount::MsFlags,
        data: Option<String>,
        errno: nix::errno::Errno,
    },
    #[error("no filesystem type could mount {device:?}")]
    NoFilesystemMatched { device: std::path::PathBuf },
    #[error("umount of {target:?} failed: {errno}")]
    UmountFailed {
        target: std::path::PathBuf,
        errno: nix::errno::Errno,
    },
    #[error("failed to create directory {path:?}: {err}")]
    CreateDir {
        path: std::path::PathBuf,
        err: std::io::Error,
    },
    #[error("failed to write {path:?}: {err}")]
    Write {
        path: std::path::PathBuf,
        err: std::io::Error,
    },
    #[error("failed to remove directory {path:?}: {err}")]
    RemoveDir {
        path: std::path::PathBuf,
        err: std::io::Error,
    },
    #[error("injected failure: {0}")]
    Injected(String),
}

type Result<T> = std::result::Result<T, SyscallError>;
