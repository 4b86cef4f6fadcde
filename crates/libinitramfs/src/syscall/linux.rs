//! Implements Syscall trait for Linux systems
use std::any::Any;
use std::fs;
use std::path::Path;

use nix::mount::{mount, umount2, MntFlags, MsFlags};

use super::{Result, Syscall, SyscallError};

const PROC_FILESYSTEMS: &str = "/proc/filesystems";

/// Mount flags for which the kernel does not need a filesystem type.
const TYPELESS_FLAGS: MsFlags = MsFlags::MS_BIND
    .union(MsFlags::MS_REMOUNT)
    .union(MsFlags::MS_MOVE);

/// Empty structure to implement Syscall trait for
#[derive(Clone)]
pub struct LinuxSyscall;

impl LinuxSyscall {
    /// Block-backed filesystem types the running kernel knows about, in the
    /// order the kernel lists them. `nodev` entries are virtual filesystems
    /// and can never hold a partition.
    fn block_filesystems() -> Vec<String> {
        match fs::read_to_string(PROC_FILESYSTEMS) {
            Ok(content) => parse_block_filesystems(&content),
            Err(err) => {
                tracing::warn!(?err, "failed to read {}", PROC_FILESYSTEMS);
                Vec::new()
            }
        }
    }

    fn mount_detected(
        source: &Path,
        target: &Path,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()> {
        for fstype in Self::block_filesystems() {
            match mount(Some(source), target, Some(fstype.as_str()), flags, data) {
                Ok(()) => {
                    tracing::debug!(?source, ?target, %fstype, "detected filesystem type");
                    return Ok(());
                }
                Err(errno) => {
                    tracing::trace!(?source, %fstype, ?errno, "filesystem type did not match");
                }
            }
        }

        Err(SyscallError::NoFilesystemMatched {
            device: source.to_path_buf(),
        })
    }
}

pub(crate) fn parse_block_filesystems(content: &str) -> Vec<String> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with("nodev"))
        .map(|line| line.trim().to_owned())
        .collect()
}

impl Syscall for LinuxSyscall {
    /// To enable dynamic typing,
    /// see <https://doc.rust-lang.org/std/any/index.html> for more information
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()> {
        if let (Some(source), None) = (source, fstype) {
            if !flags.intersects(TYPELESS_FLAGS) {
                return Self::mount_detected(source, target, flags, data);
            }
        }

        mount(source, target, fstype, flags, data).map_err(|errno| {
            tracing::error!(?errno, ?source, ?target, ?fstype, "failed to mount");
            SyscallError::MountFailed {
                mount_source: source.map(|p| p.to_path_buf()),
                mount_target: target.to_path_buf(),
                fstype: fstype.map(|s| s.to_owned()),
                flags,
                data: data.map(|s| s.to_owned()),
                errno,
            }
        })
    }

    fn umount2(&self, target: &Path, flags: MntFlags) -> Result<()> {
        umount2(target, flags).map_err(|errno| {
            tracing::error!(?errno, ?target, "failed to unmount");
            SyscallError::UmountFailed {
                target: target.to_path_buf(),
                errno,
            }
        })
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).map_err(|err| SyscallError::CreateDir {
            path: path.to_path_buf(),
            err,
        })
    }

    fn remove_dir(&self, path: &Path) -> Result<()> {
        fs::remove_dir(path).map_err(|err| SyscallError::RemoveDir {
            path: path.to_path_buf(),
            err,
        })
    }

    fn write_file(&self, path: &Path, data: &str) -> Result<()> {
        fs::write(path, data).map_err(|err| {
            tracing::error!(?path, ?err, "failed to write file");
            SyscallError::Write {
                path: path.to_path_buf(),
                err,
            }
        })
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_block_filesystems_skips_nodev() {
        let content = "nodev\tsysfs\nnodev\ttmpfs\n\text4\n\tvfat\nnodev\tproc\n\tbtrfs\n";
        assert_eq!(
            parse_block_filesystems(content),
            vec!["ext4".to_string(), "vfat".to_string(), "btrfs".to_string()]
        );
    }

    #[test]
    fn test_parse_block_filesystems_empty() {
        assert!(parse_block_filesystems("").is_empty());
        assert!(parse_block_filesystems("nodev\tcgroup2\n").is_empty());
    }
}
