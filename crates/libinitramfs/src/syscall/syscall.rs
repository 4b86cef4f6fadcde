//! An interface trait so that rest of the pipeline can call
//! necessary functions without having to worry about their
//! implementation details
use std::any::Any;
use std::path::Path;

use nix::mount::{MntFlags, MsFlags};

use crate::syscall::linux::LinuxSyscall;
use crate::syscall::test::TestHelperSyscall;
use crate::syscall::Result;

/// This specifies the kernel functionalities required to bring up the
/// root filesystem
pub trait Syscall {
    fn as_any(&self) -> &dyn Any;
    /// Mounts `source` on `target`. A `None` filesystem type on a plain
    /// device mount asks the implementation to detect the type itself.
    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()>;
    fn umount2(&self, target: &Path, flags: MntFlags) -> Result<()>;
    fn create_dir_all(&self, path: &Path) -> Result<()>;
    fn remove_dir(&self, path: &Path) -> Result<()>;
    fn write_file(&self, path: &Path, data: &str) -> Result<()>;
    fn exists(&self, path: &Path) -> bool;
}

#[derive(Clone, Copy)]
pub enum SyscallType {
    Linux,
    Test,
}

impl Default for SyscallType {
    fn default() -> Self {
        if cfg!(test) {
            SyscallType::Test
        } else {
            SyscallType::Linux
        }
    }
}

impl SyscallType {
    pub fn create_syscall(&self) -> Box<dyn Syscall> {
        match self {
            SyscallType::Linux => Box::new(LinuxSyscall),
            SyscallType::Test => Box::<TestHelperSyscall>::default(),
        }
    }
}

pub fn create_syscall() -> Box<dyn Syscall> {
    SyscallType::default().create_syscall()
}
