use std::any::Any;
use std::path::{Path, PathBuf};

use super::linux::LinuxProbe;
use super::test::TestHelperProbe;
use super::BlockDevice;
use crate::executor::ExecutorError;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error("no signature found on {device:?}")]
    NoSignature { device: PathBuf },
    #[error("blkid failed on {device:?} with code {code:?}")]
    Blkid { device: PathBuf, code: Option<i32> },
}

/// Read-only view of the block devices currently visible to the system.
pub trait Probe {
    fn as_any(&self) -> &dyn Any;
    /// Filesystem type, label and UUID of `device`, or `None` when the node
    /// is missing or carries no recognisable signature.
    fn identify(&self, device: &Path) -> Option<BlockDevice>;
    /// Every block device node the kernel knows about, sorted by path.
    fn block_devices(&self) -> Vec<PathBuf>;
    /// Device-mapper nodes under `/dev/mapper` and `/dev/dm-*`, sorted.
    fn mapper_devices(&self) -> Vec<PathBuf>;
    fn is_block_device(&self, path: &Path) -> bool;
    fn exists(&self, path: &Path) -> bool;
    /// Entries of `dir`, sorted. A missing directory is empty.
    fn list_dir(&self, dir: &Path) -> Vec<PathBuf>;
    /// Device names from the kernel's disk statistics table, in table order.
    fn disk_stat_names(&self) -> Vec<String>;
}

#[derive(Clone, Copy)]
pub enum ProbeType {
    Linux,
    Test,
}

impl Default for ProbeType {
    fn default() -> Self {
        if cfg!(test) {
            ProbeType::Test
        } else {
            ProbeType::Linux
        }
    }
}

impl ProbeType {
    pub fn create_probe(&self) -> Box<dyn Probe> {
        match self {
            ProbeType::Linux => Box::new(LinuxProbe),
            ProbeType::Test => Box::<TestHelperProbe>::default(),
        }
    }
}

pub fn create_probe() -> Box<dyn Probe> {
    ProbeType::default().create_probe()
}
