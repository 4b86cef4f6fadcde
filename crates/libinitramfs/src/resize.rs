//! Growing the root partition and its filesystem into unallocated space.
//!
//! Every partition table change is gated on `parted` reporting free space
//! after the last partition, so running a resize twice changes nothing the
//! second time.

use std::path::{Path, PathBuf};

use nix::mount::{MntFlags, MsFlags};

use crate::context::BootContext;
use crate::device::{FilesystemType, PartitionAddress};
use crate::executor::{CommandOutput, ExecutorError};
use crate::host::Host;
use crate::locate::{Locator, LABEL_DELETEME, LABEL_INSTALL};
use crate::setup::load_module;
use crate::state::PipelineState;
use crate::syscall::SyscallError;

const PARTED: &str = "parted";
const PARTPROBE: &str = "partprobe";
const KPARTX: &str = "kpartx";
const DMSETUP: &str = "dmsetup";

const BTRFS_MOUNTPOINT: &str = "/tmp/btrfs-resize";

/// Partition index of root on a plain layout.
const ROOT_INDEX: u32 = 2;
/// Partition index of root behind an extra leading kernel partition.
const KPART_ROOT_INDEX: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum ResizeError {
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error(transparent)]
    Syscall(#[from] SyscallError),
    #[error("{command} failed with code {code:?}: {stderr}")]
    Command {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("cannot find the device backing {device:?}")]
    NoBackingDevice { device: PathBuf },
}

type Result<T> = std::result::Result<T, ResizeError>;

/// Which rule decided that a partition may grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// Root is a subpartition mapped out of partition 2 of another device.
    Subpartition,
    /// `PMOS_FORCE_PARTITION_RESIZE`: root is partition 2.
    Forced,
    /// Devices with a kernel partition in front: root is partition 3.
    KernelPartition,
}

pub struct Resizer<'a> {
    ctx: &'a BootContext,
    host: &'a Host,
}

impl<'a> Resizer<'a> {
    pub fn new(ctx: &'a BootContext, host: &'a Host) -> Self {
        Resizer { ctx, host }
    }

    fn locator(&self) -> Locator<'_> {
        Locator::new(self.ctx, self.host.probe.as_ref())
    }

    /// Removes the partition the on-device installer left behind for
    /// deletion after its first successful boot.
    pub fn delete_installer_partition(&self) {
        let Some(partition) = self.locator().find_label(LABEL_DELETEME) else {
            return;
        };
        let Some(address) = PartitionAddress::parse(&partition) else {
            tracing::warn!(?partition, "cannot tell which disk holds the leftover installer partition");
            return;
        };

        tracing::info!(?partition, "deleting the installer partition");
        let disk = address.disk();
        let ordinal = address.ordinal().to_string();
        let result = self
            .parted(&disk, &["rm", &ordinal])
            .and_then(|_| self.partprobe());
        if let Err(err) = result {
            tracing::warn!(%err, "failed to delete the installer partition");
        }
    }

    /// Evaluates every resize rule that applies to the current root and
    /// grows the partition for each one that finds free space.
    pub fn resize_root_partition(&self, state: &mut PipelineState) {
        let locator = self.locator();
        let Some(root) = locator.locate_root(state) else {
            tracing::warn!("no root partition to resize");
            return;
        };
        if locator
            .identify(&root)
            .map_or(false, |d| d.has_label(LABEL_INSTALL))
        {
            tracing::info!(?root, "not resizing the installer partition");
            return;
        }

        for layout in self.layouts() {
            match self.resize_layout(layout, &root) {
                Ok(true) => {
                    tracing::info!(?root, ?layout, "root partition resized");
                    state.root_resized = true;
                }
                Ok(false) => tracing::debug!(?root, ?layout, "root partition not resized"),
                Err(err) => tracing::warn!(?root, ?layout, %err, "failed to resize root partition"),
            }
        }
    }

    /// Grows the root filesystem after its partition was resized. Uses the
    /// decrypted mapping when root was unlocked.
    pub fn resize_root_filesystem(&self, state: &mut PipelineState) {
        if !state.root_resized {
            return;
        }

        let locator = self.locator();
        let Some(device) = locator
            .locate_root(state)
            .and_then(|root| locator.identify(&root))
        else {
            tracing::warn!("root disappeared before its filesystem could be resized");
            return;
        };

        self.host
            .splash
            .show("Resizing filesystem during initial boot...");
        let result = match &device.fstype {
            fstype if fstype.is_ext() => self.check("resize2fs", &["-f", &device.path.to_string_lossy()]),
            FilesystemType::F2fs => self.check("resize.f2fs", &[&device.path.to_string_lossy()]),
            FilesystemType::Btrfs => self.resize_btrfs(&device.path),
            other => {
                tracing::warn!(device = ?device.path, fstype = %other, "cannot resize this filesystem");
                Ok(CommandOutput::default())
            }
        };
        match result {
            Ok(_) => tracing::info!(device = ?device.path, fstype = %device.fstype, "filesystem resized"),
            Err(err) => tracing::warn!(device = ?device.path, %err, "failed to resize filesystem"),
        }
        self.host.splash.show("Loading...");
    }

    /// Whether the last entry `parted` prints for `device` is free space.
    pub fn has_unallocated_space(&self, device: &Path) -> bool {
        match self.parted(device, &["print", "free"]) {
            Ok(output) => ends_with_free_space(&output.stdout),
            Err(err) => {
                tracing::debug!(?device, %err, "cannot read partition table");
                false
            }
        }
    }

    fn layouts(&self) -> Vec<Layout> {
        let mut layouts = vec![Layout::Subpartition];
        if self.ctx.force_partition_resize() {
            layouts.push(Layout::Forced);
        }
        if self.ctx.cgpt_kpart() {
            layouts.push(Layout::KernelPartition);
        }
        layouts
    }

    fn resize_layout(&self, layout: Layout, root: &Path) -> Result<bool> {
        match layout {
            Layout::Subpartition => {
                if !crate::device::is_device_mapper(root) {
                    return Ok(false);
                }
                let backing = self.backing_device(root)?;
                if !self.has_unallocated_space(&backing) {
                    return Ok(false);
                }
                let path = backing.to_string_lossy();
                self.check(KPARTX, &["-d", &path])?;
                self.grow(&backing, ROOT_INDEX)?;
                self.check(KPARTX, &["-afs", &path])?;
                Ok(true)
            }
            Layout::Forced | Layout::KernelPartition => {
                let index = if layout == Layout::Forced {
                    ROOT_INDEX
                } else {
                    KPART_ROOT_INDEX
                };
                let Some(address) = PartitionAddress::parse(root) else {
                    return Ok(false);
                };
                if address.ordinal() != index {
                    tracing::debug!(?root, index, "root is not at the expected partition index");
                    return Ok(false);
                }
                let disk = address.disk();
                if !self.has_unallocated_space(&disk) {
                    return Ok(false);
                }
                self.grow(&disk, index)?;
                self.partprobe()?;
                Ok(true)
            }
        }
    }

    /// The device a device-mapper node is mapped from.
    fn backing_device(&self, device: &Path) -> Result<PathBuf> {
        let output = self.check(
            DMSETUP,
            &["deps", "-o", "blkdevname", &device.to_string_lossy()],
        )?;
        parse_dmsetup_deps(&output.stdout).ok_or_else(|| ResizeError::NoBackingDevice {
            device: device.to_path_buf(),
        })
    }

    fn grow(&self, disk: &Path, index: u32) -> Result<CommandOutput> {
        let index = index.to_string();
        self.parted_forced(disk, &["resizepart", &index, "100%"])
    }

    /// btrfs only grows while mounted. The temporary mountpoint is cleaned
    /// up on every path; the first failure is the one reported.
    fn resize_btrfs(&self, device: &Path) -> Result<CommandOutput> {
        let syscall = self.host.syscall.as_ref();
        let mountpoint = Path::new(BTRFS_MOUNTPOINT);

        load_module(self.host.executor.as_ref(), "btrfs");
        syscall.create_dir_all(mountpoint)?;
        let mounted = syscall.mount(
            Some(device),
            mountpoint,
            Some("btrfs"),
            MsFlags::empty(),
            None,
        );
        let result = match mounted {
            Ok(()) => {
                let resized = self.check(
                    "btrfs",
                    &["filesystem", "resize", "max", BTRFS_MOUNTPOINT],
                );
                let unmounted = syscall.umount2(mountpoint, MntFlags::empty());
                resized.and_then(|output| unmounted.map(|_| output).map_err(ResizeError::from))
            }
            Err(err) => Err(err.into()),
        };
        let removed = syscall.remove_dir(mountpoint);

        let output = result?;
        removed?;
        Ok(output)
    }

    fn parted(&self, device: &Path, args: &[&str]) -> Result<CommandOutput> {
        let path = device.to_string_lossy();
        let mut full = vec!["-s", &*path];
        full.extend_from_slice(args);
        self.check(PARTED, &full)
    }

    fn parted_forced(&self, device: &Path, args: &[&str]) -> Result<CommandOutput> {
        let path = device.to_string_lossy();
        let mut full = vec!["-f", "-s", &*path];
        full.extend_from_slice(args);
        self.check(PARTED, &full)
    }

    fn partprobe(&self) -> Result<CommandOutput> {
        self.check(PARTPROBE, &[])
    }

    /// Runs a helper and turns a non-zero exit into an error.
    fn check(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let output = self.host.executor.run(program, args)?;
        if output.success() {
            Ok(output)
        } else {
            Err(ResizeError::Command {
                command: format!("{} {}", program, args.join(" ")),
                code: output.code,
                stderr: output.stderr.trim().to_owned(),
            })
        }
    }
}

/// `parted print free` ends with a blank line; the row before it is the
/// last region of the disk.
fn ends_with_free_space(output: &str) -> bool {
    output
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .map_or(false, |line| line.to_lowercase().contains("free space"))
}

/// Extracts `/dev/<name>` from `dmsetup deps -o blkdevname` output such as
/// `1 dependencies  : (mmcblk0p9)`.
fn parse_dmsetup_deps(output: &str) -> Option<PathBuf> {
    let start = output.find('(')?;
    let end = start + output[start..].find(')')?;
    let name = output[start + 1..end].trim();
    (!name.is_empty()).then(|| Path::new("/dev").join(name))
}
