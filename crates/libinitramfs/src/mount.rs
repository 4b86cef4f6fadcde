//! Mounting boot and root.

use std::fmt;
use std::path::{Path, PathBuf};

use nix::mount::{MntFlags, MsFlags};

use crate::context::BootContext;
use crate::device::{BlockDevice, FilesystemType};
use crate::error::FatalError;
use crate::host::Host;
use crate::locate::Locator;
use crate::setup::load_module;
use crate::state::PipelineState;
use crate::syscall::SyscallError;

pub const BOOT_MOUNTPOINT: &str = "/boot";
pub const SYSROOT: &str = "/sysroot";
pub const HANDOFF_BOOT_MOUNTPOINT: &str = "/sysroot/boot";
/// Present on every installed root filesystem.
const ROOT_MARKER: &str = "usr";

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("{target:?} is already mounted")]
    AlreadyMounted { target: PathBuf },
    #[error(transparent)]
    Syscall(#[from] SyscallError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountMode {
    ReadOnly,
    ReadWrite,
}

impl MountMode {
    fn as_option(&self) -> &'static str {
        match self {
            MountMode::ReadOnly => "ro",
            MountMode::ReadWrite => "rw",
        }
    }
}

impl fmt::Display for MountMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountMode::ReadOnly => f.write_str("read-only"),
            MountMode::ReadWrite => f.write_str("read-write"),
        }
    }
}

/// Where and how a device gets mounted. `fstype` of `None` lets the
/// syscall layer detect the type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub target: PathBuf,
    pub mode: MountMode,
    pub fstype: Option<String>,
    /// Comma separated, as given to `mount -o`.
    pub options: Option<String>,
}

impl MountSpec {
    pub fn new<P: Into<PathBuf>>(target: P, mode: MountMode) -> Self {
        MountSpec {
            target: target.into(),
            mode,
            fstype: None,
            options: None,
        }
    }

    pub fn with_fstype(mut self, fstype: &str) -> Self {
        self.fstype = Some(fstype.to_owned());
        self
    }

    pub fn with_options(mut self, options: Option<&str>) -> Self {
        self.options = options.map(|o| o.to_owned());
        self
    }

    /// Mode first, so that extra options may override it the way a later
    /// `-o` entry does.
    pub fn flags_and_data(&self) -> (MsFlags, Option<String>) {
        let mut options = self.mode.as_option().to_owned();
        if let Some(extra) = &self.options {
            options.push(',');
            options.push_str(extra);
        }
        let (flags, data) = parse_mount_options(&options);
        (flags, (!data.is_empty()).then_some(data))
    }
}

/// Splits a `mount -o` string into mount flags and filesystem specific
/// data. Options without a flag are passed through as data.
pub fn parse_mount_options(options: &str) -> (MsFlags, String) {
    let mut flags = MsFlags::empty();
    let mut data = Vec::new();

    for option in options.split(',').map(str::trim).filter(|o| !o.is_empty()) {
        if let Some((is_clear, flag)) = match option {
            "defaults" => Some((false, MsFlags::empty())),
            "ro" => Some((false, MsFlags::MS_RDONLY)),
            "rw" => Some((true, MsFlags::MS_RDONLY)),
            "suid" => Some((true, MsFlags::MS_NOSUID)),
            "nosuid" => Some((false, MsFlags::MS_NOSUID)),
            "dev" => Some((true, MsFlags::MS_NODEV)),
            "nodev" => Some((false, MsFlags::MS_NODEV)),
            "exec" => Some((true, MsFlags::MS_NOEXEC)),
            "noexec" => Some((false, MsFlags::MS_NOEXEC)),
            "sync" => Some((false, MsFlags::MS_SYNCHRONOUS)),
            "async" => Some((true, MsFlags::MS_SYNCHRONOUS)),
            "dirsync" => Some((false, MsFlags::MS_DIRSYNC)),
            "atime" => Some((true, MsFlags::MS_NOATIME)),
            "noatime" => Some((false, MsFlags::MS_NOATIME)),
            "diratime" => Some((true, MsFlags::MS_NODIRATIME)),
            "nodiratime" => Some((false, MsFlags::MS_NODIRATIME)),
            "relatime" => Some((false, MsFlags::MS_RELATIME)),
            "norelatime" => Some((true, MsFlags::MS_RELATIME)),
            "strictatime" => Some((false, MsFlags::MS_STRICTATIME)),
            "nostrictatime" => Some((true, MsFlags::MS_STRICTATIME)),
            _unknown => None,
        } {
            if is_clear {
                flags &= !flag;
            } else {
                flags |= flag;
            }
            continue;
        }

        data.push(option);
    }

    (flags, data.join(","))
}

/// Root filesystems the boot can continue from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootFilesystem {
    Ext4,
    F2fs,
    Btrfs,
}

impl RootFilesystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            RootFilesystem::Ext4 => "ext4",
            RootFilesystem::F2fs => "f2fs",
            RootFilesystem::Btrfs => "btrfs",
        }
    }
}

impl TryFrom<&FilesystemType> for RootFilesystem {
    type Error = ();

    fn try_from(fstype: &FilesystemType) -> Result<Self, Self::Error> {
        match fstype {
            FilesystemType::Ext4 => Ok(RootFilesystem::Ext4),
            FilesystemType::F2fs => Ok(RootFilesystem::F2fs),
            FilesystemType::Btrfs => Ok(RootFilesystem::Btrfs),
            _ => Err(()),
        }
    }
}

pub struct Mounter<'a> {
    ctx: &'a BootContext,
    host: &'a Host,
}

impl<'a> Mounter<'a> {
    pub fn new(ctx: &'a BootContext, host: &'a Host) -> Self {
        Mounter { ctx, host }
    }

    fn locator(&self) -> Locator<'_> {
        Locator::new(self.ctx, self.host.probe.as_ref())
    }

    /// Mounts the boot partition on `target`. Without a boot partition
    /// nothing else can be reached, so its absence is fatal.
    pub fn mount_boot(
        &self,
        state: &mut PipelineState,
        target: &Path,
        mode: MountMode,
    ) -> Result<(), FatalError> {
        let locator = self.locator();
        let boot = locator.locate_boot().ok_or(FatalError::BootNotFound)?;
        let fstype = locator
            .identify(&boot)
            .map(|d| d.fstype)
            .unwrap_or(FilesystemType::Unknown(String::new()));

        let mut spec = MountSpec::new(target, mode);
        match &fstype {
            fstype if fstype.is_ext() => {
                tracing::debug!(?boot, "detected ext filesystem");
                self.modprobe("ext4");
            }
            FilesystemType::Vfat => {
                tracing::debug!(?boot, "detected vfat filesystem");
                self.modprobe("vfat");
                spec = spec.with_fstype("vfat");
            }
            other => {
                tracing::warn!(?boot, fstype = %other, "unsupported boot filesystem, trying anyway")
            }
        }

        tracing::info!(?boot, ?target, %mode, "mounting boot partition");
        self.mount_device(state, &boot, &spec)
            .map_err(|source| FatalError::Mount {
                device: boot,
                target: target.to_path_buf(),
                source,
            })
    }

    /// Mounts root read-only on `/sysroot` and checks that it looks like an
    /// installed system. The filesystem type is checked before mounting.
    pub fn mount_root(&self, state: &mut PipelineState) -> Result<(), FatalError> {
        let locator = self.locator();
        let root = locator
            .locate_root(state)
            .ok_or(FatalError::RootNotFound)?;
        let device = locator
            .identify(&root)
            .unwrap_or_else(|| BlockDevice::new(&root, FilesystemType::Unknown(String::new())));
        let fs = RootFilesystem::try_from(&device.fstype).map_err(|_| {
            FatalError::UnsupportedRootFilesystem {
                device: root.clone(),
                fstype: device.fstype.clone(),
            }
        })?;

        self.modprobe(fs.as_str());
        let sysroot = Path::new(SYSROOT);
        let spec = MountSpec::new(sysroot, MountMode::ReadOnly)
            .with_fstype(fs.as_str())
            .with_options(self.ctx.rootfs_opts());
        tracing::info!(?root, options = ?spec.options, "mounting root partition");
        self.mount_device(state, &root, &spec)
            .map_err(|source| FatalError::Mount {
                device: root.clone(),
                target: sysroot.to_path_buf(),
                source,
            })?;

        let marker = sysroot.join(ROOT_MARKER);
        if !self.host.syscall.exists(&marker) {
            return Err(FatalError::MissingRootContent { marker });
        }
        Ok(())
    }

    /// Unmounts `target` and forgets it was mounted.
    pub fn release(&self, state: &mut PipelineState, target: &Path) -> Result<(), MountError> {
        self.host.syscall.umount2(target, MntFlags::empty())?;
        state.forget_mount(target);
        Ok(())
    }

    /// Hands the boot partition over to the new root: the read-only mount
    /// on `/boot` goes away and boot is mounted read-write inside root.
    pub fn prepare_handoff(&self, state: &mut PipelineState) -> Result<(), FatalError> {
        let boot = Path::new(BOOT_MOUNTPOINT);
        if state.is_mounted(boot) {
            if let Err(err) = self.release(state, boot) {
                tracing::warn!(%err, "failed to release the boot mount");
            }
        }
        self.mount_boot(state, Path::new(HANDOFF_BOOT_MOUNTPOINT), MountMode::ReadWrite)
    }

    fn mount_device(
        &self,
        state: &mut PipelineState,
        device: &Path,
        spec: &MountSpec,
    ) -> Result<(), MountError> {
        if state.is_mounted(&spec.target) {
            return Err(MountError::AlreadyMounted {
                target: spec.target.clone(),
            });
        }

        let syscall = self.host.syscall.as_ref();
        if !syscall.exists(&spec.target) {
            syscall.create_dir_all(&spec.target)?;
        }
        let (flags, data) = spec.flags_and_data();
        syscall.mount(
            Some(device),
            &spec.target,
            spec.fstype.as_deref(),
            flags,
            data.as_deref(),
        )?;
        state.record_mount(&spec.target);
        Ok(())
    }

    fn modprobe(&self, module: &str) {
        load_module(self.host.executor.as_ref(), module);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{DeviceInfo, KernelCmdline};
    use crate::locate::{LABEL_BOOT, LABEL_ROOT};
    use crate::syscall::test::{injected_error, ArgName, MountArgs};

    fn context(cmdline: &str) -> BootContext {
        BootContext::new(KernelCmdline::parse(cmdline), DeviceInfo::default())
    }

    fn host_with(ctx: &BootContext, boot: FilesystemType, root: FilesystemType) -> Host {
        let host = Host::new(ctx);
        host.test_probe()
            .add_device(BlockDevice::new("/dev/sda1", boot).with_label(LABEL_BOOT));
        host.test_probe()
            .add_device(BlockDevice::new("/dev/sda2", root).with_label(LABEL_ROOT));
        host.test_syscall().set_exists("/sysroot/usr");
        host
    }

    #[test]
    fn test_parse_mount_options() {
        let (flags, data) = parse_mount_options("ro,noatime,compress=zstd,subvol=@");
        assert_eq!(flags, MsFlags::MS_RDONLY | MsFlags::MS_NOATIME);
        assert_eq!(data, "compress=zstd,subvol=@");

        let (flags, data) = parse_mount_options("ro,nodev,rw");
        assert_eq!(flags, MsFlags::MS_NODEV);
        assert_eq!(data, "");
    }

    #[test]
    fn test_spec_flags_and_data() {
        let spec = MountSpec::new("/sysroot", MountMode::ReadOnly).with_options(Some("discard"));
        assert_eq!(
            spec.flags_and_data(),
            (MsFlags::MS_RDONLY, Some("discard".to_string()))
        );
        let spec = MountSpec::new("/boot", MountMode::ReadWrite);
        assert_eq!(spec.flags_and_data(), (MsFlags::empty(), None));
    }

    #[test]
    fn test_mount_boot_ext_autodetects() {
        let ctx = context("");
        let host = host_with(&ctx, FilesystemType::Ext2, FilesystemType::Ext4);
        let mut state = PipelineState::default();

        Mounter::new(&ctx, &host)
            .mount_boot(&mut state, Path::new(BOOT_MOUNTPOINT), MountMode::ReadOnly)
            .unwrap();

        assert_eq!(
            host.test_syscall().get_mount_args(),
            vec![MountArgs {
                source: Some(PathBuf::from("/dev/sda1")),
                target: PathBuf::from("/boot"),
                fstype: None,
                flags: MsFlags::MS_RDONLY,
                data: None,
            }]
        );
        assert_eq!(host.test_executor().get_command_lines(), vec!["modprobe ext4".to_string()]);
        assert!(state.is_mounted(Path::new("/boot")));
    }

    #[test]
    fn test_mount_boot_vfat_explicit() {
        let ctx = context("");
        let host = host_with(&ctx, FilesystemType::Vfat, FilesystemType::Ext4);
        let mut state = PipelineState::default();

        Mounter::new(&ctx, &host)
            .mount_boot(&mut state, Path::new(BOOT_MOUNTPOINT), MountMode::ReadOnly)
            .unwrap();
        let mounts = host.test_syscall().get_mount_args();
        assert_eq!(mounts[0].fstype.as_deref(), Some("vfat"));
        assert_eq!(host.test_executor().get_command_lines(), vec!["modprobe vfat".to_string()]);
    }

    #[test]
    fn test_mount_boot_missing_is_fatal() {
        let ctx = context("");
        let host = Host::new(&ctx);
        let mut state = PipelineState::default();

        let err = Mounter::new(&ctx, &host)
            .mount_boot(&mut state, Path::new(BOOT_MOUNTPOINT), MountMode::ReadOnly)
            .unwrap_err();
        assert!(matches!(err, FatalError::BootNotFound));
        assert!(host.test_syscall().get_mount_args().is_empty());
    }

    #[test]
    fn test_mount_twice_is_rejected() {
        let ctx = context("");
        let host = host_with(&ctx, FilesystemType::Ext4, FilesystemType::Ext4);
        let mut state = PipelineState::default();
        let mounter = Mounter::new(&ctx, &host);

        mounter
            .mount_boot(&mut state, Path::new(BOOT_MOUNTPOINT), MountMode::ReadOnly)
            .unwrap();
        let err = mounter
            .mount_boot(&mut state, Path::new(BOOT_MOUNTPOINT), MountMode::ReadWrite)
            .unwrap_err();
        assert!(matches!(
            err,
            FatalError::Mount {
                source: MountError::AlreadyMounted { .. },
                ..
            }
        ));
        assert_eq!(host.test_syscall().get_mount_args().len(), 1);
    }

    #[test]
    fn test_mount_root_with_options() {
        let ctx = context("pmos_rootfsopts=noatime,compress=zstd");
        let host = host_with(&ctx, FilesystemType::Ext2, FilesystemType::Btrfs);
        let mut state = PipelineState::default();

        Mounter::new(&ctx, &host).mount_root(&mut state).unwrap();
        assert_eq!(
            host.test_syscall().get_mount_args(),
            vec![MountArgs {
                source: Some(PathBuf::from("/dev/sda2")),
                target: PathBuf::from("/sysroot"),
                fstype: Some("btrfs".to_string()),
                flags: MsFlags::MS_RDONLY | MsFlags::MS_NOATIME,
                data: Some("compress=zstd".to_string()),
            }]
        );
        assert_eq!(host.test_executor().get_command_lines(), vec!["modprobe btrfs".to_string()]);
    }

    #[test]
    fn test_mount_root_unsupported_type_never_mounts() {
        for fstype in [
            FilesystemType::Vfat,
            FilesystemType::Ext3,
            FilesystemType::CryptoLuks,
            FilesystemType::from_blkid("xfs"),
        ] {
            let ctx = context("");
            let host = host_with(&ctx, FilesystemType::Ext2, fstype.clone());
            let mut state = PipelineState::default();

            let err = Mounter::new(&ctx, &host).mount_root(&mut state).unwrap_err();
            assert!(matches!(err, FatalError::UnsupportedRootFilesystem { .. }));
            assert!(host.test_syscall().get_mount_args().is_empty());
            assert!(host.test_executor().get_run_args().is_empty());
        }
    }

    #[test]
    fn test_mount_root_requires_marker() {
        let ctx = context("");
        let host = Host::new(&ctx);
        host.test_probe()
            .add_device(BlockDevice::new("/dev/sda2", FilesystemType::Ext4).with_label(LABEL_ROOT));
        let mut state = PipelineState::default();

        let err = Mounter::new(&ctx, &host).mount_root(&mut state).unwrap_err();
        assert!(matches!(err, FatalError::MissingRootContent { .. }));
    }

    #[test]
    fn test_mount_root_failure_is_fatal() {
        let ctx = context("");
        let host = host_with(&ctx, FilesystemType::Ext2, FilesystemType::Ext4);
        host.test_syscall().set_ret_err(ArgName::Mount, injected_error);
        let mut state = PipelineState::default();

        let err = Mounter::new(&ctx, &host).mount_root(&mut state).unwrap_err();
        assert!(matches!(err, FatalError::Mount { .. }));
        assert!(!state.is_mounted(Path::new(SYSROOT)));
    }

    #[test]
    fn test_prepare_handoff() {
        let ctx = context("");
        let host = host_with(&ctx, FilesystemType::Ext2, FilesystemType::Ext4);
        let mut state = PipelineState::default();
        let mounter = Mounter::new(&ctx, &host);

        mounter
            .mount_boot(&mut state, Path::new(BOOT_MOUNTPOINT), MountMode::ReadOnly)
            .unwrap();
        mounter.prepare_handoff(&mut state).unwrap();

        let syscall = host.test_syscall();
        assert_eq!(syscall.get_umount_args()[0].target, PathBuf::from("/boot"));
        let mounts = syscall.get_mount_args();
        assert_eq!(mounts[1].target, PathBuf::from(HANDOFF_BOOT_MOUNTPOINT));
        assert_eq!(mounts[1].flags, MsFlags::empty());
        assert!(!state.is_mounted(Path::new("/boot")));
        assert!(state.is_mounted(Path::new(HANDOFF_BOOT_MOUNTPOINT)));
    }
}
