//! Finding the boot and root partitions.
//!
//! Both lookups re-read live system state on every call. Absence is a normal
//! answer here; callers decide whether to wait, skip or give up.

use std::path::{Path, PathBuf};

use crate::context::BootContext;
use crate::device::{BlockDevice, FilesystemType, PartitionAddress, Probe, Token};
use crate::state::PipelineState;

pub const LABEL_INSTALL: &str = "pmOS_install";
pub const LABEL_ROOT: &str = "pmOS_root";
pub const LABEL_INSTALL_BOOT: &str = "pmOS_i_boot";
pub const LABEL_INSTALL_BOOT_LEGACY: &str = "pmOS_inst_boot";
pub const LABEL_BOOT: &str = "pmOS_boot";
pub const LABEL_DELETEME: &str = "pmOS_deleteme";

const ROOT_TOKENS: [Token; 3] = [
    Token::Label(LABEL_INSTALL),
    Token::Label(LABEL_ROOT),
    Token::Type(FilesystemType::CryptoLuks),
];

const BOOT_TOKENS: [Token; 3] = [
    Token::Label(LABEL_INSTALL_BOOT),
    Token::Label(LABEL_INSTALL_BOOT_LEGACY),
    Token::Label(LABEL_BOOT),
];

pub struct Locator<'a> {
    ctx: &'a BootContext,
    probe: &'a dyn Probe,
}

impl<'a> Locator<'a> {
    pub fn new(ctx: &'a BootContext, probe: &'a dyn Probe) -> Self {
        Locator { ctx, probe }
    }

    /// Resolves the root device, or the installer partition standing in for
    /// it. Command line overrides win outright while the root is still
    /// locked; after unlocking only the label scan runs, so the decrypted
    /// mapping is found instead of the container.
    pub fn locate_root(&self, state: &mut PipelineState) -> Option<PathBuf> {
        if !state.root_unlocked && self.ctx.has_root_override() {
            let device = self.root_override()?;
            state.override_root = Some(device.clone());

            if let Some(installer) = self.pending_installer(&device) {
                tracing::debug!(?device, ?installer, "root not installed yet, using installer");
                return Some(installer);
            }
            return Some(device);
        }

        if let Some(found) = self.scan(&self.probe.mapper_devices(), &ROOT_TOKENS) {
            return Some(found);
        }
        self.scan(&self.probe.block_devices(), &ROOT_TOKENS)
    }

    pub fn locate_boot(&self) -> Option<PathBuf> {
        if let Some(uuid) = self.ctx.boot_uuid() {
            return self.find_token(&Token::Uuid(uuid.to_owned()));
        }
        if let Some(path) = self.ctx.boot_path() {
            return self.probe.exists(path).then(|| path.to_path_buf());
        }
        self.scan(&self.all_devices(), &BOOT_TOKENS)
    }

    /// First device carrying `label`, device-mapper nodes first.
    pub fn find_label(&self, label: &'static str) -> Option<PathBuf> {
        self.find_token(&Token::Label(label))
    }

    /// The device `path` points at, if the probe recognises it.
    pub fn identify(&self, path: &Path) -> Option<BlockDevice> {
        self.probe.identify(path)
    }

    fn root_override(&self) -> Option<PathBuf> {
        if let Some(uuid) = self.ctx.root_uuid() {
            return self.find_token(&Token::Uuid(uuid.to_owned()));
        }
        let path = self.ctx.root_path()?;
        self.probe.exists(path).then(|| path.to_path_buf())
    }

    /// The partition right after `device`, if it is an installer partition
    /// that has not been installed from yet.
    fn pending_installer(&self, device: &Path) -> Option<PathBuf> {
        let next = PartitionAddress::parse(device)?.next().path();
        self.probe
            .identify(&next)
            .filter(|d| d.has_label(LABEL_INSTALL))
            .map(|d| d.path)
    }

    fn find_token(&self, token: &Token) -> Option<PathBuf> {
        self.scan(&self.all_devices(), std::slice::from_ref(token))
    }

    fn all_devices(&self) -> Vec<PathBuf> {
        let mut devices = self.probe.mapper_devices();
        for device in self.probe.block_devices() {
            if !devices.contains(&device) {
                devices.push(device);
            }
        }
        devices
    }

    /// Tries `tokens` in priority order against every device; the first
    /// token with any match wins.
    fn scan(&self, paths: &[PathBuf], tokens: &[Token]) -> Option<PathBuf> {
        let identified: Vec<BlockDevice> = paths
            .iter()
            .filter_map(|path| self.probe.identify(path))
            .collect();

        tokens.iter().find_map(|token| {
            identified
                .iter()
                .find(|device| token.matches(device))
                .map(|device| {
                    tracing::trace!(%token, device = ?device.path, "matched");
                    device.path.clone()
                })
        })
    }
}
