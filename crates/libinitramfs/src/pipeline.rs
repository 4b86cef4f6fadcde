//! Sequencing of the whole root acquisition, from kernel filesystems to a
//! mounted `/sysroot`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::context::BootContext;
use crate::error::FatalError;
use crate::hooks::{run_hooks, HOOKS_DIR};
use crate::host::Host;
use crate::locate::Locator;
use crate::mount::{MountMode, Mounter, BOOT_MOUNTPOINT};
use crate::poll::{poll_forever, CancelToken};
use crate::resize::Resizer;
use crate::setup::{setup_firmware_path, start_dhcpd};
use crate::state::PipelineState;
use crate::subpartition::Subpartitions;
use crate::unlock::Unlocker;

const ROOT_WAIT_INTERVAL: Duration = Duration::from_secs(1);
const HALT_INTERVAL: Duration = Duration::from_secs(1);

pub struct Pipeline<'a> {
    ctx: &'a BootContext,
    host: &'a Host,
    cancel: CancelToken,
    hooks_dir: PathBuf,
}

impl<'a> Pipeline<'a> {
    pub fn new(ctx: &'a BootContext, host: &'a Host) -> Self {
        Pipeline {
            ctx,
            host,
            cancel: CancelToken::default(),
            hooks_dir: PathBuf::from(HOOKS_DIR),
        }
    }

    pub fn with_hooks_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.hooks_dir = dir.into();
        self
    }

    /// Token that stops the unbounded waits (root partition, unlock).
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Runs every stage in order. Stages that only add features log their
    /// failures and let the boot continue; the returned error is always
    /// one the boot cannot recover from.
    pub fn run(&self) -> Result<PipelineState, FatalError> {
        let mut state = PipelineState::default();
        let host = self.host;

        setup_firmware_path(host.syscall.as_ref());
        host.splash.show("Loading...");

        let subpartitions = Subpartitions::new(self.ctx, host);
        subpartitions.setup_dynamic_partitions();

        if let Err(err) = run_hooks(&self.hooks_dir, host.executor.as_ref()) {
            tracing::warn!(%err, "failed to run hooks");
        }
        start_dhcpd(self.ctx, host.syscall.as_ref(), host.executor.as_ref());

        // Nested layouts only expose root once their table is mapped
        let locator = Locator::new(self.ctx, host.probe.as_ref());
        if locator.locate_boot().is_none() {
            subpartitions.mount_subpartitions();
        }

        let root = self.wait_for_root(&mut state)?;
        tracing::info!(?root, "found root partition");

        let resizer = Resizer::new(self.ctx, host);
        resizer.delete_installer_partition();
        resizer.resize_root_partition(&mut state);

        Unlocker::new(self.ctx, host)
            .unlock_root(&mut state, &self.cancel)
            .map_err(|_| FatalError::Cancelled)?;
        resizer.resize_root_filesystem(&mut state);

        let mounter = Mounter::new(self.ctx, host);
        mounter.mount_boot(&mut state, Path::new(BOOT_MOUNTPOINT), MountMode::ReadOnly)?;
        mounter.mount_root(&mut state)?;
        mounter.prepare_handoff(&mut state)?;

        tracing::info!("root filesystem ready for handoff");
        Ok(state)
    }

    /// Waits as long as it takes for a root partition to show up, e.g. for
    /// the user to insert the sdcard.
    fn wait_for_root(&self, state: &mut PipelineState) -> Result<PathBuf, FatalError> {
        let locator = Locator::new(self.ctx, self.host.probe.as_ref());
        let mut waiting = false;
        poll_forever(
            self.host.clock.as_ref(),
            ROOT_WAIT_INTERVAL,
            &self.cancel,
            || {
                let root = locator.locate_root(state);
                if root.is_none() && !waiting {
                    tracing::info!("waiting for root partition");
                    self.host.splash.show("Waiting for root partition...");
                    waiting = true;
                }
                root
            },
        )
        .map_err(|_| FatalError::Cancelled)
    }
}

/// Shows `err` and idles forever, leaving the device up for someone to
/// attach a console.
pub fn halt(host: &Host, err: &FatalError) -> ! {
    tracing::error!(%err, "boot failed, halting");
    host.splash.show(&err.splash_message());
    loop {
        host.clock.sleep(HALT_INTERVAL);
    }
}
