//! Making partitions nested inside other partitions addressable.
//!
//! Two layouts are handled: Android style super partitions, whose logical
//! slots are mapped by `make-dynpart-mappings`, and a whole disk image
//! (boot plus root) written into a single partition, mapped with kpartx.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::context::BootContext;
use crate::host::Host;
use crate::locate::Locator;
use crate::poll::{poll_until, PollError};

const DYNPART_TOOL: &str = "make-dynpart-mappings";
const KPARTX: &str = "kpartx";

const WAIT_BUDGET: Duration = Duration::from_secs(10);
const WAIT_INTERVAL: Duration = Duration::from_millis(100);

/// An embedded image carries exactly a boot and a root partition.
const EMBEDDED_PARTITIONS: usize = 2;

const PARTLABEL_DIR: &str = "/dev/disk/by-partlabel";
const USERDATA: &str = "/dev/disk/by-partlabel/userdata";
const MAPPER_DIR: &str = "/dev/mapper";
const SYSTEM_PREFIX: &str = "system";

pub struct Subpartitions<'a> {
    ctx: &'a BootContext,
    host: &'a Host,
}

impl<'a> Subpartitions<'a> {
    pub fn new(ctx: &'a BootContext, host: &'a Host) -> Self {
        Subpartitions { ctx, host }
    }

    /// Maps the logical partitions of every configured super partition,
    /// numbering slots from 0 in configuration order. All super partitions
    /// share one wait budget.
    pub fn setup_dynamic_partitions(&self) {
        let supers = self.ctx.super_partitions();
        if supers.is_empty() {
            return;
        }
        if !self.host.executor.available(DYNPART_TOOL) {
            tracing::info!("{} not installed, skipping dynamic partitions", DYNPART_TOOL);
            return;
        }

        let clock = self.host.clock.as_ref();
        let start = clock.now();
        for (slot, super_partition) in supers.iter().enumerate() {
            let remaining = WAIT_BUDGET.saturating_sub(clock.now().saturating_sub(start));
            let appeared = poll_until(clock, remaining, WAIT_INTERVAL, || {
                self.host
                    .probe
                    .is_block_device(super_partition)
                    .then_some(())
            });
            if let Err(err) = appeared {
                tracing::warn!(?super_partition, %err, "super partition did not show up");
                return;
            }

            let slot = slot.to_string();
            let path = super_partition.to_string_lossy();
            match self.host.executor.run(DYNPART_TOOL, &[&path, &slot]) {
                Ok(output) if output.success() => {
                    tracing::info!(?super_partition, %slot, "mapped dynamic partitions")
                }
                Ok(output) => {
                    tracing::warn!(?super_partition, code = ?output.code, stderr = output.stderr.trim(), "failed to map dynamic partitions")
                }
                Err(err) => tracing::warn!(%err, "failed to map dynamic partitions"),
            }
        }
    }

    /// Looks for a partition holding an embedded image and maps its
    /// partitions, until a boot partition becomes visible. A candidate whose
    /// mapping does not reveal a boot partition is unmapped again. Returns
    /// the disk that was kept mapped.
    pub fn mount_subpartitions(&self) -> Option<PathBuf> {
        let locator = Locator::new(self.ctx, self.host.probe.as_ref());
        let result = poll_until(self.host.clock.as_ref(), WAIT_BUDGET, WAIT_INTERVAL, || {
            self.candidates()
                .into_iter()
                .find(|candidate| self.try_candidate(candidate, &locator))
        });

        match result {
            Ok(disk) => {
                tracing::info!(?disk, "mapped subpartitions");
                Some(disk)
            }
            Err(PollError::Timeout { elapsed }) => {
                tracing::error!(?elapsed, "failed to find subpartitions with a boot partition");
                None
            }
            Err(PollError::Cancelled) => None,
        }
    }

    fn try_candidate(&self, candidate: &Path, locator: &Locator) -> bool {
        if self.embedded_partition_count(candidate) != EMBEDDED_PARTITIONS {
            return false;
        }

        let path = candidate.to_string_lossy();
        tracing::debug!(?candidate, "mapping embedded partitions");
        if let Err(err) = self.host.executor.run(KPARTX, &["-afs", &path]) {
            tracing::warn!(%err, "failed to map embedded partitions");
            return false;
        }
        if locator.locate_boot().is_some() {
            return true;
        }

        tracing::debug!(?candidate, "no boot partition inside, unmapping");
        if let Err(err) = self.host.executor.run(KPARTX, &["-d", &path]) {
            tracing::warn!(%err, "failed to unmap embedded partitions");
        }
        false
    }

    fn embedded_partition_count(&self, candidate: &Path) -> usize {
        let path = candidate.to_string_lossy();
        match self.host.executor.run(KPARTX, &["-l", &path]) {
            Ok(output) if output.success() => output
                .stdout
                .lines()
                .filter(|line| !line.trim().is_empty())
                .count(),
            _ => 0,
        }
    }

    /// Well-known Android partitions first, then every disk the kernel
    /// keeps statistics for, except loop and ram devices.
    fn candidates(&self) -> Vec<PathBuf> {
        let probe = self.host.probe.as_ref();
        let mut candidates = Vec::new();

        let userdata = Path::new(USERDATA);
        if probe.exists(userdata) {
            candidates.push(userdata.to_path_buf());
        }
        for dir in [PARTLABEL_DIR, MAPPER_DIR] {
            candidates.extend(probe.list_dir(Path::new(dir)).into_iter().filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |n| n.starts_with(SYSTEM_PREFIX))
            }));
        }

        candidates.extend(
            probe
                .disk_stat_names()
                .into_iter()
                .filter(|name| !name.contains("loop") && !name.contains("ram"))
                .map(|name| Path::new("/dev").join(name)),
        );
        candidates
    }
}
