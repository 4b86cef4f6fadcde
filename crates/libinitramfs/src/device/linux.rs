//! Implements Probe trait for Linux systems
use std::any::Any;
use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use super::probe::ProbeError;
use super::{BlockDevice, FilesystemType, Probe, MAPPER_DIR};
use crate::executor::linux::LinuxExecutor;
use crate::executor::Executor;

const SYS_CLASS_BLOCK: &str = "/sys/class/block";

#[derive(Clone)]
pub struct LinuxProbe;

impl LinuxProbe {
    fn blkid(&self, device: &Path) -> Result<BlockDevice, ProbeError> {
        let path = device.to_string_lossy();
        let output = LinuxExecutor.run("blkid", &["-p", "-o", "export", &path])?;
        // blkid exits with 2 when it could not identify anything
        match output.code {
            Some(0) => {}
            Some(2) => {
                return Err(ProbeError::NoSignature {
                    device: device.to_path_buf(),
                })
            }
            code => {
                return Err(ProbeError::Blkid {
                    device: device.to_path_buf(),
                    code,
                })
            }
        }

        parse_blkid_export(device, &output.stdout).ok_or_else(|| ProbeError::NoSignature {
            device: device.to_path_buf(),
        })
    }

    fn sorted_entries(dir: &Path) -> Vec<PathBuf> {
        let mut entries: Vec<PathBuf> = match fs::read_dir(dir) {
            Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(err) => {
                tracing::trace!(?dir, ?err, "cannot list directory");
                Vec::new()
            }
        };
        entries.sort();
        entries
    }
}

/// Builds a `BlockDevice` from `blkid -o export` output. Returns `None`
/// when the output carries no `TYPE`.
pub(crate) fn parse_blkid_export(device: &Path, output: &str) -> Option<BlockDevice> {
    let mut fstype = None;
    let mut label = None;
    let mut uuid = None;

    for line in output.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key.trim() {
            "TYPE" => fstype = Some(FilesystemType::from_blkid(value.trim())),
            "LABEL" => label = Some(value.trim().to_owned()),
            "UUID" => uuid = Some(value.trim().to_owned()),
            _ => {}
        }
    }

    let mut found = BlockDevice::new(device, fstype?);
    found.label = label;
    found.uuid = uuid;
    Some(found)
}

impl Probe for LinuxProbe {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn identify(&self, device: &Path) -> Option<BlockDevice> {
        match self.blkid(device) {
            Ok(found) => Some(found),
            Err(err) => {
                tracing::trace!(?device, %err, "could not identify device");
                None
            }
        }
    }

    fn block_devices(&self) -> Vec<PathBuf> {
        Self::sorted_entries(Path::new(SYS_CLASS_BLOCK))
            .into_iter()
            .filter_map(|entry| entry.file_name().map(|n| Path::new("/dev").join(n)))
            .collect()
    }

    fn mapper_devices(&self) -> Vec<PathBuf> {
        let mapped = Self::sorted_entries(Path::new(MAPPER_DIR))
            .into_iter()
            .filter(|p| p.file_name().map_or(false, |n| n != "control"));
        let dm = Self::sorted_entries(Path::new("/dev")).into_iter().filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.starts_with("dm-"))
        });
        mapped.chain(dm).collect()
    }

    fn is_block_device(&self, path: &Path) -> bool {
        fs::metadata(path)
            .map(|m| m.file_type().is_block_device())
            .unwrap_or(false)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn list_dir(&self, dir: &Path) -> Vec<PathBuf> {
        Self::sorted_entries(dir)
    }

    fn disk_stat_names(&self) -> Vec<String> {
        match procfs::diskstats() {
            Ok(stats) => stats.into_iter().map(|s| s.name).collect(),
            Err(err) => {
                tracing::warn!(?err, "failed to read disk statistics");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_blkid_export() {
        let output = "DEVNAME=/dev/mmcblk0p2\nLABEL=pmOS_root\nUUID=0c4a-77\nBLOCK_SIZE=4096\nTYPE=ext4\n";
        let device = parse_blkid_export(Path::new("/dev/mmcblk0p2"), output).unwrap();
        assert_eq!(device.fstype, FilesystemType::Ext4);
        assert_eq!(device.label.as_deref(), Some("pmOS_root"));
        assert_eq!(device.uuid.as_deref(), Some("0c4a-77"));
        assert_eq!(device.path, PathBuf::from("/dev/mmcblk0p2"));
    }

    #[test]
    fn test_parse_blkid_export_luks() {
        let output = "DEVNAME=/dev/sda2\nUUID=f00\nVERSION=2\nTYPE=crypto_LUKS\nPART_ENTRY_NUMBER=2\n";
        let device = parse_blkid_export(Path::new("/dev/sda2"), output).unwrap();
        assert!(device.is_luks());
        assert_eq!(device.label, None);
    }

    #[test]
    fn test_parse_blkid_export_without_type() {
        let output = "DEVNAME=/dev/sda\nPTTYPE=gpt\n";
        assert!(parse_blkid_export(Path::new("/dev/sda"), output).is_none());
    }
}
