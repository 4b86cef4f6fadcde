//! Block devices as the pipeline sees them.
//!
//! Nothing here is cached: every query goes back to the live system through
//! a [`Probe`], because device nodes keep appearing while early boot runs.

pub mod address;
pub mod linux;
pub mod probe;

use std::fmt;
use std::path::{Path, PathBuf};

pub use address::PartitionAddress;
pub use probe::{create_probe, Probe, ProbeType};

pub const MAPPER_DIR: &str = "/dev/mapper";
const DM_PREFIX: &str = "/dev/dm-";

/// Filesystem signature detected on a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FilesystemType {
    Ext2,
    Ext3,
    Ext4,
    Vfat,
    F2fs,
    Btrfs,
    CryptoLuks,
    /// Any other signature, or none at all (empty name).
    Unknown(String),
}

impl FilesystemType {
    pub fn from_blkid(name: &str) -> Self {
        match name {
            "ext2" => FilesystemType::Ext2,
            "ext3" => FilesystemType::Ext3,
            "ext4" => FilesystemType::Ext4,
            "vfat" => FilesystemType::Vfat,
            "f2fs" => FilesystemType::F2fs,
            "btrfs" => FilesystemType::Btrfs,
            "crypto_LUKS" => FilesystemType::CryptoLuks,
            other => FilesystemType::Unknown(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FilesystemType::Ext2 => "ext2",
            FilesystemType::Ext3 => "ext3",
            FilesystemType::Ext4 => "ext4",
            FilesystemType::Vfat => "vfat",
            FilesystemType::F2fs => "f2fs",
            FilesystemType::Btrfs => "btrfs",
            FilesystemType::CryptoLuks => "crypto_LUKS",
            FilesystemType::Unknown(name) => name,
        }
    }

    pub fn is_ext(&self) -> bool {
        matches!(
            self,
            FilesystemType::Ext2 | FilesystemType::Ext3 | FilesystemType::Ext4
        )
    }
}

impl fmt::Display for FilesystemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A device path together with what a probe found on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    pub path: PathBuf,
    pub fstype: FilesystemType,
    pub label: Option<String>,
    pub uuid: Option<String>,
}

impl BlockDevice {
    pub fn new<P: Into<PathBuf>>(path: P, fstype: FilesystemType) -> Self {
        BlockDevice {
            path: path.into(),
            fstype,
            label: None,
            uuid: None,
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_owned());
        self
    }

    pub fn with_uuid(mut self, uuid: &str) -> Self {
        self.uuid = Some(uuid.to_owned());
        self
    }

    pub fn is_luks(&self) -> bool {
        self.fstype == FilesystemType::CryptoLuks
    }

    pub fn is_device_mapper(&self) -> bool {
        is_device_mapper(&self.path)
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.label.as_deref() == Some(label)
    }
}

/// Whether `path` names a device-mapper node, i.e. something that only
/// exists because a mapping (kpartx, cryptsetup, dynamic partitions) made it.
pub fn is_device_mapper(path: &Path) -> bool {
    path.starts_with(MAPPER_DIR) || path.to_string_lossy().starts_with(DM_PREFIX)
}

/// What a discovery step is looking for on a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Label(&'static str),
    Uuid(String),
    Type(FilesystemType),
}

impl Token {
    pub fn matches(&self, device: &BlockDevice) -> bool {
        match self {
            Token::Label(label) => device.has_label(label),
            Token::Uuid(uuid) => device
                .uuid
                .as_deref()
                .map(|u| u.eq_ignore_ascii_case(uuid))
                .unwrap_or(false),
            Token::Type(fstype) => device.fstype == *fstype,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Label(label) => write!(f, "LABEL={label}"),
            Token::Uuid(uuid) => write!(f, "UUID={uuid}"),
            Token::Type(fstype) => write!(f, "TYPE={fstype}"),
        }
    }
}
