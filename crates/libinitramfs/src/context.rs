//! Boot context: the kernel command line plus the static device description.
//!
//! Both are read once when the pipeline starts and never change afterwards.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const PROC_CMDLINE: &str = "/proc/cmdline";
pub const DEVICEINFO: &str = "/etc/deviceinfo";

const DEVICEINFO_PREFIX: &str = "deviceinfo_";

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("failed to read {path:?}: {err}")]
    Read { path: PathBuf, err: std::io::Error },
}

type Result<T> = std::result::Result<T, ContextError>;

/// Parsed kernel command line. `key=value` tokens keep their last value,
/// bare tokens are presence flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelCmdline {
    values: HashMap<String, String>,
    flags: HashSet<String>,
}

impl KernelCmdline {
    pub fn parse(content: &str) -> Self {
        let mut cmdline = KernelCmdline::default();
        for token in content.split_whitespace() {
            match token.split_once('=') {
                Some((key, value)) => {
                    cmdline.values.insert(key.to_owned(), value.to_owned());
                }
                None => {
                    cmdline.flags.insert(token.to_owned());
                }
            }
        }
        cmdline
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|v| v.as_str())
            .filter(|v| !v.is_empty())
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }
}

/// Static key/value record describing the device, with the `deviceinfo_`
/// prefix stripped from its keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    values: HashMap<String, String>,
}

impl DeviceInfo {
    pub fn parse(content: &str) -> Self {
        let values = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| {
                let key = key.trim();
                let key = key.strip_prefix(DEVICEINFO_PREFIX).unwrap_or(key);
                (key.to_owned(), unquote(value.trim()).to_owned())
            })
            .collect();

        DeviceInfo { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|v| v.as_str())
            .filter(|v| !v.is_empty())
    }

    pub fn is_true(&self, key: &str) -> bool {
        self.get(key) == Some("true")
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[derive(Debug, Clone, Default)]
pub struct BootContext {
    cmdline: KernelCmdline,
    deviceinfo: DeviceInfo,
}

impl BootContext {
    pub fn new(cmdline: KernelCmdline, deviceinfo: DeviceInfo) -> Self {
        BootContext {
            cmdline,
            deviceinfo,
        }
    }

    /// Reads the command line (required) and the device description
    /// (optional; a missing file yields an empty record).
    pub fn load(cmdline_path: &Path, deviceinfo_path: &Path) -> Result<Self> {
        let cmdline = fs::read_to_string(cmdline_path).map_err(|err| ContextError::Read {
            path: cmdline_path.to_path_buf(),
            err,
        })?;

        let deviceinfo = match fs::read_to_string(deviceinfo_path) {
            Ok(content) => DeviceInfo::parse(&content),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::warn!(path = ?deviceinfo_path, "no device description, using defaults");
                DeviceInfo::default()
            }
            Err(err) => {
                return Err(ContextError::Read {
                    path: deviceinfo_path.to_path_buf(),
                    err,
                })
            }
        };

        tracing::debug!(cmdline = cmdline.trim(), "loaded boot context");
        Ok(BootContext::new(KernelCmdline::parse(&cmdline), deviceinfo))
    }

    pub fn cmdline(&self) -> &KernelCmdline {
        &self.cmdline
    }

    pub fn deviceinfo(&self) -> &DeviceInfo {
        &self.deviceinfo
    }

    pub fn root_uuid(&self) -> Option<&str> {
        self.cmdline.get("pmos_root_uuid")
    }

    pub fn root_path(&self) -> Option<&Path> {
        self.cmdline.get("pmos_root").map(Path::new)
    }

    pub fn boot_uuid(&self) -> Option<&str> {
        self.cmdline.get("pmos_boot_uuid")
    }

    pub fn boot_path(&self) -> Option<&Path> {
        self.cmdline.get("pmos_boot").map(Path::new)
    }

    /// Whether the command line names the root device explicitly.
    pub fn has_root_override(&self) -> bool {
        self.root_uuid().is_some() || self.root_path().is_some()
    }

    pub fn rootfs_opts(&self) -> Option<&str> {
        self.cmdline.get("pmos_rootfsopts")
    }

    pub fn force_partition_resize(&self) -> bool {
        self.cmdline.has_flag("PMOS_FORCE_PARTITION_RESIZE")
    }

    pub fn no_splash(&self) -> bool {
        self.cmdline.has_flag("PMOS_NOSPLASH")
    }

    pub fn no_output_redirect(&self) -> bool {
        self.cmdline.has_flag("PMOS_NO_OUTPUT_REDIRECT")
    }

    /// Devices with an extra leading kernel partition keep root at index 3.
    pub fn cgpt_kpart(&self) -> bool {
        self.deviceinfo.get("cgpt_kpart").is_some()
    }

    pub fn super_partitions(&self) -> Vec<PathBuf> {
        self.deviceinfo
            .get("super_partitions")
            .map(|v| v.split_whitespace().map(PathBuf::from).collect())
            .unwrap_or_default()
    }

    pub fn disable_dhcpd(&self) -> bool {
        self.deviceinfo.is_true("disable_dhcpd")
    }

    pub fn no_framebuffer(&self) -> bool {
        self.deviceinfo.is_true("no_framebuffer")
    }
}
