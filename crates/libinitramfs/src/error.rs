use std::path::PathBuf;

use crate::device::FilesystemType;
use crate::mount::MountError;
use crate::splash::TROUBLESHOOTING_URL;

/// Conditions that stop the boot. Nothing retries past one of these; the
/// caller shows the message and halts so a human can look at the device.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error("Boot partition not found")]
    BootNotFound,
    #[error("Root partition not found")]
    RootNotFound,
    #[error("unsupported '{fstype}' filesystem ({device:?})")]
    UnsupportedRootFilesystem {
        device: PathBuf,
        fstype: FilesystemType,
    },
    #[error("unable to mount {device:?} on {target:?}")]
    Mount {
        device: PathBuf,
        target: PathBuf,
        #[source]
        source: MountError,
    },
    #[error("unable to mount root partition, {marker:?} is missing")]
    MissingRootContent { marker: PathBuf },
    #[error("waiting for the root partition was cancelled")]
    Cancelled,
}

impl FatalError {
    /// Text for the splash screen: the error plus where to get help.
    pub fn splash_message(&self) -> String {
        format!("ERROR: {}\n{}", self, TROUBLESHOOTING_URL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splash_message() {
        let err = FatalError::UnsupportedRootFilesystem {
            device: PathBuf::from("/dev/sda2"),
            fstype: FilesystemType::Vfat,
        };
        assert_eq!(
            err.splash_message(),
            "ERROR: unsupported 'vfat' filesystem (\"/dev/sda2\")\nhttps://postmarketos.org/troubleshooting"
        );
        assert!(FatalError::BootNotFound
            .splash_message()
            .starts_with("ERROR: Boot partition not found\n"));
    }
}
