//! One-shot early setup around the pipeline: kernel filesystems, the
//! firmware search path and the DHCP helper for USB networking.

use std::path::Path;

use nix::mount::MsFlags;

use crate::context::BootContext;
use crate::executor::Executor;
use crate::syscall::Syscall;

const FIRMWARE_PATH_PARAM: &str = "/sys/module/firmware_class/parameters/path";
const FIRMWARE_DIR: &str = "/lib/firmware/postmarketos";

const DHCPD: &str = "unudhcpd";
const HOST_IP: &str = "172.16.42.1";
const CLIENT_IP: &str = "172.16.42.2";
const USB_INTERFACES: [&str; 3] = ["rndis0", "usb0", "eth0"];
const SYS_CLASS_NET: &str = "/sys/class/net";

struct PseudoMount {
    source: &'static str,
    target: &'static str,
    fstype: &'static str,
    flags: MsFlags,
    data: Option<&'static str>,
}

fn pseudo_mounts() -> [PseudoMount; 5] {
    let hardened = MsFlags::MS_NODEV | MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID;
    [
        PseudoMount {
            source: "proc",
            target: "/proc",
            fstype: "proc",
            flags: hardened,
            data: None,
        },
        PseudoMount {
            source: "sysfs",
            target: "/sys",
            fstype: "sysfs",
            flags: hardened,
            data: None,
        },
        PseudoMount {
            source: "dev",
            target: "/dev",
            fstype: "devtmpfs",
            flags: MsFlags::MS_NOSUID,
            data: Some("mode=0755"),
        },
        PseudoMount {
            source: "devpts",
            target: "/dev/pts",
            fstype: "devpts",
            flags: MsFlags::empty(),
            data: None,
        },
        PseudoMount {
            source: "run",
            target: "/run",
            fstype: "tmpfs",
            flags: MsFlags::MS_NODEV | MsFlags::MS_NOSUID,
            data: Some("mode=0755"),
        },
    ]
}

/// Mounts /proc, /sys, /dev, /dev/pts and /run, plus /config when the
/// kernel has configfs. Failures are logged and the boot carries on.
pub fn mount_pseudo_filesystems(syscall: &dyn Syscall) {
    for m in pseudo_mounts() {
        let target = Path::new(m.target);
        let result = syscall.create_dir_all(target).and_then(|_| {
            syscall.mount(
                Some(Path::new(m.source)),
                target,
                Some(m.fstype),
                m.flags,
                m.data,
            )
        });
        if let Err(err) = result {
            tracing::warn!(mountpoint = m.target, %err, "couldn't mount pseudo filesystem");
        }
    }

    if syscall.exists(Path::new("/sys/kernel/config")) {
        let target = Path::new("/config");
        let result = syscall.create_dir_all(target).and_then(|_| {
            syscall.mount(
                Some(Path::new("configfs")),
                target,
                Some("configfs"),
                MsFlags::MS_NODEV | MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID,
                None,
            )
        });
        if let Err(err) = result {
            tracing::warn!(%err, "couldn't mount /config");
        }
    }
}

/// Loads a kernel module. A failure is only logged: the driver may be
/// built into the kernel.
pub fn load_module(executor: &dyn Executor, module: &str) {
    match executor.run("modprobe", &[module]) {
        Ok(output) if output.success() => {}
        Ok(output) => {
            tracing::debug!(module, code = ?output.code, "modprobe failed, module may be built in")
        }
        Err(err) => tracing::warn!(module, %err, "cannot run modprobe"),
    }
}

pub fn setup_firmware_path(syscall: &dyn Syscall) {
    if let Err(err) = syscall.write_file(Path::new(FIRMWARE_PATH_PARAM), FIRMWARE_DIR) {
        tracing::warn!(%err, "failed to set the firmware search path");
    }
}

/// Starts the DHCP helper on the first USB network interface that can be
/// given the host address. Never starts a second copy.
pub fn start_dhcpd(ctx: &BootContext, syscall: &dyn Syscall, executor: &dyn Executor) {
    if executor.is_running(DHCPD) {
        return;
    }
    if ctx.disable_dhcpd() {
        tracing::info!("dhcpd disabled by deviceinfo");
        return;
    }

    let interface = USB_INTERFACES.iter().copied().find(|&iface| {
        syscall.exists(&Path::new(SYS_CLASS_NET).join(iface))
            && executor
                .run("ifconfig", &[iface, HOST_IP])
                .map(|o| o.success())
                .unwrap_or(false)
    });
    let Some(interface) = interface else {
        tracing::warn!("no usb network interface, not starting {}", DHCPD);
        return;
    };

    tracing::info!(interface, server = HOST_IP, client = CLIENT_IP, "starting {}", DHCPD);
    if let Err(err) = executor.spawn(DHCPD, &["-i", interface, "-s", HOST_IP, "-c", CLIENT_IP]) {
        tracing::warn!(%err, "failed to start {}", DHCPD);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{DeviceInfo, KernelCmdline};
    use crate::executor::test::TestHelperExecutor;
    use crate::executor::CommandOutput;
    use crate::syscall::test::{injected_error, ArgName, TestHelperSyscall};
    use std::path::PathBuf;

    fn context(deviceinfo: &str) -> BootContext {
        BootContext::new(KernelCmdline::default(), DeviceInfo::parse(deviceinfo))
    }

    #[test]
    fn test_mount_pseudo_filesystems() {
        let syscall = TestHelperSyscall::default();
        mount_pseudo_filesystems(&syscall);

        let targets: Vec<PathBuf> = syscall
            .get_mount_args()
            .into_iter()
            .map(|m| m.target)
            .collect();
        assert_eq!(
            targets,
            ["/proc", "/sys", "/dev", "/dev/pts", "/run"]
                .iter()
                .map(PathBuf::from)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_mount_pseudo_filesystems_with_configfs() {
        let syscall = TestHelperSyscall::default();
        syscall.set_exists("/sys/kernel/config");
        mount_pseudo_filesystems(&syscall);

        let mounts = syscall.get_mount_args();
        assert_eq!(mounts.len(), 6);
        assert_eq!(mounts[5].fstype.as_deref(), Some("configfs"));
    }

    #[test]
    fn test_pseudo_filesystem_failure_is_not_fatal() {
        let syscall = TestHelperSyscall::default();
        syscall.set_ret_err(ArgName::Mount, injected_error);
        mount_pseudo_filesystems(&syscall);
        // the failed /proc mount is not recorded, the rest are
        assert_eq!(syscall.get_mount_args().len(), 4);
    }

    #[test]
    fn test_load_module_failure_is_not_an_error() {
        let executor = TestHelperExecutor::default();
        executor.set_response("modprobe btrfs", CommandOutput::failed(1, "not found"));

        load_module(&executor, "btrfs");
        load_module(&executor, "vfat");
        assert_eq!(
            executor.get_command_lines(),
            vec!["modprobe btrfs".to_string(), "modprobe vfat".to_string()]
        );
    }

    #[test]
    fn test_setup_firmware_path() {
        let syscall = TestHelperSyscall::default();
        setup_firmware_path(&syscall);
        assert_eq!(
            syscall.get_write_file_args(),
            vec![(PathBuf::from(FIRMWARE_PATH_PARAM), FIRMWARE_DIR.to_string())]
        );
    }

    #[test]
    fn test_start_dhcpd_on_first_working_interface() {
        let ctx = context("");
        let syscall = TestHelperSyscall::default();
        syscall.set_exists("/sys/class/net/usb0");
        syscall.set_exists("/sys/class/net/eth0");
        let executor = TestHelperExecutor::default();
        executor.set_response("ifconfig usb0 172.16.42.1", CommandOutput::failed(1, ""));

        start_dhcpd(&ctx, &syscall, &executor);
        assert_eq!(
            executor.get_spawn_args()[0].command_line(),
            "unudhcpd -i eth0 -s 172.16.42.1 -c 172.16.42.2"
        );

        start_dhcpd(&ctx, &syscall, &executor);
        assert_eq!(executor.get_spawn_args().len(), 1);
    }

    #[test]
    fn test_start_dhcpd_disabled() {
        let ctx = context(r#"deviceinfo_disable_dhcpd="true""#);
        let syscall = TestHelperSyscall::default();
        syscall.set_exists("/sys/class/net/usb0");
        let executor = TestHelperExecutor::default();

        start_dhcpd(&ctx, &syscall, &executor);
        assert!(executor.get_spawn_args().is_empty());
        assert!(executor.get_run_args().is_empty());
    }

    #[test]
    fn test_start_dhcpd_without_interface() {
        let ctx = context("");
        let syscall = TestHelperSyscall::default();
        let executor = TestHelperExecutor::default();

        start_dhcpd(&ctx, &syscall, &executor);
        assert!(executor.get_spawn_args().is_empty());
    }
}
