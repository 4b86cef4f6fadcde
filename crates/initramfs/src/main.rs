//! # initramfs
//! Early-boot init that finds, unlocks, grows and mounts the root
//! filesystem, then leaves `/sysroot` ready for the switch to the real init.
mod observability;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use libinitramfs::context::{BootContext, DEVICEINFO, PROC_CMDLINE};
use libinitramfs::hooks::HOOKS_DIR;
use libinitramfs::host::Host;
use libinitramfs::pipeline::{halt, Pipeline};
use libinitramfs::setup::mount_pseudo_filesystems;
use libinitramfs::syscall::syscall::create_syscall;

/// Where logs go unless the kernel command line keeps them on the console.
const DEFAULT_LOG_FILE: &str = "/pmOS_init.log";

#[derive(Parser, Debug)]
#[clap(version, author = env!("CARGO_PKG_AUTHORS"))]
struct Opts {
    /// Kernel command line to read the boot options from
    #[clap(long, default_value = PROC_CMDLINE)]
    cmdline: PathBuf,
    /// Device description record
    #[clap(long, default_value = DEVICEINFO)]
    deviceinfo: PathBuf,
    /// Directory of hook scripts run before looking for root
    #[clap(long, default_value = HOOKS_DIR)]
    hooks: PathBuf,
    /// Do not mount /proc, /sys, /dev and /run, they are already there
    #[clap(long)]
    skip_pseudo_fs: bool,
    /// Set the log file to write logs to (default is stderr when the kernel
    /// command line has PMOS_NO_OUTPUT_REDIRECT, /pmOS_init.log otherwise)
    #[clap(long)]
    log: Option<PathBuf>,
    /// Set the log format ("text" (default), or "json")
    #[clap(long)]
    log_format: Option<String>,
    /// Set the log level (default is 'debug' in debug builds, 'info' otherwise)
    #[clap(long)]
    log_level: Option<String>,
    /// Enable debug logging
    #[clap(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    // The command line lives in /proc, so kernel filesystems come first
    if !opts.skip_pseudo_fs {
        mount_pseudo_filesystems(create_syscall().as_ref());
    }

    let context = BootContext::load(&opts.cmdline, &opts.deviceinfo);

    let mut config = observability::ObservabilityConfig::from(&opts);
    if config.log_file.is_none() {
        let keep_console = context
            .as_ref()
            .map(|ctx| ctx.no_output_redirect())
            .unwrap_or(true);
        if !keep_console {
            config.log_file = Some(PathBuf::from(DEFAULT_LOG_FILE));
        }
    }
    if let Err(e) = observability::init(config) {
        eprintln!("log init failed: {:?}", e);
    }

    let ctx = context.unwrap_or_else(|err| {
        tracing::error!(%err, "failed to load boot context, continuing with defaults");
        BootContext::default()
    });
    tracing::debug!(args = ?std::env::args_os(), "started");

    let host = Host::new(&ctx);
    match Pipeline::new(&ctx, &host).with_hooks_dir(opts.hooks).run() {
        Ok(state) => {
            tracing::info!(resized = state.root_resized, unlocked = state.root_unlocked, "root acquired");
            Ok(())
        }
        Err(err) => halt(&host, &err),
    }
}
