use crate::context::BootContext;
use crate::device::{create_probe, Probe};
use crate::executor::{create_executor, Executor};
use crate::poll::{create_clock, Clock};
use crate::splash::{create_splash, Splash};
use crate::syscall::syscall::create_syscall;
use crate::syscall::Syscall;

/// Everything the pipeline touches outside its own memory. Unit tests get
/// the recording doubles of every seam.
pub struct Host {
    pub syscall: Box<dyn Syscall>,
    pub executor: Box<dyn Executor>,
    pub probe: Box<dyn Probe>,
    pub splash: Box<dyn Splash>,
    pub clock: Box<dyn Clock>,
}

impl Host {
    pub fn new(ctx: &BootContext) -> Self {
        Host {
            syscall: create_syscall(),
            executor: create_executor(),
            probe: create_probe(),
            splash: create_splash(ctx),
            clock: create_clock(),
        }
    }
}
