//! Boot splash collaborator. The pipeline only ever hands it a message.

use std::any::Any;
use std::cell::RefCell;

use crate::context::BootContext;
use crate::executor::linux::LinuxExecutor;
use crate::executor::Executor;

const PBSPLASH: &str = "pbsplash";
const PBSPLASH_BIN: &str = "/usr/bin/pbsplash";

pub const TROUBLESHOOTING_URL: &str = "https://postmarketos.org/troubleshooting";

pub trait Splash {
    fn as_any(&self) -> &dyn Any;
    /// Replaces whatever is on screen with `message`.
    fn show(&self, message: &str);
    fn hide(&self);
}

/// Drives pbsplash: one process per message.
#[derive(Default)]
pub struct PbSplash {
    executor: LinuxExecutor,
}

impl Splash for PbSplash {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn show(&self, message: &str) {
        self.hide();
        if let Err(err) = self.executor.spawn(PBSPLASH_BIN, &["-m", message]) {
            tracing::warn!(%err, "failed to start splash");
        }
    }

    fn hide(&self) {
        self.executor.terminate(PBSPLASH);
    }
}

/// Used when the device has no framebuffer or the user asked for no splash.
pub struct NoSplash;

impl Splash for NoSplash {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn show(&self, message: &str) {
        tracing::debug!(message, "splash disabled");
    }

    fn hide(&self) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplashEvent {
    Show(String),
    Hide,
}

#[derive(Default)]
pub struct TestHelperSplash {
    events: RefCell<Vec<SplashEvent>>,
}

impl TestHelperSplash {
    pub fn get_events(&self) -> Vec<SplashEvent> {
        self.events.borrow().clone()
    }

    pub fn get_messages(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                SplashEvent::Show(message) => Some(message.clone()),
                SplashEvent::Hide => None,
            })
            .collect()
    }
}

impl Splash for TestHelperSplash {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn show(&self, message: &str) {
        self.events
            .borrow_mut()
            .push(SplashEvent::Show(message.to_owned()));
    }

    fn hide(&self) {
        self.events.borrow_mut().push(SplashEvent::Hide);
    }
}

pub fn create_splash(ctx: &BootContext) -> Box<dyn Splash> {
    if cfg!(test) {
        Box::<TestHelperSplash>::default()
    } else if ctx.no_splash() || ctx.no_framebuffer() {
        Box::new(NoSplash)
    } else {
        Box::<PbSplash>::default()
    }
}
