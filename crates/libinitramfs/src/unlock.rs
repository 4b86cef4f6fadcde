use std::path::Path;
use std::time::Duration;

use crate::context::BootContext;
use crate::host::Host;
use crate::locate::Locator;
use crate::poll::{CancelToken, PollError};
use crate::state::PipelineState;

const CRYPTSETUP: &str = "cryptsetup";
const UNLOCK_HELPER: &str = "fde-unlock";
pub const ROOT_MAPPING: &str = "root";

const RETRY_INTERVAL: Duration = Duration::from_secs(1);

pub struct Unlocker<'a> {
    ctx: &'a BootContext,
    host: &'a Host,
}

impl<'a> Unlocker<'a> {
    pub fn new(ctx: &'a BootContext, host: &'a Host) -> Self {
        Unlocker { ctx, host }
    }

    /// Opens an encrypted root. Anything that is not a LUKS container is
    /// left alone without running a single helper. Attempts repeat until
    /// the `root` mapping is active; only `cancel` stops them.
    pub fn unlock_root(
        &self,
        state: &mut PipelineState,
        cancel: &CancelToken,
    ) -> Result<(), PollError> {
        let locator = Locator::new(self.ctx, self.host.probe.as_ref());
        let Some(root) = locator.locate_root(state) else {
            return Ok(());
        };
        match locator.identify(&root) {
            Some(device) if device.is_luks() => {}
            _ => return Ok(()),
        }
        if !self.host.executor.available(CRYPTSETUP) {
            tracing::warn!(?root, "{} not installed, cannot unlock", CRYPTSETUP);
            return Ok(());
        }
        if !self.is_luks(&root) {
            tracing::warn!(?root, "probe reported LUKS but cryptsetup disagrees");
            return Ok(());
        }
        if !self.host.executor.available(UNLOCK_HELPER) {
            tracing::error!(?root, "{} not installed, cannot unlock", UNLOCK_HELPER);
            return Ok(());
        }

        // The unlock prompt needs the screen to itself
        self.host.splash.hide();

        let device = root.to_string_lossy();
        let mut attempt: u32 = 0;
        while !self.mapping_active() {
            if cancel.is_cancelled() {
                return Err(PollError::Cancelled);
            }
            tracing::info!(?root, attempt, "asking for the root passphrase");
            let tries = attempt.to_string();
            let succeeded = match self
                .host
                .executor
                .run_interactive(UNLOCK_HELPER, &[&device, &tries])
            {
                Ok(Some(0)) => true,
                Ok(code) => {
                    tracing::debug!(?code, attempt, "unlock attempt failed");
                    false
                }
                Err(err) => {
                    tracing::warn!(%err, "unlock helper failed to run");
                    false
                }
            };
            attempt += 1;
            if !succeeded {
                self.host.clock.sleep(RETRY_INTERVAL);
            }
        }

        tracing::info!(?root, attempt, "root unlocked");
        state.root_unlocked = true;
        self.host.splash.show("Loading...");
        Ok(())
    }

    fn is_luks(&self, device: &Path) -> bool {
        let path = device.to_string_lossy();
        self.host
            .executor
            .run(CRYPTSETUP, &["isLuks", &path])
            .map(|output| output.success())
            .unwrap_or(false)
    }

    fn mapping_active(&self) -> bool {
        match self.host.executor.run(CRYPTSETUP, &["status", ROOT_MAPPING]) {
            Ok(output) => has_word(&output.stdout, "active"),
            Err(err) => {
                tracing::warn!(%err, "cannot query the root mapping");
                false
            }
        }
    }
}

/// Case-insensitive whole-word search, so "inactive" does not count.
fn has_word(text: &str, word: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .any(|w| w.eq_ignore_ascii_case(word))
}
