use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Mutable facts the pipeline stages establish about the root filesystem.
/// Created when the pipeline starts and dropped at handoff.
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    /// The decrypted root mapping is active. Once set, the root device is
    /// only ever looked up by label.
    pub root_unlocked: bool,
    /// The root partition was grown and its filesystem needs to follow.
    pub root_resized: bool,
    /// Root device resolved from a command line override.
    pub override_root: Option<PathBuf>,
    mounted: HashSet<PathBuf>,
}

impl PipelineState {
    pub fn is_mounted(&self, target: &Path) -> bool {
        self.mounted.contains(target)
    }

    /// Returns `false` if `target` was already recorded.
    pub fn record_mount(&mut self, target: &Path) -> bool {
        self.mounted.insert(target.to_path_buf())
    }

    pub fn forget_mount(&mut self, target: &Path) -> bool {
        self.mounted.remove(target)
    }
}
