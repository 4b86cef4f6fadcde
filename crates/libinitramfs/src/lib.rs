//! Root filesystem acquisition for an initramfs: find the boot and root
//! partitions, map nested layouts, unlock an encrypted root, grow it into
//! free space and mount it for the real init.

pub mod context;
pub mod device;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod host;
pub mod locate;
pub mod mount;
pub mod pipeline;
pub mod poll;
pub mod resize;
pub mod setup;
pub mod splash;
pub mod state;
pub mod subpartition;
pub mod syscall;
pub mod unlock;

pub use error::FatalError;
