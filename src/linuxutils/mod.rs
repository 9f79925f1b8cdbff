//! Wrappers around the Linux utilities the engine drives
//!
//! Each wrapper implements one port from [`crate::domain::ports`] on top of
//! a [`CommandRunner`](crate::domain::ports::CommandRunner).

pub mod executor;
pub mod fs;
pub mod lsblk;
pub mod lvm;
pub mod partition;

pub use executor::SystemExecutor;
pub use fs::FsHelper;
pub use lsblk::Lsblk;
pub use lvm::LvmHelper;
pub use partition::PartitionHelper;
