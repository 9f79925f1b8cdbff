//! Custom Resource Definitions read by the provisioning engine
//!
//! - Drive: a physical drive on a node
//! - LogicalVolumeGroup: a volume group built from drives

pub mod drive;
pub mod lvg;

pub use drive::*;
pub use lvg::*;
