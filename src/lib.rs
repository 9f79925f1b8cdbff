//! Volume Engine - node-local volume provisioning
//!
//! Turns a whole drive or a logical volume group into a filesystem-bearing
//! volume that can be mounted for a workload, and tears it down again.
//! Every operation can be repeated safely: existing state that matches the
//! request is accepted, state that contradicts it is reported as a conflict.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   Provisioners (selection)                   │
//! │   ┌──────────────────────┐      ┌──────────────────────┐     │
//! │   │   DriveProvisioner   │      │    LvmProvisioner    │     │
//! │   └──────────┬───────────┘      └──────────┬───────────┘     │
//! │    PartitionOperations   FsOperations      │                 │
//! ├──────────────┼──────────────────┼──────────┼─────────────────┤
//! │   PartitionHelper   Lsblk    FsHelper   LvmHelper            │
//! │                     (linuxutils)                             │
//! ├──────────────────────────────────────────────────────────────┤
//! │   SystemExecutor (tokio::process)   KubeRepository (kube)    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`provisioners`]: drive and LVM provisioners, partition and filesystem operations
//! - [`linuxutils`]: wrappers around sgdisk, partprobe, lsblk, mkfs, mount and lvm
//! - [`domain`]: data model and the traits between the layers
//! - [`crd`]: Drive and LogicalVolumeGroup custom resources
//! - [`repository`]: kube-backed lookup of those resources
//! - [`config`]: engine settings
//! - [`error`]: Error types and handling

pub mod config;
pub mod crd;
pub mod domain;
pub mod error;
pub mod linuxutils;
pub mod metrics;
pub mod provisioners;
pub mod repository;

#[cfg(test)]
pub mod testing;

// Re-export commonly used types
pub use config::EngineConfig;

pub use crd::{Drive, DriveSpec, LogicalVolumeGroup, LogicalVolumeGroupSpec};

pub use domain::ports::{
    DriveInfo, FileSystem, Provisioner, ProvisionerKind, StorageClass, Volume, VolumeGroupInfo,
    VolumeMode,
};

pub use error::{Error, ErrorAction, ErrorKind, Result};

pub use provisioners::{
    DeviceLayout, DriveProvisioner, FsOperations, LvmProvisioner, Partition, PartitionOperations,
    Provisioners, SelectedProvisioner, VolumeGroupOperations,
};

pub use repository::KubeRepository;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
