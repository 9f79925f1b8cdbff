//! Volume provisioners
//!
//! Two variants implement [`Provisioner`]: [`DriveProvisioner`] for the
//! whole-drive storage classes and [`LvmProvisioner`] for the LVM ones.
//! [`Provisioners::select`] picks the variant from the storage class alone.
//!
//! ```text
//!            Volume
//!              │ storage class
//!   ┌──────────┴───────────┐
//!   ▼                      ▼
//! DriveProvisioner     LvmProvisioner
//!   │    │    │           │     │
//!   │    │    └─ FsOperations ──┘
//!   │    └─ PartitionOperations
//!   └─ BlockDeviceLister   LvmTool
//! ```

pub mod drive;
pub mod fs_ops;
pub mod lvm;
pub mod partition_ops;
pub mod uuid;

pub use drive::DriveProvisioner;
pub use fs_ops::FsOperations;
pub use lvm::{LvmProvisioner, VolumeGroupOperations};
pub use partition_ops::{DeviceLayout, Partition, PartitionOperations};

use crate::config::EngineConfig;
use crate::domain::ports::{
    CommandRunnerRef, ProvisionerKind, Provisioner, ResourceRepositoryRef, StorageClass, Volume,
};
use crate::error::Result;
use crate::linuxutils::{FsHelper, Lsblk, LvmHelper, PartitionHelper};
use async_trait::async_trait;
use std::sync::Arc;

/// Provisioner chosen for one storage class
#[derive(Clone, Copy)]
pub enum SelectedProvisioner<'a> {
    DriveBased(&'a DriveProvisioner),
    LvmBased(&'a LvmProvisioner),
}

impl SelectedProvisioner<'_> {
    pub fn kind(&self) -> ProvisionerKind {
        match self {
            SelectedProvisioner::DriveBased(_) => ProvisionerKind::DriveBased,
            SelectedProvisioner::LvmBased(_) => ProvisionerKind::LvmBased,
        }
    }
}

#[async_trait]
impl Provisioner for SelectedProvisioner<'_> {
    async fn prepare_volume(&self, vol: &Volume) -> Result<()> {
        match self {
            SelectedProvisioner::DriveBased(p) => p.prepare_volume(vol).await,
            SelectedProvisioner::LvmBased(p) => p.prepare_volume(vol).await,
        }
    }

    async fn release_volume(&self, vol: &Volume) -> Result<()> {
        match self {
            SelectedProvisioner::DriveBased(p) => p.release_volume(vol).await,
            SelectedProvisioner::LvmBased(p) => p.release_volume(vol).await,
        }
    }

    async fn get_volume_path(&self, vol: &Volume) -> Result<String> {
        match self {
            SelectedProvisioner::DriveBased(p) => p.get_volume_path(vol).await,
            SelectedProvisioner::LvmBased(p) => p.get_volume_path(vol).await,
        }
    }
}

/// Both provisioner variants over shared tools
#[derive(Clone)]
pub struct Provisioners {
    drive: DriveProvisioner,
    lvm: LvmProvisioner,
}

impl Provisioners {
    pub fn new(drive: DriveProvisioner, lvm: LvmProvisioner) -> Self {
        Self { drive, lvm }
    }

    /// Wire both variants to the command-backed Linux tools
    pub fn with_system_tools(
        runner: CommandRunnerRef,
        repo: ResourceRepositoryRef,
        config: &EngineConfig,
    ) -> Self {
        let lister = Arc::new(Lsblk::new(runner.clone()));
        let partition_tool = Arc::new(PartitionHelper::new(runner.clone(), lister.clone()));
        let fs_tool = Arc::new(FsHelper::new(runner.clone(), &config.fs.mount_info_file));
        let lvm_tool = Arc::new(LvmHelper::new(runner, config.lvm.lvm_path.clone()));

        let fs = FsOperations::new(fs_tool);
        let partitions = PartitionOperations::new(partition_tool, config.partition.name_retry);
        let drive = DriveProvisioner::new(
            lister,
            partitions,
            fs.clone(),
            repo.clone(),
            config.partition.clone(),
        );
        let lvm = LvmProvisioner::new(lvm_tool, fs, repo);
        Self::new(drive, lvm)
    }

    pub fn select(&self, class: StorageClass) -> SelectedProvisioner<'_> {
        match class.provisioner_kind() {
            ProvisionerKind::DriveBased => SelectedProvisioner::DriveBased(&self.drive),
            ProvisionerKind::LvmBased => SelectedProvisioner::LvmBased(&self.lvm),
        }
    }
}

#[async_trait]
impl Provisioner for Provisioners {
    async fn prepare_volume(&self, vol: &Volume) -> Result<()> {
        self.select(vol.storage_class).prepare_volume(vol).await
    }

    async fn release_volume(&self, vol: &Volume) -> Result<()> {
        self.select(vol.storage_class).release_volume(vol).await
    }

    async fn get_volume_path(&self, vol: &Volume) -> Result<String> {
        self.select(vol.storage_class).get_volume_path(vol).await
    }
}
