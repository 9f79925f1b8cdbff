//! Drive-based provisioner
//!
//! A volume takes a whole drive: one GPT partition whose UUID is derived
//! from the volume id, with a filesystem on top.

use super::fs_ops::FsOperations;
use super::partition_ops::{Partition, PartitionOperations};
use super::uuid::volume_uuid;
use crate::config::PartitionConfig;
use crate::domain::ports::{
    BlockDeviceListerRef, DriveInfo, FileSystem, Provisioner, ResourceRepositoryRef, Volume,
    VolumeMode,
};
use crate::error::{Error, Result, ResultExt};
use async_trait::async_trait;
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct DriveProvisioner {
    lister: BlockDeviceListerRef,
    partitions: PartitionOperations,
    fs: FsOperations,
    repo: ResourceRepositoryRef,
    partition: PartitionConfig,
}

impl DriveProvisioner {
    pub fn new(
        lister: BlockDeviceListerRef,
        partitions: PartitionOperations,
        fs: FsOperations,
        repo: ResourceRepositoryRef,
        partition: PartitionConfig,
    ) -> Self {
        Self {
            lister,
            partitions,
            fs,
            repo,
            partition,
        }
    }

    fn partition_for(&self, device: &str, part_uuid: String, ephemeral: bool) -> Partition {
        Partition {
            device: device.to_string(),
            name: String::new(),
            num: self.partition.number.clone(),
            table_type: self.partition.table_type.clone(),
            label: self.partition.label.clone(),
            part_uuid,
            ephemeral,
        }
    }

    async fn device_for(&self, vol: &Volume, drive: &DriveInfo) -> Result<String> {
        let device = self
            .lister
            .search_drive_path(drive)
            .await
            .with_context(|| format!("unable to find device for drive with S/N {}", vol.location))?;
        debug!("Got device {}", device);
        Ok(device)
    }

    /// UUID to look the partition up by: derived for regular volumes,
    /// read from disk for ephemeral ones
    async fn lookup_uuid(&self, vol: &Volume, device: &str) -> Result<String> {
        if vol.ephemeral {
            return self
                .partitions
                .tool()
                .partition_uuid(device, &self.partition.number)
                .await
                .with_context(|| format!("unable to read partition UUID of {} on {}", vol.id, device));
        }
        volume_uuid(&vol.id)
    }

    /// Prepare `vol` and return the partition it lives on
    ///
    /// `None` for raw volumes. For ephemeral volumes the returned
    /// `part_uuid` is the one on disk, not the one derived from the id.
    pub async fn prepare_volume_partition(&self, vol: &Volume) -> Result<Option<Partition>> {
        info!(method = "PrepareVolume", volume_id = %vol.id, "Processing for volume {:?}", vol);

        let drive = self
            .repo
            .read_drive(&vol.location)
            .await
            .with_context(|| format!("failed to read drive CR with name {}", vol.location))?;

        info!("Search device file for drive with S/N {}", drive.serial_number);
        let device = self.lister.search_drive_path(&drive).await?;

        if vol.mode == VolumeMode::Raw {
            return Ok(None);
        }

        let vol_uuid = volume_uuid(&vol.id)
            .with_context(|| format!("failed to get volume UUID {}", vol.id))?;
        let part = self.partition_for(&device, vol_uuid, vol.ephemeral);

        info!("Create partition {:?} on device {} and set UUID", part, device);
        let part = self.partitions.prepare_partition(part).await.map_err(|e| {
            error!(volume_id = %vol.id, "Unable to prepare partition: {}", e);
            e.context(format!("unable to prepare partition for volume {}", vol.id))
        })?;
        info!("Partition was created successfully {:?}", part);

        if vol.mode == VolumeMode::RawPart {
            return Ok(Some(part));
        }

        // existing filesystems are not checked here, unlike the LVM path
        let fs_type: FileSystem = vol.fs_type.parse()?;
        self.fs.create_fs(fs_type, &part.full_path()).await?;
        Ok(Some(part))
    }
}

#[async_trait]
impl Provisioner for DriveProvisioner {
    async fn prepare_volume(&self, vol: &Volume) -> Result<()> {
        self.prepare_volume_partition(vol).await.map(|_| ())
    }

    async fn release_volume(&self, vol: &Volume) -> Result<()> {
        info!(method = "ReleaseVolume", volume_id = %vol.id, "Processing for volume {:?}", vol);

        let drive = self
            .repo
            .find_drive(&vol.location)
            .await?
            .ok_or_else(|| Error::DriveNotFound(format!("drive {} not found", vol.location)))?;
        let device = self.device_for(vol, &drive).await?;

        if vol.mode == VolumeMode::Raw {
            return self.fs.wipe_fs(&device).await;
        }

        let part_uuid = self.lookup_uuid(vol, &device).await?;
        let name = self
            .partitions
            .search_part_name(&device, &part_uuid)
            .await
            .ok_or_else(|| Error::PartitionNameNotFound {
                device: device.clone(),
                uuid: part_uuid.clone(),
            })
            .with_context(|| format!("unable to find partition name for volume {}", vol.id))?;

        let mut part = self.partition_for(&device, part_uuid, vol.ephemeral);
        part.name = name;

        self.fs.wipe_fs(&part.full_path()).await?;
        self.partitions
            .release_partition(&part)
            .await
            .context("unable to release partition")?;

        // partition removal leaves the table signature behind
        self.fs.wipe_fs(&device).await
    }

    async fn get_volume_path(&self, vol: &Volume) -> Result<String> {
        debug!(method = "GetVolumePath", volume_id = %vol.id, "Processing for volume {:?}", vol);

        let drive = self.repo.read_drive(&vol.location).await.map_err(|e| {
            error!("failed to get drive CR {}: {}", vol.location, e);
            e.context(format!("failed to get drive CR {}", vol.location))
        })?;
        let device = self.device_for(vol, &drive).await?;

        if vol.mode == VolumeMode::Raw {
            return Ok(device);
        }

        let part_uuid = self.lookup_uuid(vol, &device).await?;
        let name = self
            .partitions
            .search_part_name(&device, &part_uuid)
            .await
            .ok_or_else(|| Error::PartitionNameNotFound {
                device: device.clone(),
                uuid: part_uuid.clone(),
            })
            .with_context(|| {
                format!("unable to find part name for device {} by uuid {}", device, part_uuid)
            })?;
        Ok(format!("{}{}", device, name))
    }
}
