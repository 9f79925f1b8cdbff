//! LVM-based provisioner
//!
//! A volume is a logical volume named after the volume id inside the
//! volume group given by the volume location.

use super::fs_ops::FsOperations;
use crate::domain::ports::{
    FileSystem, LvmToolRef, Provisioner, ResourceRepositoryRef, Volume, VolumeMode,
};
use crate::error::{Error, Result, ResultExt};
use async_trait::async_trait;
use tracing::{debug, info};

const GIB: u64 = 1 << 30;

/// LV size argument for `bytes`, rounded up to whole GiB
pub fn lv_size(bytes: u64) -> Result<String> {
    if bytes == 0 {
        return Err(Error::InvalidVolume("volume size is 0".to_string()));
    }
    Ok(format!("{}G", bytes.div_ceil(GIB)))
}

#[derive(Clone)]
pub struct LvmProvisioner {
    lvm: LvmToolRef,
    fs: FsOperations,
    repo: ResourceRepositoryRef,
}

impl LvmProvisioner {
    pub fn new(lvm: LvmToolRef, fs: FsOperations, repo: ResourceRepositoryRef) -> Self {
        Self { lvm, fs, repo }
    }

    /// Volume group holding `vol`
    ///
    /// For the system disk the LVG record name differs from the VG on disk
    /// and is resolved through the repository.
    async fn vg_name(&self, vol: &Volume) -> Result<String> {
        if !vol.storage_class.is_system_lvg() {
            return Ok(vol.location.clone());
        }
        let name = self
            .repo
            .resolve_vg_name(&vol.location)
            .await
            .with_context(|| format!("unable to determine VG name for volume {}", vol.id))?;
        debug!("LVG {} is backed by VG {}", vol.location, name);
        Ok(name)
    }

    fn device_path(vg: &str, vol: &Volume) -> String {
        format!("/dev/{}/{}", vg, vol.id)
    }
}

/// Volume group setup and teardown on the node's own drives
#[derive(Clone)]
pub struct VolumeGroupOperations {
    lvm: LvmToolRef,
}

impl VolumeGroupOperations {
    pub fn new(lvm: LvmToolRef) -> Self {
        Self { lvm }
    }

    /// Initialise every device as a PV and build `name` on top of them
    pub async fn create(&self, name: &str, devices: &[String]) -> Result<()> {
        if devices.is_empty() {
            return Err(Error::InvalidVolume(format!("no devices given for VG {}", name)));
        }
        info!(method = "CreateVG", "Creating VG {} on {:?}", name, devices);
        for device in devices {
            self.lvm
                .pv_create(device)
                .await
                .with_context(|| format!("unable to create PV on {}", device))?;
        }
        self.lvm
            .vg_create(name, devices)
            .await
            .with_context(|| format!("unable to create VG {}", name))
    }

    /// Remove `name` and clear the PV labels of its devices
    pub async fn remove(&self, name: &str, devices: &[String]) -> Result<()> {
        info!(method = "RemoveVG", "Removing VG {}", name);
        let lvs = self
            .lvm
            .lvs_in_vg(name)
            .await
            .with_context(|| format!("unable to list LVs in VG {}", name))?;
        if !lvs.is_empty() {
            return Err(Error::Internal(format!("VG {} still holds LVs {:?}", name, lvs)));
        }
        self.lvm
            .vg_remove(name)
            .await
            .with_context(|| format!("unable to remove VG {}", name))?;
        for device in devices {
            self.lvm
                .pv_remove(device)
                .await
                .with_context(|| format!("unable to remove PV {}", device))?;
        }
        Ok(())
    }

    /// Unallocated bytes in `name`
    pub async fn free_space(&self, name: &str) -> Result<u64> {
        self.lvm
            .vg_free_space(name)
            .await
            .with_context(|| format!("unable to get free space of VG {}", name))
    }
}

#[async_trait]
impl Provisioner for LvmProvisioner {
    async fn prepare_volume(&self, vol: &Volume) -> Result<()> {
        info!(method = "PrepareVolume", volume_id = %vol.id, "Processing for volume {:?}", vol);

        let vg = self.vg_name(vol).await?;
        let size = lv_size(vol.size)?;

        info!("Creating LV {} sizeof {} in VG {}", vol.id, size, vg);
        self.lvm
            .lv_create(&vol.id, &size, &vg)
            .await
            .with_context(|| format!("unable to create LV {} in VG {}", vol.id, vg))?;

        if matches!(vol.mode, VolumeMode::Raw | VolumeMode::RawPart) {
            return Ok(());
        }

        let fs_type: FileSystem = vol.fs_type.parse()?;
        let device = Self::device_path(&vg, vol);
        info!("Creating file system {} on device {}", fs_type, device);
        self.fs.create_fs_if_not_exist(fs_type, &device).await
    }

    async fn release_volume(&self, vol: &Volume) -> Result<()> {
        info!(method = "ReleaseVolume", volume_id = %vol.id, "Processing for volume {:?}", vol);

        let vg = self
            .vg_name(vol)
            .await
            .context("unable to determine full path of the volume")?;
        let device = Self::device_path(&vg, vol);

        if let Err(wipe_err) = self.fs.wipe_fs(&device).await {
            let lvs = self.lvm.lvs_in_vg(&vg).await.map_err(|list_err| {
                Error::Internal(format!(
                    "unable to remove LV {}: {} and unable to list LVs in VG {}: {}",
                    device, wipe_err, vg, list_err
                ))
            })?;
            if !lvs.iter().any(|lv| lv == &vol.id) {
                info!(volume_id = %vol.id, "LV {} has already been removed", device);
                return Ok(());
            }
            return Err(wipe_err.context(format!("failed to wipe FS on device {}", device)));
        }

        info!("Removing LV {}", device);
        self.lvm.lv_remove(&device).await
    }

    async fn get_volume_path(&self, vol: &Volume) -> Result<String> {
        debug!(method = "GetVolumePath", volume_id = %vol.id, "Processing for volume {:?}", vol);
        let vg = self.vg_name(vol).await?;
        Ok(Self::device_path(&vg, vol))
    }
}
