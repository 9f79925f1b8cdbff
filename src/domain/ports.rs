//! Domain Ports - Core trait definitions for the provisioning engine
//!
//! These traits define the boundaries between the provisioning logic and
//! the outside world: OS utilities, block device introspection and the
//! cluster resource repository. Adapters in [`crate::linuxutils`] and
//! [`crate::repository`] implement them; tests swap in in-memory fakes.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;
use std::sync::Arc;

// =============================================================================
// Storage Classes
// =============================================================================

/// Storage class family of a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageClass {
    #[serde(rename = "HDD")]
    Hdd,
    #[serde(rename = "SSD")]
    Ssd,
    #[serde(rename = "NVME")]
    Nvme,
    #[serde(rename = "HDDLVG")]
    HddLvg,
    #[serde(rename = "SSDLVG")]
    SsdLvg,
    #[serde(rename = "NVMELVG")]
    NvmeLvg,
    /// Volume group carved out of the node's system disk
    #[serde(rename = "SYSLVG")]
    SystemLvg,
}

impl StorageClass {
    /// Provisioner variant that handles volumes of this class
    pub fn provisioner_kind(&self) -> ProvisionerKind {
        match self {
            StorageClass::Hdd | StorageClass::Ssd | StorageClass::Nvme => {
                ProvisionerKind::DriveBased
            }
            StorageClass::HddLvg
            | StorageClass::SsdLvg
            | StorageClass::NvmeLvg
            | StorageClass::SystemLvg => ProvisionerKind::LvmBased,
        }
    }

    pub fn is_system_lvg(&self) -> bool {
        matches!(self, StorageClass::SystemLvg)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageClass::Hdd => "HDD",
            StorageClass::Ssd => "SSD",
            StorageClass::Nvme => "NVME",
            StorageClass::HddLvg => "HDDLVG",
            StorageClass::SsdLvg => "SSDLVG",
            StorageClass::NvmeLvg => "NVMELVG",
            StorageClass::SystemLvg => "SYSLVG",
        }
    }
}

impl std::fmt::Display for StorageClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StorageClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "HDD" => Ok(StorageClass::Hdd),
            "SSD" => Ok(StorageClass::Ssd),
            "NVME" => Ok(StorageClass::Nvme),
            "HDDLVG" => Ok(StorageClass::HddLvg),
            "SSDLVG" => Ok(StorageClass::SsdLvg),
            "NVMELVG" => Ok(StorageClass::NvmeLvg),
            "SYSLVG" => Ok(StorageClass::SystemLvg),
            other => Err(Error::InvalidVolume(format!(
                "unknown storage class {:?}",
                other
            ))),
        }
    }
}

/// Which provisioner owns a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisionerKind {
    /// Volume consumes a whole drive through a single partition
    DriveBased,
    /// Volume is a logical volume inside a volume group
    LvmBased,
}

impl std::fmt::Display for ProvisionerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProvisionerKind::DriveBased => write!(f, "DriveBased"),
            ProvisionerKind::LvmBased => write!(f, "LVMBased"),
        }
    }
}

/// How the volume is exposed to the workload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolumeMode {
    /// Filesystem on top of the partition or logical volume
    #[default]
    #[serde(rename = "FS")]
    Fs,
    /// The whole device, untouched
    #[serde(rename = "RAW")]
    Raw,
    /// A partition without a filesystem
    #[serde(rename = "RAWPART")]
    RawPart,
}

impl FromStr for VolumeMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "FS" | "" => Ok(VolumeMode::Fs),
            "RAW" => Ok(VolumeMode::Raw),
            "RAWPART" => Ok(VolumeMode::RawPart),
            other => Err(Error::InvalidVolume(format!("unknown volume mode {:?}", other))),
        }
    }
}

// =============================================================================
// Filesystems
// =============================================================================

/// Filesystems the engine knows how to create
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileSystem {
    Xfs,
    Ext4,
    Ext3,
}

impl FileSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileSystem::Xfs => "xfs",
            FileSystem::Ext4 => "ext4",
            FileSystem::Ext3 => "ext3",
        }
    }
}

impl std::fmt::Display for FileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FileSystem {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "xfs" => Ok(FileSystem::Xfs),
            "ext4" => Ok(FileSystem::Ext4),
            "ext3" => Ok(FileSystem::Ext3),
            _ => Err(Error::UnsupportedFilesystem(s.to_string())),
        }
    }
}

// =============================================================================
// Volume / Drive / Volume Group
// =============================================================================

/// Volume descriptor handed to a provisioner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Globally unique volume id
    pub id: String,
    /// Drive UUID for drive-based volumes, LVG record name for LVM volumes
    pub location: String,
    pub storage_class: StorageClass,
    /// Filesystem type name
    #[serde(rename = "type")]
    pub fs_type: String,
    /// Requested size in bytes
    pub size: u64,
    #[serde(default)]
    pub ephemeral: bool,
    #[serde(default)]
    pub mode: VolumeMode,
    #[serde(default)]
    pub node_id: String,
}

/// Drive record as stored in the resource repository
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveInfo {
    pub uuid: String,
    pub serial_number: String,
    /// Device node; empty when it has to be resolved by serial number
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub size: u64,
}

/// Logical volume group record as stored in the resource repository
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeGroupInfo {
    /// Volume group name on the node
    pub name: String,
    #[serde(default)]
    pub node_id: String,
    /// UUIDs of the drives backing this group
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub size: u64,
}

// =============================================================================
// Block Devices
// =============================================================================

/// One entry of `lsblk --json` output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub device_type: String,
    #[serde(default, deserialize_with = "deserialize_size")]
    pub size: u64,
    #[serde(default, deserialize_with = "deserialize_rota")]
    pub rota: bool,
    #[serde(default, deserialize_with = "deserialize_opt_string")]
    pub serial: String,
    #[serde(default, deserialize_with = "deserialize_opt_string")]
    pub wwn: String,
    #[serde(default, deserialize_with = "deserialize_opt_string")]
    pub vendor: String,
    #[serde(default, deserialize_with = "deserialize_opt_string")]
    pub model: String,
    #[serde(default, deserialize_with = "deserialize_opt_string")]
    pub rev: String,
    #[serde(default, deserialize_with = "deserialize_opt_string")]
    pub mountpoint: String,
    #[serde(default, deserialize_with = "deserialize_opt_string")]
    pub fstype: String,
    #[serde(default, deserialize_with = "deserialize_opt_string")]
    pub partuuid: String,
    #[serde(default)]
    pub children: Vec<BlockDevice>,
}

// lsblk prints null for attributes it cannot read
fn deserialize_opt_string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

// size is a number or a quoted number depending on the lsblk version
fn deserialize_size<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u64, D::Error> {
    use serde::de::Error as _;
    match serde_json::Value::deserialize(d)? {
        serde_json::Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| D::Error::custom(format!("invalid size {}", n))),
        serde_json::Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("invalid size {:?}", s))),
        serde_json::Value::Null => Ok(0),
        other => Err(D::Error::custom(format!("invalid size {}", other))),
    }
}

// rota is true/false, "1"/"0" or empty depending on the lsblk version
fn deserialize_rota<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<bool, D::Error> {
    use serde::de::Error as _;
    match serde_json::Value::deserialize(d)? {
        serde_json::Value::Bool(b) => Ok(b),
        serde_json::Value::Number(n) => Ok(n.as_u64() == Some(1)),
        serde_json::Value::String(s) => match s.as_str() {
            "1" | "true" => Ok(true),
            "0" | "false" | "" => Ok(false),
            _ => Err(D::Error::custom(format!("unknown rota value {:?}", s))),
        },
        serde_json::Value::Null => Ok(false),
        other => Err(D::Error::custom(format!("unknown rota value {}", other))),
    }
}

/// Captured output of a successful command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

// =============================================================================
// Command Execution Port
// =============================================================================

/// Runs external programs
///
/// A non-zero exit status is reported as [`Error::CommandFailed`] carrying
/// the captured stderr. There is no timeout: the call returns when the
/// program exits.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;
}

// =============================================================================
// Device Introspection Port
// =============================================================================

/// Port for block device listing
#[async_trait]
pub trait BlockDeviceLister: Send + Sync {
    /// List block devices; an empty `device` lists every device on the node
    async fn block_devices(&self, device: &str) -> Result<Vec<BlockDevice>>;

    /// Device node of a drive, resolved by serial number when the record has no path
    async fn search_drive_path(&self, drive: &DriveInfo) -> Result<String>;
}

// =============================================================================
// Partition Tool Port
// =============================================================================

/// Low-level partition table operations on a single device
#[async_trait]
pub trait PartitionTool: Send + Sync {
    async fn is_partition_exists(&self, device: &str, part_num: &str) -> Result<bool>;
    async fn partition_table_type(&self, device: &str) -> Result<String>;
    async fn create_partition_table(&self, device: &str, table_type: &str) -> Result<()>;
    async fn create_partition(&self, device: &str, part_num: &str, label: &str) -> Result<()>;
    async fn set_partition_uuid(&self, device: &str, part_num: &str, part_uuid: &str) -> Result<()>;
    async fn partition_uuid(&self, device: &str, part_num: &str) -> Result<String>;
    async fn delete_partition(&self, device: &str, part_num: &str) -> Result<()>;
    async fn sync_partition_table(&self, device: &str) -> Result<()>;
    /// Partition suffix ("1", "p1") of the partition carrying `part_uuid`
    async fn partition_name_by_uuid(&self, device: &str, part_uuid: &str) -> Result<String>;
    async fn device_has_partition_table(&self, device: &str) -> Result<bool>;
    async fn device_has_partitions(&self, device: &str) -> Result<bool>;
}

// =============================================================================
// Filesystem Tool Port
// =============================================================================

/// Low-level filesystem and mount operations
#[async_trait]
pub trait FsTool: Send + Sync {
    /// Free bytes on the filesystem holding `path`
    async fn fs_space(&self, path: &str) -> Result<u64>;
    async fn mk_dir(&self, path: &str) -> Result<()>;
    async fn mk_file(&self, path: &str) -> Result<()>;
    async fn rm_dir(&self, path: &str) -> Result<()>;
    async fn create_fs(&self, fs_type: FileSystem, device: &str) -> Result<()>;
    async fn wipe_fs(&self, device: &str) -> Result<()>;
    /// Filesystem type on `device`, empty when there is none
    async fn fs_type(&self, device: &str) -> Result<String>;
    async fn is_mounted(&self, path: &str) -> Result<bool>;
    /// Source device of the mount that holds `target`
    async fn find_mount_point(&self, target: &str) -> Result<String>;
    async fn mount(&self, src: &str, dst: &str, opts: &[String]) -> Result<()>;
    async fn unmount(&self, path: &str) -> Result<()>;
}

// =============================================================================
// LVM Tool Port
// =============================================================================

/// Physical volume, volume group and logical volume commands
///
/// Implementations treat "already exists" on create and "not found" on
/// remove as success.
#[async_trait]
pub trait LvmTool: Send + Sync {
    async fn pv_create(&self, device: &str) -> Result<()>;
    async fn pv_remove(&self, device: &str) -> Result<()>;
    async fn vg_create(&self, name: &str, pvs: &[String]) -> Result<()>;
    async fn vg_remove(&self, name: &str) -> Result<()>;
    async fn lv_create(&self, name: &str, size: &str, vg_name: &str) -> Result<()>;
    async fn lv_remove(&self, full_lv_name: &str) -> Result<()>;
    async fn lvs_in_vg(&self, vg_name: &str) -> Result<Vec<String>>;
    async fn vg_free_space(&self, vg_name: &str) -> Result<u64>;
}

// =============================================================================
// Resource Repository Port
// =============================================================================

/// Read access to Drive and LogicalVolumeGroup records
#[async_trait]
pub trait ResourceRepository: Send + Sync {
    /// Read a drive by record name; absence is [`Error::ResourceNotFound`]
    async fn read_drive(&self, name: &str) -> Result<DriveInfo>;

    /// Look a drive up by UUID; absence is `Ok(None)`
    async fn find_drive(&self, uuid: &str) -> Result<Option<DriveInfo>>;

    /// Read a logical volume group by record name
    async fn read_lvg(&self, name: &str) -> Result<VolumeGroupInfo>;

    /// Real volume group name behind an LVG record
    async fn resolve_vg_name(&self, lvg_name: &str) -> Result<String> {
        Ok(self.read_lvg(lvg_name).await?.name)
    }
}

// =============================================================================
// Provisioner Port
// =============================================================================

/// High-level volume lifecycle on the node
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Bring the underlying partition/LV and filesystem into existence
    async fn prepare_volume(&self, volume: &Volume) -> Result<()>;

    /// Remove everything `prepare_volume` created
    async fn release_volume(&self, volume: &Volume) -> Result<()>;

    /// Device file that represents the volume on the node
    async fn get_volume_path(&self, volume: &Volume) -> Result<String>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type CommandRunnerRef = Arc<dyn CommandRunner>;
pub type BlockDeviceListerRef = Arc<dyn BlockDeviceLister>;
pub type PartitionToolRef = Arc<dyn PartitionTool>;
pub type FsToolRef = Arc<dyn FsTool>;
pub type LvmToolRef = Arc<dyn LvmTool>;
pub type ResourceRepositoryRef = Arc<dyn ResourceRepository>;
