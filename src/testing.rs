//! In-memory fakes for the domain ports

use crate::domain::ports::*;
use crate::error::{Error, Result};
use crate::linuxutils::executor::command_line;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

fn injected(op: &str, stderr: &str) -> Error {
    Error::CommandFailed {
        command: op.to_string(),
        code: Some(1),
        stderr: stderr.to_string(),
    }
}

// =============================================================================
// Scripted Command Runner
// =============================================================================

struct Rule {
    prefix: String,
    result: std::result::Result<String, (i32, String)>,
}

/// CommandRunner answering by command-line prefix
///
/// The most recently added matching rule wins; unmatched commands succeed
/// with empty output. With a latency set, every call sleeps before
/// answering and the highest number of overlapping calls is recorded.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
    latency: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, prefix: &str, stdout: &str) {
        self.rules.lock().push(Rule {
            prefix: prefix.to_string(),
            result: Ok(stdout.to_string()),
        });
    }

    pub fn fail(&self, prefix: &str, code: i32, stderr: &str) {
        self.rules.lock().push(Rule {
            prefix: prefix.to_string(),
            result: Err((code, stderr.to_string())),
        });
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Highest number of calls that were running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let line = command_line(program, args);
        self.calls.lock().push(line.clone());

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let rules = self.rules.lock();
        match rules.iter().rev().find(|r| line.starts_with(&r.prefix)) {
            None => Ok(CommandOutput::default()),
            Some(Rule { result: Ok(stdout), .. }) => Ok(CommandOutput {
                stdout: stdout.clone(),
                stderr: String::new(),
            }),
            Some(Rule { result: Err((code, stderr)), .. }) => Err(Error::CommandFailed {
                command: line,
                code: Some(*code),
                stderr: stderr.clone(),
            }),
        }
    }
}

// =============================================================================
// Fake Disks: partitions, filesystems, mounts, lsblk
// =============================================================================

#[derive(Debug, Clone)]
pub struct FakePartition {
    pub uuid: String,
    pub label: String,
}

#[derive(Debug, Clone, Default)]
pub struct FakeDisk {
    pub serial: String,
    pub table: Option<String>,
    pub partitions: BTreeMap<String, FakePartition>,
}

/// A node's disks, filesystems and mount table held in memory
///
/// Directory and file creation for mount targets goes to the real
/// filesystem so tests can use temporary directories.
#[derive(Default)]
pub struct FakeNode {
    disks: Mutex<BTreeMap<String, FakeDisk>>,
    filesystems: Mutex<BTreeMap<String, String>>,
    mounts: Mutex<BTreeSet<String>>,
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, String>>,
    hidden_lookups: AtomicU32,
    os_uuid_seq: AtomicU32,
}

impl FakeNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a blank disk
    pub fn add_disk(&self, device: &str, serial: &str) {
        self.disks.lock().insert(
            device.to_string(),
            FakeDisk {
                serial: serial.to_string(),
                ..Default::default()
            },
        );
    }

    /// Add a disk with a GPT table and one partition in slot 1
    pub fn add_partitioned_disk(&self, device: &str, serial: &str, uuid: &str) {
        let mut disk = FakeDisk {
            serial: serial.to_string(),
            table: Some("gpt".to_string()),
            ..Default::default()
        };
        disk.partitions.insert(
            "1".to_string(),
            FakePartition {
                uuid: uuid.to_string(),
                label: "CSI".to_string(),
            },
        );
        self.disks.lock().insert(device.to_string(), disk);
    }

    pub fn disk(&self, device: &str) -> Option<FakeDisk> {
        self.disks.lock().get(device).cloned()
    }

    pub fn set_fs(&self, path: &str, fs: &str) {
        self.filesystems.lock().insert(path.to_string(), fs.to_string());
    }

    pub fn fs_on(&self, path: &str) -> Option<String> {
        self.filesystems.lock().get(path).cloned()
    }

    pub fn set_mounted(&self, path: &str) {
        self.mounts.lock().insert(path.to_string());
    }

    /// Make `op` fail with `stderr` until cleared
    pub fn fail_on(&self, op: &str, stderr: &str) {
        self.failures.lock().insert(op.to_string(), stderr.to_string());
    }

    pub fn clear_failure(&self, op: &str) {
        self.failures.lock().remove(op);
    }

    /// Make the next `n` partition name lookups miss
    pub fn hide_partition_names(&self, n: u32) {
        self.hidden_lookups.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.split_whitespace().next() == Some(op))
            .count()
    }

    fn record(&self, op: &str, args: &[&str]) -> Result<()> {
        self.calls.lock().push(command_line(op, args));
        match self.failures.lock().get(op) {
            Some(stderr) => Err(injected(op, stderr)),
            None => Ok(()),
        }
    }

    fn part_path(device: &str, num: &str) -> String {
        if device.ends_with(|c: char| c.is_ascii_digit()) {
            format!("{}p{}", device, num)
        } else {
            format!("{}{}", device, num)
        }
    }

    fn with_disk<T>(&self, device: &str, f: impl FnOnce(&mut FakeDisk) -> Result<T>) -> Result<T> {
        let mut disks = self.disks.lock();
        match disks.get_mut(device) {
            Some(disk) => f(disk),
            None => Err(injected(device, "No such file or directory")),
        }
    }
}

#[async_trait]
impl PartitionTool for FakeNode {
    async fn is_partition_exists(&self, device: &str, part_num: &str) -> Result<bool> {
        self.record("is_partition_exists", &[device, part_num])?;
        self.with_disk(device, |d| Ok(d.partitions.contains_key(part_num)))
    }

    async fn partition_table_type(&self, device: &str) -> Result<String> {
        self.record("partition_table_type", &[device])?;
        self.with_disk(device, |d| Ok(d.table.clone().unwrap_or_default()))
    }

    async fn create_partition_table(&self, device: &str, table_type: &str) -> Result<()> {
        self.record("create_partition_table", &[device, table_type])?;
        self.with_disk(device, |d| {
            d.table = Some(table_type.to_string());
            d.partitions.clear();
            Ok(())
        })
    }

    async fn create_partition(&self, device: &str, part_num: &str, label: &str) -> Result<()> {
        self.record("create_partition", &[device, part_num, label])?;
        let seq = self.os_uuid_seq.fetch_add(1, Ordering::SeqCst);
        self.with_disk(device, |d| {
            d.partitions.insert(
                part_num.to_string(),
                FakePartition {
                    uuid: format!("0a0b0c0d-0000-4000-8000-{:012x}", seq + 1),
                    label: label.to_string(),
                },
            );
            Ok(())
        })
    }

    async fn set_partition_uuid(&self, device: &str, part_num: &str, part_uuid: &str) -> Result<()> {
        self.record("set_partition_uuid", &[device, part_num, part_uuid])?;
        self.with_disk(device, |d| match d.partitions.get_mut(part_num) {
            Some(p) => {
                p.uuid = part_uuid.to_string();
                Ok(())
            }
            None => Err(injected("set_partition_uuid", "partition does not exist")),
        })
    }

    async fn partition_uuid(&self, device: &str, part_num: &str) -> Result<String> {
        self.record("partition_uuid", &[device, part_num])?;
        self.with_disk(device, |d| match d.partitions.get(part_num) {
            Some(p) => Ok(p.uuid.clone()),
            None => Err(Error::UnexpectedOutput {
                command: "partition_uuid".to_string(),
                reason: format!("Partition #{} does not exist.", part_num),
            }),
        })
    }

    async fn delete_partition(&self, device: &str, part_num: &str) -> Result<()> {
        self.record("delete_partition", &[device, part_num])?;
        self.with_disk(device, |d| {
            d.partitions.remove(part_num);
            Ok(())
        })
    }

    async fn sync_partition_table(&self, device: &str) -> Result<()> {
        self.record("sync_partition_table", &[device])
    }

    async fn partition_name_by_uuid(&self, device: &str, part_uuid: &str) -> Result<String> {
        self.record("partition_name_by_uuid", &[device, part_uuid])?;
        let not_found = || Error::PartitionNameNotFound {
            device: device.to_string(),
            uuid: part_uuid.to_string(),
        };
        if self
            .hidden_lookups
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(not_found());
        }
        self.with_disk(device, |d| {
            d.partitions
                .iter()
                .find(|(_, p)| p.uuid.eq_ignore_ascii_case(part_uuid))
                .map(|(num, _)| Self::part_path(device, num).replacen(device, "", 1))
                .ok_or_else(not_found)
        })
    }

    async fn device_has_partition_table(&self, device: &str) -> Result<bool> {
        self.record("device_has_partition_table", &[device])?;
        self.with_disk(device, |d| Ok(d.table.is_some()))
    }

    async fn device_has_partitions(&self, device: &str) -> Result<bool> {
        self.record("device_has_partitions", &[device])?;
        self.with_disk(device, |d| Ok(!d.partitions.is_empty()))
    }
}

#[async_trait]
impl FsTool for FakeNode {
    async fn fs_space(&self, path: &str) -> Result<u64> {
        self.record("fs_space", &[path])?;
        Ok(1 << 30)
    }

    async fn mk_dir(&self, path: &str) -> Result<()> {
        self.record("mk_dir", &[path])?;
        std::fs::create_dir_all(path)?;
        Ok(())
    }

    async fn mk_file(&self, path: &str) -> Result<()> {
        self.record("mk_file", &[path])?;
        std::fs::File::create(path)?;
        Ok(())
    }

    async fn rm_dir(&self, path: &str) -> Result<()> {
        self.record("rm_dir", &[path])?;
        let p = std::path::Path::new(path);
        if p.is_dir() {
            std::fs::remove_dir_all(p)?;
        } else if p.exists() {
            std::fs::remove_file(p)?;
        }
        Ok(())
    }

    async fn create_fs(&self, fs_type: FileSystem, device: &str) -> Result<()> {
        self.record("create_fs", &[fs_type.as_str(), device])?;
        self.set_fs(device, fs_type.as_str());
        Ok(())
    }

    async fn wipe_fs(&self, device: &str) -> Result<()> {
        self.record("wipe_fs", &[device])?;
        self.filesystems.lock().remove(device);
        if let Some(disk) = self.disks.lock().get_mut(device) {
            if disk.partitions.is_empty() {
                disk.table = None;
            }
        }
        Ok(())
    }

    async fn fs_type(&self, device: &str) -> Result<String> {
        self.record("fs_type", &[device])?;
        Ok(self.fs_on(device).unwrap_or_default())
    }

    async fn is_mounted(&self, path: &str) -> Result<bool> {
        self.record("is_mounted", &[path])?;
        Ok(self.mounts.lock().contains(path))
    }

    async fn find_mount_point(&self, target: &str) -> Result<String> {
        self.record("find_mount_point", &[target])?;
        Ok("/dev/fake-root".to_string())
    }

    async fn mount(&self, src: &str, dst: &str, opts: &[String]) -> Result<()> {
        let mut args: Vec<&str> = opts.iter().map(String::as_str).collect();
        args.push(src);
        args.push(dst);
        self.record("mount", &args)?;
        self.mounts.lock().insert(dst.to_string());
        Ok(())
    }

    async fn unmount(&self, path: &str) -> Result<()> {
        self.record("unmount", &[path])?;
        self.mounts.lock().remove(path);
        Ok(())
    }
}

#[async_trait]
impl BlockDeviceLister for FakeNode {
    async fn block_devices(&self, device: &str) -> Result<Vec<BlockDevice>> {
        self.record("block_devices", &[device])?;
        let disks = self.disks.lock();
        Ok(disks
            .iter()
            .filter(|(name, _)| device.is_empty() || name.as_str() == device)
            .map(|(name, disk)| BlockDevice {
                name: name.clone(),
                device_type: "disk".to_string(),
                serial: disk.serial.clone(),
                children: disk
                    .partitions
                    .iter()
                    .map(|(num, p)| BlockDevice {
                        name: Self::part_path(name, num),
                        device_type: "part".to_string(),
                        partuuid: p.uuid.clone(),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            })
            .collect())
    }

    async fn search_drive_path(&self, drive: &DriveInfo) -> Result<String> {
        self.record("search_drive_path", &[&drive.serial_number])?;
        if !drive.path.is_empty() {
            return Ok(drive.path.clone());
        }
        self.disks
            .lock()
            .iter()
            .find(|(_, d)| d.serial.eq_ignore_ascii_case(&drive.serial_number))
            .map(|(name, _)| name.clone())
            .ok_or_else(|| Error::DevicePathNotFound {
                serial: drive.serial_number.clone(),
            })
    }
}

// =============================================================================
// Fake LVM
// =============================================================================

/// Volume groups and their logical volumes
#[derive(Default)]
pub struct FakeLvm {
    vgs: Mutex<BTreeMap<String, BTreeSet<String>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeLvm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vg(&self, name: &str) {
        self.vgs.lock().insert(name.to_string(), BTreeSet::new());
    }

    pub fn lvs(&self, vg: &str) -> Vec<String> {
        self.vgs
            .lock()
            .get(vg)
            .map(|lvs| lvs.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, op: &str, args: &[&str]) {
        self.calls.lock().push(command_line(op, args));
    }

    fn vg_not_found(op: &str, vg: &str) -> Error {
        injected(op, &format!("Volume group \"{}\" not found", vg))
    }
}

#[async_trait]
impl LvmTool for FakeLvm {
    async fn pv_create(&self, device: &str) -> Result<()> {
        self.record("pvcreate", &[device]);
        Ok(())
    }

    async fn pv_remove(&self, device: &str) -> Result<()> {
        self.record("pvremove", &[device]);
        Ok(())
    }

    async fn vg_create(&self, name: &str, pvs: &[String]) -> Result<()> {
        let mut args = vec![name];
        args.extend(pvs.iter().map(String::as_str));
        self.record("vgcreate", &args);
        self.vgs.lock().entry(name.to_string()).or_default();
        Ok(())
    }

    async fn vg_remove(&self, name: &str) -> Result<()> {
        self.record("vgremove", &[name]);
        self.vgs.lock().remove(name);
        Ok(())
    }

    async fn lv_create(&self, name: &str, size: &str, vg_name: &str) -> Result<()> {
        self.record("lvcreate", &[name, size, vg_name]);
        match self.vgs.lock().get_mut(vg_name) {
            Some(lvs) => {
                lvs.insert(name.to_string());
                Ok(())
            }
            None => Err(Self::vg_not_found("lvcreate", vg_name)),
        }
    }

    async fn lv_remove(&self, full_lv_name: &str) -> Result<()> {
        self.record("lvremove", &[full_lv_name]);
        let mut parts = full_lv_name.trim_start_matches("/dev/").splitn(2, '/');
        if let (Some(vg), Some(lv)) = (parts.next(), parts.next()) {
            if let Some(lvs) = self.vgs.lock().get_mut(vg) {
                lvs.remove(lv);
            }
        }
        Ok(())
    }

    async fn lvs_in_vg(&self, vg_name: &str) -> Result<Vec<String>> {
        self.record("lvs", &[vg_name]);
        self.vgs
            .lock()
            .get(vg_name)
            .map(|lvs| lvs.iter().cloned().collect())
            .ok_or_else(|| Self::vg_not_found("lvs", vg_name))
    }

    async fn vg_free_space(&self, vg_name: &str) -> Result<u64> {
        self.record("vgs", &[vg_name]);
        Ok(100 << 30)
    }
}

// =============================================================================
// Fake Repository
// =============================================================================

#[derive(Default)]
pub struct FakeRepository {
    drives: Mutex<BTreeMap<String, DriveInfo>>,
    lvgs: Mutex<BTreeMap<String, VolumeGroupInfo>>,
}

impl FakeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a drive under its UUID
    pub fn add_drive(&self, drive: DriveInfo) {
        self.drives.lock().insert(drive.uuid.clone(), drive);
    }

    pub fn add_lvg(&self, record_name: &str, vg_name: &str) {
        self.lvgs.lock().insert(
            record_name.to_string(),
            VolumeGroupInfo {
                name: vg_name.to_string(),
                ..Default::default()
            },
        );
    }
}

#[async_trait]
impl ResourceRepository for FakeRepository {
    async fn read_drive(&self, name: &str) -> Result<DriveInfo> {
        self.drives
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "Drive".to_string(),
                name: name.to_string(),
            })
    }

    async fn find_drive(&self, uuid: &str) -> Result<Option<DriveInfo>> {
        Ok(self.drives.lock().values().find(|d| d.uuid == uuid).cloned())
    }

    async fn read_lvg(&self, name: &str) -> Result<VolumeGroupInfo> {
        self.lvgs
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "LogicalVolumeGroup".to_string(),
                name: name.to_string(),
            })
    }
}

// =============================================================================
// Builders
// =============================================================================

pub fn drive(uuid: &str, serial: &str) -> DriveInfo {
    DriveInfo {
        uuid: uuid.to_string(),
        serial_number: serial.to_string(),
        node_id: "node-a".to_string(),
        ..Default::default()
    }
}

pub fn volume(id: &str, location: &str, storage_class: StorageClass) -> Volume {
    Volume {
        id: id.to_string(),
        location: location.to_string(),
        storage_class,
        fs_type: "xfs".to_string(),
        size: 1 << 30,
        ephemeral: false,
        mode: VolumeMode::Fs,
        node_id: "node-a".to_string(),
    }
}
