//! Partition table commands: partprobe, sgdisk, blockdev and fdisk
//!
//! Commands that touch a partition table are serialized through one lock
//! per helper instance. The lock is not per device: some of these tools
//! misbehave when run concurrently even against different disks.

use crate::config::PARTITION_GPT;
use crate::domain::ports::{BlockDeviceListerRef, CommandRunnerRef, PartitionTool};
use crate::error::{Error, Result, ResultExt};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

pub const PARTPROBE: &str = "partprobe";
pub const SGDISK: &str = "sgdisk";
pub const BLOCKDEV: &str = "blockdev";
pub const FDISK: &str = "fdisk";

const UNIQUE_GUID_KEY: &str = "Partition unique GUID:";
const DISK_LABEL_KEY: &str = "Disklabel type";

// =============================================================================
// Output Parsing
// =============================================================================

/// Partition numbers from `partprobe -d -s` output
///
/// ```text
/// /dev/sdy: gpt partitions 1 2
/// ```
pub fn parse_partprobe_partitions(stdout: &str) -> Vec<String> {
    match stdout.trim().split_once("partitions") {
        Some((_, nums)) => nums.split_whitespace().map(str::to_string).collect(),
        None => Vec::new(),
    }
}

/// Partition table type from `partprobe -d -s` output
pub fn parse_partprobe_table_type(stdout: &str) -> Option<String> {
    stdout
        .split_whitespace()
        .nth(1)
        .filter(|t| *t != "partitions")
        .map(str::to_string)
}

/// Lower-cased unique GUID from `sgdisk --info` output
///
/// ```text
/// Partition GUID code: 0FC63DAF-8483-4772-8E79-3D69D8477DE4 (Linux filesystem)
/// Partition unique GUID: 5209CFD8-3AB1-4720-BCEA-DFA80315EC92
/// ```
pub fn parse_unique_guid(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .filter_map(|line| line.split_once(UNIQUE_GUID_KEY))
        .map(|(_, guid)| guid.trim().to_lowercase())
        .find(|guid| !guid.is_empty())
}

// =============================================================================
// Partition Helper
// =============================================================================

/// Command-backed [`PartitionTool`]
pub struct PartitionHelper {
    runner: CommandRunnerRef,
    lister: BlockDeviceListerRef,
    op_lock: Mutex<()>,
}

impl PartitionHelper {
    pub fn new(runner: CommandRunnerRef, lister: BlockDeviceListerRef) -> Self {
        Self {
            runner,
            lister,
            op_lock: Mutex::new(()),
        }
    }

    async fn partprobe(&self, device: &str) -> Result<String> {
        Ok(self.runner.run(PARTPROBE, &["-d", "-s", device]).await?.stdout)
    }
}

#[async_trait]
impl PartitionTool for PartitionHelper {
    async fn is_partition_exists(&self, device: &str, part_num: &str) -> Result<bool> {
        let stdout = {
            let _guard = self.op_lock.lock().await;
            self.partprobe(device).await.with_context(|| {
                format!("unable to check partition {:?} existence for {}", part_num, device)
            })?
        };
        let exists = parse_partprobe_partitions(&stdout).iter().any(|n| n == part_num);
        debug!("partition {} on {} exists: {}", part_num, device, exists);
        Ok(exists)
    }

    async fn partition_table_type(&self, device: &str) -> Result<String> {
        let stdout = {
            let _guard = self.op_lock.lock().await;
            self.partprobe(device)
                .await
                .with_context(|| format!("unable to get partition table for device {}", device))?
        };
        parse_partprobe_table_type(&stdout).ok_or_else(|| Error::UnexpectedOutput {
            command: format!("{} -d -s {}", PARTPROBE, device),
            reason: format!("no partition table type in {:?}", stdout.trim()),
        })
    }

    async fn create_partition_table(&self, device: &str, table_type: &str) -> Result<()> {
        if table_type != PARTITION_GPT {
            return Err(Error::UnsupportedPartitionTable {
                device: device.to_string(),
                table_type: table_type.to_string(),
            });
        }
        let _guard = self.op_lock.lock().await;
        self.runner
            .run(SGDISK, &[device, "-o"])
            .await
            .with_context(|| format!("unable to create partition table for device {}", device))?;
        Ok(())
    }

    async fn create_partition(&self, device: &str, part_num: &str, label: &str) -> Result<()> {
        let new_part = format!("{}:0:0", part_num);
        let name = format!("{}:{}", part_num, label);
        let _guard = self.op_lock.lock().await;
        self.runner
            .run(SGDISK, &["-n", &new_part, "-c", &name, device])
            .await?;
        Ok(())
    }

    async fn set_partition_uuid(&self, device: &str, part_num: &str, part_uuid: &str) -> Result<()> {
        let arg = format!("{}:{}", part_num, part_uuid);
        let _guard = self.op_lock.lock().await;
        self.runner
            .run(SGDISK, &[device, "-u", &arg])
            .await
            .with_context(|| {
                format!("unable to set UUID {} for partition {} on {}", part_uuid, part_num, device)
            })?;
        Ok(())
    }

    async fn partition_uuid(&self, device: &str, part_num: &str) -> Result<String> {
        let info = format!("--info={}", part_num);
        let out = self.runner.run(SGDISK, &[device, &info]).await?;
        parse_unique_guid(&out.stdout).ok_or_else(|| Error::UnexpectedOutput {
            command: format!("{} {} {}", SGDISK, device, info),
            reason: format!("unable to get partition GUID for device {}", device),
        })
    }

    async fn delete_partition(&self, device: &str, part_num: &str) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        self.runner
            .run(SGDISK, &["-d", part_num, device])
            .await
            .with_context(|| {
                format!("unable to delete partition {:?} from device {}", part_num, device)
            })?;
        Ok(())
    }

    async fn sync_partition_table(&self, device: &str) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        self.runner
            .run(BLOCKDEV, &["--rereadpt", "-v", device])
            .await?;
        Ok(())
    }

    async fn partition_name_by_uuid(&self, device: &str, part_uuid: &str) -> Result<String> {
        if device.is_empty() || part_uuid.is_empty() {
            return Err(Error::PartitionNameNotFound {
                device: device.to_string(),
                uuid: part_uuid.to_string(),
            });
        }

        let devices = self.lister.block_devices(device).await?;
        let disk = devices.first().ok_or_else(|| Error::UnexpectedOutput {
            command: format!("lsblk {}", device),
            reason: "empty output".to_string(),
        })?;

        for child in &disk.children {
            if !child.partuuid.eq_ignore_ascii_case(part_uuid) {
                continue;
            }
            let name = child.name.replacen(device, "", 1);
            if name.is_empty() {
                return Err(Error::UnexpectedOutput {
                    command: format!("lsblk {}", device),
                    reason: format!("partition {} found but name is not present", part_uuid),
                });
            }
            return Ok(name);
        }

        Err(Error::PartitionNameNotFound {
            device: device.to_string(),
            uuid: part_uuid.to_string(),
        })
    }

    async fn device_has_partition_table(&self, device: &str) -> Result<bool> {
        let out = {
            let _guard = self.op_lock.lock().await;
            self.runner.run(FDISK, &["--list", device]).await?
        };
        Ok(out.stdout.contains(DISK_LABEL_KEY))
    }

    async fn device_has_partitions(&self, device: &str) -> Result<bool> {
        let devices = self.lister.block_devices(device).await?;
        match devices.as_slice() {
            [disk] => Ok(!disk.children.is_empty()),
            _ => Err(Error::UnexpectedOutput {
                command: format!("lsblk {}", device),
                reason: format!("expected one block device, got {}", devices.len()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linuxutils::lsblk::Lsblk;
    use crate::testing::ScriptedRunner;
    use assert_matches::assert_matches;
    use std::sync::Arc;
    use std::time::Duration;

    fn helper(runner: &Arc<ScriptedRunner>) -> PartitionHelper {
        PartitionHelper::new(runner.clone(), Arc::new(Lsblk::new(runner.clone())))
    }

    #[test]
    fn test_parse_partprobe() {
        assert_eq!(parse_partprobe_partitions("/dev/sdy: gpt partitions 1 2\n"), vec!["1", "2"]);
        assert!(parse_partprobe_partitions("/dev/sdy: gpt partitions\n").is_empty());
        assert!(parse_partprobe_partitions("").is_empty());
        assert_eq!(parse_partprobe_table_type("/dev/sda: msdos partitions 1").as_deref(), Some("msdos"));
        assert_eq!(parse_partprobe_table_type("/dev/sda:"), None);
    }

    #[test]
    fn test_parse_unique_guid() {
        let out = "Partition GUID code: 0FC63DAF-8483-4772-8E79-3D69D8477DE4 (Linux filesystem)\n\
                   Partition unique GUID: 5209CFD8-3AB1-4720-BCEA-DFA80315EC92\n\
                   First sector: 2048 (at 1024.0 KiB)\n";
        assert_eq!(
            parse_unique_guid(out).as_deref(),
            Some("5209cfd8-3ab1-4720-bcea-dfa80315ec92")
        );
        assert_eq!(parse_unique_guid("Partition #1 does not exist."), None);
    }

    #[tokio::test]
    async fn test_is_partition_exists_checks_slot() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("partprobe -d -s /dev/sdy", "/dev/sdy: gpt partitions 2\n");
        let helper = helper(&runner);
        assert!(!helper.is_partition_exists("/dev/sdy", "1").await.unwrap());
        assert!(helper.is_partition_exists("/dev/sdy", "2").await.unwrap());
    }

    #[tokio::test]
    async fn test_commands_issued() {
        let runner = Arc::new(ScriptedRunner::new());
        let helper = helper(&runner);
        helper.create_partition_table("/dev/sdz", "gpt").await.unwrap();
        helper.create_partition("/dev/sdz", "1", "CSI").await.unwrap();
        helper
            .set_partition_uuid("/dev/sdz", "1", "64be631b-62a5-11e9-a756-00505680d67f")
            .await
            .unwrap();
        helper.sync_partition_table("/dev/sdz").await.unwrap();
        helper.delete_partition("/dev/sdz", "1").await.unwrap();

        assert_eq!(
            runner.calls(),
            vec![
                "sgdisk /dev/sdz -o",
                "sgdisk -n 1:0:0 -c 1:CSI /dev/sdz",
                "sgdisk /dev/sdz -u 1:64be631b-62a5-11e9-a756-00505680d67f",
                "blockdev --rereadpt -v /dev/sdz",
                "sgdisk -d 1 /dev/sdz",
            ]
        );
    }

    #[tokio::test]
    async fn test_unsupported_table_type_never_runs_sgdisk() {
        let runner = Arc::new(ScriptedRunner::new());
        let res = helper(&runner).create_partition_table("/dev/sdz", "msdos").await;
        assert_matches!(res, Err(Error::UnsupportedPartitionTable { .. }));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_partition_name_by_uuid() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond(
            "lsblk /dev/nvme0n1",
            r#"{"blockdevices":[{"name":"/dev/nvme0n1","type":"disk","size":1000,
                "children":[{"name":"/dev/nvme0n1p1","type":"part","size":900,
                "partuuid":"5209CFD8-3AB1-4720-BCEA-DFA80315EC92"}]}]}"#,
        );
        let helper = helper(&runner);
        assert_eq!(
            helper
                .partition_name_by_uuid("/dev/nvme0n1", "5209cfd8-3ab1-4720-bcea-dfa80315ec92")
                .await
                .unwrap(),
            "p1"
        );
        assert_matches!(
            helper.partition_name_by_uuid("/dev/nvme0n1", "other").await,
            Err(Error::PartitionNameNotFound { .. })
        );
        assert!(helper.device_has_partitions("/dev/nvme0n1").await.unwrap());
    }

    #[tokio::test]
    async fn test_partprobe_failure_is_wrapped() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail("partprobe", 1, "Error: Could not stat device");
        let err = helper(&runner)
            .is_partition_exists("/dev/missing", "1")
            .await
            .unwrap_err();
        assert!(err
            .to_string()
            .starts_with("unable to check partition \"1\" existence for /dev/missing"));
        assert_eq!(err.stderr(), Some("Error: Could not stat device"));
    }

    #[tokio::test]
    async fn test_table_commands_run_one_at_a_time() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.set_latency(Duration::from_millis(10));
        let helper = Arc::new(helper(&runner));

        let mut tasks = Vec::new();
        for device in ["/dev/sda", "/dev/sdb", "/dev/sdc", "/dev/sdd"] {
            let helper = helper.clone();
            tasks.push(tokio::spawn(async move {
                helper.is_partition_exists(device, "1").await?;
                helper.partition_table_type(device).await.ok();
                helper.create_partition_table(device, "gpt").await?;
                helper.create_partition(device, "1", "CSI").await?;
                helper.set_partition_uuid(device, "1", "5209cfd8-3ab1-4720-bcea-dfa80315ec92").await?;
                helper.sync_partition_table(device).await?;
                helper.device_has_partition_table(device).await?;
                helper.delete_partition(device, "1").await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(runner.calls().len(), 32);
        assert_eq!(runner.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_uuid_reads_are_not_serialized() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.set_latency(Duration::from_millis(10));
        let helper = Arc::new(helper(&runner));

        let mut tasks = Vec::new();
        for device in ["/dev/sda", "/dev/sdb", "/dev/sdc"] {
            let helper = helper.clone();
            tasks.push(tokio::spawn(async move {
                helper.partition_uuid(device, "1").await.ok()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(runner.max_in_flight() > 1);
    }
}
