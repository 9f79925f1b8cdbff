//! Partition Operations
//!
//! Idempotent create and delete of the single managed partition on a drive.
//! The partition UUID is the identity of a volume on disk: a partition in
//! the managed slot with a different UUID is never touched.

use crate::config::{RetryPolicy, PARTITION_GPT};
use crate::domain::ports::PartitionToolRef;
use crate::error::{Error, Result, ResultExt};
use crate::metrics;
use tracing::{debug, error, info, warn};

/// stderr of blockdev when the kernel cannot re-read a table in use
const DEVICE_BUSY: &str = "Device or resource busy";

// =============================================================================
// Partition
// =============================================================================

/// A partition as the provisioners see it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    /// Whole device, e.g. `/dev/sda`
    pub device: String,
    /// Kernel-assigned suffix, e.g. `1` or `p1`; empty until resolved
    pub name: String,
    /// Requested partition slot
    pub num: String,
    pub table_type: String,
    pub label: String,
    pub part_uuid: String,
    /// UUID is assigned by the partitioning tool instead of the caller
    pub ephemeral: bool,
}

impl Partition {
    /// Device file of the partition
    pub fn full_path(&self) -> String {
        format!("{}{}", self.device, self.name)
    }
}

/// Partitioning state of a whole device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceLayout {
    /// `None` when the device carries no partition table
    pub table_type: Option<String>,
    pub has_partitions: bool,
}

// =============================================================================
// Partition Operations
// =============================================================================

#[derive(Clone)]
pub struct PartitionOperations {
    tool: PartitionToolRef,
    name_retry: RetryPolicy,
}

impl PartitionOperations {
    pub fn new(tool: PartitionToolRef, name_retry: RetryPolicy) -> Self {
        Self { tool, name_retry }
    }

    /// Underlying partition tool
    pub fn tool(&self) -> &PartitionToolRef {
        &self.tool
    }

    /// Bring `p` into existence and return it with its name resolved
    ///
    /// Repeating the call with the same partition is a no-op. For
    /// ephemeral partitions the returned `part_uuid` is the one assigned
    /// by the partitioning tool, or the one already on disk when the slot
    /// is taken, and has to be kept by the caller.
    pub async fn prepare_partition(&self, mut p: Partition) -> Result<Partition> {
        let _timer = metrics::partition_operations().map(|m| m.start_timer("PreparePartition"));
        debug!(method = "PreparePartition", volume_id = %p.part_uuid, "Processing for partition {:?}", p);

        let exists = self
            .tool
            .is_partition_exists(&p.device, &p.num)
            .await
            .context("unable to determine partition existence")?;

        if exists {
            let current = self.tool.partition_uuid(&p.device, &p.num).await.with_context(|| {
                format!("partition has already exist on device {}, fail to get it UUID", p.device)
            })?;
            if p.ephemeral {
                info!(device = %p.device, "Ephemeral partition already exists with UUID {}", current);
                p.part_uuid = current;
            } else if !current.eq_ignore_ascii_case(&p.part_uuid) {
                return Err(Error::PartitionConflict {
                    device: p.device.clone(),
                    partition: p.num.clone(),
                    expected: p.part_uuid.clone(),
                    actual: current,
                });
            }
            info!(method = "PreparePartition", device = %p.device, "Partition has already prepared");
            p.name = self.resolve_name(&p.device, &p.part_uuid).await?;
            return Ok(p);
        }

        if p.table_type != PARTITION_GPT {
            return Err(Error::UnsupportedPartitionTable {
                device: p.device.clone(),
                table_type: p.table_type.clone(),
            });
        }

        self.tool
            .create_partition_table(&p.device, &p.table_type)
            .await
            .context("unable to create partition table")?;
        self.tool
            .create_partition(&p.device, &p.num, &p.label)
            .await
            .context("unable to create partition")?;

        if let Err(e) = self.tool.sync_partition_table(&p.device).await {
            warn!("Unable to sync partition table for device {}: {}", p.device, e);
        }

        if p.ephemeral {
            p.part_uuid = self
                .tool
                .partition_uuid(&p.device, &p.num)
                .await
                .with_context(|| format!("unable to read UUID of new partition on {}", p.device))?;
            info!(device = %p.device, "Ephemeral partition got UUID {}", p.part_uuid);
        } else {
            self.tool
                .set_partition_uuid(&p.device, &p.num, &p.part_uuid)
                .await?;
        }

        p.name = self.resolve_name(&p.device, &p.part_uuid).await?;
        info!(method = "PreparePartition", "Partition was created successfully {:?}", p);
        Ok(p)
    }

    /// Report the partition table and partitions found on `device`
    pub async fn describe_device(&self, device: &str) -> Result<DeviceLayout> {
        let _timer = metrics::partition_operations().map(|m| m.start_timer("DescribeDevice"));

        let has_table = self
            .tool
            .device_has_partition_table(device)
            .await
            .with_context(|| format!("unable to check partition table of {}", device))?;
        if !has_table {
            return Ok(DeviceLayout::default());
        }
        let table_type = self.tool.partition_table_type(device).await?;
        let has_partitions = self
            .tool
            .device_has_partitions(device)
            .await
            .with_context(|| format!("unable to list partitions of {}", device))?;
        Ok(DeviceLayout {
            table_type: Some(table_type),
            has_partitions,
        })
    }

    /// Delete the partition in slot `p.num`; absent partitions are fine
    pub async fn release_partition(&self, p: &Partition) -> Result<()> {
        let _timer = metrics::partition_operations().map(|m| m.start_timer("ReleasePartition"));
        info!(method = "ReleasePartition", volume_id = %p.part_uuid, "Processing for {:?}", p);

        let exists = self
            .tool
            .is_partition_exists(&p.device, &p.num)
            .await
            .context("unable to determine partition existence")?;
        if !exists {
            debug!("partition {} on {} is already absent", p.num, p.device);
            return Ok(());
        }
        self.tool.delete_partition(&p.device, &p.num).await
    }

    /// Resolve the partition suffix for `part_uuid` on `device`
    ///
    /// Device nodes for a freshly written table show up asynchronously, so
    /// every attempt re-reads the table, waits and looks again. `None`
    /// means the partition was not found within the retry budget.
    pub async fn search_part_name(&self, device: &str, part_uuid: &str) -> Option<String> {
        let _timer = metrics::partition_operations().map(|m| m.start_timer("SearchPartName"));
        debug!(method = "SearchPartName", volume_id = %part_uuid, "Search partition number for device {}", device);

        for attempt in 1..=self.name_retry.attempts {
            if let Err(e) = self.tool.sync_partition_table(device).await {
                if e.stderr().is_some_and(|s| s.contains(DEVICE_BUSY)) {
                    warn!("Unable to sync partition table for device {} due to device is busy: {}", device, e);
                } else {
                    error!("Unable to sync partition table for device {}: {}", device, e);
                }
            }

            if !self.name_retry.delay.is_zero() {
                tokio::time::sleep(self.name_retry.delay).await;
            }

            match self.tool.partition_name_by_uuid(device, part_uuid).await {
                Ok(name) => {
                    debug!("Got partition name {} on attempt {}", name, attempt);
                    return Some(name);
                }
                Err(e) => warn!("Unable to find part name (attempt {}): {}", attempt, e),
            }
        }

        error!("Partition {} not found on {}", part_uuid, device);
        None
    }

    async fn resolve_name(&self, device: &str, part_uuid: &str) -> Result<String> {
        self.search_part_name(device, part_uuid)
            .await
            .ok_or_else(|| Error::PartitionNameNotFound {
                device: device.to_string(),
                uuid: part_uuid.to_string(),
            })
            .context("unable to determine partition name after it being created")
    }
}
