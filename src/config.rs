//! Engine configuration
//!
//! Every field has a default, so an empty YAML document (or no file at all)
//! yields a working configuration.

use crate::error::{Error, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// GPT is the only partition table type the engine creates
pub const PARTITION_GPT: &str = "gpt";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub partition: PartitionConfig,
    pub fs: FsConfig,
    pub lvm: LvmConfig,
}

impl EngineConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read config {}", path.display()))?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.partition.table_type != PARTITION_GPT {
            return Err(Error::Configuration(format!(
                "partition table type {:?} is not supported, only {} is",
                self.partition.table_type, PARTITION_GPT
            )));
        }
        if self.partition.number.is_empty() || self.partition.number.parse::<u32>().is_err() {
            return Err(Error::Configuration(format!(
                "partition number {:?} is not a slot number",
                self.partition.number
            )));
        }
        if self.partition.name_retry.attempts == 0 {
            return Err(Error::Configuration(
                "partition.name_retry.attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Partition Settings
// =============================================================================

/// Settings for the managed partition on whole drives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    /// Partition label written by sgdisk
    pub label: String,
    /// Partition slot; one managed partition per device
    pub number: String,
    pub table_type: String,
    pub name_retry: RetryPolicy,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            label: "CSI".to_string(),
            number: "1".to_string(),
            table_type: PARTITION_GPT.to_string(),
            name_retry: RetryPolicy::default(),
        }
    }
}

/// Bounded retry with a fixed delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub attempts: u32,
    #[serde(with = "duration_secs")]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    /// Policy without any waiting, used by tests
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            delay: Duration::ZERO,
        }
    }
}

// =============================================================================
// Filesystem / LVM Settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// Mount table consulted by is_mounted
    pub mount_info_file: String,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            mount_info_file: "/proc/self/mountinfo".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LvmConfig {
    pub lvm_path: String,
}

impl Default for LvmConfig {
    fn default() -> Self {
        Self {
            lvm_path: "/sbin/lvm".to_string(),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom(format!("invalid delay {}", secs)));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}
