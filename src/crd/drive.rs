//! Drive CRD
//!
//! One record per physical drive on a node. The provisioning engine only
//! reads these; the drive inventory controller owns them.

use crate::domain::ports::DriveInfo;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// Drive CRD
// =============================================================================

/// A block device known to the cluster, identified by UUID and serial number
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "storage.billyronks.io",
    version = "v1",
    kind = "Drive",
    plural = "drives",
    shortname = "drv",
    printcolumn = r#"{"name": "Node", "type": "string", "jsonPath": ".spec.nodeId"}"#,
    printcolumn = r#"{"name": "Serial", "type": "string", "jsonPath": ".spec.serialNumber"}"#,
    printcolumn = r#"{"name": "Path", "type": "string", "jsonPath": ".spec.path"}"#,
    printcolumn = r#"{"name": "Type", "type": "string", "jsonPath": ".spec.type"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct DriveSpec {
    /// Drive UUID, also used as the record name
    pub uuid: String,

    pub serial_number: String,

    /// Device node, empty until discovered
    #[serde(default)]
    pub path: String,

    pub node_id: String,

    /// Capacity in bytes
    #[serde(default)]
    pub size: u64,

    /// Media type (HDD, SSD, NVME)
    #[serde(default, rename = "type")]
    pub drive_type: String,

    #[serde(default)]
    pub vid: String,

    #[serde(default)]
    pub pid: String,

    /// Health reported by the inventory controller
    #[serde(default)]
    pub health: String,
}

impl From<&DriveSpec> for DriveInfo {
    fn from(spec: &DriveSpec) -> Self {
        DriveInfo {
            uuid: spec.uuid.clone(),
            serial_number: spec.serial_number.clone(),
            path: spec.path.clone(),
            node_id: spec.node_id.clone(),
            size: spec.size,
        }
    }
}

impl From<&Drive> for DriveInfo {
    fn from(drive: &Drive) -> Self {
        DriveInfo::from(&drive.spec)
    }
}
