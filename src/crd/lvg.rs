//! LogicalVolumeGroup CRD

use crate::domain::ports::VolumeGroupInfo;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A volume group on a node, built from one or more drives
///
/// For groups on the system disk the record name differs from the volume
/// group name on the node; `spec.name` always holds the real one.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "storage.billyronks.io",
    version = "v1",
    kind = "LogicalVolumeGroup",
    plural = "logicalvolumegroups",
    shortname = "lvg",
    printcolumn = r#"{"name": "VG", "type": "string", "jsonPath": ".spec.name"}"#,
    printcolumn = r#"{"name": "Node", "type": "string", "jsonPath": ".spec.node"}"#,
    printcolumn = r#"{"name": "Size", "type": "integer", "jsonPath": ".spec.size"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct LogicalVolumeGroupSpec {
    /// Volume group name on the node; falls back to the record name
    #[serde(default)]
    pub name: String,

    pub node: String,

    /// UUIDs of the drives backing the group
    #[serde(default)]
    pub locations: Vec<String>,

    /// Size in bytes
    #[serde(default)]
    pub size: u64,

    #[serde(default)]
    pub health: String,
}

impl From<&LogicalVolumeGroup> for VolumeGroupInfo {
    fn from(lvg: &LogicalVolumeGroup) -> Self {
        let name = if lvg.spec.name.is_empty() {
            lvg.name_any()
        } else {
            lvg.spec.name.clone()
        };
        VolumeGroupInfo {
            name,
            node_id: lvg.spec.node.clone(),
            locations: lvg.spec.locations.clone(),
            size: lvg.spec.size,
        }
    }
}
