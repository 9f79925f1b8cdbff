//! Partition UUID derivation from volume ids
//!
//! The partition UUID is the only link between a volume and its partition
//! on disk, so the derivation must stay stable across releases.

use crate::error::{Error, Result};
use uuid::Uuid;

const PVC_PREFIX: &str = "pvc-";

/// Namespace for name-based partition UUIDs
const VOLUME_NAMESPACE: Uuid = Uuid::from_u128(0x6f1b_2c2e_9d7a_4c55_a0de_5b3e_7c1d_9a42);

/// Derive the partition UUID for a volume id
///
/// A `pvc-` prefix is stripped. If the rest is already a UUID it is used
/// as is (lower-cased); anything else gets a name-based UUID over the full
/// volume id.
pub fn volume_uuid(volume_id: &str) -> Result<String> {
    if volume_id.is_empty() {
        return Err(Error::InvalidVolume("volume ID is empty".to_string()));
    }
    let trimmed = volume_id.strip_prefix(PVC_PREFIX).unwrap_or(volume_id);
    if trimmed.is_empty() {
        return Err(Error::InvalidVolume(format!(
            "volume UUID is empty for volume ID {:?}",
            volume_id
        )));
    }

    match Uuid::try_parse(trimmed) {
        Ok(uuid) => Ok(uuid.hyphenated().to_string()),
        Err(_) => Ok(Uuid::new_v5(&VOLUME_NAMESPACE, volume_id.as_bytes())
            .hyphenated()
            .to_string()),
    }
}
