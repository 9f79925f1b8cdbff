//! Block device listing via lsblk

use crate::domain::ports::{BlockDevice, BlockDeviceLister, CommandRunnerRef, DriveInfo};
use crate::error::{Error, Result, ResultExt};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

pub const LSBLK: &str = "lsblk";

/// Columns requested from lsblk
pub const OUTPUT_COLUMNS: &str =
    "NAME,TYPE,SIZE,ROTA,SERIAL,WWN,VENDOR,MODEL,REV,MOUNTPOINT,FSTYPE,PARTUUID";

const ROM_TYPE: &str = "rom";

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<BlockDevice>,
}

/// Parse `lsblk --json` output, dropping optical drives
pub fn parse_lsblk_output(raw: &str) -> Result<Vec<BlockDevice>> {
    let out: LsblkOutput = serde_json::from_str(raw)?;
    Ok(out
        .blockdevices
        .into_iter()
        .filter(|d| d.device_type != ROM_TYPE)
        .collect())
}

/// Find the device whose serial number matches, ignoring case
pub fn find_by_serial<'a>(devices: &'a [BlockDevice], serial: &str) -> Option<&'a BlockDevice> {
    devices
        .iter()
        .find(|d| !d.serial.is_empty() && d.serial.eq_ignore_ascii_case(serial))
}

/// lsblk-backed [`BlockDeviceLister`]
#[derive(Clone)]
pub struct Lsblk {
    runner: CommandRunnerRef,
}

impl Lsblk {
    pub fn new(runner: CommandRunnerRef) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl BlockDeviceLister for Lsblk {
    async fn block_devices(&self, device: &str) -> Result<Vec<BlockDevice>> {
        let mut args = Vec::with_capacity(8);
        if !device.is_empty() {
            args.push(device);
        }
        args.extend_from_slice(&["--paths", "--json", "--bytes", "--fs", "--output", OUTPUT_COLUMNS]);

        let out = self.runner.run(LSBLK, &args).await?;
        parse_lsblk_output(&out.stdout).with_context(|| {
            format!("unable to parse lsblk output for device {:?}", device)
        })
    }

    async fn search_drive_path(&self, drive: &DriveInfo) -> Result<String> {
        if !drive.path.is_empty() {
            return Ok(drive.path.clone());
        }

        let devices = self.block_devices("").await?;
        match find_by_serial(&devices, &drive.serial_number) {
            Some(dev) => {
                debug!("drive {} resolved to {}", drive.uuid, dev.name);
                Ok(dev.name.clone())
            }
            None => Err(Error::DevicePathNotFound {
                serial: drive.serial_number.clone(),
            }),
        }
    }
}
