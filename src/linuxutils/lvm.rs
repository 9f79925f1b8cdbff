//! LVM commands
//!
//! Every command goes through the `lvm` multiplexer binary. Create and
//! remove calls are idempotent: the stderr lvm prints for "already there"
//! or "already gone" is treated as success.

use crate::domain::ports::{CommandRunnerRef, LvmTool};
use crate::error::{Error, Result, ResultExt};
use async_trait::async_trait;
use tracing::{debug, info};

const NO_PV_LABEL: &str = "No PV label found";
const ALREADY_EXISTS: &str = "already exists";
const NOT_FOUND: &str = "not found";
const LV_NOT_FOUND: &str = "Failed to find logical volume";

/// Swallow a command failure whose stderr contains `pattern`
fn tolerate(res: Result<()>, pattern: &str) -> Result<()> {
    match res {
        Err(e) if e.stderr().is_some_and(|s| s.contains(pattern)) => {
            debug!("ignoring lvm error: {}", e);
            Ok(())
        }
        other => other,
    }
}

/// Parse `vgs --units b` output such as `  10737418240B`
pub fn parse_vg_free(stdout: &str) -> Result<u64> {
    let raw = stdout.trim();
    raw.trim_end_matches(['B', 'b'])
        .parse()
        .map_err(|_| Error::CapacityParse(format!("unable to parse VG free space {:?}", raw)))
}

/// Command-backed [`LvmTool`]
#[derive(Clone)]
pub struct LvmHelper {
    runner: CommandRunnerRef,
    lvm_path: String,
}

impl LvmHelper {
    pub fn new(runner: CommandRunnerRef, lvm_path: impl Into<String>) -> Self {
        Self {
            runner,
            lvm_path: lvm_path.into(),
        }
    }

    async fn lvm(&self, args: &[&str]) -> Result<String> {
        Ok(self.runner.run(&self.lvm_path, args).await?.stdout)
    }
}

#[async_trait]
impl LvmTool for LvmHelper {
    async fn pv_create(&self, device: &str) -> Result<()> {
        self.lvm(&["pvcreate", "--yes", device]).await?;
        Ok(())
    }

    async fn pv_remove(&self, device: &str) -> Result<()> {
        let res = self.lvm(&["pvremove", "--yes", device]).await.map(|_| ());
        tolerate(res, NO_PV_LABEL)
    }

    async fn vg_create(&self, name: &str, pvs: &[String]) -> Result<()> {
        let mut args = vec!["vgcreate", "--yes", name];
        args.extend(pvs.iter().map(String::as_str));
        let res = self.lvm(&args).await.map(|_| ());
        tolerate(res, ALREADY_EXISTS)
    }

    async fn vg_remove(&self, name: &str) -> Result<()> {
        let res = self.lvm(&["vgremove", "--yes", name]).await.map(|_| ());
        tolerate(res, NOT_FOUND)
    }

    async fn lv_create(&self, name: &str, size: &str, vg_name: &str) -> Result<()> {
        info!("creating LV {} of size {} in VG {}", name, size, vg_name);
        let res = self
            .lvm(&["lvcreate", "--yes", "--name", name, "--size", size, vg_name])
            .await
            .map(|_| ());
        tolerate(res, ALREADY_EXISTS)
    }

    async fn lv_remove(&self, full_lv_name: &str) -> Result<()> {
        let res = self.lvm(&["lvremove", "--yes", full_lv_name]).await.map(|_| ());
        tolerate(res, LV_NOT_FOUND)
    }

    async fn lvs_in_vg(&self, vg_name: &str) -> Result<Vec<String>> {
        let select = format!("vg_name={}", vg_name);
        let stdout = self
            .lvm(&["lvs", "--select", &select, "-o", "lv_name", "--noheadings"])
            .await
            .with_context(|| format!("unable to list LVs in VG {}", vg_name))?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn vg_free_space(&self, vg_name: &str) -> Result<u64> {
        if vg_name.is_empty() {
            return Err(Error::InvalidVolume("VG name shouldn't be an empty string".to_string()));
        }
        let stdout = self
            .lvm(&["vgs", vg_name, "--options", "vg_free", "--units", "b", "--noheadings"])
            .await?;
        parse_vg_free(&stdout)
    }
}
