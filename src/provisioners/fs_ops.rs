//! Filesystem Operations
//!
//! Idempotent mount, unmount and filesystem creation on top of [`FsTool`](crate::domain::ports::FsTool).

use crate::domain::ports::{FileSystem, FsToolRef};
use crate::error::{Error, Result, ResultExt};
use crate::linuxutils::fs::{BIND_OPTION, MOUNT_OPTIONS_FLAG};
use std::io::ErrorKind as IoErrorKind;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct FsOperations {
    tool: FsToolRef,
}

impl FsOperations {
    pub fn new(tool: FsToolRef) -> Self {
        Self { tool }
    }

    /// Mount `src` on `dst`, creating `dst` when it is missing
    ///
    /// An already mounted `dst` is left alone. If the mount fails, a `dst`
    /// created by this call is removed again; a pre-existing one is kept.
    pub async fn prepare_and_perform_mount(
        &self,
        src: &str,
        dst: &str,
        bind: bool,
        dst_is_dir: bool,
        mount_options: &[&str],
    ) -> Result<()> {
        info!(method = "PrepareAndPerformMount", "Processing for source {}, destination {}", src, dst);

        let was_created = match tokio::fs::metadata(dst).await {
            Ok(_) => false,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                if dst_is_dir {
                    self.tool.mk_dir(dst).await?;
                } else {
                    self.tool.mk_file(dst).await?;
                }
                true
            }
            Err(e) => return Err(Error::Io(e).context(format!("unable to stat {}", dst))),
        };

        if !was_created {
            let mounted = self.tool.is_mounted(dst).await.with_context(|| {
                format!("unable to determine whether {} is a mountpoint or no", dst)
            })?;
            if mounted {
                info!("{} has already mounted to {}", src, dst);
                return Ok(());
            }
        }

        let mut opts = Vec::new();
        if bind {
            opts.push(BIND_OPTION.to_string());
        }
        if !mount_options.is_empty() {
            opts.push(MOUNT_OPTIONS_FLAG.to_string());
            opts.push(mount_options.join(","));
        }

        if let Err(e) = self.tool.mount(src, dst, &opts).await {
            if was_created {
                if let Err(rm_err) = self.tool.rm_dir(dst).await {
                    warn!("failed to remove {} after failed mount: {}", dst, rm_err);
                }
            }
            self.log_mount_diagnostics(src).await;
            return Err(e.context(format!("unable to mount {} to {}", src, dst)));
        }
        Ok(())
    }

    // Best effort only: never changes the outcome of the mount call
    async fn log_mount_diagnostics(&self, src: &str) {
        match tokio::fs::metadata(src).await {
            Ok(meta) => debug!("Stat of src with failed mount: {:?}", meta),
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                debug!("src path ({}) is not exists", src)
            }
            Err(e) => warn!("failed to get src {} stat: {}", src, e),
        }

        match self.tool.is_mounted(src).await {
            Err(e) => warn!("failed to execute isMount: {}", e),
            Ok(false) => debug!("Src {} is not mounted", src),
            Ok(true) => match self.tool.find_mount_point(src).await {
                Err(e) => warn!("failed to find mountPoint for src {}: {}", src, e),
                Ok(mount_point) => {
                    debug!("Src mount point: {}", mount_point);
                    match self.tool.fs_space(&mount_point).await {
                        Ok(space) => debug!("FS Space on {}, is {}", mount_point, space),
                        Err(e) => warn!("failed to get FS Space on {}, err: {}", mount_point, e),
                    }
                }
            },
        }
    }

    /// Unmount `path` if it is mounted
    pub async fn unmount_with_check(&self, path: &str) -> Result<()> {
        let mounted = self
            .tool
            .is_mounted(path)
            .await
            .context("unable to check whether path mounted or no")?;
        if !mounted {
            info!(method = "Unmount", "Path {} is not mounted", path);
            return Ok(());
        }
        self.tool.unmount(path).await
    }

    /// Create `fs_type` on `device` unless it is already there
    ///
    /// A different filesystem on the device is a conflict and is left intact.
    pub async fn create_fs_if_not_exist(&self, fs_type: FileSystem, device: &str) -> Result<()> {
        let current = self
            .tool
            .fs_type(device)
            .await
            .with_context(|| format!("unable to determine file system on {}", device))?;

        if current.is_empty() {
            return self.tool.create_fs(fs_type, device).await;
        }
        if current == fs_type.as_str() {
            info!("File system {} already exists on {}", current, device);
            return Ok(());
        }
        Err(Error::FilesystemConflict {
            device: device.to_string(),
            expected: fs_type.to_string(),
            actual: current,
        })
    }

    // =========================================================================
    // Passthroughs
    // =========================================================================

    /// Create a filesystem without checking what is on the device
    pub async fn create_fs(&self, fs_type: FileSystem, device: &str) -> Result<()> {
        self.tool.create_fs(fs_type, device).await
    }

    pub async fn wipe_fs(&self, device: &str) -> Result<()> {
        self.tool.wipe_fs(device).await
    }

    pub async fn fs_type(&self, device: &str) -> Result<String> {
        self.tool.fs_type(device).await
    }

    pub async fn is_mounted(&self, path: &str) -> Result<bool> {
        self.tool.is_mounted(path).await
    }

    pub async fn mount(&self, src: &str, dst: &str, opts: &[String]) -> Result<()> {
        self.tool.mount(src, dst, opts).await
    }

    pub async fn unmount(&self, path: &str) -> Result<()> {
        self.tool.unmount(path).await
    }

    pub async fn fs_space(&self, path: &str) -> Result<u64> {
        self.tool.fs_space(path).await
    }

    pub async fn find_mount_point(&self, target: &str) -> Result<String> {
        self.tool.find_mount_point(target).await
    }
}
