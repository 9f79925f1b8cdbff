//! Filesystem and mount commands

use crate::domain::ports::{CommandRunnerRef, FileSystem, FsTool};
use crate::error::{Error, Result, ResultExt};
use async_trait::async_trait;
use std::borrow::Cow;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

pub const WIPEFS: &str = "wipefs";
pub const LSBLK: &str = "lsblk";
pub const DF: &str = "df";
pub const FINDMNT: &str = "findmnt";
pub const MOUNT: &str = "mount";
pub const UMOUNT: &str = "umount";

pub const BIND_OPTION: &str = "--bind";
pub const MOUNT_OPTIONS_FLAG: &str = "-o";

/// Options that let mkfs.ext* skip eager inode table and journal zeroing
const EXT_LAZY_INIT_OPTS: &str = "lazy_journal_init=1,lazy_itable_init=1,discard";

const MIB: u64 = 1024 * 1024;

/// Free bytes from `df <path> --output=target,avail --block-size=M`
///
/// ```text
/// Mounted on Avail
/// /dev       7982M
/// ```
pub fn parse_df_avail(stdout: &str) -> Result<u64> {
    for line in stdout.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [_, .., avail] = fields.as_slice() else {
            continue;
        };
        let mib: u64 = avail
            .trim_end_matches('M')
            .parse()
            .map_err(|_| Error::CapacityParse(format!("{:?} in df output", avail)))?;
        return Ok(mib * MIB);
    }
    Err(Error::CapacityParse(format!("wrong df output {:?}", stdout)))
}

/// Decode the octal escapes (`\040` for space, `\011`, `\012`, `\134`)
/// the kernel writes into mountinfo paths
pub fn unescape_mountinfo_field(field: &str) -> Cow<'_, str> {
    if !field.contains('\\') {
        return Cow::Borrowed(field);
    }
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let code = digits.iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(code) = u8::try_from(code) {
                    out.push(code);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    Cow::Owned(String::from_utf8_lossy(&out).into_owned())
}

/// Whether `path` is a whole field of any mountinfo line
pub fn mountinfo_contains(mountinfo: &str, path: &str) -> bool {
    mountinfo.lines().any(|line| {
        line.split_whitespace()
            .any(|field| unescape_mountinfo_field(field) == path)
    })
}

/// Command-backed [`FsTool`]
pub struct FsHelper {
    runner: CommandRunnerRef,
    mount_info_file: PathBuf,
    op_lock: Mutex<()>,
}

impl FsHelper {
    pub fn new(runner: CommandRunnerRef, mount_info_file: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            mount_info_file: mount_info_file.into(),
            op_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl FsTool for FsHelper {
    async fn fs_space(&self, path: &str) -> Result<u64> {
        let out = self
            .runner
            .run(DF, &[path, "--output=target,avail", "--block-size=M"])
            .await?;
        parse_df_avail(&out.stdout)
    }

    async fn mk_dir(&self, path: &str) -> Result<()> {
        tokio::fs::create_dir_all(path)
            .await
            .with_context(|| format!("failed to create dir {}", path))
    }

    async fn mk_file(&self, path: &str) -> Result<()> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => Err(Error::InvalidVolume(format!(
                "existing path {} is a directory",
                path
            ))),
            Ok(_) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                if let Some(parent) = Path::new(path).parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .with_context(|| format!("failed to create parent dir of {}", path))?;
                }
                tokio::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(path)
                    .await
                    .with_context(|| format!("failed to create file {}", path))?;
                Ok(())
            }
            Err(e) => Err(Error::Io(e).context(format!("unable to stat {}", path))),
        }
    }

    async fn rm_dir(&self, path: &str) -> Result<()> {
        let res = match tokio::fs::symlink_metadata(path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
            Ok(_) => tokio::fs::remove_file(path).await,
            Err(e) => Err(e),
        };
        match res {
            Err(e) if e.kind() != IoErrorKind::NotFound => {
                Err(Error::Io(e).context(format!("failed to delete path {}", path)))
            }
            _ => Ok(()),
        }
    }

    async fn create_fs(&self, fs_type: FileSystem, device: &str) -> Result<()> {
        let program = format!("mkfs.{}", fs_type);
        let res = match fs_type {
            FileSystem::Xfs => self.runner.run(&program, &[device]).await,
            FileSystem::Ext4 | FileSystem::Ext3 => {
                self.runner
                    .run(&program, &[device, "-E", EXT_LAZY_INIT_OPTS])
                    .await
            }
        };
        res.with_context(|| format!("failed to create file system on {}", device))?;
        Ok(())
    }

    async fn wipe_fs(&self, device: &str) -> Result<()> {
        self.runner
            .run(WIPEFS, &["-af", device])
            .await
            .with_context(|| format!("failed to wipe file system on {}", device))?;
        Ok(())
    }

    async fn fs_type(&self, device: &str) -> Result<String> {
        let out = self
            .runner
            .run(LSBLK, &[device, "--output", "FSTYPE", "--noheadings"])
            .await?;
        Ok(out.stdout.trim().to_string())
    }

    async fn is_mounted(&self, path: &str) -> Result<bool> {
        let mountinfo = {
            let _guard = self.op_lock.lock().await;
            tokio::fs::read_to_string(&self.mount_info_file)
                .await
                .with_context(|| format!("unable to check whether {} mounted or no", path))?
        };
        if mountinfo.is_empty() {
            return Err(Error::UnexpectedOutput {
                command: format!("read {}", self.mount_info_file.display()),
                reason: format!("empty mount table while checking {}", path),
            });
        }
        let mounted = mountinfo_contains(&mountinfo, path);
        debug!("path {} mounted: {}", path, mounted);
        Ok(mounted)
    }

    async fn find_mount_point(&self, target: &str) -> Result<String> {
        let out = self
            .runner
            .run(FINDMNT, &["--target", target, "--output", "SOURCE", "--noheadings"])
            .await?;
        Ok(out.stdout.trim().to_string())
    }

    async fn mount(&self, src: &str, dst: &str, opts: &[String]) -> Result<()> {
        let mut args: Vec<&str> = opts.iter().map(String::as_str).collect();
        args.push(src);
        args.push(dst);

        let _guard = self.op_lock.lock().await;
        self.runner.run(MOUNT, &args).await?;
        Ok(())
    }

    async fn unmount(&self, path: &str) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        self.runner.run(UMOUNT, &[path]).await?;
        Ok(())
    }
}
