//! Volume Engine CLI
//!
//! Runs one provisioning step for one volume on the local node:
//!
//! ```text
//! volume-engine prepare --id pvc-... --location <drive uuid | lvg> --storage-class HDD
//! volume-engine path    --volume-json '{"id": "...", ...}'
//! volume-engine release --id ... --location ... --storage-class SSDLVG
//! volume-engine mount   /dev/sdb1 /var/lib/kubelet/... -o noatime
//! volume-engine unmount /var/lib/kubelet/...
//! volume-engine inspect /dev/sdb
//! volume-engine vg create vg-data /dev/sdb /dev/sdc
//! ```

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use volume_engine::domain::ports::CommandRunnerRef;
use volume_engine::linuxutils::{FsHelper, Lsblk, LvmHelper, PartitionHelper, SystemExecutor};
use volume_engine::{
    metrics, EngineConfig, Error, FsOperations, KubeRepository, PartitionOperations, Provisioner,
    Provisioners, Result, SelectedProvisioner, StorageClass, Volume, VolumeGroupOperations,
    VolumeMode,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Volume Engine - node-local partitions, logical volumes and mounts
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Engine configuration file (YAML)
    #[arg(long, env = "VOLUME_ENGINE_CONFIG")]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Print collected metrics after the command
    #[arg(long)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the partition or logical volume and its filesystem
    Prepare(VolumeArgs),
    /// Wipe and remove the partition or logical volume
    Release(VolumeArgs),
    /// Print the device path of the volume
    Path(VolumeArgs),
    /// Mount a device or bind mount a path
    Mount {
        src: String,
        dst: String,
        /// Bind mount
        #[arg(long)]
        bind: bool,
        /// Destination is a file rather than a directory
        #[arg(long)]
        file: bool,
        /// Mount options
        #[arg(short = 'o', long = "options", value_delimiter = ',')]
        options: Vec<String>,
    },
    /// Unmount a path if it is mounted
    Unmount { path: String },
    /// Print the partition table type and whether partitions exist
    Inspect { device: String },
    /// Manage volume groups on local drives
    Vg {
        #[command(subcommand)]
        action: VgAction,
    },
}

#[derive(Subcommand, Debug)]
enum VgAction {
    /// Create physical volumes and a volume group on them
    Create {
        name: String,
        #[arg(required = true)]
        devices: Vec<String>,
    },
    /// Remove an empty volume group and its physical volumes
    Remove { name: String, devices: Vec<String> },
    /// Print free bytes in a volume group
    Free { name: String },
}

#[derive(ClapArgs, Debug)]
struct VolumeArgs {
    /// Whole volume as JSON; other volume flags are ignored when set
    #[arg(long, conflicts_with_all = ["id", "location", "storage_class"])]
    volume_json: Option<String>,

    #[arg(long)]
    id: Option<String>,

    /// Drive UUID or LVG name
    #[arg(long)]
    location: Option<String>,

    /// HDD, SSD, NVME, HDDLVG, SSDLVG, NVMELVG or SYSLVG
    #[arg(long)]
    storage_class: Option<String>,

    #[arg(long, default_value = "xfs")]
    fs_type: String,

    /// Size in bytes
    #[arg(long, default_value_t = 0)]
    size: u64,

    #[arg(long)]
    ephemeral: bool,

    /// FS, RAW or RAWPART
    #[arg(long, default_value = "FS")]
    mode: String,

    #[arg(long, env = "NODE_ID", default_value = "")]
    node_id: String,
}

impl VolumeArgs {
    fn volume(&self) -> Result<Volume> {
        if let Some(raw) = &self.volume_json {
            return Ok(serde_json::from_str(raw)?);
        }
        let required = |value: &Option<String>, flag: &str| {
            value
                .clone()
                .ok_or_else(|| Error::InvalidVolume(format!("--{} is required", flag)))
        };
        Ok(Volume {
            id: required(&self.id, "id")?,
            location: required(&self.location, "location")?,
            storage_class: required(&self.storage_class, "storage-class")?.parse::<StorageClass>()?,
            fs_type: self.fs_type.clone(),
            size: self.size,
            ephemeral: self.ephemeral,
            mode: self.mode.parse::<VolumeMode>()?,
            node_id: self.node_id.clone(),
        })
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting Volume Engine");
    info!("  Version: {}", volume_engine::VERSION);

    let config = match &args.config {
        Some(path) => EngineConfig::from_yaml_file(path)?,
        None => EngineConfig::default(),
    };

    let result = run(args.command, &config).await;
    if let Err(e) = &result {
        error!(kind = ?e.kind(), "Command failed: {}", e);
    }

    if args.print_metrics {
        print!("{}", metrics::gather_text());
    }
    result
}

async fn run(command: Command, config: &EngineConfig) -> Result<()> {
    let runner: CommandRunnerRef = Arc::new(SystemExecutor::new());

    match command {
        Command::Mount {
            src,
            dst,
            bind,
            file,
            options,
        } => {
            let opts: Vec<&str> = options.iter().map(String::as_str).collect();
            fs_operations(runner, config)
                .prepare_and_perform_mount(&src, &dst, bind, !file, &opts)
                .await
        }
        Command::Unmount { path } => fs_operations(runner, config).unmount_with_check(&path).await,
        Command::Inspect { device } => {
            let lister = Arc::new(Lsblk::new(runner.clone()));
            let tool = Arc::new(PartitionHelper::new(runner, lister));
            let layout = PartitionOperations::new(tool, config.partition.name_retry)
                .describe_device(&device)
                .await?;
            println!("table: {}", layout.table_type.as_deref().unwrap_or("none"));
            println!("partitions: {}", layout.has_partitions);
            Ok(())
        }
        Command::Vg { action } => {
            let vgs = VolumeGroupOperations::new(Arc::new(LvmHelper::new(
                runner,
                config.lvm.lvm_path.clone(),
            )));
            match action {
                VgAction::Create { name, devices } => vgs.create(&name, &devices).await,
                VgAction::Remove { name, devices } => vgs.remove(&name, &devices).await,
                VgAction::Free { name } => {
                    println!("{}", vgs.free_space(&name).await?);
                    Ok(())
                }
            }
        }
        Command::Prepare(vol) => {
            let vol = vol.volume()?;
            let provisioners = provisioners(runner, config).await?;
            match provisioners.select(vol.storage_class) {
                SelectedProvisioner::DriveBased(drive) => {
                    let part = drive.prepare_volume_partition(&vol).await?;
                    // ephemeral volumes are found again by this UUID only
                    if let Some(part) = part.filter(|_| vol.ephemeral) {
                        println!("{}", part.part_uuid);
                    }
                }
                selected => selected.prepare_volume(&vol).await?,
            }
            info!(volume_id = %vol.id, "Volume prepared");
            Ok(())
        }
        Command::Release(vol) => {
            let vol = vol.volume()?;
            provisioners(runner, config).await?.release_volume(&vol).await?;
            info!(volume_id = %vol.id, "Volume released");
            Ok(())
        }
        Command::Path(vol) => {
            let vol = vol.volume()?;
            let path = provisioners(runner, config).await?.get_volume_path(&vol).await?;
            println!("{}", path);
            Ok(())
        }
    }
}

fn fs_operations(runner: CommandRunnerRef, config: &EngineConfig) -> FsOperations {
    FsOperations::new(Arc::new(FsHelper::new(runner, &config.fs.mount_info_file)))
}

async fn provisioners(runner: CommandRunnerRef, config: &EngineConfig) -> Result<Provisioners> {
    let repo = KubeRepository::connect().await?;
    info!("Connected to Kubernetes");
    Ok(Provisioners::with_system_tools(runner, Arc::new(repo), config))
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["kube=info", "hyper=warn", "tower=warn"] {
        if let Ok(d) = directive.parse() {
            filter = filter.add_directive(d);
        }
    }

    // logs go to stderr so `path` output stays clean
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
