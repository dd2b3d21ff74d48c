//! usb-hotplug
//!
//! Moves USB devices between QEMU VMs over their QMP sockets.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use common::{HostDevice, TargetDeviceSpec, VmBinding, setup_logging, validate_vm_id};
use hotplug::config::{HotplugConfig, duration_serde::parse_duration};
use hotplug::output::{self, OutputFormat};
use hotplug::reconcile::{Reconciler, adhoc};
use hotplug::trigger;
use hotplug::usb::SysfsScanner;
use hotplug::vm::{Introspector, QmpChannel, connect_all};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "usb-hotplug")]
#[command(author, version, about = "Move USB devices between QEMU VMs")]
#[command(long_about = "
Hot-plugs host USB devices into running QEMU VMs over QMP, and moves them
from one VM to another when a detect device (e.g. a KVM switch output)
shows which VM is active.

EXAMPLES:
    # Move a keyboard and every Logitech device to whichever VM the
    # detect device currently points at
    usb-hotplug move -d 046d:c52b -p 100:5-2.1.1 -p 101:5-2.1.2 -t 1a2b:3c4d -t 046d:

    # Show what VM 101 has attached
    usb-hotplug list 101

    # List host USB devices
    usb-hotplug scan --format text

CONFIGURATION:
    Configuration files are looked up in the following order:
    1. Path specified with --config
    2. ~/.config/usb-hotplug/config.toml
    3. /etc/usb-hotplug/config.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Move target devices to the VM selected by the detect device
    Move {
        /// Device whose position selects the destination VM
        #[arg(short = 'd', long, value_name = "VID:PID")]
        detect_device: Option<TargetDeviceSpec>,

        /// VM bound to a position, `vmid:bus-port` (repeatable)
        #[arg(short = 'p', long = "position", value_name = "VMID:BUS-PORT")]
        positions: Vec<VmBinding>,

        /// Device to move, `vvvv:pppp` or `vvvv:` (repeatable)
        #[arg(short = 't', long = "target-device", value_name = "VID:PID")]
        targets: Vec<TargetDeviceSpec>,

        /// Move every device that matches none of the targets instead
        #[arg(short, long)]
        reverse: bool,

        /// Pause after each detach (e.g. "1s", "500ms")
        #[arg(long, value_parser = parse_duration)]
        detach_settle: Option<Duration>,

        /// Pause before each attach
        #[arg(long, value_parser = parse_duration)]
        attach_settle: Option<Duration>,
    },

    /// Attach every host device matching the given specs to one VM
    Attach {
        #[arg(long)]
        vmid: String,

        #[arg(short = 'd', long = "device", value_name = "VID:PID", required = true)]
        devices: Vec<TargetDeviceSpec>,
    },

    /// Detach devices from a VM by identifier
    Detach {
        #[arg(long)]
        vmid: String,

        #[arg(short = 'd', long = "device", value_name = "ID", required = true)]
        ids: Vec<String>,
    },

    /// List passthrough devices attached to a VM
    List {
        vmid: String,

        #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
        format: OutputFormat,
    },

    /// List host USB devices
    Scan {
        #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
        format: OutputFormat,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = HotplugConfig::default();
        let path = HotplugConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        HotplugConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        HotplugConfig::load_or_default()
    };

    // Use CLI log level if specified, otherwise use config value
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.general.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    let Some(command) = args.command else {
        bail!("No command given, see --help");
    };

    match command {
        Commands::Move {
            detect_device,
            positions,
            targets,
            reverse,
            detach_settle,
            attach_settle,
        } => {
            let mut options = config.reconcile.to_options();
            options.reverse_match |= reverse;
            if let Some(d) = detach_settle {
                options.detach_settle = d;
            }
            if let Some(d) = attach_settle {
                options.attach_settle = d;
            }
            let detect = detect_device
                .or_else(|| config.detect.device.clone())
                .context("No detect device given (-d or [detect] device)")?;
            let bindings = if positions.is_empty() {
                config.detect.bindings.clone()
            } else {
                positions
            };
            let targets = if targets.is_empty() {
                config.detect.targets.clone()
            } else {
                targets
            };
            if bindings.is_empty() {
                bail!("No VM positions given (-p or [detect] bindings)");
            }
            if targets.is_empty() {
                bail!("No target devices given (-t or [detect] targets)");
            }
            run_move(&config, detect, bindings, targets, options).await
        }
        Commands::Attach { vmid, devices } => run_attach(&config, &vmid, &devices).await,
        Commands::Detach { vmid, ids } => run_detach(&config, &vmid, &ids).await,
        Commands::List { vmid, format } => run_list(&config, &vmid, format).await,
        Commands::Scan { format } => {
            let devices = scan()?;
            print!("{}", output::render_devices(&devices, format)?);
            Ok(())
        }
    }
}

fn scan() -> Result<Vec<HostDevice>> {
    SysfsScanner::default()
        .scan()
        .context("Could not scan USB devices")
}

fn introspector(config: &HotplugConfig) -> Introspector {
    Introspector::new(config.qmp.machine_bus_path.clone())
}

async fn connect_one(config: &HotplugConfig, vmid: &str) -> Result<QmpChannel> {
    validate_vm_id(vmid)?;
    QmpChannel::connect(vmid, &config.qmp)
        .await
        .with_context(|| format!("Could not connect to VM {}", vmid))
}

/// Detect-and-move workflow
async fn run_move(
    config: &HotplugConfig,
    detect: TargetDeviceSpec,
    bindings: Vec<VmBinding>,
    targets: Vec<TargetDeviceSpec>,
    options: hotplug::reconcile::ReconcileOptions,
) -> Result<()> {
    // Scan first: an unreadable topology must abort before any VM is touched
    let inventory = scan()?;

    let vm_ids = trigger::bound_vm_ids(&bindings);
    let mut vms = connect_all(&vm_ids, &config.qmp).await;

    let target = trigger::locate_target(&detect, &bindings, &inventory, |id| {
        vms.iter().any(|vm| vm.vm_id == id && vm.is_live())
    })?;

    info!(
        "Moving {} device spec(s) to VM {}{}",
        targets.len(),
        target,
        if options.reverse_match { " (reverse match)" } else { "" }
    );
    let reconciler = Reconciler::new(introspector(config), options);
    let report = reconciler
        .reconcile(&targets, &mut vms, &target, &inventory)
        .await
        .context("Reconciliation failed")?;

    print!("{}", output::render_report(&report));
    Ok(())
}

async fn run_attach(config: &HotplugConfig, vmid: &str, specs: &[TargetDeviceSpec]) -> Result<()> {
    let inventory = scan()?;
    let mut channel = connect_one(config, vmid).await?;

    let results = adhoc::attach_matching(
        &mut channel,
        &introspector(config),
        specs,
        &inventory,
        config.reconcile.attach_settle,
        &mut rand::rng(),
    )
    .await?;

    if results.is_empty() {
        warn!("No host device matches {:?}", specs.iter().map(|s| s.as_str()).collect::<Vec<_>>());
    }
    for r in &results {
        println!(
            "{} {} {}",
            r.id.as_deref().unwrap_or("-"),
            r.device,
            r.outcome
        );
    }
    Ok(())
}

async fn run_detach(config: &HotplugConfig, vmid: &str, ids: &[String]) -> Result<()> {
    let mut channel = connect_one(config, vmid).await?;
    for (id, outcome) in adhoc::detach_named(&mut channel, ids).await? {
        println!("{} {}", id, outcome);
    }
    Ok(())
}

async fn run_list(config: &HotplugConfig, vmid: &str, format: OutputFormat) -> Result<()> {
    let inventory = scan()?;
    let mut channel = connect_one(config, vmid).await?;
    let attached = introspector(config).list_attached(&mut channel).await?;
    let views = output::connected_views(&attached, &inventory);
    print!("{}", output::render_connected(&views, format)?);
    Ok(())
}
