use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};
use wipe_attest::config::Settings;
use wipe_attest::crypto::signer::PUBLIC_KEY_FILE;
use wipe_attest::crypto::{verify_certificate, CertificateStore, Signer, Verifier};
use wipe_attest::drives::{device_backs, DeviceInspector};
use wipe_attest::process::WipeControl;
use wipe_attest::strategy::WipeStatus;
use wipe_attest::tools::{PrivilegeToken, SystemRunner, ToolRunner};
use wipe_attest::ui::{human_bytes, WipeProgress};
use wipe_attest::{Orchestrator, TargetMode, WipeTarget};

#[derive(Parser)]
#[command(name = "wipe-attest")]
#[command(about = "Erase storage with OS and firmware utilities and issue signed wipe certificates")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(long, global = true, env = "WIPE_ATTEST_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List block devices
    List {
        /// Print the raw enumeration as JSON
        #[arg(long)]
        json: bool,
    },

    /// Classify a device without modifying it
    Inspect {
        /// Device path (e.g., /dev/sda)
        device: String,

        #[arg(long)]
        json: bool,
    },

    /// Erase a device, a partition, or the free space of a mounted filesystem
    Wipe {
        /// Device or partition path, or a mount point with --free-space
        target: String,

        /// Treat the target as a partition
        #[arg(long, conflicts_with = "free_space")]
        partition: bool,

        /// Overwrite only unallocated space of the filesystem mounted at TARGET
        #[arg(long)]
        free_space: bool,

        /// Overwrite passes for zero-fill (defaults to the configured value)
        #[arg(short, long)]
        passes: Option<u32>,

        /// Plan and certify without executing anything destructive
        #[arg(long)]
        dry_run: bool,

        /// Skip the typed confirmation
        #[arg(short, long)]
        yes: bool,

        /// Operator name recorded in the certificate
        #[arg(long)]
        operator: Option<String>,
    },

    /// Check a certificate against its detached signature
    Verify {
        /// Path to the certificate JSON
        certificate: PathBuf,

        /// Public key (defaults to the local signing key)
        #[arg(long)]
        public_key: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let log_guard = init_logging(cli.debug, &settings.log_dir);

    let code = match cli.command {
        Commands::List { json } => list_devices(&settings, json),
        Commands::Inspect { device, json } => inspect_device(&settings, &device, json),
        Commands::Wipe {
            target,
            partition,
            free_space,
            passes,
            dry_run,
            yes,
            operator,
        } => {
            let target = if free_space {
                WipeTarget::FreeSpace(target)
            } else if partition {
                WipeTarget::Partition(target)
            } else {
                WipeTarget::Device(target)
            };

            let mut settings = settings;
            settings.dry_run |= dry_run;
            if let Some(operator) = operator {
                settings.operator = operator;
            }
            wipe_target(settings, target, passes, yes).await
        }
        Commands::Verify {
            certificate,
            public_key,
        } => verify(&settings, &certificate, public_key.as_deref()),
    }?;

    drop(log_guard);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Console layer plus a daily file under `log_dir`. The guard must outlive
/// every event or the file writer drops buffered lines.
fn init_logging(debug: bool, log_dir: &Path) -> Option<WorkerGuard> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("wipe-attest")
        .filename_suffix("log")
        .build(log_dir);

    let (file_layer, guard) = match appender {
        Ok(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        Err(e) => {
            eprintln!("Warning: file logging disabled ({}): {}", log_dir.display(), e);
            (None, None)
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .with(file_layer)
        .init();

    guard
}

fn list_devices(settings: &Settings, json: bool) -> Result<i32> {
    let inspector = DeviceInspector::new(system_runner(), settings.sysfs_root.clone());
    let devices = inspector.enumerate()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(0);
    }

    let root = inspector.root_device();
    println!(
        "{:<20} {:>10} {:<6} {:<5} {:<24} {}",
        "PATH".bold(),
        "SIZE".bold(),
        "TYPE".bold(),
        "ROTA".bold(),
        "MODEL".bold(),
        "MOUNT".bold()
    );
    for dev in devices {
        let rota = match dev.rotational {
            Some(true) => "yes",
            Some(false) => "no",
            None => "?",
        };
        let line = format!(
            "{:<20} {:>10} {:<6} {:<5} {:<24} {}",
            dev.path,
            human_bytes(dev.size as f64),
            dev.device_type,
            rota,
            dev.model.as_deref().unwrap_or("-"),
            dev.mountpoint.as_deref().unwrap_or("")
        );
        if root.as_deref().is_some_and(|r| device_backs(&dev.path, r)) {
            println!("{}  {}", line.yellow(), "(system)".yellow());
        } else {
            println!("{}", line);
        }
    }
    Ok(0)
}

fn inspect_device(settings: &Settings, device: &str, json: bool) -> Result<i32> {
    let inspector = DeviceInspector::new(system_runner(), settings.sysfs_root.clone());
    let class = inspector.inspect(device);

    if json {
        println!("{}", serde_json::to_string_pretty(&class)?);
        return Ok(0);
    }

    println!("{}", class.path.bold());
    println!("  Kind:        {} ({:?}, via {:?})", class.kind, class.confidence, class.tier);
    println!("  Model:       {}", class.model.as_deref().unwrap_or("unknown"));
    println!("  Serial:      {}", class.serial.as_deref().unwrap_or("unknown"));
    if let Some(size) = class.size {
        println!("  Size:        {}", human_bytes(size as f64));
    }
    println!("  Rotational:  {}", yes_no(class.rotational));
    println!("  Discard:     {}", yes_no(class.discard_supported));
    println!("  ATA erase:   {}", yes_no(class.secure_erase_supported));
    for failure in &class.probe_failures {
        println!("  {} {}: {}", "probe failed".yellow(), failure.probe, failure.reason);
    }
    Ok(0)
}

/// Process exit code for a certified run; anything short of success (or a
/// dry run) is nonzero so scripts cannot mistake it for a finished erasure.
fn exit_code_for(status: WipeStatus) -> i32 {
    match status {
        WipeStatus::Success | WipeStatus::DryRun => 0,
        WipeStatus::Failed | WipeStatus::Partial | WipeStatus::Cancelled => 2,
    }
}

async fn wipe_target(settings: Settings, target: WipeTarget, passes: Option<u32>, yes: bool) -> Result<i32> {
    let runner = system_runner();
    let passes = settings.effective_passes(passes);
    let dry_run = settings.dry_run;

    let privilege = if dry_run || is_root() {
        None
    } else {
        Some(prompt_password()?)
    };

    let signer = Arc::new(
        Signer::load_or_create(&settings.key_dir).context("Failed to load signing key")?,
    );
    let orchestrator = Orchestrator::new(runner, settings, signer).with_privilege(privilege);

    if target.mode() != TargetMode::FreeSpace {
        if let Some(root) = orchestrator.inspector().root_device() {
            if device_backs(target.path(), &root) {
                bail!("{} backs the running system (/ is mounted from {})", target.path(), root);
            }
        }
    }

    // The plan shown here is the one executed after confirmation
    let plan = orchestrator.prepare(&target, passes)?;
    let (class, strategy) = (&plan.classification, &plan.strategy);
    println!("\n{}", "Erasure plan".bold());
    println!("  Target:  {} ({})", target.path(), target.mode());
    if let Some(class) = class {
        println!("  Kind:    {} ({:?})", class.kind, class.confidence);
        if let Some(model) = &class.model {
            println!("  Model:   {}", model);
        }
    }
    let chain: Vec<&str> = strategy.candidates.iter().map(|c| c.method.label()).collect();
    println!("  Methods: {}", chain.join(" -> "));
    println!("  Passes:  {}", strategy.passes);

    if dry_run {
        println!("{}", "  DRY RUN: nothing will be modified".cyan());
    } else if !yes && !confirm_destruction(target.path())? {
        println!("Operation cancelled");
        return Ok(0);
    }

    let progress = Arc::new(WipeProgress::new(strategy.size));
    let orchestrator = orchestrator.with_progress(Some(progress.callback()));
    install_signal_handlers(orchestrator.control())?;

    let outcome = tokio::task::spawn_blocking(move || orchestrator.execute_plan(plan))
        .await
        .context("Wipe task panicked")??;
    progress.finish(outcome.result.status.to_string());

    let status = outcome.result.status.to_string().to_uppercase();
    let status = match outcome.result.status {
        WipeStatus::Success => status.green().bold(),
        WipeStatus::DryRun => status.cyan().bold(),
        WipeStatus::Partial | WipeStatus::Cancelled => status.yellow().bold(),
        WipeStatus::Failed => status.red().bold(),
    };

    println!("\nStatus:      {}", status);
    println!("Summary:     {}", outcome.certificate.result.summary);
    println!("Certificate: {}", outcome.paths.json_path.display());
    println!("Signature:   {}", outcome.paths.sig_path.display());
    println!("Report:      {}", outcome.paths.report_path.display());
    for note in &outcome.certificate.notes {
        println!("  {} {}", "note:".yellow(), note);
    }

    Ok(exit_code_for(outcome.result.status))
}

fn verify(settings: &Settings, certificate: &Path, public_key: Option<&Path>) -> Result<i32> {
    let key_path = public_key
        .map(Path::to_path_buf)
        .unwrap_or_else(|| settings.key_dir.join(PUBLIC_KEY_FILE));
    let verifier = Verifier::from_file(&key_path)
        .with_context(|| format!("Failed to read public key {}", key_path.display()))?;

    if !verify_certificate(certificate, &verifier)? {
        println!("{} {}", "INVALID".red().bold(), certificate.display());
        println!("  signature does not match key {}", verifier.fingerprint());
        return Ok(1);
    }

    let cert = CertificateStore::load(certificate)?;
    println!("{} {}", "VALID".green().bold(), certificate.display());
    println!("  Certificate: {}", cert.certificate_id);
    println!("  Device:      {}", cert.device.path);
    println!("  Status:      {}", cert.result.status);
    println!("  Summary:     {}", cert.result.summary);
    println!("  Signed by:   {}", verifier.fingerprint());
    Ok(0)
}

fn system_runner() -> Arc<dyn ToolRunner> {
    Arc::new(SystemRunner::new())
}

fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

fn yes_no(value: Option<bool>) -> &'static str {
    match value {
        Some(true) => "yes",
        Some(false) => "no",
        None => "unknown",
    }
}

fn prompt_password() -> Result<PrivilegeToken> {
    let term = console::Term::stderr();
    term.write_str("sudo password: ")?;
    let secret = term.read_secure_line()?;
    if secret.is_empty() {
        bail!("No password given");
    }
    Ok(PrivilegeToken::new(secret))
}

fn confirm_destruction(path: &str) -> Result<bool> {
    println!(
        "\n{}",
        format!("All data on {} will be destroyed.", path).red().bold()
    );
    print!("Type 'DELETE' to confirm: ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim() == "DELETE")
}

// SIGINT/SIGTERM cancel, SIGUSR1 pauses, SIGUSR2 resumes
fn install_signal_handlers(control: WipeControl) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM, SIGUSR1, SIGUSR2};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGUSR1, SIGUSR2])?;

    std::thread::spawn(move || {
        for sig in signals.forever() {
            match sig {
                SIGUSR1 => match control.pause() {
                    Ok(()) => eprintln!("\nErasure paused (send SIGUSR2 to resume)"),
                    Err(e) => eprintln!("\nCannot pause: {}", e),
                },
                SIGUSR2 => match control.resume() {
                    Ok(()) => eprintln!("\nErasure resumed"),
                    Err(e) => eprintln!("\nCannot resume: {}", e),
                },
                _ => {
                    eprintln!("\nInterrupt received, cancelling erasure...");
                    control.cancel();
                }
            }
        }
    });

    Ok(())
}
