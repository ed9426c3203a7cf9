use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use wifi_join::{
    Collaborators, JoinController, JoinError, LocalEventBus, NetworkManagerPlatform, NmcliMonitor,
    TargetNetwork, TokioTimer,
    config::{self, Config},
    connection, interface, scan,
};

#[derive(Parser)]
#[command(name = "wifi-join")]
#[command(about = "Join a specific WiFi network and wait until the connection is confirmed")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available WiFi interfaces
    ListInterfaces,

    /// Scan for WiFi networks and show their detected security
    Scan {
        /// Interface to use (defaults to the configured or first WiFi interface)
        #[arg(short, long)]
        interface: Option<String>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Join a WiFi network and wait for the connection
    Join {
        /// SSID of the network to join
        ssid: String,

        /// Password or key for the network (omit for open networks)
        #[arg(short, long)]
        password: Option<String>,

        /// Interface to use (defaults to the configured or first WiFi interface)
        #[arg(short, long)]
        interface: Option<String>,

        /// Seconds to wait for the connection (defaults to the configured timeout)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the current association
    Status {
        /// Interface to check (defaults to the configured or first WiFi interface)
        #[arg(short, long)]
        interface: Option<String>,

        /// Print the association as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the configuration
    ShowConfig,

    /// Update and save the configuration
    SaveConfig {
        /// Default interface
        #[arg(short, long)]
        interface: Option<String>,

        /// Default join timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Log filter directive, e.g. "wifi_join=debug"
        #[arg(long)]
        log_filter: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_file = match &cli.config {
        Some(path) => path.clone(),
        None => config::config_path()?,
    };
    let cfg = Config::load_from(&config_file)?;
    setup_logging(cli.verbose, cfg.log_filter.as_deref());

    match cli.command {
        Commands::ListInterfaces => cmd_list_interfaces(),
        Commands::Scan { interface, json } => cmd_scan(&cfg, interface.as_deref(), json),
        Commands::Join {
            ssid,
            password,
            interface,
            timeout,
            json,
        } => cmd_join(&cfg, ssid, password, interface.as_deref(), timeout, json).await,
        Commands::Status { interface, json } => cmd_status(&cfg, interface.as_deref(), json),
        Commands::ShowConfig => cmd_show_config(&config_file, &cfg),
        Commands::SaveConfig {
            interface,
            timeout,
            log_filter,
        } => cmd_save_config(&config_file, cfg, interface, timeout, log_filter),
    }
}

/// RUST_LOG wins, then --verbose, then the configured filter
fn setup_logging(verbose: bool, configured: Option<&str>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directive = if verbose {
            "debug"
        } else {
            configured.unwrap_or("info")
        };
        EnvFilter::new(directive)
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn pick_interface(cfg: &Config, interface: Option<&str>) -> Result<String> {
    let requested = interface.or(cfg.default_interface.as_deref());
    let iface = interface::resolve_interface(requested)?;
    Ok(iface.name)
}

fn cmd_list_interfaces() -> Result<()> {
    let interfaces = interface::list_wifi_interfaces()?;

    if interfaces.is_empty() {
        println!("No WiFi interfaces found.");
        return Ok(());
    }

    println!("{:<16} {}", "INTERFACE", "STATE");
    println!("{}", "-".repeat(32));

    for iface in interfaces {
        println!("{:<16} {}", iface.name, iface.state);
    }

    Ok(())
}

fn cmd_scan(cfg: &Config, interface: Option<&str>, json: bool) -> Result<()> {
    let iface = pick_interface(cfg, interface)?;
    info!(interface = %iface, "scanning");

    if let Err(e) = scan::trigger_rescan(&iface) {
        warn!("rescan refused, showing cached results: {}", e);
    }
    std::thread::sleep(scan::SCAN_SETTLE);
    let records = scan::list_scan_records(&iface)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        scan::display_records(&records);
    }

    Ok(())
}

async fn cmd_join(
    cfg: &Config,
    ssid: String,
    password: Option<String>,
    interface: Option<&str>,
    timeout: Option<u64>,
    json: bool,
) -> Result<()> {
    let iface = pick_interface(cfg, interface)?;
    let timeout = timeout.map(Duration::from_secs).unwrap_or_else(|| cfg.timeout());

    let events = Arc::new(LocalEventBus::new());
    let _monitor = NmcliMonitor::spawn(&iface, events.clone())?;
    let platform = Arc::new(NetworkManagerPlatform::new(iface.clone(), events.clone()));

    let (tx, rx) = oneshot::channel();
    let tx = Mutex::new(Some(tx));
    let controller = JoinController::new(
        TargetNetwork::new(ssid.clone(), password.unwrap_or_default()),
        timeout,
        Collaborators {
            platform,
            events,
            timer: Arc::new(TokioTimer::current()),
        },
        move |outcome| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(outcome);
            }
        },
    );

    if !json {
        println!(
            "Joining '{}' on interface {} (timeout {}s)...",
            ssid,
            iface,
            controller.timeout().as_secs()
        );
    }

    let starter = controller.clone();
    match tokio::task::spawn_blocking(move || starter.start())
        .await
        .context("Join task failed")?
    {
        // A disabled radio is also delivered as the outcome
        Ok(()) | Err(JoinError::RadioDisabled) => {}
        Err(e) => return Err(e.into()),
    }

    let mut rx = rx;
    let received = tokio::select! {
        outcome = &mut rx => outcome,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, cancelling join");
            controller.cancel();
            rx.await
        }
    };
    let outcome = received.context("Join controller stopped without an outcome")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("Join {}: {}", ssid, outcome);
    }

    if !outcome.is_connected() {
        bail!("Could not join '{}': {}", ssid, outcome);
    }

    if !json {
        println!();
        let association = connection::current_association(&iface)?;
        connection::display_association(&iface, association.as_ref());
    }

    Ok(())
}

fn cmd_status(cfg: &Config, interface: Option<&str>, json: bool) -> Result<()> {
    let iface = pick_interface(cfg, interface)?;
    let association = connection::current_association(&iface)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&association)?);
    } else {
        connection::display_association(&iface, association.as_ref());
    }

    Ok(())
}

fn cmd_show_config(path: &Path, cfg: &Config) -> Result<()> {
    println!("Config file: {}", path.display());
    println!();
    println!("Interface: {}", cfg.default_interface.as_deref().unwrap_or("(auto)"));
    println!("Timeout:   {}s", cfg.timeout_secs);
    println!("Logging:   {}", cfg.log_filter.as_deref().unwrap_or("info"));

    Ok(())
}

fn cmd_save_config(
    path: &Path,
    mut cfg: Config,
    interface: Option<String>,
    timeout: Option<u64>,
    log_filter: Option<String>,
) -> Result<()> {
    if let Some(interface) = interface {
        cfg.default_interface = Some(interface);
    }
    if let Some(timeout) = timeout {
        cfg.timeout_secs = timeout;
    }
    if let Some(filter) = log_filter {
        cfg.log_filter = Some(filter);
    }

    cfg.save_to(path)?;
    println!("Saved configuration to {}", path.display());

    Ok(())
}
