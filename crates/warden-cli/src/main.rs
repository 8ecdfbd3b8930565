//! warden: device agent and operator tooling.
//!
//! Usage:
//!   # Run the agent against the device attached over adb
//!   warden run
//!
//!   # One foreground pass, as when the app is opened
//!   warden resume
//!
//!   # Simulate a push data message
//!   warden push com.example.game,com.example.chat
//!
//!   # Parent side: edit a device's document
//!   warden mark --device 3f2a... com.example.game
//!   warden show --device 3f2a...
//!
//! Configuration is read from `--config` or `~/.config/warden/config.ron`.

mod adb;
mod config;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use warden_client::{
    AgentConfig, AgentHandle, AgentServices, DeviceSync, Launcher, PackageEnumerator, PassReport,
    Reconciler, Schedule, UninstallActuator, UninstallSession, spawn_agent, spawn_scheduler,
};
use warden_remote::{FsGateway, RemoteGateway, SharedGateway, operator};
use warden_store::{
    BLOCKLIST_FILE, BUG_FLAGS_FILE, DEVICE_ID_FILE, DeviceIdentity, FlagStore, LocalBlocklist,
    PendingNotice,
};
use warden_types::{DeviceId, order_for_display, push::KEY_PACKAGES};

use crate::adb::AdbPlatform;
use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(about = "Parental remote-delete agent and operator tooling")]
struct Args {
    /// Config file (RON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the agent until interrupted
    Run,
    /// One foreground pass: pending notice, blocklist prompt, sync, reconcile
    Resume,
    /// One background sync and reconcile
    Sync,
    /// Deliver a push message carrying comma-separated package names
    Push { packages: String },
    /// List installed apps in display order
    Installed,
    /// Show device id, local blocklist, and bug flags
    Status,
    /// Toggle the bug flag on a package
    Bug { package: String },
    /// Store a new push token on the device document
    Token { token: String },
    /// Operator: add packages to a device's blocklist
    Mark {
        #[arg(long)]
        device: Option<String>,
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Operator: remove packages from a device's blocklist
    Unmark {
        #[arg(long)]
        device: Option<String>,
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Operator: queue one-shot uninstalls on the legacy pending list
    Pending {
        #[arg(long)]
        device: Option<String>,
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Print a device document as JSON
    Show {
        #[arg(long)]
        device: Option<String>,
    },
}

/// Everything built from config, before the agent is spawned.
struct Device {
    config: Config,
    platform: Arc<AdbPlatform>,
    gateway: SharedGateway,
    id: DeviceId,
    blocklist: Arc<LocalBlocklist>,
}

impl Device {
    fn open(config: Config) -> Result<Self> {
        let platform = Arc::new(AdbPlatform::new(&config.adb));
        let gateway: SharedGateway = Arc::new(
            FsGateway::open(&config.remote_root)
                .with_context(|| format!("opening {}", config.remote_root.display()))?,
        );
        let id = match &config.device_id {
            Some(id) => DeviceId::new(id)?,
            None => DeviceIdentity::new(config.data_dir.join(DEVICE_ID_FILE), platform.android_id())
                .device_id()?,
        };
        let blocklist = Arc::new(
            LocalBlocklist::new(config.data_dir.join(BLOCKLIST_FILE), config.own_package.clone())
                .with_remote(gateway.clone(), id.clone())
                .with_remote_timeout(config.sync_timeout()),
        );
        Ok(Self { config, platform, gateway, id, blocklist })
    }

    fn flags(&self) -> FlagStore {
        FlagStore::new(self.config.data_dir.join(BUG_FLAGS_FILE))
    }

    fn spawn_agent(&self, notice: Arc<PendingNotice>) -> AgentHandle {
        let packages: Arc<dyn PackageEnumerator> = self.platform.clone();
        let launcher: Arc<dyn Launcher> = self.platform.clone();
        let actuator = Arc::new(UninstallActuator::new(self.config.own_package.clone(), launcher));
        let reconciler = Reconciler::new(
            self.id.clone(),
            self.gateway.clone(),
            self.blocklist.clone(),
            notice.clone(),
            packages.clone(),
            actuator,
            Arc::new(UninstallSession::new()),
        );
        let sync = DeviceSync::new(self.id.clone(), self.gateway.clone(), packages.clone());
        spawn_agent(
            AgentServices { reconciler, sync, notice, packages },
            AgentConfig { sync_timeout: self.config.sync_timeout() },
        )
    }
}

/// Resolve `--device`, falling back to this device's own key.
fn target(device: Option<String>, config: Config) -> Result<(SharedGateway, DeviceId)> {
    let gateway: SharedGateway = Arc::new(FsGateway::open(&config.remote_root)?);
    let id = match device {
        Some(id) => DeviceId::new(id)?,
        None => Device::open(config)?.id,
    };
    Ok((gateway, id))
}

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry = warden_telemetry::init_tracing("warden");
    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;

    match args.command {
        Cmd::Run => run(Device::open(config)?).await,
        Cmd::Resume => {
            let device = Device::open(config)?;
            let agent = device.spawn_agent(Arc::new(PendingNotice::new()));
            let report = agent.resume().await?;
            if let Some((package, outcome)) = &report.foreground {
                println!("prompted {package}: {outcome:?}");
            }
            println!("synced: {}", report.synced);
            match &report.pass {
                Some(pass) => print_pass(pass),
                None => println!("no device document"),
            }
            Ok(())
        }
        Cmd::Sync => {
            let device = Device::open(config)?;
            let agent = device.spawn_agent(Arc::new(PendingNotice::new()));
            println!("{:?}", agent.periodic().await?);
            Ok(())
        }
        Cmd::Push { packages } => {
            let device = Device::open(config)?;
            let agent = device.spawn_agent(Arc::new(PendingNotice::new()));
            let data = HashMap::from([(KEY_PACKAGES.to_string(), packages)]);
            match agent.push(data).await? {
                Some(pass) => print_pass(&pass),
                None => println!("no package names in push"),
            }
            Ok(())
        }
        Cmd::Installed => {
            let device = Device::open(config)?;
            let apps = device.platform.installed_apps()?;
            let flags = device.flags().get();
            let marked = device.blocklist.get();
            for app in order_for_display(apps, &flags, &device.config.own_package) {
                let mut tags = Vec::new();
                if flags.contains(&app.package_name) {
                    tags.push("bug");
                }
                if marked.contains(&app.package_name) {
                    tags.push("marked");
                }
                if !app.can_uninstall {
                    tags.push("system");
                }
                println!("{:<50} {:<20} {}", app.package_name, app.install_source().to_string(), tags.join(","));
            }
            Ok(())
        }
        Cmd::Status => {
            let device = Device::open(config)?;
            println!("device: {}", device.id);
            println!("blocklist: {:?}", device.blocklist.get());
            println!("bug flags: {:?}", device.flags().get());
            Ok(())
        }
        Cmd::Bug { package } => {
            let device = Device::open(config)?;
            let flagged = device.flags().toggle(&package)?;
            println!("{package}: {}", if flagged { "flagged" } else { "cleared" });
            Ok(())
        }
        Cmd::Token { token } => {
            let device = Device::open(config)?;
            let agent = device.spawn_agent(Arc::new(PendingNotice::new()));
            anyhow::ensure!(agent.new_token(&token).await?, "token was not saved");
            Ok(())
        }
        Cmd::Mark { device, packages } => {
            let (gateway, id) = target(device, config)?;
            let record = operator::mark_for_deletion(gateway.as_ref(), &id, &packages).await?;
            println!("{id}: {:?}", record.marked_for_deletion.unwrap_or_default());
            Ok(())
        }
        Cmd::Unmark { device, packages } => {
            let (gateway, id) = target(device, config)?;
            match operator::unmark(gateway.as_ref(), &id, &packages).await? {
                Some(record) => println!("{id}: {:?}", record.marked_for_deletion.unwrap_or_default()),
                None => println!("{id}: no document"),
            }
            Ok(())
        }
        Cmd::Pending { device, packages } => {
            let (gateway, id) = target(device, config)?;
            let record = operator::queue_pending_uninstalls(gateway.as_ref(), &id, &packages).await?;
            println!("{id}: {:?}", record.pending());
            Ok(())
        }
        Cmd::Show { device } => {
            let (gateway, id) = target(device, config)?;
            let record = gateway.fetch(&id).await?.with_context(|| format!("no document for {id}"))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
    }
}

async fn run(device: Device) -> Result<()> {
    let notice = Arc::new(PendingNotice::new());
    let mut notices = notice.subscribe();
    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => {
                    tracing::info!(apps = ?notice.app_names, "parent requested removal")
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "notice feed lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let agent = device.spawn_agent(notice);
    tracing::info!(device_id = %device.id, remote = %device.config.remote_root.display(), "agent started");

    let report = agent.resume().await?;
    if let Some(pass) = &report.pass {
        tracing::info!(actuated = pass.actuated.len(), "initial pass done");
    }
    if device.config.live_listener {
        if let Err(e) = agent.attach_listener().await {
            tracing::warn!(error = %e, "live listener unavailable, relying on periodic sync");
        }
    }

    let scheduler = spawn_scheduler(
        agent.clone(),
        Schedule {
            sync_interval: device.config.sync_interval(),
            install_scan: device.config.install_scan(),
        },
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    let _ = agent.detach_listener().await;
    scheduler.abort();
    Ok(())
}

fn print_pass(pass: &PassReport) {
    println!("trigger: {}", pass.trigger);
    if let Some(replaced) = &pass.replaced {
        println!("blocklist: {replaced:?}");
    }
    if !pass.absorbed.is_empty() {
        println!("absorbed: {:?}", pass.absorbed);
    }
    for (package, outcome) in &pass.actuated {
        println!("prompted {package}: {outcome:?}");
    }
}
