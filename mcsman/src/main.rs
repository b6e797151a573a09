use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mcsman::activity::ActivityPoller;
use mcsman::backup::BackupCoordinator;
use mcsman::backup::storage::GcloudCli;
use mcsman::config::{Config, TlsConfig, parse_duration};
use mcsman::crash::FsCrashReports;
use mcsman::monitor::{CommandMonitor, tls};
use mcsman::query::StatusPing;
use mcsman::sched::run_periodic;
use mcsman::scripts::ScriptRunner;
use mcsman::session::{ScreenDriver, SessionDriver};
use mcsman::store::StatusStore;
use mcsman::supervisor::Supervisor;

#[derive(Parser)]
#[command(name = "mcsman")]
#[command(about = "Manager daemon for a fleet of Minecraft servers", long_about = None)]
struct Cli {
    /// Directory containing one subdirectory per server.
    #[arg(long, default_value = "/etc/minecraft/modpacks")]
    base_dir: PathBuf,

    /// Path of the local command socket.
    #[arg(long, default_value = "/etc/minecraft/manager")]
    socket: PathBuf,

    /// Read/write deadline for command connections.
    #[arg(long, default_value = "5m", value_parser = parse_duration)]
    timeout: std::time::Duration,

    /// Lowest port assigned to a newly registered server.
    #[arg(long, default_value_t = 25565)]
    base_port: u16,

    /// Interval of the crash-recovery/reconciliation loop.
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    recovery_interval: std::time::Duration,

    /// Interval of the player-activity polling loop.
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    status_interval: std::time::Duration,

    /// Interval of the extra-scripts loop.
    #[arg(long, default_value = "1m", value_parser = parse_duration)]
    script_interval: std::time::Duration,

    /// Serve a restricted command set over TLS as well.
    #[arg(long)]
    enable_tls: bool,

    /// Port of the TLS listener.
    #[arg(long, default_value_t = 4040)]
    tls_port: u16,

    /// PEM certificate chain for the TLS listener.
    #[arg(long, requires = "enable_tls")]
    tls_cert: Option<PathBuf>,

    /// PEM private key for the TLS listener.
    #[arg(long, requires = "enable_tls")]
    tls_key: Option<PathBuf>,

    /// Read/write deadline for TLS connections.
    #[arg(long, default_value = "5m", value_parser = parse_duration)]
    tls_timeout: std::time::Duration,

    /// Bucket URL remote-triggered backups are uploaded to.
    #[arg(long, requires = "enable_tls")]
    tls_bucket: Option<String>,
}

impl Cli {
    fn into_config(self) -> Result<Config> {
        let tls = if self.enable_tls {
            let missing = |flag: &str| anyhow::anyhow!("--{flag} is required with --enable-tls");
            Some(TlsConfig {
                port: self.tls_port,
                cert: self.tls_cert.ok_or_else(|| missing("tls-cert"))?,
                key: self.tls_key.ok_or_else(|| missing("tls-key"))?,
                timeout: self.tls_timeout,
                bucket: self.tls_bucket.ok_or_else(|| missing("tls-bucket"))?,
            })
        } else {
            None
        };
        Ok(Config {
            base_dir: self.base_dir,
            socket_path: self.socket,
            command_timeout: self.timeout,
            base_port: self.base_port,
            recovery_interval: self.recovery_interval,
            status_interval: self.status_interval,
            script_interval: self.script_interval,
            tls,
            ..Config::default()
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cfg = Arc::new(Cli::parse().into_config()?);
    info!(base_dir = %cfg.base_dir.display(), "starting manager");

    let store = Arc::new(StatusStore::load(&cfg.base_dir)?);
    let driver = Arc::new(ScreenDriver);
    let crash = Arc::new(FsCrashReports::new(&cfg.base_dir));
    let query = Arc::new(StatusPing::new(cfg.query_host.clone()));
    let storage = Arc::new(GcloudCli);

    let supervisor = Arc::new(Supervisor::new(
        store.clone(),
        driver.clone(),
        crash,
        cfg.clone(),
    ));
    let backups = Arc::new(BackupCoordinator::new(
        store.clone(),
        driver.clone(),
        query.clone(),
        storage,
        cfg.clone(),
    ));
    let poller = Arc::new(ActivityPoller::new(
        store.clone(),
        driver.clone(),
        query,
        cfg.clone(),
    ));
    let scripts = Arc::new(ScriptRunner::new(&cfg.base_dir));
    let monitor = Arc::new(CommandMonitor::new(
        supervisor.clone(),
        backups,
        store,
        driver.clone(),
        cfg.clone(),
    ));

    // Bring intended-to-run servers back before serving commands.
    if let Err(err) = supervisor.reconcile().await {
        error!(error = %format!("{err:#}"), "initial reconciliation failed");
    }

    let token = CancellationToken::new();
    let mut tasks = Vec::new();

    {
        let supervisor = supervisor.clone();
        let token = token.clone();
        tasks.push(tokio::spawn(run_periodic(
            "recovery",
            cfg.recovery_interval,
            token,
            move || {
                let supervisor = supervisor.clone();
                async move { supervisor.reconcile().await }
            },
        )));
    }
    {
        let token = token.clone();
        tasks.push(tokio::spawn(run_periodic(
            "activity",
            cfg.status_interval,
            token,
            move || {
                let poller = poller.clone();
                async move { poller.tick().await }
            },
        )));
    }
    {
        let driver = driver.clone();
        let token = token.clone();
        tasks.push(tokio::spawn(run_periodic(
            "scripts",
            cfg.script_interval,
            token,
            move || {
                let driver = driver.clone();
                let scripts = scripts.clone();
                async move {
                    let running = driver.list_running().await?;
                    scripts.tick(&running).await
                }
            },
        )));
    }

    {
        let monitor = monitor.clone();
        let token = token.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = monitor.run_local(token).await {
                error!(error = %format!("{err:#}"), "local command monitor failed");
            }
        }));
    }
    if let Some(tls_cfg) = cfg.tls.clone() {
        let monitor = monitor.clone();
        let token = token.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = tls::run_remote(monitor, &tls_cfg, token).await {
                error!(error = %format!("{err:#}"), "TLS command monitor failed");
            }
        }));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    token.cancel();
    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}
