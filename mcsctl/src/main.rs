mod client;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use common::protocol::{BackupRequest, Request};

#[derive(Parser)]
#[command(name = "mcsctl")]
#[command(about = "Control client for the Minecraft server manager", long_about = None)]
struct Cli {
    /// Path of the manager's command socket.
    #[arg(long, default_value = "/etc/minecraft/manager")]
    socket: PathBuf,

    /// Seconds to wait for the manager's reply.
    #[arg(long, default_value_t = 300)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage server processes.
    Server {
        #[command(subcommand)]
        action: ServerAction,
    },
    /// Manage world backups.
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },
}

#[derive(Subcommand)]
enum ServerAction {
    /// Start the named servers.
    Start {
        #[arg(value_name = "SERVER", required = true)]
        servers: Vec<String>,
    },
    /// Stop the named servers.
    Stop {
        #[arg(value_name = "SERVER", required = true)]
        servers: Vec<String>,
    },
    /// Restart the named servers.
    Restart {
        #[arg(value_name = "SERVER", required = true)]
        servers: Vec<String>,
    },
    /// Show the status of every registered server.
    Info,
}

#[derive(Subcommand)]
enum BackupAction {
    /// Archive server worlds and upload them to a bucket.
    Create {
        /// Destination bucket URL, e.g. gs://my-bucket/backups.
        #[arg(long)]
        bucket: String,
        /// Back up even servers marked ineligible.
        #[arg(long)]
        force: bool,
        /// Archive only; skip the upload step.
        #[arg(long)]
        skip_upload: bool,
        /// Server names, or "all".
        #[arg(value_name = "SERVER", required = true)]
        servers: Vec<String>,
    },
    /// Show backup eligibility of every known server.
    Info,
}

impl Commands {
    fn into_request(self) -> Request {
        match self {
            Commands::Server { action } => match action {
                ServerAction::Start { servers } => Request::ServerStart(servers),
                ServerAction::Stop { servers } => Request::ServerStop(servers),
                ServerAction::Restart { servers } => Request::ServerRestart(servers),
                ServerAction::Info => Request::ServerInfo,
            },
            Commands::Backup { action } => match action {
                BackupAction::Create {
                    bucket,
                    force,
                    skip_upload,
                    servers,
                } => Request::BackupCreate(BackupRequest {
                    force,
                    bucket,
                    skip_upload,
                    servers,
                }),
                BackupAction::Info => Request::BackupInfo,
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let timeout = Duration::from_secs(cli.timeout);
    let request = cli.command.into_request();

    let response = client::send(&cli.socket, timeout, &request).await?;
    if response.is_success() {
        println!("{}", response.message);
        Ok(())
    } else {
        eprintln!("{}", response.message);
        std::process::exit(1);
    }
}
