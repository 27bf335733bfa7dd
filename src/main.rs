use clap::{Parser, Subcommand};
use gossip_share::utils::{node_utils::FIRST_AUTO_PORT, setup_logging};
use gossip_share::{AddressValidator, Config, Node, NodeUtils, P2PError, Result};
use log::{warn, LevelFilter};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gossip-share")]
#[command(about = "Gossip-based peer discovery and file exchange")]
#[command(version)]
struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a peer node
    Start {
        /// JSON config file; flags below override it
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Address to listen on
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (omit to pick the first free port from 51000)
        #[arg(short, long)]
        port: Option<u16>,
        /// Directory to share files from
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// Fixed node identity
        #[arg(long)]
        id: Option<String>,
        /// Peer to join (host:port), may be repeated
        #[arg(long = "peer")]
        peers: Vec<String>,
        /// Run one discovery round after joining
        #[arg(long)]
        discover: bool,
    },
    /// Check whether a node answers the liveness probe
    Probe {
        /// Address to probe (host:port)
        addr: String,
    },
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| P2PError::ConfigError(format!("Expected host:port, got {}", addr)))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| P2PError::ConfigError(format!("Invalid port in {}", addr)))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    Ok((host.to_string(), port))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });

    match cli.command {
        Commands::Start {
            config,
            host,
            port,
            dir,
            id,
            peers,
            discover,
        } => {
            let mut config = match config {
                Some(path) => Config::load(&path)?,
                None => Config::default(),
            };
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(dir) = dir {
                config.shared_dir = dir;
            }
            if id.is_some() {
                config.node_id = id;
            }
            config.port = match port {
                Some(port) => port,
                None if config.port != 0 => config.port,
                None => {
                    let bind = NodeUtils::resolve_bind_addr(&config.host, 0).await?;
                    NodeUtils::find_available_port(bind.ip(), FIRST_AUTO_PORT)?
                }
            };

            let mut node = Node::new(config).await?;
            let addr = node.start().await?;
            println!("Node {} listening on {}", node.id(), addr);
            println!("Sharing {:?}", node.file_directory().await);

            for peer in &peers {
                let (host, port) = split_host_port(peer)?;
                match node.manual_peer_add(&host, port).await {
                    Ok(record) => println!("Joined {}", record),
                    Err(e) => warn!("Could not join {}: {}", peer, e),
                }
            }

            if discover {
                let admitted = node.broadcast_discovery().await;
                println!("Discovery admitted {} new peers", admitted);
            }

            node.run_until_ctrl_c().await?;
        }
        Commands::Probe { addr } => {
            let (host, port) = split_host_port(&addr)?;
            let defaults = Config::default();
            let validator =
                AddressValidator::new(defaults.probe_timeout(), defaults.max_message_size);
            match validator.probe(&host, port).await {
                Ok(()) => println!("{} is reachable", addr),
                Err(e) => println!("{} is unreachable: {}", addr, e),
            }
        }
    }

    Ok(())
}
