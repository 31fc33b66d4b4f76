//! Lodestar CLI
//!
//! STUN binding responder and WebSocket signaling relay for WebRTC peers

mod config;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use lodestar_signaling::SignalingServer;
use lodestar_stun::{StunClient, StunResponder};
use lodestar_transport::UdpMultiplexer;

use config::Config;

/// Lodestar - NAT discovery and signaling rendezvous
#[derive(Parser)]
#[command(name = "lodestar")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the STUN responder and signaling relay
    Serve {
        /// STUN UDP listen address (overrides config)
        #[arg(long)]
        stun: Option<String>,

        /// Signaling TCP listen address (overrides config)
        #[arg(long)]
        signaling: Option<String>,

        /// Do not run the STUN responder
        #[arg(long)]
        no_stun: bool,

        /// Do not run the signaling relay
        #[arg(long)]
        no_signaling: bool,
    },

    /// Discover this host's public address through a STUN server
    Probe {
        /// STUN server as host:port
        #[arg(required = true)]
        server: String,

        /// Response timeout in milliseconds
        #[arg(short, long, default_value_t = 3000)]
        timeout: u64,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Write the configuration to the config path as well
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match (&cli.command, cli.config.as_deref()) {
        (Commands::Config { write: true }, Some(path)) if !path.exists() => Config::default(),
        (_, path) => Config::load_or_default(path)?,
    };

    if let Commands::Serve {
        stun,
        signaling,
        no_stun,
        no_signaling,
    } = &cli.command
    {
        if let Some(addr) = stun {
            config.stun.listen_addr.clone_from(addr);
        }
        if let Some(addr) = signaling {
            config.signaling.listen_addr.clone_from(addr);
        }
        if *no_stun {
            config.stun.enabled = false;
        }
        if *no_signaling {
            config.signaling.enabled = false;
        }
    }

    // Validate configuration
    config.validate()?;

    // Initialize logging
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve { .. } => {
            serve(&config).await?;
        }
        Commands::Probe { server, timeout } => {
            probe(&server, Duration::from_millis(timeout), &config).await?;
        }
        Commands::Config { write } => {
            show_config(&config, write, cli.config)?;
        }
    }

    Ok(())
}

/// Run the configured services until Ctrl+C
async fn serve(config: &Config) -> anyhow::Result<()> {
    let mut stun = None;
    if config.stun.enabled {
        let responder = Arc::new(StunResponder::new(config.responder_config()));
        let mux = UdpMultiplexer::bind(
            config.stun_listen_addr()?,
            config.mux_config(),
            responder.clone(),
        )
        .await?;
        mux.start()?;
        tracing::info!("STUN responder listening on udp://{}", mux.local_addr());
        stun = Some((mux, responder));
    }

    let mut signaling = None;
    if config.signaling.enabled {
        let server =
            SignalingServer::bind(config.signaling_listen_addr()?, config.signaling_config())
                .await?;
        tracing::info!(
            "Signaling relay listening on ws://{}{}",
            server.local_addr(),
            config.signaling.path
        );
        signaling = Some(server.start());
    }

    println!("Lodestar {}", env!("CARGO_PKG_VERSION"));
    println!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    if let Some(service) = signaling {
        let peers = service.peer_count();
        service.shutdown().await;
        tracing::info!("Signaling relay stopped ({} peers disconnected)", peers);
    }

    if let Some((mux, responder)) = stun {
        mux.shutdown().await;
        let mux_stats = mux.stats();
        let stun_stats = responder.stats();
        tracing::info!(
            "STUN responder stopped: {} answered, {} malformed, {} rate limited, {} datagrams dropped",
            stun_stats.requests_answered,
            stun_stats.malformed,
            stun_stats.rate_limited,
            mux_stats.datagrams_dropped
        );
    }

    Ok(())
}

/// Resolve `server` and ask it for our reflexive address
async fn probe(server: &str, timeout: Duration, config: &Config) -> anyhow::Result<()> {
    let server_addr: SocketAddr = tokio::net::lookup_host(server)
        .await?
        .next()
        .ok_or_else(|| anyhow::anyhow!("Could not resolve STUN server: {}", server))?;

    let bind_addr = if server_addr.is_ipv4() {
        "0.0.0.0:0"
    } else {
        "[::]:0"
    };

    let mut client = StunClient::bind(bind_addr).await?;
    client.set_timeout(timeout);
    client.set_ipv6_xor_mode(config.stun.ipv6_xor_mode);

    tracing::debug!(
        "Probing {} from {}",
        server_addr,
        client.local_addr()?
    );

    let mapped = client.get_mapped_address(server_addr).await?;

    println!("Server: {}", server_addr);
    println!("Local: {}", client.local_addr()?);
    println!("Mapped: {}", mapped);

    Ok(())
}

/// Print the effective configuration
fn show_config(config: &Config, write: bool, path: Option<PathBuf>) -> anyhow::Result<()> {
    print!("{}", toml::to_string_pretty(config)?);

    if write {
        let path = path.unwrap_or_else(Config::default_path);
        config.save(&path)?;
        eprintln!("Configuration saved to: {}", path.display());
    }

    Ok(())
}
