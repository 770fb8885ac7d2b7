//! GReAMS Node - peer-to-peer git repository sharing.

use anyhow::Context;
use clap::{Parser, Subcommand};
use greams_node::observability::init_logging;
use greams_node::{fetch, Config, DiskStore, GitCli, RepoService};
use greams_p2p::{handler_fn, BoxError, HandlerResponse, PeerId, Session, TcpTransport};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// GReAMS Node - serve and clone git repositories between peers
#[derive(Parser, Debug)]
#[command(name = "greams-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Peer identity (overrides the configuration)
    #[arg(long)]
    identity: Option<String>,

    /// Listen address (overrides the configuration)
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve a repository to peers
    Serve {
        /// Git directory to serve
        #[arg(long)]
        repo_dir: Option<PathBuf>,
    },
    /// Fetch a repository from a peer
    Fetch {
        /// Identity of the peer to fetch from
        #[arg(long)]
        peer: String,

        /// Address of the peer, if not in the configuration
        #[arg(long)]
        addr: Option<SocketAddr>,

        /// Directory to write the fetched pack and refs into
        #[arg(long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(identity) = args.identity {
        config.identity = Some(identity);
    }
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if let Some(format) = args.log_format {
        config.log_format = format;
    }

    init_logging(&config.log_level, config.log_format());
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting GReAMS node");

    match args.command {
        Command::Serve { repo_dir } => {
            if let Some(repo_dir) = repo_dir {
                config.repo_dir = repo_dir;
            }
            serve(config).await
        }
        Command::Fetch { peer, addr, out } => {
            let peer = PeerId::parse(&peer).context("invalid peer id")?;
            if let Some(addr) = addr {
                config.peers.insert(peer.to_string(), addr);
            }
            fetch_from(config, peer, out).await
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let identity = config.peer_id()?;
    let (transport, incoming) =
        TcpTransport::bind(identity.clone(), config.listen_addr, config.directory()?).await?;

    let service = RepoService::new(
        config.repo_name.clone(),
        Arc::new(GitCli::new(&config.repo_dir)),
        Arc::new(DiskStore::new(&config.repo_dir)),
    );
    let session = Session::new(
        identity.clone(),
        Arc::new(transport),
        incoming,
        Arc::new(service),
        config.session_config(),
    );

    tracing::info!(
        identity = %identity,
        listen_addr = %config.listen_addr,
        repo_dir = %config.repo_dir.display(),
        repo_name = %config.repo_name,
        "Serving repository. Press Ctrl+C to stop."
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!(peers = session.peers().len(), "Shutting down");
    Ok(())
}

async fn fetch_from(config: Config, peer: PeerId, out: PathBuf) -> anyhow::Result<()> {
    let identity = config.peer_id()?;
    let (transport, incoming) =
        TcpTransport::bind(identity.clone(), config.listen_addr, config.directory()?).await?;

    let pong = handler_fn(|_req| async { Ok::<_, BoxError>(HandlerResponse::ok("pong")) });
    let session = Session::new(
        identity,
        Arc::new(transport),
        incoming,
        Arc::new(pong),
        config.session_config(),
    );

    let store = DiskStore::new(&out);
    let outcome = fetch(
        &session,
        &peer,
        &config.repo_name,
        config.side_band_mode()?,
        &store,
    )
    .await
    .with_context(|| format!("failed to fetch from {peer}"))?;

    tracing::info!(
        refs = outcome.refs.len(),
        pack_bytes = outcome.pack.len(),
        pack_path = ?outcome.pack_path,
        out = %out.display(),
        "Fetched repository"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use greams_node::observability::LogFormat;

    #[test]
    fn parses_fetch_command() {
        let args = Args::parse_from([
            "greams-node",
            "--log-format",
            "json",
            "fetch",
            "--peer",
            "bob",
            "--addr",
            "127.0.0.1:9418",
            "--out",
            "clone",
        ]);
        assert_eq!(args.log_format.as_deref(), Some("json"));
        assert_eq!(LogFormat::parse(args.log_format.as_deref().unwrap()), LogFormat::Json);
        match args.command {
            Command::Fetch { peer, addr, out } => {
                assert_eq!(peer, "bob");
                assert_eq!(addr, Some("127.0.0.1:9418".parse().unwrap()));
                assert_eq!(out, PathBuf::from("clone"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn args_are_consistent() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
